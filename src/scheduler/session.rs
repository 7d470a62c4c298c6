use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::config::{ConvergenceConfig, HaltConfig, NoiseEstimationConfig, SchedulerConfig};
use crate::film::channel::ChannelKind;
use crate::film::convergence::ConvergenceTest;
use crate::film::model::Film;
use crate::film::noise::NoiseEstimator;
use crate::film::pipeline::{ImagePipeline, auto_linear_scale};
use crate::foundation::error::{TilelightError, TilelightResult};
use crate::foundation::geom::PixelRegion;
use crate::scheduler::repository::{SharedFilm, TileRepository};
use crate::scheduler::tile::TileWork;

/// Cooperative cancellation flag shared between the session and its workers.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// A fresh, unset token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals every holder of this token to stop.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// True once any holder has cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Renders samples for one claimed tile into a worker-private film.
///
/// Implementations receive a film whose top-left `work.region()` sized part
/// maps to the tile; anything outside it is ignored at merge. Long-running
/// renderers should poll `cancel` and return early when it fires (partial
/// buffers are abandoned, not merged).
pub trait SampleRenderer: Sync {
    /// Fills `film` with one pass of samples for `work`'s region.
    fn render_tile(
        &self,
        work: &TileWork,
        film: &mut Film,
        cancel: &CancelToken,
    ) -> TilelightResult<()>;
}

impl<F> SampleRenderer for F
where
    F: Fn(&TileWork, &mut Film, &CancelToken) -> TilelightResult<()> + Sync,
{
    fn render_tile(
        &self,
        work: &TileWork,
        film: &mut Film,
        cancel: &CancelToken,
    ) -> TilelightResult<()> {
        self(work, film, cancel)
    }
}

/// Options controlling `RenderSession` execution.
#[derive(Clone, Debug)]
pub struct RenderSessionOpts {
    /// Number of worker threads. `None` uses the available parallelism.
    pub threads: Option<usize>,
    /// Supervisor wake-up interval for halt-condition checks.
    pub poll_interval: Duration,
    /// Engine-side global halt conditions.
    pub halt: HaltConfig,
    /// Settings for the image-level convergence test.
    pub convergence: ConvergenceConfig,
    /// Settings for the adaptive noise estimator.
    pub noise: NoiseEstimationConfig,
}

impl Default for RenderSessionOpts {
    fn default() -> Self {
        Self {
            threads: None,
            poll_interval: Duration::from_millis(100),
            halt: HaltConfig::default(),
            convergence: ConvergenceConfig::default(),
            noise: NoiseEstimationConfig::default(),
        }
    }
}

/// End-of-run statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SessionStats {
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
    /// Mean samples per pixel accumulated in the final film.
    pub samples_per_pixel: f64,
    /// Multipass threshold generations completed.
    pub generations: u32,
    /// Tiles that passed their convergence check.
    pub converged_tiles: usize,
    /// Tiles in the grid.
    pub total_tiles: usize,
    /// True when the run ended through cancellation or a halt condition
    /// rather than full tile convergence.
    pub halted: bool,
}

/// Drives a tile repository to completion with a pool of worker threads.
///
/// The session front-loads tile grid construction; `run` then blocks until
/// every tile converges, a halt condition fires, or the cancel token is set,
/// and returns the accumulated film.
pub struct RenderSession {
    repository: TileRepository,
    shared: SharedFilm,
    opts: RenderSessionOpts,
    cancel: CancelToken,
}

impl RenderSession {
    /// Builds the tile repository and shared film for one render.
    pub fn new(
        region: PixelRegion,
        channels: impl IntoIterator<Item = ChannelKind>,
        config: SchedulerConfig,
        opts: RenderSessionOpts,
    ) -> TilelightResult<Self> {
        if let Some(n) = opts.threads
            && n == 0
        {
            return Err(TilelightError::config(
                "session 'threads' must be >= 1 when set",
            ));
        }

        let repository = TileRepository::new(region, config)?;
        let film = Film::with_channels(region.width, region.height, channels)?;
        Ok(Self {
            repository,
            shared: SharedFilm::new(film),
            opts,
            cancel: CancelToken::new(),
        })
    }

    /// A clone of the session's cancel token, for an external stop signal.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// The session's tile repository, for progress reporting.
    pub fn repository(&self) -> &TileRepository {
        &self.repository
    }

    /// Runs the render to completion and returns the film with the stats.
    pub fn run(self, renderer: &dyn SampleRenderer) -> TilelightResult<(Film, SessionStats)> {
        let started = Instant::now();
        let threads = match self.opts.threads {
            Some(n) => n,
            None => std::thread::available_parallelism().map_or(1, |n| n.get()),
        };
        let region = self.repository.region();
        let (tile_w, tile_h) = self.repository.tile_size();

        let mut convtest = if self.opts.halt.use_convergence_test {
            Some(ConvergenceTest::new(
                region.width,
                region.height,
                &self.opts.convergence,
            )?)
        } else {
            None
        };
        let mut noise = NoiseEstimator::new(region.width, region.height, &self.opts.noise)?;

        info!(
            threads,
            tiles = self.repository.tile_count(),
            width = region.width,
            height = region.height,
            "render session started"
        );

        std::thread::scope(|scope| -> TilelightResult<()> {
            let mut handles = Vec::with_capacity(threads);
            for worker_id in 0..threads {
                let repository = &self.repository;
                let shared = &self.shared;
                let cancel = self.cancel.clone();
                handles.push(scope.spawn(move || -> TilelightResult<()> {
                    worker_loop(worker_id, repository, shared, renderer, &cancel, tile_w, tile_h)
                }));
            }

            // Supervisor: halt-condition checks between worker finalizations.
            // On any error the token is cancelled first, so workers wind down
            // and the scope can join them instead of deadlocking.
            let mut supervisor = Ok(());
            while !self.repository.is_done() && !self.cancel.is_cancelled() {
                std::thread::sleep(self.opts.poll_interval);
                if let Err(e) = self.check_halt_conditions(started, convtest.as_mut(), &mut noise)
                {
                    self.cancel.cancel();
                    supervisor = Err(e);
                    break;
                }
            }
            if self.cancel.is_cancelled() {
                debug!("session cancelled, waiting for workers");
            }

            for handle in handles {
                match handle.join() {
                    // Worker errors already cancelled the token themselves.
                    Ok(result) => result?,
                    Err(_) => {
                        self.cancel.cancel();
                        return Err(TilelightError::scheduler("worker thread panicked"));
                    }
                }
            }
            supervisor
        })?;

        let halted = self.cancel.is_cancelled() || !self.repository.is_done();
        let repo_stats = self.repository.stats();
        let film = self.shared.into_inner();
        let stats = SessionStats {
            elapsed: started.elapsed(),
            samples_per_pixel: film.samples_per_pixel(),
            generations: repo_stats.generation,
            converged_tiles: repo_stats.converged_tiles,
            total_tiles: self.repository.tile_count(),
            halted,
        };
        info!(
            elapsed_secs = stats.elapsed.as_secs_f64(),
            samples_per_pixel = stats.samples_per_pixel,
            halted = stats.halted,
            "render session finished"
        );
        Ok((film, stats))
    }

    fn check_halt_conditions(
        &self,
        started: Instant,
        convtest: Option<&mut ConvergenceTest>,
        noise: &mut NoiseEstimator,
    ) -> TilelightResult<()> {
        if let Some(budget) = self.opts.halt.wall_clock
            && started.elapsed() >= budget
        {
            info!(budget_secs = budget.as_secs_f64(), "wall-clock budget reached");
            self.cancel.cancel();
            return Ok(());
        }

        let mut film = self.shared.lock();

        if let Some(budget) = self.opts.halt.samples_per_pixel
            && film.samples_per_pixel() >= budget
        {
            info!(budget, "sample budget reached");
            self.cancel.cancel();
            return Ok(());
        }

        // Both estimators compare post-processed snapshots; without a
        // Display channel there is nothing for them to look at.
        if !film.has_channel(ChannelKind::Display) {
            return Ok(());
        }
        if convtest.is_none() && !noise.update_required(&film) {
            return Ok(());
        }

        let mut total_y = 0.0f32;
        for y in 0..film.height() {
            for x in 0..film.width() {
                let lum = film.normalized_radiance(x, y).luminance();
                if lum > 0.0 && lum.is_finite() {
                    total_y += lum;
                }
            }
        }
        let avg = total_y / film.pixel_count() as f32;
        ImagePipeline::new(auto_linear_scale(avg, 1.0), 2.2).execute(&mut film)?;

        if noise.update_required(&film) {
            noise.test(&mut film)?;
        }

        // The verdict is applied after the film guard is released: workers
        // inside next_tile hold the repository lock and then take the film
        // lock, so touching the repository here would invert that order.
        let mut converged = false;
        if let Some(test) = convtest {
            let remaining = test.test(&mut film)?;
            if test.has_converged() {
                debug!(max_error = test.max_error(), "image converged globally");
                converged = true;
            } else {
                debug!(remaining, max_error = test.max_error(), "convergence test");
            }
        }
        drop(film);

        if converged {
            self.repository.set_global_convergence(true);
        }
        Ok(())
    }
}

fn worker_loop(
    worker_id: usize,
    repository: &TileRepository,
    shared: &SharedFilm,
    renderer: &dyn SampleRenderer,
    cancel: &CancelToken,
    tile_w: u32,
    tile_h: u32,
) -> TilelightResult<()> {
    // One tile-sized private buffer per worker, allocated once and reused.
    let mut worker_film = {
        let film = shared.lock();
        film.derived(tile_w, tile_h)?
    };
    let mut work: Option<TileWork> = None;
    let mut passes = 0u64;

    loop {
        if cancel.is_cancelled() {
            if let Some(abandoned) = work.take() {
                repository.abandon(abandoned);
            }
            break;
        }

        // An error anywhere must also stop the supervisor and the other
        // workers, so it cancels before propagating.
        let has_work = match repository.next_tile(shared, &mut work, &mut worker_film) {
            Ok(b) => b,
            Err(e) => {
                cancel.cancel();
                return Err(e);
            }
        };
        if !has_work {
            if repository.is_done() {
                break;
            }
            // Other workers still hold the remaining passes.
            std::thread::sleep(Duration::from_millis(1));
            continue;
        }

        let claimed = match &work {
            Some(w) => w,
            None => break,
        };

        worker_film.reset();
        if let Err(e) = renderer.render_tile(claimed, &mut worker_film, cancel) {
            cancel.cancel();
            if let Some(abandoned) = work.take() {
                repository.abandon(abandoned);
            }
            return Err(e);
        }
        passes += 1;

        if cancel.is_cancelled() {
            // The pass may be partial; drop it rather than merge it.
            if let Some(abandoned) = work.take() {
                repository.abandon(abandoned);
            }
            break;
        }
    }

    debug!(worker_id, passes, "worker finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::color::Rgb;

    fn flat_renderer(
        value: f32,
    ) -> impl Fn(&TileWork, &mut Film, &CancelToken) -> TilelightResult<()> + Sync {
        move |work: &TileWork, film: &mut Film, _cancel: &CancelToken| {
            let region = work.region();
            for y in 0..region.height {
                for x in 0..region.width {
                    film.add_pixel_sample(x, y, Rgb::splat(value), 1.0);
                }
            }
            Ok(())
        }
    }

    fn session_opts() -> RenderSessionOpts {
        RenderSessionOpts {
            threads: Some(2),
            poll_interval: Duration::from_millis(5),
            ..Default::default()
        }
    }

    #[test]
    fn zero_threads_is_rejected() {
        let err = RenderSession::new(
            PixelRegion::new(0, 0, 32, 32).unwrap(),
            [ChannelKind::RadiancePerPixelNormalized],
            SchedulerConfig::default(),
            RenderSessionOpts {
                threads: Some(0),
                ..Default::default()
            },
        );
        assert!(err.is_err());
    }

    #[test]
    fn flat_image_converges_and_fills_the_film() {
        let session = RenderSession::new(
            PixelRegion::new(0, 0, 64, 48).unwrap(),
            [
                ChannelKind::RadiancePerPixelNormalized,
                ChannelKind::Display,
            ],
            SchedulerConfig {
                warmup_samples: 1,
                ..Default::default()
            },
            session_opts(),
        )
        .unwrap();

        let (film, stats) = session.run(&flat_renderer(0.25)).unwrap();
        assert!(!stats.halted);
        assert_eq!(stats.converged_tiles, stats.total_tiles);
        assert!(stats.samples_per_pixel >= 2.0);
        for y in 0..48 {
            for x in 0..64 {
                let v = film.normalized_radiance(x, y);
                assert!((v.r - 0.25).abs() < 1e-5, "pixel ({x}, {y}) off: {}", v.r);
            }
        }
    }

    #[test]
    fn sample_budget_halts_an_unconverging_render() {
        let session = RenderSession::new(
            PixelRegion::new(0, 0, 32, 32).unwrap(),
            [
                ChannelKind::RadiancePerPixelNormalized,
                ChannelKind::Display,
            ],
            SchedulerConfig {
                convergence_threshold: 0.0,
                warmup_samples: 1,
                ..Default::default()
            },
            RenderSessionOpts {
                halt: HaltConfig {
                    samples_per_pixel: Some(4.0),
                    ..Default::default()
                },
                ..session_opts()
            },
        )
        .unwrap();

        let (film, stats) = session.run(&flat_renderer(1.0)).unwrap();
        assert!(stats.halted);
        assert!(film.samples_per_pixel() >= 4.0);
    }

    #[test]
    fn cancellation_stops_workers() {
        let session = RenderSession::new(
            PixelRegion::new(0, 0, 64, 64).unwrap(),
            [
                ChannelKind::RadiancePerPixelNormalized,
                ChannelKind::Display,
            ],
            SchedulerConfig {
                convergence_threshold: 0.0,
                ..Default::default()
            },
            session_opts(),
        )
        .unwrap();

        let token = session.cancel_token();
        let renderer = move |work: &TileWork, film: &mut Film, _cancel: &CancelToken| {
            let region = work.region();
            for y in 0..region.height {
                for x in 0..region.width {
                    film.add_pixel_sample(x, y, Rgb::splat(0.5), 1.0);
                }
            }
            token.cancel();
            Ok(())
        };

        let (_, stats) = session.run(&renderer).unwrap();
        assert!(stats.halted);
    }

    #[test]
    fn global_convergence_halts_tiles_that_never_settle() {
        // Tiles cannot converge on their own (per-tile threshold 0), so the
        // run only ends when the image-level test fires while the workers
        // are still claiming and finalizing passes.
        let session = RenderSession::new(
            PixelRegion::new(0, 0, 64, 64).unwrap(),
            [
                ChannelKind::RadiancePerPixelNormalized,
                ChannelKind::Display,
            ],
            SchedulerConfig {
                convergence_threshold: 0.0,
                warmup_samples: 1,
                ..Default::default()
            },
            RenderSessionOpts {
                threads: Some(4),
                poll_interval: Duration::from_millis(1),
                halt: HaltConfig {
                    use_convergence_test: true,
                    // Backstop so a regression fails instead of hanging.
                    wall_clock: Some(Duration::from_secs(60)),
                    ..Default::default()
                },
                convergence: ConvergenceConfig {
                    threshold: 6.0 / 256.0,
                    warmup_samples: 1,
                    test_step: 1,
                    use_filter: false,
                },
                ..Default::default()
            },
        )
        .unwrap();

        let (_, stats) = session.run(&flat_renderer(0.5)).unwrap();
        assert!(!stats.halted, "ended through the wall-clock backstop");
        assert_eq!(stats.converged_tiles, 0);
    }

    #[test]
    fn single_pass_session_touches_every_pixel_once() {
        let session = RenderSession::new(
            PixelRegion::new(0, 0, 48, 40).unwrap(),
            [ChannelKind::RadiancePerPixelNormalized],
            SchedulerConfig {
                multipass: false,
                ..Default::default()
            },
            session_opts(),
        )
        .unwrap();

        let (film, stats) = session.run(&flat_renderer(1.0)).unwrap();
        assert!(!stats.halted);
        assert_eq!(film.total_sample_count(), 48.0 * 40.0);
    }
}
