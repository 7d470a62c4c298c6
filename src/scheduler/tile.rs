use crate::config::SchedulerConfig;
use crate::film::channel::ChannelKind;
use crate::film::model::Film;
use crate::film::pipeline::{ImagePipeline, auto_linear_scale};
use crate::foundation::color::Rgb;
use crate::foundation::error::TilelightResult;
use crate::foundation::geom::PixelRegion;

/// Stable handle to a tile in the repository's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileId(pub(crate) usize);

impl TileId {
    /// Position of the tile in the repository's arena.
    pub fn index(self) -> usize {
        self.0
    }
}

/// A claim ticket binding one worker to one tile for one pass.
#[derive(Clone, Debug)]
pub struct TileWork {
    pub(crate) tile: TileId,
    pub(crate) region: PixelRegion,
    pub(crate) generation: u32,
    pub(crate) pass_index: u32,
}

impl TileWork {
    /// The claimed tile.
    pub fn tile(&self) -> TileId {
        self.tile
    }

    /// The image region the worker must render samples for.
    pub fn region(&self) -> PixelRegion {
        self.region
    }

    /// The multipass threshold generation in effect when this work was
    /// claimed. A mismatch with the repository's current generation means a
    /// `Restart` happened while this pass was in flight.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// 1-based index of the pass being rendered.
    pub fn pass_index(&self) -> u32 {
        self.pass_index
    }
}

/// Per-pass bookkeeping shared between the repository and a tile.
pub(crate) struct PassContext<'a> {
    pub multipass: bool,
    pub threshold: f32,
    pub warmup_samples: u32,
    pub max_pass_count: u32,
    /// Running mean-luminance numerator across all tiles.
    pub film_total_y: &'a mut f32,
    /// Pixel count of the whole scheduled sub-region.
    pub region_pixel_count: f32,
}

/// One rectangular sub-region of the image, scheduled and converged
/// independently. Mutated only under the repository lock.
pub(crate) struct Tile {
    pub(crate) region: PixelRegion,
    pub(crate) curve_pos: u32,
    pub(crate) pass: u32,
    pub(crate) pending_passes: u32,
    pub(crate) error: f32,
    pub(crate) done: bool,
    pub(crate) in_todo: bool,
    warm_up_satisfied: bool,
    /// This tile's contribution to the repository's running luminance sum.
    luminance_contribution: f32,
    all_pass: Option<Film>,
    half_pass: Option<Film>,
}

impl Tile {
    pub(crate) fn new(
        region: PixelRegion,
        curve_pos: u32,
        config: &SchedulerConfig,
    ) -> TilelightResult<Self> {
        let convergence_test = config.multipass && config.convergence_threshold > 0.0;
        let variance_clamping = config.variance_clamp_max_value > 0.0;

        let snapshot = || {
            Film::with_channels(
                region.width,
                region.height,
                [
                    ChannelKind::RadiancePerPixelNormalized,
                    ChannelKind::Display,
                ],
            )
        };

        Ok(Self {
            region,
            curve_pos,
            pass: 0,
            pending_passes: 0,
            error: f32::INFINITY,
            done: false,
            in_todo: false,
            warm_up_satisfied: false,
            luminance_contribution: 0.0,
            all_pass: if convergence_test || variance_clamping {
                Some(snapshot()?)
            } else {
                None
            },
            half_pass: if convergence_test {
                Some(snapshot()?)
            } else {
                None
            },
        })
    }

    pub(crate) fn progress(&self) -> u32 {
        self.pass + self.pending_passes
    }

    /// The expected-value snapshot used by variance clamping, when allocated.
    pub(crate) fn all_pass_film(&self) -> Option<&Film> {
        self.all_pass.as_ref()
    }

    pub(crate) fn error(&self) -> f32 {
        self.error
    }

    /// Clears every per-generation statistic; outstanding claims
    /// (`pending_passes`) survive so in-flight workers are not orphaned.
    pub(crate) fn restart(&mut self) {
        if let Some(film) = &mut self.all_pass {
            film.reset();
        }
        if let Some(film) = &mut self.half_pass {
            film.reset();
        }
        self.pass = 0;
        self.error = f32::INFINITY;
        self.done = false;
        self.warm_up_satisfied = false;
        self.luminance_contribution = 0.0;
    }

    /// Folds one finished pass into the tile's statistics and re-evaluates
    /// its terminal verdict.
    ///
    /// `pass_film` is the worker's private buffer; its top-left
    /// `region.width` x `region.height` part belongs to this tile.
    pub(crate) fn add_pass(
        &mut self,
        pass_film: &Film,
        pass_index: u32,
        ctx: PassContext<'_>,
    ) -> TilelightResult<()> {
        self.pass += 1;

        if !ctx.multipass {
            // Single-pass mode: one pass is all a tile gets.
            self.done = true;
            return Ok(());
        }

        let (w, h) = (self.region.width, self.region.height);
        if let Some(all) = &mut self.all_pass {
            all.add_film(pass_film, 0, 0, w, h, 0, 0)?;
        }

        if self.half_pass.is_some() {
            if !self.warm_up_satisfied {
                self.update_warmup_stats(ctx.warmup_samples, ctx.film_total_y);
            }

            if pass_index % 2 == 1 {
                // Odd passes feed the half-sample snapshot.
                if let Some(half) = &mut self.half_pass {
                    half.add_film(pass_film, 0, 0, w, h, 0, 0)?;
                }
            } else if self.warm_up_satisfied {
                // Even passes re-expose and compare both snapshots.
                let avg_luminance = *ctx.film_total_y / ctx.region_pixel_count;
                let scale = auto_linear_scale(avg_luminance, 1.0);
                self.check_convergence(scale, ctx.threshold)?;
            }
        }

        if ctx.max_pass_count > 0 && self.pass >= ctx.max_pass_count {
            self.done = true;
        }
        Ok(())
    }

    /// Recomputes this tile's mean-luminance contribution and whether every
    /// pixel has reached the warm-up sample count.
    fn update_warmup_stats(&mut self, warmup_samples: u32, film_total_y: &mut f32) {
        let Some(buf) = self.all_pass.as_ref().and_then(|f| f.pixel_normalized()) else {
            return;
        };

        let mut total_y = 0.0f32;
        let mut satisfied = true;
        for y in 0..self.region.height {
            for x in 0..self.region.width {
                let [r, g, b, weight] = buf.get(x, y);
                if weight > 0.0 {
                    if weight < warmup_samples as f32 {
                        satisfied = false;
                    }
                    let inv = 1.0 / weight;
                    let lum = Rgb::new(r * inv, g * inv, b * inv).luminance();
                    // Non-finite and non-positive values are excluded from
                    // the statistic but stay in the buffer.
                    if lum > 0.0 && lum.is_finite() {
                        total_y += lum;
                    }
                } else {
                    satisfied = false;
                }
            }
        }

        *film_total_y += total_y - self.luminance_contribution;
        self.luminance_contribution = total_y;
        self.warm_up_satisfied = satisfied;
    }

    /// Exposes both snapshots with the shared scale and compares them; the
    /// per-pixel max channel difference of the two display images estimates
    /// the standard error of the full accumulator.
    fn check_convergence(&mut self, scale: f32, threshold: f32) -> TilelightResult<()> {
        let pipeline = ImagePipeline::new(scale, 2.2);
        let (Some(all), Some(half)) = (&mut self.all_pass, &mut self.half_pass) else {
            return Ok(());
        };
        pipeline.execute(all)?;
        pipeline.execute(half)?;

        let mut max_diff = 0.0f32;
        let (all_display, half_display) = match (all.display(), half.display()) {
            (Some(a), Some(h)) => (a, h),
            _ => return Ok(()),
        };
        for idx in 0..all_display.pixel_count() {
            let a = all_display.at(idx);
            let h = half_display.at(idx);
            for k in 0..3 {
                max_diff = max_diff.max((a[k].clamp(0.0, 1.0) - h[k].clamp(0.0, 1.0)).abs());
            }
        }

        self.error = max_diff;
        self.done = max_diff < threshold;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(w: u32, h: u32) -> PixelRegion {
        PixelRegion::new(0, 0, w, h).unwrap()
    }

    fn pass_film(w: u32, h: u32, value: f32, weight: f32) -> Film {
        let mut film = Film::with_channels(
            w,
            h,
            [
                ChannelKind::RadiancePerPixelNormalized,
                ChannelKind::Display,
            ],
        )
        .unwrap();
        for y in 0..h {
            for x in 0..w {
                film.add_pixel_sample(x, y, Rgb::splat(value) * weight, weight);
            }
        }
        film
    }

    fn multipass_config() -> SchedulerConfig {
        SchedulerConfig {
            multipass: true,
            warmup_samples: 1,
            ..Default::default()
        }
    }

    #[test]
    fn single_pass_mode_is_done_after_one_pass() {
        let cfg = SchedulerConfig {
            multipass: false,
            ..Default::default()
        };
        let mut tile = Tile::new(region(8, 8), 0, &cfg).unwrap();
        assert!(tile.all_pass_film().is_none());

        let film = pass_film(8, 8, 0.5, 1.0);
        let mut total_y = 0.0;
        tile.add_pass(
            &film,
            1,
            PassContext {
                multipass: false,
                threshold: cfg.convergence_threshold,
                warmup_samples: cfg.warmup_samples,
                max_pass_count: 0,
                film_total_y: &mut total_y,
                region_pixel_count: 64.0,
            },
        )
        .unwrap();
        assert_eq!(tile.pass, 1);
        assert!(tile.done);
    }

    #[test]
    fn identical_passes_converge_on_the_even_check() {
        let cfg = multipass_config();
        let mut tile = Tile::new(region(8, 8), 0, &cfg).unwrap();
        let film = pass_film(8, 8, 0.5, 1.0);
        let mut total_y = 0.0;

        for pass_index in 1..=2 {
            tile.add_pass(
                &film,
                pass_index,
                PassContext {
                    multipass: true,
                    threshold: cfg.convergence_threshold,
                    warmup_samples: cfg.warmup_samples,
                    max_pass_count: 0,
                    film_total_y: &mut total_y,
                    region_pixel_count: 64.0,
                },
            )
            .unwrap();
        }

        // Pass 1 went to both snapshots, pass 2 only to the full one; the
        // normalized estimates are identical, so the diff is zero.
        assert_eq!(tile.pass, 2);
        assert!(tile.done);
        assert_eq!(tile.error(), 0.0);
    }

    #[test]
    fn zero_threshold_never_converges() {
        let cfg = SchedulerConfig {
            convergence_threshold: 0.0,
            variance_clamp_max_value: 1.0,
            ..multipass_config()
        };
        let mut tile = Tile::new(region(8, 8), 0, &cfg).unwrap();
        // Variance clamping still wants the full-accumulation snapshot.
        assert!(tile.all_pass_film().is_some());

        let film = pass_film(8, 8, 0.5, 1.0);
        let mut total_y = 0.0;
        for pass_index in 1..=4 {
            tile.add_pass(
                &film,
                pass_index,
                PassContext {
                    multipass: true,
                    threshold: 0.0,
                    warmup_samples: 1,
                    max_pass_count: 0,
                    film_total_y: &mut total_y,
                    region_pixel_count: 64.0,
                },
            )
            .unwrap();
        }
        assert_eq!(tile.pass, 4);
        assert!(!tile.done);
        assert!(tile.error().is_infinite());
    }

    #[test]
    fn max_pass_count_is_a_hard_stop() {
        let cfg = SchedulerConfig {
            convergence_threshold: 0.0,
            max_pass_count: 3,
            ..multipass_config()
        };
        let mut tile = Tile::new(region(8, 8), 0, &cfg).unwrap();
        let film = pass_film(8, 8, 0.5, 1.0);
        let mut total_y = 0.0;
        for pass_index in 1..=3 {
            assert!(!tile.done);
            tile.add_pass(
                &film,
                pass_index,
                PassContext {
                    multipass: true,
                    threshold: 0.0,
                    warmup_samples: 1,
                    max_pass_count: 3,
                    film_total_y: &mut total_y,
                    region_pixel_count: 64.0,
                },
            )
            .unwrap();
        }
        assert!(tile.done);
    }

    #[test]
    fn restart_clears_the_verdict_but_not_claims() {
        let cfg = multipass_config();
        let mut tile = Tile::new(region(8, 8), 0, &cfg).unwrap();
        tile.pending_passes = 2;
        tile.pass = 5;
        tile.done = true;
        tile.error = 0.001;

        tile.restart();
        assert_eq!(tile.pass, 0);
        assert!(!tile.done);
        assert!(tile.error().is_infinite());
        assert_eq!(tile.pending_passes, 2);
    }
}
