use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use tracing::{info, warn};

use crate::config::SchedulerConfig;
use crate::film::model::Film;
use crate::film::variance::VarianceClamping;
use crate::foundation::error::{TilelightError, TilelightResult};
use crate::foundation::geom::PixelRegion;
use crate::scheduler::hilbert;
use crate::scheduler::tile::{PassContext, Tile, TileId, TileWork};

/// The shared accumulation buffer behind its own lock.
///
/// The repository acquires this lock only while already holding its internal
/// lock, and only for the duration of a tile merge; keeping the mutex in a
/// dedicated wrapper makes that the only way in.
pub struct SharedFilm {
    inner: Mutex<Film>,
}

impl SharedFilm {
    /// Wraps a film for shared access.
    pub fn new(film: Film) -> Self {
        Self {
            inner: Mutex::new(film),
        }
    }

    /// Locks the film, tolerating a poisoned lock.
    pub fn lock(&self) -> MutexGuard<'_, Film> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Unwraps the film once no other reference exists.
    pub fn into_inner(self) -> Film {
        self.inner.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

/// Read-only view of one tile's bookkeeping, for progress reporting and
/// tests.
#[derive(Clone, Copy, Debug)]
pub struct TileSnapshot {
    /// The image region this tile covers.
    pub region: PixelRegion,
    /// Finished passes in the current generation.
    pub pass: u32,
    /// Outstanding claims.
    pub pending_passes: u32,
    /// Last convergence error, infinite before the first check.
    pub error: f32,
    /// True once the tile converged or hit its pass limit.
    pub done: bool,
}

/// Aggregate scheduling counters.
#[derive(Clone, Copy, Debug)]
pub struct RepositoryStats {
    /// Current multipass threshold generation.
    pub generation: u32,
    /// Convergence threshold in effect.
    pub threshold: f32,
    /// Unclaimed tiles.
    pub todo_tiles: usize,
    /// Outstanding claims.
    pub pending_claims: usize,
    /// Tiles that passed their convergence check.
    pub converged_tiles: usize,
    /// True once rendering finished.
    pub done: bool,
    /// Time since the repository was built.
    pub elapsed: Duration,
}

struct RepoState {
    tiles: Vec<Tile>,
    /// Not-yet-claimed tiles; priority order is computed, not positional.
    todo: Vec<TileId>,
    /// One entry per outstanding claim (a tile can appear several times).
    pending: Vec<TileId>,
    converged: Vec<TileId>,
    threshold: f32,
    generation: u32,
    done: bool,
    globally_converged: bool,
    film_total_y: f32,
    start_time: Instant,
}

/// Owns all tiles, their traversal order and the three scheduling queues;
/// every mutation goes through one synchronized operation, [`Self::next_tile`].
pub struct TileRepository {
    config: SchedulerConfig,
    region: PixelRegion,
    clamping: VarianceClamping,
    state: Mutex<RepoState>,
}

impl TileRepository {
    /// Decomposes `region` into a Hilbert-ordered tile grid and builds every
    /// tile (in parallel; tiles are independent).
    pub fn new(region: PixelRegion, config: SchedulerConfig) -> TilelightResult<Self> {
        let config = config.validated()?;
        if region.area() == 0 {
            return Err(TilelightError::config("image region has zero area"));
        }

        let started = Instant::now();
        let regions = hilbert::tile_regions(region, config.tile_width, config.tile_height);
        let mut tiles = regions
            .par_iter()
            .enumerate()
            .map(|(curve_pos, r)| Tile::new(*r, curve_pos as u32, &config))
            .collect::<TilelightResult<Vec<_>>>()?;

        let todo: Vec<TileId> = (0..tiles.len()).map(TileId).collect();
        for tile in &mut tiles {
            tile.in_todo = true;
        }

        info!(
            tiles = tiles.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "tile grid initialized"
        );

        Ok(Self {
            region,
            clamping: VarianceClamping::new(config.variance_clamp_max_value),
            config,
            state: Mutex::new(RepoState {
                tiles,
                todo,
                pending: Vec::new(),
                converged: Vec::new(),
                threshold: config.convergence_threshold,
                generation: 0,
                done: false,
                globally_converged: false,
                film_total_y: 0.0,
                start_time: Instant::now(),
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, RepoState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    //--------------------------------------------------------------------------
    // Scheduling protocol
    //--------------------------------------------------------------------------

    /// Finalizes the caller's outstanding claim (if any) and hands out the
    /// next one.
    ///
    /// Returns `Ok(true)` and stores a fresh [`TileWork`] in `work` when
    /// there is something to render. Returns `Ok(false)` when the caller
    /// should either stop ([`Self::is_done`] is true) or retry later (some
    /// other worker still holds in-flight passes).
    pub fn next_tile(
        &self,
        shared: &SharedFilm,
        work: &mut Option<TileWork>,
        worker_film: &mut Film,
    ) -> TilelightResult<bool> {
        let mut s = self.state();

        // 1. Finalize the returned claim.
        if let Some(finished) = work.take() {
            self.finalize(&mut s, shared, finished, worker_film)?;
        }

        // 2. Global halt: the owning engine declared the image converged.
        if s.globally_converged {
            if s.pending.is_empty() {
                self.mark_done(&mut s);
            }
            return Ok(false);
        }

        // 3. Local exhaustion / multipass continuation.
        if s.todo.is_empty() {
            if !self.config.multipass {
                if s.pending.is_empty() {
                    self.mark_done(&mut s);
                }
                return Ok(false);
            }

            let pending_all_done = s.pending.iter().all(|id| s.tiles[id.0].done);
            if pending_all_done {
                if self.config.threshold_reduction > 0.0 {
                    info!(
                        threshold256 = 256.0 * s.threshold,
                        generation = s.generation,
                        elapsed_secs = s.start_time.elapsed().as_secs_f64(),
                        "threshold generation complete, reducing and restarting"
                    );
                    s.threshold *= self.config.threshold_reduction;
                    Self::restart(&mut s);
                } else {
                    if s.pending.is_empty() {
                        self.mark_done(&mut s);
                    }
                    return Ok(false);
                }
            }
            // Some claimed tiles are still unfinished: fall through and
            // double up on the least-advanced one.
        }

        // 4. Claim selection: spread passes evenly across tiles.
        Ok(self.claim(&mut s, work))
    }

    fn finalize(
        &self,
        s: &mut RepoState,
        shared: &SharedFilm,
        finished: TileWork,
        worker_film: &mut Film,
    ) -> TilelightResult<()> {
        let RepoState {
            tiles,
            todo,
            pending,
            converged,
            threshold,
            film_total_y,
            ..
        } = s;
        let tile = &mut tiles[finished.tile.0];

        if self.clamping.is_enabled() {
            if let Some(reference) = tile.all_pass_film() {
                self.clamping.clamp_film(reference, worker_film)?;
            }
        }

        tile.add_pass(
            worker_film,
            finished.pass_index,
            PassContext {
                multipass: self.config.multipass,
                threshold: *threshold,
                warmup_samples: self.config.warmup_samples,
                max_pass_count: self.config.max_pass_count,
                film_total_y,
                region_pixel_count: self.region.area() as f32,
            },
        )?;
        tile.pending_passes = tile.pending_passes.saturating_sub(1);

        // One outstanding reference per claim.
        if let Some(pos) = pending.iter().position(|id| *id == finished.tile) {
            pending.swap_remove(pos);
        }

        if tile.done {
            // Idempotent: a concurrent claim may have moved it already.
            if !converged.contains(&finished.tile) {
                converged.push(finished.tile);
            }
        } else if !tile.in_todo {
            todo.push(finished.tile);
            tile.in_todo = true;
        }

        // Merge into the shared image. The film lock nests strictly inside
        // the repository lock and is held only for this O(tile) copy.
        // Film coordinates are relative to the scheduled sub-region.
        let region = tile.region;
        let mut film = shared.lock();
        film.add_film(
            worker_film,
            0,
            0,
            region.width,
            region.height,
            region.x - self.region.x,
            region.y - self.region.y,
        )
    }

    fn claim(&self, s: &mut RepoState, work: &mut Option<TileWork>) -> bool {
        let tiles = &s.tiles;
        let priority = |id: TileId| (tiles[id.0].progress(), tiles[id.0].curve_pos);

        let best_todo = s.todo.iter().min_by_key(|id| priority(**id)).copied();
        let best_pending = s
            .pending
            .iter()
            .filter(|id| !tiles[id.0].done)
            .min_by_key(|id| priority(**id))
            .copied();

        // Fewest scheduled passes wins; the not-yet-claimed tile on a tie.
        let (id, from_todo) = match (best_todo, best_pending) {
            (Some(t), Some(p)) => {
                if tiles[p.0].progress() < tiles[t.0].progress() {
                    (p, false)
                } else {
                    (t, true)
                }
            }
            (Some(t), None) => (t, true),
            (None, Some(p)) => (p, false),
            (None, None) => {
                warn!("out of tiles to render");
                return false;
            }
        };

        if from_todo {
            if let Some(pos) = s.todo.iter().position(|x| *x == id) {
                s.todo.swap_remove(pos);
            }
            s.tiles[id.0].in_todo = false;
        }

        let generation = s.generation;
        let tile = &mut s.tiles[id.0];
        tile.pending_passes += 1;
        let pass_index = tile.pass + tile.pending_passes;
        s.pending.push(id);

        *work = Some(TileWork {
            tile: id,
            region: s.tiles[id.0].region,
            generation,
            pass_index,
        });
        true
    }

    /// Begins a new generation: every tile restarts, the todo queue refills
    /// in curve order, and outstanding claims are preserved so in-flight
    /// workers are not orphaned.
    fn restart(s: &mut RepoState) {
        s.generation += 1;
        s.film_total_y = 0.0;
        s.converged.clear();
        s.todo.clear();
        for (idx, tile) in s.tiles.iter_mut().enumerate() {
            tile.restart();
            tile.in_todo = true;
            s.todo.push(TileId(idx));
        }
        s.done = false;
    }

    fn mark_done(&self, s: &mut RepoState) {
        if !s.done {
            info!(
                elapsed_secs = s.start_time.elapsed().as_secs_f64(),
                generation = s.generation,
                "rendering done"
            );
            s.done = true;
        }
    }

    /// Drops an in-flight claim without merging its samples. Used when a
    /// cancelled worker abandons work at teardown.
    pub fn abandon(&self, work: TileWork) {
        let mut s = self.state();
        let tile = &mut s.tiles[work.tile.0];
        tile.pending_passes = tile.pending_passes.saturating_sub(1);
        let back_to_todo = !tile.done && !tile.in_todo;
        if back_to_todo {
            tile.in_todo = true;
        }
        if let Some(pos) = s.pending.iter().position(|id| *id == work.tile) {
            s.pending.swap_remove(pos);
        }
        if back_to_todo {
            s.todo.push(work.tile);
        }
    }

    //--------------------------------------------------------------------------
    // Observability
    //--------------------------------------------------------------------------

    /// Sets (or clears) the engine's global convergence verdict; once set
    /// with no claims outstanding, the repository reports done.
    pub fn set_global_convergence(&self, converged: bool) {
        self.state().globally_converged = converged;
    }

    /// True once every tile is finished and no claim is outstanding.
    pub fn is_done(&self) -> bool {
        self.state().done
    }

    /// The current multipass threshold generation.
    pub fn generation(&self) -> u32 {
        self.state().generation
    }

    /// The convergence threshold of the current generation.
    pub fn threshold(&self) -> f32 {
        self.state().threshold
    }

    /// Number of tiles in the grid.
    pub fn tile_count(&self) -> usize {
        self.state().tiles.len()
    }

    /// The scheduled image sub-region.
    pub fn region(&self) -> PixelRegion {
        self.region
    }

    /// The validated tile dimensions.
    pub fn tile_size(&self) -> (u32, u32) {
        (self.config.tile_width, self.config.tile_height)
    }

    /// A point-in-time view of one tile's bookkeeping.
    pub fn tile_snapshot(&self, id: TileId) -> Option<TileSnapshot> {
        let s = self.state();
        s.tiles.get(id.0).map(|tile| TileSnapshot {
            region: tile.region,
            pass: tile.pass,
            pending_passes: tile.pending_passes,
            error: tile.error(),
            done: tile.done,
        })
    }

    /// Point-in-time views of every tile, in curve order.
    pub fn snapshots(&self) -> Vec<TileSnapshot> {
        let s = self.state();
        s.tiles
            .iter()
            .map(|tile| TileSnapshot {
                region: tile.region,
                pass: tile.pass,
                pending_passes: tile.pending_passes,
                error: tile.error(),
                done: tile.done,
            })
            .collect()
    }

    /// Aggregate scheduling counters at this instant.
    pub fn stats(&self) -> RepositoryStats {
        let s = self.state();
        RepositoryStats {
            generation: s.generation,
            threshold: s.threshold,
            todo_tiles: s.todo.len(),
            pending_claims: s.pending.len(),
            converged_tiles: s.converged.len(),
            done: s.done,
            elapsed: s.start_time.elapsed(),
        }
    }
}
