//! Tilelight is a tile-based progressive render scheduler.
//!
//! The crate splits an image into a grid of tiles ordered along a Hilbert
//! curve, hands tiles out to worker threads one sampling pass at a time, and
//! accumulates results into a shared film until every tile passes its
//! convergence test or a halt condition fires.
//!
//! # Pipeline overview
//!
//! 1. **Claim**: workers call [`TileRepository::next_tile`], which finalizes
//!    their previous pass and hands out the least-sampled tile next.
//! 2. **Render**: the worker fills a private [`Film`] with samples for the
//!    claimed region (the sampling itself is supplied via [`SampleRenderer`]).
//! 3. **Merge**: the finished pass is folded into the tile's convergence
//!    statistics and the shared film.
//! 4. **Converge**: tiles compare full- and half-sample estimates after
//!    tonemapping; the whole image can additionally be gated by a
//!    [`ConvergenceTest`] and prioritized with a [`NoiseEstimator`].
//!
//! The key design constraints:
//!
//! - **No unsafe**: `unsafe` is forbidden in this crate.
//! - **One synchronized operation**: all scheduling state changes go through
//!   `next_tile`; the shared film lock nests strictly inside it.
//! - **Estimator duality**: per-pixel and per-screen normalized radiance
//!   channels accumulate independently and are only combined at display time.
#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// Configuration structs and their documented defaults.
pub mod config;
pub mod film;
pub mod foundation;
pub mod scheduler;

pub use config::{
    ConvergenceConfig, DEFAULT_CONVERGENCE_THRESHOLD, HaltConfig, MIN_TILE_SIZE,
    NoiseEstimationConfig, SchedulerConfig,
};
pub use film::buffer::PlaneBuffer;
pub use film::channel::ChannelKind;
pub use film::convergence::ConvergenceTest;
pub use film::model::Film;
pub use film::noise::NoiseEstimator;
pub use film::pipeline::{ImagePipeline, auto_linear_scale};
pub use film::variance::VarianceClamping;
pub use foundation::color::Rgb;
pub use foundation::error::{TilelightError, TilelightResult};
pub use foundation::geom::PixelRegion;
pub use scheduler::repository::{RepositoryStats, SharedFilm, TileRepository, TileSnapshot};
pub use scheduler::session::{
    CancelToken, RenderSession, RenderSessionOpts, SampleRenderer, SessionStats,
};
pub use scheduler::tile::{TileId, TileWork};
