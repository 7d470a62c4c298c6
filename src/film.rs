//! Sample accumulation film, its channels, and the image-level estimators.

/// Fixed-plane `f32` framebuffers.
pub mod buffer;
/// The closed set of film channel kinds.
pub mod channel;
/// Whole-image fixed-threshold convergence test.
pub mod convergence;
/// The dual-estimator accumulation film.
pub mod model;
/// Adaptive per-pixel noise estimation.
pub mod noise;
/// Tonemapping into the display channel.
pub mod pipeline;
mod stats;
/// Firefly suppression via variance clamping.
pub mod variance;
