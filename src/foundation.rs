//! Shared base types: colors, pixel regions, the crate error taxonomy.

/// Linear RGB radiance values.
pub mod color;
/// The crate error enum and result alias.
pub mod error;
/// Rectangular pixel regions.
pub mod geom;
