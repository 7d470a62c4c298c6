use std::time::Duration;

use crate::foundation::error::{TilelightError, TilelightResult};

/// Smallest tile edge the scheduler accepts; requested sizes are clamped up.
pub const MIN_TILE_SIZE: u32 = 8;

/// Default convergence threshold, as a fraction of full scale.
pub const DEFAULT_CONVERGENCE_THRESHOLD: f32 = 6.0 / 256.0;

/// Tile scheduling and per-tile convergence settings.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Tile width in pixels. Defaults to 32, minimum 8.
    pub tile_width: u32,
    /// Tile height in pixels. Defaults to 32, minimum 8.
    pub tile_height: u32,
    /// When false, every tile is done after a single pass.
    pub multipass: bool,
    /// Per-tile convergence threshold; 0 disables the per-tile test.
    pub convergence_threshold: f32,
    /// Multiplied into the threshold when a generation completes; 0 disables
    /// further reduction.
    pub threshold_reduction: f32,
    /// Per-pixel sample count required before convergence statistics are
    /// trusted.
    pub warmup_samples: u32,
    /// Hard per-tile pass limit; 0 means unlimited.
    pub max_pass_count: u32,
    /// Firefly clamp deviation; 0 disables variance clamping.
    pub variance_clamp_max_value: f32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tile_width: 32,
            tile_height: 32,
            multipass: true,
            convergence_threshold: DEFAULT_CONVERGENCE_THRESHOLD,
            threshold_reduction: 0.0,
            warmup_samples: 32,
            max_pass_count: 0,
            variance_clamp_max_value: 0.0,
        }
    }
}

impl SchedulerConfig {
    /// Fails fast on degenerate values and clamps tile sizes to the minimum.
    pub fn validated(mut self) -> TilelightResult<Self> {
        if self.tile_width == 0 || self.tile_height == 0 {
            return Err(TilelightError::config(format!(
                "tile size must be non-zero, got {}x{}",
                self.tile_width, self.tile_height
            )));
        }
        if !self.convergence_threshold.is_finite() || self.convergence_threshold < 0.0 {
            return Err(TilelightError::config(format!(
                "convergence threshold must be finite and >= 0, got {}",
                self.convergence_threshold
            )));
        }
        if !self.threshold_reduction.is_finite()
            || self.threshold_reduction < 0.0
            || self.threshold_reduction >= 1.0
        {
            return Err(TilelightError::config(format!(
                "threshold reduction must be in [0, 1), got {}",
                self.threshold_reduction
            )));
        }
        self.tile_width = self.tile_width.max(MIN_TILE_SIZE);
        self.tile_height = self.tile_height.max(MIN_TILE_SIZE);
        Ok(self)
    }
}

/// Settings for the whole-image fixed-threshold convergence test.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ConvergenceConfig {
    /// Per-pixel error below which a pixel counts as converged; 0 keeps the
    /// test diagnostic-only.
    pub threshold: f32,
    /// Mean samples per pixel required before the first test.
    pub warmup_samples: u32,
    /// Minimum new samples per pixel between two test runs.
    pub test_step: u32,
    /// Blur the error map to reduce single-pixel false negatives.
    pub use_filter: bool,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_CONVERGENCE_THRESHOLD,
            warmup_samples: 32,
            test_step: 32,
            use_filter: true,
        }
    }
}

/// Settings for the adaptive noise estimator.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct NoiseEstimationConfig {
    /// Mean samples per pixel required before the first estimation.
    pub warmup_samples: u32,
    /// Minimum new samples per pixel between two estimations.
    pub test_step: u32,
    /// Radius of the local average window; 0 leaves the map unwritten.
    pub filter_scale: u32,
}

impl Default for NoiseEstimationConfig {
    fn default() -> Self {
        Self {
            warmup_samples: 32,
            test_step: 32,
            filter_scale: 4,
        }
    }
}

/// Engine-side global halt conditions, evaluated between tile finalizations.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct HaltConfig {
    /// Wall-clock budget.
    pub wall_clock: Option<Duration>,
    /// Total samples-per-pixel budget.
    pub samples_per_pixel: Option<f64>,
    /// Halt once the convergence test reports every pixel under threshold.
    pub use_convergence_test: bool,
}
