use tracing::{debug, info};

use crate::config::ConvergenceConfig;
use crate::film::buffer::PlaneBuffer;
use crate::film::model::Film;
use crate::film::stats;
use crate::foundation::error::{TilelightError, TilelightResult};

/// Whole-image fixed-threshold convergence test.
///
/// Compares the current post-processed image against the snapshot taken at
/// the previous test and counts the pixels whose error still exceeds the
/// threshold. A threshold of zero disables early termination but keeps the
/// test running as a diagnostic.
#[derive(Clone, Debug)]
pub struct ConvergenceTest {
    threshold: f32,
    warmup: u32,
    test_step: u32,
    use_filter: bool,

    width: u32,
    height: u32,
    reference: PlaneBuffer<3>,
    todo_pixels: u32,
    max_error: f32,
    last_sample_count: f64,
    first_test: bool,
}

impl ConvergenceTest {
    /// Builds a test bound to one image shape.
    pub fn new(width: u32, height: u32, config: &ConvergenceConfig) -> TilelightResult<Self> {
        if width == 0 || height == 0 {
            return Err(TilelightError::config(
                "convergence test requires a non-zero image area",
            ));
        }
        Ok(Self {
            threshold: config.threshold.max(0.0),
            warmup: config.warmup_samples,
            test_step: config.test_step,
            use_filter: config.use_filter,
            width,
            height,
            reference: PlaneBuffer::new(width, height),
            todo_pixels: width * height,
            max_error: f32::INFINITY,
            last_sample_count: 0.0,
            first_test: true,
        })
    }

    /// Discards the snapshot and all accumulated verdicts.
    pub fn reset(&mut self) {
        self.reference.clear();
        self.todo_pixels = self.width * self.height;
        self.max_error = f32::INFINITY;
        self.last_sample_count = 0.0;
        self.first_test = true;
    }

    /// Pixels still above the threshold at the last test.
    pub fn remaining(&self) -> u32 {
        self.todo_pixels
    }

    /// Largest per-pixel error seen at the last test.
    pub fn max_error(&self) -> f32 {
        self.max_error
    }

    /// True once a test has run and found every pixel under a positive
    /// threshold.
    pub fn has_converged(&self) -> bool {
        self.threshold > 0.0 && !self.first_test && self.todo_pixels == 0
    }

    /// Runs one test step over the film's `Display` channel (the caller is
    /// expected to have executed the image pipeline first).
    ///
    /// Returns the number of pixels with work remaining. Until warm-up is
    /// reached, or before `test_step` new samples per pixel have arrived,
    /// the previous count is returned unchanged.
    pub fn test(&mut self, film: &mut Film) -> TilelightResult<u32> {
        if film.width() != self.width || film.height() != self.height {
            return Err(TilelightError::film(format!(
                "convergence test bound to {}x{}, got film {}x{}",
                self.width,
                self.height,
                film.width(),
                film.height()
            )));
        }

        let pixel_count = self.width * self.height;

        // Initial warm-up: statistics are not trusted yet.
        if film.samples_per_pixel() <= f64::from(self.warmup) {
            return Ok(self.todo_pixels);
        }

        // Require at least test_step new samples per pixel since last run.
        let sample_count = film.total_sample_count();
        if sample_count - self.last_sample_count
            <= f64::from(pixel_count) * f64::from(self.test_step)
        {
            return Ok(self.todo_pixels);
        }
        self.last_sample_count = sample_count;

        let display = film
            .display()
            .ok_or_else(|| TilelightError::film("convergence test requires a Display channel"))?;

        if self.first_test {
            self.reference.copy_from(display)?;
            self.first_test = false;
            debug!("convergence test first pass");
            return Ok(self.todo_pixels);
        }

        // Per-pixel error against the previous snapshot.
        let mut error_map = vec![0.0f32; pixel_count as usize];
        let mut todo = 0u32;
        let mut max_error = 0.0f32;
        for (idx, err) in error_map.iter_mut().enumerate() {
            let [rr, rg, rb] = self.reference.at(idx);
            let [ir, ig, ib] = display.at(idx);

            let delta = (ir - rr).abs() + (ig - rg).abs() + (ib - rb).abs();
            let mut diff = delta / (ir + ig + ib).sqrt();
            if !diff.is_finite() {
                // Unsampled or broken pixels count as maximally unconverged.
                diff = 1.0;
            }

            *err = diff;
            max_error = max_error.max(diff);
            if diff > self.threshold {
                todo += 1;
            }
        }
        self.todo_pixels = todo;
        self.max_error = max_error;

        // Snapshot for the next comparison; taken before the error map is
        // smoothed, which only feeds the visualization channel.
        self.reference.copy_from(display)?;

        if film.has_channel(crate::ChannelKind::Convergence) {
            let mut smoothed = stats::window_average(&error_map, self.width, self.height, 4);
            let (min, max) = stats::standardize(&mut smoothed, 3.0);
            stats::normalize_unit(&mut smoothed, min, max);
            if self.use_filter {
                stats::gaussian_blur_3x3(&mut smoothed, self.width, self.height);
            }
            if let Some(channel) = film.convergence_mut() {
                for (idx, v) in smoothed.into_iter().enumerate() {
                    *channel.at_mut(idx) = [if v.is_finite() { v } else { 1.0 }];
                }
            }
        }

        debug!(
            todo_pixels = todo,
            max_error,
            threshold256 = 256.0 * self.max_error,
            "convergence test step"
        );
        if self.threshold > 0.0 && todo == 0 {
            info!("convergence 100%, rendering done");
        }

        // With a zero threshold the test stays diagnostic: every pixel is
        // reported as remaining.
        Ok(if self.threshold == 0.0 {
            pixel_count
        } else {
            todo
        })
    }
}
