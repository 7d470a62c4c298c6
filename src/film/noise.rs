use tracing::debug;

use crate::config::NoiseEstimationConfig;
use crate::film::buffer::PlaneBuffer;
use crate::film::model::Film;
use crate::film::stats;
use crate::foundation::error::{TilelightError, TilelightResult};

/// Adaptive per-pixel noise estimator.
///
/// Produces a normalized [0, 1] "where to spend more samples" weight map in
/// the film's `Noise` channel, from the same snapshot-comparison technique
/// the convergence test uses. Without a `Noise` channel the estimator is
/// inert.
#[derive(Clone, Debug)]
pub struct NoiseEstimator {
    warmup: u32,
    test_step: u32,
    filter_scale: u32,

    width: u32,
    height: u32,
    reference: PlaneBuffer<3>,
    last_sample_count: f64,
    first_test: bool,
}

impl NoiseEstimator {
    /// Builds an estimator bound to one image shape.
    pub fn new(width: u32, height: u32, config: &NoiseEstimationConfig) -> TilelightResult<Self> {
        if width == 0 || height == 0 {
            return Err(TilelightError::config(
                "noise estimation requires a non-zero image area",
            ));
        }
        Ok(Self {
            warmup: config.warmup_samples,
            test_step: config.test_step,
            filter_scale: config.filter_scale,
            width,
            height,
            reference: PlaneBuffer::new(width, height),
            last_sample_count: 0.0,
            first_test: true,
        })
    }

    /// Discards the snapshot and marks the whole noise map as unknown.
    pub fn reset(&mut self, film: &mut Film) {
        self.reference.clear();
        self.last_sample_count = 0.0;
        self.first_test = true;
        if let Some(channel) = film.noise_mut() {
            channel.fill([f32::INFINITY]);
        }
    }

    /// Whether enough new samples have arrived for an update to be worth it.
    pub fn update_required(&self, film: &Film) -> bool {
        if !film.has_channel(crate::ChannelKind::Noise) {
            return false;
        }
        if film.samples_per_pixel() <= f64::from(self.warmup) {
            return false;
        }
        film.total_sample_count() - self.last_sample_count
            > f64::from(self.width * self.height) * f64::from(self.test_step)
    }

    /// Runs one estimation step over the film's `Display` channel.
    ///
    /// No-op when the `Noise` channel is absent, during warm-up, before
    /// `test_step` new samples per pixel have arrived, or while some pixel
    /// still has fewer than `test_step` samples of its own.
    pub fn test(&mut self, film: &mut Film) -> TilelightResult<()> {
        if film.width() != self.width || film.height() != self.height {
            return Err(TilelightError::film(format!(
                "noise estimator bound to {}x{}, got film {}x{}",
                self.width,
                self.height,
                film.width(),
                film.height()
            )));
        }
        if !self.update_required(film) {
            return Ok(());
        }
        self.last_sample_count = film.total_sample_count();

        let display = film
            .display()
            .ok_or_else(|| TilelightError::film("noise estimation requires a Display channel"))?;

        if self.first_test {
            self.reference.copy_from(display)?;
            self.first_test = false;
            debug!("noise estimation first pass");
            return Ok(());
        }

        // The z-score statistics are only meaningful once every pixel has a
        // baseline of its own samples. Either estimator satisfies the gate;
        // screen-normalized samples carry no per-pixel count, so their
        // image-wide mean stands in for it.
        let has_pixel = film.has_channel(crate::ChannelKind::RadiancePerPixelNormalized);
        let has_screen = film.has_channel(crate::ChannelKind::RadiancePerScreenNormalized);
        if has_pixel || has_screen {
            let threshold = self.test_step as f32;
            let screen_ok = has_screen && film.screen_samples_per_pixel() >= f64::from(threshold);
            if !screen_ok {
                for y in 0..self.height {
                    for x in 0..self.width {
                        if !(has_pixel && film.pixel_sample_weight(x, y) >= threshold) {
                            self.reference.copy_from(display)?;
                            return Ok(());
                        }
                    }
                }
            }
        }

        let pixel_count = (self.width * self.height) as usize;
        let mut error_map = vec![0.0f32; pixel_count];
        for (idx, err) in error_map.iter_mut().enumerate() {
            let [rr, rg, rb] = self.reference.at(idx);
            let [ir, ig, ib] = display.at(idx);

            let delta = (ir - rr).abs() + (ig - rg).abs() + (ib - rb).abs();
            let sum = ir + ig + ib;
            *err = if sum != 0.0 { delta / sum.sqrt() } else { 0.0 };
        }

        if self.filter_scale > 0 {
            let mut smoothed =
                stats::window_average(&error_map, self.width, self.height, self.filter_scale);
            let (min, max) = stats::standardize(&mut smoothed, 6.0);
            stats::normalize_unit(&mut smoothed, min, max);

            if let Some(channel) = film.noise_mut() {
                for (idx, v) in smoothed.into_iter().enumerate() {
                    *channel.at_mut(idx) = [v];
                }
            }
            debug!(filter_scale = self.filter_scale, "noise estimation step");
        }

        self.reference.copy_from(film.display().ok_or_else(|| {
            TilelightError::film("noise estimation requires a Display channel")
        })?)?;
        Ok(())
    }
}
