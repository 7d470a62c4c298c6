use crate::film::channel::ChannelKind;
use crate::film::model::Film;
use crate::foundation::error::{TilelightError, TilelightResult};

/// The post-process transform applied before display or convergence
/// comparison: a linear exposure scale followed by gamma correction, output
/// clamped to [0, 1].
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ImagePipeline {
    /// Linear exposure multiplier applied before gamma.
    pub scale: f32,
    /// Gamma correction exponent.
    pub gamma: f32,
}

impl Default for ImagePipeline {
    fn default() -> Self {
        Self {
            scale: 1.0,
            gamma: 2.2,
        }
    }
}

/// Linear exposure scale mapping the average image luminance to a mid-gray
/// display value.
pub fn auto_linear_scale(avg_luminance: f32, gamma: f32) -> f32 {
    if avg_luminance > 0.0 && avg_luminance.is_finite() {
        (1.25 / avg_luminance) * (118.0f32 / 255.0).powf(gamma)
    } else {
        1.0
    }
}

impl ImagePipeline {
    /// Builds a pipeline with the given exposure scale and gamma.
    pub fn new(scale: f32, gamma: f32) -> Self {
        Self { scale, gamma }
    }

    /// Normalizes both radiance estimators, applies scale and gamma, and
    /// writes the result into the film's `Display` channel.
    pub fn execute(&self, film: &mut Film) -> TilelightResult<()> {
        if !film.has_channel(ChannelKind::Display) {
            return Err(TilelightError::film(
                "image pipeline requires a Display channel",
            ));
        }

        let (width, height) = (film.width(), film.height());
        let inv_gamma = 1.0 / self.gamma;
        let mut values = Vec::with_capacity((width as usize) * (height as usize));
        for y in 0..height {
            for x in 0..width {
                let v = film.normalized_radiance(x, y);
                values.push([
                    tonemap_component(v.r, self.scale, inv_gamma),
                    tonemap_component(v.g, self.scale, inv_gamma),
                    tonemap_component(v.b, self.scale, inv_gamma),
                ]);
            }
        }

        let display = film
            .display_mut()
            .ok_or_else(|| TilelightError::film("Display channel not allocated"))?;
        for (idx, value) in values.into_iter().enumerate() {
            *display.at_mut(idx) = value;
        }
        Ok(())
    }
}

fn tonemap_component(c: f32, scale: f32, inv_gamma: f32) -> f32 {
    (c * scale).clamp(0.0, 1.0).powf(inv_gamma)
}
