use crate::film::model::Film;
use crate::foundation::error::TilelightResult;

/// Firefly suppression: scales down outlier pass contributions whose
/// brightness exceeds the accumulated expected value by more than a
/// configured deviation.
///
/// The whole RGB triple is scaled by one factor so clamping never shifts hue.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VarianceClamping {
    sqrt_max_value: f32,
}

impl VarianceClamping {
    /// Builds a clamp with the given allowed deviation; 0 disables it.
    pub fn new(sqrt_max_value: f32) -> Self {
        Self {
            sqrt_max_value: sqrt_max_value.max(0.0),
        }
    }

    /// True when clamping is active.
    pub fn is_enabled(&self) -> bool {
        self.sqrt_max_value > 0.0
    }

    /// Clamps the incoming per-pass buffer `pass` against the expected pixel
    /// values accumulated in `reference`. Shapes may differ (a worker buffer
    /// can be larger than a clipped edge tile); only the overlap is clamped.
    ///
    /// Pixels the reference has no samples for are left untouched (there is
    /// no expectation to clamp against yet).
    pub fn clamp_film(&self, reference: &Film, pass: &mut Film) -> TilelightResult<()> {
        if !self.is_enabled() {
            return Ok(());
        }

        let width = reference.width().min(pass.width());
        let height = reference.height().min(pass.height());
        let Some(ref_buf) = reference.pixel_normalized() else {
            return Ok(());
        };
        let Some(pass_buf) = pass.pixel_normalized_mut() else {
            return Ok(());
        };

        for y in 0..height {
            for x in 0..width {
                let [er, eg, eb, ew] = ref_buf.get(x, y);
                if ew <= 0.0 {
                    continue;
                }
                let inv = 1.0 / ew;
                let expected_max = (er * inv).max(eg * inv).max(eb * inv);
                let limit = expected_max + self.sqrt_max_value;

                let pixel = pass_buf.get_mut(x, y);
                let [sr, sg, sb, sw] = *pixel;
                if sw <= 0.0 {
                    continue;
                }
                let sample_max = (sr.max(sg).max(sb)) / sw;
                if sample_max > limit && sample_max > 0.0 {
                    let scale = limit / sample_max;
                    pixel[0] = sr * scale;
                    pixel[1] = sg * scale;
                    pixel[2] = sb * scale;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::film::channel::ChannelKind;
    use crate::foundation::color::Rgb;

    fn film(w: u32, h: u32) -> Film {
        Film::with_channels(w, h, [ChannelKind::RadiancePerPixelNormalized]).unwrap()
    }

    #[test]
    fn disabled_clamping_is_a_no_op() {
        let reference = film(1, 1);
        let mut pass = film(1, 1);
        pass.add_pixel_sample(0, 0, Rgb::new(1000.0, 0.0, 0.0), 1.0);
        VarianceClamping::new(0.0)
            .clamp_film(&reference, &mut pass)
            .unwrap();
        assert_eq!(pass.pixel_normalized().unwrap().get(0, 0)[0], 1000.0);
    }

    #[test]
    fn firefly_is_scaled_towards_expected_value() {
        let mut reference = film(1, 1);
        reference.add_pixel_sample(0, 0, Rgb::new(1.0, 1.0, 1.0), 1.0);

        let mut pass = film(1, 1);
        pass.add_pixel_sample(0, 0, Rgb::new(100.0, 50.0, 25.0), 1.0);

        VarianceClamping::new(1.0)
            .clamp_film(&reference, &mut pass)
            .unwrap();

        let [r, g, b, w] = pass.pixel_normalized().unwrap().get(0, 0);
        assert!((r - 2.0).abs() < 1e-4); // limit = 1 + 1
        // Hue preserved: same scale on every component.
        assert!((r / g - 2.0).abs() < 1e-4);
        assert!((g / b - 2.0).abs() < 1e-4);
        assert_eq!(w, 1.0);
    }

    #[test]
    fn pixels_without_reference_samples_are_untouched() {
        let reference = film(1, 1);
        let mut pass = film(1, 1);
        pass.add_pixel_sample(0, 0, Rgb::new(9.0, 9.0, 9.0), 1.0);
        VarianceClamping::new(0.5)
            .clamp_film(&reference, &mut pass)
            .unwrap();
        assert_eq!(pass.pixel_normalized().unwrap().get(0, 0)[0], 9.0);
    }
}
