//! Shared per-pixel error-map statistics used by the convergence test and
//! the noise estimator.

/// Averages `src` over a `(2 * radius + 1)`-ish square window; the window
/// shrinks near the image borders so border pixels average over fewer
/// neighbors instead of fabricated ones.
pub(crate) fn window_average(src: &[f32], width: u32, height: u32, radius: u32) -> Vec<f32> {
    let (w, h, r) = (width as i64, height as i64, radius as i64);
    let mut out = vec![0.0f32; src.len()];
    for i in 0..h {
        for j in 0..w {
            let min_r = (i - r).max(0);
            let max_r = (i + r).min(h);
            let min_c = (j - r).max(0);
            let max_c = (j + r).min(w);
            let mut acc = 0.0f32;
            for row in min_r..max_r {
                for col in min_c..max_c {
                    acc += src[(row * w + col) as usize];
                }
            }
            let window = ((max_r - min_r) * (max_c - min_c)) as f32;
            out[(i * w + j) as usize] = acc / window;
        }
    }
    out
}

/// Converts `values` in place to standard scores against their own mean and
/// standard deviation, clamping outliers to `±sigma_clamp`. Non-finite
/// entries are excluded from the statistics. Returns the resulting
/// (min, max) score pair.
pub(crate) fn standardize(values: &mut [f32], sigma_clamp: f32) -> (f32, f32) {
    let count = values.len() as f32;

    let mut acc = 0.0f32;
    for &v in values.iter() {
        if v.is_finite() {
            acc += v;
        }
    }
    let mean = acc / count;

    acc = 0.0;
    for &v in values.iter() {
        if v.is_finite() {
            let delta = v - mean;
            acc += delta * delta;
        }
    }
    let std = (acc / count).sqrt();

    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for v in values.iter_mut() {
        let score = if std > 0.0 {
            ((*v - mean) / std).clamp(-sigma_clamp, sigma_clamp)
        } else {
            0.0
        };
        *v = score;
        min = min.min(score);
        max = max.max(score);
    }
    (min, max)
}

/// Rescales standard scores to [0, 1] given their (min, max) range.
pub(crate) fn normalize_unit(values: &mut [f32], min: f32, max: f32) {
    let range = max - min;
    for v in values.iter_mut() {
        *v = if range > 0.0 { (*v - min) / range } else { 0.0 };
    }
}

/// In-place 3x3 gaussian blur with clamped borders, used to smooth the
/// per-pixel error map against single-pixel false negatives.
pub(crate) fn gaussian_blur_3x3(values: &mut Vec<f32>, width: u32, height: u32) {
    let (w, h) = (width as i64, height as i64);
    let src = values.clone();
    let sample = |x: i64, y: i64| -> f32 {
        let cx = x.clamp(0, w - 1);
        let cy = y.clamp(0, h - 1);
        src[(cy * w + cx) as usize]
    };
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0f32;
            for (dy, row_w) in [(-1i64, 1.0f32), (0, 2.0), (1, 1.0)] {
                for (dx, col_w) in [(-1i64, 1.0f32), (0, 2.0), (1, 1.0)] {
                    acc += row_w * col_w * sample(x + dx, y + dy);
                }
            }
            values[(y * w + x) as usize] = acc / 16.0;
        }
    }
}
