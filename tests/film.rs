use tilelight::{
    ChannelKind, ConvergenceConfig, ConvergenceTest, Film, ImagePipeline, NoiseEstimationConfig,
    NoiseEstimator, Rgb, auto_linear_scale,
};

fn dual_film(w: u32, h: u32) -> Film {
    Film::with_channels(
        w,
        h,
        [
            ChannelKind::RadiancePerPixelNormalized,
            ChannelKind::RadiancePerScreenNormalized,
            ChannelKind::Display,
        ],
    )
    .unwrap()
}

#[test]
fn estimators_normalize_independently_then_sum() {
    let mut film = dual_film(2, 2);

    // Pixel-normalized: 3 samples of 0.6 -> 0.6 after normalization.
    for _ in 0..3 {
        film.add_pixel_sample(0, 0, Rgb::splat(0.6), 1.0);
    }
    // Screen-normalized: 8 samples spread over the image, 4 pixels.
    // Factor = pixelCount / totalScreenSamples = 4 / 8 = 0.5.
    for _ in 0..8 {
        film.add_screen_sample(0, 0, Rgb::splat(0.1));
    }

    let v = film.normalized_radiance(0, 0);
    // 0.6 + (8 * 0.1) * 0.5 = 1.0
    assert!((v.r - 1.0).abs() < 1e-6, "got {}", v.r);

    // A pixel with only screen samples still normalizes by the image-wide
    // factor, not per-pixel weight.
    film.add_screen_sample(1, 1, Rgb::splat(1.0));
    let factor = 4.0 / 9.0;
    let v = film.normalized_radiance(1, 1);
    assert!((v.r - factor).abs() < 1e-6);
}

#[test]
fn has_samples_reports_either_estimator() {
    let mut film = dual_film(2, 1);
    assert!(!film.has_samples(0, 0));
    assert!(!film.has_samples(1, 0));

    film.add_pixel_sample(0, 0, Rgb::BLACK, 1.0);
    assert!(film.has_samples(0, 0), "weight alone marks a pixel sampled");

    film.add_screen_sample(1, 0, Rgb::splat(0.2));
    assert!(film.has_samples(1, 0));
}

#[test]
fn pipeline_feeds_the_convergence_test() {
    let mut film = Film::with_channels(
        8,
        8,
        [
            ChannelKind::RadiancePerPixelNormalized,
            ChannelKind::Display,
            ChannelKind::Convergence,
        ],
    )
    .unwrap();
    let cfg = ConvergenceConfig {
        threshold: 6.0 / 256.0,
        warmup_samples: 1,
        test_step: 1,
        use_filter: true,
    };
    let mut test = ConvergenceTest::new(8, 8, &cfg).unwrap();

    let mut expose = |film: &mut Film| {
        let mut total = 0.0f32;
        for y in 0..8 {
            for x in 0..8 {
                total += film.normalized_radiance(x, y).luminance();
            }
        }
        let scale = auto_linear_scale(total / 64.0, 1.0);
        ImagePipeline::new(scale, 2.2).execute(film).unwrap();
    };
    let saturate = |film: &mut Film, passes: u32| {
        for _ in 0..passes {
            for y in 0..8 {
                for x in 0..8 {
                    film.add_pixel_sample(x, y, Rgb::splat(0.5), 1.0);
                }
            }
        }
    };

    // First run only snapshots.
    saturate(&mut film, 2);
    expose(&mut film);
    assert_eq!(test.test(&mut film).unwrap(), 64);
    assert!(!test.has_converged());

    // Identical content after more samples: everything under threshold.
    saturate(&mut film, 2);
    expose(&mut film);
    assert_eq!(test.test(&mut film).unwrap(), 0);
    assert!(test.has_converged());
    assert_eq!(test.max_error(), 0.0);

    // The error map landed in the convergence channel, normalized.
    let conv = film.convergence().unwrap();
    for idx in 0..64 {
        let v = conv.at(idx)[0];
        assert!((0.0..=1.0).contains(&v), "convergence weight {v}");
    }
}

#[test]
fn noise_estimator_is_inert_without_its_channel() {
    let mut film = Film::with_channels(
        4,
        4,
        [
            ChannelKind::RadiancePerPixelNormalized,
            ChannelKind::Display,
        ],
    )
    .unwrap();
    for y in 0..4 {
        for x in 0..4 {
            film.add_pixel_sample(x, y, Rgb::splat(0.5), 1.0);
        }
    }
    ImagePipeline::default().execute(&mut film).unwrap();

    let est = NoiseEstimator::new(
        4,
        4,
        &NoiseEstimationConfig {
            warmup_samples: 0,
            test_step: 0,
            filter_scale: 2,
        },
    )
    .unwrap();
    assert!(!est.update_required(&film));
}

#[test]
fn frozen_channel_set_rejects_late_changes() {
    let mut film = Film::new(4, 4).unwrap();
    film.add_channel(ChannelKind::RadiancePerPixelNormalized)
        .unwrap();
    film.init().unwrap();
    assert!(film.add_channel(ChannelKind::Noise).is_err());
    assert!(
        film.remove_channel(ChannelKind::RadiancePerPixelNormalized)
            .is_err()
    );
}

#[test]
fn alpha_merges_like_the_radiance_channels() {
    let mut full = Film::with_channels(2, 2, ChannelKind::ALL).unwrap();
    full.add_pixel_sample(0, 0, Rgb::splat(0.5), 1.0);
    full.add_alpha_sample(0, 0, 1.0, 1.0);
    full.add_alpha_sample(0, 0, 0.0, 1.0);

    let mut dst = Film::with_channels(2, 2, ChannelKind::ALL).unwrap();
    dst.add_alpha_sample(0, 0, 1.0, 1.0);
    dst.add_film_full(&full).unwrap();

    // Alpha sum 2.0 over weight 3.0.
    let [alpha, weight] = dst.alpha().unwrap().get(0, 0);
    assert_eq!(alpha, 2.0);
    assert_eq!(weight, 3.0);
}

#[test]
fn non_finite_samples_stay_in_the_buffer() {
    // NaN samples are not scheduler-fatal; they merge like any other value
    // and only the statistics exclude them.
    let mut film = dual_film(2, 1);
    film.add_pixel_sample(0, 0, Rgb::new(f32::NAN, 1.0, 1.0), 1.0);

    let buf = film.pixel_normalized().unwrap();
    assert!(buf.get(0, 0)[0].is_nan());
    assert_eq!(buf.get(0, 0)[3], 1.0);

    let mut dst = dual_film(2, 1);
    dst.add_film_full(&film).unwrap();
    assert!(dst.pixel_normalized().unwrap().get(0, 0)[0].is_nan());
}
