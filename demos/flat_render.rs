//! Renders a flat test image with a noisy sampler and prints scheduling
//! statistics as tiles converge.
//!
//! Run with: cargo run --example flat_render

use std::time::Duration;

use tilelight::{
    CancelToken, ChannelKind, Film, HaltConfig, PixelRegion, RenderSession, RenderSessionOpts, Rgb,
    SchedulerConfig, TileWork, TilelightResult,
};

fn main() -> TilelightResult<()> {
    tracing_subscriber::fmt::init();

    let region = PixelRegion::new(0, 0, 256, 256)?;
    let session = RenderSession::new(
        region,
        [
            ChannelKind::RadiancePerPixelNormalized,
            ChannelKind::Display,
        ],
        SchedulerConfig {
            warmup_samples: 4,
            ..Default::default()
        },
        RenderSessionOpts {
            halt: HaltConfig {
                wall_clock: Some(Duration::from_secs(30)),
                ..Default::default()
            },
            ..Default::default()
        },
    )?;

    let renderer = |work: &TileWork, film: &mut Film, _cancel: &CancelToken| {
        let tile = work.region();
        for y in 0..tile.height {
            for x in 0..tile.width {
                // A cheap deterministic "sampler": a gradient plus per-pass
                // jitter that averages out, so tiles converge after a few
                // passes.
                let base = (tile.x + x) as f32 / 256.0;
                let jitter = if work.pass_index() % 2 == 0 {
                    0.01
                } else {
                    -0.01
                };
                film.add_pixel_sample(x, y, Rgb::splat(base + jitter), 1.0);
            }
        }
        Ok(())
    };

    let (film, stats) = session.run(&renderer)?;
    println!(
        "rendered {}x{} in {:.2}s: {:.1} samples/pixel, {}/{} tiles converged over {} generation(s)",
        film.width(),
        film.height(),
        stats.elapsed.as_secs_f64(),
        stats.samples_per_pixel,
        stats.converged_tiles,
        stats.total_tiles,
        stats.generations + 1,
    );
    Ok(())
}
