use std::collections::BTreeSet;

use crate::film::buffer::PlaneBuffer;
use crate::film::channel::ChannelKind;
use crate::foundation::color::Rgb;
use crate::foundation::error::{TilelightError, TilelightResult};

/// The shared accumulation buffer: per-pixel statistical channels addressable
/// by [`ChannelKind`].
///
/// Two radiance estimators coexist and are normalized independently:
///
/// - *pixel-normalized*: `(R, G, B, weight)` per pixel, display value is
///   `sum / weight`;
/// - *screen-normalized*: unweighted `(R, G, B)` per pixel, display value is
///   `sum * (pixel_count / total_screen_samples)`.
///
/// The channel set is fixed before [`Film::init`]; mutating it afterwards is
/// an error.
#[derive(Clone, Debug)]
pub struct Film {
    width: u32,
    height: u32,
    channels: BTreeSet<ChannelKind>,
    initialized: bool,

    radiance_per_pixel: Option<PlaneBuffer<4>>,
    radiance_per_screen: Option<PlaneBuffer<3>>,
    alpha: Option<PlaneBuffer<2>>,
    convergence: Option<PlaneBuffer<1>>,
    noise: Option<PlaneBuffer<1>>,
    display: Option<PlaneBuffer<3>>,

    pixel_sample_count: f64,
    screen_sample_count: f64,
}

impl Film {
    /// Creates an uninitialized film with the default channel set
    /// (pixel-normalized radiance plus a display buffer).
    pub fn new(width: u32, height: u32) -> TilelightResult<Self> {
        if width == 0 || height == 0 {
            return Err(TilelightError::config(format!(
                "film must have a non-zero area, got {width}x{height}"
            )));
        }

        let mut channels = BTreeSet::new();
        channels.insert(ChannelKind::RadiancePerPixelNormalized);
        channels.insert(ChannelKind::Display);

        Ok(Self {
            width,
            height,
            channels,
            initialized: false,
            radiance_per_pixel: None,
            radiance_per_screen: None,
            alpha: None,
            convergence: None,
            noise: None,
            display: None,
            pixel_sample_count: 0.0,
            screen_sample_count: 0.0,
        })
    }

    /// Creates an initialized film with exactly the given channels.
    pub fn with_channels(
        width: u32,
        height: u32,
        kinds: impl IntoIterator<Item = ChannelKind>,
    ) -> TilelightResult<Self> {
        let mut film = Self::new(width, height)?;
        film.channels.clear();
        for kind in kinds {
            film.channels.insert(kind);
        }
        film.init()?;
        Ok(film)
    }

    /// Creates an initialized film of a different size carrying the same
    /// channel set as `self`.
    pub fn derived(&self, width: u32, height: u32) -> TilelightResult<Self> {
        Self::with_channels(width, height, self.channels.iter().copied())
    }

    /// Adds a channel to the set; only valid before [`Film::init`].
    pub fn add_channel(&mut self, kind: ChannelKind) -> TilelightResult<()> {
        if self.initialized {
            return Err(TilelightError::film(
                "channels can only be added before film initialization",
            ));
        }
        self.channels.insert(kind);
        Ok(())
    }

    /// Removes a channel from the set; only valid before [`Film::init`].
    pub fn remove_channel(&mut self, kind: ChannelKind) -> TilelightResult<()> {
        if self.initialized {
            return Err(TilelightError::film(
                "channels can only be removed before film initialization",
            ));
        }
        self.channels.remove(&kind);
        Ok(())
    }

    /// Allocates all configured channel buffers. The channel set is frozen
    /// from this point on.
    pub fn init(&mut self) -> TilelightResult<()> {
        if self.initialized {
            return Err(TilelightError::film("film is already initialized"));
        }

        let (w, h) = (self.width, self.height);
        if self.has_channel(ChannelKind::RadiancePerPixelNormalized) {
            self.radiance_per_pixel = Some(PlaneBuffer::new(w, h));
        }
        if self.has_channel(ChannelKind::RadiancePerScreenNormalized) {
            self.radiance_per_screen = Some(PlaneBuffer::new(w, h));
        }
        if self.has_channel(ChannelKind::Alpha) {
            self.alpha = Some(PlaneBuffer::new(w, h));
        }
        if self.has_channel(ChannelKind::Convergence) {
            self.convergence = Some(PlaneBuffer::new(w, h));
        }
        if self.has_channel(ChannelKind::Noise) {
            self.noise = Some(PlaneBuffer::new(w, h));
        }
        if self.has_channel(ChannelKind::Display) {
            self.display = Some(PlaneBuffer::new(w, h));
        }

        self.initialized = true;
        Ok(())
    }

    /// True once [`Film::init`] has run.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// True when `kind` is part of the configured channel set.
    pub fn has_channel(&self, kind: ChannelKind) -> bool {
        self.channels.contains(&kind)
    }

    /// The configured channel set, in stable order.
    pub fn channels(&self) -> impl Iterator<Item = ChannelKind> + '_ {
        self.channels.iter().copied()
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Number of pixels.
    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Clears every buffer and sample counter; channel allocation is reused.
    pub fn reset(&mut self) {
        if let Some(buf) = &mut self.radiance_per_pixel {
            buf.clear();
        }
        if let Some(buf) = &mut self.radiance_per_screen {
            buf.clear();
        }
        if let Some(buf) = &mut self.alpha {
            buf.clear();
        }
        if let Some(buf) = &mut self.convergence {
            buf.clear();
        }
        if let Some(buf) = &mut self.noise {
            buf.clear();
        }
        if let Some(buf) = &mut self.display {
            buf.clear();
        }
        self.pixel_sample_count = 0.0;
        self.screen_sample_count = 0.0;
    }

    //--------------------------------------------------------------------------
    // Sample accumulation
    //--------------------------------------------------------------------------

    /// Accumulates one observer-side sample into the pixel-normalized channel.
    pub fn add_pixel_sample(&mut self, x: u32, y: u32, radiance: Rgb, weight: f32) {
        if let Some(buf) = &mut self.radiance_per_pixel {
            buf.add(x, y, [radiance.r, radiance.g, radiance.b, weight]);
        }
        self.pixel_sample_count += 1.0;
    }

    /// Accumulates one light-side sample into the screen-normalized channel.
    pub fn add_screen_sample(&mut self, x: u32, y: u32, radiance: Rgb) {
        if let Some(buf) = &mut self.radiance_per_screen {
            buf.add(x, y, [radiance.r, radiance.g, radiance.b]);
        }
        self.screen_sample_count += 1.0;
    }

    /// Accumulates one coverage sample into the alpha channel.
    pub fn add_alpha_sample(&mut self, x: u32, y: u32, alpha: f32, weight: f32) {
        if let Some(buf) = &mut self.alpha {
            buf.add(x, y, [alpha, weight]);
        }
    }

    //--------------------------------------------------------------------------
    // Region merge
    //--------------------------------------------------------------------------

    /// Additively merges the `src_width`x`src_height` region of `src` starting
    /// at `(src_x, src_y)` into this film at `(dst_x, dst_y)`.
    ///
    /// Only channels present on both films are merged. `src`'s sample
    /// counters are added in full, so merging a worker's whole private buffer
    /// keeps the global statistics exact.
    pub fn add_film(
        &mut self,
        src: &Film,
        src_x: u32,
        src_y: u32,
        src_width: u32,
        src_height: u32,
        dst_x: u32,
        dst_y: u32,
    ) -> TilelightResult<()> {
        if src_x + src_width > src.width || src_y + src_height > src.height {
            return Err(TilelightError::film(format!(
                "merge source region {src_width}x{src_height}+{src_x}+{src_y} exceeds {}x{}",
                src.width, src.height
            )));
        }
        if dst_x + src_width > self.width || dst_y + src_height > self.height {
            return Err(TilelightError::film(format!(
                "merge destination region {src_width}x{src_height}+{dst_x}+{dst_y} exceeds {}x{}",
                self.width, self.height
            )));
        }

        self.pixel_sample_count += src.pixel_sample_count;
        self.screen_sample_count += src.screen_sample_count;

        if let (Some(dst), Some(s)) = (&mut self.radiance_per_pixel, &src.radiance_per_pixel) {
            for y in 0..src_height {
                for x in 0..src_width {
                    dst.add(dst_x + x, dst_y + y, s.get(src_x + x, src_y + y));
                }
            }
        }
        if let (Some(dst), Some(s)) = (&mut self.radiance_per_screen, &src.radiance_per_screen) {
            for y in 0..src_height {
                for x in 0..src_width {
                    dst.add(dst_x + x, dst_y + y, s.get(src_x + x, src_y + y));
                }
            }
        }
        if let (Some(dst), Some(s)) = (&mut self.alpha, &src.alpha) {
            for y in 0..src_height {
                for x in 0..src_width {
                    dst.add(dst_x + x, dst_y + y, s.get(src_x + x, src_y + y));
                }
            }
        }

        Ok(())
    }

    /// Merges the whole of `src` at `(0, 0)`.
    pub fn add_film_full(&mut self, src: &Film) -> TilelightResult<()> {
        self.add_film(src, 0, 0, src.width, src.height, 0, 0)
    }

    //--------------------------------------------------------------------------
    // Normalization & statistics
    //--------------------------------------------------------------------------

    /// The image-wide factor applied to screen-normalized sums.
    pub fn screen_normalization_factor(&self) -> f32 {
        if self.screen_sample_count > 0.0 {
            (self.pixel_count() as f64 / self.screen_sample_count) as f32
        } else {
            0.0
        }
    }

    /// The fully normalized radiance of one pixel: both estimators normalized
    /// independently, then summed.
    pub fn normalized_radiance(&self, x: u32, y: u32) -> Rgb {
        let mut out = Rgb::BLACK;

        if let Some(buf) = &self.radiance_per_pixel {
            let [r, g, b, w] = buf.get(x, y);
            if w > 0.0 {
                let inv = 1.0 / w;
                out += Rgb::new(r * inv, g * inv, b * inv);
            }
        }
        if let Some(buf) = &self.radiance_per_screen {
            let factor = self.screen_normalization_factor();
            if factor > 0.0 {
                let [r, g, b] = buf.get(x, y);
                out += Rgb::new(r, g, b) * factor;
            }
        }

        out
    }

    /// True if any estimator has received a sample for this pixel.
    pub fn has_samples(&self, x: u32, y: u32) -> bool {
        if let Some(buf) = &self.radiance_per_pixel {
            if buf.get(x, y)[3] > 0.0 {
                return true;
            }
        }
        if let Some(buf) = &self.radiance_per_screen {
            let [r, g, b] = buf.get(x, y);
            if r != 0.0 || g != 0.0 || b != 0.0 {
                return true;
            }
        }
        false
    }

    /// The pixel-normalized sample weight of one pixel (0 when the channel is
    /// absent).
    pub fn pixel_sample_weight(&self, x: u32, y: u32) -> f32 {
        self.radiance_per_pixel
            .as_ref()
            .map(|buf| buf.get(x, y)[3])
            .unwrap_or(0.0)
    }

    /// Total samples accumulated across both estimators.
    pub fn total_sample_count(&self) -> f64 {
        self.pixel_sample_count + self.screen_sample_count
    }

    /// Mean samples per pixel over the whole image.
    pub fn samples_per_pixel(&self) -> f64 {
        self.total_sample_count() / self.pixel_count() as f64
    }

    /// Mean screen-normalized samples per pixel over the whole image.
    pub fn screen_samples_per_pixel(&self) -> f64 {
        self.screen_sample_count / self.pixel_count() as f64
    }

    //--------------------------------------------------------------------------
    // Channel access
    //--------------------------------------------------------------------------

    /// The pixel-normalized accumulator, when configured.
    pub fn pixel_normalized(&self) -> Option<&PlaneBuffer<4>> {
        self.radiance_per_pixel.as_ref()
    }

    pub(crate) fn pixel_normalized_mut(&mut self) -> Option<&mut PlaneBuffer<4>> {
        self.radiance_per_pixel.as_mut()
    }

    /// The screen-normalized accumulator, when configured.
    pub fn screen_normalized(&self) -> Option<&PlaneBuffer<3>> {
        self.radiance_per_screen.as_ref()
    }

    /// The alpha coverage buffer, when configured.
    pub fn alpha(&self) -> Option<&PlaneBuffer<2>> {
        self.alpha.as_ref()
    }

    /// The tonemapped display buffer, when configured.
    pub fn display(&self) -> Option<&PlaneBuffer<3>> {
        self.display.as_ref()
    }

    /// Mutable access to the display buffer, when configured.
    pub fn display_mut(&mut self) -> Option<&mut PlaneBuffer<3>> {
        self.display.as_mut()
    }

    /// The convergence error map, when configured.
    pub fn convergence(&self) -> Option<&PlaneBuffer<1>> {
        self.convergence.as_ref()
    }

    /// Mutable access to the convergence error map, when configured.
    pub fn convergence_mut(&mut self) -> Option<&mut PlaneBuffer<1>> {
        self.convergence.as_mut()
    }

    /// The noise weight map, when configured.
    pub fn noise(&self) -> Option<&PlaneBuffer<1>> {
        self.noise.as_ref()
    }

    /// Mutable access to the noise weight map, when configured.
    pub fn noise_mut(&mut self) -> Option<&mut PlaneBuffer<1>> {
        self.noise.as_mut()
    }
}
