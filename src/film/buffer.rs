use crate::foundation::error::{TilelightError, TilelightResult};

/// A row-major `f32` framebuffer with `N` planes per pixel.
///
/// This is the single storage type behind every film channel: radiance
/// accumulators use 4 planes (RGB sums + sample weight), screen-normalized
/// accumulators and display buffers 3, scalar maps 1.
#[derive(Clone, Debug, PartialEq)]
pub struct PlaneBuffer<const N: usize> {
    width: u32,
    height: u32,
    pixels: Vec<[f32; N]>,
}

impl<const N: usize> PlaneBuffer<N> {
    /// Allocates a zeroed buffer.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![[0.0; N]; (width as usize) * (height as usize)],
        }
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
    pub fn pixel_count(&self) -> usize {
        self.pixels.len()
    }

    fn index(&self, x: u32, y: u32) -> usize {
        debug_assert!(x < self.width && y < self.height);
        (y as usize) * (self.width as usize) + (x as usize)
    }

    /// The planes of one pixel, by coordinates.
    pub fn get(&self, x: u32, y: u32) -> [f32; N] {
        self.pixels[self.index(x, y)]
    }

    /// Mutable access to one pixel, by coordinates.
    pub fn get_mut(&mut self, x: u32, y: u32) -> &mut [f32; N] {
        let idx = self.index(x, y);
        &mut self.pixels[idx]
    }

    /// The planes of one pixel, by row-major index.
    pub fn at(&self, idx: usize) -> [f32; N] {
        self.pixels[idx]
    }

    /// Mutable access to one pixel, by row-major index.
    pub fn at_mut(&mut self, idx: usize) -> &mut [f32; N] {
        &mut self.pixels[idx]
    }

    /// Additive merge of one pixel.
    pub fn add(&mut self, x: u32, y: u32, value: [f32; N]) {
        let idx = self.index(x, y);
        for (dst, src) in self.pixels[idx].iter_mut().zip(value.iter()) {
            *dst += *src;
        }
    }

    /// Zeroes every pixel.
    pub fn clear(&mut self) {
        self.pixels.fill([0.0; N]);
    }

    /// Sets every pixel to `value`.
    pub fn fill(&mut self, value: [f32; N]) {
        self.pixels.fill(value);
    }

    /// Replaces the whole content with `src`, which must have the same shape.
    pub fn copy_from(&mut self, src: &Self) -> TilelightResult<()> {
        if src.width != self.width || src.height != self.height {
            return Err(TilelightError::film(format!(
                "buffer shape mismatch: {}x{} vs {}x{}",
                self.width, self.height, src.width, src.height
            )));
        }
        self.pixels.copy_from_slice(&src.pixels);
        Ok(())
    }

    /// The raw row-major pixel slice.
    pub fn pixels(&self) -> &[[f32; N]] {
        &self.pixels
    }
}
