use crate::foundation::error::{TilelightError, TilelightResult};

/// A rectangular region of the output image, in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PixelRegion {
    /// Left-most column.
    pub x: u32,
    /// Top-most row.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl PixelRegion {
    /// Builds a region, rejecting zero-area rectangles.
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> TilelightResult<Self> {
        if width == 0 || height == 0 {
            return Err(TilelightError::config(format!(
                "degenerate pixel region {width}x{height}"
            )));
        }
        Ok(Self {
            x,
            y,
            width,
            height,
        })
    }

    /// One past the right-most column.
    pub fn x_end(self) -> u32 {
        self.x + self.width
    }

    /// One past the bottom-most row.
    pub fn y_end(self) -> u32 {
        self.y + self.height
    }

    /// Area in pixels.
    pub fn area(self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// True when the pixel `(px, py)` lies inside this region.
    pub fn contains(self, px: u32, py: u32) -> bool {
        px >= self.x && px < self.x_end() && py >= self.y && py < self.y_end()
    }

    /// True when the two regions share at least one pixel.
    pub fn overlaps(self, other: Self) -> bool {
        self.x < other.x_end()
            && other.x < self.x_end()
            && self.y < other.y_end()
            && other.y < self.y_end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_degenerate_regions() {
        assert!(PixelRegion::new(0, 0, 0, 8).is_err());
        assert!(PixelRegion::new(0, 0, 8, 0).is_err());
        assert!(PixelRegion::new(4, 4, 1, 1).is_ok());
    }

    #[test]
    fn contains_and_overlap_boundaries() {
        let r = PixelRegion::new(2, 2, 4, 4).unwrap();
        assert!(r.contains(2, 2));
        assert!(r.contains(5, 5));
        assert!(!r.contains(6, 6));

        let touching = PixelRegion::new(6, 2, 2, 2).unwrap();
        assert!(!r.overlaps(touching));
        let inside = PixelRegion::new(3, 3, 1, 1).unwrap();
        assert!(r.overlaps(inside));
    }
}
