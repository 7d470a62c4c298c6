use crate::foundation::geom::PixelRegion;

/// Linearizes the tile grid covering `region` along a Hilbert curve.
///
/// Tiles adjacent in the returned order are close together on screen, which
/// keeps merge traffic cache-friendly, while the curve start spreads early
/// claims across the image instead of hot-spotting one corner. The grid
/// always covers the full region; the last row/column tiles are clipped.
pub(crate) fn tile_regions(region: PixelRegion, tile_width: u32, tile_height: u32) -> Vec<PixelRegion> {
    let nx = region.width.div_ceil(tile_width);
    let ny = region.height.div_ceil(tile_height);
    let side = u64::from(nx.max(ny)).next_power_of_two();

    let mut cells = Vec::with_capacity((nx as usize) * (ny as usize));
    curve(
        &mut cells,
        side,
        (0, 0),
        (0, 1),
        (1, 0),
        i64::from(nx),
        i64::from(ny),
    );
    debug_assert_eq!(cells.len(), (nx as usize) * (ny as usize));

    cells
        .into_iter()
        .map(|(tx, ty)| {
            let x = region.x + tx * tile_width;
            let y = region.y + ty * tile_height;
            PixelRegion {
                x,
                y,
                width: (x + tile_width).min(region.x_end()) - x,
                height: (y + tile_height).min(region.y_end()) - y,
            }
        })
        .collect()
}

/// Recursive Hilbert subdivision over an `n`-by-`n` cell square; only cells
/// inside the `nx`-by-`ny` grid are emitted.
fn curve(
    out: &mut Vec<(u32, u32)>,
    n: u64,
    origin: (i64, i64),
    d: (i64, i64),
    p: (i64, i64),
    nx: i64,
    ny: i64,
) {
    let (xo, yo) = origin;
    if n <= 1 {
        if xo >= 0 && yo >= 0 && xo < nx && yo < ny {
            out.push((xo as u32, yo as u32));
        }
        return;
    }

    let n2 = (n >> 1) as i64;
    let (xd, yd) = d;
    let (xp, yp) = p;

    curve(out, n >> 1, (xo, yo), p, d, nx, ny);
    curve(out, n >> 1, (xo + xd * n2, yo + yd * n2), d, p, nx, ny);
    curve(
        out,
        n >> 1,
        (xo + (xp + xd) * n2, yo + (yp + yd) * n2),
        d,
        p,
        nx,
        ny,
    );
    curve(
        out,
        n >> 1,
        (
            xo + xd * (n2 - 1) + xp * (n as i64 - 1),
            yo + yd * (n2 - 1) + yp * (n as i64 - 1),
        ),
        (-xp, -yp),
        (-xd, -yd),
        nx,
        ny,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn full_region(w: u32, h: u32) -> PixelRegion {
        PixelRegion::new(0, 0, w, h).unwrap()
    }

    #[test]
    fn partitions_the_region_exactly() {
        for (w, h, tw, th) in [(64, 64, 32, 32), (100, 70, 32, 32), (8, 200, 16, 16)] {
            let region = full_region(w, h);
            let tiles = tile_regions(region, tw, th);

            let mut covered = HashSet::new();
            for tile in &tiles {
                for y in tile.y..tile.y_end() {
                    for x in tile.x..tile.x_end() {
                        assert!(covered.insert((x, y)), "pixel ({x}, {y}) covered twice");
                        assert!(region.contains(x, y));
                    }
                }
            }
            assert_eq!(covered.len() as u64, region.area(), "gap in tile coverage");
        }
    }

    #[test]
    fn clips_last_row_and_column() {
        let tiles = tile_regions(full_region(40, 33), 32, 32);
        assert_eq!(tiles.len(), 4);
        let widths: Vec<u32> = tiles.iter().map(|t| t.width).collect();
        assert!(widths.contains(&32) && widths.contains(&8));
        let heights: Vec<u32> = tiles.iter().map(|t| t.height).collect();
        assert!(heights.contains(&32) && heights.contains(&1));
    }

    #[test]
    fn respects_sub_region_offset() {
        let region = PixelRegion::new(10, 20, 64, 64).unwrap();
        let tiles = tile_regions(region, 32, 32);
        assert_eq!(tiles.len(), 4);
        assert!(tiles.iter().all(|t| t.x >= 10 && t.y >= 20));
        assert!(tiles.iter().all(|t| t.x_end() <= 74 && t.y_end() <= 84));
    }

    #[test]
    fn consecutive_tiles_are_spatial_neighbors() {
        let tiles = tile_regions(full_region(128, 128), 32, 32);
        for pair in tiles.windows(2) {
            let dx = (i64::from(pair[0].x) - i64::from(pair[1].x)).abs();
            let dy = (i64::from(pair[0].y) - i64::from(pair[1].y)).abs();
            assert_eq!(dx + dy, 32, "hilbert successors must be grid neighbors");
        }
    }
}
