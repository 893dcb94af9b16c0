//! Tile geometry: sizing, overlap, stride, and stitch crops.
//!
//! Tiles are extracted with an overlap halo so the resampling kernel
//! never reads across a tile boundary, then cropped back to disjoint
//! regions before compositing.
//!
//! # Stitching contract
//!
//! Each tile *owns* the source stride interval
//! `[tx * stride, (tx + 1) * stride)` (clamped to the image on the last
//! tile), and therefore owns the output interval between the rounded
//! scaled endpoints of that stride. Because those endpoints telescope
//! across neighboring tiles, the owned output rectangles partition the
//! canvas exactly: every output pixel is written exactly once. The crop
//! discarded on an interior edge is the 64-pixel output overlap (exactly
//! 64 whenever `overlap_input * scale` lands on an integer; the rounding
//! remainder is absorbed by the crop otherwise).

use upres_core::{Error, Rect, Result};

use crate::limits::tile_size_override;

/// Fixed overlap between neighboring tiles, in output pixels.
pub const OVERLAP_OUTPUT: u32 = 64;

/// Tile side lengths the sizing rule chooses from, in source pixels.
pub const TILE_SIZES: [u32; 4] = [512, 1024, 1536, 2048];

/// Derived tile geometry for one image and scale.
#[derive(Debug, Clone, PartialEq)]
pub struct TileGrid {
    /// Source image width.
    pub width: u32,
    /// Source image height.
    pub height: u32,
    /// Scale factor.
    pub scale: f64,
    /// Square tile side in source pixels.
    pub input_tile_size: u32,
    /// Overlap in source pixels: `round(OVERLAP_OUTPUT / scale)`.
    pub overlap_input: u32,
    /// Tile-to-tile step: `input_tile_size - overlap_input`.
    pub stride: u32,
    /// Tile count along X.
    pub tiles_x: u32,
    /// Tile count along Y.
    pub tiles_y: u32,
}

/// One tile's extraction and stitch geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileSpec {
    /// Tile X index.
    pub tx: u32,
    /// Tile Y index.
    pub ty: u32,
    /// Source rectangle to extract (overlap halo included).
    pub source: Rect,
    /// Output-space position of the extracted rectangle's origin.
    pub out_x: u32,
    /// Output-space position of the extracted rectangle's origin.
    pub out_y: u32,
    /// Resampled tile width.
    pub out_w: u32,
    /// Resampled tile height.
    pub out_h: u32,
    /// Pixels cropped from the left edge before pasting.
    pub crop_left: u32,
    /// Pixels cropped from the top edge before pasting.
    pub crop_top: u32,
    /// Pixels cropped from the right edge before pasting.
    pub crop_right: u32,
    /// Pixels cropped from the bottom edge before pasting.
    pub crop_bottom: u32,
}

impl TileSpec {
    /// The disjoint output rectangle this tile owns after cropping.
    pub fn owned_output(&self) -> Rect {
        Rect::new(
            self.out_x + self.crop_left,
            self.out_y + self.crop_top,
            self.out_w - self.crop_left - self.crop_right,
            self.out_h - self.crop_top - self.crop_bottom,
        )
    }
}

impl TileGrid {
    /// Builds a grid, choosing the tile size from the output extent:
    /// above 8000 output pixels on the long side use 2048, below 2000
    /// use 512, otherwise 1024. `UPRES_TILE_SIZE` overrides.
    pub fn new(width: u32, height: u32, scale: f64) -> Result<Self> {
        let tile = tile_size_override().unwrap_or_else(|| {
            let out_side = (width.max(height) as f64 * scale).round();
            if out_side > 8000.0 {
                2048
            } else if out_side < 2000.0 {
                512
            } else {
                1024
            }
        });
        Self::with_tile_size(width, height, scale, tile)
    }

    /// Builds a grid with an explicit tile size.
    pub fn with_tile_size(width: u32, height: u32, scale: f64, tile: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::invalid_input(format!(
                "image dimensions must be positive, got {width}x{height}"
            )));
        }
        if scale < 1.0 {
            return Err(Error::invalid_input(format!(
                "tiled scaling requires scale >= 1.0, got {scale}"
            )));
        }
        let overlap_input = ((OVERLAP_OUTPUT as f64 / scale).round() as u32).max(1);
        if overlap_input >= tile {
            return Err(Error::invariant(format!(
                "overlap {overlap_input} exceeds tile size {tile}"
            )));
        }
        let stride = tile - overlap_input;
        let tiles_x = width.div_ceil(stride);
        let tiles_y = height.div_ceil(stride);
        Ok(Self {
            width,
            height,
            scale,
            input_tile_size: tile,
            overlap_input,
            stride,
            tiles_x,
            tiles_y,
        })
    }

    /// Output canvas width: `round(width * scale)`.
    pub fn output_width(&self) -> u32 {
        (self.width as f64 * self.scale).round() as u32
    }

    /// Output canvas height: `round(height * scale)`.
    pub fn output_height(&self) -> u32 {
        (self.height as f64 * self.scale).round() as u32
    }

    /// Total tile count.
    pub fn total_tiles(&self) -> u64 {
        self.tiles_x as u64 * self.tiles_y as u64
    }

    /// Geometry for tile (tx, ty).
    ///
    /// # Panics
    ///
    /// Panics if the indices are outside the grid.
    pub fn tile(&self, tx: u32, ty: u32) -> TileSpec {
        assert!(tx < self.tiles_x && ty < self.tiles_y, "tile index outside grid");

        let (src_x, src_x_end, out_x, owned_x, owned_x_end) = self.axis(tx, self.width);
        let (src_y, src_y_end, out_y, owned_y, owned_y_end) = self.axis(ty, self.height);

        let out_w = self.out_pos(src_x_end) - out_x;
        let out_h = self.out_pos(src_y_end) - out_y;

        TileSpec {
            tx,
            ty,
            source: Rect::new(src_x, src_y, src_x_end - src_x, src_y_end - src_y),
            out_x,
            out_y,
            out_w,
            out_h,
            crop_left: owned_x - out_x,
            crop_top: owned_y - out_y,
            crop_right: (out_x + out_w) - owned_x_end,
            crop_bottom: (out_y + out_h) - owned_y_end,
        }
    }

    /// All tiles in row-major order.
    pub fn tiles(&self) -> Vec<TileSpec> {
        let mut tiles = Vec::with_capacity(self.total_tiles() as usize);
        for ty in 0..self.tiles_y {
            for tx in 0..self.tiles_x {
                tiles.push(self.tile(tx, ty));
            }
        }
        tiles
    }

    /// Working-set estimate for one tile in bytes: the extracted input
    /// plus the resampled output, in f32.
    pub fn estimated_tile_bytes(&self, channels: u8) -> u64 {
        let in_side = (self.input_tile_size + self.overlap_input) as u64;
        let out_side = (in_side as f64 * self.scale).ceil() as u64;
        (in_side * in_side + out_side * out_side) * channels as u64 * 4
    }

    /// One axis of tile geometry: extraction interval, output origin, and
    /// owned output interval.
    fn axis(&self, index: u32, extent: u32) -> (u32, u32, u32, u32, u32) {
        let owned_start_src = index * self.stride;
        let owned_end_src = ((index + 1) * self.stride).min(extent);

        let src_start = owned_start_src.saturating_sub(self.overlap_input);
        let src_end = (src_start + self.input_tile_size + self.overlap_input).min(extent);

        (
            src_start,
            src_end,
            self.out_pos(src_start),
            self.out_pos(owned_start_src),
            self.out_pos(owned_end_src),
        )
    }

    fn out_pos(&self, src: u32) -> u32 {
        (src as f64 * self.scale).round() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_size_ladder() {
        // 2000x3000 at 8x: long output side 24000 > 8000.
        let grid = TileGrid::new(2000, 3000, 8.0).unwrap();
        assert_eq!(grid.input_tile_size, 2048);

        // 100x100 at 2x: output 200 < 2000.
        let grid = TileGrid::new(100, 100, 2.0).unwrap();
        assert_eq!(grid.input_tile_size, 512);

        // 1500x1000 at 4x: output 6000.
        let grid = TileGrid::new(1500, 1000, 4.0).unwrap();
        assert_eq!(grid.input_tile_size, 1024);
    }

    #[test]
    fn test_grid_counts() {
        let grid = TileGrid::with_tile_size(2000, 3000, 8.0, 1024).unwrap();
        assert_eq!(grid.overlap_input, 8);
        assert_eq!(grid.stride, 1016);
        assert_eq!(grid.tiles_x, 2);
        assert_eq!(grid.tiles_y, 3);
        assert_eq!(grid.total_tiles(), 6);
    }

    #[test]
    fn test_corner_tiles_have_no_outer_crop() {
        let grid = TileGrid::with_tile_size(2000, 3000, 8.0, 1024).unwrap();
        let first = grid.tile(0, 0);
        assert_eq!(first.crop_left, 0);
        assert_eq!(first.crop_top, 0);

        let last = grid.tile(grid.tiles_x - 1, grid.tiles_y - 1);
        assert_eq!(last.crop_right, 0);
        assert_eq!(last.crop_bottom, 0);
    }

    #[test]
    fn test_interior_crop_is_overlap_output() {
        // 8x: overlap_input = 8 scales to exactly 64 output pixels.
        let grid = TileGrid::with_tile_size(4000, 4000, 8.0, 1024).unwrap();
        assert!(grid.tiles_x >= 3);
        let interior = grid.tile(1, 1);
        assert_eq!(interior.crop_left, OVERLAP_OUTPUT);
        assert_eq!(interior.crop_top, OVERLAP_OUTPUT);
        assert_eq!(interior.crop_right, OVERLAP_OUTPUT);
        assert_eq!(interior.crop_bottom, OVERLAP_OUTPUT);
    }

    #[test]
    fn test_extraction_stays_in_bounds() {
        for scale in [1.3, 2.0, 3.7, 8.0, 12.5] {
            let grid = TileGrid::with_tile_size(1500, 900, scale, 512).unwrap();
            for tile in grid.tiles() {
                assert!(tile.source.right() <= grid.width);
                assert!(tile.source.bottom() <= grid.height);
                assert!(!tile.source.is_empty());
            }
        }
    }

    #[test]
    fn test_owned_rects_partition_canvas() {
        // Coverage and disjointness: owned rectangles tile the output
        // exactly, for awkward scales included.
        for scale in [1.5, 2.0, 3.0, 4.7, 8.0] {
            let grid = TileGrid::with_tile_size(1300, 700, scale, 512).unwrap();
            let out_w = grid.output_width();
            let out_h = grid.output_height();

            let tiles = grid.tiles();
            let mut covered = 0u64;
            for tile in &tiles {
                let owned = tile.owned_output();
                assert!(owned.right() <= out_w, "scale {scale}: owned past right edge");
                assert!(owned.bottom() <= out_h, "scale {scale}: owned past bottom");
                covered += owned.area();
            }
            assert_eq!(
                covered,
                out_w as u64 * out_h as u64,
                "scale {scale}: owned areas must sum to the canvas"
            );

            // Horizontal abutment along the first row.
            let mut edge = 0;
            for tx in 0..grid.tiles_x {
                let owned = grid.tile(tx, 0).owned_output();
                assert_eq!(owned.x, edge, "scale {scale}: gap before tile {tx}");
                edge = owned.right();
            }
            assert_eq!(edge, out_w);
        }
    }

    #[test]
    fn test_single_tile_image() {
        let grid = TileGrid::with_tile_size(300, 200, 2.0, 512).unwrap();
        assert_eq!(grid.total_tiles(), 1);
        let tile = grid.tile(0, 0);
        assert_eq!(tile.source, Rect::new(0, 0, 300, 200));
        assert_eq!(tile.owned_output(), Rect::new(0, 0, 600, 400));
    }

    #[test]
    fn test_rejects_degenerate_inputs() {
        assert!(TileGrid::new(0, 100, 2.0).is_err());
        assert!(TileGrid::new(100, 100, 0.5).is_err());
    }

    #[test]
    fn test_estimated_tile_bytes_grows_with_scale() {
        let small = TileGrid::with_tile_size(4000, 4000, 2.0, 1024).unwrap();
        let large = TileGrid::with_tile_size(4000, 4000, 8.0, 1024).unwrap();
        assert!(large.estimated_tile_bytes(3) > small.estimated_tile_bytes(3));
    }
}
