//! Tile grid layout for one image.
//!
//! Every tile covers a `tile_width x tile_height` window of the image except
//! the last column and row, which cover whatever is left. A tile's texture
//! (its physical size) can be larger than what it covers; the difference is
//! padding filled by edge replication at upload time.

use mosaic_core::ImageFlags;

use crate::planner::TilePlanner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileLayout {
    pub col: u32,
    pub row: u32,
    /// Image-space origin of the covered window.
    pub x: u32,
    pub y: u32,
    pub covered_width: u32,
    pub covered_height: u32,
    /// Physical texture size.
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TileGrid {
    image_width: u32,
    image_height: u32,
    tile_width: u32,
    tile_height: u32,
    grid_width: u32,
    grid_height: u32,
    max_u: f32,
    max_v: f32,
    tiles: Vec<TileLayout>,
}

impl TileGrid {
    pub fn build(
        planner: &TilePlanner,
        image_width: u32,
        image_height: u32,
        flags: ImageFlags,
        use_pow2: bool,
    ) -> Self {
        let (tile_width, tile_height) =
            planner.plan_tile_size(image_width, image_height, false, use_pow2, flags);

        let right_remainder = image_width % tile_width;
        let (right_width, right_height) = if right_remainder > 0 {
            planner.plan_tile_size(right_remainder, tile_height, true, use_pow2, flags)
        } else {
            (tile_width, tile_height)
        };

        let bottom_remainder = image_height % tile_height;
        let (bottom_width, bottom_height) = if bottom_remainder > 0 {
            planner.plan_tile_size(tile_width, bottom_remainder, true, use_pow2, flags)
        } else {
            (tile_width, tile_height)
        };

        let (corner_width, corner_height) =
            planner.plan_tile_size(right_width, bottom_height, true, use_pow2, flags);

        let grid_width = image_width.div_ceil(tile_width);
        let grid_height = image_height.div_ceil(tile_height);

        let mut tiles = Vec::with_capacity((grid_width * grid_height) as usize);
        for row in 0..grid_height {
            for col in 0..grid_width {
                let x = col * tile_width;
                let y = row * tile_height;
                let last_col = col + 1 == grid_width;
                let last_row = row + 1 == grid_height;
                let (width, height) = match (last_col, last_row) {
                    (true, true) => (corner_width, corner_height),
                    (true, false) => (right_width, right_height),
                    (false, true) => (bottom_width, bottom_height),
                    (false, false) => (tile_width, tile_height),
                };
                tiles.push(TileLayout {
                    col,
                    row,
                    x,
                    y,
                    covered_width: tile_width.min(image_width - x),
                    covered_height: tile_height.min(image_height - y),
                    width,
                    height,
                });
            }
        }

        Self {
            image_width,
            image_height,
            tile_width,
            tile_height,
            grid_width,
            grid_height,
            max_u: image_width as f32 / tile_width as f32,
            max_v: image_height as f32 / tile_height as f32,
            tiles,
        }
    }

    pub fn image_size(&self) -> (u32, u32) {
        (self.image_width, self.image_height)
    }

    /// Nominal (interior) tile size.
    pub fn tile_size(&self) -> (u32, u32) {
        (self.tile_width, self.tile_height)
    }

    /// Tile counts across and down.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.grid_width, self.grid_height)
    }

    /// Image extent in nominal-tile units.
    pub fn max_uv(&self) -> (f32, f32) {
        (self.max_u, self.max_v)
    }

    pub fn tiles(&self) -> &[TileLayout] {
        &self.tiles
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn index(&self, col: u32, row: u32) -> usize {
        (row * self.grid_width + col) as usize
    }

    pub fn tile(&self, col: u32, row: u32) -> Option<&TileLayout> {
        if col >= self.grid_width || row >= self.grid_height {
            return None;
        }
        self.tiles.get(self.index(col, row))
    }

    /// Index of the tile covering image pixel `(x, y)`.
    pub fn locate(&self, x: u32, y: u32) -> Option<usize> {
        if x >= self.image_width || y >= self.image_height {
            return None;
        }
        Some(self.index(x / self.tile_width, y / self.tile_height))
    }

    /// Nominal-to-physical ratio of tile `index`; 1.0 for interior tiles.
    pub fn uv_scale(&self, index: usize) -> (f32, f32) {
        match self.tiles.get(index) {
            Some(tile) => (
                self.tile_width as f32 / tile.width as f32,
                self.tile_height as f32 / tile.height as f32,
            ),
            None => (1.0, 1.0),
        }
    }
}
