use std::fmt;

use bitvec::prelude::{BitVec, Lsb0};

mod tile;
mod visibility;

pub use tile::{DeepTile, DeepTileError, TileGeometry};
pub use visibility::{Color, VisibilityCurve, VisibilityFunction, VisibilityNode};

pub const DEFAULT_TILE_SIZE: u32 = 128;
pub const DEFAULT_BUCKET_SIZE: u32 = 16;

#[inline]
pub const fn is_supported_channel_count(channels: u32) -> bool {
    channels == 1 || channels == 3
}

/// Tile grid coordinate. `x` is the tile column, `y` the tile row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TilePos {
    pub x: u32,
    pub y: u32,
}

impl TilePos {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// Image size split into fixed-size tiles. Right and bottom edge tiles are
/// reduced to whatever is left of the image.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TileGrid {
    image_width: u32,
    image_height: u32,
    tile_width: u32,
    tile_height: u32,
    tiles_per_row: u32,
    tiles_per_column: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileGridError {
    ZeroImageDimension,
    ZeroTileDimension,
    TileIndexOutOfBounds,
    PixelOutOfBounds { x: u32, y: u32 },
    TooManyTiles,
}

impl fmt::Display for TileGridError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileGridError::ZeroImageDimension => {
                write!(formatter, "image dimensions must be non-zero")
            }
            TileGridError::ZeroTileDimension => {
                write!(formatter, "tile dimensions must be non-zero")
            }
            TileGridError::TileIndexOutOfBounds => write!(formatter, "tile index out of bounds"),
            TileGridError::PixelOutOfBounds { x, y } => {
                write!(formatter, "pixel ({x}, {y}) lies outside the image")
            }
            TileGridError::TooManyTiles => write!(formatter, "tile count overflows u32"),
        }
    }
}

impl std::error::Error for TileGridError {}

impl TileGrid {
    pub fn new(
        image_width: u32,
        image_height: u32,
        tile_width: u32,
        tile_height: u32,
    ) -> Result<Self, TileGridError> {
        if image_width == 0 || image_height == 0 {
            return Err(TileGridError::ZeroImageDimension);
        }
        if tile_width == 0 || tile_height == 0 {
            return Err(TileGridError::ZeroTileDimension);
        }
        let tiles_per_row = image_width.div_ceil(tile_width);
        let tiles_per_column = image_height.div_ceil(tile_height);
        tiles_per_row
            .checked_mul(tiles_per_column)
            .ok_or(TileGridError::TooManyTiles)?;
        Ok(Self {
            image_width,
            image_height,
            tile_width,
            tile_height,
            tiles_per_row,
            tiles_per_column,
        })
    }

    pub const fn image_width(&self) -> u32 {
        self.image_width
    }

    pub const fn image_height(&self) -> u32 {
        self.image_height
    }

    pub const fn tile_width(&self) -> u32 {
        self.tile_width
    }

    pub const fn tile_height(&self) -> u32 {
        self.tile_height
    }

    pub const fn tiles_per_row(&self) -> u32 {
        self.tiles_per_row
    }

    pub const fn tiles_per_column(&self) -> u32 {
        self.tiles_per_column
    }

    pub const fn max_tiles(&self) -> usize {
        self.tiles_per_row as usize * self.tiles_per_column as usize
    }

    pub fn tile_index(&self, tile: TilePos) -> Result<usize, TileGridError> {
        if tile.x >= self.tiles_per_row || tile.y >= self.tiles_per_column {
            Err(TileGridError::TileIndexOutOfBounds)
        } else {
            Ok(tile.y as usize * self.tiles_per_row as usize + tile.x as usize)
        }
    }

    pub fn tile_pos(&self, index: usize) -> Result<TilePos, TileGridError> {
        if index >= self.max_tiles() {
            Err(TileGridError::TileIndexOutOfBounds)
        } else {
            let x = index % self.tiles_per_row as usize;
            let y = index / self.tiles_per_row as usize;
            Ok(TilePos {
                x: x as u32,
                y: y as u32,
            })
        }
    }

    pub fn contains_pixel(&self, x: u32, y: u32) -> bool {
        x < self.image_width && y < self.image_height
    }

    /// Tile owning pixel `(x, y)`, clamped to the last row and column.
    pub fn tile_for_pixel(&self, x: u32, y: u32) -> Result<TilePos, TileGridError> {
        if !self.contains_pixel(x, y) {
            return Err(TileGridError::PixelOutOfBounds { x, y });
        }
        Ok(TilePos {
            x: (x / self.tile_width).min(self.tiles_per_row - 1),
            y: (y / self.tile_height).min(self.tiles_per_column - 1),
        })
    }

    pub fn tile_geometry(&self, tile: TilePos) -> Result<TileGeometry, TileGridError> {
        self.tile_index(tile)?;
        let origin_x = tile.x * self.tile_width;
        let origin_y = tile.y * self.tile_height;
        Ok(TileGeometry {
            pos: tile,
            origin_x,
            origin_y,
            width: self.tile_width.min(self.image_width - origin_x),
            height: self.tile_height.min(self.image_height - origin_y),
        })
    }

    pub fn iter_tiles(&self) -> impl Iterator<Item = TilePos> + '_ {
        (0..self.tiles_per_column)
            .flat_map(move |y| (0..self.tiles_per_row).map(move |x| TilePos { x, y }))
    }
}

/// One bit per tile of a grid with a running count of set bits.
#[derive(Debug, Clone)]
pub struct TileBitmap {
    // bits.len() == grid.max_tiles()
    grid: TileGrid,
    bits: BitVec<usize, Lsb0>,
    set_count: usize,
}

impl TileBitmap {
    pub fn new(grid: TileGrid) -> Self {
        Self {
            grid,
            bits: BitVec::repeat(false, grid.max_tiles()),
            set_count: 0,
        }
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    pub fn get(&self, tile: TilePos) -> Result<bool, TileGridError> {
        let index = self.grid.tile_index(tile)?;
        Ok(self.bits[index])
    }

    /// Marks `tile`; returns whether it was already marked.
    pub fn set(&mut self, tile: TilePos) -> Result<bool, TileGridError> {
        let index = self.grid.tile_index(tile)?;
        let was_set = self.bits[index];
        self.bits.set(index, true);
        self.set_count += !was_set as usize;
        Ok(was_set)
    }

    pub fn set_count(&self) -> usize {
        self.set_count
    }

    pub fn is_full(&self) -> bool {
        self.set_count == self.grid.max_tiles()
    }

    pub fn iter_unset(&self) -> impl Iterator<Item = TilePos> + '_ {
        self.bits.iter_zeros().map(|index| {
            self.grid
                .tile_pos(index)
                .unwrap_or_else(|_| panic!("bitmap index {index} outside its own grid"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{TileBitmap, TileGrid, TileGridError, TilePos};

    #[test]
    fn edge_tiles_are_reduced_to_remaining_pixels() {
        let grid = TileGrid::new(300, 300, 128, 128).expect("grid");
        assert_eq!(grid.tiles_per_row(), 3);
        assert_eq!(grid.tiles_per_column(), 3);
        assert_eq!(grid.max_tiles(), 9);

        let edge = grid.tile_geometry(TilePos::new(2, 1)).expect("edge tile");
        assert_eq!(edge.origin_x, 256);
        assert_eq!(edge.origin_y, 128);
        assert_eq!(edge.width, 44);
        assert_eq!(edge.height, 128);

        let corner = grid.tile_geometry(TilePos::new(2, 2)).expect("corner tile");
        assert_eq!((corner.width, corner.height), (44, 44));
    }

    #[test]
    fn tile_for_pixel_maps_into_owning_tile() {
        let grid = TileGrid::new(300, 200, 128, 64).expect("grid");
        assert_eq!(grid.tile_for_pixel(0, 0), Ok(TilePos::new(0, 0)));
        assert_eq!(grid.tile_for_pixel(299, 199), Ok(TilePos::new(2, 3)));
        assert_eq!(grid.tile_for_pixel(128, 64), Ok(TilePos::new(1, 1)));
        assert_eq!(
            grid.tile_for_pixel(300, 0),
            Err(TileGridError::PixelOutOfBounds { x: 300, y: 0 })
        );
    }

    #[test]
    fn tile_index_round_trips_through_tile_pos() {
        let grid = TileGrid::new(513, 257, 128, 128).expect("grid");
        for index in 0..grid.max_tiles() {
            let pos = grid.tile_pos(index).expect("tile pos");
            assert_eq!(grid.tile_index(pos), Ok(index));
        }
        assert_eq!(
            grid.tile_pos(grid.max_tiles()),
            Err(TileGridError::TileIndexOutOfBounds)
        );
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        assert_eq!(
            TileGrid::new(0, 10, 16, 16),
            Err(TileGridError::ZeroImageDimension)
        );
        assert_eq!(
            TileGrid::new(10, 10, 16, 0),
            Err(TileGridError::ZeroTileDimension)
        );
    }

    #[test]
    fn bitmap_counts_each_tile_once() {
        let grid = TileGrid::new(64, 32, 32, 32).expect("grid");
        let mut bitmap = TileBitmap::new(grid);
        assert_eq!(bitmap.set(TilePos::new(1, 0)), Ok(false));
        assert_eq!(bitmap.set(TilePos::new(1, 0)), Ok(true));
        assert_eq!(bitmap.set_count(), 1);
        assert!(!bitmap.is_full());
        assert_eq!(bitmap.iter_unset().collect::<Vec<_>>(), vec![TilePos::new(0, 0)]);
        bitmap.set(TilePos::new(0, 0)).expect("set");
        assert!(bitmap.is_full());
    }
}
