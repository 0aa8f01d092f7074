use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use model::{TileBitmap, TileGrid, TilePos};
use static_assertions::const_assert_eq;

use crate::error::{DeepReadError, DtexFormatError};

pub const TABLE_ENTRY_SIZE: usize = 3 * 4;
const_assert_eq!(TABLE_ENTRY_SIZE, 12);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileTableEntry {
    pub tile_row: u32,
    pub tile_col: u32,
    /// Zero for a tile that was elided.
    pub file_offset: u32,
}

impl TileTableEntry {
    pub fn pos(&self) -> TilePos {
        TilePos::new(self.tile_col, self.tile_row)
    }

    pub fn encode<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.tile_row)?;
        writer.write_u32::<LittleEndian>(self.tile_col)?;
        writer.write_u32::<LittleEndian>(self.file_offset)
    }

    pub fn decode<R: Read>(reader: &mut R) -> Result<Self, DeepReadError> {
        let mut fields = [0u32; 3];
        reader
            .read_u32_into::<LittleEndian>(&mut fields)
            .map_err(DeepReadError::truncated_in("tile table"))?;
        let [tile_row, tile_col, file_offset] = fields;
        Ok(Self {
            tile_row,
            tile_col,
            file_offset,
        })
    }
}

/// File offset of every tile, indexed row-major over the grid.
#[derive(Debug, Clone)]
pub struct TileTable {
    grid: TileGrid,
    offsets: Box<[u32]>,
}

impl TileTable {
    /// Every tile starts out elided.
    pub fn new(grid: TileGrid) -> Self {
        Self {
            grid,
            offsets: vec![0; grid.max_tiles()].into_boxed_slice(),
        }
    }

    /// Builds the table from decoded entries. Each tile must appear exactly
    /// once and non-zero offsets must point past `data_start`.
    pub fn from_entries(
        grid: TileGrid,
        entries: impl IntoIterator<Item = TileTableEntry>,
        data_start: u64,
    ) -> Result<Self, DtexFormatError> {
        let mut table = Self::new(grid);
        let mut seen = TileBitmap::new(grid);
        for entry in entries {
            let out_of_range = DtexFormatError::TableEntryOutOfRange {
                row: entry.tile_row,
                col: entry.tile_col,
            };
            let index = grid.tile_index(entry.pos()).map_err(|_| out_of_range)?;
            if seen.set(entry.pos()).map_err(|_| out_of_range)? {
                return Err(DtexFormatError::DuplicateTableEntry {
                    row: entry.tile_row,
                    col: entry.tile_col,
                });
            }
            if entry.file_offset != 0 && (entry.file_offset as u64) < data_start {
                return Err(DtexFormatError::OffsetInsideHeader {
                    offset: entry.file_offset,
                });
            }
            table.offsets[index] = entry.file_offset;
        }
        Ok(table)
    }

    /// Encoded size of a table covering `grid`.
    pub fn encoded_size(grid: &TileGrid) -> u64 {
        grid.max_tiles() as u64 * TABLE_ENTRY_SIZE as u64
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    pub fn offset(&self, pos: TilePos) -> Option<u32> {
        let index = self.grid.tile_index(pos).ok()?;
        Some(self.offsets[index])
    }

    pub(crate) fn set(&mut self, pos: TilePos, offset: u32) {
        let index = self
            .grid
            .tile_index(pos)
            .unwrap_or_else(|_| panic!("tile ({}, {}) outside table grid", pos.y, pos.x));
        self.offsets[index] = offset;
    }

    pub fn elided_count(&self) -> usize {
        self.offsets.iter().filter(|offset| **offset == 0).count()
    }

    pub fn entries(&self) -> impl Iterator<Item = TileTableEntry> + '_ {
        self.offsets.iter().enumerate().map(|(index, offset)| {
            let pos = self
                .grid
                .tile_pos(index)
                .unwrap_or_else(|_| panic!("table index {index} outside its grid"));
            TileTableEntry {
                tile_row: pos.y,
                tile_col: pos.x,
                file_offset: *offset,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use model::{TileGrid, TilePos};

    use super::{TABLE_ENTRY_SIZE, TileTable, TileTableEntry};
    use crate::error::DtexFormatError;

    fn grid() -> TileGrid {
        TileGrid::new(256, 128, 128, 128).expect("grid")
    }

    fn entry(row: u32, col: u32, offset: u32) -> TileTableEntry {
        TileTableEntry {
            tile_row: row,
            tile_col: col,
            file_offset: offset,
        }
    }

    #[test]
    fn entry_encodes_row_col_offset() {
        let mut bytes = Vec::new();
        entry(2, 7, 0x0102_0304).encode(&mut bytes).expect("encode");
        assert_eq!(bytes.len(), TABLE_ENTRY_SIZE);
        assert_eq!(&bytes[..4], &2u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &7u32.to_le_bytes());
        assert_eq!(
            TileTableEntry::decode(&mut Cursor::new(&bytes)).expect("decode"),
            entry(2, 7, 0x0102_0304)
        );
    }

    #[test]
    fn entries_in_any_order_build_the_grid() {
        let table = TileTable::from_entries(grid(), [entry(0, 1, 500), entry(0, 0, 0)], 200)
            .expect("table");
        assert_eq!(table.offset(TilePos::new(0, 0)), Some(0));
        assert_eq!(table.offset(TilePos::new(1, 0)), Some(500));
        assert_eq!(table.offset(TilePos::new(2, 0)), None);
        assert_eq!(table.elided_count(), 1);
        assert_eq!(
            table.entries().collect::<Vec<_>>(),
            vec![entry(0, 0, 0), entry(0, 1, 500)]
        );
    }

    #[test]
    fn malformed_entries_are_format_errors() {
        assert_eq!(
            TileTable::from_entries(grid(), [entry(1, 0, 0)], 200).err(),
            Some(DtexFormatError::TableEntryOutOfRange { row: 1, col: 0 })
        );
        assert_eq!(
            TileTable::from_entries(grid(), [entry(0, 0, 0), entry(0, 0, 300)], 200).err(),
            Some(DtexFormatError::DuplicateTableEntry { row: 0, col: 0 })
        );
        assert_eq!(
            TileTable::from_entries(grid(), [entry(0, 0, 100)], 200).err(),
            Some(DtexFormatError::OffsetInsideHeader { offset: 100 })
        );
    }
}
