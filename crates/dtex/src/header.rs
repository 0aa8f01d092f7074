use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use model::{TileGrid, is_supported_channel_count};
use static_assertions::const_assert_eq;

use crate::error::{DeepReadError, DtexFormatError};

pub const MAGIC: [u8; 8] = [0x89, b'A', b'q', b'D', 0x0b, 0x0a, 0x16, 0x0a];

const HEADER_U32_FIELDS: usize = 8;
const MATRIX_ELEMENTS: usize = 16;

pub const HEADER_SIZE: usize = MAGIC.len() + HEADER_U32_FIELDS * 4 + 2 * MATRIX_ELEMENTS * 4;
const_assert_eq!(HEADER_SIZE, 168);

pub(crate) const FILE_SIZE_OFFSET: u64 = MAGIC.len() as u64;
pub(crate) const DATA_SIZE_OFFSET: u64 = MAGIC.len() as u64 + 4 * 4;

/// Row-major 4x4 matrices recorded by the renderer for this map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transforms {
    pub world_to_screen: [f32; MATRIX_ELEMENTS],
    pub world_to_camera: [f32; MATRIX_ELEMENTS],
}

const IDENTITY: [f32; MATRIX_ELEMENTS] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

impl Transforms {
    pub const IDENTITY: Transforms = Transforms {
        world_to_screen: IDENTITY,
        world_to_camera: IDENTITY,
    };
}

impl Default for Transforms {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DtexHeader {
    pub file_size: u32,
    pub image_width: u32,
    pub image_height: u32,
    pub channels: u32,
    pub data_size: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub tile_count: u32,
    pub transforms: Transforms,
}

impl DtexHeader {
    /// Header for a file not yet finished: sizes stay zero until patched.
    pub fn new(grid: &TileGrid, channels: u32, transforms: Transforms) -> Self {
        Self {
            file_size: 0,
            image_width: grid.image_width(),
            image_height: grid.image_height(),
            channels,
            data_size: 0,
            tile_width: grid.tile_width(),
            tile_height: grid.tile_height(),
            tile_count: grid.max_tiles() as u32,
            transforms,
        }
    }

    /// Checks the header invariants and returns its tile grid.
    pub fn grid(&self) -> Result<TileGrid, DtexFormatError> {
        if !is_supported_channel_count(self.channels) {
            return Err(DtexFormatError::UnsupportedChannelCount(self.channels));
        }
        let grid = TileGrid::new(
            self.image_width,
            self.image_height,
            self.tile_width,
            self.tile_height,
        )
        .map_err(|_| DtexFormatError::ZeroDimension)?;
        let expected = grid.max_tiles() as u32;
        if expected != self.tile_count {
            return Err(DtexFormatError::TileCountMismatch {
                expected,
                actual: self.tile_count,
            });
        }
        Ok(grid)
    }

    /// First byte after the header and the tile table.
    pub fn data_start(&self) -> u64 {
        HEADER_SIZE as u64 + self.tile_count as u64 * crate::TABLE_ENTRY_SIZE as u64
    }

    pub fn encode<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&MAGIC)?;
        for field in [
            self.file_size,
            self.image_width,
            self.image_height,
            self.channels,
            self.data_size,
            self.tile_width,
            self.tile_height,
            self.tile_count,
        ] {
            writer.write_u32::<LittleEndian>(field)?;
        }
        for value in self
            .transforms
            .world_to_screen
            .iter()
            .chain(self.transforms.world_to_camera.iter())
        {
            writer.write_f32::<LittleEndian>(*value)?;
        }
        Ok(())
    }

    /// Decodes the fixed-size header. Only the magic is checked here; call
    /// [`DtexHeader::grid`] for the remaining invariants.
    pub fn decode<R: Read>(reader: &mut R) -> Result<Self, DeepReadError> {
        let truncated = || DeepReadError::truncated_in("header");
        let mut magic = [0u8; MAGIC.len()];
        reader.read_exact(&mut magic).map_err(truncated())?;
        if magic != MAGIC {
            return Err(DtexFormatError::BadMagic.into());
        }
        let mut fields = [0u32; HEADER_U32_FIELDS];
        reader
            .read_u32_into::<LittleEndian>(&mut fields)
            .map_err(truncated())?;
        let mut world_to_screen = [0f32; MATRIX_ELEMENTS];
        let mut world_to_camera = [0f32; MATRIX_ELEMENTS];
        reader
            .read_f32_into::<LittleEndian>(&mut world_to_screen)
            .map_err(truncated())?;
        reader
            .read_f32_into::<LittleEndian>(&mut world_to_camera)
            .map_err(truncated())?;
        let [
            file_size,
            image_width,
            image_height,
            channels,
            data_size,
            tile_width,
            tile_height,
            tile_count,
        ] = fields;
        Ok(Self {
            file_size,
            image_width,
            image_height,
            channels,
            data_size,
            tile_width,
            tile_height,
            tile_count,
            transforms: Transforms {
                world_to_screen,
                world_to_camera,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use model::TileGrid;

    use super::{DATA_SIZE_OFFSET, DtexHeader, FILE_SIZE_OFFSET, HEADER_SIZE, MAGIC, Transforms};
    use crate::error::{DeepReadError, DtexFormatError};

    fn sample_header() -> DtexHeader {
        let grid = TileGrid::new(300, 200, 128, 64).expect("grid");
        let mut transforms = Transforms::IDENTITY;
        transforms.world_to_screen[3] = 2.5;
        transforms.world_to_camera[14] = -7.0;
        let mut header = DtexHeader::new(&grid, 3, transforms);
        header.file_size = 4096;
        header.data_size = 1000;
        header
    }

    #[test]
    fn header_round_trips_bit_exact() {
        let header = sample_header();
        let mut bytes = Vec::new();
        header.encode(&mut bytes).expect("encode");
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(&bytes[..8], &MAGIC);

        let decoded = DtexHeader::decode(&mut Cursor::new(&bytes)).expect("decode");
        assert_eq!(decoded, header);
        let grid = decoded.grid().expect("grid");
        assert_eq!(grid.max_tiles(), 12);

        let mut again = Vec::new();
        decoded.encode(&mut again).expect("encode");
        assert_eq!(again, bytes);
    }

    #[test]
    fn size_fields_sit_at_patch_offsets() {
        let header = sample_header();
        let mut bytes = Vec::new();
        header.encode(&mut bytes).expect("encode");
        let read_u32 = |offset: u64| {
            let offset = offset as usize;
            u32::from_le_bytes(bytes[offset..offset + 4].try_into().expect("4 bytes"))
        };
        assert_eq!(read_u32(FILE_SIZE_OFFSET), 4096);
        assert_eq!(read_u32(DATA_SIZE_OFFSET), 1000);
    }

    #[test]
    fn bad_magic_is_a_format_error() {
        let mut bytes = Vec::new();
        sample_header().encode(&mut bytes).expect("encode");
        bytes[1] = b'X';
        match DtexHeader::decode(&mut Cursor::new(&bytes)) {
            Err(DeepReadError::Format(DtexFormatError::BadMagic)) => {}
            other => panic!("expected bad magic, got {other:?}"),
        }
    }

    #[test]
    fn short_header_is_truncated() {
        let mut bytes = Vec::new();
        sample_header().encode(&mut bytes).expect("encode");
        bytes.truncate(40);
        match DtexHeader::decode(&mut Cursor::new(&bytes)) {
            Err(DeepReadError::Format(DtexFormatError::Truncated { what: "header" })) => {}
            other => panic!("expected truncated header, got {other:?}"),
        }
    }

    #[test]
    fn inconsistent_tile_count_is_rejected() {
        let mut header = sample_header();
        header.tile_count = 5;
        assert_eq!(
            header.grid(),
            Err(DtexFormatError::TileCountMismatch {
                expected: 12,
                actual: 5
            })
        );
        header.tile_count = 12;
        header.channels = 4;
        assert_eq!(
            header.grid(),
            Err(DtexFormatError::UnsupportedChannelCount(4))
        );
    }
}
