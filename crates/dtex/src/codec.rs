use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use model::{DeepTile, TileGeometry};

use crate::error::{DeepReadError, DtexFormatError};

/// Bytes `encode_tile` will produce for `tile`.
pub fn encoded_tile_size(tile: &DeepTile) -> u64 {
    (tile.function_offsets().len() as u64 + tile.nodes().len() as u64) * 4
}

pub fn encode_tile<W: Write>(tile: &DeepTile, writer: &mut W) -> io::Result<()> {
    for offset in tile.function_offsets() {
        writer.write_u32::<LittleEndian>(*offset)?;
    }
    for value in tile.nodes() {
        writer.write_f32::<LittleEndian>(*value)?;
    }
    Ok(())
}

/// Decodes one tile block. The offsets array length comes from `geometry`;
/// its final entry gives the node count. `available` bounds how many bytes
/// the block may occupy so corrupt counts cannot trigger huge allocations.
pub fn decode_tile<R: Read>(
    reader: &mut R,
    geometry: TileGeometry,
    channels: u32,
    available: u64,
) -> Result<DeepTile, DeepReadError> {
    let exceeds = || DeepReadError::Format(DtexFormatError::TileExceedsFile { pos: geometry.pos });
    let offset_count = geometry.pixel_count() + 1;
    let offsets_bytes = offset_count as u64 * 4;
    if offsets_bytes > available {
        return Err(exceeds());
    }
    let mut function_offsets = vec![0u32; offset_count];
    reader
        .read_u32_into::<LittleEndian>(&mut function_offsets)
        .map_err(DeepReadError::truncated_in("tile offsets"))?;

    let total_nodes = function_offsets[offset_count - 1] as u64;
    let node_values = total_nodes * (channels as u64 + 1);
    if offsets_bytes + node_values * 4 > available {
        return Err(exceeds());
    }
    let mut nodes = vec![0f32; node_values as usize];
    reader
        .read_f32_into::<LittleEndian>(&mut nodes)
        .map_err(DeepReadError::truncated_in("tile nodes"))?;

    DeepTile::new(geometry, channels, function_offsets, nodes)
        .map_err(|error| DeepReadError::Format(error.into()))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use model::{DeepTile, DeepTileError, TileGeometry, TilePos};

    use super::{decode_tile, encode_tile, encoded_tile_size};
    use crate::error::{DeepReadError, DtexFormatError};

    fn geometry() -> TileGeometry {
        TileGeometry {
            pos: TilePos::new(0, 0),
            origin_x: 0,
            origin_y: 0,
            width: 2,
            height: 2,
        }
    }

    fn shadowed_tile() -> DeepTile {
        let offsets = vec![0, 1, 3, 4, 6];
        let nodes = vec![
            0.0, 1.0, //
            0.0, 1.0, 2.0, 0.0, //
            0.0, 1.0, //
            0.0, 1.0, 3.5, 0.5,
        ];
        DeepTile::new(geometry(), 1, offsets, nodes).expect("tile")
    }

    #[test]
    fn tile_round_trips() {
        let tile = shadowed_tile();
        let mut bytes = Vec::new();
        encode_tile(&tile, &mut bytes).expect("encode");
        assert_eq!(bytes.len() as u64, encoded_tile_size(&tile));
        assert_eq!(bytes.len(), (5 + 12) * 4);

        let decoded = decode_tile(&mut Cursor::new(&bytes), geometry(), 1, bytes.len() as u64)
            .expect("decode");
        assert_eq!(decoded, tile);
    }

    #[test]
    fn node_count_past_available_bytes_is_rejected() {
        let mut bytes = Vec::new();
        encode_tile(&shadowed_tile(), &mut bytes).expect("encode");
        match decode_tile(&mut Cursor::new(&bytes), geometry(), 1, 40) {
            Err(DeepReadError::Format(DtexFormatError::TileExceedsFile { .. })) => {}
            other => panic!("expected tile past end of file, got {other:?}"),
        }
    }

    #[test]
    fn decreasing_offsets_are_invalid_tiles() {
        let mut bytes = Vec::new();
        for offset in [0u32, 2, 1, 3, 3] {
            bytes.extend_from_slice(&offset.to_le_bytes());
        }
        for _ in 0..6 {
            bytes.extend_from_slice(&0f32.to_le_bytes());
        }
        match decode_tile(&mut Cursor::new(&bytes), geometry(), 1, bytes.len() as u64) {
            Err(DeepReadError::Format(DtexFormatError::InvalidTile(
                DeepTileError::OffsetsDecreasing { index: 2 },
            ))) => {}
            other => panic!("expected decreasing offsets, got {other:?}"),
        }
    }
}
