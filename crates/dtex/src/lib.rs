//! Tiled deep-texture file format (`.dtex`).
//!
//! Layout: fixed header, a table with one entry per tile, then tile blocks in
//! completion order. A tile block is the prefix-sum function offsets followed
//! by the flat node array. A table offset of zero marks a tile that was never
//! written because every pixel in it is fully visible.

mod codec;
mod error;
mod header;
mod reader;
mod table;
mod writer;

pub use codec::{decode_tile, encode_tile, encoded_tile_size};
pub use error::{DeepReadError, DeepWriteError, DeepWriterConfigError, DtexFormatError};
pub use header::{DtexHeader, HEADER_SIZE, MAGIC, Transforms};
pub use reader::DeepReader;
pub use table::{TABLE_ENTRY_SIZE, TileTable, TileTableEntry};
pub use writer::{DeepWriter, DeepWriterConfig, WriteSummary};
