use std::fmt;
use std::io;

use model::{DeepTileError, TileGridError, TilePos};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtexFormatError {
    BadMagic,
    Truncated { what: &'static str },
    ZeroDimension,
    UnsupportedChannelCount(u32),
    TileCountMismatch { expected: u32, actual: u32 },
    FileSizeMismatch { header: u32, actual: u64 },
    TableEntryOutOfRange { row: u32, col: u32 },
    DuplicateTableEntry { row: u32, col: u32 },
    OffsetInsideHeader { offset: u32 },
    TileExceedsFile { pos: TilePos },
    InvalidTile(DeepTileError),
}

impl fmt::Display for DtexFormatError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DtexFormatError::BadMagic => write!(formatter, "not a deep texture file (bad magic)"),
            DtexFormatError::Truncated { what } => write!(formatter, "file truncated in {what}"),
            DtexFormatError::ZeroDimension => {
                write!(formatter, "header has a zero image or tile dimension")
            }
            DtexFormatError::UnsupportedChannelCount(channels) => {
                write!(formatter, "unsupported channel count {channels}")
            }
            DtexFormatError::TileCountMismatch { expected, actual } => write!(
                formatter,
                "header declares {actual} tiles but the image needs {expected}"
            ),
            DtexFormatError::FileSizeMismatch { header, actual } => write!(
                formatter,
                "header file size {header} does not match actual size {actual}"
            ),
            DtexFormatError::TableEntryOutOfRange { row, col } => {
                write!(formatter, "table entry for tile ({row}, {col}) is outside the grid")
            }
            DtexFormatError::DuplicateTableEntry { row, col } => {
                write!(formatter, "tile ({row}, {col}) appears twice in the table")
            }
            DtexFormatError::OffsetInsideHeader { offset } => {
                write!(formatter, "tile offset {offset} points into the header or table")
            }
            DtexFormatError::TileExceedsFile { pos } => write!(
                formatter,
                "tile ({}, {}) extends past the end of the file",
                pos.y, pos.x
            ),
            DtexFormatError::InvalidTile(error) => write!(formatter, "invalid tile data: {error}"),
        }
    }
}

impl std::error::Error for DtexFormatError {}

impl From<DeepTileError> for DtexFormatError {
    fn from(error: DeepTileError) -> Self {
        DtexFormatError::InvalidTile(error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeepWriterConfigError {
    ZeroDimension,
    UnsupportedChannelCount(u32),
    TileNotMultipleOfBucket {
        tile_width: u32,
        tile_height: u32,
        bucket_width: u32,
        bucket_height: u32,
    },
    Grid(TileGridError),
}

impl fmt::Display for DeepWriterConfigError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeepWriterConfigError::ZeroDimension => {
                write!(formatter, "image, tile and bucket dimensions must be non-zero")
            }
            DeepWriterConfigError::UnsupportedChannelCount(channels) => {
                write!(formatter, "unsupported channel count {channels}")
            }
            DeepWriterConfigError::TileNotMultipleOfBucket {
                tile_width,
                tile_height,
                bucket_width,
                bucket_height,
            } => write!(
                formatter,
                "tile size {tile_width}x{tile_height} is not a multiple of bucket size {bucket_width}x{bucket_height}"
            ),
            DeepWriterConfigError::Grid(error) => write!(formatter, "{error}"),
        }
    }
}

impl std::error::Error for DeepWriterConfigError {}

impl From<TileGridError> for DeepWriterConfigError {
    fn from(error: TileGridError) -> Self {
        DeepWriterConfigError::Grid(error)
    }
}

#[derive(Debug)]
pub enum DeepWriteError {
    Config(DeepWriterConfigError),
    Io {
        context: &'static str,
        source: io::Error,
    },
    TileMismatch {
        pos: TilePos,
        reason: &'static str,
    },
    TileOutsideGrid(TilePos),
    DuplicateTile(TilePos),
    FileTooLarge,
    AlreadyFinished,
}

impl DeepWriteError {
    pub(crate) fn io(context: &'static str) -> impl FnOnce(io::Error) -> DeepWriteError {
        move |source| DeepWriteError::Io { context, source }
    }
}

impl fmt::Display for DeepWriteError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeepWriteError::Config(error) => write!(formatter, "invalid writer config: {error}"),
            DeepWriteError::Io { context, source } => {
                write!(formatter, "i/o error while {context}: {source}")
            }
            DeepWriteError::TileMismatch { pos, reason } => {
                write!(formatter, "tile ({}, {}) rejected: {reason}", pos.y, pos.x)
            }
            DeepWriteError::TileOutsideGrid(pos) => {
                write!(formatter, "tile ({}, {}) is outside the image", pos.y, pos.x)
            }
            DeepWriteError::DuplicateTile(pos) => {
                write!(formatter, "tile ({}, {}) was already submitted", pos.y, pos.x)
            }
            DeepWriteError::FileTooLarge => {
                write!(formatter, "deep texture exceeds the 32-bit offset range")
            }
            DeepWriteError::AlreadyFinished => write!(formatter, "writer already finished"),
        }
    }
}

impl std::error::Error for DeepWriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DeepWriteError::Config(error) => Some(error),
            DeepWriteError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<DeepWriterConfigError> for DeepWriteError {
    fn from(error: DeepWriterConfigError) -> Self {
        DeepWriteError::Config(error)
    }
}

#[derive(Debug)]
pub enum DeepReadError {
    Io(io::Error),
    Format(DtexFormatError),
    Grid(TileGridError),
}

impl DeepReadError {
    /// Maps a short read to a format error naming the section being read.
    pub(crate) fn truncated_in(what: &'static str) -> impl FnOnce(io::Error) -> DeepReadError {
        move |error| {
            if error.kind() == io::ErrorKind::UnexpectedEof {
                DeepReadError::Format(DtexFormatError::Truncated { what })
            } else {
                DeepReadError::Io(error)
            }
        }
    }
}

impl fmt::Display for DeepReadError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeepReadError::Io(error) => write!(formatter, "i/o error: {error}"),
            DeepReadError::Format(error) => write!(formatter, "format error: {error}"),
            DeepReadError::Grid(error) => write!(formatter, "{error}"),
        }
    }
}

impl std::error::Error for DeepReadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DeepReadError::Io(error) => Some(error),
            DeepReadError::Format(error) => Some(error),
            DeepReadError::Grid(error) => Some(error),
        }
    }
}

impl From<io::Error> for DeepReadError {
    fn from(error: io::Error) -> Self {
        DeepReadError::Io(error)
    }
}

impl From<DtexFormatError> for DeepReadError {
    fn from(error: DtexFormatError) -> Self {
        DeepReadError::Format(error)
    }
}

impl From<TileGridError> for DeepReadError {
    fn from(error: TileGridError) -> Self {
        DeepReadError::Grid(error)
    }
}
