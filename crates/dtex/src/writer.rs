use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, WriteBytesExt};
use model::{
    DEFAULT_BUCKET_SIZE, DEFAULT_TILE_SIZE, DeepTile, TileBitmap, TileGrid, TilePos,
    is_supported_channel_count,
};

use crate::codec::{encode_tile, encoded_tile_size};
use crate::error::{DeepWriteError, DeepWriterConfigError};
use crate::header::{DATA_SIZE_OFFSET, DtexHeader, FILE_SIZE_OFFSET, HEADER_SIZE, Transforms};
use crate::table::TileTable;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeepWriterConfig {
    pub image_width: u32,
    pub image_height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    /// Size of the regions producers hand over; tiles must be built from
    /// whole buckets.
    pub bucket_width: u32,
    pub bucket_height: u32,
    pub channels: u32,
    pub transforms: Transforms,
}

impl DeepWriterConfig {
    pub fn new(image_width: u32, image_height: u32, channels: u32) -> Self {
        Self {
            image_width,
            image_height,
            tile_width: DEFAULT_TILE_SIZE,
            tile_height: DEFAULT_TILE_SIZE,
            bucket_width: DEFAULT_BUCKET_SIZE,
            bucket_height: DEFAULT_BUCKET_SIZE,
            channels,
            transforms: Transforms::IDENTITY,
        }
    }

    pub fn validate(&self) -> Result<TileGrid, DeepWriterConfigError> {
        if self.bucket_width == 0 || self.bucket_height == 0 {
            return Err(DeepWriterConfigError::ZeroDimension);
        }
        if !is_supported_channel_count(self.channels) {
            return Err(DeepWriterConfigError::UnsupportedChannelCount(self.channels));
        }
        let grid = TileGrid::new(
            self.image_width,
            self.image_height,
            self.tile_width,
            self.tile_height,
        )?;
        if self.tile_width % self.bucket_width != 0 || self.tile_height % self.bucket_height != 0 {
            return Err(DeepWriterConfigError::TileNotMultipleOfBucket {
                tile_width: self.tile_width,
                tile_height: self.tile_height,
                bucket_width: self.bucket_width,
                bucket_height: self.bucket_height,
            });
        }
        Ok(grid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSummary {
    pub tiles_written: u32,
    pub tiles_elided: u32,
    pub data_size: u32,
    pub file_size: u32,
}

/// Streams tiles into a new `.dtex` file.
///
/// The header goes out first with zero sizes and the table area is reserved.
/// Tiles are appended as they complete; `finish` writes the table into the
/// reserved area and patches the header sizes. Dropping an unfinished writer
/// finishes it so the file stays readable after an aborted render.
pub struct DeepWriter {
    path: PathBuf,
    file: Option<BufWriter<File>>,
    header: DtexHeader,
    grid: TileGrid,
    table: TileTable,
    submitted: TileBitmap,
    position: u64,
    data_size: u64,
    tiles_written: u32,
    tiles_elided: u32,
}

impl DeepWriter {
    /// Creates the file. An existing file at `path` is never overwritten.
    pub fn create(
        path: impl AsRef<Path>,
        config: DeepWriterConfig,
    ) -> Result<Self, DeepWriteError> {
        let path = path.as_ref().to_path_buf();
        let grid = config.validate()?;
        let header = DtexHeader::new(&grid, config.channels, config.transforms);

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(DeepWriteError::io("creating deep texture file"))?;
        let mut file = BufWriter::new(file);
        header
            .encode(&mut file)
            .map_err(DeepWriteError::io("writing header"))?;
        let table_size = TileTable::encoded_size(&grid);
        io::copy(&mut io::repeat(0).take(table_size), &mut file)
            .map_err(DeepWriteError::io("reserving tile table"))?;

        log::info!(
            "writing {} ({}x{}, {} tiles of {}x{}, {} channels)",
            path.display(),
            grid.image_width(),
            grid.image_height(),
            grid.max_tiles(),
            grid.tile_width(),
            grid.tile_height(),
            config.channels
        );
        Ok(Self {
            path,
            file: Some(file),
            position: HEADER_SIZE as u64 + table_size,
            header,
            grid,
            table: TileTable::new(grid),
            submitted: TileBitmap::new(grid),
            data_size: 0,
            tiles_written: 0,
            tiles_elided: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    pub fn channels(&self) -> u32 {
        self.header.channels
    }

    pub fn is_finished(&self) -> bool {
        self.file.is_none()
    }

    fn mark_submitted(&mut self, pos: TilePos) -> Result<(), DeepWriteError> {
        match self.submitted.set(pos) {
            Ok(false) => Ok(()),
            Ok(true) => Err(DeepWriteError::DuplicateTile(pos)),
            Err(_) => Err(DeepWriteError::TileOutsideGrid(pos)),
        }
    }

    /// Appends a finished tile. Tiles whose pixels each hold a single node
    /// are elided and recorded with offset zero.
    pub fn submit_tile(&mut self, tile: &DeepTile) -> Result<(), DeepWriteError> {
        if self.file.is_none() {
            return Err(DeepWriteError::AlreadyFinished);
        }
        let pos = tile.pos();
        let expected = self
            .grid
            .tile_geometry(pos)
            .map_err(|_| DeepWriteError::TileOutsideGrid(pos))?;
        if *tile.geometry() != expected {
            return Err(DeepWriteError::TileMismatch {
                pos,
                reason: "tile geometry does not match the image grid",
            });
        }
        if tile.channels() != self.header.channels {
            return Err(DeepWriteError::TileMismatch {
                pos,
                reason: "channel count differs from the file",
            });
        }
        if tile.is_neglectable() {
            return self.submit_neglectable(pos);
        }

        let offset = u32::try_from(self.position).map_err(|_| DeepWriteError::FileTooLarge)?;
        let size = encoded_tile_size(tile);
        if self.position + size > u32::MAX as u64 {
            return Err(DeepWriteError::FileTooLarge);
        }
        self.mark_submitted(pos)?;
        let file = self.file.as_mut().ok_or(DeepWriteError::AlreadyFinished)?;
        encode_tile(tile, file).map_err(DeepWriteError::io("writing tile"))?;
        self.position += size;
        self.data_size += size;
        self.tiles_written += 1;
        self.table.set(pos, offset);
        log::debug!(
            "tile ({}, {}) written at {offset}, {} nodes",
            pos.y,
            pos.x,
            tile.total_nodes()
        );
        Ok(())
    }

    /// Records a uniformly visible tile without writing any data.
    pub fn submit_neglectable(&mut self, pos: TilePos) -> Result<(), DeepWriteError> {
        if self.file.is_none() {
            return Err(DeepWriteError::AlreadyFinished);
        }
        self.mark_submitted(pos)?;
        self.table.set(pos, 0);
        self.tiles_elided += 1;
        log::debug!("tile ({}, {}) elided", pos.y, pos.x);
        Ok(())
    }

    /// Writes the table and patches the header sizes. Tiles never submitted
    /// are recorded as elided.
    pub fn finish(&mut self) -> Result<WriteSummary, DeepWriteError> {
        let mut file = self.file.take().ok_or(DeepWriteError::AlreadyFinished)?;
        let missing: Vec<TilePos> = self.submitted.iter_unset().collect();
        if !missing.is_empty() {
            log::warn!(
                "{} of {} tiles never arrived in {}; recording them as fully visible",
                missing.len(),
                self.grid.max_tiles(),
                self.path.display()
            );
            self.tiles_elided += missing.len() as u32;
        }

        let file_size = u32::try_from(self.position).map_err(|_| DeepWriteError::FileTooLarge)?;
        let data_size = u32::try_from(self.data_size).map_err(|_| DeepWriteError::FileTooLarge)?;

        file.seek(SeekFrom::Start(HEADER_SIZE as u64))
            .map_err(DeepWriteError::io("seeking to tile table"))?;
        for entry in self.table.entries() {
            entry
                .encode(&mut file)
                .map_err(DeepWriteError::io("writing tile table"))?;
        }
        patch_u32(&mut file, FILE_SIZE_OFFSET, file_size)
            .map_err(DeepWriteError::io("patching file size"))?;
        patch_u32(&mut file, DATA_SIZE_OFFSET, data_size)
            .map_err(DeepWriteError::io("patching data size"))?;
        file.flush()
            .map_err(DeepWriteError::io("flushing deep texture"))?;
        self.header.file_size = file_size;
        self.header.data_size = data_size;

        let summary = WriteSummary {
            tiles_written: self.tiles_written,
            tiles_elided: self.tiles_elided,
            data_size,
            file_size,
        };
        log::info!(
            "finished {}: {} tiles written, {} elided, {} bytes",
            self.path.display(),
            summary.tiles_written,
            summary.tiles_elided,
            summary.file_size
        );
        Ok(summary)
    }
}

fn patch_u32<W: Write + Seek>(writer: &mut W, offset: u64, value: u32) -> io::Result<()> {
    writer.seek(SeekFrom::Start(offset))?;
    writer.write_u32::<LittleEndian>(value)
}

impl Drop for DeepWriter {
    fn drop(&mut self) {
        if self.file.is_none() {
            return;
        }
        if let Err(error) = self.finish() {
            log::warn!("failed to finish {} on drop: {error}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use model::{DeepTile, TileGeometry, TilePos};

    use super::{DeepWriter, DeepWriterConfig};
    use crate::error::{DeepWriteError, DeepWriterConfigError};
    use crate::header::{DtexHeader, HEADER_SIZE};

    fn temp_path(name: &str) -> PathBuf {
        let path = std::env::temp_dir()
            .join(format!("dtex_writer_{name}_{}.dtex", std::process::id()));
        let _ = fs::remove_file(&path);
        path
    }

    fn config() -> DeepWriterConfig {
        let mut config = DeepWriterConfig::new(48, 16, 1);
        config.tile_width = 32;
        config.tile_height = 16;
        config.bucket_width = 16;
        config.bucket_height = 16;
        config
    }

    fn shadowed_tile(geometry: TileGeometry) -> DeepTile {
        let pixels = geometry.pixel_count();
        let mut offsets = vec![0u32];
        let mut nodes = Vec::new();
        for _ in 0..pixels {
            nodes.extend_from_slice(&[0.0, 1.0, 2.0, 1.0, 2.0, 0.0]);
            offsets.push(offsets[offsets.len() - 1] + 3);
        }
        DeepTile::new(geometry, 1, offsets, nodes).expect("tile")
    }

    #[test]
    fn config_rejects_tiles_not_built_from_buckets() {
        let mut bad = config();
        bad.tile_width = 40;
        assert_eq!(
            bad.validate(),
            Err(DeepWriterConfigError::TileNotMultipleOfBucket {
                tile_width: 40,
                tile_height: 16,
                bucket_width: 16,
                bucket_height: 16,
            })
        );
        let mut bad = config();
        bad.channels = 2;
        assert_eq!(
            bad.validate(),
            Err(DeepWriterConfigError::UnsupportedChannelCount(2))
        );
    }

    #[test]
    fn existing_file_is_not_overwritten() {
        let path = temp_path("exists");
        fs::write(&path, b"keep me").expect("seed file");
        match DeepWriter::create(&path, config()) {
            Err(DeepWriteError::Io { .. }) => {}
            Err(other) => panic!("expected i/o error, got {other}"),
            Ok(_) => panic!("existing file must not be overwritten"),
        }
        assert_eq!(fs::read(&path).expect("read"), b"keep me");
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn finish_patches_sizes_and_elides_missing_tiles() {
        let path = temp_path("finish");
        let mut writer = DeepWriter::create(&path, config()).expect("create");
        let grid = *writer.grid();
        let edge = grid.tile_geometry(TilePos::new(1, 0)).expect("edge");
        assert_eq!(edge.width, 16);
        writer.submit_tile(&shadowed_tile(edge)).expect("submit edge tile");

        let summary = writer.finish().expect("finish");
        assert_eq!(summary.tiles_written, 1);
        assert_eq!(summary.tiles_elided, 1);
        assert_eq!(summary.data_size, (16 * 16 + 1) * 4 + 16 * 16 * 3 * 2 * 4);

        let bytes = fs::read(&path).expect("read");
        assert_eq!(bytes.len() as u32, summary.file_size);
        let header = DtexHeader::decode(&mut bytes.as_slice()).expect("header");
        assert_eq!(header.file_size, summary.file_size);
        assert_eq!(header.data_size, summary.data_size);
        assert_eq!(header.tile_count, 2);
        assert_eq!(header.data_start(), HEADER_SIZE as u64 + 24);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn duplicate_and_mismatched_tiles_are_rejected() {
        let path = temp_path("duplicate");
        let mut writer = DeepWriter::create(&path, config()).expect("create");
        let grid = *writer.grid();
        let first = grid.tile_geometry(TilePos::new(0, 0)).expect("tile");
        writer.submit_tile(&shadowed_tile(first)).expect("first submit");
        match writer.submit_tile(&shadowed_tile(first)) {
            Err(DeepWriteError::DuplicateTile(pos)) => assert_eq!(pos, TilePos::new(0, 0)),
            other => panic!("expected duplicate tile, got {other:?}"),
        }

        let mut wrong = grid.tile_geometry(TilePos::new(1, 0)).expect("tile");
        wrong.width = 32;
        match writer.submit_tile(&shadowed_tile(wrong)) {
            Err(DeepWriteError::TileMismatch { .. }) => {}
            other => panic!("expected geometry mismatch, got {other:?}"),
        }
        writer.finish().expect("finish");
        match writer.submit_neglectable(TilePos::new(1, 0)) {
            Err(DeepWriteError::AlreadyFinished) => {}
            other => panic!("expected finished writer, got {other:?}"),
        }
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn dropping_an_unfinished_writer_still_patches_the_header() {
        let path = temp_path("drop");
        {
            let mut writer = DeepWriter::create(&path, config()).expect("create");
            writer
                .submit_neglectable(TilePos::new(0, 0))
                .expect("neglectable");
        }
        let bytes = fs::read(&path).expect("read");
        let header = DtexHeader::decode(&mut bytes.as_slice()).expect("header");
        assert_eq!(header.file_size as usize, bytes.len());
        assert_eq!(header.data_size, 0);
        let _ = fs::remove_file(&path);
    }
}
