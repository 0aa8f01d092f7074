use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use model::{DeepTile, TileGrid, TilePos};

use crate::codec::decode_tile;
use crate::error::{DeepReadError, DtexFormatError};
use crate::header::{DtexHeader, Transforms};
use crate::table::{TileTable, TileTableEntry};

/// Random-access reader over a finished `.dtex` file. Only the header and
/// the table are loaded up front; tiles are decoded on request.
///
/// Tile blocks are fetched with positioned reads, so loads of different
/// tiles run in parallel without sharing a file cursor.
pub struct DeepReader {
    path: PathBuf,
    header: DtexHeader,
    grid: TileGrid,
    table: TileTable,
    file_len: u64,
    /// Sorted start offsets of every stored tile block. A block ends where
    /// the next one starts, the last one at the end of the file.
    block_starts: Box<[u64]>,
    file: File,
    decodes: AtomicU64,
}

impl DeepReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DeepReadError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let file_len = file.metadata()?.len();
        let mut file = BufReader::new(file);

        let header = DtexHeader::decode(&mut file)?;
        let grid = header.grid()?;
        if header.file_size as u64 != file_len {
            return Err(DtexFormatError::FileSizeMismatch {
                header: header.file_size,
                actual: file_len,
            }
            .into());
        }
        let entries = (0..header.tile_count)
            .map(|_| TileTableEntry::decode(&mut file))
            .collect::<Result<Vec<_>, _>>()?;
        let table = TileTable::from_entries(grid, entries, header.data_start())?;
        let mut block_starts: Vec<u64> = table
            .entries()
            .filter(|entry| entry.file_offset != 0)
            .map(|entry| entry.file_offset as u64)
            .collect();
        block_starts.sort_unstable();

        log::info!(
            "opened {} ({}x{}, {} tiles, {} elided)",
            path.display(),
            grid.image_width(),
            grid.image_height(),
            grid.max_tiles(),
            table.elided_count()
        );
        Ok(Self {
            path,
            header,
            grid,
            table,
            file_len,
            block_starts: block_starts.into_boxed_slice(),
            file: file.into_inner(),
            decodes: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &DtexHeader {
        &self.header
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    pub fn table(&self) -> &TileTable {
        &self.table
    }

    pub fn channels(&self) -> u32 {
        self.header.channels
    }

    pub fn transforms(&self) -> &Transforms {
        &self.header.transforms
    }

    /// Number of tiles decoded from disk so far.
    pub fn decode_count(&self) -> u64 {
        self.decodes.load(Ordering::Relaxed)
    }

    pub fn tile_for_pixel(&self, x: u32, y: u32) -> Result<TilePos, DeepReadError> {
        Ok(self.grid.tile_for_pixel(x, y)?)
    }

    /// Loads tile `pos`. Elided tiles come back fully visible without
    /// touching the file.
    pub fn load_tile(&self, pos: TilePos) -> Result<DeepTile, DeepReadError> {
        let geometry = self.grid.tile_geometry(pos)?;
        let offset = self.table.offset(pos).unwrap_or(0) as u64;
        if offset == 0 {
            return Ok(DeepTile::fully_visible(geometry, self.header.channels));
        }
        if offset >= self.file_len {
            return Err(DtexFormatError::TileExceedsFile { pos }.into());
        }

        let mut block = vec![0u8; (self.block_end(offset) - offset) as usize];
        read_exact_at(&self.file, &mut block, offset)
            .map_err(DeepReadError::truncated_in("tile block"))?;
        let available = block.len() as u64;
        let tile = decode_tile(
            &mut block.as_slice(),
            geometry,
            self.header.channels,
            available,
        )?;
        self.decodes.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "decoded tile ({}, {}) from {}, {} nodes",
            pos.y,
            pos.x,
            self.path.display(),
            tile.total_nodes()
        );
        Ok(tile)
    }

    pub fn load_tile_for_pixel(&self, x: u32, y: u32) -> Result<DeepTile, DeepReadError> {
        self.load_tile(self.tile_for_pixel(x, y)?)
    }

    fn block_end(&self, offset: u64) -> u64 {
        let next = self.block_starts.partition_point(|start| *start <= offset);
        self.block_starts
            .get(next)
            .copied()
            .unwrap_or(self.file_len)
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buffer: &mut [u8], offset: u64) -> io::Result<()> {
    std::os::unix::fs::FileExt::read_exact_at(file, buffer, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buffer: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;

    while !buffer.is_empty() {
        match file.seek_read(buffer, offset) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(read) => {
                buffer = &mut buffer[read..];
                offset += read as u64;
            }
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(error),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use model::{Color, DeepTile, TileGrid, TilePos};

    use super::DeepReader;
    use crate::error::{DeepReadError, DtexFormatError};
    use crate::header::Transforms;
    use crate::writer::{DeepWriter, DeepWriterConfig};

    fn temp_path(name: &str) -> PathBuf {
        let path = std::env::temp_dir()
            .join(format!("dtex_reader_{name}_{}.dtex", std::process::id()));
        let _ = fs::remove_file(&path);
        path
    }

    /// Every pixel fully shadowed at depth `x + y`.
    fn ramp_tile(grid: &TileGrid, pos: TilePos) -> DeepTile {
        let geometry = grid.tile_geometry(pos).expect("geometry");
        let mut offsets = vec![0u32];
        let mut nodes = Vec::new();
        for local_y in 0..geometry.height {
            for local_x in 0..geometry.width {
                let depth = (geometry.origin_x + local_x + geometry.origin_y + local_y) as f32;
                nodes.extend_from_slice(&[0.0, 1.0, 1.0, 1.0, depth, 1.0, 1.0, 1.0]);
                nodes.extend_from_slice(&[depth, 0.0, 0.0, 0.0]);
                offsets.push(offsets[offsets.len() - 1] + 3);
            }
        }
        DeepTile::new(geometry, 3, offsets, nodes).expect("tile")
    }

    fn write_ramp(path: &PathBuf, elide: TilePos) -> TileGrid {
        let mut config = DeepWriterConfig::new(300, 300, 3);
        config.transforms = Transforms::IDENTITY;
        config.transforms.world_to_camera[12] = 4.0;
        let mut writer = DeepWriter::create(path, config).expect("create");
        let grid = *writer.grid();
        for pos in grid.iter_tiles() {
            if pos == elide {
                let geometry = grid.tile_geometry(pos).expect("geometry");
                writer
                    .submit_tile(&DeepTile::fully_visible(geometry, 3))
                    .expect("submit neglectable");
            } else {
                writer.submit_tile(&ramp_tile(&grid, pos)).expect("submit");
            }
        }
        writer.finish().expect("finish");
        grid
    }

    #[test]
    fn tiles_read_back_with_edge_sizes() {
        let path = temp_path("edge");
        let grid = write_ramp(&path, TilePos::new(0, 0));
        let reader = DeepReader::open(&path).expect("open");
        assert_eq!(reader.grid(), &grid);
        assert_eq!(reader.transforms().world_to_camera[12], 4.0);

        let edge = reader.load_tile(TilePos::new(2, 1)).expect("edge tile");
        assert_eq!(edge.geometry().width, 44);
        assert_eq!(edge.geometry().height, 128);
        assert_eq!(edge.function_offsets().len(), 44 * 128 + 1);
        assert_eq!(edge, ramp_tile(&grid, TilePos::new(2, 1)));

        let tile = reader.load_tile_for_pixel(299, 299).expect("corner tile");
        assert_eq!(tile.visibility_at(299, 299, 597.0), Color::WHITE);
        assert_eq!(tile.visibility_at(299, 299, 598.0), Color::BLACK);
        assert_eq!(reader.decode_count(), 2);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn elided_tiles_load_without_io() {
        let path = temp_path("elided");
        let grid = write_ramp(&path, TilePos::new(1, 1));
        let reader = DeepReader::open(&path).expect("open");
        assert_eq!(reader.table().offset(TilePos::new(1, 1)), Some(0));
        for entry in reader.table().entries() {
            assert_eq!(entry.file_offset == 0, entry.pos() == TilePos::new(1, 1));
        }

        let tile = reader.load_tile(TilePos::new(1, 1)).expect("elided tile");
        assert_eq!(reader.decode_count(), 0);
        assert!(tile.is_neglectable());
        assert_eq!(
            tile,
            DeepTile::fully_visible(grid.tile_geometry(TilePos::new(1, 1)).expect("geometry"), 3)
        );
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn different_tiles_decode_in_parallel() {
        let path = temp_path("parallel");
        let elided = TilePos::new(2, 2);
        let grid = write_ramp(&path, elided);
        let reader = DeepReader::open(&path).expect("open");
        std::thread::scope(|scope| {
            for pos in grid.iter_tiles() {
                let reader = &reader;
                let grid = &grid;
                scope.spawn(move || {
                    let tile = reader.load_tile(pos).expect("tile");
                    if pos == elided {
                        assert!(tile.is_neglectable());
                    } else {
                        assert_eq!(tile, ramp_tile(grid, pos), "tile {pos:?}");
                    }
                });
            }
        });
        assert_eq!(reader.decode_count(), grid.max_tiles() as u64 - 1);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn pixels_outside_the_image_are_rejected() {
        let path = temp_path("bounds");
        write_ramp(&path, TilePos::new(0, 0));
        let reader = DeepReader::open(&path).expect("open");
        assert!(matches!(
            reader.tile_for_pixel(300, 10),
            Err(DeepReadError::Grid(_))
        ));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn corrupt_files_are_format_errors() {
        let path = temp_path("corrupt");
        write_ramp(&path, TilePos::new(0, 0));
        let mut bytes = fs::read(&path).expect("read");

        bytes[0] = 0;
        fs::write(&path, &bytes).expect("write");
        assert!(matches!(
            DeepReader::open(&path),
            Err(DeepReadError::Format(DtexFormatError::BadMagic))
        ));

        bytes[0] = 0x89;
        bytes.truncate(bytes.len() - 10);
        fs::write(&path, &bytes).expect("write");
        assert!(matches!(
            DeepReader::open(&path),
            Err(DeepReadError::Format(DtexFormatError::FileSizeMismatch { .. }))
        ));
        let _ = fs::remove_file(&path);
    }
}
