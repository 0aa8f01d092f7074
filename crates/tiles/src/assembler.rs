use std::collections::HashMap;
use std::fmt;

use dtex::{DeepWriteError, DeepWriter, WriteSummary};
use model::{Color, DeepTile, TileBitmap, TileGeometry, TileGrid, TilePos};
use protocol::{DeepRegion, RegionMeta};

#[derive(Debug, Clone, PartialEq)]
pub enum AssembledTile {
    Data(DeepTile),
    /// Every pixel holds a single fully visible node.
    Neglectable(TilePos),
}

impl AssembledTile {
    pub fn pos(&self) -> TilePos {
        match self {
            AssembledTile::Data(tile) => tile.pos(),
            AssembledTile::Neglectable(pos) => *pos,
        }
    }
}

/// Receives tiles as the assembler completes them.
pub trait TileSink {
    type Summary;

    fn accept_tile(&mut self, tile: AssembledTile) -> Result<(), DeepWriteError>;
    fn finish(&mut self) -> Result<Self::Summary, DeepWriteError>;
}

impl TileSink for DeepWriter {
    type Summary = WriteSummary;

    fn accept_tile(&mut self, tile: AssembledTile) -> Result<(), DeepWriteError> {
        match tile {
            AssembledTile::Data(tile) => self.submit_tile(&tile),
            AssembledTile::Neglectable(pos) => self.submit_neglectable(pos),
        }
    }

    fn finish(&mut self) -> Result<WriteSummary, DeepWriteError> {
        DeepWriter::finish(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionProtocolError {
    EmptyRegion,
    OutsideImage,
    WiderThanBucket,
    TallerThanBucket,
    CrossesBucket,
    PartialRow,
    ChannelMismatch { expected: u32, actual: u32 },
    LengthCountMismatch { expected: usize, actual: usize },
    ZeroLengthFunction,
    NodeCountMismatch { expected: usize, actual: usize },
    RowAlreadyFilled { y: u32 },
    TileAlreadyComplete(TilePos),
    AlreadyFinished,
}

impl fmt::Display for RegionProtocolError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionProtocolError::EmptyRegion => write!(formatter, "region covers no pixels"),
            RegionProtocolError::OutsideImage => write!(formatter, "region extends past the image"),
            RegionProtocolError::WiderThanBucket => {
                write!(formatter, "region is wider than one bucket")
            }
            RegionProtocolError::TallerThanBucket => {
                write!(formatter, "region is taller than one bucket")
            }
            RegionProtocolError::CrossesBucket => {
                write!(formatter, "region crosses a bucket boundary")
            }
            RegionProtocolError::PartialRow => {
                write!(formatter, "region rows do not span their whole bucket")
            }
            RegionProtocolError::ChannelMismatch { expected, actual } => write!(
                formatter,
                "region has {actual} channels, image has {expected}"
            ),
            RegionProtocolError::LengthCountMismatch { expected, actual } => write!(
                formatter,
                "region carries {actual} function lengths for {expected} pixels"
            ),
            RegionProtocolError::ZeroLengthFunction => {
                write!(formatter, "region contains a function without nodes")
            }
            RegionProtocolError::NodeCountMismatch { expected, actual } => write!(
                formatter,
                "region carries {actual} node values, lengths require {expected}"
            ),
            RegionProtocolError::RowAlreadyFilled { y } => {
                write!(formatter, "row {y} of this bucket was already submitted")
            }
            RegionProtocolError::TileAlreadyComplete(pos) => {
                write!(formatter, "tile ({}, {}) is already complete", pos.y, pos.x)
            }
            RegionProtocolError::AlreadyFinished => {
                write!(formatter, "image output already finished")
            }
        }
    }
}

impl std::error::Error for RegionProtocolError {}

#[derive(Debug)]
pub enum AssembleError {
    Protocol(RegionProtocolError),
    Write(DeepWriteError),
}

impl fmt::Display for AssembleError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssembleError::Protocol(error) => write!(formatter, "protocol error: {error}"),
            AssembleError::Write(error) => write!(formatter, "write error: {error}"),
        }
    }
}

impl std::error::Error for AssembleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AssembleError::Protocol(error) => Some(error),
            AssembleError::Write(error) => Some(error),
        }
    }
}

impl From<RegionProtocolError> for AssembleError {
    fn from(error: RegionProtocolError) -> Self {
        AssembleError::Protocol(error)
    }
}

impl From<DeepWriteError> for AssembleError {
    fn from(error: DeepWriteError) -> Self {
        AssembleError::Write(error)
    }
}

#[derive(Debug)]
enum SubRegionRow {
    Empty,
    Functions { lengths: Vec<u32>, nodes: Vec<f32> },
}

/// Bucket-sized piece of a pending tile, filled one row at a time.
#[derive(Debug)]
struct SubRegion {
    width: u32,
    rows: Vec<Option<SubRegionRow>>,
}

#[derive(Debug)]
struct PendingTile {
    geometry: TileGeometry,
    // keyed by (x, y) of the sub-region origin relative to the tile
    sub_regions: HashMap<(u32, u32), SubRegion>,
    filled_functions: usize,
}

impl PendingTile {
    fn new(geometry: TileGeometry) -> Self {
        Self {
            geometry,
            sub_regions: HashMap::new(),
            filled_functions: 0,
        }
    }

    fn is_full(&self) -> bool {
        self.filled_functions == self.geometry.pixel_count()
    }

    /// Width of the sub-region starting at `local_x` and its row `local_y`.
    fn row(&self, local_x: u32, local_y: u32, bucket_height: u32) -> (u32, &SubRegionRow) {
        let key = (local_x, local_y / bucket_height * bucket_height);
        self.sub_regions
            .get(&key)
            .and_then(|sub| {
                sub.rows[(local_y - key.1) as usize]
                    .as_ref()
                    .map(|row| (sub.width, row))
            })
            .unwrap_or_else(|| {
                panic!(
                    "full tile ({}, {}) is missing row {local_y} of sub-region {key:?}",
                    self.geometry.pos.y, self.geometry.pos.x
                )
            })
    }

    /// Concatenates sub-region rows into a contiguous tile in row-major order.
    fn assemble(self, bucket_width: u32, bucket_height: u32, channels: u32) -> AssembledTile {
        let geometry = self.geometry;
        let neglectable = self.sub_regions.values().all(|sub| {
            sub.rows.iter().flatten().all(|row| match row {
                SubRegionRow::Empty => true,
                SubRegionRow::Functions { lengths, .. } => lengths.iter().all(|len| *len == 1),
            })
        });
        if neglectable {
            return AssembledTile::Neglectable(geometry.pos);
        }

        let mut function_offsets = Vec::with_capacity(geometry.pixel_count() + 1);
        let mut nodes = Vec::new();
        let mut total = 0u32;
        function_offsets.push(total);
        for local_y in 0..geometry.height {
            for local_x in (0..geometry.width).step_by(bucket_width as usize) {
                let (sub_width, row) = self.row(local_x, local_y, bucket_height);
                match row {
                    SubRegionRow::Empty => {
                        for _ in 0..sub_width {
                            total += 1;
                            function_offsets.push(total);
                            nodes.push(0.0);
                            Color::WHITE.push_components(channels as usize, &mut nodes);
                        }
                    }
                    SubRegionRow::Functions {
                        lengths,
                        nodes: row_nodes,
                    } => {
                        for len in lengths {
                            total += len;
                            function_offsets.push(total);
                        }
                        nodes.extend_from_slice(row_nodes);
                    }
                }
            }
        }
        let tile = DeepTile::new(geometry, channels, function_offsets, nodes).unwrap_or_else(
            |error| {
                panic!(
                    "assembled tile ({}, {}) is inconsistent: {error}",
                    geometry.pos.y, geometry.pos.x
                )
            },
        );
        AssembledTile::Data(tile)
    }
}

/// Collects bucket rows from producers into whole tiles and hands each tile
/// to the sink as soon as its last pixel arrives. Once every tile of the
/// image has been emitted the sink is finished.
pub struct TileAssembler<S: TileSink> {
    grid: TileGrid,
    bucket_width: u32,
    bucket_height: u32,
    channels: u32,
    pending: HashMap<TilePos, PendingTile>,
    completed: TileBitmap,
    sink: S,
    summary: Option<S::Summary>,
}

impl TileAssembler<DeepWriter> {
    /// Assembler feeding `writer`, with regions of at most one bucket.
    pub fn for_writer(writer: DeepWriter, bucket_width: u32, bucket_height: u32) -> Self {
        let grid = *writer.grid();
        let channels = writer.channels();
        Self::new(grid, bucket_width, bucket_height, channels, writer)
    }
}

impl<S: TileSink> TileAssembler<S> {
    pub fn new(
        grid: TileGrid,
        bucket_width: u32,
        bucket_height: u32,
        channels: u32,
        sink: S,
    ) -> Self {
        assert!(
            bucket_width > 0 && bucket_height > 0,
            "bucket size must be at least 1x1"
        );
        assert!(
            grid.tile_width() % bucket_width == 0 && grid.tile_height() % bucket_height == 0,
            "tile size {}x{} must be a multiple of bucket size {bucket_width}x{bucket_height}",
            grid.tile_width(),
            grid.tile_height()
        );
        Self {
            grid,
            bucket_width,
            bucket_height,
            channels,
            pending: HashMap::new(),
            completed: TileBitmap::new(grid),
            sink,
            summary: None,
        }
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Summary returned by the sink once the image has been finished.
    pub fn summary(&self) -> Option<&S::Summary> {
        self.summary.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.summary.is_some()
    }

    pub fn completed_tiles(&self) -> usize {
        self.completed.set_count()
    }

    pub fn missing_tiles(&self) -> usize {
        self.grid.max_tiles() - self.completed.set_count()
    }

    pub fn pending_tiles(&self) -> usize {
        self.pending.len()
    }

    fn validate(&self, region: &DeepRegion) -> Result<(), RegionProtocolError> {
        if self.summary.is_some() {
            return Err(RegionProtocolError::AlreadyFinished);
        }
        if region.channels != self.channels {
            return Err(RegionProtocolError::ChannelMismatch {
                expected: self.channels,
                actual: region.channels,
            });
        }
        if region.xmin >= region.xmax || region.ymin >= region.ymax {
            return Err(RegionProtocolError::EmptyRegion);
        }
        if region.xmax > self.grid.image_width() || region.ymax > self.grid.image_height() {
            return Err(RegionProtocolError::OutsideImage);
        }
        if region.width() > self.bucket_width {
            return Err(RegionProtocolError::WiderThanBucket);
        }
        if region.height() > self.bucket_height {
            return Err(RegionProtocolError::TallerThanBucket);
        }
        let bucket_x = region.xmin / self.bucket_width * self.bucket_width;
        let bucket_y = region.ymin / self.bucket_height * self.bucket_height;
        if (region.xmax - 1) / self.bucket_width * self.bucket_width != bucket_x
            || (region.ymax - 1) / self.bucket_height * self.bucket_height != bucket_y
        {
            return Err(RegionProtocolError::CrossesBucket);
        }
        let bucket_x_end = (bucket_x + self.bucket_width).min(self.grid.image_width());
        if region.xmin != bucket_x || region.xmax != bucket_x_end {
            return Err(RegionProtocolError::PartialRow);
        }

        if let RegionMeta::FunctionLengths(lengths) = &region.meta {
            let pixel_count = region.pixel_count();
            if lengths.len() != pixel_count {
                return Err(RegionProtocolError::LengthCountMismatch {
                    expected: pixel_count,
                    actual: lengths.len(),
                });
            }
            if lengths.contains(&0) {
                return Err(RegionProtocolError::ZeroLengthFunction);
            }
            let total_nodes: usize = lengths.iter().map(|len| *len as usize).sum();
            let expected = total_nodes * (self.channels as usize + 1);
            if region.nodes.len() != expected {
                return Err(RegionProtocolError::NodeCountMismatch {
                    expected,
                    actual: region.nodes.len(),
                });
            }
        }
        Ok(())
    }

    pub fn submit_region(&mut self, region: DeepRegion) -> Result<(), AssembleError> {
        self.validate(&region)?;
        let pos = self
            .grid
            .tile_for_pixel(region.xmin, region.ymin)
            .map_err(|_| RegionProtocolError::OutsideImage)?;
        if self.completed.get(pos).unwrap_or(false) {
            return Err(RegionProtocolError::TileAlreadyComplete(pos).into());
        }
        let geometry = self
            .grid
            .tile_geometry(pos)
            .map_err(|_| RegionProtocolError::OutsideImage)?;

        let bucket_x = region.xmin / self.bucket_width * self.bucket_width;
        let bucket_y = region.ymin / self.bucket_height * self.bucket_height;
        let key = (bucket_x - geometry.origin_x, bucket_y - geometry.origin_y);
        let sub_width = (bucket_x + self.bucket_width).min(self.grid.image_width()) - bucket_x;
        let sub_height = (bucket_y + self.bucket_height).min(self.grid.image_height()) - bucket_y;

        let pending = self
            .pending
            .entry(pos)
            .or_insert_with(|| PendingTile::new(geometry));
        let sub = pending.sub_regions.entry(key).or_insert_with(|| SubRegion {
            width: sub_width,
            rows: (0..sub_height).map(|_| None).collect(),
        });
        let first_row = (region.ymin - bucket_y) as usize;
        let row_count = region.height() as usize;
        if let Some(offset) = sub.rows[first_row..first_row + row_count]
            .iter()
            .position(Option::is_some)
        {
            return Err(RegionProtocolError::RowAlreadyFilled {
                y: region.ymin + offset as u32,
            }
            .into());
        }

        let width = region.width() as usize;
        let pixel_count = region.pixel_count();
        match &region.meta {
            RegionMeta::Empty => {
                for row in &mut sub.rows[first_row..first_row + row_count] {
                    *row = Some(SubRegionRow::Empty);
                }
            }
            RegionMeta::FunctionLengths(lengths) => {
                let stride = self.channels as usize + 1;
                let mut node_start = 0;
                for (index, row_lengths) in lengths.chunks_exact(width).enumerate() {
                    let row_nodes: usize = row_lengths.iter().map(|len| *len as usize).sum();
                    let node_end = node_start + row_nodes * stride;
                    sub.rows[first_row + index] = Some(SubRegionRow::Functions {
                        lengths: row_lengths.to_vec(),
                        nodes: region.nodes[node_start..node_end].to_vec(),
                    });
                    node_start = node_end;
                }
            }
        }
        pending.filled_functions += pixel_count;
        log::debug!(
            "region {},{}..{},{} into tile ({}, {}): {}/{} pixels",
            region.xmin,
            region.ymin,
            region.xmax,
            region.ymax,
            pos.y,
            pos.x,
            pending.filled_functions,
            geometry.pixel_count()
        );
        if pending.is_full() {
            self.complete_tile(pos)?;
        }
        Ok(())
    }

    fn complete_tile(&mut self, pos: TilePos) -> Result<(), AssembleError> {
        let pending = self
            .pending
            .remove(&pos)
            .unwrap_or_else(|| {
                panic!("completing tile ({}, {}) that is not pending", pos.y, pos.x)
            });
        self.completed
            .set(pos)
            .unwrap_or_else(|_| panic!("tile ({}, {}) outside assembler grid", pos.y, pos.x));
        let assembled = pending.assemble(self.bucket_width, self.bucket_height, self.channels);
        self.sink.accept_tile(assembled)?;
        if self.completed.is_full() {
            self.summary = Some(self.sink.finish()?);
        }
        Ok(())
    }

    /// Finishes the sink even if tiles are still missing. Partially filled
    /// tiles are dropped.
    pub fn close(&mut self) -> Result<(), AssembleError> {
        if self.summary.is_some() {
            return Ok(());
        }
        if !self.pending.is_empty() {
            log::warn!(
                "closing with {} partially filled tiles; they are discarded",
                self.pending.len()
            );
            self.pending.clear();
        }
        self.summary = Some(self.sink.finish()?);
        Ok(())
    }
}
