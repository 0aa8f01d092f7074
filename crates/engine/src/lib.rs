use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, bounded};
use dtex::{DeepWriteError, DeepWriter, DeepWriterConfig, WriteSummary};
use model::VisibilityCurve;
use protocol::{DeepRegion, OutputMsg, WeightedSubsample};
use tiles::{AssembleError, TileAssembler};
use visibility::VisibilityMerger;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputConfig {
    pub writer: DeepWriterConfig,
    /// Regions that may queue up before producers block.
    pub channel_capacity: usize,
}

impl OutputConfig {
    pub fn new(writer: DeepWriterConfig) -> Self {
        Self {
            writer,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputReport {
    pub regions: u64,
    pub summary: WriteSummary,
}

#[derive(Debug)]
pub enum OutputError {
    Assemble(AssembleError),
    /// Producers went away before every tile arrived. The file is finished
    /// with the missing tiles recorded as fully visible.
    Incomplete {
        missing_tiles: usize,
        summary: Option<WriteSummary>,
    },
    WorkerPanicked,
}

impl fmt::Display for OutputError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputError::Assemble(error) => write!(formatter, "{error}"),
            OutputError::Incomplete { missing_tiles, .. } => write!(
                formatter,
                "output closed with {missing_tiles} tiles never completed"
            ),
            OutputError::WorkerPanicked => write!(formatter, "output thread panicked"),
        }
    }
}

impl std::error::Error for OutputError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OutputError::Assemble(error) => Some(error),
            _ => None,
        }
    }
}

impl From<AssembleError> for OutputError {
    fn from(error: AssembleError) -> Self {
        OutputError::Assemble(error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputClosed;

impl fmt::Display for OutputClosed {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "output thread no longer accepts regions")
    }
}

impl std::error::Error for OutputClosed {}

/// Producer side of the output thread. Clone one per producer; the output
/// closes once every sender is dropped or one of them calls `finish`.
#[derive(Clone)]
pub struct RegionSender {
    sender: Sender<OutputMsg>,
    sent: Arc<AtomicU64>,
}

impl RegionSender {
    /// Blocks while the queue is full.
    pub fn submit(&self, region: DeepRegion) -> Result<(), OutputClosed> {
        self.sender
            .send(OutputMsg::Region(region))
            .map_err(|_| OutputClosed)?;
        self.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn finish(&self) -> Result<(), OutputClosed> {
        self.sender.send(OutputMsg::Finish).map_err(|_| OutputClosed)
    }

    pub fn sent_regions(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

pub struct OutputHandle {
    join: JoinHandle<Result<OutputReport, OutputError>>,
}

impl OutputHandle {
    pub fn join(self) -> Result<OutputReport, OutputError> {
        self.join.join().unwrap_or(Err(OutputError::WorkerPanicked))
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Creates the file and starts the thread that owns the assembler and the
/// writer. File creation errors are returned here, before any thread exists.
pub fn spawn_output(
    path: impl AsRef<Path>,
    config: OutputConfig,
) -> Result<(RegionSender, OutputHandle), DeepWriteError> {
    assert!(
        config.channel_capacity > 0,
        "output channel capacity must be greater than zero"
    );
    let writer = DeepWriter::create(path, config.writer)?;
    let assembler = TileAssembler::for_writer(
        writer,
        config.writer.bucket_width,
        config.writer.bucket_height,
    );
    let (sender, receiver) = bounded(config.channel_capacity);
    let join = std::thread::Builder::new()
        .name("deep-output".to_owned())
        .spawn(move || run_output(assembler, receiver))
        .map_err(|source| DeepWriteError::Io {
            context: "spawning output thread",
            source,
        })?;
    Ok((
        RegionSender {
            sender,
            sent: Arc::new(AtomicU64::new(0)),
        },
        OutputHandle { join },
    ))
}

fn run_output(
    mut assembler: TileAssembler<DeepWriter>,
    receiver: Receiver<OutputMsg>,
) -> Result<OutputReport, OutputError> {
    let mut regions = 0u64;
    while let Ok(message) = receiver.recv() {
        let region = match message {
            OutputMsg::Region(region) => region,
            OutputMsg::Finish => break,
        };
        regions += 1;
        if let Err(error) = assembler.submit_region(region) {
            log::error!("rejecting output after region {regions}: {error}");
            if let Err(close_error) = assembler.close() {
                log::warn!("could not finish file after error: {close_error}");
            }
            return Err(error.into());
        }
        if assembler.is_finished() {
            break;
        }
    }
    drop(receiver);

    if !assembler.is_finished() {
        let missing_tiles = assembler.missing_tiles();
        log::warn!("output closed early, {missing_tiles} tiles missing");
        assembler.close()?;
        return Err(OutputError::Incomplete {
            missing_tiles,
            summary: assembler.summary().copied(),
        });
    }
    let summary = assembler
        .summary()
        .copied()
        .unwrap_or_else(|| panic!("finished assembler without a write summary"));
    log::info!(
        "output complete: {regions} regions, {} tiles written, {} elided",
        summary.tiles_written,
        summary.tiles_elided
    );
    Ok(OutputReport { regions, summary })
}

/// Bucket of pixels shaded by one producer. Bounds are half-open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketRect {
    pub xmin: u32,
    pub ymin: u32,
    pub xmax: u32,
    pub ymax: u32,
}

impl BucketRect {
    /// Buckets covering a `width` x `height` image, row by row.
    pub fn cover(
        width: u32,
        height: u32,
        bucket_width: u32,
        bucket_height: u32,
    ) -> Vec<BucketRect> {
        assert!(
            bucket_width > 0 && bucket_height > 0,
            "bucket size must be at least 1x1"
        );
        (0..height)
            .step_by(bucket_height as usize)
            .flat_map(|ymin| {
                (0..width)
                    .step_by(bucket_width as usize)
                    .map(move |xmin| BucketRect {
                        xmin,
                        ymin,
                        xmax: (xmin + bucket_width).min(width),
                        ymax: (ymin + bucket_height).min(height),
                    })
            })
            .collect()
    }
}

/// Merges the subsamples of every pixel in `rect` and packs the functions
/// into one region. A bucket with no occluded pixel becomes an empty region.
pub fn shade_bucket(
    rect: BucketRect,
    channels: u32,
    merger: &VisibilityMerger,
    mut pixel_subsamples: impl FnMut(u32, u32) -> Vec<WeightedSubsample>,
) -> DeepRegion {
    let curves: Vec<VisibilityCurve> = (rect.ymin..rect.ymax)
        .flat_map(|y| (rect.xmin..rect.xmax).map(move |x| (x, y)))
        .map(|(x, y)| merger.merge(&pixel_subsamples(x, y)))
        .collect();
    if curves.iter().all(VisibilityCurve::is_fully_visible) {
        return DeepRegion::empty(rect.xmin, rect.ymin, rect.xmax, rect.ymax, channels);
    }
    DeepRegion::from_curves(rect.xmin, rect.ymin, rect.xmax, rect.ymax, channels, &curves)
}
