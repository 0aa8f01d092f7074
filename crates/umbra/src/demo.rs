use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use engine::{BucketRect, OutputConfig, OutputReport, shade_bucket, spawn_output};
use model::Color;
use protocol::{Hit, SubsampleHits, WeightedSubsample};
use visibility::{FilterSupport, KernelTable, SubsampleRecord, VisibilityMerger, gather_subsamples};

pub const GLASS_DEPTH: f32 = 5.0;
pub const DISC_DEPTH: f32 = 10.0;

const SUBSAMPLE_OFFSETS: [(f32, f32); 4] = [(0.25, 0.25), (0.75, 0.25), (0.25, 0.75), (0.75, 0.75)];

/// Opaque disc in the middle of the image seen through a sheet of tinted
/// glass covering the left half.
#[derive(Debug, Clone, PartialEq)]
pub struct DemoScene {
    width: u32,
    height: u32,
    glass: Color,
    kernel: KernelTable,
    support: FilterSupport,
}

impl DemoScene {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            glass: Color::rgb(0.6, 0.3, 0.1),
            kernel: KernelTable::uniform(SUBSAMPLE_OFFSETS.len()),
            support: FilterSupport {
                x_width: 1.0,
                y_width: 1.0,
            },
        }
    }

    fn hits_at(&self, sx: f32, sy: f32) -> SubsampleHits {
        let center_x = self.width as f32 * 0.5;
        let center_y = self.height as f32 * 0.5;
        let radius = self.width.min(self.height) as f32 * 0.3;
        let mut layers = Vec::with_capacity(2);
        if sx < center_x {
            layers.push(Hit::new(GLASS_DEPTH, self.glass));
        }
        if (sx - center_x).powi(2) + (sy - center_y).powi(2) < radius * radius {
            layers.push(Hit::opaque(DISC_DEPTH));
        }
        SubsampleHits::Layered(layers.into())
    }

    /// Weighted subsamples of pixel `(x, y)`, a 2x2 pattern under a box
    /// filter one pixel wide.
    pub fn pixel_subsamples(&self, x: u32, y: u32) -> Vec<WeightedSubsample> {
        let records: Vec<SubsampleRecord> = SUBSAMPLE_OFFSETS
            .iter()
            .enumerate()
            .map(|(slot, (dx, dy))| {
                let sx = x as f32 + dx;
                let sy = y as f32 + dy;
                SubsampleRecord {
                    x: sx,
                    y: sy,
                    kernel_slot: slot,
                    hits: self.hits_at(sx, sy),
                }
            })
            .collect();
        let center = (x as f32 + 0.5, y as f32 + 0.5);
        gather_subsamples(center, self.support, &self.kernel, &records)
    }
}

/// Renders the demo scene into `path` with `producers` shading threads.
pub fn render(path: &Path, config: OutputConfig, producers: usize) -> Result<OutputReport> {
    let writer = config.writer;
    let scene = DemoScene::new(writer.image_width, writer.image_height);
    let buckets = BucketRect::cover(
        writer.image_width,
        writer.image_height,
        writer.bucket_width,
        writer.bucket_height,
    );
    let (sender, handle) =
        spawn_output(path, config).with_context(|| format!("create {}", path.display()))?;
    log::info!(
        "shading {} buckets on {} threads",
        buckets.len(),
        producers.max(1)
    );

    let next_bucket = AtomicUsize::new(0);
    std::thread::scope(|scope| {
        for _ in 0..producers.max(1) {
            let sender = sender.clone();
            let scene = &scene;
            let buckets = &buckets;
            let next_bucket = &next_bucket;
            scope.spawn(move || {
                let merger = VisibilityMerger::new();
                loop {
                    let index = next_bucket.fetch_add(1, Ordering::Relaxed);
                    let Some(rect) = buckets.get(index) else {
                        break;
                    };
                    let region = shade_bucket(*rect, writer.channels, &merger, |x, y| {
                        scene.pixel_subsamples(x, y)
                    });
                    if sender.submit(region).is_err() {
                        log::warn!("output stopped accepting regions at bucket {index}");
                        break;
                    }
                }
            });
        }
    });
    drop(sender);

    handle
        .join()
        .with_context(|| format!("write {}", path.display()))
}
