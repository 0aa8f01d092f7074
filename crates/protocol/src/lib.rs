use model::{Color, VisibilityCurve};
use smallvec::SmallVec;

/// One surface crossing seen by a subsample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub depth: f32,
    pub opacity: Color,
}

impl Hit {
    pub const fn new(depth: f32, opacity: Color) -> Self {
        Self { depth, opacity }
    }

    pub const fn opaque(depth: f32) -> Self {
        Self {
            depth,
            opacity: Color::WHITE,
        }
    }
}

/// Hits of one subsample in ascending depth order.
#[derive(Debug, Clone, PartialEq)]
pub enum SubsampleHits {
    Opaque(Hit),
    Layered(SmallVec<[Hit; 4]>),
}

impl SubsampleHits {
    pub fn len(&self) -> usize {
        match self {
            SubsampleHits::Opaque(_) => 1,
            SubsampleHits::Layered(hits) => hits.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<&Hit> {
        match self {
            SubsampleHits::Opaque(hit) => (index == 0).then_some(hit),
            SubsampleHits::Layered(hits) => hits.get(index),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeightedSubsample {
    pub weight: f32,
    pub hits: SubsampleHits,
}

impl WeightedSubsample {
    pub fn new(weight: f32, hits: SubsampleHits) -> Self {
        Self { weight, hits }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionMeta {
    /// Every pixel of the region is unoccluded.
    Empty,
    /// Node count of each pixel's function, row-major.
    FunctionLengths(Vec<u32>),
}

/// Rectangle of finished per-pixel functions handed from a producer to the
/// output side. Bounds are half-open: `xmin..xmax`, `ymin..ymax`.
#[derive(Debug, Clone, PartialEq)]
pub struct DeepRegion {
    pub xmin: u32,
    pub ymin: u32,
    pub xmax: u32,
    pub ymax: u32,
    pub channels: u32,
    pub meta: RegionMeta,
    pub nodes: Vec<f32>,
}

impl DeepRegion {
    pub fn empty(xmin: u32, ymin: u32, xmax: u32, ymax: u32, channels: u32) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
            channels,
            meta: RegionMeta::Empty,
            nodes: Vec::new(),
        }
    }

    /// Packs `curves` (row-major, one per pixel) into a region.
    pub fn from_curves(
        xmin: u32,
        ymin: u32,
        xmax: u32,
        ymax: u32,
        channels: u32,
        curves: &[VisibilityCurve],
    ) -> Self {
        let pixel_count = (xmax - xmin) as usize * (ymax - ymin) as usize;
        assert_eq!(
            curves.len(),
            pixel_count,
            "region {xmin},{ymin}..{xmax},{ymax} expects one curve per pixel"
        );
        let mut lengths = Vec::with_capacity(pixel_count);
        let mut nodes = Vec::new();
        for curve in curves {
            lengths.push(curve.len() as u32);
            curve.write_flat(channels as usize, &mut nodes);
        }
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
            channels,
            meta: RegionMeta::FunctionLengths(lengths),
            nodes,
        }
    }

    pub fn width(&self) -> u32 {
        self.xmax.saturating_sub(self.xmin)
    }

    pub fn height(&self) -> u32 {
        self.ymax.saturating_sub(self.ymin)
    }

    pub fn pixel_count(&self) -> usize {
        self.width() as usize * self.height() as usize
    }
}

/// Messages accepted by the output thread.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputMsg {
    Region(DeepRegion),
    Finish,
}

#[cfg(test)]
mod tests {
    use model::{Color, VisibilityCurve, VisibilityNode};
    use smallvec::smallvec;

    use super::{DeepRegion, Hit, RegionMeta, SubsampleHits};

    #[test]
    fn opaque_subsample_has_exactly_one_hit() {
        let hits = SubsampleHits::Opaque(Hit::opaque(2.0));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits.get(0), Some(&Hit::opaque(2.0)));
        assert_eq!(hits.get(1), None);

        let layered = SubsampleHits::Layered(smallvec![
            Hit::new(1.0, Color::gray(0.25)),
            Hit::new(3.0, Color::gray(0.5)),
        ]);
        assert_eq!(layered.len(), 2);
        assert_eq!(layered.get(1).map(|hit| hit.depth), Some(3.0));
    }

    #[test]
    fn curves_pack_into_lengths_and_flat_nodes() {
        let mut shadowed = VisibilityCurve::fully_visible();
        shadowed.push(VisibilityNode::new(4.0, Color::WHITE));
        shadowed.push(VisibilityNode::new(4.0, Color::BLACK));
        let curves = vec![VisibilityCurve::fully_visible(), shadowed];

        let region = DeepRegion::from_curves(8, 3, 10, 4, 1, &curves);
        assert_eq!(region.pixel_count(), 2);
        assert_eq!(region.meta, RegionMeta::FunctionLengths(vec![1, 3]));
        assert_eq!(
            region.nodes,
            vec![0.0, 1.0, 0.0, 1.0, 4.0, 1.0, 4.0, 0.0]
        );
    }
}
