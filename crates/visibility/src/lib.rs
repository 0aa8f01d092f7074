use std::cmp::Ordering;
use std::collections::BinaryHeap;

use model::{Color, VisibilityCurve, VisibilityNode};
use protocol::{SubsampleHits, WeightedSubsample};

/// Cursor into one subsample's hit list, ordered so the shallowest hit pops
/// first from a `BinaryHeap`.
#[derive(Debug, Clone, Copy)]
struct HitHeapNode {
    depth: f32,
    subsample: usize,
    hit: usize,
    /// Visibility the subsample had before this hit, advanced by the weighted
    /// delta of each earlier hit.
    running: Color,
}

impl PartialEq for HitHeapNode {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HitHeapNode {}

impl PartialOrd for HitHeapNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HitHeapNode {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .depth
            .total_cmp(&self.depth)
            .then_with(|| other.subsample.cmp(&self.subsample))
    }
}

/// Merges the depth-sorted hits of a pixel's subsamples into one visibility
/// function.
#[derive(Debug, Clone, Copy)]
pub struct VisibilityMerger {
    /// Visibility change per unit depth between hits. Zero: visibility is
    /// piecewise constant between surfaces.
    slope: Color,
}

impl Default for VisibilityMerger {
    fn default() -> Self {
        Self::new()
    }
}

impl VisibilityMerger {
    pub const fn new() -> Self {
        Self {
            slope: Color::BLACK,
        }
    }

    pub fn merge(&self, subsamples: &[WeightedSubsample]) -> VisibilityCurve {
        let mut curve = VisibilityCurve::fully_visible();
        let contributes = |subsample: &&WeightedSubsample| {
            subsample.weight > 0.0 && !subsample.hits.is_empty()
        };
        let total_weight: f32 = subsamples
            .iter()
            .filter(contributes)
            .map(|subsample| subsample.weight)
            .sum();
        if total_weight <= 0.0 {
            return curve;
        }

        let mut heap = BinaryHeap::with_capacity(subsamples.len());
        for (index, subsample) in subsamples.iter().enumerate() {
            if !contributes(&subsample) {
                continue;
            }
            if let Some(hit) = subsample.hits.get(0) {
                heap.push(HitHeapNode {
                    depth: hit.depth,
                    subsample: index,
                    hit: 0,
                    running: Color::WHITE,
                });
            }
        }

        let mut previous = VisibilityNode::new(0.0, Color::WHITE);
        while let Some(node) = heap.pop() {
            let subsample = &subsamples[node.subsample];
            let hit = *hit_at(&subsample.hits, node.hit);
            let depth = hit.depth.max(previous.depth);
            let delta = hit.opacity * (-subsample.weight / total_weight);

            let before =
                (previous.visibility + self.slope * (depth - previous.depth)).clamp_non_negative();
            let after = (before + delta).clamp_non_negative();
            curve.push(VisibilityNode::new(depth, before));
            curve.push(VisibilityNode::new(depth, after));
            previous = VisibilityNode::new(depth, after);
            if after.is_black() {
                break;
            }

            if node.running.is_black() {
                continue;
            }
            if let Some(next) = subsample.hits.get(node.hit + 1) {
                heap.push(HitHeapNode {
                    depth: next.depth,
                    subsample: node.subsample,
                    hit: node.hit + 1,
                    running: (node.running + delta).clamp_non_negative(),
                });
            }
        }
        curve
    }
}

fn hit_at(hits: &SubsampleHits, index: usize) -> &protocol::Hit {
    hits.get(index)
        .unwrap_or_else(|| panic!("hit cursor {index} past subsample with {} hits", hits.len()))
}

/// Filter footprint around a pixel center, in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterSupport {
    pub x_width: f32,
    pub y_width: f32,
}

impl FilterSupport {
    pub fn contains(&self, dx: f32, dy: f32) -> bool {
        dx.abs() <= self.x_width * 0.5 && dy.abs() <= self.y_width * 0.5
    }
}

/// Precomputed filter weights, indexed by a subsample's kernel slot.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelTable {
    weights: Vec<f32>,
}

impl KernelTable {
    pub fn new(weights: Vec<f32>) -> Self {
        Self { weights }
    }

    /// Equal weight for `slots` subsamples.
    pub fn uniform(slots: usize) -> Self {
        Self {
            weights: vec![1.0; slots],
        }
    }

    pub fn weight(&self, slot: usize) -> f32 {
        self.weights.get(slot).copied().unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

/// A subsample as produced by the sampler, before weighting.
#[derive(Debug, Clone, PartialEq)]
pub struct SubsampleRecord {
    pub x: f32,
    pub y: f32,
    pub kernel_slot: usize,
    pub hits: SubsampleHits,
}

/// Selects the subsamples inside `support` around `center` and attaches
/// their kernel weights.
pub fn gather_subsamples<'a>(
    center: (f32, f32),
    support: FilterSupport,
    kernel: &KernelTable,
    records: impl IntoIterator<Item = &'a SubsampleRecord>,
) -> Vec<WeightedSubsample> {
    records
        .into_iter()
        .filter(|record| support.contains(record.x - center.0, record.y - center.1))
        .map(|record| {
            WeightedSubsample::new(kernel.weight(record.kernel_slot), record.hits.clone())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use model::{Color, VisibilityNode};
    use protocol::{Hit, SubsampleHits, WeightedSubsample};

    use super::{
        FilterSupport, KernelTable, SubsampleRecord, VisibilityMerger, gather_subsamples,
    };

    fn opaque(weight: f32, depth: f32) -> WeightedSubsample {
        WeightedSubsample::new(weight, SubsampleHits::Opaque(Hit::opaque(depth)))
    }

    fn assert_monotone(nodes: &[VisibilityNode]) {
        assert_eq!(nodes[0], VisibilityNode::new(0.0, Color::WHITE));
        for pair in nodes.windows(2) {
            assert!(pair[0].depth <= pair[1].depth, "depth decreased: {pair:?}");
            for channel in 0..3 {
                assert!(
                    pair[1].visibility.0[channel] <= pair[0].visibility.0[channel],
                    "visibility increased: {pair:?}"
                );
                assert!(pair[1].visibility.0[channel] >= 0.0);
            }
        }
    }

    #[test]
    fn two_opaque_halves_step_down_to_black() {
        let curve = VisibilityMerger::new().merge(&[opaque(0.5, 10.0), opaque(0.5, 5.0)]);
        assert_eq!(
            curve.nodes(),
            &[
                VisibilityNode::new(0.0, Color::WHITE),
                VisibilityNode::new(5.0, Color::WHITE),
                VisibilityNode::new(5.0, Color::gray(0.5)),
                VisibilityNode::new(10.0, Color::gray(0.5)),
                VisibilityNode::new(10.0, Color::BLACK),
            ]
        );
    }

    #[test]
    fn no_weight_means_fully_visible() {
        let merger = VisibilityMerger::new();
        assert!(merger.merge(&[]).is_fully_visible());
        assert!(merger.merge(&[opaque(0.0, 3.0)]).is_fully_visible());
    }

    #[test]
    fn every_layer_of_a_partial_subsample_is_merged() {
        let layered = SubsampleHits::Layered(
            vec![
                Hit::new(1.0, Color::gray(0.5)),
                Hit::new(2.0, Color::gray(0.5)),
                Hit::new(3.0, Color::gray(0.5)),
            ]
            .into(),
        );
        let curve = VisibilityMerger::new().merge(&[
            WeightedSubsample::new(1.0, layered),
            opaque(1.0, 10.0),
        ]);
        let depths: Vec<f32> = curve.nodes().iter().map(|node| node.depth).collect();
        assert_eq!(depths, vec![0.0, 1.0, 1.0, 2.0, 2.0, 3.0, 3.0, 10.0, 10.0]);
        assert_eq!(curve.visibility_at(1.5), Color::gray(0.75));
        assert_eq!(curve.visibility_at(2.5), Color::gray(0.5));
        assert_eq!(curve.visibility_at(3.5), Color::gray(0.25));
        assert_eq!(curve.visibility_at(10.0), Color::BLACK);
        assert_monotone(curve.nodes());
    }

    #[test]
    fn layers_behind_an_opaque_hit_are_skipped() {
        let layered = SubsampleHits::Layered(
            vec![Hit::opaque(1.0), Hit::new(2.0, Color::gray(0.5))].into(),
        );
        let curve = VisibilityMerger::new().merge(&[WeightedSubsample::new(1.0, layered)]);
        assert_eq!(curve.len(), 3);
        assert_eq!(curve.visibility_at(1.0), Color::BLACK);
    }

    #[test]
    fn colored_opacity_clamps_each_channel() {
        let red_filter = SubsampleHits::Layered(
            vec![
                Hit::new(1.0, Color::rgb(0.0, 0.8, 0.8)),
                Hit::new(2.0, Color::rgb(0.0, 0.8, 0.8)),
            ]
            .into(),
        );
        let curve = VisibilityMerger::new().merge(&[WeightedSubsample::new(1.0, red_filter)]);
        assert_monotone(curve.nodes());
        let last = curve.last().expect("node");
        assert_eq!(last.visibility.0[0], 1.0);
        assert!(last.visibility.0[1] >= 0.0);
        assert_eq!(
            curve.visibility_at(1.5),
            Color::WHITE - Color::rgb(0.0, 0.8, 0.8)
        );
        assert_eq!(curve.visibility_at(2.0).0[1], 0.0);
    }

    #[test]
    fn equal_depths_are_independent_events() {
        let curve = VisibilityMerger::new().merge(&[
            opaque(1.0, 4.0),
            opaque(1.0, 4.0),
            opaque(2.0, 8.0),
        ]);
        assert_monotone(curve.nodes());
        assert_eq!(curve.visibility_at(4.0), Color::gray(0.5));
        assert_eq!(curve.visibility_at(8.0), Color::BLACK);
        assert_eq!(curve.len(), 7);
    }

    #[test]
    fn many_random_subsamples_stay_monotone() {
        let mut state = 0x2545_f491_u32;
        let mut next = || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state % 1000) as f32 / 1000.0
        };
        let subsamples: Vec<WeightedSubsample> = (0..16)
            .map(|_| {
                let first = next() * 10.0;
                let hits = vec![
                    Hit::new(first, Color::rgb(next(), next(), next())),
                    Hit::new(first + next() * 5.0, Color::rgb(next(), next(), next())),
                ];
                WeightedSubsample::new(next() + 0.1, SubsampleHits::Layered(hits.into()))
            })
            .collect();
        let curve = VisibilityMerger::new().merge(&subsamples);
        assert_monotone(curve.nodes());
    }

    #[test]
    fn gathering_keeps_subsamples_inside_the_support() {
        let record = |x: f32, y: f32, slot: usize, depth: f32| SubsampleRecord {
            x,
            y,
            kernel_slot: slot,
            hits: SubsampleHits::Opaque(Hit::opaque(depth)),
        };
        let records = vec![
            record(0.25, 0.25, 0, 1.0),
            record(0.75, 0.75, 1, 2.0),
            record(2.5, 0.5, 2, 3.0),
        ];
        let kernel = KernelTable::new(vec![3.0, 1.0, 1.0]);
        let support = FilterSupport {
            x_width: 2.0,
            y_width: 2.0,
        };
        let weighted = gather_subsamples((0.5, 0.5), support, &kernel, &records);
        assert_eq!(weighted.len(), 2);
        assert_eq!(weighted[0].weight, 3.0);
        assert_eq!(weighted[1].weight, 1.0);

        let curve = VisibilityMerger::new().merge(&weighted);
        assert_eq!(curve.visibility_at(1.0), Color::gray(0.25));
        assert_eq!(curve.visibility_at(2.0), Color::BLACK);
    }
}
