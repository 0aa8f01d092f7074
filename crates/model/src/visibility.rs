use std::ops::{Add, Mul, Sub};

/// Per-channel visibility. One-channel data is carried as gray.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color(pub [f32; 3]);

impl Color {
    pub const WHITE: Color = Color([1.0; 3]);
    pub const BLACK: Color = Color([0.0; 3]);

    pub const fn gray(value: f32) -> Self {
        Color([value; 3])
    }

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Color([r, g, b])
    }

    /// Builds a color from one stored component (gray) or three (rgb).
    pub fn from_components(components: &[f32]) -> Self {
        match components {
            [value] => Color::gray(*value),
            [r, g, b] => Color([*r, *g, *b]),
            _ => panic!(
                "unsupported visibility component count {}",
                components.len()
            ),
        }
    }

    pub fn push_components(self, channels: usize, output: &mut Vec<f32>) {
        match channels {
            1 => output.push(self.mean()),
            3 => output.extend_from_slice(&self.0),
            _ => panic!("unsupported visibility channel count {channels}"),
        }
    }

    pub fn mean(self) -> f32 {
        (self.0[0] + self.0[1] + self.0[2]) / 3.0
    }

    pub fn clamp_non_negative(self) -> Self {
        Color(self.0.map(|component| component.max(0.0)))
    }

    /// True once every channel has reached zero.
    pub fn is_black(self) -> bool {
        self.0.iter().all(|component| *component <= 0.0)
    }
}

impl Add for Color {
    type Output = Color;

    fn add(self, rhs: Color) -> Color {
        Color([
            self.0[0] + rhs.0[0],
            self.0[1] + rhs.0[1],
            self.0[2] + rhs.0[2],
        ])
    }
}

impl Sub for Color {
    type Output = Color;

    fn sub(self, rhs: Color) -> Color {
        Color([
            self.0[0] - rhs.0[0],
            self.0[1] - rhs.0[1],
            self.0[2] - rhs.0[2],
        ])
    }
}

impl Mul<f32> for Color {
    type Output = Color;

    fn mul(self, rhs: f32) -> Color {
        Color(self.0.map(|component| component * rhs))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisibilityNode {
    pub depth: f32,
    pub visibility: Color,
}

impl VisibilityNode {
    pub const fn new(depth: f32, visibility: Color) -> Self {
        Self { depth, visibility }
    }
}

/// Owned visibility function. Depths are non-decreasing and visibility never
/// increases along the curve.
#[derive(Debug, Clone, PartialEq)]
pub struct VisibilityCurve {
    nodes: Vec<VisibilityNode>,
}

impl Default for VisibilityCurve {
    fn default() -> Self {
        Self::fully_visible()
    }
}

impl VisibilityCurve {
    pub fn fully_visible() -> Self {
        Self {
            nodes: vec![VisibilityNode::new(0.0, Color::WHITE)],
        }
    }

    pub fn from_nodes(nodes: Vec<VisibilityNode>) -> Self {
        debug_assert!(
            nodes.windows(2).all(|pair| pair[0].depth <= pair[1].depth),
            "visibility curve depths must be non-decreasing"
        );
        Self { nodes }
    }

    pub fn push(&mut self, node: VisibilityNode) {
        if let Some(last) = self.nodes.last() {
            assert!(
                node.depth >= last.depth,
                "visibility node depth {} precedes previous depth {}",
                node.depth,
                last.depth
            );
        }
        self.nodes.push(node);
    }

    pub fn nodes(&self) -> &[VisibilityNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn last(&self) -> Option<&VisibilityNode> {
        self.nodes.last()
    }

    /// A single-node curve never occludes anything.
    pub fn is_fully_visible(&self) -> bool {
        self.nodes.len() == 1
    }

    pub fn visibility_at(&self, depth: f32) -> Color {
        let count = self.nodes.partition_point(|node| node.depth <= depth);
        match count {
            0 => Color::WHITE,
            _ => self.nodes[count - 1].visibility,
        }
    }

    /// Appends `depth, components...` for every node.
    pub fn write_flat(&self, channels: usize, output: &mut Vec<f32>) {
        for node in &self.nodes {
            output.push(node.depth);
            node.visibility.push_components(channels, output);
        }
    }
}

/// Borrowed visibility function over a flat `depth, components...` run.
#[derive(Debug, Clone, Copy)]
pub struct VisibilityFunction<'a> {
    channels: usize,
    data: &'a [f32],
}

impl<'a> VisibilityFunction<'a> {
    pub fn new(channels: usize, data: &'a [f32]) -> Self {
        assert!(channels > 0, "visibility function needs at least one channel");
        assert_eq!(
            data.len() % (channels + 1),
            0,
            "visibility function data is not a whole number of nodes"
        );
        Self { channels, data }
    }

    #[inline]
    fn stride(&self) -> usize {
        self.channels + 1
    }

    pub fn len(&self) -> usize {
        self.data.len() / self.stride()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn depth(&self, index: usize) -> f32 {
        self.data[index * self.stride()]
    }

    pub fn visibility(&self, index: usize) -> Color {
        let start = index * self.stride() + 1;
        Color::from_components(&self.data[start..start + self.channels])
    }

    pub fn iter(&self) -> impl Iterator<Item = VisibilityNode> + 'a {
        let channels = self.channels;
        self.data.chunks_exact(channels + 1).map(|node| {
            VisibilityNode::new(node[0], Color::from_components(&node[1..]))
        })
    }

    /// Visibility of the last node at or before `depth`; white before the
    /// first node, the residual visibility past the last one.
    pub fn visibility_at(&self, depth: f32) -> Color {
        let mut low = 0;
        let mut high = self.len();
        while low < high {
            let mid = low + (high - low) / 2;
            if self.depth(mid) <= depth {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        match low {
            0 => Color::WHITE,
            _ => self.visibility(low - 1),
        }
    }

    pub fn to_curve(&self) -> VisibilityCurve {
        VisibilityCurve::from_nodes(self.iter().collect())
    }
}
