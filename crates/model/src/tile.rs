use std::fmt;

use crate::{Color, TilePos, VisibilityFunction, is_supported_channel_count};

/// Placement of one tile in the image, already reduced for edge tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGeometry {
    pub pos: TilePos,
    pub origin_x: u32,
    pub origin_y: u32,
    pub width: u32,
    pub height: u32,
}

impl TileGeometry {
    pub const fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub const fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.origin_x
            && y >= self.origin_y
            && x - self.origin_x < self.width
            && y - self.origin_y < self.height
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeepTileError {
    UnsupportedChannelCount(u32),
    OffsetsLengthMismatch { expected: usize, actual: usize },
    OffsetsNotStartingAtZero,
    OffsetsDecreasing { index: usize },
    NodeLengthMismatch { expected: usize, actual: usize },
}

impl fmt::Display for DeepTileError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeepTileError::UnsupportedChannelCount(channels) => {
                write!(formatter, "unsupported channel count {channels}")
            }
            DeepTileError::OffsetsLengthMismatch { expected, actual } => write!(
                formatter,
                "function offsets length {actual} does not match expected {expected}"
            ),
            DeepTileError::OffsetsNotStartingAtZero => {
                write!(formatter, "function offsets must start at zero")
            }
            DeepTileError::OffsetsDecreasing { index } => {
                write!(formatter, "function offsets decrease at index {index}")
            }
            DeepTileError::NodeLengthMismatch { expected, actual } => write!(
                formatter,
                "node data length {actual} does not match expected {expected}"
            ),
        }
    }
}

impl std::error::Error for DeepTileError {}

/// Per-pixel visibility functions of one tile, stored as prefix-sum offsets
/// into a flat node array.
#[derive(Debug, Clone, PartialEq)]
pub struct DeepTile {
    geometry: TileGeometry,
    channels: u32,
    // function_offsets.len() == geometry.pixel_count() + 1
    function_offsets: Box<[u32]>,
    // nodes.len() == total_nodes * (channels + 1)
    nodes: Box<[f32]>,
}

impl DeepTile {
    pub fn new(
        geometry: TileGeometry,
        channels: u32,
        function_offsets: Vec<u32>,
        nodes: Vec<f32>,
    ) -> Result<Self, DeepTileError> {
        if !is_supported_channel_count(channels) {
            return Err(DeepTileError::UnsupportedChannelCount(channels));
        }
        let expected_offsets = geometry.pixel_count() + 1;
        if function_offsets.len() != expected_offsets {
            return Err(DeepTileError::OffsetsLengthMismatch {
                expected: expected_offsets,
                actual: function_offsets.len(),
            });
        }
        if function_offsets[0] != 0 {
            return Err(DeepTileError::OffsetsNotStartingAtZero);
        }
        if let Some(index) = function_offsets
            .windows(2)
            .position(|pair| pair[1] < pair[0])
        {
            return Err(DeepTileError::OffsetsDecreasing { index: index + 1 });
        }
        let total_nodes = function_offsets[expected_offsets - 1] as usize;
        let expected_nodes = total_nodes * (channels as usize + 1);
        if nodes.len() != expected_nodes {
            return Err(DeepTileError::NodeLengthMismatch {
                expected: expected_nodes,
                actual: nodes.len(),
            });
        }
        Ok(Self {
            geometry,
            channels,
            function_offsets: function_offsets.into_boxed_slice(),
            nodes: nodes.into_boxed_slice(),
        })
    }

    /// One `(0, white)` node per pixel.
    pub fn fully_visible(geometry: TileGeometry, channels: u32) -> Self {
        assert!(
            is_supported_channel_count(channels),
            "unsupported channel count {channels}"
        );
        let pixel_count = geometry.pixel_count();
        let function_offsets: Box<[u32]> = (0..=pixel_count as u32).collect();
        let mut nodes = Vec::with_capacity(pixel_count * (channels as usize + 1));
        for _ in 0..pixel_count {
            nodes.push(0.0);
            Color::WHITE.push_components(channels as usize, &mut nodes);
        }
        Self {
            geometry,
            channels,
            function_offsets,
            nodes: nodes.into_boxed_slice(),
        }
    }

    pub fn geometry(&self) -> &TileGeometry {
        &self.geometry
    }

    pub fn pos(&self) -> TilePos {
        self.geometry.pos
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    pub fn function_offsets(&self) -> &[u32] {
        &self.function_offsets
    }

    pub fn nodes(&self) -> &[f32] {
        &self.nodes
    }

    pub fn total_nodes(&self) -> usize {
        self.function_offsets[self.function_offsets.len() - 1] as usize
    }

    pub fn function_len(&self, index: usize) -> usize {
        (self.function_offsets[index + 1] - self.function_offsets[index]) as usize
    }

    /// Every pixel holds exactly one node, so the tile never occludes.
    pub fn is_neglectable(&self) -> bool {
        self.function_offsets
            .windows(2)
            .all(|pair| pair[1] - pair[0] == 1)
    }

    /// Function at tile-local `(local_x, local_y)`.
    pub fn function(&self, local_x: u32, local_y: u32) -> VisibilityFunction<'_> {
        assert!(
            local_x < self.geometry.width && local_y < self.geometry.height,
            "local pixel ({local_x}, {local_y}) outside tile {}x{}",
            self.geometry.width,
            self.geometry.height
        );
        let index = local_y as usize * self.geometry.width as usize + local_x as usize;
        let stride = self.channels as usize + 1;
        let start = self.function_offsets[index] as usize * stride;
        let end = self.function_offsets[index + 1] as usize * stride;
        VisibilityFunction::new(self.channels as usize, &self.nodes[start..end])
    }

    /// Function at image pixel `(x, y)`, if this tile owns it.
    pub fn function_at_pixel(&self, x: u32, y: u32) -> Option<VisibilityFunction<'_>> {
        if !self.geometry.contains(x, y) {
            return None;
        }
        Some(self.function(x - self.geometry.origin_x, y - self.geometry.origin_y))
    }

    pub fn visibility_at(&self, x: u32, y: u32, depth: f32) -> Color {
        self.function_at_pixel(x, y)
            .map_or(Color::WHITE, |function| function.visibility_at(depth))
    }

    pub fn greatest_depth(&self) -> f32 {
        self.nodes
            .chunks_exact(self.channels as usize + 1)
            .map(|node| node[0])
            .fold(0.0, f32::max)
    }
}

#[cfg(test)]
mod tests {
    use super::{DeepTile, DeepTileError, TileGeometry};
    use crate::{Color, TilePos};

    fn geometry(width: u32, height: u32) -> TileGeometry {
        TileGeometry {
            pos: TilePos::new(1, 0),
            origin_x: 4,
            origin_y: 0,
            width,
            height,
        }
    }

    #[test]
    fn fully_visible_tile_is_neglectable() {
        let tile = DeepTile::fully_visible(geometry(3, 2), 3);
        assert_eq!(tile.function_offsets(), &[0, 1, 2, 3, 4, 5, 6]);
        assert_eq!(tile.nodes().len(), 6 * 4);
        assert!(tile.is_neglectable());
        assert_eq!(tile.visibility_at(5, 1, 100.0), Color::WHITE);
    }

    #[test]
    fn functions_are_sliced_by_offsets() {
        let offsets = vec![0, 1, 3];
        let nodes = vec![0.0, 1.0, 0.0, 1.0, 2.0, 0.25];
        let tile = DeepTile::new(geometry(2, 1), 1, offsets, nodes).expect("tile");
        assert!(!tile.is_neglectable());
        assert_eq!(tile.total_nodes(), 3);
        assert_eq!(tile.function(0, 0).len(), 1);
        assert_eq!(tile.function(1, 0).len(), 2);
        assert_eq!(tile.visibility_at(5, 0, 3.0), Color::gray(0.25));
        assert_eq!(tile.visibility_at(4, 0, 3.0), Color::WHITE);
        assert!(tile.function_at_pixel(3, 0).is_none());
        assert_eq!(tile.greatest_depth(), 2.0);
    }

    #[test]
    fn inconsistent_offsets_are_rejected() {
        assert_eq!(
            DeepTile::new(geometry(2, 1), 1, vec![0, 1], vec![0.0, 1.0]),
            Err(DeepTileError::OffsetsLengthMismatch {
                expected: 3,
                actual: 2
            })
        );
        assert_eq!(
            DeepTile::new(geometry(2, 1), 1, vec![0, 2, 1], vec![0.0; 2]),
            Err(DeepTileError::OffsetsDecreasing { index: 2 })
        );
        assert_eq!(
            DeepTile::new(geometry(2, 1), 1, vec![0, 1, 2], vec![0.0; 3]),
            Err(DeepTileError::NodeLengthMismatch {
                expected: 4,
                actual: 3
            })
        );
        assert_eq!(
            DeepTile::new(geometry(2, 1), 2, vec![0, 1, 2], vec![0.0; 6]),
            Err(DeepTileError::UnsupportedChannelCount(2))
        );
    }
}
