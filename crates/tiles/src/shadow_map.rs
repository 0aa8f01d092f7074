use std::path::{Path, PathBuf};

use dtex::{DeepReader, Transforms};
use model::{Color, TileGrid};

use crate::cache::{CacheStats, TileCache, TileCacheConfig, TileCacheConfigError};

pub const MAX_FILTER_SAMPLES: u32 = 4096;

/// Quadrilateral in texture space (`s`, `t` in `[0, 1]`) with a depth per
/// corner. Corners run top-left, top-right, bottom-left, bottom-right.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleQuad {
    pub corners: [(f32, f32); 4],
    pub depths: [f32; 4],
}

impl SampleQuad {
    /// Degenerate quad at a single point.
    pub fn point(s: f32, t: f32, depth: f32) -> Self {
        Self {
            corners: [(s, t); 4],
            depths: [depth; 4],
        }
    }

    /// Bilinear position and depth at `(u, v)` inside the quad.
    pub fn lerp(&self, u: f32, v: f32) -> (f32, f32, f32) {
        let mix = |a: f32, b: f32, c: f32, d: f32| {
            let top = a + (b - a) * u;
            let bottom = c + (d - c) * u;
            top + (bottom - top) * v
        };
        let [c0, c1, c2, c3] = self.corners;
        let [d0, d1, d2, d3] = self.depths;
        (
            mix(c0.0, c1.0, c2.0, c3.0),
            mix(c0.1, c1.1, c2.1, c3.1),
            mix(d0, d1, d2, d3),
        )
    }
}

/// Read-side view of a deep shadow map file.
///
/// A file that cannot be read or is not a valid deep texture leaves the map
/// invalid, and every query answers fully visible. Only a bad cache
/// configuration is reported to the caller.
pub struct DeepShadowMap {
    path: PathBuf,
    cache: Option<TileCache<DeepReader>>,
}

impl DeepShadowMap {
    pub fn open(
        path: impl AsRef<Path>,
        config: TileCacheConfig,
    ) -> Result<Self, TileCacheConfigError> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();
        let cache = match DeepReader::open(&path) {
            Ok(reader) => Some(TileCache::new(reader, config)?),
            Err(error) => {
                log::error!(
                    "cannot use {} as a deep shadow map: {error}; shadows disabled",
                    path.display()
                );
                None
            }
        };
        Ok(Self { path, cache })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_valid(&self) -> bool {
        self.cache.is_some()
    }

    pub fn reader(&self) -> Option<&DeepReader> {
        self.cache.as_ref().map(TileCache::source)
    }

    pub fn grid(&self) -> Option<&TileGrid> {
        self.cache.as_ref().map(TileCache::grid)
    }

    pub fn width(&self) -> u32 {
        self.grid().map_or(0, TileGrid::image_width)
    }

    pub fn height(&self) -> u32 {
        self.grid().map_or(0, TileGrid::image_height)
    }

    pub fn channels(&self) -> u32 {
        self.reader().map_or(0, DeepReader::channels)
    }

    /// World-to-screen and world-to-camera matrices recorded at render
    /// time. Identity for an invalid map.
    pub fn transforms(&self) -> Transforms {
        self.reader()
            .map_or(Transforms::IDENTITY, |reader| *reader.transforms())
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(TileCache::stats)
    }

    pub fn visibility_at(&self, x: u32, y: u32, depth: f32) -> Color {
        match &self.cache {
            Some(cache) => cache.visibility_at(x, y, depth),
            None => Color::WHITE,
        }
    }

    /// Lookup with texture coordinates in `[0, 1]`; coordinates outside are
    /// clamped to the border pixels.
    pub fn visibility_at_texture(&self, s: f32, t: f32, depth: f32) -> Color {
        let Some(grid) = self.grid() else {
            return Color::WHITE;
        };
        let x = texel(s, grid.image_width());
        let y = texel(t, grid.image_height());
        self.visibility_at(x, y, depth)
    }

    /// Box-filtered visibility over `quad`, from a stratified grid of at
    /// least `samples` lookups with bilinearly interpolated depth. `samples`
    /// is clamped to `1..=MAX_FILTER_SAMPLES`.
    pub fn filter_visibility(&self, quad: &SampleQuad, samples: u32) -> Color {
        if !self.is_valid() {
            return Color::WHITE;
        }
        let side = (samples.clamp(1, MAX_FILTER_SAMPLES) as f32).sqrt().ceil() as u32;
        let step = 1.0 / side as f32;
        let mut sum = Color::BLACK;
        for row in 0..side {
            for col in 0..side {
                let u = (col as f32 + 0.5) * step;
                let v = (row as f32 + 0.5) * step;
                let (s, t, depth) = quad.lerp(u, v);
                sum = sum + self.visibility_at_texture(s, t, depth);
            }
        }
        sum * (1.0 / (side as f32 * side as f32))
    }

    /// Deepest node depth anywhere in the map.
    pub fn greatest_depth(&self) -> f32 {
        let Some(cache) = &self.cache else {
            return 0.0;
        };
        cache
            .grid()
            .iter_tiles()
            .filter_map(|pos| cache.tile(pos))
            .map(|tile| tile.greatest_depth())
            .fold(0.0, f32::max)
    }

    /// Visibility of every pixel at `depth`, row-major.
    pub fn depth_slice(&self, depth: f32) -> Vec<Color> {
        let Some(cache) = &self.cache else {
            return Vec::new();
        };
        let grid = *cache.grid();
        let width = grid.image_width() as usize;
        let mut pixels = vec![Color::WHITE; width * grid.image_height() as usize];
        for pos in grid.iter_tiles() {
            let Some(tile) = cache.tile(pos) else {
                continue;
            };
            let geometry = *tile.geometry();
            for local_y in 0..geometry.height {
                let row_start = (geometry.origin_y + local_y) as usize * width;
                for local_x in 0..geometry.width {
                    let index = row_start + (geometry.origin_x + local_x) as usize;
                    pixels[index] = tile.function(local_x, local_y).visibility_at(depth);
                }
            }
        }
        pixels
    }
}

fn texel(coordinate: f32, size: u32) -> u32 {
    let scaled = (coordinate * size as f32).floor();
    if scaled <= 0.0 {
        0
    } else {
        (scaled as u32).min(size - 1)
    }
}
