use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use dtex::DeepWriterConfig;
use engine::{DEFAULT_CHANNEL_CAPACITY, OutputConfig};
use model::{DEFAULT_BUCKET_SIZE, DEFAULT_TILE_SIZE};
use serde::{Deserialize, Serialize};
use tiles::{DEFAULT_MAX_RESIDENT_TILES, TileCacheConfig};

/// Settings read from `umbra.toml`. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UmbraConfig {
    pub cache: CacheSection,
    pub output: OutputSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSection {
    pub max_resident_tiles: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_resident_tiles: DEFAULT_MAX_RESIDENT_TILES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputSection {
    pub tile_width: u32,
    pub tile_height: u32,
    pub bucket_width: u32,
    pub bucket_height: u32,
    pub channel_capacity: usize,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            tile_width: DEFAULT_TILE_SIZE,
            tile_height: DEFAULT_TILE_SIZE,
            bucket_width: DEFAULT_BUCKET_SIZE,
            bucket_height: DEFAULT_BUCKET_SIZE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl UmbraConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let config: UmbraConfig = toml::from_str(text)?;
        if config.output.channel_capacity == 0 {
            return Err(anyhow::anyhow!("output.channel_capacity must be at least 1"));
        }
        config.cache_config().validate().context("cache.max_resident_tiles")?;
        Ok(config)
    }

    pub fn cache_config(&self) -> TileCacheConfig {
        TileCacheConfig {
            max_resident_tiles: self.cache.max_resident_tiles,
        }
    }

    /// Output settings for an image of the given size. Tile and bucket sizes
    /// are checked when the writer is created.
    pub fn output_config(&self, width: u32, height: u32, channels: u32) -> OutputConfig {
        let mut writer = DeepWriterConfig::new(width, height, channels);
        writer.tile_width = self.output.tile_width;
        writer.tile_height = self.output.tile_height;
        writer.bucket_width = self.output.bucket_width;
        writer.bucket_height = self.output.bucket_height;
        let mut config = OutputConfig::new(writer);
        config.channel_capacity = self.output.channel_capacity;
        config
    }
}
