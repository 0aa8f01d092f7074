mod assembler;
mod cache;
mod shadow_map;

pub use assembler::{
    AssembleError, AssembledTile, RegionProtocolError, TileAssembler, TileSink,
};
pub use cache::{
    CacheStats, DEFAULT_MAX_RESIDENT_TILES, TileCache, TileCacheConfig, TileCacheConfigError,
    TileSource,
};
pub use shadow_map::{DeepShadowMap, MAX_FILTER_SAMPLES, SampleQuad};
