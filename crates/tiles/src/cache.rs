use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use dtex::{DeepReadError, DeepReader};
use model::{Color, DeepTile, TileGrid, TilePos, VisibilityFunction};

pub const DEFAULT_MAX_RESIDENT_TILES: usize = 256;

/// Anything that can produce a tile on demand.
pub trait TileSource: Send + Sync {
    fn grid(&self) -> &TileGrid;
    fn channels(&self) -> u32;
    fn load_tile(&self, pos: TilePos) -> Result<DeepTile, DeepReadError>;
}

impl TileSource for DeepReader {
    fn grid(&self) -> &TileGrid {
        DeepReader::grid(self)
    }

    fn channels(&self) -> u32 {
        DeepReader::channels(self)
    }

    fn load_tile(&self, pos: TilePos) -> Result<DeepTile, DeepReadError> {
        DeepReader::load_tile(self, pos)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileCacheConfig {
    pub max_resident_tiles: usize,
}

impl TileCacheConfig {
    pub fn validate(&self) -> Result<(), TileCacheConfigError> {
        if self.max_resident_tiles == 0 {
            return Err(TileCacheConfigError::ZeroCapacity);
        }
        Ok(())
    }
}

impl Default for TileCacheConfig {
    fn default() -> Self {
        Self {
            max_resident_tiles: DEFAULT_MAX_RESIDENT_TILES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileCacheConfigError {
    ZeroCapacity,
}

impl fmt::Display for TileCacheConfigError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileCacheConfigError::ZeroCapacity => {
                write!(formatter, "tile cache must hold at least one tile")
            }
        }
    }
}

impl std::error::Error for TileCacheConfigError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub decodes: u64,
    pub failures: u64,
    pub evictions: u64,
    pub resident: usize,
}

/// Decoded once; `None` when the load failed.
#[derive(Default)]
struct CacheSlot {
    tile: OnceLock<Option<Arc<DeepTile>>>,
}

struct CacheEntry {
    slot: Arc<CacheSlot>,
    last_used: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<TilePos, CacheEntry>,
    clock: u64,
}

/// Bounded tile cache with one decode per tile.
///
/// The map lock is only held to find or create a slot; the decode runs
/// outside it, so lookups of resident tiles never wait on other keys.
/// Callers racing on the same missing tile share one slot and block until
/// its decode finishes.
pub struct TileCache<S> {
    source: S,
    config: TileCacheConfig,
    state: Mutex<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
    decodes: AtomicU64,
    failures: AtomicU64,
    evictions: AtomicU64,
}

impl<S: TileSource> TileCache<S> {
    pub fn new(source: S, config: TileCacheConfig) -> Result<Self, TileCacheConfigError> {
        config.validate()?;
        Ok(Self {
            source,
            config,
            state: Mutex::new(CacheState::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            decodes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        })
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn grid(&self) -> &TileGrid {
        self.source.grid()
    }

    pub fn config(&self) -> TileCacheConfig {
        self.config
    }

    /// Returns tile `pos`, decoding it if needed. `None` when it cannot be
    /// loaded; the failure is logged once.
    pub fn tile(&self, pos: TilePos) -> Option<Arc<DeepTile>> {
        let slot = {
            let mut state = self.state.lock().expect("tile cache lock poisoned");
            state.clock += 1;
            let now = state.clock;
            match state.entries.get_mut(&pos) {
                Some(entry) => {
                    entry.last_used = now;
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    Arc::clone(&entry.slot)
                }
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    let slot = Arc::new(CacheSlot::default());
                    state.entries.insert(
                        pos,
                        CacheEntry {
                            slot: Arc::clone(&slot),
                            last_used: now,
                        },
                    );
                    self.evict_over_capacity(&mut state, pos);
                    slot
                }
            }
        };
        slot.tile.get_or_init(|| self.load(pos)).clone()
    }

    fn load(&self, pos: TilePos) -> Option<Arc<DeepTile>> {
        match self.source.load_tile(pos) {
            Ok(tile) => {
                self.decodes.fetch_add(1, Ordering::Relaxed);
                Some(Arc::new(tile))
            }
            Err(error) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "tile ({}, {}) unavailable, treating it as fully visible: {error}",
                    pos.y,
                    pos.x
                );
                None
            }
        }
    }

    /// Drops least recently used decoded tiles until the bound holds. Slots
    /// still decoding are kept so concurrent callers never decode twice.
    fn evict_over_capacity(&self, state: &mut CacheState, keep: TilePos) {
        while state.entries.len() > self.config.max_resident_tiles {
            let victim = state
                .entries
                .iter()
                .filter(|(pos, entry)| **pos != keep && entry.slot.tile.get().is_some())
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(pos, _)| *pos);
            let Some(victim) = victim else {
                break;
            };
            state.entries.remove(&victim);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            log::debug!("evicted tile ({}, {})", victim.y, victim.x);
        }
    }

    pub fn tile_for_pixel(&self, x: u32, y: u32) -> Option<Arc<DeepTile>> {
        let pos = self.grid().tile_for_pixel(x, y).ok()?;
        self.tile(pos)
    }

    /// Visibility at pixel `(x, y)` and `depth`. Anything that cannot be
    /// answered from the file is fully visible.
    pub fn visibility_at(&self, x: u32, y: u32, depth: f32) -> Color {
        match self.tile_for_pixel(x, y) {
            Some(tile) => tile.visibility_at(x, y, depth),
            None => Color::WHITE,
        }
    }

    /// Runs `f` on the visibility function of pixel `(x, y)` while its tile
    /// is held. `None` when the pixel is outside the image or its tile could
    /// not be loaded.
    pub fn with_function<R>(
        &self,
        x: u32,
        y: u32,
        f: impl FnOnce(VisibilityFunction<'_>) -> R,
    ) -> Option<R> {
        let tile = self.tile_for_pixel(x, y)?;
        tile.function_at_pixel(x, y).map(f)
    }

    pub fn is_resident(&self, pos: TilePos) -> bool {
        let state = self.state.lock().expect("tile cache lock poisoned");
        state
            .entries
            .get(&pos)
            .is_some_and(|entry| entry.slot.tile.get().is_some())
    }

    pub fn stats(&self) -> CacheStats {
        let resident = self
            .state
            .lock()
            .expect("tile cache lock poisoned")
            .entries
            .len();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            decodes: self.decodes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            resident,
        }
    }
}
