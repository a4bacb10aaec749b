//! In-memory caches.
//!
//! - [`MemoryCache`]: size-bounded cache with weighted-age eviction and
//!   removal listeners.
//! - [`TileCache`]: unbounded (level, row, column) lookup table.
//! - [`GpuResourceCache`]: texture handles keyed by string, built on
//!   [`MemoryCache`].

mod gpu;
mod memory;
mod tile;

pub use gpu::{
    GpuResourceCache, Texture, TextureId, DEFAULT_GPU_CACHE_CAPACITY, DEFAULT_GPU_CACHE_LOW_WATER,
};
pub use memory::{CacheListener, ListenerError, ListenerId, MemoryCache};
pub use tile::TileCache;
