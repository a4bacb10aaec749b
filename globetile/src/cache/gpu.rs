//! Texture handles keyed by string, bounded by a [`MemoryCache`].
//!
//! The renderer owns the actual GPU objects. This cache only tracks their
//! handles and sizes; when a handle is evicted it is queued for release and
//! the renderer drains the queue with [`GpuResourceCache::take_released`].

use std::cell::RefCell;
use std::rc::Rc;

use tracing::trace;

use super::memory::{CacheListener, ListenerError, MemoryCache};
use crate::clock::{SharedClock, SystemClock};
use crate::error::ConfigurationError;

/// Default GPU cache capacity in bytes.
pub const DEFAULT_GPU_CACHE_CAPACITY: usize = 250 * 1024 * 1024;

/// Default GPU cache low-water mark in bytes.
pub const DEFAULT_GPU_CACHE_LOW_WATER: usize = 200 * 1024 * 1024;

/// Opaque identifier of a texture object owned by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u64);

/// A texture handle plus the metadata the core needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Texture {
    pub id: TextureId,
    pub width: u32,
    pub height: u32,
    /// Clock time at which the texture was created, in milliseconds.
    pub created_at: u64,
}

impl Texture {
    /// Bytes used by the RGBA image plus its mipmap chain.
    pub fn size_in_bytes(&self) -> usize {
        let base = self.width as usize * self.height as usize * 4;
        (base * 4).div_ceil(3).max(1)
    }
}

struct ReleaseQueue {
    released: Rc<RefCell<Vec<TextureId>>>,
}

impl CacheListener<String, Texture> for ReleaseQueue {
    fn entry_removed(&mut self, key: &String, texture: &Texture) -> Result<(), ListenerError> {
        trace!(key = %key, texture = texture.id.0, "Texture released");
        self.released.borrow_mut().push(texture.id);
        Ok(())
    }
}

/// Cache of GPU texture handles keyed by resource name.
pub struct GpuResourceCache {
    cache: MemoryCache<String, Texture>,
    released: Rc<RefCell<Vec<TextureId>>>,
    next_texture_id: u64,
    clock: SharedClock,
}

impl GpuResourceCache {
    pub fn new(capacity: usize, low_water: usize) -> Result<Self, ConfigurationError> {
        Self::with_clock(capacity, low_water, SystemClock::shared())
    }

    pub fn with_clock(
        capacity: usize,
        low_water: usize,
        clock: SharedClock,
    ) -> Result<Self, ConfigurationError> {
        let mut cache = MemoryCache::with_clock(capacity, low_water, clock.clone())?;
        let released = Rc::new(RefCell::new(Vec::new()));
        cache.add_listener(Box::new(ReleaseQueue {
            released: released.clone(),
        }));

        Ok(Self {
            cache,
            released,
            next_texture_id: 1,
            clock,
        })
    }

    /// Issues a fresh texture handle of the given dimensions.
    pub fn allocate_texture(&mut self, width: u32, height: u32) -> Texture {
        let id = TextureId(self.next_texture_id);
        self.next_texture_id += 1;
        Texture {
            id,
            width,
            height,
            created_at: self.clock.now_millis(),
        }
    }

    /// Stores a texture under `key`, evicting older textures if needed.
    pub fn put_resource(
        &mut self,
        key: impl Into<String>,
        texture: Texture,
    ) -> Result<(), ConfigurationError> {
        let size = texture.size_in_bytes();
        self.cache.put_entry(key.into(), texture, size)
    }

    /// Looks up and touches the texture stored under `key`.
    pub fn resource_for_key(&mut self, key: &str) -> Option<Texture> {
        self.cache.entry_for_key(&key.to_string()).cloned()
    }

    pub fn contains_resource(&self, key: &str) -> bool {
        self.cache.contains_key(&key.to_string())
    }

    pub fn remove_resource(&mut self, key: &str) -> bool {
        self.cache.remove_entry(&key.to_string())
    }

    pub fn set_resource_aging_factor(&mut self, key: &str, aging_factor: f64) -> bool {
        self.cache.set_entry_aging_factor(&key.to_string(), aging_factor)
    }

    /// Drops every texture and queues all handles for release.
    pub fn clear(&mut self) {
        self.cache.clear(true);
    }

    /// The cache clock's current time; textures record it as `created_at`.
    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    pub fn used_capacity(&self) -> usize {
        self.cache.used_capacity()
    }

    pub fn capacity(&self) -> usize {
        self.cache.capacity()
    }

    /// Handles evicted since the last call; the renderer must delete them.
    pub fn take_released(&mut self) -> Vec<TextureId> {
        std::mem::take(&mut *self.released.borrow_mut())
    }
}
