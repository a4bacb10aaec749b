//! Imagery tiles with ancestor fallback.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use super::{TextureBinding, TextureTransform, Tile, TileFactory, TileNode};
use crate::cache::{GpuResourceCache, Texture};
use crate::geom::Sector;
use crate::level::Level;

/// A tile whose texture comes from a retrieved image.
///
/// While its own image is not in the GPU cache, the tile may borrow the
/// texture of a cached ancestor, its fallback tile, and sample the part of
/// it that covers the tile's sector. The fallback is held strongly so it
/// outlives eviction from the layer's tile table; ancestors never point back
/// at descendants, so no cycle forms.
#[derive(Debug)]
pub struct ImageTile {
    tile: Tile,
    image_path: String,
    texture: RefCell<Option<Texture>>,
    fallback_tile: RefCell<Option<Rc<ImageTile>>>,
    opacity: Cell<f64>,
}

impl TileNode for ImageTile {
    fn tile(&self) -> &Tile {
        &self.tile
    }
}

impl ImageTile {
    pub fn new(sector: Sector, level: &Level, row: u32, column: u32, image_path: String) -> Self {
        Self {
            tile: Tile::new(sector, level, row, column),
            image_path,
            texture: RefCell::new(None),
            fallback_tile: RefCell::new(None),
            opacity: Cell::new(1.0),
        }
    }

    /// Key of the tile's texture in the GPU resource cache.
    pub fn image_path(&self) -> &str {
        &self.image_path
    }

    pub fn opacity(&self) -> f64 {
        self.opacity.get()
    }

    pub fn set_opacity(&self, opacity: f64) {
        self.opacity.set(opacity.clamp(0.0, 1.0));
    }

    /// The ancestor lending its texture.
    pub fn fallback_tile(&self) -> Option<Rc<ImageTile>> {
        self.fallback_tile.borrow().clone()
    }

    pub fn set_fallback_tile(&self, fallback: Option<&Rc<ImageTile>>) {
        *self.fallback_tile.borrow_mut() = fallback.cloned();
    }

    /// True when the tile's own texture is resident in `cache`.
    pub fn is_texture_in_memory(&self, cache: &GpuResourceCache) -> bool {
        cache.contains_resource(&self.image_path)
    }

    /// The tile's own texture: the one already bound if still resident,
    /// otherwise a same-resolution hit in the cache.
    fn bind_own_texture(&self, cache: &mut GpuResourceCache) -> Option<Texture> {
        let mut own = self.texture.borrow_mut();
        if let Some(texture) = own.as_ref() {
            if cache.contains_resource(&self.image_path) {
                return Some(texture.clone());
            }
        }

        *own = cache.resource_for_key(&self.image_path);
        own.clone()
    }

    /// Mapping from this tile's texture coordinates into `fallback`'s texture.
    pub fn fallback_transform(&self, fallback: &ImageTile) -> TextureTransform {
        TextureTransform::sector_within(self.tile.sector(), fallback.tile.sector())
    }
}

impl TextureBinding for ImageTile {
    fn sector(&self) -> &Sector {
        self.tile.sector()
    }

    /// Own texture first, then the fallback tile's binding.
    fn bind(&self, cache: &mut GpuResourceCache) -> Option<Texture> {
        if let Some(texture) = self.bind_own_texture(cache) {
            return Some(texture);
        }

        self.fallback_tile().and_then(|fallback| fallback.bind(cache))
    }

    fn apply_internal_transform(&self, cache: &GpuResourceCache, transform: &mut TextureTransform) {
        if self.is_texture_in_memory(cache) {
            return;
        }

        if let Some(fallback) = self.fallback_tile() {
            *transform = self.fallback_transform(&fallback).compose(transform);
            fallback.apply_internal_transform(cache, transform);
        }
    }

    fn size_in_bytes(&self) -> usize {
        self.tile.size_in_bytes() + self.image_path.len()
    }
}

/// Builds [`ImageTile`]s whose image path follows
/// `<cache_path>/<level>/<row>/<row>_<column>.<suffix>`.
#[derive(Debug, Clone)]
pub struct ImageTileFactory {
    cache_path: String,
    suffix: String,
}

impl ImageTileFactory {
    pub fn new(cache_path: impl Into<String>, image_format: &str) -> Self {
        let suffix = image_format
            .rsplit('/')
            .next()
            .unwrap_or(image_format)
            .to_string();
        Self {
            cache_path: cache_path.into(),
            suffix,
        }
    }

    pub fn image_path(&self, level: usize, row: u32, column: u32) -> String {
        format!(
            "{}/{}/{}/{}_{}.{}",
            self.cache_path, level, row, row, column, self.suffix
        )
    }
}

impl TileFactory for ImageTileFactory {
    type Output = ImageTile;

    fn create_tile(&self, sector: Sector, level: &Level, row: u32, column: u32) -> ImageTile {
        let path = self.image_path(level.level_number, row, column);
        ImageTile::new(sector, level, row, column, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::Location;
    use crate::level::LevelSet;

    fn levels() -> LevelSet {
        LevelSet::new(Sector::FULL_SPHERE, Location::new(45.0, 45.0), 4, 256, 256).unwrap()
    }

    fn gpu_cache() -> GpuResourceCache {
        GpuResourceCache::new(10_000_000, 8_000_000).unwrap()
    }

    fn parent_and_child() -> (Rc<ImageTile>, Rc<ImageTile>) {
        let levels = levels();
        let factory = ImageTileFactory::new("layer", "image/png");
        let parent = Rc::new(factory.create_tile(
            Sector::new(0.0, 45.0, 0.0, 45.0),
            levels.first_level(),
            2,
            4,
        ));
        let children = parent.tile().subdivide(levels.level(1).unwrap(), &factory);
        let [_, _, _, north_east] = children;
        (parent, Rc::new(north_east))
    }

    #[test]
    fn test_image_path_layout() {
        let factory = ImageTileFactory::new("cache/layer", "image/jpeg");
        assert_eq!(factory.image_path(2, 5, 7), "cache/layer/2/5/5_7.jpeg");
    }

    #[test]
    fn test_bind_prefers_own_texture() {
        let (parent, child) = parent_and_child();
        let mut cache = gpu_cache();
        let parent_texture = cache.allocate_texture(256, 256);
        let child_texture = cache.allocate_texture(256, 256);
        cache.put_resource(parent.image_path(), parent_texture).unwrap();
        cache.put_resource(child.image_path(), child_texture.clone()).unwrap();
        child.set_fallback_tile(Some(&parent));

        assert_eq!(child.bind(&mut cache), Some(child_texture));

        let mut transform = TextureTransform::IDENTITY;
        child.apply_internal_transform(&cache, &mut transform);
        assert_eq!(transform, TextureTransform::IDENTITY);
    }

    #[test]
    fn test_fallback_texture_and_transform() {
        let (parent, child) = parent_and_child();
        let mut cache = gpu_cache();
        let parent_texture = cache.allocate_texture(256, 256);
        cache.put_resource(parent.image_path(), parent_texture.clone()).unwrap();
        child.set_fallback_tile(Some(&parent));

        assert_eq!(child.bind(&mut cache), Some(parent_texture));

        let mut transform = TextureTransform::IDENTITY;
        child.apply_internal_transform(&cache, &mut transform);
        assert_eq!(transform.scale_s, 0.5);
        assert_eq!(transform.scale_t, 0.5);
        assert_eq!(transform.offset_s, 0.5);
        assert_eq!(transform.offset_t, 0.5);
    }

    #[test]
    fn test_no_texture_and_no_fallback_binds_nothing() {
        let (_, child) = parent_and_child();
        let mut cache = gpu_cache();
        assert_eq!(child.bind(&mut cache), None);
    }

    #[test]
    fn test_fallback_outlives_ancestor_handle() {
        let (parent, child) = parent_and_child();
        let mut cache = gpu_cache();
        let parent_texture = cache.allocate_texture(256, 256);
        cache.put_resource(parent.image_path(), parent_texture.clone()).unwrap();
        child.set_fallback_tile(Some(&parent));

        // The layer's tile table may let go of the ancestor while its
        // texture is still resident.
        drop(parent);

        assert!(child.fallback_tile().is_some());
        assert_eq!(child.bind(&mut cache), Some(parent_texture));
        let mut transform = TextureTransform::IDENTITY;
        child.apply_internal_transform(&cache, &mut transform);
        assert_eq!(transform.scale_s, 0.5);
    }

    #[test]
    fn test_cleared_fallback_is_not_used() {
        let (parent, child) = parent_and_child();
        let mut cache = gpu_cache();
        let parent_texture = cache.allocate_texture(256, 256);
        cache.put_resource(parent.image_path(), parent_texture).unwrap();
        child.set_fallback_tile(Some(&parent));
        child.set_fallback_tile(None);

        assert!(child.fallback_tile().is_none());
        assert_eq!(child.bind(&mut cache), None);
    }

    #[test]
    fn test_evicted_own_texture_is_rebound() {
        let (_, child) = parent_and_child();
        let mut cache = gpu_cache();
        let first = cache.allocate_texture(8, 8);
        cache.put_resource(child.image_path(), first.clone()).unwrap();
        assert_eq!(child.bind(&mut cache), Some(first));

        cache.remove_resource(child.image_path());
        assert_eq!(child.bind(&mut cache), None);

        let second = cache.allocate_texture(8, 8);
        cache.put_resource(child.image_path(), second.clone()).unwrap();
        assert_eq!(child.bind(&mut cache), Some(second));
    }
}
