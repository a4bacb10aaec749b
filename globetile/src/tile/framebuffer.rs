//! Tiles rendered off-screen.

use std::cell::Cell;

use tracing::warn;

use super::{TextureBinding, TextureTransform, Tile, TileNode};
use crate::cache::{GpuResourceCache, Texture};
use crate::geom::Sector;
use crate::level::Level;

/// A tile whose texture is a render target drawn by the host, such as
/// rasterized vector shapes. It has no fallback: the target is created on
/// first bind if it is not resident.
#[derive(Debug)]
pub struct FramebufferTile {
    tile: Tile,
    cache_key: String,
    texture_width: u32,
    texture_height: u32,
    opacity: Cell<f64>,
}

impl TileNode for FramebufferTile {
    fn tile(&self) -> &Tile {
        &self.tile
    }
}

impl FramebufferTile {
    pub fn new(
        sector: Sector,
        level: &Level,
        row: u32,
        column: u32,
        cache_key: impl Into<String>,
    ) -> Self {
        Self {
            tile: Tile::new(sector, level, row, column),
            cache_key: cache_key.into(),
            texture_width: level.tile_width,
            texture_height: level.tile_height,
            opacity: Cell::new(1.0),
        }
    }

    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    pub fn opacity(&self) -> f64 {
        self.opacity.get()
    }

    pub fn set_opacity(&self, opacity: f64) {
        self.opacity.set(opacity.clamp(0.0, 1.0));
    }
}

impl TextureBinding for FramebufferTile {
    fn sector(&self) -> &Sector {
        self.tile.sector()
    }

    fn bind(&self, cache: &mut GpuResourceCache) -> Option<Texture> {
        if let Some(texture) = cache.resource_for_key(&self.cache_key) {
            return Some(texture);
        }

        let texture = cache.allocate_texture(self.texture_width, self.texture_height);
        match cache.put_resource(self.cache_key.clone(), texture.clone()) {
            Ok(()) => Some(texture),
            Err(e) => {
                warn!(key = %self.cache_key, error = %e, "Render target rejected by GPU cache");
                None
            }
        }
    }

    fn apply_internal_transform(&self, _cache: &GpuResourceCache, _transform: &mut TextureTransform) {}

    fn size_in_bytes(&self) -> usize {
        self.tile.size_in_bytes() + self.cache_key.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::Location;
    use crate::level::LevelSet;

    #[test]
    fn test_bind_creates_render_target_once() {
        let levels =
            LevelSet::new(Sector::FULL_SPHERE, Location::new(45.0, 45.0), 1, 64, 64).unwrap();
        let tile = FramebufferTile::new(
            Sector::new(0.0, 45.0, 0.0, 45.0),
            levels.first_level(),
            2,
            4,
            "shapes/0.2.4",
        );
        let mut cache = GpuResourceCache::new(1_000_000, 500_000).unwrap();

        let first = tile.bind(&mut cache).unwrap();
        let second = tile.bind(&mut cache).unwrap();
        assert_eq!(first, second);
        assert_eq!((first.width, first.height), (64, 64));
        assert!(cache.contains_resource("shapes/0.2.4"));
    }
}
