//! Texture binding shared by every kind of surface tile.

use std::rc::Rc;

use super::{FramebufferTile, ImageTile, TileNode};
use crate::cache::{GpuResourceCache, Texture};
use crate::geom::Sector;

/// Affine map of texture coordinates: `s' = offset_s + scale_s * s`, and
/// likewise for `t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureTransform {
    pub scale_s: f64,
    pub scale_t: f64,
    pub offset_s: f64,
    pub offset_t: f64,
}

impl Default for TextureTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl TextureTransform {
    pub const IDENTITY: TextureTransform = TextureTransform {
        scale_s: 1.0,
        scale_t: 1.0,
        offset_s: 0.0,
        offset_t: 0.0,
    };

    /// Maps the unit square of `inner` onto its position within `outer`.
    pub fn sector_within(inner: &Sector, outer: &Sector) -> Self {
        Self {
            scale_s: inner.delta_longitude() / outer.delta_longitude(),
            scale_t: inner.delta_latitude() / outer.delta_latitude(),
            offset_s: (inner.min_longitude - outer.min_longitude) / outer.delta_longitude(),
            offset_t: (inner.min_latitude - outer.min_latitude) / outer.delta_latitude(),
        }
    }

    pub fn apply(&self, s: f64, t: f64) -> (f64, f64) {
        (
            self.offset_s + self.scale_s * s,
            self.offset_t + self.scale_t * t,
        )
    }

    /// `self` after `inner`: maps through `inner` first.
    pub fn compose(&self, inner: &TextureTransform) -> TextureTransform {
        TextureTransform {
            scale_s: self.scale_s * inner.scale_s,
            scale_t: self.scale_t * inner.scale_t,
            offset_s: self.offset_s + self.scale_s * inner.offset_s,
            offset_t: self.offset_t + self.scale_t * inner.offset_t,
        }
    }
}

/// Capabilities of a tile that can be draped over terrain.
pub trait TextureBinding {
    fn sector(&self) -> &Sector;

    /// The texture to sample, or `None` when nothing is available yet.
    fn bind(&self, cache: &mut GpuResourceCache) -> Option<Texture>;

    /// Composes onto `transform` any mapping needed because the bound
    /// texture covers a different sector than the tile.
    fn apply_internal_transform(&self, cache: &GpuResourceCache, transform: &mut TextureTransform);

    fn size_in_bytes(&self) -> usize;
}

/// The closed set of surface tile kinds.
#[derive(Debug, Clone)]
pub enum SurfaceTile {
    Image(Rc<ImageTile>),
    Framebuffer(Rc<FramebufferTile>),
}

impl SurfaceTile {
    pub fn opacity(&self) -> f64 {
        match self {
            SurfaceTile::Image(tile) => tile.opacity(),
            SurfaceTile::Framebuffer(tile) => tile.opacity(),
        }
    }

    pub fn tile_key(&self) -> &str {
        match self {
            SurfaceTile::Image(tile) => tile.tile().tile_key(),
            SurfaceTile::Framebuffer(tile) => tile.tile().tile_key(),
        }
    }
}

impl TextureBinding for SurfaceTile {
    fn sector(&self) -> &Sector {
        match self {
            SurfaceTile::Image(tile) => tile.sector(),
            SurfaceTile::Framebuffer(tile) => tile.sector(),
        }
    }

    fn bind(&self, cache: &mut GpuResourceCache) -> Option<Texture> {
        match self {
            SurfaceTile::Image(tile) => tile.bind(cache),
            SurfaceTile::Framebuffer(tile) => tile.bind(cache),
        }
    }

    fn apply_internal_transform(&self, cache: &GpuResourceCache, transform: &mut TextureTransform) {
        match self {
            SurfaceTile::Image(tile) => tile.apply_internal_transform(cache, transform),
            SurfaceTile::Framebuffer(tile) => tile.apply_internal_transform(cache, transform),
        }
    }

    fn size_in_bytes(&self) -> usize {
        match self {
            SurfaceTile::Image(tile) => TextureBinding::size_in_bytes(tile.as_ref()),
            SurfaceTile::Framebuffer(tile) => TextureBinding::size_in_bytes(tile.as_ref()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_north_east_quadrant_maps_to_upper_half() {
        let parent = Sector::new(0.0, 10.0, 0.0, 10.0);
        let child = Sector::new(5.0, 10.0, 5.0, 10.0);
        let transform = TextureTransform::sector_within(&child, &parent);
        assert_eq!(transform.scale_s, 0.5);
        assert_eq!(transform.scale_t, 0.5);
        assert_eq!(transform.offset_s, 0.5);
        assert_eq!(transform.offset_t, 0.5);
        assert_eq!(transform.apply(1.0, 1.0), (1.0, 1.0));
    }

    #[test]
    fn test_compose_chains_ancestors() {
        let grandparent = Sector::new(0.0, 8.0, 0.0, 8.0);
        let parent = Sector::new(0.0, 4.0, 4.0, 8.0);
        let child = Sector::new(2.0, 4.0, 4.0, 6.0);

        let child_in_parent = TextureTransform::sector_within(&child, &parent);
        let parent_in_grandparent = TextureTransform::sector_within(&parent, &grandparent);
        let composed = parent_in_grandparent.compose(&child_in_parent);

        assert_eq!(composed, TextureTransform::sector_within(&child, &grandparent));
    }
}
