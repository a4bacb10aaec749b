//! Draping surface tiles over the terrain.

use crate::cache::TextureId;
use crate::globe::{IndexRange, Terrain};
use crate::tile::{SurfaceTile, TextureBinding, TextureTransform, TileKey, TileNode};

use super::DrawContext;

/// One textured draw of a terrain tile.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceTileDraw {
    pub terrain_tile: TileKey,
    pub texture: TextureId,
    /// Maps terrain texture coordinates into the bound texture.
    pub tex_sampler: TextureTransform,
    /// Maps terrain texture coordinates into the surface tile's unit square;
    /// fragments outside it are discarded.
    pub tex_mask: TextureTransform,
    pub opacity: f64,
    /// Core and N, S, E, W border index ranges of the shared geometry.
    pub ranges: [IndexRange; 5],
}

/// Pairs each terrain tile with the surface tiles that overlap it.
#[derive(Debug, Default, Clone, Copy)]
pub struct SurfaceTileRenderer;

impl SurfaceTileRenderer {
    /// Produces the draws for `tiles` over `terrain`. Surface tiles without
    /// a bindable texture are skipped.
    pub fn render_tiles(
        dc: &mut DrawContext,
        terrain: &Terrain,
        tiles: &[SurfaceTile],
        opacity: f64,
    ) -> Vec<SurfaceTileDraw> {
        let mut draws = Vec::new();
        let geometry = terrain.shared_geometry();

        for terrain_tile in terrain.tiles() {
            let terrain_sector = terrain_tile.tile().sector();
            let ranges = geometry.draw_ranges(terrain_tile);

            for surface_tile in tiles {
                if !surface_tile.sector().overlaps(terrain_sector) {
                    continue;
                }
                let Some(texture) = surface_tile.bind(&mut dc.gpu_resource_cache) else {
                    continue;
                };

                let tex_mask = TextureTransform::sector_within(terrain_sector, surface_tile.sector());
                let mut tex_sampler = tex_mask;
                surface_tile.apply_internal_transform(&dc.gpu_resource_cache, &mut tex_sampler);

                draws.push(SurfaceTileDraw {
                    terrain_tile: terrain_tile.tile().key(),
                    texture: texture.id,
                    tex_sampler,
                    tex_mask,
                    opacity: opacity * surface_tile.opacity(),
                    ranges,
                });
            }
        }

        dc.frame_statistics.image_tile_count += tiles.len();
        draws
    }
}
