//! Tiled imagery draped over the terrain.
//!
//! Each frame the layer walks its level pyramid against the current view,
//! collecting the image tiles that meet the on-screen detail criterion.
//! A selected tile whose texture is not resident is requested and, until it
//! arrives, drawn with the texture of the nearest resident ancestor seen
//! during the walk.
//!
//! ```text
//! render(dc)
//!   process_completions  decode arrivals into textures
//!   assemble_tiles       only when invalidated or the view/globe changed
//!   SurfaceTileRenderer  pair current tiles with terrain tiles
//! ```

use std::rc::Rc;
use std::sync::Arc;

use glam::DMat4;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::cache::{MemoryCache, Texture};
use crate::error::{ConfigurationError, RetrievalError};
use crate::geom::{Location, Sector};
use crate::globe::is_polar;
use crate::level::LevelSet;
use crate::render::{DrawContext, SurfaceTileDraw, SurfaceTileRenderer};
use crate::retrieval::{
    RetrievalQueue, RetrievalQueueConfig, RetrievalRequest, Retriever, SubmitOutcome,
    TemplateUrlBuilder, UrlBuilder,
};
use crate::tile::{ImageTile, ImageTileFactory, SurfaceTile, Tile, TileKey, TileNode};

/// Default detail control for imagery.
pub const DEFAULT_IMAGE_DETAIL_CONTROL: f64 = 1.75;

/// Detail multiplier for polar tiles.
const POLAR_DETAIL_MULTIPLIER: f64 = 1.2;

/// Default image tile size in pixels.
pub const DEFAULT_IMAGE_TILE_SIZE: u32 = 256;

/// Default tile-table capacity in bytes.
pub const DEFAULT_TILE_TABLE_CAPACITY: usize = 500_000;

/// Default tile-table low-water mark in bytes.
pub const DEFAULT_TILE_TABLE_LOW_WATER: usize = 400_000;

/// Default minimum interval before a failed image is retried, in milliseconds.
pub const DEFAULT_IMAGE_MIN_CHECK_INTERVAL_MS: u64 = 50_000;

/// Settings for a [`TiledImageLayer`].
#[derive(Debug, Clone, PartialEq)]
pub struct ImageLayerConfig {
    pub sector: Sector,
    pub level_zero_delta: Location,
    pub num_levels: usize,
    pub tile_width: u32,
    pub tile_height: u32,
    /// MIME type of the images, e.g. `image/png`.
    pub image_format: String,
    /// Prefix of the texture keys in the GPU resource cache.
    pub cache_path: String,
    pub url_template: String,
    pub detail_control: f64,
    pub tile_table_capacity: usize,
    pub tile_table_low_water: usize,
    pub retrieval: RetrievalQueueConfig,
}

impl ImageLayerConfig {
    pub fn new(
        level_zero_delta: f64,
        num_levels: usize,
        image_format: impl Into<String>,
        cache_path: impl Into<String>,
        url_template: impl Into<String>,
    ) -> Self {
        Self {
            sector: Sector::FULL_SPHERE,
            level_zero_delta: Location::new(level_zero_delta, level_zero_delta),
            num_levels,
            tile_width: DEFAULT_IMAGE_TILE_SIZE,
            tile_height: DEFAULT_IMAGE_TILE_SIZE,
            image_format: image_format.into(),
            cache_path: cache_path.into(),
            url_template: url_template.into(),
            detail_control: DEFAULT_IMAGE_DETAIL_CONTROL,
            tile_table_capacity: DEFAULT_TILE_TABLE_CAPACITY,
            tile_table_low_water: DEFAULT_TILE_TABLE_LOW_WATER,
            retrieval: RetrievalQueueConfig {
                min_check_interval_ms: DEFAULT_IMAGE_MIN_CHECK_INTERVAL_MS,
                ..RetrievalQueueConfig::default()
            },
        }
    }

    pub fn with_sector(mut self, sector: Sector) -> Self {
        self.sector = sector;
        self
    }

    pub fn with_tile_size(mut self, width: u32, height: u32) -> Self {
        self.tile_width = width;
        self.tile_height = height;
        self
    }

    pub fn with_detail_control(mut self, detail_control: f64) -> Self {
        self.detail_control = detail_control;
        self
    }

    pub fn with_retrieval(mut self, retrieval: RetrievalQueueConfig) -> Self {
        self.retrieval = retrieval;
        self
    }
}

/// Imagery assembled per frame from a level pyramid of retrieved images.
pub struct TiledImageLayer<R: Retriever> {
    levels: LevelSet,
    factory: ImageTileFactory,
    url_builder: TemplateUrlBuilder,
    image_format: String,
    detail_control: f64,
    opacity: f64,
    tile_table: MemoryCache<TileKey, Rc<ImageTile>>,
    top_level_tiles: Vec<Rc<ImageTile>>,
    current_tiles: Vec<Rc<ImageTile>>,
    current_ancestor: Option<Rc<ImageTile>>,
    current_tiles_invalid: bool,
    last_modelview_projection: Option<DMat4>,
    last_globe_state_key: Option<String>,
    expiration: Option<u64>,
    refresh_requested: bool,
    queue: RetrievalQueue<R>,
}

impl<R: Retriever> TiledImageLayer<R> {
    /// Creates a layer whose retrievals run on `runtime`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] for an invalid level set, detail
    /// control, tile table size, queue size or URL template.
    pub fn new(
        config: ImageLayerConfig,
        retriever: Arc<R>,
        runtime: Handle,
    ) -> Result<Self, ConfigurationError> {
        if !(config.detail_control.is_finite() && config.detail_control > 0.0) {
            return Err(ConfigurationError::InvalidDetailControl(config.detail_control));
        }
        let levels = LevelSet::new(
            config.sector,
            config.level_zero_delta,
            config.num_levels,
            config.tile_width,
            config.tile_height,
        )?;

        Ok(Self {
            levels,
            factory: ImageTileFactory::new(config.cache_path, &config.image_format),
            url_builder: TemplateUrlBuilder::new(config.url_template)?,
            image_format: config.image_format,
            detail_control: config.detail_control,
            opacity: 1.0,
            tile_table: MemoryCache::new(config.tile_table_capacity, config.tile_table_low_water)?,
            top_level_tiles: Vec::new(),
            current_tiles: Vec::new(),
            current_ancestor: None,
            current_tiles_invalid: true,
            last_modelview_projection: None,
            last_globe_state_key: None,
            expiration: None,
            refresh_requested: false,
            queue: RetrievalQueue::new(retriever, runtime, config.retrieval)?,
        })
    }

    pub fn levels(&self) -> &LevelSet {
        &self.levels
    }

    pub fn opacity(&self) -> f64 {
        self.opacity
    }

    pub fn set_opacity(&mut self, opacity: f64) {
        self.opacity = opacity.clamp(0.0, 1.0);
    }

    /// Tiles selected by the last assembly.
    pub fn current_tiles(&self) -> &[Rc<ImageTile>] {
        &self.current_tiles
    }

    pub fn retrievals_in_flight(&self) -> usize {
        self.queue.in_flight()
    }

    /// True when the frame's terrain overlaps the layer's sector.
    pub fn is_layer_in_view(&self, dc: &DrawContext) -> bool {
        dc.terrain
            .as_ref()
            .is_some_and(|terrain| terrain.sector().intersects(&self.levels.sector))
    }

    /// Marks every texture created so far as expired. Expired textures keep
    /// drawing while their replacements are retrieved.
    pub fn refresh(&mut self) {
        self.refresh_requested = true;
    }

    /// Draws the layer over the frame's terrain.
    pub fn render(&mut self, dc: &mut DrawContext) -> Vec<SurfaceTileDraw> {
        let Some(terrain) = dc.terrain.clone() else {
            return Vec::new();
        };
        if !self.is_layer_in_view(dc) {
            return Vec::new();
        }

        self.process_completions(dc);

        if self.refresh_requested {
            self.refresh_requested = false;
            self.expiration = Some(dc.gpu_resource_cache.now_millis());
            self.current_tiles_invalid = true;
        }

        let modelview_projection = *dc.modelview_projection();
        let view_changed = self.last_modelview_projection != Some(modelview_projection);
        let globe_changed = self.last_globe_state_key.as_deref() != Some(dc.globe.state_key());
        if self.current_tiles_invalid || view_changed || globe_changed {
            self.current_tiles_invalid = false;
            self.assemble_tiles(dc);
        }
        self.last_modelview_projection = Some(modelview_projection);
        self.last_globe_state_key = Some(dc.globe.state_key().to_string());

        if self.current_tiles.is_empty() {
            return Vec::new();
        }
        let tiles: Vec<SurfaceTile> = self
            .current_tiles
            .iter()
            .cloned()
            .map(SurfaceTile::Image)
            .collect();
        SurfaceTileRenderer::render_tiles(dc, &terrain, &tiles, self.opacity)
    }

    /// Requests every top-level tile without requesting redraws, and
    /// applies any that have arrived.
    pub fn pre_populate(&mut self, dc: &mut DrawContext) {
        self.process_completions(dc);
        self.create_top_level_tiles();

        for tile in self.top_level_tiles.clone() {
            if !tile.is_texture_in_memory(&dc.gpu_resource_cache) {
                self.retrieve_tile_image(dc, &tile, true);
            }
        }
    }

    /// True when every top-level tile's texture is resident.
    pub fn is_pre_populated(&self, dc: &DrawContext) -> bool {
        !self.top_level_tiles.is_empty()
            && self
                .top_level_tiles
                .iter()
                .all(|tile| tile.is_texture_in_memory(&dc.gpu_resource_cache))
    }

    /// Decodes arrived images into textures. Returns how many were loaded.
    pub fn process_completions(&mut self, dc: &mut DrawContext) -> usize {
        let mut loaded = 0;
        for (key, data) in self.queue.drain() {
            let Some(tile) = self.tile_for_key(&key) else {
                debug!(tile = %key, "Discarding image for evicted tile");
                continue;
            };

            let image = match image::load_from_memory(&data.bytes) {
                Ok(image) => image,
                Err(e) => {
                    self.queue
                        .mark_absent(key, &RetrievalError::Malformed(e.to_string()));
                    continue;
                }
            };

            let cache = &mut dc.gpu_resource_cache;
            let texture = cache.allocate_texture(image.width(), image.height());
            if let Err(e) = cache.put_resource(tile.image_path(), texture) {
                warn!(tile = %key, error = %e, "Texture rejected by GPU cache");
                continue;
            }
            self.current_tiles_invalid = true;
            loaded += 1;
        }
        loaded
    }

    fn tile_for_key(&mut self, key: &TileKey) -> Option<Rc<ImageTile>> {
        if let Some(tile) = self.tile_table.peek(key) {
            return Some(tile.clone());
        }
        self.top_level_tiles
            .iter()
            .find(|tile| tile.tile().key() == *key)
            .cloned()
    }

    fn create_top_level_tiles(&mut self) {
        if self.top_level_tiles.is_empty() {
            self.top_level_tiles = Tile::create_tiles_for_level(self.levels.first_level(), &self.factory)
                .into_iter()
                .map(Rc::new)
                .collect();
        }
    }

    fn assemble_tiles(&mut self, dc: &mut DrawContext) {
        self.current_tiles.clear();
        self.create_top_level_tiles();

        for tile in self.top_level_tiles.clone() {
            tile.tile().update(dc);
            self.current_ancestor = None;
            if tile.tile().is_visible(dc) {
                self.add_tile_or_descendants(dc, &tile);
            }
        }
        self.current_ancestor = None;

        debug!(tiles = self.current_tiles.len(), "Assembled image tiles");
    }

    fn tile_meets_render_criteria(&self, dc: &DrawContext, tile: &ImageTile) -> bool {
        let mut detail = self.detail_control;
        if is_polar(tile.tile().sector()) {
            detail *= POLAR_DETAIL_MULTIPLIER;
        }
        tile.tile().level().is_last_level() || !tile.tile().must_subdivide(dc, detail)
    }

    fn add_tile_or_descendants(&mut self, dc: &mut DrawContext, tile: &Rc<ImageTile>) {
        if self.tile_meets_render_criteria(dc, tile) {
            self.add_tile(dc, tile);
            return;
        }

        let mut previous_ancestor = None;
        if tile.is_texture_in_memory(&dc.gpu_resource_cache) || tile.tile().level_number() == 0 {
            previous_ancestor = Some(self.current_ancestor.replace(tile.clone()));
        }

        if let Some(next_level) = self.levels.next_level(tile.tile().level()).cloned() {
            let children = tile
                .tile()
                .subdivide_to_cache(&next_level, &self.factory, &mut self.tile_table);
            for child in children {
                child.tile().update(dc);
                if self.levels.sector.intersects(child.tile().sector()) && child.tile().is_visible(dc) {
                    self.add_tile_or_descendants(dc, &child);
                }
            }
        }

        if let Some(previous) = previous_ancestor {
            self.current_ancestor = previous;
        }
    }

    fn add_tile(&mut self, dc: &mut DrawContext, tile: &Rc<ImageTile>) {
        tile.set_fallback_tile(None);

        if let Some(texture) = dc.gpu_resource_cache.resource_for_key(tile.image_path()) {
            tile.set_opacity(1.0);
            self.current_tiles.push(tile.clone());
            if self.is_texture_expired(&texture) {
                self.retrieve_tile_image(dc, tile, false);
            }
            return;
        }

        self.retrieve_tile_image(dc, tile, false);

        if let Some(ancestor) = &self.current_ancestor {
            if ancestor.is_texture_in_memory(&dc.gpu_resource_cache) {
                tile.set_fallback_tile(Some(ancestor));
                self.current_tiles.push(tile.clone());
            }
        }
    }

    fn is_texture_expired(&self, texture: &Texture) -> bool {
        self.expiration
            .is_some_and(|expiration| texture.created_at < expiration)
    }

    fn retrieve_tile_image(&mut self, dc: &mut DrawContext, tile: &ImageTile, suppress_redraw: bool) {
        let key = tile.tile().key();
        let Some(url) = self.url_builder.url_for_tile(&key, &self.image_format) else {
            return;
        };
        let request = RetrievalRequest {
            tile_key: key,
            url,
            accepted_content_types: vec!["image/*".to_string()],
        };

        let redraw = (!suppress_redraw).then_some(&dc.redraw);
        if self.queue.submit(request, redraw) == SubmitOutcome::Submitted {
            dc.frame_statistics.retrievals_submitted += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::GpuResourceCache;
    use crate::clock::ManualClock;
    use crate::globe::{Tessellator, TessellatorConfig};
    use crate::retrieval::mock::MockRetriever;
    use crate::test_support::{draw_context_looking_at, png_bytes};

    fn config(num_levels: usize) -> ImageLayerConfig {
        ImageLayerConfig::new(45.0, num_levels, "image/png", "imagery", "mock://img/{level}/{y}/{x}")
            .with_retrieval(RetrievalQueueConfig {
                queue_size: 64,
                ..RetrievalQueueConfig::default()
            })
    }

    fn layer(retriever: Arc<MockRetriever>, num_levels: usize) -> TiledImageLayer<MockRetriever> {
        TiledImageLayer::new(config(num_levels), retriever, Handle::current()).unwrap()
    }

    fn frame(latitude: f64, longitude: f64, altitude: f64) -> DrawContext {
        let mut dc = draw_context_looking_at(latitude, longitude, altitude);
        let mut tessellator =
            Tessellator::new(TessellatorConfig::default().with_tile_size(8, 8)).unwrap();
        tessellator.tessellate(&mut dc).unwrap();
        dc
    }

    async fn pre_populate(layer: &mut TiledImageLayer<MockRetriever>, dc: &mut DrawContext) {
        for _ in 0..100 {
            layer.pre_populate(dc);
            if layer.is_pre_populated(dc) {
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_rejects_invalid_configuration() {
        let bad_detail = config(3).with_detail_control(0.0);
        assert!(TiledImageLayer::new(bad_detail, MockRetriever::new(), Handle::current()).is_err());

        let mut bad_template = config(3);
        bad_template.url_template = "mock://img".into();
        assert!(TiledImageLayer::new(bad_template, MockRetriever::new(), Handle::current()).is_err());
    }

    #[tokio::test]
    async fn test_no_terrain_draws_nothing() {
        let mut layer = layer(MockRetriever::new(), 3);
        let mut dc = draw_context_looking_at(20.0, 20.0, 1.0e6);
        assert!(layer.render(&mut dc).is_empty());
        assert_eq!(layer.retrievals_in_flight(), 0);
    }

    #[tokio::test]
    async fn test_first_frame_requests_tiles_without_drawing() {
        let retriever = MockRetriever::new();
        let mut layer = layer(retriever, 3);
        let mut dc = frame(20.0, 20.0, 1.0e6);

        assert!(layer.render(&mut dc).is_empty());
        assert!(dc.frame_statistics.retrievals_submitted > 0);
        assert!(layer.current_tiles().is_empty());
    }

    #[tokio::test]
    async fn test_unchanged_frame_does_not_reassemble() {
        let mut layer = layer(MockRetriever::new(), 3);
        let mut dc = frame(20.0, 20.0, 1.0e6);

        layer.render(&mut dc);
        dc.frame_statistics.reset();
        layer.render(&mut dc);
        assert_eq!(dc.frame_statistics.retrievals_submitted, 0);
        assert_eq!(dc.frame_statistics.tile_update_count, 0);
    }

    #[tokio::test]
    async fn test_pre_populate_loads_top_level_without_redraw() {
        let retriever = MockRetriever::new();
        retriever.respond_prefix("mock://img/0/", "image/png", png_bytes(2, 2));
        let mut layer = layer(retriever, 3);
        let mut dc = frame(20.0, 20.0, 1.0e6);

        assert!(!layer.is_pre_populated(&dc));
        pre_populate(&mut layer, &mut dc).await;
        assert!(layer.is_pre_populated(&dc));
        assert!(!dc.redraw.is_requested());
    }

    #[tokio::test]
    async fn test_missing_tiles_fall_back_to_resident_ancestor() {
        let retriever = MockRetriever::new();
        retriever.respond_prefix("mock://img/0/", "image/png", png_bytes(2, 2));
        let mut layer = layer(retriever, 3);
        let mut dc = frame(20.0, 20.0, 1.0e6);
        pre_populate(&mut layer, &mut dc).await;

        let draws = layer.render(&mut dc);
        assert!(!draws.is_empty());

        let fallbacks: Vec<_> = layer
            .current_tiles()
            .iter()
            .filter_map(|tile| tile.fallback_tile())
            .collect();
        assert!(!fallbacks.is_empty());
        assert!(fallbacks.iter().all(|ancestor| ancestor.tile().level_number() == 0));
        assert!(draws.iter().any(|draw| draw.tex_sampler != draw.tex_mask));
    }

    #[tokio::test]
    async fn test_arrivals_replace_fallbacks_and_request_redraw() {
        let retriever = MockRetriever::new();
        retriever.respond_prefix("mock://img/", "image/png", png_bytes(2, 2));
        let mut layer = layer(retriever, 3);
        let mut dc = frame(20.0, 20.0, 1.0e6);

        for _ in 0..100 {
            layer.render(&mut dc);
            if layer.retrievals_in_flight() == 0 && !layer.current_tiles().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert!(dc.redraw.take());
        let draws = layer.render(&mut dc);
        assert!(!draws.is_empty());
        assert!(layer
            .current_tiles()
            .iter()
            .all(|tile| tile.is_texture_in_memory(&dc.gpu_resource_cache)));
        assert!(draws.iter().all(|draw| draw.tex_sampler == draw.tex_mask));
    }

    #[tokio::test]
    async fn test_undecodable_image_is_marked_absent() {
        let retriever = MockRetriever::new();
        retriever.respond_prefix("mock://img/0/", "image/png", b"not a png".to_vec());
        let mut layer = layer(retriever.clone(), 1);
        let mut dc = frame(20.0, 20.0, 1.0e6);

        pre_populate(&mut layer, &mut dc).await;
        let requested = retriever.requested().len();
        assert!(requested > 0);
        assert!(!layer.is_pre_populated(&dc));

        layer.pre_populate(&mut dc);
        assert_eq!(retriever.requested().len(), requested);
    }

    #[tokio::test]
    async fn test_refresh_re_retrieves_expired_textures() {
        let retriever = MockRetriever::new();
        retriever.respond_prefix("mock://img/0/", "image/png", png_bytes(2, 2));
        let mut layer = layer(retriever.clone(), 1);
        let mut dc = frame(20.0, 20.0, 1.0e7);
        let clock = ManualClock::new(1_000);
        dc.gpu_resource_cache =
            GpuResourceCache::with_clock(10_000_000, 8_000_000, clock.clone()).unwrap();

        pre_populate(&mut layer, &mut dc).await;
        assert!(!layer.render(&mut dc).is_empty());
        dc.frame_statistics.reset();

        clock.advance(10);
        layer.refresh();
        layer.render(&mut dc);
        let visible = layer.current_tiles().len();
        assert!(visible > 0);
        assert_eq!(dc.frame_statistics.retrievals_submitted, visible);
    }
}
