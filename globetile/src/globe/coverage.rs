//! Elevation data streamed as tiles from a server.
//!
//! The coverage keeps decoded [`ElevationImage`]s in a size-bounded cache
//! keyed by tile address. Queries never wait for data: a missing tile is
//! requested and the query answers from the nearest cached ancestor, or
//! reports the sample as missing.

use std::rc::Rc;
use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{debug, warn};

use super::elevation::ElevationSource;
use super::elevation_image::{ElevationImage, NO_DATA};
use crate::cache::MemoryCache;
use crate::error::ConfigurationError;
use crate::geom::{Location, Sector, DEGREES_TO_RADIANS};
use crate::level::{num_levels_for_resolution, LevelSet};
use crate::render::RedrawHandle;
use crate::retrieval::{
    RetrievalQueue, RetrievalQueueConfig, RetrievalRequest, Retriever, TemplateUrlBuilder,
    UrlBuilder,
};
use crate::tile::{Tile, TileKey};

/// Default level-zero tile delta in degrees.
pub const DEFAULT_ELEVATION_LEVEL_ZERO_DELTA: f64 = 45.0;

/// Default elevation tile size in samples.
pub const DEFAULT_ELEVATION_TILE_SIZE: u32 = 256;

/// Default decoded-image cache capacity in bytes.
pub const DEFAULT_ELEVATION_CACHE_CAPACITY: usize = 10_000_000;

/// Default decoded-image cache low-water mark in bytes.
pub const DEFAULT_ELEVATION_CACHE_LOW_WATER: usize = 8_000_000;

/// Texel density used to choose a level for min/max queries.
const MIN_MAX_SAMPLES_PER_SECTOR: f64 = 64.0;

/// Payload encodings the coverage can decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElevationFormat {
    /// Little-endian signed 16-bit samples.
    Bil16,
    /// Little-endian 32-bit float samples.
    Bil32,
}

impl ElevationFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Bil16 => "application/bil16",
            Self::Bil32 => "application/bil32",
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        match self {
            Self::Bil16 => 2,
            Self::Bil32 => 4,
        }
    }

    /// Parses a MIME type or short name (`bil16`, `application/bil32`).
    pub fn parse(value: &str) -> Result<Self, ConfigurationError> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.strip_prefix("application/").unwrap_or(&normalized) {
            "bil16" | "bil" => Ok(Self::Bil16),
            "bil32" => Ok(Self::Bil32),
            _ => Err(ConfigurationError::UnsupportedFormat(value.to_string())),
        }
    }

    /// Content types a server may label this format with.
    fn accepted_content_types(&self) -> Vec<String> {
        vec![
            self.mime_type().to_string(),
            "text/plain".to_string(),
            "application/octet-stream".to_string(),
        ]
    }
}

/// Settings for a [`TiledElevationCoverage`].
#[derive(Debug, Clone, PartialEq)]
pub struct ElevationCoverageConfig {
    /// Region the coverage has data for.
    pub sector: Sector,
    /// Finest sample spacing in degrees.
    pub resolution: f64,
    pub format: ElevationFormat,
    /// Tile URL template; see [`TemplateUrlBuilder`].
    pub url_template: String,
    pub level_zero_delta: f64,
    pub tile_width: u32,
    pub tile_height: u32,
    pub cache_capacity: usize,
    pub cache_low_water: usize,
    pub retrieval: RetrievalQueueConfig,
}

impl ElevationCoverageConfig {
    pub fn new(
        sector: Sector,
        resolution: f64,
        format: ElevationFormat,
        url_template: impl Into<String>,
    ) -> Self {
        Self {
            sector,
            resolution,
            format,
            url_template: url_template.into(),
            level_zero_delta: DEFAULT_ELEVATION_LEVEL_ZERO_DELTA,
            tile_width: DEFAULT_ELEVATION_TILE_SIZE,
            tile_height: DEFAULT_ELEVATION_TILE_SIZE,
            cache_capacity: DEFAULT_ELEVATION_CACHE_CAPACITY,
            cache_low_water: DEFAULT_ELEVATION_CACHE_LOW_WATER,
            retrieval: RetrievalQueueConfig::default(),
        }
    }

    pub fn with_tile_size(mut self, width: u32, height: u32) -> Self {
        self.tile_width = width;
        self.tile_height = height;
        self
    }

    pub fn with_level_zero_delta(mut self, delta: f64) -> Self {
        self.level_zero_delta = delta;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize, low_water: usize) -> Self {
        self.cache_capacity = capacity;
        self.cache_low_water = low_water;
        self
    }

    pub fn with_retrieval(mut self, retrieval: RetrievalQueueConfig) -> Self {
        self.retrieval = retrieval;
        self
    }
}

/// Elevations assembled from server tiles.
pub struct TiledElevationCoverage<R: Retriever> {
    levels: LevelSet,
    format: ElevationFormat,
    url_builder: TemplateUrlBuilder,
    image_cache: MemoryCache<TileKey, Rc<ElevationImage>>,
    queue: RetrievalQueue<R>,
    redraw: Option<RedrawHandle>,
    timestamp: u64,
}

impl<R: Retriever> TiledElevationCoverage<R> {
    /// Creates a coverage whose retrievals run on `runtime`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] for an invalid sector, resolution,
    /// tile size, cache size, queue size or URL template.
    pub fn new(
        config: ElevationCoverageConfig,
        retriever: Arc<R>,
        runtime: Handle,
    ) -> Result<Self, ConfigurationError> {
        if config.tile_width < 1 || config.tile_height < 1 {
            return Err(ConfigurationError::InvalidTileSize {
                width: config.tile_width,
                height: config.tile_height,
            });
        }
        let first_level_resolution = config.level_zero_delta / config.tile_width as f64;
        let num_levels =
            num_levels_for_resolution(first_level_resolution, config.resolution)?.ceil() as usize;
        let levels = LevelSet::new(
            config.sector,
            Location::new(config.level_zero_delta, config.level_zero_delta),
            num_levels,
            config.tile_width,
            config.tile_height,
        )?;

        Ok(Self {
            levels,
            format: config.format,
            url_builder: TemplateUrlBuilder::new(config.url_template)?,
            image_cache: MemoryCache::new(config.cache_capacity, config.cache_low_water)?,
            queue: RetrievalQueue::new(retriever, runtime, config.retrieval)?,
            redraw: None,
            timestamp: 0,
        })
    }

    /// Requests a redraw through `redraw` whenever a tile arrives.
    pub fn with_redraw_handle(mut self, redraw: RedrawHandle) -> Self {
        self.redraw = Some(redraw);
        self
    }

    pub fn levels(&self) -> &LevelSet {
        &self.levels
    }

    pub fn format(&self) -> ElevationFormat {
        self.format
    }

    pub fn retrievals_in_flight(&self) -> usize {
        self.queue.in_flight()
    }

    pub fn cached_images(&self) -> usize {
        self.image_cache.len()
    }

    fn image(&mut self, key: &TileKey) -> Option<Rc<ElevationImage>> {
        self.image_cache.entry_for_key(key).cloned()
    }

    fn retrieve(&mut self, key: TileKey) {
        let Some(url) = self.url_builder.url_for_tile(&key, self.format.mime_type()) else {
            return;
        };
        let request = RetrievalRequest {
            tile_key: key,
            url,
            accepted_content_types: self.format.accepted_content_types(),
        };
        self.queue.submit(request, self.redraw.as_ref());
    }

    fn lookup_image(&mut self, key: TileKey, retrieve: bool) -> Option<Rc<ElevationImage>> {
        let image = self.image(&key);
        if image.is_none() && retrieve {
            self.retrieve(key);
        }
        image
    }

    /// Cached tiles covering `sector` at `level_number`, substituting the
    /// nearest cached ancestor for missing tiles.
    fn assemble_tiles(&mut self, level_number: usize, sector: &Sector, retrieve: bool) -> Vec<TileKey> {
        let mut tiles = Vec::new();
        let Some(sector) = sector.intersection(&self.levels.sector) else {
            return tiles;
        };
        let Some(level) = self.levels.level(level_number) else {
            return tiles;
        };
        let delta = level.tile_delta;

        let first_row = Tile::compute_row(delta.latitude, sector.min_latitude);
        let last_row = Tile::compute_last_row(delta.latitude, sector.max_latitude);
        let first_col = Tile::compute_column(delta.longitude, sector.min_longitude);
        let last_col = Tile::compute_last_column(delta.longitude, sector.max_longitude);

        for row in first_row..=last_row {
            for column in first_col..=last_col {
                self.add_tile_or_ancestor(TileKey::new(level_number, row, column), retrieve, &mut tiles);
            }
        }
        tiles
    }

    fn add_tile_or_ancestor(&mut self, key: TileKey, retrieve: bool, tiles: &mut Vec<TileKey>) {
        if self.image_cache.contains_key(&key) {
            push_unique(tiles, key);
            return;
        }
        if retrieve {
            self.retrieve(key);
        }
        if key.level == 0 {
            push_unique(tiles, key);
            return;
        }

        let mut ancestor = key.parent();
        while let Some(candidate) = ancestor {
            if self.image_cache.contains_key(&candidate) {
                push_unique(tiles, candidate);
                return;
            }
            if candidate.level == 0 {
                push_unique(tiles, candidate);
                self.retrieve(candidate);
                return;
            }
            ancestor = candidate.parent();
        }
    }

    /// Samples the nearest available level for texture coordinates
    /// `(s, t)`, where `s` runs west to east from -180 and `t` south to
    /// north from -90. Returns `None` when no level has data there.
    fn area_elevation_for_coord(&mut self, s: f64, t: f64, level_number: usize) -> Option<f64> {
        for i in (0..=level_number).rev() {
            let Some(level) = self.levels.level(i) else {
                continue;
            };
            let tile_width = level.tile_width as i64;
            let tile_height = level.tile_height as i64;
            let level_width = (tile_width as f64 * 360.0 / level.tile_delta.longitude).round() as i64;
            let level_height = (tile_height as f64 * 180.0 / level.tile_delta.latitude).round() as i64;

            let t_min = 1.0 / (2.0 * level_height as f64);
            let t_max = 1.0 - t_min;
            let u = level_width as f64 * s.fract();
            let v = level_height as f64 * t.clamp(t_min, t_max);

            let x0 = ((u - 0.5).floor() as i64).rem_euclid(level_width);
            let x1 = (x0 + 1).rem_euclid(level_width);
            let y0 = ((v - 0.5).floor() as i64).clamp(0, level_height - 1);
            let y1 = (y0 + 1).clamp(0, level_height - 1);
            let xf = (u - 0.5) - (u - 0.5).floor();
            let yf = (v - 0.5) - (v - 0.5).floor();
            let retrieve = i == level_number || i == 0;

            let corners = [(x0, y0), (x1, y0), (x0, y1), (x1, y1)];
            let mut pixels = [0.0; 4];
            let mut found = true;
            for (pixel, &(x, y)) in pixels.iter_mut().zip(&corners) {
                let key = TileKey::new(i, (y / tile_height) as u32, (x / tile_width) as u32);
                match self.lookup_image(key, retrieve) {
                    Some(image) => {
                        *pixel = image.pixel((x % tile_width) as usize, (y % tile_height) as usize)
                    }
                    None => found = false,
                }
            }
            if !found {
                continue;
            }

            if pixels.iter().all(|&p| p == NO_DATA) {
                return None;
            }
            return Some(
                (1.0 - xf) * (1.0 - yf) * pixels[0]
                    + xf * (1.0 - yf) * pixels[1]
                    + (1.0 - xf) * yf * pixels[2]
                    + xf * yf * pixels[3],
            );
        }
        None
    }

    fn load_image(&mut self, key: TileKey, bytes: &[u8]) -> Result<(), String> {
        let Some(level) = self.levels.level(key.level) else {
            return Err(format!("tile {} is beyond the last level", key));
        };
        let sector = Tile::compute_sector(level, key.row, key.column);
        let (width, height) = (level.tile_width as usize, level.tile_height as usize);

        let image = ElevationImage::decode(sector, width, height, self.format, bytes).map_err(|e| {
            self.queue.mark_absent(key, &e);
            e.to_string()
        })?;
        let size = image.size_in_bytes().max(1);
        self.image_cache
            .put_entry(key, Rc::new(image), size)
            .map_err(|e| e.to_string())
    }
}

fn push_unique(tiles: &mut Vec<TileKey>, key: TileKey) {
    if !tiles.contains(&key) {
        tiles.push(key);
    }
}

impl<R: Retriever> ElevationSource for TiledElevationCoverage<R> {
    fn timestamp(&self) -> u64 {
        self.timestamp
    }

    fn min_and_max_elevations_for_sector(&mut self, sector: &Sector) -> Option<(f64, f64)> {
        let texel_size = sector.delta_latitude() * DEGREES_TO_RADIANS / MIN_MAX_SAMPLES_PER_SECTOR;
        let level = self.levels.level_for_texel_size(texel_size).level_number;
        let tiles = self.assemble_tiles(level, sector, false);

        let mut extremes: Option<(f64, f64)> = None;
        for key in tiles {
            let Some(image) = self.image(&key) else {
                continue;
            };
            if let Some((min, max)) = image.min_and_max_elevations_for_sector(sector) {
                extremes = Some(match extremes {
                    Some((lo, hi)) => (lo.min(min), hi.max(max)),
                    None => (min, max),
                });
            }
        }
        extremes
    }

    fn elevations_for_grid(
        &mut self,
        sector: &Sector,
        num_lat: usize,
        num_lon: usize,
        result: &mut [f64],
    ) -> bool {
        let count = num_lat * num_lon;
        if count == 0 || result.len() < count {
            return false;
        }

        let grid_resolution =
            sector.delta_latitude() / (num_lat.max(2) - 1) as f64 * DEGREES_TO_RADIANS;
        let level = self.levels.level_for_texel_size(grid_resolution).level_number;
        let coverage = self.levels.sector;

        for (slot, location) in result.iter_mut().zip(sector.grid_locations(num_lat, num_lon)) {
            if !slot.is_nan() || !coverage.contains_location(location.latitude, location.longitude) {
                continue;
            }
            let s = (location.longitude + 180.0) / 360.0;
            let t = (location.latitude + 90.0) / 180.0;
            if let Some(elevation) = self.area_elevation_for_coord(s, t, level) {
                *slot = elevation;
            }
        }

        !result[..count].iter().any(|v| v.is_nan())
    }

    fn elevation_at_location(&mut self, latitude: f64, longitude: f64) -> Option<f64> {
        if !self.levels.sector.contains_location(latitude, longitude) {
            return None;
        }

        let last = self.levels.last_level();
        let mut key = Some(TileKey::new(
            last.level_number,
            Tile::compute_row(last.tile_delta.latitude, latitude),
            Tile::compute_column(last.tile_delta.longitude, longitude),
        ));
        while let Some(current) = key {
            if let Some(image) = self.image(&current) {
                let elevation = image.elevation_at_location(latitude, longitude);
                return (!elevation.is_nan()).then_some(elevation);
            }
            key = current.parent();
        }
        None
    }

    fn process_completions(&mut self) -> usize {
        let completed = self.queue.drain();
        let count = completed.len();
        let mut loaded = 0;

        for (key, data) in completed {
            match self.load_image(key, &data.bytes) {
                Ok(()) => {
                    loaded += 1;
                    debug!(tile = %key, "Elevation tile loaded");
                }
                Err(e) => warn!(tile = %key, error = %e, "Elevation tile rejected"),
            }
        }

        if loaded > 0 {
            self.timestamp += 1;
        }
        count
    }
}
