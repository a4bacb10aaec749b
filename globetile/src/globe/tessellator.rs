//! Level-of-detail terrain tessellation.
//!
//! Each frame the tessellator walks the terrain tile pyramid from the
//! top-level tiles down, keeping a tile when it is detailed enough for its
//! distance from the eye and subdividing it otherwise. The kept tiles form
//! the frame's [`Terrain`].
//!
//! # Crack-free borders
//!
//! Adjacent kept tiles may sit at different levels. The tessellator first
//! refines the active set until neighbors differ by at most one level, then
//! records every tile's neighbor levels. A tile bordering a coarser neighbor
//! draws that edge with the half-resolution strip from
//! [`SharedTileGeometry`], and its edge elevations are replaced by the
//! coarser grid's samples so the shared edge matches on both sides.

use std::collections::HashMap;
use std::rc::Rc;

use glam::DMat4;
use tracing::debug;

use super::{BorderResolution, SharedTileGeometry, Terrain};
use crate::cache::TileCache;
use crate::error::ConfigurationError;
use crate::geom::{Location, Sector};
use crate::level::LevelSet;
use crate::render::DrawContext;
use crate::tile::{Edge, TerrainTile, TerrainTileFactory, Tile, TileNode};

/// Default number of terrain levels.
pub const DEFAULT_NUM_LEVELS: usize = 15;

/// Default terrain tile size in grid cells.
pub const DEFAULT_TILE_SIZE: u32 = 32;

/// Default level-zero tile delta in degrees.
pub const DEFAULT_LEVEL_ZERO_DELTA: f64 = 45.0;

/// Default detail control: a grid cell may span this many pixels.
pub const DEFAULT_DETAIL_CONTROL: f64 = 40.0;

/// Detail multiplier for tiles at or beyond [`POLAR_LATITUDE`].
const POLAR_DETAIL_MULTIPLIER: f64 = 2.0;

/// Latitude beyond which a tile is treated as polar.
pub(crate) const POLAR_LATITUDE: f64 = 75.0;

/// True when the sector lies entirely poleward of [`POLAR_LATITUDE`].
pub(crate) fn is_polar(sector: &Sector) -> bool {
    sector.min_latitude >= POLAR_LATITUDE || sector.max_latitude <= -POLAR_LATITUDE
}

/// Tessellator settings.
#[derive(Debug, Clone, PartialEq)]
pub struct TessellatorConfig {
    pub sector: Sector,
    pub level_zero_delta: Location,
    pub num_levels: usize,
    pub tile_width: u32,
    pub tile_height: u32,
    pub detail_control: f64,
}

impl Default for TessellatorConfig {
    fn default() -> Self {
        Self {
            sector: Sector::FULL_SPHERE,
            level_zero_delta: Location::new(DEFAULT_LEVEL_ZERO_DELTA, DEFAULT_LEVEL_ZERO_DELTA),
            num_levels: DEFAULT_NUM_LEVELS,
            tile_width: DEFAULT_TILE_SIZE,
            tile_height: DEFAULT_TILE_SIZE,
            detail_control: DEFAULT_DETAIL_CONTROL,
        }
    }
}

impl TessellatorConfig {
    pub fn with_num_levels(mut self, num_levels: usize) -> Self {
        self.num_levels = num_levels;
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

    pub fn with_level_zero_delta(mut self, delta: Location) -> Self {
        self.level_zero_delta = delta;
        self
    }
}

/// Everything a tessellation depends on besides the tile tree itself.
#[derive(Debug, Clone, PartialEq)]
struct FrameStamp {
    globe_state_key: String,
    vertical_exaggeration: f64,
    elevation_timestamp: u64,
    modelview_projection: DMat4,
}

/// Corner key: exact latitude and longitude bits. Tile corners come from
/// repeated halving of dyadic values, so equal corners compare bit-equal.
type CornerKey = (u64, u64);

fn corner_key(latitude: f64, longitude: f64) -> CornerKey {
    // `+ 0.0` folds -0.0 into 0.0
    ((latitude + 0.0).to_bits(), (longitude + 0.0).to_bits())
}

/// Levels of the tiles whose respective corner lies on a point.
#[derive(Debug, Clone, Copy, Default)]
struct CornerTiles {
    /// Tile whose south-west corner is here.
    sw: Option<usize>,
    se: Option<usize>,
    nw: Option<usize>,
    ne: Option<usize>,
}

/// Produces the frame's [`Terrain`] from a draw context.
pub struct Tessellator {
    config: TessellatorConfig,
    levels: LevelSet,
    shared_geometry: Rc<SharedTileGeometry>,
    tile_cache: TileCache<Rc<TerrainTile>>,
    top_level_tiles: Vec<Rc<TerrainTile>>,
    top_level_globe_key: Option<String>,
    last_result: Option<(FrameStamp, Rc<Terrain>)>,
}

impl Tessellator {
    /// Creates a tessellator.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] for an invalid level set, odd tile
    /// dimensions or a non-positive detail control.
    pub fn new(config: TessellatorConfig) -> Result<Self, ConfigurationError> {
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
        let shared_geometry = Rc::new(SharedTileGeometry::new(config.tile_width, config.tile_height)?);

        Ok(Self {
            config,
            levels,
            shared_geometry,
            tile_cache: TileCache::new(),
            top_level_tiles: Vec::new(),
            top_level_globe_key: None,
            last_result: None,
        })
    }

    pub fn config(&self) -> &TessellatorConfig {
        &self.config
    }

    pub fn levels(&self) -> &LevelSet {
        &self.levels
    }

    pub fn shared_geometry(&self) -> &Rc<SharedTileGeometry> {
        &self.shared_geometry
    }

    /// Tessellates the globe for the current view.
    ///
    /// Returns the previous result unchanged when neither the globe, the
    /// vertical exaggeration, the elevation data nor the view changed.
    /// Returns `None` when the draw context cannot be rendered or no tile
    /// is visible. The result is also stored in `dc.terrain`.
    pub fn tessellate(&mut self, dc: &mut DrawContext) -> Option<Rc<Terrain>> {
        dc.globe.process_elevation_completions();

        if !dc.is_usable() {
            dc.terrain = None;
            return None;
        }

        let stamp = FrameStamp {
            globe_state_key: dc.globe.state_key().to_string(),
            vertical_exaggeration: dc.vertical_exaggeration,
            elevation_timestamp: dc.globe.elevation_timestamp(),
            modelview_projection: *dc.modelview_projection(),
        };
        if let Some((last_stamp, terrain)) = &self.last_result {
            if *last_stamp == stamp {
                dc.frame_statistics.terrain_tile_count = terrain.tiles().len();
                dc.terrain = Some(terrain.clone());
                return Some(terrain.clone());
            }
        }

        if self.top_level_globe_key.as_deref() != Some(stamp.globe_state_key.as_str()) {
            self.create_top_level_tiles(&stamp.globe_state_key);
        }

        let mut active = Vec::new();
        for tile in self.top_level_tiles.clone() {
            tile.tile().update(dc);
            if tile.tile().is_visible(dc) {
                self.add_tile_or_descendants(dc, tile, &mut active);
            }
        }

        if active.is_empty() {
            debug!("No terrain tiles visible");
            self.last_result = None;
            dc.terrain = None;
            return None;
        }

        let active = self.refine_neighbors(dc, active);
        set_neighbors(&active);
        for tile in &active {
            self.regenerate_geometry_if_needed(dc, tile);
        }

        debug!(
            tiles = active.len(),
            regenerated = dc.frame_statistics.geometry_regeneration_count,
            "Tessellated terrain"
        );

        let terrain = Rc::new(Terrain::new(
            stamp.globe_state_key.clone(),
            stamp.vertical_exaggeration,
            active,
            self.shared_geometry.clone(),
        ));
        dc.frame_statistics.terrain_tile_count = terrain.tiles().len();
        dc.terrain = Some(terrain.clone());
        self.last_result = Some((stamp, terrain.clone()));
        Some(terrain)
    }

    fn create_top_level_tiles(&mut self, globe_state_key: &str) {
        self.tile_cache.clear();
        self.top_level_tiles =
            Tile::create_tiles_for_level(self.levels.first_level(), &TerrainTileFactory)
                .into_iter()
                .map(Rc::new)
                .collect();
        self.top_level_globe_key = Some(globe_state_key.to_string());
    }

    fn meets_render_criteria(&self, dc: &DrawContext, tile: &TerrainTile) -> bool {
        let tile = tile.tile();
        let mut detail = self.config.detail_control;
        if is_polar(tile.sector()) {
            detail *= POLAR_DETAIL_MULTIPLIER;
        }
        tile.level().is_last_level() || !tile.must_subdivide(dc, detail)
    }

    fn add_tile_or_descendants(
        &mut self,
        dc: &mut DrawContext,
        tile: Rc<TerrainTile>,
        active: &mut Vec<Rc<TerrainTile>>,
    ) {
        if self.meets_render_criteria(dc, &tile) {
            active.push(tile);
            return;
        }

        for child in self.visible_children(dc, &tile) {
            self.add_tile_or_descendants(dc, child, active);
        }
    }

    /// The children of `tile` that lie in the level set's sector and are
    /// visible, updated for the current frame.
    fn visible_children(&mut self, dc: &mut DrawContext, tile: &TerrainTile) -> Vec<Rc<TerrainTile>> {
        let Some(next_level) = self.levels.next_level(tile.tile().level()) else {
            return Vec::new();
        };
        let children =
            tile.tile()
                .subdivide_to_cache(next_level, &TerrainTileFactory, &mut self.tile_cache);

        children
            .into_iter()
            .filter(|child| {
                child.tile().update(dc);
                self.levels.sector.intersects(child.tile().sector()) && child.tile().is_visible(dc)
            })
            .collect()
    }

    /// Replaces tiles until no tile touches one more than a level finer.
    fn refine_neighbors(
        &mut self,
        dc: &mut DrawContext,
        mut active: Vec<Rc<TerrainTile>>,
    ) -> Vec<Rc<TerrainTile>> {
        loop {
            let mut finest: HashMap<CornerKey, usize> = HashMap::new();
            for tile in &active {
                let level = tile.tile().level_number();
                for key in tile_corners(tile.tile().sector()) {
                    let entry = finest.entry(key).or_insert(level);
                    *entry = (*entry).max(level);
                }
            }

            let mut refined = Vec::with_capacity(active.len());
            let mut changed = false;
            for tile in active {
                let level = tile.tile().level_number();
                let too_coarse = tile_corners(tile.tile().sector())
                    .iter()
                    .any(|key| finest.get(key).is_some_and(|&n| n > level + 1));
                if too_coarse && !tile.tile().level().is_last_level() {
                    refined.extend(self.visible_children(dc, &tile));
                    changed = true;
                } else {
                    refined.push(tile);
                }
            }

            active = refined;
            if !changed {
                return active;
            }
        }
    }

    fn regenerate_geometry_if_needed(&self, dc: &mut DrawContext, tile: &TerrainTile) {
        tile.set_elevation_timestamp(dc.globe.elevation_timestamp());
        let state_key = format!(
            "{} {} {}",
            dc.globe.state_key(),
            tile.state_key(),
            dc.vertical_exaggeration
        );
        if tile.points_state_key().as_deref() == Some(state_key.as_str()) {
            return;
        }

        let points = self.build_points(dc, tile);
        tile.set_geometry(points, tile.tile().reference_point(), state_key);
        dc.frame_statistics.geometry_regeneration_count += 1;
    }

    fn build_points(&self, dc: &mut DrawContext, tile: &TerrainTile) -> Vec<f32> {
        let base = tile.tile();
        let sector = *base.sector();
        let num_lat = base.tile_height() as usize + 1;
        let num_lon = base.tile_width() as usize + 1;

        let mut elevations = vec![0.0; num_lat * num_lon];
        dc.globe.elevations_for_grid(&sector, num_lat, num_lon, &mut elevations);
        if tile.has_coarser_neighbor() {
            align_coarser_edges(dc, tile, num_lat, num_lon, &mut elevations);
        }

        let ve = dc.vertical_exaggeration;
        let reference = base.reference_point();
        let mut points = Vec::with_capacity(3 * num_lat * num_lon);
        for (location, elevation) in sector.grid_locations(num_lat, num_lon).iter().zip(&elevations) {
            let p = dc.globe.compute_point_from_position(
                location.latitude,
                location.longitude,
                elevation * ve,
            ) - reference;
            points.extend_from_slice(&[p.x as f32, p.y as f32, p.z as f32]);
        }
        points
    }
}

fn tile_corners(sector: &Sector) -> [CornerKey; 4] {
    [
        corner_key(sector.min_latitude, sector.min_longitude),
        corner_key(sector.min_latitude, sector.max_longitude),
        corner_key(sector.max_latitude, sector.min_longitude),
        corner_key(sector.max_latitude, sector.max_longitude),
    ]
}

/// Records each tile's neighbor level per edge. A neighbor that is the same
/// size or finer has a corner on one of this tile's corners; a neighbor one
/// level coarser shares at least one of the two corners of the common edge.
fn set_neighbors(active: &[Rc<TerrainTile>]) {
    let mut corners: HashMap<CornerKey, CornerTiles> = HashMap::new();
    for tile in active {
        let s = tile.tile().sector();
        let level = Some(tile.tile().level_number());
        corners.entry(corner_key(s.min_latitude, s.min_longitude)).or_default().sw = level;
        corners.entry(corner_key(s.min_latitude, s.max_longitude)).or_default().se = level;
        corners.entry(corner_key(s.max_latitude, s.min_longitude)).or_default().nw = level;
        corners.entry(corner_key(s.max_latitude, s.max_longitude)).or_default().ne = level;
    }

    let at = |latitude: f64, longitude: f64| {
        corners
            .get(&corner_key(latitude, longitude))
            .copied()
            .unwrap_or_default()
    };

    for tile in active {
        let s = tile.tile().sector();
        let sw = at(s.min_latitude, s.min_longitude);
        let se = at(s.min_latitude, s.max_longitude);
        let nw = at(s.max_latitude, s.min_longitude);
        let ne = at(s.max_latitude, s.max_longitude);

        tile.set_neighbor_level(Edge::North, ne.se.or(nw.sw));
        tile.set_neighbor_level(Edge::South, se.ne.or(sw.nw));
        tile.set_neighbor_level(Edge::East, ne.nw.or(se.sw));
        tile.set_neighbor_level(Edge::West, nw.ne.or(sw.se));
    }
}

/// Replaces the samples along each edge that borders a coarser tile with
/// the samples of a half-resolution grid, interpolating the odd vertices.
fn align_coarser_edges(
    dc: &mut DrawContext,
    tile: &TerrainTile,
    num_lat: usize,
    num_lon: usize,
    elevations: &mut [f64],
) {
    let prev_lat = num_lat / 2 + 1;
    let prev_lon = num_lon / 2 + 1;
    let mut prev = vec![0.0; prev_lat * prev_lon];
    dc.globe
        .elevations_for_grid(tile.tile().sector(), prev_lat, prev_lon, &mut prev);

    let last_row = num_lat - 1;
    let last_col = num_lon - 1;
    for edge in Edge::ALL {
        if tile.border_resolution(edge) != BorderResolution::Half {
            continue;
        }

        // (fine grid index, coarse grid index) for vertex k along the edge
        let (count, fine, coarse): (usize, Box<dyn Fn(usize) -> usize>, Box<dyn Fn(usize) -> usize>) =
            match edge {
                Edge::South => (num_lon, Box::new(|k| k), Box::new(|k| k)),
                Edge::North => (
                    num_lon,
                    Box::new(move |k| last_row * num_lon + k),
                    Box::new(move |k| (prev_lat - 1) * prev_lon + k),
                ),
                Edge::West => (num_lat, Box::new(move |k| k * num_lon), Box::new(move |k| k * prev_lon)),
                Edge::East => (
                    num_lat,
                    Box::new(move |k| k * num_lon + last_col),
                    Box::new(move |k| k * prev_lon + prev_lon - 1),
                ),
            };

        for k in (0..count).step_by(2) {
            elevations[fine(k)] = prev[coarse(k / 2)];
        }
        for k in (1..count).step_by(2) {
            elevations[fine(k)] = 0.5 * (elevations[fine(k - 1)] + elevations[fine(k + 1)]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    use crate::cache::GpuResourceCache;
    use crate::globe::{ConstantElevation, ElevationSource, Globe};
    use crate::render::{View, Viewport};
    use crate::test_support::draw_context_looking_at;

    fn tessellator() -> Tessellator {
        Tessellator::new(TessellatorConfig::default().with_tile_size(8, 8)).unwrap()
    }

    /// True when the sectors share a boundary segment of positive length.
    fn share_edge(a: &Sector, b: &Sector) -> bool {
        let lat_overlap = a.max_latitude.min(b.max_latitude) - a.min_latitude.max(b.min_latitude);
        let lon_overlap =
            a.max_longitude.min(b.max_longitude) - a.min_longitude.max(b.min_longitude);
        (lat_overlap > 0.0 && lon_overlap == 0.0) || (lon_overlap > 0.0 && lat_overlap == 0.0)
    }

    #[test]
    fn test_rejects_bad_configuration() {
        assert!(Tessellator::new(TessellatorConfig::default().with_tile_size(31, 32)).is_err());
        assert!(Tessellator::new(TessellatorConfig::default().with_detail_control(0.0)).is_err());
        assert!(Tessellator::new(TessellatorConfig::default().with_num_levels(0)).is_err());
    }

    #[test]
    fn test_unusable_globe_yields_no_terrain() {
        let globe = Globe::new(0.0, 0.0, Box::new(ConstantElevation::new(0.0)));
        let mut dc = DrawContext::new(globe, GpuResourceCache::new(1000, 500).unwrap());
        assert!(tessellator().tessellate(&mut dc).is_none());
        assert!(dc.terrain.is_none());
    }

    #[test]
    fn test_empty_viewport_yields_no_terrain() {
        let mut dc = draw_context_looking_at(0.0, 0.0, 1.0e6);
        let mut view = View::nadir(&dc.globe, 0.0, 0.0, 1.0e6, Viewport::new(800, 600), 45.0);
        view.viewport = Viewport::new(0, 0);
        dc.set_view(&view);
        assert!(tessellator().tessellate(&mut dc).is_none());
    }

    #[test]
    fn test_unchanged_frame_is_memoized() {
        let mut tess = tessellator();
        let mut dc = draw_context_looking_at(30.0, 10.0, 2.0e6);
        let first = tess.tessellate(&mut dc).unwrap();
        let second = tess.tessellate(&mut dc).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        assert!(Rc::ptr_eq(dc.terrain.as_ref().unwrap(), &first));

        dc.vertical_exaggeration = 3.0;
        let third = tess.tessellate(&mut dc).unwrap();
        assert!(!Rc::ptr_eq(&first, &third));
        assert_eq!(third.vertical_exaggeration(), 3.0);
    }

    #[test]
    fn test_closer_view_uses_finer_tiles() {
        let mut tess = tessellator();
        let mut far = draw_context_looking_at(30.0, 10.0, 1.0e7);
        let coarse = tess.tessellate(&mut far).unwrap();
        let mut near = draw_context_looking_at(30.0, 10.0, 5.0e4);
        let fine = tess.tessellate(&mut near).unwrap();

        let max_level = |t: &Terrain| t.tiles().iter().map(|t| t.tile().level_number()).max();
        assert!(max_level(&fine) > max_level(&coarse));
    }

    #[test]
    fn test_neighbors_differ_by_at_most_one_level() {
        let mut tess = tessellator();
        let mut dc = draw_context_looking_at(30.0, 10.0, 2.0e4);
        let terrain = tess.tessellate(&mut dc).unwrap();
        let tiles = terrain.tiles();

        for a in tiles {
            for b in tiles {
                let (sa, sb) = (a.tile().sector(), b.tile().sector());
                if share_edge(sa, sb) {
                    let (la, lb) = (a.tile().level_number(), b.tile().level_number());
                    assert!(la.abs_diff(lb) <= 1, "{} next to {}", a.tile().key(), b.tile().key());
                }
            }
        }
    }

    #[test]
    fn test_coarser_neighbors_are_recorded() {
        let mut tess = tessellator();
        let mut dc = draw_context_looking_at(30.0, 10.0, 2.0e4);
        let terrain = tess.tessellate(&mut dc).unwrap();

        for tile in terrain.tiles() {
            for edge in Edge::ALL {
                if let Some(level) = tile.neighbor_level(edge) {
                    assert!(level.abs_diff(tile.tile().level_number()) <= 1);
                }
            }
        }
        let levels: Vec<_> = terrain.tiles().iter().map(|t| t.tile().level_number()).collect();
        let mixed = levels.iter().min() != levels.iter().max();
        if mixed {
            assert!(terrain.tiles().iter().any(|t| t.has_coarser_neighbor()));
        }
    }

    #[test]
    fn test_every_tile_has_geometry() {
        let mut tess = tessellator();
        let mut dc = draw_context_looking_at(-20.0, 100.0, 5.0e5);
        let terrain = tess.tessellate(&mut dc).unwrap();

        for tile in terrain.tiles() {
            assert_eq!(tile.geometry().points.len(), 3 * 9 * 9);
            assert!(tile.points_state_key().is_some());
        }
        assert_eq!(
            dc.frame_statistics.geometry_regeneration_count,
            terrain.tiles().len()
        );
        assert_eq!(dc.frame_statistics.terrain_tile_count, terrain.tiles().len());
    }

    #[test]
    fn test_surface_point_follows_ellipsoid() {
        let mut tess = tessellator();
        let mut dc = draw_context_looking_at(30.0, 10.0, 2.0e4);
        let terrain = tess.tessellate(&mut dc).unwrap();

        let point = terrain.surface_point(30.0, 10.0, 0.0).unwrap();
        let expected = dc.globe.compute_point_from_position(30.0, 10.0, 0.0);
        assert!((point - expected).length() < 5.0);

        let raised = terrain.surface_point(30.0, 10.0, 100.0).unwrap();
        assert!(((raised - point).length() - 100.0).abs() < 1e-6);
    }

    /// Elevation source whose value the test can change after handing it
    /// to the globe.
    struct SharedElevation(Rc<Cell<(f64, u64)>>);

    impl ElevationSource for SharedElevation {
        fn timestamp(&self) -> u64 {
            self.0.get().1
        }

        fn min_and_max_elevations_for_sector(&mut self, _sector: &Sector) -> Option<(f64, f64)> {
            let e = self.0.get().0;
            Some((e, e))
        }

        fn elevations_for_grid(
            &mut self,
            _sector: &Sector,
            _num_lat: usize,
            _num_lon: usize,
            result: &mut [f64],
        ) -> bool {
            result.fill(self.0.get().0);
            true
        }

        fn elevation_at_location(&mut self, _latitude: f64, _longitude: f64) -> Option<f64> {
            Some(self.0.get().0)
        }
    }

    #[test]
    fn test_elevation_change_regenerates_geometry() {
        let state = Rc::new(Cell::new((0.0, 0)));
        let globe = Globe::wgs84(Box::new(SharedElevation(state.clone())));
        let mut dc = DrawContext::new(globe, GpuResourceCache::new(1000, 500).unwrap());
        let view = View::nadir(&dc.globe, 30.0, 10.0, 2.0e4, Viewport::new(800, 600), 45.0);
        dc.set_view(&view);

        let mut tess = tessellator();
        let before = tess.tessellate(&mut dc).unwrap();
        let low = before.surface_point(30.0, 10.0, 0.0).unwrap();

        state.set((500.0, 1));
        dc.set_view(&view);
        let after = tess.tessellate(&mut dc).unwrap();
        assert!(!Rc::ptr_eq(&before, &after));
        assert!(dc.frame_statistics.geometry_regeneration_count > 0);

        let high = after.surface_point(30.0, 10.0, 0.0).unwrap();
        assert!(((high - low).length() - 500.0).abs() < 1.0);
    }
}
