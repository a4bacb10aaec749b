//! Geographic tiles and their pyramid addressing.
//!
//! A [`Tile`] is a sector at a (level, row, column) position. Rows grow
//! south to north starting at latitude -90, columns grow west to east
//! starting at longitude -180, so the addressing is global and independent
//! of the level set's sector.
//!
//! Specialised tiles wrap a `Tile` and expose it through [`TileNode`]:
//!
//! - [`TerrainTile`]: vertex positions for the tessellator.
//! - [`ImageTile`]: a texture with an ancestor fallback for imagery layers.
//! - [`FramebufferTile`]: an off-screen render target.
//!
//! Tiles are shared as `Rc<T>`; their identity (sector, level, row, column)
//! never changes after construction, while derived state (extent, sample
//! points, geometry) lives behind interior mutability and is recomputed
//! lazily when the draw context's state changes.

mod framebuffer;
mod image;
mod terrain;
mod texture;

pub use framebuffer::FramebufferTile;
pub use image::{ImageTile, ImageTileFactory};
pub use terrain::{Edge, TerrainGeometry, TerrainTile, TerrainTileFactory};
pub use texture::{SurfaceTile, TextureBinding, TextureTransform};

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use glam::DVec3;
use tracing::warn;

use crate::cache::{MemoryCache, TileCache};
use crate::geom::{BoundingBox, Sector, DEGREES_TO_RADIANS};
use crate::level::Level;
use crate::render::DrawContext;

/// Height in metres of the slab used for a sector whose elevations are all equal.
const FLAT_EXTENT_HEIGHT: f64 = 10.0;

/// Samples per axis used to bound a tile's surface.
const EXTENT_GRID_SIZE: usize = 5;

/// Pyramid address of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    pub level: usize,
    pub row: u32,
    pub column: u32,
}

impl TileKey {
    pub const fn new(level: usize, row: u32, column: u32) -> Self {
        Self { level, row, column }
    }

    /// The key of the tile one level up that contains this one.
    pub fn parent(&self) -> Option<TileKey> {
        self.level
            .checked_sub(1)
            .map(|level| TileKey::new(level, self.row / 2, self.column / 2))
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.level, self.row, self.column)
    }
}

/// Access to the base tile of a specialised tile.
pub trait TileNode {
    fn tile(&self) -> &Tile;
}

/// Creates tiles of a particular kind.
pub trait TileFactory {
    type Output: TileNode;

    fn create_tile(&self, sector: Sector, level: &Level, row: u32, column: u32) -> Self::Output;
}

/// A keyed table in which subdivision looks up and records children.
pub trait TileStore<T> {
    fn lookup(&mut self, key: &TileKey) -> Option<Rc<T>>;
    fn store(&mut self, key: TileKey, tile: Rc<T>);
}

impl<T> TileStore<T> for TileCache<Rc<T>> {
    fn lookup(&mut self, key: &TileKey) -> Option<Rc<T>> {
        self.entry_for_key(key.level, key.row, key.column).cloned()
    }

    fn store(&mut self, key: TileKey, tile: Rc<T>) {
        self.put_entry(key.level, key.row, key.column, tile);
    }
}

impl<T: TileNode> TileStore<T> for MemoryCache<TileKey, Rc<T>> {
    fn lookup(&mut self, key: &TileKey) -> Option<Rc<T>> {
        self.entry_for_key(key).cloned()
    }

    fn store(&mut self, key: TileKey, tile: Rc<T>) {
        let size = tile.tile().size_in_bytes();
        if let Err(e) = self.put_entry(key, tile, size) {
            warn!(tile = %key, error = %e, "Tile table rejected tile");
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct UpdateStamp {
    elevation_timestamp: u64,
    vertical_exaggeration: f64,
    globe_state_key: String,
}

#[derive(Debug, Default)]
struct TileBounds {
    extent: Option<BoundingBox>,
    sample_points: Vec<DVec3>,
    reference_point: DVec3,
    stamp: Option<UpdateStamp>,
}

/// A sector at a fixed (level, row, column) position in the pyramid.
#[derive(Debug)]
pub struct Tile {
    sector: Sector,
    level: Level,
    row: u32,
    column: u32,
    key: TileKey,
    key_string: String,
    bounds: RefCell<TileBounds>,
}

impl TileNode for Tile {
    fn tile(&self) -> &Tile {
        self
    }
}

impl Tile {
    pub fn new(sector: Sector, level: &Level, row: u32, column: u32) -> Self {
        let key = TileKey::new(level.level_number, row, column);
        Self {
            sector,
            level: level.clone(),
            row,
            column,
            key,
            key_string: key.to_string(),
            bounds: RefCell::new(TileBounds::default()),
        }
    }

    pub fn sector(&self) -> &Sector {
        &self.sector
    }

    pub fn level(&self) -> &Level {
        &self.level
    }

    pub fn level_number(&self) -> usize {
        self.level.level_number
    }

    pub fn row(&self) -> u32 {
        self.row
    }

    pub fn column(&self) -> u32 {
        self.column
    }

    pub fn key(&self) -> TileKey {
        self.key
    }

    /// The `"level.row.column"` form of the key.
    pub fn tile_key(&self) -> &str {
        &self.key_string
    }

    pub fn tile_width(&self) -> u32 {
        self.level.tile_width
    }

    pub fn tile_height(&self) -> u32 {
        self.level.tile_height
    }

    pub fn texel_size(&self) -> f64 {
        self.level.texel_size
    }

    /// Approximate memory footprint, used as the tile's cache size.
    pub fn size_in_bytes(&self) -> usize {
        let bounds = self.bounds.borrow();
        std::mem::size_of::<Self>()
            + self.key_string.len()
            + bounds.sample_points.len() * std::mem::size_of::<DVec3>()
    }

    /// The bounding box computed by the last [`update`](Self::update).
    pub fn extent(&self) -> Option<BoundingBox> {
        self.bounds.borrow().extent
    }

    /// Model point at the sector centroid; vertex data is stored relative to it.
    pub fn reference_point(&self) -> DVec3 {
        self.bounds.borrow().reference_point
    }

    /// Minimum distance from `point` to the tile's sample points.
    pub fn distance_to(&self, point: DVec3) -> f64 {
        self.bounds
            .borrow()
            .sample_points
            .iter()
            .map(|p| p.distance_squared(point))
            .fold(f64::INFINITY, f64::min)
            .sqrt()
    }

    /// True when the tile's cell size exceeds the allowed on-screen detail.
    ///
    /// The cell size is one texel projected onto the globe. It is compared
    /// against `detail_factor` pixels at the tile's distance from the eye,
    /// with a floor of half a metre.
    pub fn must_subdivide(&self, dc: &DrawContext, detail_factor: f64) -> bool {
        let cell_size = dc.globe.equatorial_radius() * self.texel_size();
        let distance = self.distance_to(dc.eye_point());
        let pixel_size = dc.pixel_size_at_distance(distance);
        cell_size > (detail_factor * pixel_size).max(0.5)
    }

    /// True when the tile lies within the globe's projection limits and its
    /// extent intersects the view frustum.
    pub fn is_visible(&self, dc: &DrawContext) -> bool {
        if let Some(limits) = dc.globe.projection_limits() {
            if !self.sector.overlaps(limits) {
                return false;
            }
        }
        self.extent()
            .is_some_and(|extent| extent.intersects_frustum(dc.frustum_in_model_coordinates()))
    }

    /// Recomputes extent, sample points and reference point when the globe,
    /// vertical exaggeration or elevation data changed since the last call.
    /// Returns whether anything was recomputed.
    pub fn update(&self, dc: &mut DrawContext) -> bool {
        let stamp = UpdateStamp {
            elevation_timestamp: dc.globe.elevation_timestamp(),
            vertical_exaggeration: dc.vertical_exaggeration,
            globe_state_key: dc.globe.state_key().to_string(),
        };
        if self.bounds.borrow().stamp.as_ref() == Some(&stamp) {
            return false;
        }

        let ve = dc.vertical_exaggeration;
        let (min_elevation, max_elevation) = dc.globe.min_and_max_elevations_for_sector(&self.sector);
        let min_height = min_elevation * ve;
        let mut max_height = max_elevation * ve;
        if min_height == max_height {
            max_height = min_height + FLAT_EXTENT_HEIGHT;
        }

        let globe = &dc.globe;
        let grid = self.sector.grid_locations(EXTENT_GRID_SIZE, EXTENT_GRID_SIZE);
        let corners = grid.iter().flat_map(|loc| {
            [min_height, max_height]
                .map(|h| globe.compute_point_from_position(loc.latitude, loc.longitude, h))
        });
        // The surface bulges between samples; pad by the sagitta of one sample spacing.
        let spacing = self.sector.delta_latitude().max(self.sector.delta_longitude())
            / (EXTENT_GRID_SIZE - 1) as f64;
        let sagitta = globe.equatorial_radius() * (1.0 - (0.5 * spacing * DEGREES_TO_RADIANS).cos());
        let extent = BoundingBox::from_points(corners).map(|b| b.expanded(sagitta));

        let sample_points = self
            .sector
            .grid_locations(3, 3)
            .iter()
            .map(|loc| globe.compute_point_from_position(loc.latitude, loc.longitude, min_height))
            .collect();
        let centroid = self.sector.centroid();
        let reference_point =
            globe.compute_point_from_position(centroid.latitude, centroid.longitude, min_height);

        *self.bounds.borrow_mut() = TileBounds {
            extent,
            sample_points,
            reference_point,
            stamp: Some(stamp),
        };
        dc.frame_statistics.tile_update_count += 1;
        true
    }

    /// The four children at `next_level`, in SW, SE, NW, NE order.
    pub fn subdivide<F: TileFactory>(&self, next_level: &Level, factory: &F) -> [F::Output; 4] {
        self.child_addresses()
            .map(|(sector, row, column)| factory.create_tile(sector, next_level, row, column))
    }

    /// Like [`subdivide`](Self::subdivide), but reuses children already
    /// present in `cache` and records the ones it creates. Repeated calls
    /// return the same `Rc` for each child.
    pub fn subdivide_to_cache<F, S>(
        &self,
        next_level: &Level,
        factory: &F,
        cache: &mut S,
    ) -> [Rc<F::Output>; 4]
    where
        F: TileFactory,
        S: TileStore<F::Output>,
    {
        self.child_addresses().map(|(sector, row, column)| {
            let key = TileKey::new(next_level.level_number, row, column);
            match cache.lookup(&key) {
                Some(child) => child,
                None => {
                    let child = Rc::new(factory.create_tile(sector, next_level, row, column));
                    cache.store(key, child.clone());
                    child
                }
            }
        })
    }

    fn child_addresses(&self) -> [(Sector, u32, u32); 4] {
        let s = &self.sector;
        let (lat_mid, lon_mid) = (s.centroid_latitude(), s.centroid_longitude());
        let (r, c) = (2 * self.row, 2 * self.column);

        [
            (Sector::new(s.min_latitude, lat_mid, s.min_longitude, lon_mid), r, c),
            (Sector::new(s.min_latitude, lat_mid, lon_mid, s.max_longitude), r, c + 1),
            (Sector::new(lat_mid, s.max_latitude, s.min_longitude, lon_mid), r + 1, c),
            (Sector::new(lat_mid, s.max_latitude, lon_mid, s.max_longitude), r + 1, c + 1),
        ]
    }

    // ==================== Grid arithmetic ====================

    /// Row containing `latitude` for tiles of `delta` degrees.
    pub fn compute_row(delta: f64, latitude: f64) -> u32 {
        let mut row = ((latitude + 90.0) / delta).floor();
        if latitude >= 90.0 && row > 0.0 {
            row -= 1.0;
        }
        row.max(0.0) as u32
    }

    /// Column containing `longitude` for tiles of `delta` degrees.
    pub fn compute_column(delta: f64, longitude: f64) -> u32 {
        let mut column = ((longitude + 180.0) / delta).floor();
        if longitude >= 180.0 && column > 0.0 {
            column -= 1.0;
        }
        column.max(0.0) as u32
    }

    /// Last row touched by a sector whose maximum latitude is `max_latitude`.
    pub fn compute_last_row(delta: f64, max_latitude: f64) -> u32 {
        if max_latitude + 90.0 < delta {
            return 0;
        }
        ((max_latitude + 90.0) / delta - 1.0).ceil().max(0.0) as u32
    }

    /// Last column touched by a sector whose maximum longitude is `max_longitude`.
    pub fn compute_last_column(delta: f64, max_longitude: f64) -> u32 {
        if max_longitude + 180.0 < delta {
            return 0;
        }
        ((max_longitude + 180.0) / delta - 1.0).ceil().max(0.0) as u32
    }

    /// Sector of the tile at (`row`, `column`) in `level`.
    pub fn compute_sector(level: &Level, row: u32, column: u32) -> Sector {
        let d_lat = level.tile_delta.latitude;
        let d_lon = level.tile_delta.longitude;
        let min_lat = -90.0 + row as f64 * d_lat;
        let min_lon = -180.0 + column as f64 * d_lon;
        Sector::new(min_lat, min_lat + d_lat, min_lon, min_lon + d_lon)
    }

    /// Every tile of `level` that covers the level's sector.
    pub fn create_tiles_for_level<F: TileFactory>(level: &Level, factory: &F) -> Vec<F::Output> {
        let d_lat = level.tile_delta.latitude;
        let d_lon = level.tile_delta.longitude;
        let sector = &level.sector;

        let first_row = Self::compute_row(d_lat, sector.min_latitude);
        let last_row = Self::compute_last_row(d_lat, sector.max_latitude);
        let first_col = Self::compute_column(d_lon, sector.min_longitude);
        let last_col = Self::compute_last_column(d_lon, sector.max_longitude);

        let mut tiles = Vec::new();
        for row in first_row..=last_row {
            for column in first_col..=last_col {
                let tile_sector = Self::compute_sector(level, row, column);
                tiles.push(factory.create_tile(tile_sector, level, row, column));
            }
        }
        tiles
    }
}

/// Builds plain [`Tile`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicTileFactory;

impl TileFactory for BasicTileFactory {
    type Output = Tile;

    fn create_tile(&self, sector: Sector, level: &Level, row: u32, column: u32) -> Tile {
        Tile::new(sector, level, row, column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::Location;
    use crate::level::LevelSet;
    use crate::test_support::draw_context_looking_at;

    fn levels() -> LevelSet {
        LevelSet::new(Sector::FULL_SPHERE, Location::new(45.0, 45.0), 6, 32, 32).unwrap()
    }

    #[test]
    fn test_tile_key_display_and_parent() {
        let key = TileKey::new(3, 5, 7);
        assert_eq!(key.to_string(), "3.5.7");
        assert_eq!(key.parent(), Some(TileKey::new(2, 2, 3)));
        assert_eq!(TileKey::new(0, 0, 0).parent(), None);
    }

    #[test]
    fn test_create_tiles_for_level_covers_sphere() {
        let levels = levels();
        let tiles = Tile::create_tiles_for_level(levels.first_level(), &BasicTileFactory);
        assert_eq!(tiles.len(), 32);
        assert_eq!(tiles[0].sector(), &Sector::new(-90.0, -45.0, -180.0, -135.0));
        assert_eq!(tiles[31].key(), TileKey::new(0, 3, 7));
    }

    #[test]
    fn test_row_and_column_edges() {
        assert_eq!(Tile::compute_row(45.0, -90.0), 0);
        assert_eq!(Tile::compute_row(45.0, 90.0), 3);
        assert_eq!(Tile::compute_column(45.0, 180.0), 7);
        assert_eq!(Tile::compute_last_row(45.0, 90.0), 3);
        assert_eq!(Tile::compute_last_row(45.0, -60.0), 0);
        assert_eq!(Tile::compute_last_column(45.0, 0.0), 3);
    }

    #[test]
    fn test_subdivide_order_and_containment() {
        let levels = levels();
        let parent = Tile::new(
            Sector::new(0.0, 45.0, 0.0, 45.0),
            levels.first_level(),
            2,
            4,
        );
        let children = parent.subdivide(levels.level(1).unwrap(), &BasicTileFactory);

        let keys: Vec<_> = children.iter().map(|c| c.key()).collect();
        assert_eq!(
            keys,
            vec![
                TileKey::new(1, 4, 8),
                TileKey::new(1, 4, 9),
                TileKey::new(1, 5, 8),
                TileKey::new(1, 5, 9)
            ]
        );
        for child in &children {
            assert!(parent.sector().contains(child.sector()));
            assert_eq!(
                Tile::compute_sector(child.level(), child.row(), child.column()),
                *child.sector()
            );
        }
    }

    #[test]
    fn test_subdivide_to_cache_is_idempotent() {
        let levels = levels();
        let parent = Tile::new(
            Sector::new(0.0, 45.0, 0.0, 45.0),
            levels.first_level(),
            2,
            4,
        );
        let mut cache: TileCache<Rc<Tile>> = TileCache::new();
        let next = levels.level(1).unwrap();

        let first = parent.subdivide_to_cache(next, &BasicTileFactory, &mut cache);
        let second = parent.subdivide_to_cache(next, &BasicTileFactory, &mut cache);

        assert_eq!(cache.len(), 4);
        for (a, b) in first.iter().zip(second.iter()) {
            assert!(Rc::ptr_eq(a, b));
        }
    }

    #[test]
    fn test_update_is_lazy_and_builds_extent() {
        let levels = levels();
        let tile = Tile::new(Sector::new(0.0, 45.0, 0.0, 45.0), levels.first_level(), 2, 4);
        let mut dc = draw_context_looking_at(20.0, 20.0, 5_000_000.0);

        assert!(tile.update(&mut dc));
        assert!(!tile.update(&mut dc));
        assert!(tile.extent().is_some());
        assert!(tile.is_visible(&dc));
        assert_eq!(dc.frame_statistics.tile_update_count, 1);

        dc.vertical_exaggeration = 2.0;
        assert!(tile.update(&mut dc));
    }

    #[test]
    fn test_tile_behind_globe_is_not_visible() {
        let levels = levels();
        let tile = Tile::new(
            Sector::new(0.0, 45.0, 135.0, 180.0),
            levels.first_level(),
            2,
            7,
        );
        let mut dc = draw_context_looking_at(0.0, -90.0, 1_000_000.0);
        tile.update(&mut dc);
        assert!(!tile.is_visible(&dc));
    }

    #[test]
    fn test_must_subdivide_near_but_not_far() {
        let levels = levels();
        let tile = Tile::new(Sector::new(0.0, 45.0, 0.0, 45.0), levels.first_level(), 2, 4);

        let mut near = draw_context_looking_at(22.5, 22.5, 10_000.0);
        tile.update(&mut near);
        assert!(tile.must_subdivide(&near, 40.0));

        let mut far = draw_context_looking_at(22.5, 22.5, 1.0e9);
        tile.update(&mut far);
        assert!(!tile.must_subdivide(&far, 40.0));
    }
}
