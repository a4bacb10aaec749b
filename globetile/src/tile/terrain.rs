//! Terrain tiles: a tile plus its vertex grid.

use std::cell::{Cell, RefCell};

use glam::{DMat4, DVec3};

use super::{Tile, TileFactory, TileNode};
use crate::geom::Sector;
use crate::globe::BorderResolution;
use crate::level::Level;

/// Cardinal direction of a tile edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    North,
    South,
    East,
    West,
}

impl Edge {
    pub const ALL: [Edge; 4] = [Edge::North, Edge::South, Edge::East, Edge::West];

    fn index(self) -> usize {
        match self {
            Edge::North => 0,
            Edge::South => 1,
            Edge::East => 2,
            Edge::West => 3,
        }
    }
}

/// Vertex data of a terrain tile.
#[derive(Debug, Clone, Default)]
pub struct TerrainGeometry {
    /// `(h + 1) * (w + 1)` xyz triples, row-major from the south-west
    /// corner, relative to the tile's reference point.
    pub points: Vec<f32>,
    /// Translation from tile-local to model coordinates.
    pub transform: DMat4,
    /// The state key the points were built for.
    pub points_state_key: Option<String>,
}

/// A tile carrying a vertex grid for rendering terrain.
#[derive(Debug)]
pub struct TerrainTile {
    tile: Tile,
    geometry: RefCell<TerrainGeometry>,
    neighbor_levels: Cell<[Option<usize>; 4]>,
    elevation_timestamp: Cell<u64>,
}

impl TileNode for TerrainTile {
    fn tile(&self) -> &Tile {
        &self.tile
    }
}

impl TerrainTile {
    pub fn new(sector: Sector, level: &Level, row: u32, column: u32) -> Self {
        Self {
            tile: Tile::new(sector, level, row, column),
            geometry: RefCell::new(TerrainGeometry::default()),
            neighbor_levels: Cell::new([None; 4]),
            elevation_timestamp: Cell::new(0),
        }
    }

    /// Level number of the adjacent active tile, or `None` without a neighbor.
    pub fn neighbor_level(&self, edge: Edge) -> Option<usize> {
        self.neighbor_levels.get()[edge.index()]
    }

    pub fn set_neighbor_level(&self, edge: Edge, level: Option<usize>) {
        let mut levels = self.neighbor_levels.get();
        levels[edge.index()] = level;
        self.neighbor_levels.set(levels);
    }

    /// Whether the edge must mate with a coarser neighbor.
    pub fn border_resolution(&self, edge: Edge) -> BorderResolution {
        match self.neighbor_level(edge) {
            Some(level) if level < self.tile.level_number() => BorderResolution::Half,
            _ => BorderResolution::Full,
        }
    }

    /// True when any edge borders a coarser tile.
    pub fn has_coarser_neighbor(&self) -> bool {
        Edge::ALL
            .iter()
            .any(|&edge| self.border_resolution(edge) == BorderResolution::Half)
    }

    pub fn set_elevation_timestamp(&self, timestamp: u64) {
        self.elevation_timestamp.set(timestamp);
    }

    /// Captures everything, other than the globe and vertical exaggeration,
    /// that the vertex data depends on.
    pub fn state_key(&self) -> String {
        let level = self.tile.level_number();
        let compare = |edge: Edge| match self.neighbor_level(edge) {
            Some(n) if n < level => -1,
            Some(n) if n > level => 1,
            _ => 0,
        };
        format!(
            "{}.{}.{}.{}.{}",
            self.elevation_timestamp.get(),
            compare(Edge::North),
            compare(Edge::South),
            compare(Edge::East),
            compare(Edge::West)
        )
    }

    pub fn geometry(&self) -> std::cell::Ref<'_, TerrainGeometry> {
        self.geometry.borrow()
    }

    pub fn points_state_key(&self) -> Option<String> {
        self.geometry.borrow().points_state_key.clone()
    }

    /// Replaces the vertex data.
    pub fn set_geometry(&self, points: Vec<f32>, reference_point: DVec3, state_key: String) {
        *self.geometry.borrow_mut() = TerrainGeometry {
            points,
            transform: DMat4::from_translation(reference_point),
            points_state_key: Some(state_key),
        };
    }

    /// Model point on the tile's surface at a location inside its sector.
    ///
    /// Interpolates within the grid cell containing the location, splitting
    /// the cell along its lower-right to upper-left diagonal. Returns `None`
    /// when the tile has no vertex data yet.
    pub fn surface_point(&self, latitude: f64, longitude: f64) -> Option<DVec3> {
        let geometry = self.geometry.borrow();
        let width = self.tile.tile_width() as usize;
        let height = self.tile.tile_height() as usize;
        if geometry.points.len() < 3 * (width + 1) * (height + 1) {
            return None;
        }

        let sector = self.tile.sector();
        let s = (longitude - sector.min_longitude) / sector.delta_longitude() * width as f64;
        let t = (latitude - sector.min_latitude) / sector.delta_latitude() * height as f64;
        let s = s.clamp(0.0, width as f64);
        let t = t.clamp(0.0, height as f64);

        let si = if s < width as f64 { s.floor() as usize } else { width - 1 };
        let ti = if t < height as f64 { t.floor() as usize } else { height - 1 };
        let sf = if s < width as f64 { s.fract() } else { 1.0 };
        let tf = if t < height as f64 { t.fract() } else { 1.0 };

        let stride = width + 1;
        let vertex = |col: usize, row: usize| {
            let k = 3 * (col + row * stride);
            DVec3::new(
                geometry.points[k] as f64,
                geometry.points[k + 1] as f64,
                geometry.points[k + 2] as f64,
            )
        };
        let lower_left = vertex(si, ti);
        let lower_right = vertex(si + 1, ti);
        let upper_left = vertex(si, ti + 1);
        let upper_right = vertex(si + 1, ti + 1);

        let local = if sf > tf {
            lower_left + sf * (lower_right - lower_left) + tf * (upper_left - lower_left)
        } else {
            upper_right
                + (1.0 - sf) * (upper_left - upper_right)
                + (1.0 - tf) * (lower_right - upper_right)
        };

        Some(geometry.transform.transform_point3(local))
    }
}

/// Builds [`TerrainTile`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerrainTileFactory;

impl TileFactory for TerrainTileFactory {
    type Output = TerrainTile;

    fn create_tile(&self, sector: Sector, level: &Level, row: u32, column: u32) -> TerrainTile {
        TerrainTile::new(sector, level, row, column)
    }
}
