//! The result of one tessellation.

use std::rc::Rc;

use glam::DVec3;

use super::{Globe, SharedTileGeometry};
use crate::geom::{Sector, DEGREES_TO_RADIANS};
use crate::tile::{TerrainTile, TileNode};

/// The set of terrain tiles covering the visible globe for one frame.
#[derive(Debug)]
pub struct Terrain {
    globe_state_key: String,
    vertical_exaggeration: f64,
    sector: Sector,
    tiles: Vec<Rc<TerrainTile>>,
    shared_geometry: Rc<SharedTileGeometry>,
}

impl Terrain {
    pub(crate) fn new(
        globe_state_key: String,
        vertical_exaggeration: f64,
        tiles: Vec<Rc<TerrainTile>>,
        shared_geometry: Rc<SharedTileGeometry>,
    ) -> Self {
        let sector = tiles
            .iter()
            .map(|t| *t.tile().sector())
            .reduce(|a, b| a.union(&b))
            .unwrap_or(Sector::FULL_SPHERE);
        Self {
            globe_state_key,
            vertical_exaggeration,
            sector,
            tiles,
            shared_geometry,
        }
    }

    pub fn globe_state_key(&self) -> &str {
        &self.globe_state_key
    }

    pub fn vertical_exaggeration(&self) -> f64 {
        self.vertical_exaggeration
    }

    /// Union of the tile sectors.
    pub fn sector(&self) -> &Sector {
        &self.sector
    }

    pub fn tiles(&self) -> &[Rc<TerrainTile>] {
        &self.tiles
    }

    pub fn shared_geometry(&self) -> &Rc<SharedTileGeometry> {
        &self.shared_geometry
    }

    /// Model point on the tessellated surface, raised `offset` metres along
    /// the surface normal. `None` when no tile covers the location.
    pub fn surface_point(&self, latitude: f64, longitude: f64, offset: f64) -> Option<DVec3> {
        let tile = self
            .tiles
            .iter()
            .find(|t| t.tile().sector().contains_location(latitude, longitude))?;
        let point = tile.surface_point(latitude, longitude)?;
        if offset == 0.0 {
            return Some(point);
        }
        Some(point + offset * geodetic_normal(latitude, longitude))
    }

    /// Like [`surface_point`](Self::surface_point), but falls back to the
    /// globe's ellipsoid point when the tessellation does not cover the
    /// location.
    pub fn surface_point_or_globe(
        &self,
        globe: &Globe,
        latitude: f64,
        longitude: f64,
        offset: f64,
    ) -> DVec3 {
        self.surface_point(latitude, longitude, offset)
            .unwrap_or_else(|| globe.compute_point_from_position(latitude, longitude, offset))
    }
}

fn geodetic_normal(latitude: f64, longitude: f64) -> DVec3 {
    let (sin_lat, cos_lat) = (latitude * DEGREES_TO_RADIANS).sin_cos();
    let (sin_lon, cos_lon) = (longitude * DEGREES_TO_RADIANS).sin_cos();
    DVec3::new(cos_lat * sin_lon, sin_lat, cos_lat * cos_lon)
}
