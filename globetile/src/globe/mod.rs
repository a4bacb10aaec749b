//! The globe: ellipsoid geometry plus an elevation source.
//!
//! Positions are converted to model coordinates with the y axis through the
//! north pole and the z axis through (0, 0):
//!
//! ```text
//! x = (N + h) cos(lat) sin(lon)
//! y = (N (1 - e^2) + h) sin(lat)
//! z = (N + h) cos(lat) cos(lon)
//! ```

mod coverage;
mod elevation;
mod elevation_image;
mod geometry;
mod terrain;
mod tessellator;

pub use coverage::{
    ElevationCoverageConfig, ElevationFormat, TiledElevationCoverage,
    DEFAULT_ELEVATION_CACHE_CAPACITY, DEFAULT_ELEVATION_CACHE_LOW_WATER,
    DEFAULT_ELEVATION_LEVEL_ZERO_DELTA, DEFAULT_ELEVATION_TILE_SIZE,
};
pub use elevation::{ConstantElevation, ElevationSource};
pub use elevation_image::{ElevationImage, NO_DATA};
pub use geometry::{BorderResolution, IndexRange, SharedTileGeometry};
pub use terrain::Terrain;
pub use tessellator::{Tessellator, TessellatorConfig};
pub(crate) use tessellator::is_polar;

use std::sync::atomic::{AtomicU64, Ordering};

use glam::DVec3;

use crate::geom::{Sector, DEGREES_TO_RADIANS};

/// WGS84 semi-major axis in metres.
pub const WGS84_SEMI_MAJOR_AXIS: f64 = 6_378_137.0;

/// WGS84 first eccentricity squared.
pub const WGS84_ECCENTRICITY_SQUARED: f64 = 0.006_694_379_990_13;

static NEXT_GLOBE_ID: AtomicU64 = AtomicU64::new(1);

/// An ellipsoidal globe with an attached elevation source.
pub struct Globe {
    id: u64,
    equatorial_radius: f64,
    eccentricity_squared: f64,
    projection_limits: Option<Sector>,
    elevation: Box<dyn ElevationSource>,
    state_key: String,
}

impl Globe {
    /// A WGS84 globe.
    pub fn wgs84(elevation: Box<dyn ElevationSource>) -> Self {
        Self::new(WGS84_SEMI_MAJOR_AXIS, WGS84_ECCENTRICITY_SQUARED, elevation)
    }

    pub fn new(
        equatorial_radius: f64,
        eccentricity_squared: f64,
        elevation: Box<dyn ElevationSource>,
    ) -> Self {
        let mut globe = Self {
            id: NEXT_GLOBE_ID.fetch_add(1, Ordering::Relaxed),
            equatorial_radius,
            eccentricity_squared,
            projection_limits: None,
            elevation,
            state_key: String::new(),
        };
        globe.state_key = globe.compute_state_key();
        globe
    }

    /// Identifies the globe and every parameter that affects its geometry.
    pub fn state_key(&self) -> &str {
        &self.state_key
    }

    pub fn equatorial_radius(&self) -> f64 {
        self.equatorial_radius
    }

    /// A globe with a non-positive or non-finite radius cannot be tessellated.
    pub fn is_usable(&self) -> bool {
        self.equatorial_radius.is_finite() && self.equatorial_radius > 0.0
    }

    pub fn projection_limits(&self) -> Option<&Sector> {
        self.projection_limits.as_ref()
    }

    /// Restricts the region that may be displayed. Changes the state key.
    pub fn set_projection_limits(&mut self, limits: Option<Sector>) {
        self.projection_limits = limits;
        self.state_key = self.compute_state_key();
    }

    pub fn compute_point_from_position(&self, latitude: f64, longitude: f64, altitude: f64) -> DVec3 {
        let (sin_lat, cos_lat) = (latitude * DEGREES_TO_RADIANS).sin_cos();
        let (sin_lon, cos_lon) = (longitude * DEGREES_TO_RADIANS).sin_cos();
        let rpm = self.equatorial_radius
            / (1.0 - self.eccentricity_squared * sin_lat * sin_lat).sqrt();

        DVec3::new(
            (rpm + altitude) * cos_lat * sin_lon,
            (rpm * (1.0 - self.eccentricity_squared) + altitude) * sin_lat,
            (rpm + altitude) * cos_lat * cos_lon,
        )
    }

    /// Timestamp of the most recent change to the elevation data.
    pub fn elevation_timestamp(&self) -> u64 {
        self.elevation.timestamp()
    }

    /// Minimum and maximum elevations in `sector`; `(0, 0)` when unknown.
    pub fn min_and_max_elevations_for_sector(&mut self, sector: &Sector) -> (f64, f64) {
        self.elevation
            .min_and_max_elevations_for_sector(sector)
            .unwrap_or((0.0, 0.0))
    }

    /// Fills `result` with elevations for a `num_lat` x `num_lon` grid over
    /// `sector`. Samples without data are set to zero. Returns whether every
    /// sample had data.
    pub fn elevations_for_grid(
        &mut self,
        sector: &Sector,
        num_lat: usize,
        num_lon: usize,
        result: &mut [f64],
    ) -> bool {
        result.fill(f64::NAN);
        let complete = self
            .elevation
            .elevations_for_grid(sector, num_lat, num_lon, result);
        for value in result.iter_mut().filter(|v| v.is_nan()) {
            *value = 0.0;
        }
        complete
    }

    /// Elevation at a location, or zero when the source has no data there.
    pub fn elevation_at_location(&mut self, latitude: f64, longitude: f64) -> f64 {
        self.elevation
            .elevation_at_location(latitude, longitude)
            .unwrap_or(0.0)
    }

    /// Lets the elevation source apply retrievals that completed since the
    /// previous frame.
    pub fn process_elevation_completions(&mut self) -> usize {
        self.elevation.process_completions()
    }

    pub fn elevation_source_mut(&mut self) -> &mut dyn ElevationSource {
        self.elevation.as_mut()
    }

    fn compute_state_key(&self) -> String {
        let limits = self
            .projection_limits
            .map(|s| s.to_string())
            .unwrap_or_default();
        format!(
            "globe {} {} {} {}",
            self.id, self.equatorial_radius, self.eccentricity_squared, limits
        )
    }
}
