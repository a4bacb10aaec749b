//! The elevation data interface the globe consumes.

use crate::geom::Sector;

/// A source of elevation samples in metres.
///
/// Methods take `&mut self` because tiled sources touch their caches and
/// may issue retrievals while answering.
pub trait ElevationSource {
    /// Changes whenever elevation data the source can return has changed.
    fn timestamp(&self) -> u64;

    /// Extreme elevations within `sector`, or `None` when the sector lies
    /// outside the source's coverage.
    fn min_and_max_elevations_for_sector(&mut self, sector: &Sector) -> Option<(f64, f64)>;

    /// Writes elevations for a `num_lat` x `num_lon` grid over `sector`,
    /// row-major from the south-west corner. Only `NaN` entries of `result`
    /// are written; entries without data stay `NaN`. Returns whether the
    /// grid is now fully populated.
    fn elevations_for_grid(
        &mut self,
        sector: &Sector,
        num_lat: usize,
        num_lon: usize,
        result: &mut [f64],
    ) -> bool;

    /// Elevation at a single location, or `None` without data.
    fn elevation_at_location(&mut self, latitude: f64, longitude: f64) -> Option<f64>;

    /// Applies data that arrived since the last frame. Returns the number
    /// of completions handled.
    fn process_completions(&mut self) -> usize {
        0
    }
}

/// The same elevation everywhere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantElevation {
    elevation: f64,
    timestamp: u64,
}

impl ConstantElevation {
    pub fn new(elevation: f64) -> Self {
        Self {
            elevation,
            timestamp: 0,
        }
    }

    /// Changes the elevation and advances the timestamp.
    pub fn set_elevation(&mut self, elevation: f64) {
        self.elevation = elevation;
        self.timestamp += 1;
    }
}

impl ElevationSource for ConstantElevation {
    fn timestamp(&self) -> u64 {
        self.timestamp
    }

    fn min_and_max_elevations_for_sector(&mut self, _sector: &Sector) -> Option<(f64, f64)> {
        Some((self.elevation, self.elevation))
    }

    fn elevations_for_grid(
        &mut self,
        _sector: &Sector,
        num_lat: usize,
        num_lon: usize,
        result: &mut [f64],
    ) -> bool {
        for value in result.iter_mut().take(num_lat * num_lon) {
            if value.is_nan() {
                *value = self.elevation;
            }
        }
        true
    }

    fn elevation_at_location(&mut self, _latitude: f64, _longitude: f64) -> Option<f64> {
        Some(self.elevation)
    }
}
