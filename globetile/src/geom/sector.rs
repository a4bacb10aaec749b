//! Latitude/longitude rectangles.

use std::fmt;

/// A geographic location in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// A rectangular region bounded by minimum and maximum latitude and longitude.
///
/// A valid sector has finite bounds with `min <= max` on both axes. Sectors
/// are closed: a location on the boundary is contained.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sector {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

impl Sector {
    /// The whole globe.
    pub const FULL_SPHERE: Sector = Sector {
        min_latitude: -90.0,
        max_latitude: 90.0,
        min_longitude: -180.0,
        max_longitude: 180.0,
    };

    pub const fn new(
        min_latitude: f64,
        max_latitude: f64,
        min_longitude: f64,
        max_longitude: f64,
    ) -> Self {
        Self {
            min_latitude,
            max_latitude,
            min_longitude,
            max_longitude,
        }
    }

    /// True when all bounds are finite and ordered.
    pub fn is_valid(&self) -> bool {
        [
            self.min_latitude,
            self.max_latitude,
            self.min_longitude,
            self.max_longitude,
        ]
        .iter()
        .all(|v| v.is_finite())
            && self.min_latitude <= self.max_latitude
            && self.min_longitude <= self.max_longitude
    }

    /// True when the sector encloses no area.
    pub fn is_empty(&self) -> bool {
        self.min_latitude == self.max_latitude || self.min_longitude == self.max_longitude
    }

    pub fn delta_latitude(&self) -> f64 {
        self.max_latitude - self.min_latitude
    }

    pub fn delta_longitude(&self) -> f64 {
        self.max_longitude - self.min_longitude
    }

    pub fn centroid_latitude(&self) -> f64 {
        0.5 * (self.min_latitude + self.max_latitude)
    }

    pub fn centroid_longitude(&self) -> f64 {
        0.5 * (self.min_longitude + self.max_longitude)
    }

    pub fn centroid(&self) -> Location {
        Location::new(self.centroid_latitude(), self.centroid_longitude())
    }

    /// True when the sectors share any point, including a shared edge.
    pub fn intersects(&self, other: &Sector) -> bool {
        other.min_longitude <= self.max_longitude
            && other.max_longitude >= self.min_longitude
            && other.min_latitude <= self.max_latitude
            && other.max_latitude >= self.min_latitude
    }

    /// True when the sectors share interior area. Touching edges do not overlap.
    pub fn overlaps(&self, other: &Sector) -> bool {
        other.min_longitude < self.max_longitude
            && other.max_longitude > self.min_longitude
            && other.min_latitude < self.max_latitude
            && other.max_latitude > self.min_latitude
    }

    pub fn contains_location(&self, latitude: f64, longitude: f64) -> bool {
        latitude >= self.min_latitude
            && latitude <= self.max_latitude
            && longitude >= self.min_longitude
            && longitude <= self.max_longitude
    }

    /// True when `other` lies entirely within this sector.
    pub fn contains(&self, other: &Sector) -> bool {
        other.min_latitude >= self.min_latitude
            && other.max_latitude <= self.max_latitude
            && other.min_longitude >= self.min_longitude
            && other.max_longitude <= self.max_longitude
    }

    /// The common region of two sectors, or `None` when they are disjoint.
    pub fn intersection(&self, other: &Sector) -> Option<Sector> {
        if !self.intersects(other) {
            return None;
        }

        Some(Sector::new(
            self.min_latitude.max(other.min_latitude),
            self.max_latitude.min(other.max_latitude),
            self.min_longitude.max(other.min_longitude),
            self.max_longitude.min(other.max_longitude),
        ))
    }

    /// The smallest sector containing both sectors.
    pub fn union(&self, other: &Sector) -> Sector {
        Sector::new(
            self.min_latitude.min(other.min_latitude),
            self.max_latitude.max(other.max_latitude),
            self.min_longitude.min(other.min_longitude),
            self.max_longitude.max(other.max_longitude),
        )
    }

    /// Samples a `num_lat` x `num_lon` grid of locations, south-west first, row-major.
    ///
    /// The last row and column are pinned to the maximum bounds so adjacent
    /// grids share their boundary samples exactly.
    pub fn grid_locations(&self, num_lat: usize, num_lon: usize) -> Vec<Location> {
        let delta_lat = self.delta_latitude() / (num_lat.max(2) - 1) as f64;
        let delta_lon = self.delta_longitude() / (num_lon.max(2) - 1) as f64;
        let mut locations = Vec::with_capacity(num_lat * num_lon);

        for j in 0..num_lat {
            let lat = if j + 1 == num_lat && num_lat > 1 {
                self.max_latitude
            } else {
                self.min_latitude + j as f64 * delta_lat
            };
            for i in 0..num_lon {
                let lon = if i + 1 == num_lon && num_lon > 1 {
                    self.max_longitude
                } else {
                    self.min_longitude + i as f64 * delta_lon
                };
                locations.push(Location::new(lat, lon));
            }
        }

        locations
    }
}

impl fmt::Display for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}) - ({}, {})",
            self.min_latitude, self.min_longitude, self.max_latitude, self.max_longitude
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersects_shared_edge_but_does_not_overlap() {
        let a = Sector::new(0.0, 10.0, 0.0, 10.0);
        let b = Sector::new(0.0, 10.0, 10.0, 20.0);
        assert!(a.intersects(&b));
        assert!(!a.overlaps(&b));
    }

    #[test]
    fn test_intersection_of_disjoint_sectors_is_none() {
        let a = Sector::new(0.0, 10.0, 0.0, 10.0);
        let b = Sector::new(20.0, 30.0, 0.0, 10.0);
        assert_eq!(a.intersection(&b), None);
    }

    #[test]
    fn test_intersection_clips_bounds() {
        let a = Sector::new(0.0, 10.0, 0.0, 10.0);
        let b = Sector::new(5.0, 15.0, -5.0, 5.0);
        assert_eq!(a.intersection(&b), Some(Sector::new(5.0, 10.0, 0.0, 5.0)));
    }

    #[test]
    fn test_validity() {
        assert!(Sector::FULL_SPHERE.is_valid());
        assert!(!Sector::new(10.0, 0.0, 0.0, 10.0).is_valid());
        assert!(!Sector::new(f64::NAN, 0.0, 0.0, 10.0).is_valid());
    }

    #[test]
    fn test_grid_locations_pin_last_sample() {
        let sector = Sector::new(0.0, 1.0, 0.0, 3.0);
        let grid = sector.grid_locations(3, 4);
        assert_eq!(grid.len(), 12);
        assert_eq!(grid[0], Location::new(0.0, 0.0));
        assert_eq!(grid[3], Location::new(0.0, 3.0));
        assert_eq!(grid[11], Location::new(1.0, 3.0));
    }
}
