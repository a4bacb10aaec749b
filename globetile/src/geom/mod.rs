//! Geographic and model-space geometry.
//!
//! Latitudes and longitudes are in degrees throughout. Model coordinates are
//! `glam::DVec3` in metres.

mod extent;
mod sector;

pub use extent::{BoundingBox, Frustum, Plane};
pub use sector::{Location, Sector};

/// Converts degrees to radians.
pub const DEGREES_TO_RADIANS: f64 = std::f64::consts::PI / 180.0;

/// Converts radians to degrees.
pub const RADIANS_TO_DEGREES: f64 = 180.0 / std::f64::consts::PI;
