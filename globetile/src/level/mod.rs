//! The tile pyramid: resolution tiers over a sector.
//!
//! A [`LevelSet`] divides its sector into a hierarchy of [`Level`]s. Level
//! zero uses the configured tile delta; every following level halves it, so
//! `tile_delta(n) = level_zero_delta / 2^n`. Each tile at any level covers
//! `tile_width` x `tile_height` texels, which fixes the level's texel size.
//!
//! # Example
//!
//! ```
//! use globetile::geom::{Location, Sector};
//! use globetile::level::LevelSet;
//!
//! let levels = LevelSet::new(Sector::FULL_SPHERE, Location::new(36.0, 36.0), 3, 256, 256).unwrap();
//! assert_eq!(levels.level(2).unwrap().tile_delta, Location::new(9.0, 9.0));
//! ```

use std::cmp::Ordering;

use crate::error::ConfigurationError;
use crate::geom::{Location, Sector, DEGREES_TO_RADIANS};

/// One resolution tier of a [`LevelSet`].
#[derive(Debug, Clone, PartialEq)]
pub struct Level {
    /// Zero-based position in the level set; higher is finer.
    pub level_number: usize,
    /// Latitude and longitude span of one tile, in degrees.
    pub tile_delta: Location,
    /// The sector covered by the owning level set.
    pub sector: Sector,
    pub tile_width: u32,
    pub tile_height: u32,
    /// Angular size of one texel in radians.
    pub texel_size: f64,
    num_levels: usize,
}

impl Level {
    pub fn is_first_level(&self) -> bool {
        self.level_number == 0
    }

    pub fn is_last_level(&self) -> bool {
        self.level_number + 1 == self.num_levels
    }

    /// Orders levels by resolution: coarser levels compare less.
    pub fn compare(&self, other: &Level) -> Ordering {
        self.level_number.cmp(&other.level_number)
    }
}

/// An immutable, ordered collection of levels over a sector.
#[derive(Debug, Clone)]
pub struct LevelSet {
    pub sector: Sector,
    pub level_zero_delta: Location,
    pub tile_width: u32,
    pub tile_height: u32,
    levels: Vec<Level>,
}

impl LevelSet {
    /// Builds a level set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] when the sector is invalid or empty,
    /// either component of `level_zero_delta` is not positive, `num_levels`
    /// is zero, or either tile dimension is zero.
    pub fn new(
        sector: Sector,
        level_zero_delta: Location,
        num_levels: usize,
        tile_width: u32,
        tile_height: u32,
    ) -> Result<Self, ConfigurationError> {
        if !sector.is_valid() || sector.is_empty() {
            return Err(ConfigurationError::InvalidSector(sector.to_string()));
        }

        let delta_ok = |d: f64| d.is_finite() && d > 0.0;
        if !delta_ok(level_zero_delta.latitude) || !delta_ok(level_zero_delta.longitude) {
            return Err(ConfigurationError::InvalidLevelZeroDelta {
                latitude: level_zero_delta.latitude,
                longitude: level_zero_delta.longitude,
            });
        }

        if num_levels < 1 {
            return Err(ConfigurationError::InvalidLevelCount(num_levels));
        }

        if tile_width < 1 || tile_height < 1 {
            return Err(ConfigurationError::InvalidTileSize {
                width: tile_width,
                height: tile_height,
            });
        }

        let levels = (0..num_levels)
            .map(|n| {
                let divisor = 2f64.powi(n as i32);
                let tile_delta = Location::new(
                    level_zero_delta.latitude / divisor,
                    level_zero_delta.longitude / divisor,
                );
                Level {
                    level_number: n,
                    tile_delta,
                    sector,
                    tile_width,
                    tile_height,
                    texel_size: tile_delta.latitude * DEGREES_TO_RADIANS / tile_height as f64,
                    num_levels,
                }
            })
            .collect();

        Ok(Self {
            sector,
            level_zero_delta,
            tile_width,
            tile_height,
            levels,
        })
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// The level with the given number, or `None` when out of range.
    pub fn level(&self, level_number: usize) -> Option<&Level> {
        self.levels.get(level_number)
    }

    pub fn first_level(&self) -> &Level {
        &self.levels[0]
    }

    pub fn last_level(&self) -> &Level {
        &self.levels[self.levels.len() - 1]
    }

    pub fn next_level(&self, level: &Level) -> Option<&Level> {
        self.level(level.level_number + 1)
    }

    pub fn previous_level(&self, level: &Level) -> Option<&Level> {
        level
            .level_number
            .checked_sub(1)
            .and_then(|n| self.level(n))
    }

    /// The coarsest level whose texel size is no larger than `texel_size`.
    ///
    /// Requests finer than the last level resolve to the last level; requests
    /// coarser than the first level resolve to the first level.
    pub fn level_for_texel_size(&self, texel_size: f64) -> &Level {
        let last = self.last_level();
        if last.texel_size >= texel_size {
            return last;
        }

        self.levels
            .iter()
            .find(|level| level.texel_size <= texel_size)
            .unwrap_or(last)
    }
}

/// Number of levels needed to go from `first_level_resolution` to
/// `last_level_resolution`, as a fractional count of at least one.
///
/// Take `ceil()` of the result to guarantee at least the requested
/// resolution, or `floor()` to avoid exceeding it.
pub fn num_levels_for_resolution(
    first_level_resolution: f64,
    last_level_resolution: f64,
) -> Result<f64, ConfigurationError> {
    for resolution in [first_level_resolution, last_level_resolution] {
        if !(resolution.is_finite() && resolution > 0.0) {
            return Err(ConfigurationError::InvalidResolution(resolution));
        }
    }

    let levels = (first_level_resolution / last_level_resolution).log2();
    Ok(levels.max(0.0) + 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn level_set(num_levels: usize) -> LevelSet {
        LevelSet::new(
            Sector::FULL_SPHERE,
            Location::new(36.0, 36.0),
            num_levels,
            256,
            256,
        )
        .unwrap()
    }

    #[test]
    fn test_tile_delta_halves_per_level() {
        let levels = level_set(3);
        assert_eq!(levels.level(0).unwrap().tile_delta, Location::new(36.0, 36.0));
        assert_eq!(levels.level(1).unwrap().tile_delta, Location::new(18.0, 18.0));
        assert_eq!(levels.level(2).unwrap().tile_delta, Location::new(9.0, 9.0));
        assert!(levels.level(3).is_none());
    }

    #[test]
    fn test_first_and_last_level() {
        let levels = level_set(4);
        assert!(levels.first_level().is_first_level());
        assert!(levels.last_level().is_last_level());
        assert_eq!(levels.last_level().level_number, 3);
        assert_eq!(levels.previous_level(levels.first_level()), None);
        assert_eq!(
            levels.next_level(levels.first_level()).map(|l| l.level_number),
            Some(1)
        );
    }

    #[test]
    fn test_rejects_invalid_arguments() {
        let delta = Location::new(36.0, 36.0);
        assert!(matches!(
            LevelSet::new(Sector::new(10.0, 0.0, 0.0, 1.0), delta, 1, 1, 1),
            Err(ConfigurationError::InvalidSector(_))
        ));
        assert!(matches!(
            LevelSet::new(Sector::FULL_SPHERE, Location::new(0.0, 36.0), 1, 1, 1),
            Err(ConfigurationError::InvalidLevelZeroDelta { .. })
        ));
        assert_eq!(
            LevelSet::new(Sector::FULL_SPHERE, delta, 0, 1, 1).unwrap_err(),
            ConfigurationError::InvalidLevelCount(0)
        );
        assert!(matches!(
            LevelSet::new(Sector::FULL_SPHERE, delta, 1, 0, 1),
            Err(ConfigurationError::InvalidTileSize { .. })
        ));
    }

    #[test]
    fn test_level_for_texel_size_clamps() {
        let levels = level_set(5);
        assert_eq!(levels.level_for_texel_size(0.0).level_number, 4);
        assert_eq!(levels.level_for_texel_size(1.0).level_number, 0);
        let exact = levels.level(2).unwrap().texel_size;
        assert_eq!(levels.level_for_texel_size(exact).level_number, 2);
    }

    #[test]
    fn test_num_levels_for_resolution() {
        assert_eq!(num_levels_for_resolution(8.0, 1.0).unwrap(), 4.0);
        assert_eq!(num_levels_for_resolution(1.0, 8.0).unwrap(), 1.0);
        assert!(num_levels_for_resolution(0.0, 1.0).is_err());
        assert!(num_levels_for_resolution(1.0, 0.0).is_err());
        assert!(num_levels_for_resolution(f64::NAN, 1.0).is_err());
    }

    proptest! {
        #[test]
        fn test_level_for_texel_size_is_monotonic(a in 1e-9f64..1.0, b in 1e-9f64..1.0) {
            let levels = level_set(12);
            let (fine, coarse) = if a < b { (a, b) } else { (b, a) };
            prop_assert!(
                levels.level_for_texel_size(fine).level_number
                    >= levels.level_for_texel_size(coarse).level_number
            );
        }
    }
}
