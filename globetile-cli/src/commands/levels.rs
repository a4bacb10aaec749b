//! `levels`: print the levels of a tile pyramid.

use clap::{Args, ValueEnum};
use globetile::config::ConfigFile;
use globetile::geom::{Location, Sector};
use globetile::globe::WGS84_SEMI_MAJOR_AXIS;
use globetile::level::{num_levels_for_resolution, Level, LevelSet};
use globetile::tile::Tile;

use crate::error::CliError;

/// Which configured pyramid to describe.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum Pyramid {
    Terrain,
    Imagery,
    Elevation,
}

#[derive(Debug, Args)]
pub struct LevelsArgs {
    /// Configured pyramid to start from
    #[arg(long, value_enum, default_value_t = Pyramid::Imagery)]
    pub pyramid: Pyramid,

    /// Level-zero tile size in degrees
    #[arg(long)]
    pub level_zero_delta: Option<f64>,

    /// Number of levels
    #[arg(long, conflicts_with = "resolution")]
    pub num_levels: Option<usize>,

    /// Finest resolution in degrees per texel; derives the level count
    #[arg(long)]
    pub resolution: Option<f64>,

    /// Tile width and height in texels
    #[arg(long)]
    pub tile_size: Option<u32>,
}

/// One printed row.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelRow {
    pub level: usize,
    pub tile_delta: f64,
    pub rows: u32,
    pub columns: u32,
    pub texel_metres: f64,
}

impl LevelRow {
    fn from_level(level: &Level) -> Self {
        let sector = &level.sector;
        let delta = level.tile_delta;
        let rows = Tile::compute_last_row(delta.latitude, sector.max_latitude)
            - Tile::compute_row(delta.latitude, sector.min_latitude)
            + 1;
        let columns = Tile::compute_last_column(delta.longitude, sector.max_longitude)
            - Tile::compute_column(delta.longitude, sector.min_longitude)
            + 1;
        Self {
            level: level.level_number,
            tile_delta: delta.latitude,
            rows,
            columns,
            texel_metres: level.texel_size * WGS84_SEMI_MAJOR_AXIS,
        }
    }
}

/// Builds the level set described by `args`, filling gaps from `config`.
pub fn level_set(args: &LevelsArgs, config: &ConfigFile) -> Result<LevelSet, CliError> {
    let (delta, configured_levels, tile_size) = match args.pyramid {
        Pyramid::Terrain => (
            config.tessellator.level_zero_delta,
            config.tessellator.num_levels,
            config.tessellator.tile_size,
        ),
        Pyramid::Imagery => (
            config.imagery.level_zero_delta,
            config.imagery.num_levels,
            config.imagery.tile_size,
        ),
        Pyramid::Elevation => {
            let e = &config.elevation;
            let levels = num_levels_for_resolution(e.level_zero_delta / e.tile_size as f64, e.resolution)?;
            (e.level_zero_delta, levels.ceil() as usize, e.tile_size)
        }
    };

    let delta = args.level_zero_delta.unwrap_or(delta);
    let tile_size = args.tile_size.unwrap_or(tile_size);
    let num_levels = match (args.num_levels, args.resolution) {
        (Some(n), _) => n,
        (None, Some(resolution)) => {
            num_levels_for_resolution(delta / tile_size.max(1) as f64, resolution)?.ceil() as usize
        }
        (None, None) => configured_levels,
    };

    Ok(LevelSet::new(
        Sector::FULL_SPHERE,
        Location::new(delta, delta),
        num_levels,
        tile_size,
        tile_size,
    )?)
}

pub fn rows(levels: &LevelSet) -> Vec<LevelRow> {
    (0..levels.num_levels())
        .filter_map(|n| levels.level(n))
        .map(LevelRow::from_level)
        .collect()
}

pub fn run(args: LevelsArgs, config: &ConfigFile) -> Result<(), CliError> {
    let levels = level_set(&args, config)?;

    println!(
        "{:>5}  {:>14}  {:>8}  {:>8}  {:>14}",
        "Level", "Tile delta", "Rows", "Columns", "Texel size"
    );
    for row in rows(&levels) {
        println!(
            "{:>5}  {:>13.6}°  {:>8}  {:>8}  {:>12.2} m",
            row.level, row.tile_delta, row.rows, row.columns, row.texel_metres
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> LevelsArgs {
        LevelsArgs {
            pyramid: Pyramid::Imagery,
            level_zero_delta: Some(36.0),
            num_levels: Some(3),
            resolution: None,
            tile_size: Some(512),
        }
    }

    #[test]
    fn test_rows_halve_tile_delta_per_level() {
        let levels = level_set(&args(), &ConfigFile::default()).unwrap();
        let rows = rows(&levels);

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].tile_delta, 36.0);
        assert_eq!((rows[0].rows, rows[0].columns), (5, 10));
        assert_eq!(rows[2].tile_delta, 9.0);
        assert_eq!((rows[2].rows, rows[2].columns), (20, 40));
        assert!(rows[1].texel_metres < rows[0].texel_metres);
    }

    #[test]
    fn test_resolution_derives_level_count() {
        let mut args = args();
        args.num_levels = None;
        args.resolution = Some(36.0 / 512.0 / 4.0);
        let levels = level_set(&args, &ConfigFile::default()).unwrap();
        assert_eq!(levels.num_levels(), 3);
    }

    #[test]
    fn test_configured_pyramid_fills_missing_arguments() {
        let args = LevelsArgs {
            pyramid: Pyramid::Terrain,
            level_zero_delta: None,
            num_levels: None,
            resolution: None,
            tile_size: None,
        };
        let config = ConfigFile::default();
        let levels = level_set(&args, &config).unwrap();
        assert_eq!(levels.num_levels(), config.tessellator.num_levels);
        assert_eq!(levels.tile_width, config.tessellator.tile_size);
    }

    #[test]
    fn test_zero_levels_is_rejected() {
        let mut args = args();
        args.num_levels = Some(0);
        assert!(matches!(
            level_set(&args, &ConfigFile::default()),
            Err(CliError::Configuration(_))
        ));
    }
}
