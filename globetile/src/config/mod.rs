//! INI configuration file.
//!
//! Settings live in `~/.globetile/config.ini`:
//!
//! ```ini
//! [tessellator]
//! num_levels = 15
//! tile_size = 32
//! detail_control = 40
//!
//! [imagery]
//! url = https://tiles.example.com/{level}/{y}/{x}.png
//! format = image/png
//!
//! [elevation]
//! url = https://elevation.example.com/?x={x}&y={y}&z={z}
//! format = application/bil16
//! resolution = 0.000833333
//!
//! [retrieval]
//! queue_size = 16
//! timeout_secs = 30
//! ```
//!
//! Missing keys take their `DEFAULT_*` value. A missing file is not an
//! error for [`ConfigFile::load`]: callers fall back to
//! [`ConfigFile::default`].

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ini::Ini;
use thiserror::Error;

use crate::error::ConfigurationError;
use crate::geom::{Location, Sector};
use crate::globe::{ElevationCoverageConfig, ElevationFormat, TessellatorConfig};
use crate::layer::{ImageLayerConfig, DEFAULT_IMAGE_DETAIL_CONTROL, DEFAULT_IMAGE_MIN_CHECK_INTERVAL_MS};
use crate::retrieval::{RetrievalQueueConfig, DEFAULT_RETRIEVAL_TIMEOUT_SECS, DEFAULT_TRY_AGAIN_INTERVAL_MS};

/// Default number of terrain levels.
pub const DEFAULT_TESSELLATOR_NUM_LEVELS: usize = 15;
/// Default terrain tile grid size.
pub const DEFAULT_TESSELLATOR_TILE_SIZE: u32 = 32;
/// Default terrain detail control.
pub const DEFAULT_TESSELLATOR_DETAIL_CONTROL: f64 = 40.0;
/// Default level-zero tile delta, in degrees, for every pyramid.
pub const DEFAULT_LEVEL_ZERO_DELTA: f64 = 45.0;

/// Default number of imagery levels.
pub const DEFAULT_IMAGERY_NUM_LEVELS: usize = 10;
/// Default imagery MIME type.
pub const DEFAULT_IMAGERY_FORMAT: &str = "image/png";
/// Default texture-key prefix for imagery.
pub const DEFAULT_IMAGERY_CACHE_PATH: &str = "imagery";
/// Default imagery tile size in pixels.
pub const DEFAULT_IMAGERY_TILE_SIZE: u32 = 256;

/// Default elevation payload format.
pub const DEFAULT_ELEVATION_FORMAT: &str = "application/bil16";
/// Default finest elevation resolution: three arc-seconds, in degrees.
pub const DEFAULT_ELEVATION_RESOLUTION: f64 = 3.0 / 3600.0;
/// Default elevation tile size in samples.
pub const DEFAULT_ELEVATION_TILE_SIZE: u32 = 256;
/// Default minimum interval before a failed elevation tile is retried.
pub const DEFAULT_ELEVATION_MIN_CHECK_INTERVAL_MS: u64 = 5_000;

/// Default number of retrievals in flight per layer or coverage.
pub const DEFAULT_RETRIEVAL_QUEUE_SIZE: usize = 16;
/// Default failures tolerated before a resource stays absent.
pub const DEFAULT_RETRIEVAL_MAX_TRYS: u32 = 3;

/// Errors reading or writing the configuration file.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("Failed to read or write config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(String),

    #[error("Invalid value '{value}' for {section}.{key}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
    },

    #[error("Could not determine the home directory")]
    NoHomeDirectory,
}

impl From<ini::Error> for ConfigFileError {
    fn from(error: ini::Error) -> Self {
        match error {
            ini::Error::Io(e) => Self::Io(e),
            ini::Error::Parse(e) => Self::Parse(e.to_string()),
        }
    }
}

/// `[tessellator]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct TessellatorSettings {
    pub num_levels: usize,
    pub tile_size: u32,
    pub detail_control: f64,
    pub level_zero_delta: f64,
}

impl Default for TessellatorSettings {
    fn default() -> Self {
        Self {
            num_levels: DEFAULT_TESSELLATOR_NUM_LEVELS,
            tile_size: DEFAULT_TESSELLATOR_TILE_SIZE,
            detail_control: DEFAULT_TESSELLATOR_DETAIL_CONTROL,
            level_zero_delta: DEFAULT_LEVEL_ZERO_DELTA,
        }
    }
}

/// `[imagery]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagerySettings {
    /// Tile URL template; imagery is disabled when unset.
    pub url: Option<String>,
    pub format: String,
    pub cache_path: String,
    pub num_levels: usize,
    pub tile_size: u32,
    pub detail_control: f64,
    pub level_zero_delta: f64,
}

impl Default for ImagerySettings {
    fn default() -> Self {
        Self {
            url: None,
            format: DEFAULT_IMAGERY_FORMAT.to_string(),
            cache_path: DEFAULT_IMAGERY_CACHE_PATH.to_string(),
            num_levels: DEFAULT_IMAGERY_NUM_LEVELS,
            tile_size: DEFAULT_IMAGERY_TILE_SIZE,
            detail_control: DEFAULT_IMAGE_DETAIL_CONTROL,
            level_zero_delta: DEFAULT_LEVEL_ZERO_DELTA,
        }
    }
}

/// `[elevation]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct ElevationSettings {
    /// Tile URL template; elevation is flat when unset.
    pub url: Option<String>,
    pub format: String,
    pub resolution: f64,
    pub tile_size: u32,
    pub level_zero_delta: f64,
}

impl Default for ElevationSettings {
    fn default() -> Self {
        Self {
            url: None,
            format: DEFAULT_ELEVATION_FORMAT.to_string(),
            resolution: DEFAULT_ELEVATION_RESOLUTION,
            tile_size: DEFAULT_ELEVATION_TILE_SIZE,
            level_zero_delta: DEFAULT_LEVEL_ZERO_DELTA,
        }
    }
}

/// `[retrieval]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalSettings {
    pub queue_size: usize,
    pub timeout_secs: u64,
    pub max_trys: u32,
    pub try_again_interval_ms: u64,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            queue_size: DEFAULT_RETRIEVAL_QUEUE_SIZE,
            timeout_secs: DEFAULT_RETRIEVAL_TIMEOUT_SECS,
            max_trys: DEFAULT_RETRIEVAL_MAX_TRYS,
            try_again_interval_ms: DEFAULT_TRY_AGAIN_INTERVAL_MS,
        }
    }
}

impl RetrievalSettings {
    fn queue_config(&self, min_check_interval_ms: u64) -> RetrievalQueueConfig {
        RetrievalQueueConfig {
            queue_size: self.queue_size,
            max_trys: self.max_trys,
            min_check_interval_ms,
            try_again_interval_ms: self.try_again_interval_ms,
        }
    }
}

/// The parsed configuration file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigFile {
    pub tessellator: TessellatorSettings,
    pub imagery: ImagerySettings,
    pub elevation: ElevationSettings,
    pub retrieval: RetrievalSettings,
}

/// `~/.globetile`
pub fn config_directory() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".globetile"))
}

/// `~/.globetile/config.ini`, or `config.ini` in the working directory
/// when the home directory is unknown.
pub fn config_file_path() -> PathBuf {
    config_directory()
        .map(|dir| dir.join("config.ini"))
        .unwrap_or_else(|| PathBuf::from("config.ini"))
}

fn parse_value<T>(ini: &Ini, section: &str, key: &str, default: T) -> Result<T, ConfigFileError>
where
    T: FromStr,
{
    let Some(raw) = ini.section(Some(section)).and_then(|s| s.get(key)) else {
        return Ok(default);
    };
    raw.trim().parse().map_err(|_| ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: raw.to_string(),
    })
}

fn optional_string(ini: &Ini, section: &str, key: &str) -> Option<String> {
    ini.section(Some(section))
        .and_then(|s| s.get(key))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

impl ConfigFile {
    /// Loads the file at [`config_file_path`], or defaults when it does not exist.
    pub fn load() -> Result<Self, ConfigFileError> {
        let path = config_file_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        let ini = Ini::load_from_file(path)?;
        Self::from_ini(&ini)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigFileError> {
        let ini = Ini::load_from_str(contents).map_err(|e| ConfigFileError::Parse(e.to_string()))?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigFileError> {
        let tess = TessellatorSettings::default();
        let tessellator = TessellatorSettings {
            num_levels: parse_value(ini, "tessellator", "num_levels", tess.num_levels)?,
            tile_size: parse_value(ini, "tessellator", "tile_size", tess.tile_size)?,
            detail_control: parse_value(ini, "tessellator", "detail_control", tess.detail_control)?,
            level_zero_delta: parse_value(ini, "tessellator", "level_zero_delta", tess.level_zero_delta)?,
        };

        let img = ImagerySettings::default();
        let imagery = ImagerySettings {
            url: optional_string(ini, "imagery", "url"),
            format: optional_string(ini, "imagery", "format").unwrap_or(img.format),
            cache_path: optional_string(ini, "imagery", "cache_path").unwrap_or(img.cache_path),
            num_levels: parse_value(ini, "imagery", "num_levels", img.num_levels)?,
            tile_size: parse_value(ini, "imagery", "tile_size", img.tile_size)?,
            detail_control: parse_value(ini, "imagery", "detail_control", img.detail_control)?,
            level_zero_delta: parse_value(ini, "imagery", "level_zero_delta", img.level_zero_delta)?,
        };

        let elev = ElevationSettings::default();
        let elevation = ElevationSettings {
            url: optional_string(ini, "elevation", "url"),
            format: optional_string(ini, "elevation", "format").unwrap_or(elev.format),
            resolution: parse_value(ini, "elevation", "resolution", elev.resolution)?,
            tile_size: parse_value(ini, "elevation", "tile_size", elev.tile_size)?,
            level_zero_delta: parse_value(ini, "elevation", "level_zero_delta", elev.level_zero_delta)?,
        };

        let ret = RetrievalSettings::default();
        let retrieval = RetrievalSettings {
            queue_size: parse_value(ini, "retrieval", "queue_size", ret.queue_size)?,
            timeout_secs: parse_value(ini, "retrieval", "timeout_secs", ret.timeout_secs)?,
            max_trys: parse_value(ini, "retrieval", "max_trys", ret.max_trys)?,
            try_again_interval_ms: parse_value(
                ini,
                "retrieval",
                "try_again_interval_ms",
                ret.try_again_interval_ms,
            )?,
        };

        Ok(Self {
            tessellator,
            imagery,
            elevation,
            retrieval,
        })
    }

    /// Writes the configuration to [`config_file_path`], creating the directory.
    pub fn save(&self) -> Result<(), ConfigFileError> {
        let dir = config_directory().ok_or(ConfigFileError::NoHomeDirectory)?;
        std::fs::create_dir_all(&dir)?;
        self.save_to(&dir.join("config.ini"))
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigFileError> {
        self.to_ini().write_to_file(path)?;
        Ok(())
    }

    fn to_ini(&self) -> Ini {
        fn set(ini: &mut Ini, section: &str, key: &str, value: impl Display) {
            ini.with_section(Some(section)).set(key, value.to_string());
        }

        let mut ini = Ini::new();
        let t = &self.tessellator;
        set(&mut ini, "tessellator", "num_levels", t.num_levels);
        set(&mut ini, "tessellator", "tile_size", t.tile_size);
        set(&mut ini, "tessellator", "detail_control", t.detail_control);
        set(&mut ini, "tessellator", "level_zero_delta", t.level_zero_delta);

        let i = &self.imagery;
        if let Some(url) = &i.url {
            set(&mut ini, "imagery", "url", url);
        }
        set(&mut ini, "imagery", "format", &i.format);
        set(&mut ini, "imagery", "cache_path", &i.cache_path);
        set(&mut ini, "imagery", "num_levels", i.num_levels);
        set(&mut ini, "imagery", "tile_size", i.tile_size);
        set(&mut ini, "imagery", "detail_control", i.detail_control);
        set(&mut ini, "imagery", "level_zero_delta", i.level_zero_delta);

        let e = &self.elevation;
        if let Some(url) = &e.url {
            set(&mut ini, "elevation", "url", url);
        }
        set(&mut ini, "elevation", "format", &e.format);
        set(&mut ini, "elevation", "resolution", e.resolution);
        set(&mut ini, "elevation", "tile_size", e.tile_size);
        set(&mut ini, "elevation", "level_zero_delta", e.level_zero_delta);

        let r = &self.retrieval;
        set(&mut ini, "retrieval", "queue_size", r.queue_size);
        set(&mut ini, "retrieval", "timeout_secs", r.timeout_secs);
        set(&mut ini, "retrieval", "max_trys", r.max_trys);
        set(&mut ini, "retrieval", "try_again_interval_ms", r.try_again_interval_ms);
        ini
    }

    pub fn tessellator_config(&self) -> TessellatorConfig {
        let t = &self.tessellator;
        TessellatorConfig::default()
            .with_num_levels(t.num_levels)
            .with_tile_size(t.tile_size, t.tile_size)
            .with_detail_control(t.detail_control)
            .with_level_zero_delta(Location::new(t.level_zero_delta, t.level_zero_delta))
    }

    /// The imagery layer settings, or `None` when no URL is configured.
    pub fn image_layer_config(&self) -> Option<ImageLayerConfig> {
        let i = &self.imagery;
        let url = i.url.clone()?;
        Some(
            ImageLayerConfig::new(
                i.level_zero_delta,
                i.num_levels,
                i.format.clone(),
                i.cache_path.clone(),
                url,
            )
            .with_tile_size(i.tile_size, i.tile_size)
            .with_detail_control(i.detail_control)
            .with_retrieval(self.retrieval.queue_config(DEFAULT_IMAGE_MIN_CHECK_INTERVAL_MS)),
        )
    }

    /// The elevation coverage settings, or `Ok(None)` when no URL is
    /// configured.
    pub fn elevation_coverage_config(
        &self,
    ) -> Result<Option<ElevationCoverageConfig>, ConfigurationError> {
        let e = &self.elevation;
        let Some(url) = e.url.clone() else {
            return Ok(None);
        };
        let format = ElevationFormat::parse(&e.format)?;
        Ok(Some(
            ElevationCoverageConfig::new(Sector::FULL_SPHERE, e.resolution, format, url)
                .with_tile_size(e.tile_size, e.tile_size)
                .with_level_zero_delta(e.level_zero_delta)
                .with_retrieval(self.retrieval.queue_config(DEFAULT_ELEVATION_MIN_CHECK_INTERVAL_MS)),
        ))
    }
}

impl std::fmt::Display for ConfigFile {
    /// Formats the configuration as INI text.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut buffer = Vec::new();
        self.to_ini().write_to(&mut buffer).map_err(|_| std::fmt::Error)?;
        f.write_str(&String::from_utf8_lossy(&buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_file_yields_defaults() {
        let config = ConfigFile::parse("").unwrap();
        assert_eq!(config, ConfigFile::default());
        assert!(config.image_layer_config().is_none());
        assert_eq!(config.elevation_coverage_config(), Ok(None));
    }

    #[test]
    fn test_values_override_defaults() {
        let config = ConfigFile::parse(
            "[tessellator]\nnum_levels = 8\ntile_size = 16\n\n\
             [imagery]\nurl = http://localhost/{level}/{y}/{x}.jpg\nformat = image/jpeg\n\n\
             [retrieval]\nqueue_size = 4\n",
        )
        .unwrap();

        assert_eq!(config.tessellator.num_levels, 8);
        assert_eq!(config.tessellator.tile_size, 16);
        assert_eq!(config.tessellator.detail_control, DEFAULT_TESSELLATOR_DETAIL_CONTROL);

        let layer = config.image_layer_config().unwrap();
        assert_eq!(layer.image_format, "image/jpeg");
        assert_eq!(layer.num_levels, DEFAULT_IMAGERY_NUM_LEVELS);
        assert_eq!(layer.retrieval.queue_size, 4);
        assert_eq!(layer.retrieval.min_check_interval_ms, DEFAULT_IMAGE_MIN_CHECK_INTERVAL_MS);

        let tess = config.tessellator_config();
        assert_eq!(tess.num_levels, 8);
        assert_eq!(tess.tile_width, 16);
    }

    #[test]
    fn test_invalid_number_is_reported() {
        let err = ConfigFile::parse("[retrieval]\nqueue_size = lots\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigFileError::InvalidValue { ref section, ref key, .. }
                if section == "retrieval" && key == "queue_size"
        ));
    }

    #[test]
    fn test_unknown_elevation_format_is_rejected() {
        let config = ConfigFile::parse(
            "[elevation]\nurl = http://localhost/?x={x}&y={y}&z={z}\nformat = image/tiff\n",
        )
        .unwrap();
        assert!(matches!(
            config.elevation_coverage_config(),
            Err(ConfigurationError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.ini");

        let mut config = ConfigFile::default();
        config.elevation.url = Some("http://localhost/?x={x}&y={y}&z={z}".to_string());
        config.retrieval.timeout_secs = 5;
        config.save_to(&path).unwrap();

        let reloaded = ConfigFile::load_from(&path).unwrap();
        assert_eq!(reloaded, config);

        let coverage = reloaded.elevation_coverage_config().unwrap().unwrap();
        assert_eq!(coverage.format, ElevationFormat::Bil16);
        assert_eq!(coverage.tile_width, DEFAULT_ELEVATION_TILE_SIZE);
    }

    #[test]
    fn test_display_parses_back() {
        let mut config = ConfigFile::default();
        config.imagery.url = Some("http://localhost/{level}/{y}/{x}.png".to_string());
        config.tessellator.detail_control = 25.0;

        let reparsed = ConfigFile::parse(&config.to_string()).unwrap();
        assert_eq!(reparsed, config);
    }

    #[test]
    fn test_missing_file_is_an_io_error() {
        let dir = TempDir::new().unwrap();
        let result = ConfigFile::load_from(&dir.path().join("absent.ini"));
        assert!(matches!(result, Err(ConfigFileError::Io(_))));
    }
}
