//! Error types for the tiling engine.
//!
//! Two families of errors exist:
//!
//! - [`ConfigurationError`] is returned synchronously from constructors and
//!   mutators that receive invalid arguments. It is never retried.
//! - [`RetrievalError`] describes why an asynchronous tile retrieval failed.
//!   It never reaches the tessellation or render path: the retrieval queue
//!   converts it into backoff state and a warning.

use std::time::Duration;

use thiserror::Error;

/// Invalid arguments supplied to a constructor or setter.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    /// The sector is missing, non-finite or inverted.
    #[error("Missing or invalid sector: {0}")]
    InvalidSector(String),

    /// The level-zero tile delta is zero, negative or not finite.
    #[error("Level zero delta must be positive (got {latitude}, {longitude})")]
    InvalidLevelZeroDelta { latitude: f64, longitude: f64 },

    /// A level set needs at least one level.
    #[error("Number of levels must be at least 1 (got {0})")]
    InvalidLevelCount(usize),

    /// Tile pixel dimensions must be at least 1x1.
    #[error("Tile dimensions must be at least 1x1 (got {width}x{height})")]
    InvalidTileSize { width: u32, height: u32 },

    /// The tessellator needs even tile dimensions to stitch half-resolution borders.
    #[error("Terrain tile dimensions must be even and at least 2x2 (got {width}x{height})")]
    OddTerrainTileSize { width: u32, height: u32 },

    /// A resolution argument is zero, negative or not a number.
    #[error("Resolution must be positive and finite (got {0})")]
    InvalidResolution(f64),

    /// Cache capacity must be at least one unit.
    #[error("Cache capacity must be at least 1 (got {0})")]
    InvalidCapacity(usize),

    /// The low-water mark must be strictly below capacity.
    #[error("Low water {low_water} must be below capacity {capacity}")]
    InvalidLowWater { low_water: usize, capacity: usize },

    /// Cache entries must have a size of at least one unit.
    #[error("Entry size must be at least 1")]
    InvalidEntrySize,

    /// An entry larger than the whole cache can never be resident.
    #[error("Entry size {size} exceeds cache capacity {capacity}")]
    EntryTooLarge { size: usize, capacity: usize },

    /// The retrieval queue must allow at least one request in flight.
    #[error("Retrieval queue size must be at least 1")]
    InvalidQueueSize,

    /// The detail control factor must be positive.
    #[error("Detail control must be positive (got {0})")]
    InvalidDetailControl(f64),

    /// The configured elevation payload format is not understood.
    #[error("Unsupported elevation format: {0}")]
    UnsupportedFormat(String),

    /// A URL template lacks a required placeholder.
    #[error("Invalid URL template '{template}': {reason}")]
    InvalidUrlTemplate { template: String, reason: String },
}

/// Why a tile retrieval failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RetrievalError {
    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    /// No answer arrived within the configured timeout.
    #[error("Retrieval timed out after {0:?}")]
    Timeout(Duration),

    /// The server answered with a content type the consumer cannot decode.
    #[error("Unexpected content type '{content_type}' from {url}")]
    UnexpectedContentType { content_type: String, url: String },

    /// Connection, DNS or body-read failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A background worker reported that it could not produce the tile.
    #[error("Worker failed: {0}")]
    Failed(String),

    /// The payload arrived but could not be decoded.
    #[error("Malformed payload: {0}")]
    Malformed(String),
}
