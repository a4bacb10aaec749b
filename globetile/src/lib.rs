//! Globetile - multi-resolution globe tiling
//!
//! This library provides the core of a 3D virtual-globe renderer: hierarchical
//! level pyramids over a geographic sector, view-dependent terrain
//! tessellation, tiled elevation coverages, tiled image layers draped over the
//! terrain, and the asynchronous retrieval queue that streams tile payloads
//! from HTTP servers or out-of-process workers.
//!
//! The frame loop is single-threaded. Retrieval runs on a tokio runtime and
//! hands completions back through channels that the owning layer or coverage
//! drains once per frame.
//!
//! ```no_run
//! use std::sync::Arc;
//! use globetile::cache::{GpuResourceCache, DEFAULT_GPU_CACHE_CAPACITY, DEFAULT_GPU_CACHE_LOW_WATER};
//! use globetile::globe::{ConstantElevation, Globe, Tessellator, TessellatorConfig};
//! use globetile::layer::{ImageLayerConfig, TiledImageLayer};
//! use globetile::render::{DrawContext, View, Viewport, DEFAULT_FIELD_OF_VIEW};
//! use globetile::retrieval::HttpRetriever;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = tokio::runtime::Runtime::new()?;
//! let globe = Globe::wgs84(Box::new(ConstantElevation::new(0.0)));
//! let cache = GpuResourceCache::new(DEFAULT_GPU_CACHE_CAPACITY, DEFAULT_GPU_CACHE_LOW_WATER)?;
//! let mut dc = DrawContext::new(globe, cache);
//!
//! let mut tessellator = Tessellator::new(TessellatorConfig::default())?;
//! let config = ImageLayerConfig::new(45.0, 5, "image/png", "imagery", "https://tiles.example.com/{level}/{y}/{x}.png");
//! let mut layer = TiledImageLayer::new(config, Arc::new(HttpRetriever::new()?), runtime.handle().clone())?;
//!
//! let view = View::nadir(&dc.globe, 45.0, 7.0, 1.0e6, Viewport::new(1280, 720), DEFAULT_FIELD_OF_VIEW);
//! dc.set_view(&view);
//! if tessellator.tessellate(&mut dc).is_some() {
//!     let draws = layer.render(&mut dc);
//!     println!("{} draws", draws.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod geom;
pub mod globe;
pub mod layer;
pub mod level;
pub mod render;
pub mod retrieval;
pub mod tile;

#[cfg(test)]
mod test_support;

pub use error::{ConfigurationError, RetrievalError};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
