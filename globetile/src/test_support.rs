//! Shared fixtures for unit tests.

use crate::cache::{GpuResourceCache, DEFAULT_GPU_CACHE_CAPACITY, DEFAULT_GPU_CACHE_LOW_WATER};
use crate::globe::{ConstantElevation, Globe};
use crate::render::{DrawContext, View, Viewport, DEFAULT_FIELD_OF_VIEW};

/// A WGS84 sea-level globe viewed straight down from `altitude` metres
/// above (`latitude`, `longitude`) through an 800x600 viewport.
pub fn draw_context_looking_at(latitude: f64, longitude: f64, altitude: f64) -> DrawContext {
    let globe = Globe::wgs84(Box::new(ConstantElevation::new(0.0)));
    let cache = GpuResourceCache::new(DEFAULT_GPU_CACHE_CAPACITY, DEFAULT_GPU_CACHE_LOW_WATER)
        .expect("default GPU cache sizes are valid");
    let mut dc = DrawContext::new(globe, cache);
    let view = View::nadir(
        &dc.globe,
        latitude,
        longitude,
        altitude,
        Viewport::new(800, 600),
        DEFAULT_FIELD_OF_VIEW,
    );
    dc.set_view(&view);
    dc
}

/// Encodes a small opaque PNG.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(width, height, image::Rgba([40, 90, 160, 255]));
    let mut bytes = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, image::ImageFormat::Png)
        .expect("PNG encoding succeeds");
    bytes.into_inner()
}
