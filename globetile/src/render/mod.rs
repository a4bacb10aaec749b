//! Per-frame state the tiling core reads.
//!
//! The host owns one [`DrawContext`] for the lifetime of the scene. Each
//! frame it installs a [`View`], calls the tessellator and then each
//! imagery layer, and finally inspects the [`RedrawHandle`] to decide
//! whether another frame is needed.
//!
//! # Redraw coalescing
//!
//! Retrieval completions run on the async runtime. Rather than reaching a
//! global render surface, each completion holds a clone of the context's
//! [`RedrawHandle`] and sets it; any number of completions between two
//! frames collapse into a single pending redraw.

mod surface;

pub use surface::{SurfaceTileDraw, SurfaceTileRenderer};

use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use glam::{DMat4, DVec3};

use crate::cache::GpuResourceCache;
use crate::geom::Frustum;
use crate::globe::{Globe, Terrain};

/// Default vertical field of view in degrees.
pub const DEFAULT_FIELD_OF_VIEW: f64 = 45.0;

/// Shared "please render again" flag.
#[derive(Debug, Clone, Default)]
pub struct RedrawHandle {
    requested: Arc<AtomicBool>,
}

impl RedrawHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a redraw as pending. Safe to call from any thread.
    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Clears the pending flag, returning whether a redraw was requested.
    pub fn take(&self) -> bool {
        self.requested.swap(false, Ordering::AcqRel)
    }
}

/// Counters describing the work done during the current frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStatistics {
    /// Tiles whose extent was recomputed.
    pub tile_update_count: usize,
    /// Terrain tiles whose vertices were regenerated.
    pub geometry_regeneration_count: usize,
    /// Retrievals submitted.
    pub retrievals_submitted: usize,
    /// Terrain tiles in the current tessellation.
    pub terrain_tile_count: usize,
    /// Surface tiles drawn by imagery layers.
    pub image_tile_count: usize,
}

impl FrameStatistics {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Viewport dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height.max(1) as f64
    }
}

/// Camera transforms for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct View {
    pub modelview: DMat4,
    pub projection: DMat4,
    pub viewport: Viewport,
    /// Vertical field of view in degrees.
    pub field_of_view: f64,
}

impl View {
    /// A camera `altitude` metres above (`latitude`, `longitude`) looking
    /// straight down with north up. The far plane sits just beyond the horizon.
    pub fn nadir(
        globe: &Globe,
        latitude: f64,
        longitude: f64,
        altitude: f64,
        viewport: Viewport,
        field_of_view: f64,
    ) -> Self {
        let eye = globe.compute_point_from_position(latitude, longitude, altitude);
        let target = globe.compute_point_from_position(latitude, longitude, 0.0);
        let north = globe.compute_point_from_position((latitude + 0.01).min(90.0), longitude, 0.0);
        let mut up = (north - target).normalize_or_zero();
        if up == DVec3::ZERO || latitude >= 89.99 {
            up = DVec3::NEG_Z;
        }

        let radius = globe.equatorial_radius();
        let horizon = (altitude * (2.0 * radius + altitude)).max(0.0).sqrt();
        let near = (altitude * 0.05).max(1.0);
        let far = (horizon * 1.2).max(near * 2.0);

        Self {
            modelview: DMat4::look_at_rh(eye, target, up),
            projection: DMat4::perspective_rh_gl(
                field_of_view.to_radians(),
                viewport.aspect_ratio(),
                near,
                far,
            ),
            viewport,
            field_of_view,
        }
    }
}

/// Frame state consumed by the tessellator and imagery layers.
pub struct DrawContext {
    pub globe: Globe,
    pub gpu_resource_cache: GpuResourceCache,
    pub redraw: RedrawHandle,
    pub vertical_exaggeration: f64,
    pub frame_statistics: FrameStatistics,
    /// The tessellation produced for this frame, if any.
    pub terrain: Option<Rc<Terrain>>,
    modelview: DMat4,
    modelview_projection: DMat4,
    frustum: Frustum,
    eye_point: DVec3,
    viewport: Viewport,
    field_of_view: f64,
}

impl DrawContext {
    pub fn new(globe: Globe, gpu_resource_cache: GpuResourceCache) -> Self {
        Self {
            globe,
            gpu_resource_cache,
            redraw: RedrawHandle::new(),
            vertical_exaggeration: 1.0,
            frame_statistics: FrameStatistics::default(),
            terrain: None,
            modelview: DMat4::IDENTITY,
            modelview_projection: DMat4::IDENTITY,
            frustum: Frustum::from_modelview_projection(&DMat4::IDENTITY),
            eye_point: DVec3::ZERO,
            viewport: Viewport::new(0, 0),
            field_of_view: DEFAULT_FIELD_OF_VIEW,
        }
    }

    /// Installs the camera for the next frame and resets frame statistics.
    pub fn set_view(&mut self, view: &View) {
        self.modelview = view.modelview;
        self.modelview_projection = view.projection * view.modelview;
        self.frustum = Frustum::from_modelview_projection(&self.modelview_projection);
        self.eye_point = view.modelview.inverse().transform_point3(DVec3::ZERO);
        self.viewport = view.viewport;
        self.field_of_view = view.field_of_view;
        self.frame_statistics.reset();
    }

    pub fn modelview(&self) -> &DMat4 {
        &self.modelview
    }

    pub fn modelview_projection(&self) -> &DMat4 {
        &self.modelview_projection
    }

    pub fn frustum_in_model_coordinates(&self) -> &Frustum {
        &self.frustum
    }

    pub fn eye_point(&self) -> DVec3 {
        self.eye_point
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// True when both the globe and the viewport can be rendered.
    pub fn is_usable(&self) -> bool {
        self.globe.is_usable() && !self.viewport.is_empty()
    }

    /// Size in metres of one pixel at `distance` metres from the eye.
    pub fn pixel_size_at_distance(&self, distance: f64) -> f64 {
        let frustum_height = 2.0 * distance * (0.5 * self.field_of_view.to_radians()).tan();
        frustum_height / self.viewport.height.max(1) as f64
    }
}
