//! `simulate`: a headless frame loop.
//!
//! The camera flies east at a fixed altitude while the tessellator and an
//! imagery layer run every frame, exactly as a renderer would drive them.
//! Tiles come from in-process workers that synthesize PNG imagery and BIL16
//! elevation, so no network is needed.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use globetile::cache::GpuResourceCache;
use globetile::config::ConfigFile;
use globetile::globe::{ConstantElevation, ElevationSource, Globe, Tessellator, TiledElevationCoverage};
use globetile::layer::TiledImageLayer;
use globetile::render::{DrawContext, View, Viewport, DEFAULT_FIELD_OF_VIEW};
use globetile::retrieval::{spawn_worker, WorkerRequest, WorkerResponse};
use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::error::CliError;

const IMAGERY_TEMPLATE: &str = "worker://imagery/{level}/{y}/{x}";
const ELEVATION_TEMPLATE: &str = "worker://elevation/{z}/{y}/{x}";
const SYNTHETIC_IMAGE_SIZE: u32 = 8;

#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// Number of frames to run
    #[arg(long, default_value_t = 60)]
    pub frames: usize,

    /// Starting camera latitude in degrees
    #[arg(long, default_value_t = 46.0, allow_hyphen_values = true)]
    pub latitude: f64,

    /// Starting camera longitude in degrees
    #[arg(long, default_value_t = 7.0, allow_hyphen_values = true)]
    pub longitude: f64,

    /// Camera altitude in metres
    #[arg(long, default_value_t = 1.5e6)]
    pub altitude: f64,

    /// Eastward camera motion per frame, in degrees
    #[arg(long, default_value_t = 0.25, allow_hyphen_values = true)]
    pub speed: f64,

    /// Delay between frames in milliseconds
    #[arg(long, default_value_t = 16)]
    pub frame_interval_ms: u64,

    /// Viewport width in pixels
    #[arg(long, default_value_t = 1280)]
    pub width: u32,

    /// Viewport height in pixels
    #[arg(long, default_value_t = 720)]
    pub height: u32,

    /// Use a sea-level globe instead of synthetic elevation
    #[arg(long)]
    pub flat: bool,
}

/// Per-frame statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameReport {
    pub frame: usize,
    pub terrain_tiles: usize,
    pub regenerated: usize,
    pub image_tiles: usize,
    pub draws: usize,
    pub submitted: usize,
    pub in_flight: usize,
    pub elevation_timestamp: u64,
    pub redraw: bool,
}

fn synthetic_image(request: WorkerRequest) -> WorkerResponse {
    // Shade by level so refinement is visible when dumped.
    let shade = (40 * request.z).min(255) as u8;
    let image = image::RgbaImage::from_pixel(
        SYNTHETIC_IMAGE_SIZE,
        SYNTHETIC_IMAGE_SIZE,
        image::Rgba([shade, 120, 255 - shade, 255]),
    );
    let mut png = Cursor::new(Vec::new());
    match image.write_to(&mut png, image::ImageFormat::Png) {
        Ok(()) => WorkerResponse::Success {
            tile_key: request.tile_key,
            data: png.into_inner(),
        },
        Err(e) => WorkerResponse::Error {
            tile_key: request.tile_key,
            msg: e.to_string(),
        },
    }
}

/// Rolling hills: one BIL16 sample per texel, row-major from the north edge.
fn synthetic_elevation(tile_width: u32, tile_height: u32) -> impl Fn(WorkerRequest) -> WorkerResponse {
    move |request| {
        let scale = 0.5_f64.powi(request.z as i32);
        let mut data = Vec::with_capacity((tile_width * tile_height * 2) as usize);
        for j in 0..tile_height {
            for i in 0..tile_width {
                let gx = (request.x * tile_width + i) as f64 * scale;
                let gy = (request.y * tile_height + (tile_height - 1 - j)) as f64 * scale;
                let elevation = 1500.0 + 1200.0 * (gx * 0.05).sin() * (gy * 0.07).cos();
                data.extend_from_slice(&(elevation as i16).to_le_bytes());
            }
        }
        WorkerResponse::Success {
            tile_key: request.tile_key,
            data,
        }
    }
}

fn globe(args: &SimulateArgs, config: &ConfigFile, runtime: &Handle) -> Result<Globe, CliError> {
    let timeout = Duration::from_secs(config.retrieval.timeout_secs);
    let elevation: Box<dyn ElevationSource> = if args.flat {
        Box::new(ConstantElevation::new(0.0))
    } else {
        let mut settings = config.clone();
        settings.elevation.url = Some(ELEVATION_TEMPLATE.to_string());
        let coverage_config = settings
            .elevation_coverage_config()?
            .ok_or_else(|| CliError::Config("elevation coverage is not configured".to_string()))?;
        let worker = spawn_worker(
            runtime,
            timeout,
            synthetic_elevation(coverage_config.tile_width, coverage_config.tile_height),
        )
        .with_content_type(coverage_config.format.mime_type());
        Box::new(TiledElevationCoverage::new(coverage_config, Arc::new(worker), runtime.clone())?)
    };
    Ok(Globe::wgs84(elevation))
}

/// Runs the frame loop and returns one report per frame.
pub fn simulate(
    args: &SimulateArgs,
    config: &ConfigFile,
    runtime: &Handle,
) -> Result<Vec<FrameReport>, CliError> {
    let mut settings = config.clone();
    settings.imagery.url = Some(IMAGERY_TEMPLATE.to_string());
    settings.imagery.format = "image/png".to_string();
    let layer_config = settings
        .image_layer_config()
        .ok_or_else(|| CliError::Config("imagery layer is not configured".to_string()))?;

    let imagery = spawn_worker(
        runtime,
        Duration::from_secs(config.retrieval.timeout_secs),
        synthetic_image,
    )
    .with_content_type("image/png");
    let mut layer = TiledImageLayer::new(layer_config, Arc::new(imagery), runtime.clone())?;
    let mut tessellator = Tessellator::new(config.tessellator_config())?;

    let cache = GpuResourceCache::new(
        globetile::cache::DEFAULT_GPU_CACHE_CAPACITY,
        globetile::cache::DEFAULT_GPU_CACHE_LOW_WATER,
    )?;
    let mut dc = DrawContext::new(globe(args, config, runtime)?, cache);
    let viewport = Viewport::new(args.width, args.height);

    let mut reports = Vec::with_capacity(args.frames);
    for frame in 0..args.frames {
        let longitude = wrap_longitude(args.longitude + args.speed * frame as f64);
        let view = View::nadir(
            &dc.globe,
            args.latitude,
            longitude,
            args.altitude,
            viewport,
            DEFAULT_FIELD_OF_VIEW,
        );
        dc.set_view(&view);

        let draws = if tessellator.tessellate(&mut dc).is_some() {
            layer.render(&mut dc).len()
        } else {
            0
        };

        let stats = &dc.frame_statistics;
        let report = FrameReport {
            frame,
            terrain_tiles: stats.terrain_tile_count,
            regenerated: stats.geometry_regeneration_count,
            image_tiles: stats.image_tile_count,
            draws,
            submitted: stats.retrievals_submitted,
            in_flight: layer.retrievals_in_flight(),
            elevation_timestamp: dc.globe.elevation_timestamp(),
            redraw: dc.redraw.take(),
        };
        debug!(?report, "Frame complete");
        reports.push(report);

        std::thread::sleep(Duration::from_millis(args.frame_interval_ms));
    }

    info!(
        frames = reports.len(),
        texture_bytes = dc.gpu_resource_cache.used_capacity(),
        "Simulation finished"
    );
    Ok(reports)
}

fn wrap_longitude(longitude: f64) -> f64 {
    (longitude + 180.0).rem_euclid(360.0) - 180.0
}

pub fn run(args: SimulateArgs, config: &ConfigFile) -> Result<(), CliError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::Startup(format!("Failed to start async runtime: {}", e)))?;

    let reports = simulate(&args, config, runtime.handle())?;

    println!(
        "{:>5}  {:>7}  {:>5}  {:>6}  {:>5}  {:>6}  {:>6}  {:>5}  {:>6}",
        "Frame", "Terrain", "Regen", "Images", "Draws", "Submit", "Flight", "Elev", "Redraw"
    );
    for r in &reports {
        println!(
            "{:>5}  {:>7}  {:>5}  {:>6}  {:>5}  {:>6}  {:>6}  {:>5}  {:>6}",
            r.frame,
            r.terrain_tiles,
            r.regenerated,
            r.image_tiles,
            r.draws,
            r.submitted,
            r.in_flight,
            r.elevation_timestamp,
            if r.redraw { "yes" } else { "" }
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(frames: usize, flat: bool) -> SimulateArgs {
        SimulateArgs {
            frames,
            latitude: 20.0,
            longitude: 20.0,
            altitude: 2.0e6,
            speed: 0.0,
            frame_interval_ms: 5,
            width: 800,
            height: 600,
            flat,
        }
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap()
    }

    fn small_config() -> ConfigFile {
        let mut config = ConfigFile::default();
        config.tessellator.tile_size = 8;
        config.imagery.num_levels = 4;
        config.elevation.tile_size = 16;
        config.elevation.resolution = 45.0 / 16.0 / 4.0;
        config.retrieval.queue_size = 256;
        config
    }

    #[test]
    fn test_synthetic_elevation_fills_a_tile() {
        let handler = synthetic_elevation(4, 4);
        let response = handler(WorkerRequest {
            tile_key: "0.1.2".to_string(),
            x: 2,
            y: 1,
            z: 0,
        });
        match response {
            WorkerResponse::Success { tile_key, data } => {
                assert_eq!(tile_key, "0.1.2");
                assert_eq!(data.len(), 4 * 4 * 2);
            }
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[test]
    fn test_synthetic_image_decodes() {
        let response = synthetic_image(WorkerRequest {
            tile_key: "1.0.0".to_string(),
            x: 0,
            y: 0,
            z: 1,
        });
        let WorkerResponse::Success { data, .. } = response else {
            panic!("image synthesis failed");
        };
        let image = image::load_from_memory(&data).unwrap();
        assert_eq!(image.width(), SYNTHETIC_IMAGE_SIZE);
    }

    #[test]
    fn test_wrap_longitude() {
        assert_eq!(wrap_longitude(190.0), -170.0);
        assert_eq!(wrap_longitude(-190.0), 170.0);
        assert_eq!(wrap_longitude(20.0), 20.0);
    }

    #[test]
    fn test_frame_loop_draws_imagery_and_loads_elevation() {
        let runtime = runtime();
        let reports = simulate(&args(60, false), &small_config(), runtime.handle()).unwrap();

        assert_eq!(reports.len(), 60);
        assert!(reports[0].submitted > 0);
        assert!(reports.iter().all(|r| r.terrain_tiles > 0));
        let last = reports.last().unwrap();
        assert!(last.draws > 0, "imagery never drawn");
        assert!(last.elevation_timestamp > 0, "elevation never loaded");
    }

    #[test]
    fn test_flat_globe_has_static_elevation() {
        let runtime = runtime();
        let reports = simulate(&args(5, true), &small_config(), runtime.handle()).unwrap();
        assert!(reports.iter().all(|r| r.elevation_timestamp == reports[0].elevation_timestamp));
    }
}
