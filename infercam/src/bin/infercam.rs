//! InferCam binary.
//!
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use camera::{CameraConfig, CaptureSource, Facing, StillImageSource, V4lCamera};
use clap::Parser;
use env_logger::TimestampPrecision;
use infercam::{
    config::{
        ClassificationConfig, DetectionConfig, Interpolation, Layout, Mode, ModelSource,
        Normalization, PreprocConfig,
    },
    controller::{LoopController, Pipeline, Readiness, StartOutcome},
    endpoints,
    engine::TractEngine,
    meter::spawn_meter_logger,
    postproc::{Labels, Postprocessor},
    preproc::Preprocessor,
    pubsub::OverlayPubSub,
    render::Renderer,
    scheduler::IntervalScheduler,
    status::Status,
};

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address to serve the overlay stream on
    #[clap(long, default_value = "127.0.0.1:3000")]
    server_address: String,

    /// Path or URL of the ONNX model
    #[clap(long)]
    model: ModelSource,

    /// Whether the model classifies or detects
    #[clap(long, value_enum, default_value = "detect")]
    mode: Mode,

    /// Model input width
    #[clap(long, default_value = "640")]
    input_width: u32,

    /// Model input height
    #[clap(long, default_value = "640")]
    input_height: u32,

    #[clap(long, value_enum, default_value = "bilinear")]
    interpolation: Interpolation,

    #[clap(long, value_enum, default_value = "zero-to-one")]
    normalization: Normalization,

    #[clap(long, value_enum, default_value = "nchw")]
    layout: Layout,

    /// Class names, one per line
    #[clap(long)]
    labels: Option<PathBuf>,

    /// TrueType font for labels, only boxes are drawn without it
    #[clap(long)]
    font: Option<PathBuf>,

    /// Minimum class score of a detection
    #[clap(long, default_value = "0.5")]
    confidence_threshold: f32,

    /// Maximum overlap between kept detections
    #[clap(long, default_value = "0.45")]
    iou_threshold: f32,

    /// Maximum number of detections per frame
    #[clap(long, default_value = "20")]
    max_detections: usize,

    /// Number of predictions shown in classification mode
    #[clap(long, default_value = "3")]
    top_k: usize,

    /// Apply softmax to classification outputs
    #[clap(long)]
    softmax: bool,

    /// Name of an internal model node whose output is logged each tick
    #[clap(long)]
    inspect_node: Option<String>,

    /// Camera device
    #[clap(long, default_value = "/dev/video0")]
    device: String,

    /// Camera pixel format
    #[clap(long, default_value = "MJPG")]
    format: String,

    /// Camera resolution as WIDTHxHEIGHT, the maximum of the device if omitted
    #[clap(long, value_parser = parse_resolution)]
    resolution: Option<(u32, u32)>,

    /// Camera frame rate, the maximum of the device if omitted
    #[clap(long)]
    fps: Option<u32>,

    #[clap(long, value_enum, default_value = "user")]
    facing: Facing,

    /// Use a still image instead of the camera
    #[clap(long)]
    image: Option<PathBuf>,

    /// Milliseconds between loop ticks
    #[clap(long, default_value = "100")]
    cadence_ms: u64,

    #[clap(long, default_value = "85")]
    jpeg_quality: i32,
}

fn parse_resolution(value: &str) -> Result<(u32, u32), String> {
    let (width, height) = value
        .split_once('x')
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {value}"))?;
    let width = width.parse().map_err(|_| format!("invalid width {width}"))?;
    let height = height.parse().map_err(|_| format!("invalid height {height}"))?;
    Ok((width, height))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let pubsub = Arc::new(OverlayPubSub::new());
    spawn_meter_logger();

    let preproc_config = PreprocConfig {
        width: args.input_width,
        height: args.input_height,
        interpolation: args.interpolation,
        normalization: args.normalization,
        layout: args.layout,
    };

    // Model and camera are acquired once, failures only show up as status
    pubsub.set_status(Status::LoadingModel);
    let engine = match TractEngine::load(
        &args.model,
        preproc_config.input_shape(),
        args.inspect_node.as_deref(),
    )
    .await
    {
        Ok(engine) => Some(engine),
        Err(err) => {
            log::error!("Failed to load model {}: {err:#}", &args.model);
            pubsub.set_status(Status::ModelLoadFailed(format!("{err:#}")));
            None
        }
    };

    let source = match engine {
        Some(_) => {
            pubsub.set_status(Status::AcquiringCamera);
            match acquire_source(&args).await {
                Ok(source) => Some(source),
                Err(err) => {
                    log::error!("Failed to acquire camera: {err}");
                    pubsub.set_status(Status::CameraUnavailable(err));
                    None
                }
            }
        }
        None => None,
    };

    let readiness = Readiness {
        model_loaded: engine.is_some(),
        camera_acquired: source.is_some(),
    };

    let mut running = None;
    if let (Some(engine), Some(source)) = (engine, source) {
        pubsub.set_status(Status::Ready);
        let pipeline = build_pipeline(&args, preproc_config, engine, source, Arc::clone(&pubsub));
        let controller = LoopController::new(pipeline);
        let scheduler = IntervalScheduler::new(Duration::from_millis(args.cadence_ms));
        if let StartOutcome::Started(handle) = controller.start(readiness, scheduler) {
            running = Some((controller, handle));
        }
    }

    // Serve HTTP server
    let addr: SocketAddr = args.server_address.parse()?;
    log::info!("Serving on http://{addr}");
    let server = axum::Server::bind(&addr).serve(endpoints::router(pubsub).into_make_service());

    tokio::select! {
        result = server => result?,
        _ = tokio::signal::ctrl_c() => log::info!("Shutting down"),
    }

    if let Some((controller, handle)) = running {
        controller.stop();
        handle.await.ok();
    }

    Ok(())
}

/// Open the still image or camera, off the runtime since devices block.
async fn acquire_source(args: &Args) -> Result<Box<dyn CaptureSource>, String> {
    let image = args.image.clone();
    let facing = args.facing;
    let config = CameraConfig {
        device: args.device.clone(),
        format: args.format.clone(),
        resolution: args.resolution,
        frame_rate: args.fps.map(|fps| (1, fps)),
        facing,
    };

    tokio::task::spawn_blocking(move || -> Result<Box<dyn CaptureSource>, camera::Error> {
        match image {
            Some(path) => Ok(Box::new(StillImageSource::open(path)?.with_facing(facing))),
            None => Ok(Box::new(V4lCamera::open(&config)?)),
        }
    })
    .await
    .map_err(|err| err.to_string())?
    .map_err(|err| err.to_string())
}

fn build_pipeline(
    args: &Args,
    preproc_config: PreprocConfig,
    engine: TractEngine,
    source: Box<dyn CaptureSource>,
    pubsub: Arc<OverlayPubSub>,
) -> Pipeline {
    let labels = match &args.labels {
        Some(path) => Labels::from_file(path).unwrap_or_else(|err| {
            log::warn!("Using class ids as labels: {err:#}");
            Labels::default()
        }),
        None => Labels::default(),
    };

    let preprocessor = Preprocessor::new(preproc_config);
    let postprocessor = match args.mode {
        Mode::Classify => Postprocessor::Classification {
            labels: labels.clone(),
            config: ClassificationConfig {
                top_k: args.top_k,
                softmax: args.softmax,
            },
        },
        Mode::Detect => Postprocessor::Detection {
            config: DetectionConfig {
                confidence_threshold: args.confidence_threshold,
                iou_threshold: args.iou_threshold,
                max_detections: args.max_detections,
            },
            input_size: preprocessor.input_size(),
        },
    };

    let mut renderer = Renderer::new(source.facing().is_mirrored(), labels);
    if let Some(path) = &args.font {
        if let Err(err) = renderer.load_font(path) {
            log::warn!("{err:#}");
        }
    }
    if !renderer.has_font() {
        log::warn!("No font loaded, drawing boxes without labels");
    }

    Pipeline::new(
        source,
        Box::new(engine),
        preprocessor,
        postprocessor,
        renderer,
        pubsub,
    )
    .with_jpeg_quality(args.jpeg_quality)
}
