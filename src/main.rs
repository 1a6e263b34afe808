//! MJPEG streaming service

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use rpi_mjpeg_streamer::camera::synthetic::SyntheticBackend;
use rpi_mjpeg_streamer::camera::{CameraSession, CaptureBackend};
use rpi_mjpeg_streamer::config::{Config, SinkConfig};
use rpi_mjpeg_streamer::lifecycle::LifecycleController;
use rpi_mjpeg_streamer::sink::FrameSink;
use rpi_mjpeg_streamer::web::{self, AppState};

const DEFAULT_CONFIG: &str = "config.toml";

#[derive(Parser, Debug)]
#[command(name = "mjpeg-streamer")]
#[command(about = "MJPEG-over-HTTP streaming for a Raspberry Pi dual-stream camera and webcam")]
#[command(version)]
struct Cli {
    /// Path to configuration file (default: config.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the web server port
    #[arg(long)]
    web_port: Option<u16>,

    /// Override the bind address
    #[arg(long)]
    bind_ip: Option<String>,

    /// Use the synthetic test pattern instead of camera hardware
    #[arg(long)]
    test_mode: bool,

    /// Disable the secondary webcam
    #[arg(long)]
    no_webcam: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    fmt().with_env_filter(filter).with_target(false).init();

    info!("MJPEG streamer starting");

    let mut config = load_config(cli.config.as_ref())?;
    if let Some(port) = cli.web_port {
        config.server.web_port = port;
    }
    if let Some(ip) = cli.bind_ip.clone() {
        config.server.bind_ip = ip;
    }
    if cli.no_webcam {
        config.webcam.enabled = false;
    }

    info!(
        camera = %config.camera.name,
        webcam_enabled = config.webcam.enabled,
        sink_enabled = config.sink.enabled,
        "Configuration loaded"
    );

    let backend = select_backend(cli.test_mode)?;
    let sink = build_sink(&config.sink);

    let session = Arc::new(CameraSession::new(backend, &config, sink));
    let controller = Arc::new(LifecycleController::new(
        session,
        config.camera.reboot_settle(),
    ));

    // Sources that fail here can be retried through /start or /reboot.
    let report = controller.start().await;
    for e in &report.errors {
        warn!(error = %e, "Camera source failed to start");
    }

    let addr = format!("{}:{}", config.server.bind_ip, config.server.web_port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    let state = AppState::new(Arc::clone(&controller), &config.server);
    web::run_server(listener, state, shutdown_signal(Arc::clone(&controller))).await?;

    info!("Server stopped");
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => {
            info!(config_path = %path.display(), "Loading configuration");
            Config::load(path).with_context(|| format!("Failed to load {}", path.display()))
        }
        None if std::path::Path::new(DEFAULT_CONFIG).exists() => {
            info!(config_path = DEFAULT_CONFIG, "Loading configuration");
            Config::load(DEFAULT_CONFIG).with_context(|| format!("Failed to load {}", DEFAULT_CONFIG))
        }
        None => {
            info!("No configuration file, using defaults");
            Ok(Config::default())
        }
    }
}

#[cfg(feature = "libcamera")]
fn select_backend(test_mode: bool) -> Result<Arc<dyn CaptureBackend>> {
    use rpi_mjpeg_streamer::camera::gst::GstBackend;

    if test_mode {
        info!("Test mode: using synthetic camera backend");
        return Ok(Arc::new(SyntheticBackend::new()));
    }

    let backend = GstBackend::new().context("Failed to initialise GStreamer")?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "libcamera"))]
fn select_backend(test_mode: bool) -> Result<Arc<dyn CaptureBackend>> {
    if !test_mode {
        warn!("Built without the `libcamera` feature, using synthetic camera backend");
    }
    Ok(Arc::new(SyntheticBackend::new()))
}

#[cfg(feature = "zmq-sink")]
fn build_sink(config: &SinkConfig) -> Option<Arc<dyn FrameSink>> {
    use rpi_mjpeg_streamer::sink::ZmqFrameSink;

    if !config.enabled {
        return None;
    }

    match ZmqFrameSink::bind(&config.endpoint) {
        Ok(sink) => Some(Arc::new(sink)),
        Err(e) => {
            error!(error = %e, "Frame sink disabled");
            None
        }
    }
}

#[cfg(not(feature = "zmq-sink"))]
fn build_sink(config: &SinkConfig) -> Option<Arc<dyn FrameSink>> {
    if config.enabled {
        error!("Frame sink enabled in config but built without the `zmq-sink` feature");
    }
    None
}

async fn shutdown_signal(controller: Arc<LifecycleController>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }

    info!("Shutting down");

    // Ends every open stream so graceful shutdown can complete.
    let report = controller.stop().await;
    info!(message = report.message, "Cameras released");
}
