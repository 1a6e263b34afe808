//! MJPEG-over-HTTP streaming for a Raspberry Pi dual-stream camera and a
//! secondary webcam.
//!
//! - `streaming` holds the latest-frame slots and the multipart framing
//! - `camera` owns the hardware handles and the drivers behind them
//! - `lifecycle` serializes start / stop / reboot
//! - `web` is the axum router
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rpi_mjpeg_streamer::camera::{synthetic::SyntheticBackend, CameraSession};
//! use rpi_mjpeg_streamer::config::Config;
//! use rpi_mjpeg_streamer::lifecycle::LifecycleController;
//!
//! # async fn run() {
//! let config = Config::default();
//! let session = Arc::new(CameraSession::new(Arc::new(SyntheticBackend::new()), &config, None));
//! let controller = Arc::new(LifecycleController::new(session, config.camera.reboot_settle()));
//! controller.start().await;
//! # }
//! ```

pub mod camera;
pub mod config;
pub mod lifecycle;
pub mod sink;
pub mod streaming;
pub mod web;

// Re-exports for convenience
pub use camera::{CameraError, CameraSession, CaptureBackend};
pub use config::Config;
pub use lifecycle::{ControlOutcome, ControlReport, LifecycleController};
pub use streaming::{Frame, FrameSlot};
