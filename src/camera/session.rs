//! Camera session: the two frame slots and the hardware handles feeding them

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info};

use super::{CameraError, CaptureBackend, FpsCounter, PullSource, PushSource, StreamOutputs};
use crate::config::{Config, PrimaryConfig, WebcamConfig};
use crate::sink::FrameSink;
use crate::streaming::{CaptureSource, Frame, FrameSlot};

pub const PRIMARY: &str = "primary camera";
pub const WEBCAM: &str = "webcam";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceState {
    Stopped,
    Running,
    Rebooting,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub primary: SourceState,
    /// `None` when the webcam is disabled
    pub webcam: Option<SourceState>,
    pub primary_fps: u32,
    pub webcam_fps: u32,
}

struct Webcam {
    source: Box<dyn PullSource>,
    // Reused across captures, never shared between callers.
    buffer: Vec<u8>,
    fps: FpsCounter,
}

/// Owns the primary push source, the optional webcam pull source and the
/// slots the primary source writes into.
///
/// Each handle sits behind its own mutex. Webcam captures hold the webcam
/// mutex for the whole capture, so concurrent clients are serialized.
/// Running state lives in atomics so status checks never wait on hardware.
pub struct CameraSession {
    backend: Arc<dyn CaptureBackend>,
    primary_cfg: PrimaryConfig,
    webcam_cfg: WebcamConfig,
    high: FrameSlot,
    low: FrameSlot,
    outputs: StreamOutputs,
    primary: Mutex<Option<Box<dyn PushSource>>>,
    webcam: Mutex<Option<Webcam>>,
    primary_open: AtomicBool,
    webcam_open: AtomicBool,
    webcam_fps: Mutex<u32>,
}

impl CameraSession {
    pub fn new(
        backend: Arc<dyn CaptureBackend>,
        config: &Config,
        sink: Option<Arc<dyn FrameSink>>,
    ) -> Self {
        let high = FrameSlot::new("high");
        let low = FrameSlot::new("low");

        let mut outputs = StreamOutputs::new(high.clone(), low.clone());
        if let Some(sink) = sink {
            outputs = outputs.with_sink(sink, &config.sink.topic, &config.camera.name);
        }

        Self {
            backend,
            primary_cfg: config.camera.clone(),
            webcam_cfg: config.webcam.clone(),
            high,
            low,
            outputs,
            primary: Mutex::new(None),
            webcam: Mutex::new(None),
            primary_open: AtomicBool::new(false),
            webcam_open: AtomicBool::new(false),
            webcam_fps: Mutex::new(0),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn high_res(&self) -> &FrameSlot {
        &self.high
    }

    pub fn low_res(&self) -> &FrameSlot {
        &self.low
    }

    pub fn webcam_enabled(&self) -> bool {
        self.webcam_cfg.enabled
    }

    pub fn primary_running(&self) -> bool {
        self.primary_open.load(Ordering::Acquire)
    }

    pub fn webcam_running(&self) -> bool {
        self.webcam_open.load(Ordering::Acquire)
    }

    /// Every configured source is running.
    pub fn all_running(&self) -> bool {
        self.primary_running() && (!self.webcam_enabled() || self.webcam_running())
    }

    pub fn any_running(&self) -> bool {
        self.primary_running() || self.webcam_running()
    }

    /// Start the dual-stream primary camera. Returns `Ok(false)` if it was
    /// already running; the hardware is left untouched in that case.
    pub fn setup_primary(&self) -> Result<bool, CameraError> {
        let mut primary = self.primary.lock();
        if primary.is_some() {
            debug!("Primary camera already running");
            return Ok(false);
        }

        let cfg = &self.primary_cfg;
        info!(
            backend = self.backend.name(),
            main = %format!("{}x{}", cfg.width, cfg.height),
            lores = %format!("{}x{}", cfg.lowres_width, cfg.lowres_height),
            fps = cfg.fps,
            "Starting primary camera"
        );

        let source = self.backend.open_primary(cfg, self.outputs.clone())?;
        *primary = Some(source);
        self.primary_open.store(true, Ordering::Release);

        info!("Primary camera recording both streams");
        Ok(true)
    }

    /// Start the webcam if it is enabled and not yet open.
    pub fn setup_secondary(&self) -> Result<bool, CameraError> {
        if !self.webcam_enabled() {
            return Ok(false);
        }

        let mut webcam = self.webcam.lock();
        if webcam.is_some() {
            debug!("Webcam already running");
            return Ok(false);
        }

        let cfg = &self.webcam_cfg;
        info!(
            backend = self.backend.name(),
            device = %cfg.device,
            resolution = %format!("{}x{}", cfg.width, cfg.height),
            "Starting webcam"
        );

        let source = self.backend.open_secondary(cfg)?;
        *webcam = Some(Webcam {
            source,
            buffer: Vec::new(),
            fps: FpsCounter::new(),
        });
        self.webcam_open.store(true, Ordering::Release);

        Ok(true)
    }

    /// Stop the primary camera and wake every client waiting on its slots.
    ///
    /// The handle is released even when the driver reports a teardown error.
    pub fn stop_primary(&self) -> Result<bool, CameraError> {
        let taken = self.primary.lock().take();
        let Some(mut source) = taken else {
            return Ok(false);
        };
        self.primary_open.store(false, Ordering::Release);

        info!("Stopping primary camera");
        let result = source.stop();
        drop(source);

        self.high.close();
        self.low.close();

        result.map(|_| true)
    }

    pub fn stop_secondary(&self) -> Result<bool, CameraError> {
        // Waits for an in-flight capture to finish.
        let taken = self.webcam.lock().take();
        let Some(mut webcam) = taken else {
            return Ok(false);
        };
        self.webcam_open.store(false, Ordering::Release);

        info!("Stopping webcam");
        *self.webcam_fps.lock() = 0;
        webcam.source.stop().map(|_| true)
    }

    /// Capture one webcam frame.
    pub fn capture_once(&self) -> Result<Frame, CameraError> {
        if !self.webcam_enabled() {
            return Err(CameraError::Disabled(WEBCAM));
        }

        let mut guard = self.webcam.lock();
        let webcam = guard.as_mut().ok_or(CameraError::NotRunning(WEBCAM))?;

        webcam.buffer.clear();
        webcam.source.capture_into(&mut webcam.buffer)?;
        let frame = Frame::now(Bytes::copy_from_slice(&webcam.buffer));
        webcam.buffer.clear();

        if let Some(fps) = webcam.fps.tick() {
            *self.webcam_fps.lock() = fps;
            debug!(fps, "Webcam frame rate");
        }

        Ok(frame)
    }

    pub fn status(&self, rebooting: bool) -> SessionStatus {
        let state = |running: bool| match (rebooting, running) {
            (true, _) => SourceState::Rebooting,
            (false, true) => SourceState::Running,
            (false, false) => SourceState::Stopped,
        };

        SessionStatus {
            primary: state(self.primary_running()),
            webcam: self.webcam_enabled().then(|| state(self.webcam_running())),
            primary_fps: self.outputs.fps(),
            webcam_fps: *self.webcam_fps.lock(),
        }
    }
}

impl CaptureSource for CameraSession {
    fn capture_once(&self) -> Result<Frame, CameraError> {
        CameraSession::capture_once(self)
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        if let Err(e) = self.stop_primary() {
            error!(error = %e, "Failed to stop primary camera on drop");
        }
        if let Err(e) = self.stop_secondary() {
            error!(error = %e, "Failed to stop webcam on drop");
        }
    }
}
