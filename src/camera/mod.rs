//! Camera sources and the drivers behind them
//!
//! The primary camera is a push source: the driver invokes a per-frame
//! callback and hands encoded JPEGs for both outputs to `StreamOutputs`.
//! The webcam is a pull source: one JPEG is captured per call.

mod fps;
pub mod session;
pub mod synthetic;

#[cfg(feature = "libcamera")]
pub mod gst;

#[cfg(test)]
pub(crate) mod mock;

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::trace;

use crate::config::{PrimaryConfig, WebcamConfig};
use crate::sink::{log_delivery, FrameRecord, FrameSink};
use crate::streaming::{Frame, FrameSlot};

pub use fps::{FpsCounter, OverlayText};
pub use session::{CameraSession, SessionStatus, SourceState};

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("failed to initialise {camera}: {reason}")]
    HardwareInit { camera: &'static str, reason: String },

    #[error("failed to stop {camera}: {reason}")]
    Teardown { camera: &'static str, reason: String },

    #[error("capture failed: {0}")]
    Capture(String),

    #[error("{0} is not enabled")]
    Disabled(&'static str),

    #[error("{0} is not running")]
    NotRunning(&'static str),

    #[cfg(feature = "libcamera")]
    #[error("GStreamer error: {0}")]
    Gst(#[from] ::gstreamer::glib::Error),

    #[cfg(feature = "libcamera")]
    #[error("GStreamer bool error: {0}")]
    GstBool(#[from] ::gstreamer::glib::BoolError),
}

/// Opens camera hardware.
pub trait CaptureBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Start both encoded outputs of the primary camera.
    fn open_primary(
        &self,
        config: &PrimaryConfig,
        outputs: StreamOutputs,
    ) -> Result<Box<dyn PushSource>, CameraError>;

    /// Open the webcam for single-shot captures.
    fn open_secondary(&self, config: &WebcamConfig) -> Result<Box<dyn PullSource>, CameraError>;
}

/// A running push source. Dropping it must release the hardware.
pub trait PushSource: Send {
    fn stop(&mut self) -> Result<(), CameraError>;
}

/// An open pull source.
pub trait PullSource: Send {
    /// Append one encoded JPEG to `buf`. May block for the capture duration.
    fn capture_into(&mut self, buf: &mut Vec<u8>) -> Result<(), CameraError>;

    fn stop(&mut self) -> Result<(), CameraError>;
}

#[derive(Clone)]
struct SinkTarget {
    sink: Arc<dyn FrameSink>,
    topic: String,
    key: String,
}

/// What a push driver writes into: the two frame slots, the frame-rate
/// window and the optional external sink.
#[derive(Clone)]
pub struct StreamOutputs {
    high: FrameSlot,
    low: FrameSlot,
    fps: Arc<Mutex<FpsCounter>>,
    sink: Option<SinkTarget>,
}

impl StreamOutputs {
    pub(crate) fn new(high: FrameSlot, low: FrameSlot) -> Self {
        Self {
            high,
            low,
            fps: Arc::new(Mutex::new(FpsCounter::new())),
            sink: None,
        }
    }

    pub(crate) fn with_sink(mut self, sink: Arc<dyn FrameSink>, topic: &str, key: &str) -> Self {
        self.sink = Some(SinkTarget {
            sink,
            topic: topic.to_string(),
            key: key.to_string(),
        });
        self
    }

    /// Per-frame callback. Counts the frame and returns the overlay to draw.
    pub fn on_frame(&self) -> OverlayText {
        let mut fps = self.fps.lock();
        if let Some(rate) = fps.tick() {
            trace!(fps = rate, "Primary camera frame rate");
        }
        OverlayText::now(fps.fps())
    }

    pub fn fps(&self) -> u32 {
        self.fps.lock().fps()
    }

    /// Publish one high-resolution JPEG and forward it to the sink.
    pub fn publish_high(&self, data: Bytes) {
        let frame = Frame::now(data);

        if let Some(target) = &self.sink {
            let record = FrameRecord {
                topic: target.topic.clone(),
                key: target.key.clone(),
                payload: frame.data.clone(),
                timestamp_ms: frame.timestamp_ms,
            };
            self.high.publish(frame);
            target.sink.send(&record, log_delivery);
        } else {
            self.high.publish(frame);
        }
    }

    pub fn publish_low(&self, data: Bytes) {
        self.low.publish(Frame::now(data));
    }
}
