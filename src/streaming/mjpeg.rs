//! Multipart MJPEG framing and per-client frame streams

use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use futures_util::stream::{self, Stream};
use serde::Serialize;
use tracing::{debug, info};

use super::frame_slot::{Frame, FrameSlot, FrameWaiter};
use crate::camera::CameraError;

pub const BOUNDARY: &str = "frame";
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";
pub const TIMESTAMP_DELIMITER: &[u8] = b"---timestamp---";

const PART_HEADER: &[u8] = b"Content-Type: image/jpeg\r\n\r\n";

/// How each frame is wrapped into a multipart chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartFormat {
    /// `--frame` boundary first, then the JPEG.
    Plain,
    /// JPEG followed by `---timestamp---<ms>`, boundary last.
    Timestamped,
}

impl PartFormat {
    pub fn encode(self, frame: &Frame) -> Bytes {
        let mut buf = BytesMut::with_capacity(frame.len() + 96);

        match self {
            PartFormat::Plain => {
                buf.put_slice(b"--");
                buf.put_slice(BOUNDARY.as_bytes());
                buf.put_slice(b"\r\n");
                buf.put_slice(PART_HEADER);
                buf.put_slice(&frame.data);
                buf.put_slice(b"\r\n");
            }
            PartFormat::Timestamped => {
                buf.put_slice(PART_HEADER);
                buf.put_slice(&frame.data);
                buf.put_slice(TIMESTAMP_DELIMITER);
                buf.put_slice(frame.timestamp_ms.to_string().as_bytes());
                buf.put_slice(b"\r\n--");
                buf.put_slice(BOUNDARY.as_bytes());
                buf.put_slice(b"\r\n");
            }
        }

        buf.freeze()
    }
}

/// A source that captures one frame per call, blocking the caller.
pub trait CaptureSource: Send + Sync + 'static {
    fn capture_once(&self) -> Result<Frame, CameraError>;
}

/// Per-route client statistics
#[derive(Debug, Default)]
pub struct StreamStats {
    active: AtomicUsize,
    total: AtomicU64,
    chunks_sent: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamStatsSnapshot {
    pub active_clients: usize,
    pub total_clients: u64,
    pub chunks_sent: u64,
}

impl StreamStats {
    pub fn snapshot(&self) -> StreamStatsSnapshot {
        StreamStatsSnapshot {
            active_clients: self.active.load(Ordering::Relaxed),
            total_clients: self.total.load(Ordering::Relaxed),
            chunks_sent: self.chunks_sent.load(Ordering::Relaxed),
        }
    }
}

/// Connection-scoped state shared by both stream kinds.
///
/// Dropping it (client gone, or stream finished) releases the active slot.
struct ClientContext {
    id: u64,
    route: &'static str,
    stats: Arc<StreamStats>,
}

impl ClientContext {
    fn open(route: &'static str, stats: Arc<StreamStats>) -> Self {
        let id = stats.total.fetch_add(1, Ordering::Relaxed);
        let active = stats.active.fetch_add(1, Ordering::Relaxed) + 1;
        info!(client_id = id, route, active, "Streaming client connected");

        Self { id, route, stats }
    }

    fn sent(&self) {
        self.stats.chunks_sent.fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for ClientContext {
    fn drop(&mut self) {
        let active = self.stats.active.fetch_sub(1, Ordering::Relaxed) - 1;
        info!(client_id = self.id, route = self.route, active, "Streaming client disconnected");
    }
}

/// Stream chunks from a `FrameSlot` until it is closed or the client goes away.
pub fn slot_stream(
    slot: &FrameSlot,
    format: PartFormat,
    route: &'static str,
    stats: Arc<StreamStats>,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    let ctx = ClientContext::open(route, stats);
    let waiter = slot.subscribe();

    stream::unfold(
        (waiter, ctx),
        move |(mut waiter, ctx): (FrameWaiter, ClientContext)| async move {
            match waiter.next_frame().await {
                Ok(frame) => {
                    ctx.sent();
                    Some((Ok(format.encode(&frame)), (waiter, ctx)))
                }
                Err(_) => {
                    debug!(client_id = ctx.id, route = ctx.route, "Frame slot closed, ending stream");
                    None
                }
            }
        },
    )
}

/// Stream chunks by capturing on demand from a pull source.
///
/// Each capture runs on the blocking pool. The stream ends on the first
/// capture failure, e.g. when the source was stopped.
pub fn capture_stream<S: CaptureSource>(
    source: Arc<S>,
    format: PartFormat,
    route: &'static str,
    stats: Arc<StreamStats>,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    let ctx = ClientContext::open(route, stats);

    stream::unfold((source, ctx), move |(source, ctx)| async move {
        let worker = Arc::clone(&source);
        match tokio::task::spawn_blocking(move || worker.capture_once()).await {
            Ok(Ok(frame)) => {
                ctx.sent();
                Some((Ok(format.encode(&frame)), (source, ctx)))
            }
            Ok(Err(e)) => {
                debug!(client_id = ctx.id, route = ctx.route, error = %e, "Capture ended stream");
                None
            }
            Err(e) => {
                debug!(client_id = ctx.id, route = ctx.route, error = %e, "Capture task aborted");
                None
            }
        }
    })
}
