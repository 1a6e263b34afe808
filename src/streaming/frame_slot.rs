/// Latest-value frame distribution
///
/// A `FrameSlot` holds the most recent encoded frame of one sub-stream and
/// wakes every waiting client when it is replaced. Frames are shared as
/// `Bytes`, so handing one to a client never copies the JPEG data and never
/// holds the slot lock for longer than a reference count bump.
///
/// Slow clients do not queue anything: a waiter that falls behind simply
/// observes the newest frame on its next call (latest-wins).
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

/// One encoded image plus its capture time in milliseconds since the epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub data: Bytes,
    pub timestamp_ms: i64,
}

impl Frame {
    pub fn new(data: impl Into<Bytes>, timestamp_ms: i64) -> Self {
        Self {
            data: data.into(),
            timestamp_ms,
        }
    }

    /// Stamp `data` with the current wall-clock time.
    pub fn now(data: impl Into<Bytes>) -> Self {
        Self::new(data, now_millis())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone)]
enum SlotState {
    Empty,
    Ready(Frame),
    Closed,
}

/// Returned to waiters when the slot has been shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("frame slot closed")]
pub struct SlotClosed;

/// Single-slot holder for the newest frame of one sub-stream.
///
/// Cloning is cheap and every clone refers to the same slot.
#[derive(Clone)]
pub struct FrameSlot {
    name: Arc<str>,
    tx: Arc<watch::Sender<SlotState>>,
    published: Arc<AtomicU64>,
}

impl FrameSlot {
    pub fn new(name: &str) -> Self {
        let (tx, _rx) = watch::channel(SlotState::Empty);

        Self {
            name: Arc::from(name),
            tx: Arc::new(tx),
            published: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replace the held frame and wake every waiter.
    ///
    /// Never blocks on consumers and works with zero subscribers.
    pub fn publish(&self, frame: Frame) {
        self.tx.send_replace(SlotState::Ready(frame));
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    /// Publish `data` stamped with the current time.
    pub fn publish_bytes(&self, data: impl Into<Bytes>) {
        self.publish(Frame::now(data));
    }

    /// Wake every waiter with `SlotClosed`.
    ///
    /// The slot becomes usable again on the next `publish`.
    pub fn close(&self) {
        debug!(slot = %self.name, waiters = self.waiters(), "Closing frame slot");
        self.tx.send_replace(SlotState::Closed);
    }

    /// The newest frame, if one is held.
    pub fn latest(&self) -> Option<Frame> {
        match &*self.tx.borrow() {
            SlotState::Ready(frame) => Some(frame.clone()),
            SlotState::Empty | SlotState::Closed => None,
        }
    }

    /// Register a waiter. Only frames published after this call are returned.
    pub fn subscribe(&self) -> FrameWaiter {
        FrameWaiter {
            rx: self.tx.subscribe(),
        }
    }

    /// Number of live waiters.
    pub fn waiters(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Total frames published since creation.
    pub fn frames_published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

/// A client's view of a `FrameSlot`.
pub struct FrameWaiter {
    rx: watch::Receiver<SlotState>,
}

impl FrameWaiter {
    /// Suspend until a frame newer than the last one returned is published.
    ///
    /// Returns `Err(SlotClosed)` when the slot is shut down while waiting.
    pub async fn next_frame(&mut self) -> Result<Frame, SlotClosed> {
        loop {
            // The sender lives as long as any FrameSlot clone does.
            self.rx.changed().await.map_err(|_| SlotClosed)?;

            let state = self.rx.borrow_and_update().clone();
            match state {
                SlotState::Ready(frame) => return Ok(frame),
                SlotState::Closed => return Err(SlotClosed),
                SlotState::Empty => continue,
            }
        }
    }
}
