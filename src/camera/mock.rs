//! Counting backend for unit tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use super::{CameraError, CaptureBackend, PullSource, PushSource, StreamOutputs};
use crate::config::{PrimaryConfig, WebcamConfig};

#[derive(Default)]
struct Counters {
    primary_opens: AtomicUsize,
    primary_stops: AtomicUsize,
    secondary_opens: AtomicUsize,
    secondary_stops: AtomicUsize,
    captures: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[derive(Default)]
pub(crate) struct MockBackend {
    counters: Arc<Counters>,
    outputs: Mutex<Option<StreamOutputs>>,
    fail_primary_open: AtomicBool,
    fail_secondary_open: AtomicBool,
    fail_primary_stop: bool,
    capture_delay: Duration,
}

impl MockBackend {
    pub fn with_capture_delay(mut self, delay: Duration) -> Self {
        self.capture_delay = delay;
        self
    }

    pub fn failing_primary_stop(mut self) -> Self {
        self.fail_primary_stop = true;
        self
    }

    pub fn fail_primary_open(&self, fail: bool) {
        self.fail_primary_open.store(fail, Ordering::SeqCst);
    }

    pub fn fail_secondary_open(&self, fail: bool) {
        self.fail_secondary_open.store(fail, Ordering::SeqCst);
    }

    /// Drive one frame through the per-frame callback into both outputs.
    pub fn push_frame(&self, high: &'static [u8], low: &'static [u8]) {
        let outputs = self.outputs.lock();
        let outputs = outputs.as_ref().expect("primary camera not open");
        outputs.on_frame();
        outputs.publish_high(Bytes::from_static(high));
        outputs.publish_low(Bytes::from_static(low));
    }

    pub fn primary_opens(&self) -> usize {
        self.counters.primary_opens.load(Ordering::SeqCst)
    }

    pub fn primary_stops(&self) -> usize {
        self.counters.primary_stops.load(Ordering::SeqCst)
    }

    pub fn secondary_opens(&self) -> usize {
        self.counters.secondary_opens.load(Ordering::SeqCst)
    }

    pub fn secondary_stops(&self) -> usize {
        self.counters.secondary_stops.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_captures(&self) -> usize {
        self.counters.max_in_flight.load(Ordering::SeqCst)
    }
}

impl CaptureBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn open_primary(
        &self,
        _config: &PrimaryConfig,
        outputs: StreamOutputs,
    ) -> Result<Box<dyn PushSource>, CameraError> {
        if self.fail_primary_open.load(Ordering::SeqCst) {
            return Err(CameraError::HardwareInit {
                camera: "primary camera",
                reason: "no camera detected".into(),
            });
        }
        self.counters.primary_opens.fetch_add(1, Ordering::SeqCst);
        *self.outputs.lock() = Some(outputs);

        Ok(Box::new(MockPush {
            counters: Arc::clone(&self.counters),
            fail_stop: self.fail_primary_stop,
        }))
    }

    fn open_secondary(&self, _config: &WebcamConfig) -> Result<Box<dyn PullSource>, CameraError> {
        if self.fail_secondary_open.load(Ordering::SeqCst) {
            return Err(CameraError::HardwareInit {
                camera: "webcam",
                reason: "device busy".into(),
            });
        }
        self.counters.secondary_opens.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MockPull {
            counters: Arc::clone(&self.counters),
            delay: self.capture_delay,
        }))
    }
}

struct MockPush {
    counters: Arc<Counters>,
    fail_stop: bool,
}

impl PushSource for MockPush {
    fn stop(&mut self) -> Result<(), CameraError> {
        self.counters.primary_stops.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop {
            return Err(CameraError::Teardown {
                camera: "primary camera",
                reason: "encoder hung".into(),
            });
        }
        Ok(())
    }
}

struct MockPull {
    counters: Arc<Counters>,
    delay: Duration,
}

impl PullSource for MockPull {
    fn capture_into(&mut self, buf: &mut Vec<u8>) -> Result<(), CameraError> {
        let in_flight = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        let n = self.counters.captures.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        buf.extend_from_slice(b"\xff\xd8");
        buf.extend_from_slice(format!("webcam-{n}").as_bytes());
        buf.extend_from_slice(b"\xff\xd9");

        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CameraError> {
        self.counters.secondary_stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
