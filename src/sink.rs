//! Optional forwarding of high-resolution frames to an external bus

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, error};

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("sink connection error: {0}")]
    Connect(String),

    #[error("failed to deliver frame: {0}")]
    Send(String),
}

/// One message handed to a sink.
#[derive(Debug, Clone)]
pub struct FrameRecord {
    pub topic: String,
    pub key: String,
    pub payload: Bytes,
    pub timestamp_ms: i64,
}

/// Called once per record with the delivery outcome.
pub type DeliveryCallback = fn(&FrameRecord, Result<(), &SinkError>);

pub trait FrameSink: Send + Sync {
    fn send(&self, record: &FrameRecord, on_delivery: DeliveryCallback);
}

/// Default delivery callback: failures at error, successes at debug.
pub fn log_delivery(record: &FrameRecord, result: Result<(), &SinkError>) {
    match result {
        Ok(()) => debug!(
            topic = %record.topic,
            key = %record.key,
            bytes = record.payload.len(),
            timestamp = record.timestamp_ms,
            "Frame delivered"
        ),
        Err(e) => error!(
            topic = %record.topic,
            key = %record.key,
            timestamp = record.timestamp_ms,
            error = %e,
            "Failed to deliver frame"
        ),
    }
}

#[cfg(feature = "zmq-sink")]
pub use self::zmq_sink::ZmqFrameSink;

#[cfg(feature = "zmq-sink")]
mod zmq_sink {
    use super::*;
    use parking_lot::Mutex;
    use tracing::info;

    /// ZeroMQ PUB socket. Messages are `[topic, key, timestamp, payload]`.
    pub struct ZmqFrameSink {
        // zmq::Socket is Send but not Sync.
        socket: Mutex<zmq::Socket>,
        _context: zmq::Context,
    }

    impl ZmqFrameSink {
        pub fn bind(endpoint: &str) -> Result<Self, SinkError> {
            let context = zmq::Context::new();
            let socket = context
                .socket(zmq::PUB)
                .map_err(|e| SinkError::Connect(e.to_string()))?;
            socket
                .bind(endpoint)
                .map_err(|e| SinkError::Connect(format!("{endpoint}: {e}")))?;

            info!(endpoint, "Frame sink publisher bound");

            Ok(Self {
                socket: Mutex::new(socket),
                _context: context,
            })
        }
    }

    impl FrameSink for ZmqFrameSink {
        fn send(&self, record: &FrameRecord, on_delivery: DeliveryCallback) {
            let ts = record.timestamp_ms.to_string();
            let parts: [&[u8]; 4] = [
                record.topic.as_bytes(),
                record.key.as_bytes(),
                ts.as_bytes(),
                &record.payload[..],
            ];

            let result = self
                .socket
                .lock()
                .send_multipart(parts, zmq::DONTWAIT)
                .map_err(|e| SinkError::Send(e.to_string()));

            on_delivery(record, result.as_ref().map(|_| ()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static DELIVERED: AtomicUsize = AtomicUsize::new(0);

    fn count_delivery(_record: &FrameRecord, result: Result<(), &SinkError>) {
        if result.is_ok() {
            DELIVERED.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct Recording {
        records: Mutex<Vec<FrameRecord>>,
    }

    impl FrameSink for Recording {
        fn send(&self, record: &FrameRecord, on_delivery: DeliveryCallback) {
            self.records.lock().push(record.clone());
            on_delivery(record, Ok(()));
        }
    }

    #[test]
    fn test_sink_reports_delivery() {
        let sink = Recording::default();
        let record = FrameRecord {
            topic: "frames".into(),
            key: "camera1".into(),
            payload: Bytes::from_static(b"\xff\xd8"),
            timestamp_ms: 42,
        };

        sink.send(&record, count_delivery);
        sink.send(&record, log_delivery);

        assert_eq!(DELIVERED.load(Ordering::SeqCst), 1);
        assert_eq!(sink.records.lock().len(), 2);
    }
}
