//! Test-pattern backend
//!
//! Generates real JPEG frames without camera hardware. The primary source
//! runs its own producer thread at the configured frame rate; the webcam
//! renders one frame per capture. The overlay text is carried in a JPEG
//! comment segment instead of being drawn.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use tracing::{debug, info, warn};

use super::{CameraError, CaptureBackend, PullSource, PushSource, StreamOutputs};
use crate::config::{PrimaryConfig, WebcamConfig};

const WEBCAM_FPS: u32 = 30;
const WEBCAM_QUALITY: u8 = 80;

#[derive(Debug, Default)]
pub struct SyntheticBackend;

impl SyntheticBackend {
    pub fn new() -> Self {
        Self
    }
}

impl CaptureBackend for SyntheticBackend {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn open_primary(
        &self,
        config: &PrimaryConfig,
        outputs: StreamOutputs,
    ) -> Result<Box<dyn PushSource>, CameraError> {
        let running = Arc::new(AtomicBool::new(true));
        let producer = Producer {
            main: (config.width, config.height),
            lores: config.lowres(),
            quality: config.quality.clamp(1, 100) as u8,
            interval: Duration::from_secs(1) / config.fps.max(1),
            outputs,
            running: Arc::clone(&running),
        };

        let handle = thread::Builder::new()
            .name("synthetic-primary".into())
            .spawn(move || producer.run())
            .map_err(|e| CameraError::HardwareInit {
                camera: "primary camera",
                reason: e.to_string(),
            })?;

        info!("Synthetic primary camera started");

        Ok(Box::new(SyntheticPrimary {
            running,
            handle: Some(handle),
        }))
    }

    fn open_secondary(&self, config: &WebcamConfig) -> Result<Box<dyn PullSource>, CameraError> {
        info!(device = %config.device, "Synthetic webcam opened");

        Ok(Box::new(SyntheticWebcam {
            size: (config.width, config.height),
            interval: Duration::from_secs(1) / WEBCAM_FPS,
            frame: 0,
            last: None,
        }))
    }
}

struct Producer {
    main: (u32, u32),
    lores: (u32, u32),
    quality: u8,
    interval: Duration,
    outputs: StreamOutputs,
    running: Arc<AtomicBool>,
}

impl Producer {
    fn run(self) {
        let mut frame: u64 = 0;
        let mut next = Instant::now();

        while self.running.load(Ordering::Relaxed) {
            let overlay = self.outputs.on_frame().render();

            match render(self.main, frame, self.quality, &overlay) {
                Ok(jpeg) => self.outputs.publish_high(Bytes::from(jpeg)),
                Err(e) => warn!(error = %e, "Failed to encode high-res test frame"),
            }
            match render(self.lores, frame, self.quality, &overlay) {
                Ok(jpeg) => self.outputs.publish_low(Bytes::from(jpeg)),
                Err(e) => warn!(error = %e, "Failed to encode low-res test frame"),
            }

            frame += 1;
            next += self.interval;
            let now = Instant::now();
            if next > now {
                thread::sleep(next - now);
            } else {
                next = now;
            }
        }

        debug!(frames = frame, "Synthetic producer exiting");
    }
}

struct SyntheticPrimary {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PushSource for SyntheticPrimary {
    fn stop(&mut self) -> Result<(), CameraError> {
        self.running.store(false, Ordering::Relaxed);

        if let Some(handle) = self.handle.take() {
            handle.join().map_err(|_| CameraError::Teardown {
                camera: "primary camera",
                reason: "producer thread panicked".into(),
            })?;
        }

        Ok(())
    }
}

impl Drop for SyntheticPrimary {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

struct SyntheticWebcam {
    size: (u32, u32),
    interval: Duration,
    frame: u64,
    last: Option<Instant>,
}

impl PullSource for SyntheticWebcam {
    fn capture_into(&mut self, buf: &mut Vec<u8>) -> Result<(), CameraError> {
        // Pace like a real sensor.
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                thread::sleep(self.interval - elapsed);
            }
        }
        self.last = Some(Instant::now());

        let label = format!("webcam frame {}", self.frame);
        let jpeg = render(self.size, self.frame, WEBCAM_QUALITY, &label)?;
        self.frame += 1;

        buf.extend_from_slice(&jpeg);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CameraError> {
        info!(frames = self.frame, "Synthetic webcam closed");
        Ok(())
    }
}

/// Moving-bar test pattern encoded as JPEG, with `comment` embedded.
fn render(size: (u32, u32), frame: u64, quality: u8, comment: &str) -> Result<Vec<u8>, CameraError> {
    let (w, h) = size;
    let bar = (frame * 8 % w.max(1) as u64) as u32;

    let img = RgbImage::from_fn(w, h, |x, y| {
        if x.abs_diff(bar) < 8 {
            Rgb([255, 255, 255])
        } else {
            Rgb([(x * 255 / w) as u8, (y * 255 / h) as u8, (frame % 256) as u8])
        }
    });

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality)
        .encode_image(&img)
        .map_err(|e| CameraError::Capture(e.to_string()))?;

    Ok(with_comment(jpeg, comment))
}

/// Insert a COM segment right after SOI.
fn with_comment(jpeg: Vec<u8>, comment: &str) -> Vec<u8> {
    let text = &comment.as_bytes()[..comment.len().min(u16::MAX as usize - 2)];
    if jpeg.len() < 2 || jpeg[..2] != [0xFF, 0xD8] {
        return jpeg;
    }

    let seg_len = (text.len() + 2) as u16;
    let mut out = Vec::with_capacity(jpeg.len() + text.len() + 4);
    out.extend_from_slice(&jpeg[..2]);
    out.extend_from_slice(&[0xFF, 0xFE]);
    out.extend_from_slice(&seg_len.to_be_bytes());
    out.extend_from_slice(text);
    out.extend_from_slice(&jpeg[2..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::FrameSlot;

    #[test]
    fn test_render_produces_jpeg_with_comment() {
        let jpeg = render((64, 48), 3, 80, "2024-01-01 00:00:00\nFPS: 30.00").unwrap();

        assert_eq!(&jpeg[..4], &[0xFF, 0xD8, 0xFF, 0xFE]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);

        let len = u16::from_be_bytes([jpeg[4], jpeg[5]]) as usize;
        assert_eq!(&jpeg[6..4 + len], b"2024-01-01 00:00:00\nFPS: 30.00");

        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
    }

    #[test]
    fn test_with_comment_leaves_non_jpeg_alone() {
        assert_eq!(with_comment(b"abc".to_vec(), "x"), b"abc".to_vec());
    }

    #[tokio::test]
    async fn test_primary_publishes_until_stopped() {
        let high = FrameSlot::new("high");
        let low = FrameSlot::new("low");
        let outputs = StreamOutputs::new(high.clone(), low.clone());
        let mut config = PrimaryConfig::default();
        config.width = 64;
        config.height = 48;
        config.lowres_width = 32;
        config.lowres_height = 24;
        config.fps = 100;

        let mut waiter = high.subscribe();
        let mut source = SyntheticBackend::new().open_primary(&config, outputs).unwrap();

        let frame = waiter.next_frame().await.unwrap();
        assert_eq!(&frame.data[..2], &[0xFF, 0xD8]);

        source.stop().unwrap();
        let published = high.frames_published();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(high.frames_published(), published);
        assert!(low.frames_published() > 0);
    }

    #[test]
    fn test_webcam_captures_distinct_frames() {
        let mut config = WebcamConfig::default();
        config.width = 32;
        config.height = 24;
        let mut cam = SyntheticBackend::new().open_secondary(&config).unwrap();

        let mut a = Vec::new();
        let mut b = Vec::new();
        cam.capture_into(&mut a).unwrap();
        cam.capture_into(&mut b).unwrap();

        assert_ne!(a, b);
        assert_eq!(&a[..2], &[0xFF, 0xD8]);
    }
}
