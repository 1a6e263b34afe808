use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;

use bytes::Bytes;
use tracing::{debug, info, warn};

use super::{CameraError, CaptureBackend, PullSource, PushSource, StreamOutputs};
use crate::config::{PrimaryConfig, WebcamConfig};

/// GStreamer camera backend.
///
/// The primary camera is one `libcamerasrc` split by a `tee` into a full-size
/// and a scaled branch, each with its own `textoverlay` and `jpegenc`. A
/// buffer probe on the tee runs the per-frame callback and updates both
/// overlays. The webcam is pulled synchronously from an `appsink`.
pub struct GstBackend;

impl GstBackend {
    pub fn new() -> Result<Self, CameraError> {
        gst::init()?;
        Ok(Self)
    }
}

impl CaptureBackend for GstBackend {
    fn name(&self) -> &'static str {
        "gstreamer"
    }

    fn open_primary(
        &self,
        config: &PrimaryConfig,
        outputs: StreamOutputs,
    ) -> Result<Box<dyn PushSource>, CameraError> {
        let description = primary_pipeline(config);
        debug!(pipeline = %description, "Creating primary camera pipeline");

        let pipeline = launch(&description, "primary camera")?;

        let high_overlay = element(&pipeline, "high_overlay")?;
        let low_overlay = element(&pipeline, "low_overlay")?;
        let tee = element(&pipeline, "t")?;

        let probe_outputs = outputs.clone();
        let tee_sink = tee.static_pad("sink").ok_or_else(|| init_error("tee has no sink pad"))?;
        tee_sink.add_probe(gst::PadProbeType::BUFFER, move |_pad, _info| {
            let text = probe_outputs.on_frame().render();
            high_overlay.set_property("text", text.as_str());
            low_overlay.set_property("text", text.as_str());
            gst::PadProbeReturn::Ok
        });

        let high_outputs = outputs.clone();
        attach_sink(&pipeline, "high", move |data| high_outputs.publish_high(data))?;
        attach_sink(&pipeline, "low", move |data| outputs.publish_low(data))?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| init_error(&format!("failed to start pipeline: {e:?}")))?;

        info!("Primary camera pipeline playing");

        Ok(Box::new(GstPrimary { pipeline: Some(pipeline) }))
    }

    fn open_secondary(&self, config: &WebcamConfig) -> Result<Box<dyn PullSource>, CameraError> {
        let description = webcam_pipeline(config);
        debug!(pipeline = %description, "Creating webcam pipeline");

        let pipeline = launch(&description, "webcam")?;
        let appsink = element(&pipeline, "sink")?
            .dynamic_cast::<gst_app::AppSink>()
            .map_err(|_| CameraError::HardwareInit {
                camera: "webcam",
                reason: "element 'sink' is not an appsink".into(),
            })?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| CameraError::HardwareInit {
                camera: "webcam",
                reason: format!("failed to start pipeline: {e:?}"),
            })?;

        Ok(Box::new(GstWebcam {
            pipeline: Some(pipeline),
            appsink,
            timeout: gst::ClockTime::from_mseconds(config.capture_timeout_ms),
        }))
    }
}

fn init_error(reason: &str) -> CameraError {
    CameraError::HardwareInit {
        camera: "primary camera",
        reason: reason.to_string(),
    }
}

fn launch(description: &str, camera: &'static str) -> Result<gst::Pipeline, CameraError> {
    gst::parse::launch(description)?
        .dynamic_cast::<gst::Pipeline>()
        .map_err(|_| CameraError::HardwareInit {
            camera,
            reason: "parsed element is not a pipeline".into(),
        })
}

fn element(pipeline: &gst::Pipeline, name: &str) -> Result<gst::Element, CameraError> {
    pipeline
        .by_name(name)
        .ok_or_else(|| init_error(&format!("element '{name}' not found")))
}

fn attach_sink<F>(pipeline: &gst::Pipeline, name: &str, publish: F) -> Result<(), CameraError>
where
    F: Fn(Bytes) + Send + Sync + 'static,
{
    let sink = element(pipeline, name)?
        .dynamic_cast::<gst_app::AppSink>()
        .map_err(|_| init_error(&format!("element '{name}' is not an appsink")))?;

    sink.set_callbacks(
        gst_app::AppSinkCallbacks::builder()
            .new_sample(move |sink| {
                let sample = sink.pull_sample().map_err(|_| gst::FlowError::Error)?;
                let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
                let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;

                // The buffer belongs to the pipeline.
                publish(Bytes::copy_from_slice(map.as_slice()));

                Ok(gst::FlowSuccess::Ok)
            })
            .build(),
    );

    Ok(())
}

fn camera_name_prop(device: &str) -> String {
    if device.is_empty() {
        String::new()
    } else {
        format!("camera-name=\"{}\" ", device)
    }
}

fn primary_pipeline(config: &PrimaryConfig) -> String {
    const OVERLAY: &str = "valignment=top halignment=left xpad=10 ypad=10 font-desc=\"Sans 12\"";
    const SINK: &str = "max-buffers=2 drop=true sync=false";

    format!(
        "libcamerasrc {camera}! video/x-raw,format=NV12,width={w},height={h},framerate={fps}/1 ! tee name=t \
         t. ! queue max-size-buffers=2 leaky=downstream ! videoconvert ! textoverlay name=high_overlay {overlay} \
         ! jpegenc quality={q} ! appsink name=high {sink} \
         t. ! queue max-size-buffers=2 leaky=downstream ! videoscale ! video/x-raw,width={lw},height={lh} \
         ! videoconvert ! textoverlay name=low_overlay {overlay} ! jpegenc quality={q} ! appsink name=low {sink}",
        camera = camera_name_prop(&config.device),
        w = config.width,
        h = config.height,
        fps = config.fps,
        lw = config.lowres_width,
        lh = config.lowres_height,
        q = config.quality,
        overlay = OVERLAY,
        sink = SINK,
    )
}

fn webcam_pipeline(config: &WebcamConfig) -> String {
    const SINK: &str = "appsink name=sink max-buffers=1 drop=true sync=false";

    // Media entity paths go through libcamera; anything else is a V4L2 node
    // expected to deliver MJPEG directly.
    if config.device.starts_with("/base/") {
        format!(
            "libcamerasrc {camera}! video/x-raw,width={w},height={h} ! videoconvert ! jpegenc ! {sink}",
            camera = camera_name_prop(&config.device),
            w = config.width,
            h = config.height,
            sink = SINK,
        )
    } else {
        format!(
            "v4l2src device={dev} ! image/jpeg,width={w},height={h} ! {sink}",
            dev = config.device,
            w = config.width,
            h = config.height,
            sink = SINK,
        )
    }
}

struct GstPrimary {
    pipeline: Option<gst::Pipeline>,
}

impl PushSource for GstPrimary {
    fn stop(&mut self) -> Result<(), CameraError> {
        if let Some(pipeline) = self.pipeline.take() {
            pipeline
                .set_state(gst::State::Null)
                .map_err(|e| CameraError::Teardown {
                    camera: "primary camera",
                    reason: format!("{e:?}"),
                })?;
        }
        Ok(())
    }
}

impl Drop for GstPrimary {
    fn drop(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            let _ = pipeline.set_state(gst::State::Null);
        }
    }
}

struct GstWebcam {
    pipeline: Option<gst::Pipeline>,
    appsink: gst_app::AppSink,
    timeout: gst::ClockTime,
}

impl PullSource for GstWebcam {
    fn capture_into(&mut self, buf: &mut Vec<u8>) -> Result<(), CameraError> {
        let sample = self
            .appsink
            .try_pull_sample(self.timeout)
            .ok_or_else(|| CameraError::Capture("timed out waiting for webcam frame".into()))?;

        let buffer = sample
            .buffer()
            .ok_or_else(|| CameraError::Capture("sample had no buffer".into()))?;
        let map = buffer
            .map_readable()
            .map_err(|_| CameraError::Capture("unable to map buffer".into()))?;

        buf.extend_from_slice(map.as_slice());
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CameraError> {
        if let Some(pipeline) = self.pipeline.take() {
            pipeline
                .set_state(gst::State::Null)
                .map_err(|e| CameraError::Teardown {
                    camera: "webcam",
                    reason: format!("{e:?}"),
                })?;
        }
        Ok(())
    }
}

impl Drop for GstWebcam {
    fn drop(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            if let Err(e) = pipeline.set_state(gst::State::Null) {
                warn!("Failed to stop webcam pipeline on drop: {:?}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_pipeline_has_both_branches() {
        let desc = primary_pipeline(&PrimaryConfig::default());
        assert!(desc.starts_with("libcamerasrc ! video/x-raw,format=NV12,width=1920,height=1080,framerate=30/1"));
        assert!(desc.contains("video/x-raw,width=640,height=360"));
        assert!(desc.contains("appsink name=high"));
        assert!(desc.contains("appsink name=low"));
        assert_eq!(desc.matches("textoverlay").count(), 2);
    }

    #[test]
    fn test_webcam_pipeline_source_selection() {
        let mut config = WebcamConfig::default();
        assert!(webcam_pipeline(&config).starts_with("v4l2src device=/dev/video1 ! image/jpeg,width=1080,height=720"));

        config.device = "/base/axi/pcie@1000120000/rp1/i2c@80000/imx219@10".into();
        let desc = webcam_pipeline(&config);
        assert!(desc.starts_with("libcamerasrc camera-name=\"/base/"));
        assert!(desc.contains("jpegenc"));
    }
}
