//! Configuration management

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub camera: PrimaryConfig,
    #[serde(default)]
    pub webcam: WebcamConfig,
    #[serde(default)]
    pub sink: SinkConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServerConfig {
    #[serde(default = "default_web_port")]
    pub web_port: u16,

    #[serde(default = "default_bind_ip")]
    pub bind_ip: String,

    /// Landing page served on `/`
    #[serde(default = "default_page")]
    pub page: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            web_port: default_web_port(),
            bind_ip: default_bind_ip(),
            page: default_page(),
        }
    }
}

/// Dual-stream primary camera
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PrimaryConfig {
    /// Used as the sink message key
    #[serde(default = "default_camera_name")]
    pub name: String,

    /// libcamera camera name; empty picks the first camera
    #[serde(default)]
    pub device: String,

    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    #[serde(default = "default_lowres_width")]
    pub lowres_width: u32,

    #[serde(default = "default_lowres_height")]
    pub lowres_height: u32,

    #[serde(default = "default_fps")]
    pub fps: u32,

    /// JPEG quality (1-100)
    #[serde(default = "default_quality")]
    pub quality: u32,

    #[serde(default = "default_settle_ms")]
    pub reboot_settle_ms: u64,
}

impl PrimaryConfig {
    pub fn lowres(&self) -> (u32, u32) {
        (self.lowres_width, self.lowres_height)
    }

    pub fn reboot_settle(&self) -> Duration {
        Duration::from_millis(self.reboot_settle_ms)
    }
}

impl Default for PrimaryConfig {
    fn default() -> Self {
        Self {
            name: default_camera_name(),
            device: String::new(),
            width: default_width(),
            height: default_height(),
            lowres_width: default_lowres_width(),
            lowres_height: default_lowres_height(),
            fps: default_fps(),
            quality: default_quality(),
            reboot_settle_ms: default_settle_ms(),
        }
    }
}

/// Secondary webcam, captured on demand
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct WebcamConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// V4L2 device node, or a `/base/...` libcamera name
    #[serde(default = "default_webcam_device")]
    pub device: String,

    #[serde(default = "default_webcam_width")]
    pub width: u32,

    #[serde(default = "default_webcam_height")]
    pub height: u32,

    #[serde(default = "default_capture_timeout_ms")]
    pub capture_timeout_ms: u64,
}

impl WebcamConfig {
    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }
}

impl Default for WebcamConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            device: default_webcam_device(),
            width: default_webcam_width(),
            height: default_webcam_height(),
            capture_timeout_ms: default_capture_timeout_ms(),
        }
    }
}

/// External frame bus
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SinkConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_sink_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_sink_topic")]
    pub topic: String,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_sink_endpoint(),
            topic: default_sink_topic(),
        }
    }
}

// Default value functions
fn default_web_port() -> u16 { 8080 }
fn default_bind_ip() -> String { "0.0.0.0".to_string() }
fn default_page() -> String { "web/index.html".to_string() }
fn default_camera_name() -> String { "camera1".to_string() }
fn default_width() -> u32 { 1920 }
fn default_height() -> u32 { 1080 }
fn default_lowres_width() -> u32 { 640 }
fn default_lowres_height() -> u32 { 360 }
fn default_fps() -> u32 { 30 }
fn default_quality() -> u32 { 85 }
fn default_settle_ms() -> u64 { 1000 }
fn default_true() -> bool { true }
fn default_webcam_device() -> String { "/dev/video1".to_string() }
fn default_webcam_width() -> u32 { 1080 }
fn default_webcam_height() -> u32 { 720 }
fn default_capture_timeout_ms() -> u64 { 2000 }
fn default_sink_endpoint() -> String { "tcp://*:5556".to_string() }
fn default_sink_topic() -> String { "frames".to_string() }

impl Config {
    /// Load and validate configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let cam = &self.camera;

        if cam.width == 0 || cam.height == 0 || cam.lowres_width == 0 || cam.lowres_height == 0 {
            return Err(ConfigError::Invalid("camera dimensions must be non-zero".into()));
        }
        if cam.lowres_width > cam.width || cam.lowres_height > cam.height {
            return Err(ConfigError::Invalid(format!(
                "low-res stream {}x{} larger than main stream {}x{}",
                cam.lowres_width, cam.lowres_height, cam.width, cam.height
            )));
        }
        if cam.fps == 0 {
            return Err(ConfigError::Invalid("camera fps must be non-zero".into()));
        }
        if !(1..=100).contains(&cam.quality) {
            return Err(ConfigError::Invalid(format!("JPEG quality {} out of range 1-100", cam.quality)));
        }
        if self.webcam.enabled && (self.webcam.width == 0 || self.webcam.height == 0) {
            return Err(ConfigError::Invalid("webcam dimensions must be non-zero".into()));
        }

        Ok(())
    }
}
