//! Run configuration
//!
//! Loaded once at startup and passed by reference into each component.
//! Every field has a default so a partial (or missing) file is valid.

use crate::error::{RelayError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelayConfig {
    /// Verbose rate logging and the preview sink
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub producer: ProducerConfig,
    #[serde(default)]
    pub estimator: EstimatorConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// Apply `fps`/`width`/`height` to the decoder
    #[serde(default)]
    pub use_custom_settings: bool,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// Used when the stream reports a zero or unusable frame rate
    #[serde(default = "default_fallback_fps")]
    pub fallback_fps: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// Named pipe instead of UDP
    #[serde(default)]
    pub use_legacy_pipes: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_pipe_path")]
    pub pipe_path: PathBuf,
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProducerConfig {
    /// Poll interval while waiting for capture to start
    #[serde(default = "default_wait_poll_ms")]
    pub wait_poll_ms: u64,
    #[serde(default)]
    pub frame_sync: FrameSync,
}

/// How the producer picks frames out of the slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameSync {
    /// Whatever is current; a frame may be processed more than once
    #[default]
    Latest,
    /// Only frames newer than the last one processed
    Fresh,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EstimatorConfig {
    /// Program and arguments of the pose sidecar
    #[serde(default = "default_estimator_command")]
    pub command: Vec<String>,
    #[serde(default = "default_min_detection_confidence")]
    pub min_detection_confidence: f32,
    #[serde(default = "default_min_tracking_confidence")]
    pub min_tracking_confidence: f32,
    #[serde(default = "default_model_complexity")]
    pub model_complexity: u8,
}

fn default_fps() -> u32 { 60 }
fn default_width() -> u32 { 320 }
fn default_height() -> u32 { 240 }
fn default_fallback_fps() -> f64 { 30.0 }
fn default_host() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { 52733 }
fn default_pipe_path() -> PathBuf { PathBuf::from("/tmp/pose_relay.pipe") }
fn default_reconnect_interval_ms() -> u64 { 1000 }
fn default_wait_poll_ms() -> u64 { 500 }
fn default_estimator_command() -> Vec<String> {
    vec!["python3".to_string(), "pose_sidecar.py".to_string()]
}
fn default_min_detection_confidence() -> f32 { 0.8 }
fn default_min_tracking_confidence() -> f32 { 0.5 }
fn default_model_complexity() -> u8 { 1 }

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            use_custom_settings: false,
            fps: default_fps(),
            width: default_width(),
            height: default_height(),
            fallback_fps: default_fallback_fps(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            use_legacy_pipes: false,
            host: default_host(),
            port: default_port(),
            pipe_path: default_pipe_path(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
        }
    }
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            wait_poll_ms: default_wait_poll_ms(),
            frame_sync: FrameSync::default(),
        }
    }
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            command: default_estimator_command(),
            min_detection_confidence: default_min_detection_confidence(),
            min_tracking_confidence: default_min_tracking_confidence(),
            model_complexity: default_model_complexity(),
        }
    }
}

impl TransportConfig {
    /// `host:port` for the datagram strategy
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

impl ProducerConfig {
    pub fn wait_poll(&self) -> Duration {
        Duration::from_millis(self.wait_poll_ms)
    }
}

impl CaptureConfig {
    /// Overrides to hand to the source, if custom settings are on
    pub fn overrides(&self) -> Option<CaptureOverrides> {
        self.use_custom_settings.then_some(CaptureOverrides {
            fps: self.fps,
            width: self.width,
            height: self.height,
        })
    }
}

/// Decoder overrides applied when a source is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureOverrides {
    pub fps: u32,
    pub width: u32,
    pub height: u32,
}

impl RelayConfig {
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: RelayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| RelayError::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Defaults when the file does not exist; parse errors still fail
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!(path = %path.display(), "config not found, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn validate(&self) -> Result<()> {
        if self.transport.port == 0 {
            return Err(RelayError::InvalidConfig {
                field: "transport.port",
                reason: "must be non-zero".to_string(),
            });
        }
        if self.capture.use_custom_settings
            && (self.capture.fps == 0 || self.capture.width == 0 || self.capture.height == 0)
        {
            return Err(RelayError::InvalidConfig {
                field: "capture",
                reason: "fps, width and height must be positive".to_string(),
            });
        }
        if !(self.capture.fallback_fps.is_finite() && self.capture.fallback_fps > 0.0) {
            return Err(RelayError::InvalidConfig {
                field: "capture.fallback_fps",
                reason: format!("{} is not a positive rate", self.capture.fallback_fps),
            });
        }
        if self.estimator.command.is_empty() {
            return Err(RelayError::InvalidConfig {
                field: "estimator.command",
                reason: "must name a program".to_string(),
            });
        }
        Ok(())
    }
}
