//! Client configuration.
//!
//! One [`Config`] value is built at startup and handed to the constructors that
//! need it. Sources, later ones winning:
//! - built-in defaults
//! - a TOML file named by `REALTIME_VOICE_CONFIG`
//! - environment overrides (`OPENAI_API_KEY`, `OPENAI_REALTIME_MODEL`,
//!   `OPENAI_REALTIME_VOICE`, `REALTIME_VOICE_PLAYER`)

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::audio::opus::is_valid_frame_duration;
use crate::error::{Error, Result};

pub const CONFIG_PATH_ENV: &str = "REALTIME_VOICE_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub realtime: RealtimeConfig,
    pub audio: AudioConfig,
    pub buffer: BufferConfig,
    pub diagnostics: DiagnosticsConfig,
}

/// Remote API and session negotiation settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    pub voice: String,
    pub ice_servers: Vec<String>,
    /// Label of the data channel carrying session events.
    pub control_channel_label: String,
    pub ice_gathering_timeout_ms: u64,
    pub control_open_timeout_ms: u64,
    /// A cached credential is treated as expired this long before its
    /// advertised expiry.
    pub credential_refresh_margin_secs: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: "https://api.openai.com".to_string(),
            model: "gpt-4o-realtime-preview-2024-12-17".to_string(),
            voice: "verse".to_string(),
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            control_channel_label: "oai-events".to_string(),
            ice_gathering_timeout_ms: 5_000,
            control_open_timeout_ms: 10_000,
            credential_refresh_margin_secs: 10,
        }
    }
}

// Hand-written so the API key never ends up in logs.
impl std::fmt::Debug for RealtimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeConfig")
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("ice_servers", &self.ice_servers)
            .field("control_channel_label", &self.control_channel_label)
            .finish_non_exhaustive()
    }
}

impl RealtimeConfig {
    pub fn ice_gathering_timeout(&self) -> Duration {
        Duration::from_millis(self.ice_gathering_timeout_ms)
    }

    pub fn control_open_timeout(&self) -> Duration {
        Duration::from_millis(self.control_open_timeout_ms)
    }

    pub fn credential_refresh_margin(&self) -> Duration {
        Duration::from_secs(self.credential_refresh_margin_secs)
    }
}

/// PCM format shared by capture, codec and playback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_duration_ms: f64,
    /// Player variant handling the remote track: `speaker` or `stdout`.
    pub player: String,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    /// PCM frames buffered between the capture callback and the encode loop.
    pub capture_queue_frames: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            frame_duration_ms: 20.0,
            player: "speaker".to_string(),
            input_device: None,
            output_device: None,
            capture_queue_frames: 16,
        }
    }
}

impl AudioConfig {
    /// Samples per channel in one frame.
    pub fn frame_samples(&self) -> usize {
        (self.sample_rate as f64 * self.frame_duration_ms / 1000.0) as usize
    }

    /// Interleaved samples in one frame.
    pub fn frame_len(&self) -> usize {
        self.frame_samples() * self.channels as usize
    }

    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs_f64(self.frame_duration_ms / 1000.0)
    }

    /// Bytes per interleaved i16 sample frame.
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * std::mem::size_of::<i16>()
    }

    /// Byte length of `ms` milliseconds of i16 PCM, rounded down to whole
    /// sample frames.
    pub fn bytes_for_ms(&self, ms: u32) -> usize {
        let frames = self.sample_rate as u64 * ms as u64 / 1000;
        frames as usize * self.bytes_per_frame()
    }
}

/// Jitter buffer sizing, expressed as durations of playback audio.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub capacity_ms: u32,
    pub low_water_ms: u32,
    pub high_water_ms: u32,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity_ms: 500,
            low_water_ms: 50,
            high_water_ms: 400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub report_interval_ms: u64,
    /// Loop iterations between per-stage timing reports.
    pub timing_window: u32,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            report_interval_ms: 1_000,
            timing_window: 100,
        }
    }
}

impl DiagnosticsConfig {
    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }
}

impl Config {
    /// Loads defaults, the optional TOML file, then environment overrides,
    /// and validates the result.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(key) = var("OPENAI_API_KEY") {
            self.realtime.api_key = key;
        }
        if let Some(model) = var("OPENAI_REALTIME_MODEL") {
            self.realtime.model = model;
        }
        if let Some(voice) = var("OPENAI_REALTIME_VOICE") {
            self.realtime.voice = voice;
        }
        if let Some(player) = var("REALTIME_VOICE_PLAYER") {
            self.audio.player = player;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.realtime.api_key.trim().is_empty() {
            return Err(Error::InvalidConfig("OPENAI_API_KEY is not set".into()));
        }
        if !matches!(self.audio.channels, 1 | 2) {
            return Err(Error::InvalidConfig(format!(
                "channels must be 1 or 2, got {}",
                self.audio.channels
            )));
        }
        if !is_valid_frame_duration(self.audio.frame_duration_ms) {
            return Err(Error::InvalidConfig(format!(
                "frame duration {} ms is not a valid Opus frame size",
                self.audio.frame_duration_ms
            )));
        }
        if self.audio.capture_queue_frames == 0 {
            return Err(Error::InvalidConfig("capture_queue_frames must be > 0".into()));
        }
        let b = &self.buffer;
        if !(b.low_water_ms < b.high_water_ms && b.high_water_ms < b.capacity_ms) {
            return Err(Error::InvalidConfig(format!(
                "buffer watermarks must satisfy low < high < capacity, got {} / {} / {} ms",
                b.low_water_ms, b.high_water_ms, b.capacity_ms
            )));
        }
        Ok(())
    }
}
