//! Configuration management for cuesync
//!
//! All runtime tunables live in a single TOML file with built-in defaults,
//! so the service runs with no config file at all.
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments (--port, --config, --player-url)
//! 2. Environment variables (CUESYNC_PORT, CUESYNC_CONFIG, CUESYNC_PLAYER_URL)
//! 3. TOML configuration file
//! 4. Built-in defaults (code constants)

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level service configuration
///
/// Every field has a built-in default; a missing file or empty TOML table
/// yields a fully usable configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Sync cycle and decision thresholds
    pub timing: TimingConfig,

    /// Conservative latency assumptions used until measurements exist
    pub latency: LatencyConfig,

    /// Ambient audio capture backend
    pub capture: CaptureConfig,

    /// Matching engine backend
    pub matcher: MatcherConfig,

    /// Playback device backend
    pub player: PlayerConfig,

    /// Event bus capacity (broadcast channel depth)
    pub event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            timing: TimingConfig::default(),
            latency: LatencyConfig::default(),
            capture: CaptureConfig::default(),
            matcher: MatcherConfig::default(),
            player: PlayerConfig::default(),
            event_capacity: default_event_capacity(),
        }
    }
}

/// Sync cycle and decision thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Seek only when |target - player position| exceeds this (seconds)
    pub sync_threshold: f64,

    /// Pause between listening phases when auto-cycle is on (whole seconds)
    pub pause_duration_secs: u32,

    /// Re-enter Listening after the pause instead of stopping at one match
    pub auto_cycle: bool,

    /// Dynamic safety margin = max(floor, processing_delay * factor)
    pub safety_margin_factor: f64,

    /// Lower bound for the dynamic safety margin (seconds)
    pub safety_margin_floor: f64,

    /// End-to-end latency below this counts as good performance (seconds)
    pub health_threshold: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            sync_threshold: default_sync_threshold(),
            pause_duration_secs: default_pause_duration_secs(),
            auto_cycle: true,
            safety_margin_factor: default_safety_margin_factor(),
            safety_margin_floor: default_safety_margin_floor(),
            health_threshold: default_health_threshold(),
        }
    }
}

/// Latency assumptions and tracking bounds
///
/// Defaults are deliberately non-zero: an unmeasured pipeline still has
/// overhead, and assuming zero would bias every seek early.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyConfig {
    /// Matching engine processing delay until measured (seconds)
    pub default_processing_delay: f64,

    /// Capture input buffering delay until reported (seconds)
    pub default_input_buffer_delay: f64,

    /// Microphone/device input latency until reported (seconds)
    pub default_device_input_latency: f64,

    /// Playback device output latency (seconds)
    pub default_device_output_latency: f64,

    /// Player seek round trip until measured (seconds)
    pub default_player_seek_delay: f64,

    /// Rolling match-to-seek history depth (diagnostics only)
    pub history_capacity: usize,

    /// Samples above this are logged and discarded (seconds)
    pub max_sample: f64,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            default_processing_delay: 0.0008,
            default_input_buffer_delay: 0.025,
            default_device_input_latency: 0.012,
            default_device_output_latency: 0.015,
            default_player_seek_delay: 0.035,
            history_capacity: default_history_capacity(),
            max_sample: default_max_sample(),
        }
    }
}

/// Ambient audio capture backend selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// `microphone` (cpal default input) or `synthetic` (silence generator)
    pub backend: CaptureBackend,

    /// Requested capture sample rate (Hz)
    pub sample_rate: u32,

    /// Samples per frame handed to the matching engine
    pub frame_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            backend: CaptureBackend::Microphone,
            sample_rate: 44100,
            frame_size: 4096,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureBackend {
    Microphone,
    Synthetic,
}

/// Matching engine backend selection
///
/// The scripted backend reports a match at a configured soundtrack offset
/// after a configured number of frames, for development without a real
/// fingerprint service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Soundtrack offset the scripted backend reports (seconds)
    pub scripted_offset: f64,

    /// Frames the scripted backend consumes before reporting a match
    pub scripted_frames_until_match: u32,

    /// Title attached to scripted match reports
    pub scripted_title: Option<String>,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            scripted_offset: 120.0,
            scripted_frames_until_match: 10,
            scripted_title: None,
        }
    }
}

/// Playback device backend selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// `http` (remote player API) or `simulated` (in-process)
    pub backend: PlayerBackend,

    /// Base URL of the player HTTP API
    pub base_url: String,

    /// HTTP request timeout (seconds)
    pub request_timeout: f64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            backend: PlayerBackend::Http,
            base_url: "http://127.0.0.1:5721".to_string(),
            request_timeout: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerBackend {
    Http,
    Simulated,
}

fn default_event_capacity() -> usize {
    100
}

fn default_sync_threshold() -> f64 {
    0.080
}

fn default_pause_duration_secs() -> u32 {
    5
}

fn default_safety_margin_factor() -> f64 {
    0.1
}

fn default_safety_margin_floor() -> f64 {
    0.001
}

fn default_health_threshold() -> f64 {
    0.100
}

fn default_history_capacity() -> usize {
    20
}

fn default_max_sample() -> f64 {
    10.0
}

impl SyncConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        let config: SyncConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an optional path, falling back to built-in defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    /// Reject configurations that cannot drive a sane sync cycle
    pub fn validate(&self) -> Result<()> {
        if self.timing.sync_threshold <= 0.0 {
            return Err(Error::Config(
                "timing.sync_threshold must be positive".to_string(),
            ));
        }
        if self.timing.safety_margin_factor < 0.0 {
            return Err(Error::Config(
                "timing.safety_margin_factor must not be negative".to_string(),
            ));
        }
        if self.timing.safety_margin_floor < 0.0 {
            return Err(Error::Config(
                "timing.safety_margin_floor must not be negative".to_string(),
            ));
        }
        if self.timing.health_threshold < 0.0 {
            return Err(Error::Config(
                "timing.health_threshold must not be negative".to_string(),
            ));
        }
        // These all become Durations; a negative value would panic at startup
        let latency_defaults = [
            (
                "latency.default_processing_delay",
                self.latency.default_processing_delay,
            ),
            (
                "latency.default_input_buffer_delay",
                self.latency.default_input_buffer_delay,
            ),
            (
                "latency.default_device_input_latency",
                self.latency.default_device_input_latency,
            ),
            (
                "latency.default_device_output_latency",
                self.latency.default_device_output_latency,
            ),
            (
                "latency.default_player_seek_delay",
                self.latency.default_player_seek_delay,
            ),
        ];
        for (name, value) in latency_defaults {
            if value < 0.0 {
                return Err(Error::Config(format!("{} must not be negative", name)));
            }
        }
        if self.latency.history_capacity == 0 {
            return Err(Error::Config(
                "latency.history_capacity must be at least 1".to_string(),
            ));
        }
        if self.latency.max_sample <= 0.0 {
            return Err(Error::Config(
                "latency.max_sample must be positive".to_string(),
            ));
        }
        if self.capture.sample_rate == 0 {
            return Err(Error::Config(
                "capture.sample_rate must be positive".to_string(),
            ));
        }
        if self.capture.frame_size == 0 {
            return Err(Error::Config(
                "capture.frame_size must be positive".to_string(),
            ));
        }
        if self.player.request_timeout <= 0.0 {
            return Err(Error::Config(
                "player.request_timeout must be positive".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(Error::Config(
                "event_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Sync threshold as a Duration
    pub fn sync_threshold(&self) -> Duration {
        Duration::from_secs_f64(self.timing.sync_threshold)
    }

    /// Health threshold as a Duration
    pub fn health_threshold(&self) -> Duration {
        Duration::from_secs_f64(self.timing.health_threshold)
    }

    /// Latency sample sane bound as a Duration
    pub fn max_latency_sample(&self) -> Duration {
        Duration::from_secs_f64(self.latency.max_sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timing.sync_threshold, 0.080);
        assert_eq!(config.timing.pause_duration_secs, 5);
        assert!(config.timing.auto_cycle);
        assert_eq!(config.latency.history_capacity, 20);
    }

    #[test]
    fn empty_toml_yields_defaults() {
        let config: SyncConfig = toml::from_str("").unwrap();
        assert_eq!(config.timing.sync_threshold, 0.080);
        assert_eq!(config.capture.backend, CaptureBackend::Microphone);
        assert_eq!(config.player.backend, PlayerBackend::Http);
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let toml = r#"
            [timing]
            sync_threshold = 0.120
            auto_cycle = false

            [player]
            backend = "simulated"
        "#;
        let config: SyncConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.timing.sync_threshold, 0.120);
        assert!(!config.timing.auto_cycle);
        assert_eq!(config.timing.pause_duration_secs, 5);
        assert_eq!(config.player.backend, PlayerBackend::Simulated);
        assert_eq!(config.player.base_url, "http://127.0.0.1:5721");
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[capture]\nbackend = \"synthetic\"\nframe_size = 512").unwrap();
        let config = SyncConfig::load(file.path()).unwrap();
        assert_eq!(config.capture.backend, CaptureBackend::Synthetic);
        assert_eq!(config.capture.frame_size, 512);
    }

    #[test]
    fn load_missing_file_is_config_error() {
        let err = SyncConfig::load(Path::new("/nonexistent/cuesync.toml")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn validate_rejects_zero_threshold() {
        let mut config = SyncConfig::default();
        config.timing.sync_threshold = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_history() {
        let mut config = SyncConfig::default();
        config.latency.history_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_each_negative_latency_default() {
        let mutations: [fn(&mut LatencyConfig); 5] = [
            |l| l.default_processing_delay = -0.5,
            |l| l.default_input_buffer_delay = -0.5,
            |l| l.default_device_input_latency = -0.5,
            |l| l.default_device_output_latency = -0.5,
            |l| l.default_player_seek_delay = -0.5,
        ];
        for mutate in mutations {
            let mut config = SyncConfig::default();
            mutate(&mut config.latency);
            let err = config.validate().unwrap_err();
            assert!(matches!(err, Error::Config(_)));
        }
    }

    #[test]
    fn validate_rejects_negative_health_threshold() {
        let mut config = SyncConfig::default();
        config.timing.health_threshold = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_nonpositive_request_timeout() {
        let mut config = SyncConfig::default();
        config.player.request_timeout = 0.0;
        assert!(config.validate().is_err());
        config.player.request_timeout = -2.0;
        assert!(config.validate().is_err());
    }
}
