//! Pipeline configuration using Figment
//!
//! Configuration is loaded from:
//! 1. A TOML file (base configuration, `config/keypipe.toml` by default)
//! 2. Environment variables prefixed with `KEYPIPE_`, nested keys split on `__`
//!
//! Every field has a default, so an empty or missing file yields a runnable
//! pipeline.
//!
//! # Example
//! ```no_run
//! use keypipe::config::PipelineConfig;
//!
//! let config = PipelineConfig::load()?;
//! config.validate()?;
//! println!("Flush window: {:?}", config.sink.flush_window);
//! # Ok::<(), keypipe::error::PipelineError>(())
//! ```

use crate::error::{AppResult, PipelineError};
use crate::ipc::MAX_CHANNELS;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/keypipe.toml";

/// Top-level pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Shared ring between the transform and sink stages
    pub ring: RingConfig,
    /// Capture stage settings
    pub capture: CaptureConfig,
    /// Cross-domain channel identifiers
    pub channels: ChannelConfig,
    /// Sink stage settings
    pub sink: SinkConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "keypipe".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// RingChannel configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    /// Capacity C in bytes
    pub capacity: usize,
    /// Optional file backing the shared region (e.g. under /dev/shm).
    /// An anonymous mapping is used when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backing_path: Option<PathBuf>,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            backing_path: None,
        }
    }
}

/// Where the capture stage reads characters from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputSource {
    /// Process standard input
    Stdin,
    /// The fixed `capture.script` text, replayed once
    Script,
}

/// Capture stage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Input collaborator to claim
    pub source: InputSource,
    /// Text replayed by the scripted source
    pub script: String,
    /// Delay between polling passes over the device
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Delay after forwarding each character
    #[serde(with = "humantime_serde")]
    pub char_delay: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: InputSource::Stdin,
            script: String::new(),
            poll_interval: Duration::from_millis(10),
            char_delay: Duration::from_millis(10),
        }
    }
}

/// Channel identifiers, local to the domains they connect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Capture -> Transform call channel
    pub transform_call: u8,
    /// Transform -> Sink notification channel
    pub sink_notify: u8,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            transform_call: 5,
            sink_notify: 6,
        }
    }
}

/// Sink stage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Flush window W between commit attempts
    #[serde(with = "humantime_serde")]
    pub flush_window: Duration,
    /// Pending-write buffer capacity P in bytes
    pub pending_capacity: usize,
    /// Sleep on idle cycles. Zero means a bare yield.
    #[serde(with = "humantime_serde")]
    pub idle_interval: Duration,
    /// Append-only log file
    pub log_path: PathBuf,
    /// Read back every committed range and compare
    pub verify_commits: bool,
    /// Attempt one last drain and commit when the pipeline is stopped
    pub flush_on_shutdown: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            flush_window: Duration::from_secs(30),
            pending_capacity: 4096,
            idle_interval: Duration::from_millis(10),
            log_path: PathBuf::from("transmitter_log.txt"),
            verify_commits: true,
            flush_on_shutdown: true,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from the default file and environment variables
    ///
    /// Environment variables override the file with prefix `KEYPIPE_`.
    /// Example: `KEYPIPE_SINK__FLUSH_WINDOW=5s`
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("KEYPIPE_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(PipelineError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(PipelineError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if self.ring.capacity == 0 {
            return Err(PipelineError::Configuration(
                "ring.capacity must be at least 1".to_string(),
            ));
        }

        if self.sink.pending_capacity == 0 {
            return Err(PipelineError::Configuration(
                "sink.pending_capacity must be at least 1".to_string(),
            ));
        }

        if self.sink.flush_window.is_zero() {
            return Err(PipelineError::Configuration(
                "sink.flush_window must be non-zero".to_string(),
            ));
        }

        for (name, id) in [
            ("transform_call", self.channels.transform_call),
            ("sink_notify", self.channels.sink_notify),
        ] {
            if usize::from(id) >= MAX_CHANNELS {
                return Err(PipelineError::Configuration(format!(
                    "channels.{name} = {id} is out of range (0..{MAX_CHANNELS})"
                )));
            }
        }

        if self.channels.transform_call == self.channels.sink_notify {
            return Err(PipelineError::Configuration(format!(
                "channels.transform_call and channels.sink_notify must differ (both {})",
                self.channels.transform_call
            )));
        }

        if self.capture.source == InputSource::Script && self.capture.script.is_empty() {
            tracing::warn!("capture.source is 'script' but capture.script is empty");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ring.capacity, 1000);
        assert_eq!(config.sink.pending_capacity, 4096);
        assert_eq!(config.sink.flush_window, Duration::from_secs(30));
        assert_eq!(config.channels.transform_call, 5);
        assert_eq!(config.channels.sink_notify, 6);
    }

    #[test]
    fn test_load_from_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[application]
log_level = "debug"

[ring]
capacity = 4

[capture]
source = "script"
script = "Hello"
poll_interval = "5ms"

[sink]
flush_window = "2s"
pending_capacity = 16
log_path = "/tmp/keys.log"
"#
        )
        .unwrap();

        let config = PipelineConfig::load_from(file.path()).unwrap();
        assert_eq!(config.application.log_level, "debug");
        assert_eq!(config.ring.capacity, 4);
        assert_eq!(config.capture.source, InputSource::Script);
        assert_eq!(config.capture.script, "Hello");
        assert_eq!(config.capture.poll_interval, Duration::from_millis(5));
        assert_eq!(config.capture.char_delay, Duration::from_millis(10));
        assert_eq!(config.sink.flush_window, Duration::from_secs(2));
        assert_eq!(config.sink.pending_capacity, 16);
        assert_eq!(config.sink.log_path, PathBuf::from("/tmp/keys.log"));
        assert!(config.sink.verify_commits);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.ring.capacity, PipelineConfig::default().ring.capacity);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = PipelineConfig::default();
        config.application.log_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_capacities_rejected() {
        let mut config = PipelineConfig::default();
        config.ring.capacity = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.sink.pending_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.sink.flush_window = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_channel_ids_checked() {
        let mut config = PipelineConfig::default();
        config.channels.sink_notify = config.channels.transform_call;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.channels.sink_notify = 64;
        assert!(config.validate().is_err());
    }
}
