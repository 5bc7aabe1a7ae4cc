//! Ground station configuration.
//!
//! Loaded from YAML. Every key has a default, so an empty document is a valid
//! configuration (apart from the serial port, which is usually picked at runtime).
//!
//! ```yaml
//! link:
//!   port: /dev/ttyUSB0
//!   baud_rate: 9600
//!   peer_address: 0013A20041068422
//!   read_timeout_ms: 500
//!   handshake_attempts: 1
//!   api_mode: plain
//! queue:
//!   retention:
//!     policy: ring
//!     capacity: 4096
//! consumer:
//!   tick_ms: 50
//!   trend_points: 300
//! log:
//!   enabled: true
//!   directory: logs
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::ConfigError;
use crate::link::HANDSHAKE_MESSAGE;
use crate::link::xbee::ApiMode;
use crate::queue::Retention;
use crate::types::{PeerAddress, UpdateRate};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GroundStationConfig {
    pub link: LinkConfig,
    pub queue: QueueConfig,
    pub consumer: ConsumerConfig,
    pub log: LogConfig,
}

/// Radio link and session settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinkConfig {
    /// Serial port of the ground radio (`/dev/ttyUSB0`, `COM3`, ...)
    pub port: String,
    pub baud_rate: u32,
    /// Flight radio the handshake is addressed to
    pub peer_address: PeerAddress,
    pub handshake_message: String,
    /// Handshake sends per session; 1 sends once with no retry
    pub handshake_attempts: u32,
    /// Pause after each handshake send before listening or retrying
    pub handshake_settle_ms: u64,
    /// Bound on a single blocking receive; also bounds how long `stop()` waits
    pub read_timeout_ms: u64,
    pub api_mode: ApiMode,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 9600,
            peer_address: PeerAddress::REFERENCE_PAYLOAD,
            handshake_message: HANDSHAKE_MESSAGE.to_string(),
            handshake_attempts: 1,
            handshake_settle_ms: 200,
            read_timeout_ms: 500,
            api_mode: ApiMode::Plain,
        }
    }
}

impl LinkConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn handshake_settle(&self) -> Duration {
        Duration::from_millis(self.handshake_settle_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    pub retention: Retention,
}

/// Consumer loop and display settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConsumerConfig {
    pub tick_ms: u64,
    /// Points kept per trend plot
    pub trend_points: usize,
    pub display_rate: UpdateRate,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self { tick_ms: 50, trend_points: 300, display_rate: UpdateRate::Native }
    }
}

impl ConsumerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn tick_hz(&self) -> f64 {
        1000.0 / self.tick_ms.max(1) as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    pub enabled: bool,
    pub directory: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { enabled: true, directory: PathBuf::from(".") }
    }
}

impl GroundStationConfig {
    /// Parse and validate YAML.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self =
            if yaml.trim().is_empty() { Self::default() } else { serde_yaml_ng::from_str(yaml)? };
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!("Loading config from {}", path.display());
        let yaml = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml_ng::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let link = &self.link;
        if link.baud_rate == 0 {
            return Err(ConfigError::invalid("link.baud_rate", "must be positive"));
        }
        if link.read_timeout_ms == 0 {
            return Err(ConfigError::invalid("link.read_timeout_ms", "must be positive"));
        }
        if link.handshake_attempts == 0 {
            return Err(ConfigError::invalid("link.handshake_attempts", "must be at least 1"));
        }
        if link.handshake_message.is_empty() {
            return Err(ConfigError::invalid("link.handshake_message", "must not be empty"));
        }
        if let Retention::Ring { capacity: 0 } = self.queue.retention {
            return Err(ConfigError::invalid("queue.retention.capacity", "must be positive"));
        }
        if self.consumer.tick_ms == 0 {
            return Err(ConfigError::invalid("consumer.tick_ms", "must be positive"));
        }
        if self.consumer.trend_points == 0 {
            return Err(ConfigError::invalid("consumer.trend_points", "must be positive"));
        }
        Ok(())
    }
}
