//! Error types for the telemetry ingestion pipeline.
//!
//! Each concern has its own error type:
//!
//! - [`LinkError`]: radio link lifecycle and transport faults
//! - [`DecodeError`]: a raw telemetry line that does not form a valid [`Record`](crate::Record)
//! - [`SinkError`]: a downstream display or log consumer failed to accept a record
//! - [`ConfigError`]: configuration could not be loaded or is invalid
//!
//! ## Recovery
//!
//! Link errors report whether retrying makes sense:
//!
//! ```rust
//! use groundlink::LinkError;
//!
//! let error = LinkError::open_failed("/dev/ttyUSB0", 9600, "device busy");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```
//!
//! Only [`LinkError::OpenFailed`] aborts a session. Everything else raised while
//! listening is logged and the pipeline keeps going.

use std::path::PathBuf;
use thiserror::Error;

use crate::types::Field;

/// Result type alias for radio link operations.
pub type Result<T, E = LinkError> = std::result::Result<T, E>;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by a [`RadioLink`](crate::link::RadioLink).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum LinkError {
    #[error("Failed to open {port} at {baud_rate} baud: {reason}")]
    OpenFailed {
        port: String,
        baud_rate: u32,
        reason: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("Radio link is not open")]
    NotOpen,

    #[error("Failed to send over radio link: {reason}")]
    SendFailed {
        reason: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("Failed to read from radio link: {reason}")]
    ReadFailed {
        reason: String,
        #[source]
        source: Option<BoxedSource>,
    },
}

impl LinkError {
    /// Returns whether the failed operation may succeed if attempted again.
    pub fn is_retryable(&self) -> bool {
        match self {
            LinkError::OpenFailed { .. } => true,
            LinkError::NotOpen => false,
            LinkError::SendFailed { .. } => true,
            LinkError::ReadFailed { .. } => true,
        }
    }

    /// Returns suggested operator actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            LinkError::OpenFailed { .. } => vec![
                "Check the radio is plugged in and the port name is correct",
                "Close other programs that may hold the serial port",
                "Verify the baud rate matches the radio configuration",
            ],
            LinkError::NotOpen => vec!["Open the link before sending or receiving"],
            LinkError::SendFailed { .. } => vec![
                "Check the radio is still connected",
                "Verify the peer address is correct",
                "Retry the handshake",
            ],
            LinkError::ReadFailed { .. } => vec![
                "Check the USB cable and adapter",
                "Verify the radio is configured for API mode",
            ],
        }
    }

    /// Helper constructor for open failures.
    pub fn open_failed(port: impl Into<String>, baud_rate: u32, reason: impl Into<String>) -> Self {
        LinkError::OpenFailed { port: port.into(), baud_rate, reason: reason.into(), source: None }
    }

    /// Helper constructor for open failures with an underlying cause.
    pub fn open_failed_with_source(
        port: impl Into<String>,
        baud_rate: u32,
        source: impl Into<BoxedSource>,
    ) -> Self {
        let source = source.into();
        LinkError::OpenFailed {
            port: port.into(),
            baud_rate,
            reason: source.to_string(),
            source: Some(source),
        }
    }

    /// Helper constructor for send failures.
    pub fn send_failed(reason: impl Into<String>) -> Self {
        LinkError::SendFailed { reason: reason.into(), source: None }
    }

    /// Helper constructor for send failures with an underlying cause.
    pub fn send_failed_with_source(source: impl Into<BoxedSource>) -> Self {
        let source = source.into();
        LinkError::SendFailed { reason: source.to_string(), source: Some(source) }
    }

    /// Helper constructor for read failures.
    pub fn read_failed(reason: impl Into<String>) -> Self {
        LinkError::ReadFailed { reason: reason.into(), source: None }
    }

    /// Helper constructor for read failures with an underlying cause.
    pub fn read_failed_with_source(source: impl Into<BoxedSource>) -> Self {
        let source = source.into();
        LinkError::ReadFailed { reason: source.to_string(), source: Some(source) }
    }
}

/// Why a raw telemetry line failed to decode.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeReason {
    #[error("expected {expected} fields, found {found}")]
    FieldCountMismatch { expected: usize, found: usize },

    #[error("field '{field}' is not a valid number: {value:?}")]
    NumericParseFailure { field: Field, value: String },

    #[error("field '{field}' is empty")]
    EmptyField { field: Field },
}

/// A raw telemetry line that could not be turned into a [`Record`](crate::Record).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Cannot decode telemetry line: {reason}")]
pub struct DecodeError {
    pub reason: DecodeReason,
    pub raw_text: String,
}

impl DecodeError {
    pub fn new(reason: DecodeReason, raw_text: impl Into<String>) -> Self {
        Self { reason, raw_text: raw_text.into() }
    }

    /// The field that failed, if the failure is tied to one.
    pub fn field(&self) -> Option<Field> {
        match &self.reason {
            DecodeReason::FieldCountMismatch { .. } => None,
            DecodeReason::NumericParseFailure { field, .. } => Some(*field),
            DecodeReason::EmptyField { field } => Some(*field),
        }
    }
}

/// Errors raised by a downstream [`RecordSink`](crate::sinks::RecordSink).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SinkError {
    #[error("Sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sink '{sink}' is closed")]
    Closed { sink: String },
}

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("Cannot read config file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config YAML: {0}")]
    Parse(#[from] serde_yaml_ng::Error),

    #[error("Invalid value for '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid { key, reason: reason.into() }
    }
}
