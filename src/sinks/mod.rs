//! Downstream consumers of decoded records.
//!
//! The consumer loop hands every decoded [`Record`] to each configured
//! [`RecordSink`] in arrival order, and reports lines that failed to decode.
//! Two sinks ship with the crate:
//!
//! - [`CsvLogSink`] writes one formatted row per record
//! - [`DisplaySink`] keeps the latest record and rolling trend buffers for a UI

use std::sync::Arc;

use crate::config::GroundStationConfig;
use crate::error::{DecodeError, SinkError};
use crate::types::Record;

mod csv_log;
mod display;

pub use csv_log::CsvLogSink;
pub use display::{DisplayHandle, DisplaySink, TrendBuffer, TrendSeries, TrendSnapshot};

/// Trait for record consumers
///
/// Calls are made from the consumer task one at a time. Implementations must
/// not block indefinitely; a returned error is logged and counted, and the
/// remaining sinks still see the record.
#[async_trait::async_trait]
pub trait RecordSink: Send + 'static {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn on_record(&mut self, record: Arc<Record>) -> Result<(), SinkError>;

    async fn on_decode_error(&mut self, _error: &DecodeError) -> Result<(), SinkError> {
        Ok(())
    }

    /// A new receiver session is starting; drop per-session state.
    async fn on_session_start(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Flush and release resources at shutdown.
    async fn close(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Sinks described by `config`: a CSV log in `log.directory` when logging is
/// enabled, then a display sink whose handle is returned. The handle's
/// [`updates`](DisplayHandle::updates) stream runs at `consumer.display_rate`.
pub fn default_sinks(
    config: &GroundStationConfig,
) -> Result<(Vec<Box<dyn RecordSink>>, DisplayHandle), SinkError> {
    let mut sinks: Vec<Box<dyn RecordSink>> = Vec::new();
    if config.log.enabled {
        sinks.push(Box::new(CsvLogSink::create_in(&config.log.directory)?));
    }
    let (display, handle) = DisplaySink::new(config.consumer.trend_points, config.consumer.tick_hz());
    let handle = handle.with_rate(config.consumer.display_rate);
    sinks.push(Box::new(display));
    Ok((sinks, handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UpdateRate;

    #[test]
    fn default_sinks_follow_log_setting() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = GroundStationConfig::default();
        config.log.directory = dir.path().to_path_buf();

        let (sinks, _display) = default_sinks(&config).unwrap();
        let names: Vec<&str> = sinks.iter().map(|s| s.name()).collect();
        assert_eq!(names, ["csv-log", "display"]);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        config.log.enabled = false;
        let (sinks, _display) = default_sinks(&config).unwrap();
        assert_eq!(sinks.len(), 1);
    }

    #[test]
    fn display_handle_uses_configured_rate() {
        let mut config = GroundStationConfig::default();
        config.log.enabled = false;
        let (_sinks, display) = default_sinks(&config).unwrap();
        assert_eq!(display.rate(), UpdateRate::Native);

        config.consumer.display_rate = UpdateRate::Max(2);
        let (_sinks, display) = default_sinks(&config).unwrap();
        assert_eq!(display.rate(), UpdateRate::Max(2));
    }
}
