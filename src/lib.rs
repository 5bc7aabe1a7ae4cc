//! Telemetry ingestion for a CanSat ground station.
//!
//! Groundlink receives telemetry lines from a flight radio, decodes them into
//! typed [`Record`]s, and hands them to display and logging sinks.
//!
//! # Pipeline
//!
//! - **Radio link**: [`RadioLink`] abstracts the ground radio; [`SerialXBeeLink`]
//!   drives an XBee in API mode over a serial port
//! - **Receiver**: [`ReceiverService`] opens the link, sends the `" start"`
//!   handshake and runs a blocking read task that appends frames to a [`FrameQueue`]
//! - **Consumer**: [`ConsumerLoop`] drains the queue on a short period, decodes with
//!   [`FrameDecoder`], and calls every [`RecordSink`] in arrival order
//! - **Sinks**: [`CsvLogSink`] writes a timestamped CSV log, [`DisplaySink`] keeps
//!   the latest record and rolling trends for a UI
//!
//! The read task is the only writer to the queue and the consumer loop the only
//! reader. Timeouts are normal (`Ok(None)`); read faults and bad lines are logged
//! and counted, and the pipeline keeps listening.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use groundlink::{GroundStation, GroundStationConfig, SerialXBeeLink, UpdateRate, default_sinks};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = GroundStationConfig::load("groundlink.yaml")?;
//!     config.link.port = "/dev/ttyUSB0".into();
//!
//!     let (sinks, display) = default_sinks(&config)?;
//!     let link = SerialXBeeLink::new(config.link.api_mode);
//!     let station = GroundStation::connect(config, link, sinks).await?;
//!
//!     let mut records = display.records(UpdateRate::Max(2));
//!     while let Some(record) = records.next().await {
//!         println!("packet {} at {:.1} m", record.packet_count, record.altitude);
//!     }
//!
//!     station.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod consumer;
pub mod decoder;
mod error;
pub mod link;
pub mod queue;
pub mod receiver;
pub mod sinks;
pub mod stream;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

pub use config::{ConsumerConfig, GroundStationConfig, LinkConfig, LogConfig, QueueConfig};
pub use consumer::{ConsumerHandle, ConsumerLoop, ConsumerStats, TickSummary};
pub use decoder::{FIELD_DELIMITER, FrameDecoder};
pub use error::*;
pub use link::{HANDSHAKE_MESSAGE, RadioLink};
#[cfg(feature = "serial")]
pub use link::{SerialXBeeLink, list_ports};
pub use queue::{Cursor, FrameQueue, FrameReader, FrameWriter, Retention};
pub use receiver::{ReceiverService, ReceiverStats};
pub use sinks::{
    CsvLogSink, DisplayHandle, DisplaySink, RecordSink, TrendSeries, TrendSnapshot, default_sinks,
};
pub use types::*;

use tokio_util::sync::CancellationToken;
use tracing::info;

/// A running pipeline: receiver plus a spawned consumer loop sharing one queue.
///
/// # Example
///
/// ```rust,no_run
/// use groundlink::{GroundStation, GroundStationConfig, SerialXBeeLink};
///
/// # #[tokio::main]
/// # async fn main() -> groundlink::Result<()> {
/// let config = GroundStationConfig::default();
/// let link = SerialXBeeLink::new(config.link.api_mode);
/// let station = GroundStation::connect(config, link, Vec::new()).await?;
/// let stats = station.shutdown().await;
/// println!("{} records", stats.records_dispatched);
/// # Ok(())
/// # }
/// ```
pub struct GroundStation<L: RadioLink> {
    config: GroundStationConfig,
    receiver: ReceiverService<L>,
    consumer: ConsumerHandle,
}

impl<L: RadioLink> GroundStation<L> {
    /// Start listening on `link` and dispatching to `sinks`.
    ///
    /// `config` is expected to be validated (as [`GroundStationConfig::load`]
    /// does). Fails only when the link cannot be opened.
    pub async fn connect(
        config: GroundStationConfig,
        link: L,
        sinks: Vec<Box<dyn RecordSink>>,
    ) -> Result<Self> {
        let (writer, reader) = FrameQueue::channel(config.queue.retention);

        let mut receiver = ReceiverService::new(link, config.link.clone(), writer);
        receiver.start().await?;

        let mut consumer = ConsumerLoop::new(reader);
        for sink in sinks {
            consumer.add_sink(sink);
        }
        let consumer = consumer.spawn(config.consumer.tick(), CancellationToken::new());

        info!("Ground station listening on {}", config.link.port);
        Ok(Self { config, receiver, consumer })
    }

    pub fn config(&self) -> &GroundStationConfig {
        &self.config
    }

    pub fn state(&self) -> ReceiverState {
        self.receiver.state()
    }

    pub fn receiver(&self) -> &ReceiverService<L> {
        &self.receiver
    }

    pub fn receiver_stats(&self) -> ReceiverStats {
        self.receiver.stats()
    }

    pub fn consumer_stats(&self) -> ConsumerStats {
        self.consumer.stats()
    }

    /// Close and reopen the link with a fresh handshake.
    ///
    /// The consumer keeps running. Frames from the old session are dispatched
    /// first; then sequence tracking and display trends start over.
    pub async fn restart(&mut self) -> Result<()> {
        self.receiver.stop().await;
        self.consumer.begin_session().await;
        self.receiver.start().await
    }

    /// Stop the receiver, let the consumer drain what is left, close the sinks,
    /// and return the final consumer statistics.
    pub async fn shutdown(mut self) -> ConsumerStats {
        self.receiver.stop().await;
        match self.consumer.stop().await {
            Some(mut consumer) => {
                consumer.close_sinks().await;
                let stats = consumer.stats();
                info!(
                    "Ground station shut down: {} records, {} decode errors",
                    stats.records_dispatched, stats.decode_errors
                );
                stats
            }
            None => ConsumerStats::default(),
        }
    }
}
