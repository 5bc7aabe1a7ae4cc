//! Core data types for the ingestion pipeline.
//!
//! - [`Frame`] is a raw, timestamped payload as it came off the radio
//! - [`Record`] is a decoded telemetry sample, described column by column by [`Field`]
//! - [`PeerAddress`] identifies a radio endpoint
//! - [`ReceiverState`] tracks the receiver lifecycle
//! - [`UpdateRate`] controls how often display subscribers are woken
//!
//! ```rust
//! use groundlink::types::{Field, Frame};
//!
//! let frame = Frame::new(b"4421,00:12:34,7\r\n".to_vec());
//! assert_eq!(frame.text(), "4421,00:12:34,7");
//! assert_eq!(Field::ALL.len(), Field::COUNT);
//! ```

mod frame;
mod peer;
mod record;
mod state;
mod update_rate;

pub use frame::Frame;
pub use peer::PeerAddress;
pub use record::{Field, FieldKind, Record};
pub use state::ReceiverState;
pub use update_rate::UpdateRate;
