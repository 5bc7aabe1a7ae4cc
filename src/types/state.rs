//! Receiver lifecycle states

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a [`ReceiverService`](crate::receiver::ReceiverService).
///
/// ```text
/// Idle -> Connecting -> HandshakeSent -> Listening -> Stopping -> Closed
///           |                                                     |
///           +--(open failed)--> Idle            Closed --start()--+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiverState {
    #[default]
    Idle,
    Connecting,
    HandshakeSent,
    Listening,
    Stopping,
    Closed,
}

impl fmt::Display for ReceiverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReceiverState::Idle => "idle",
            ReceiverState::Connecting => "connecting",
            ReceiverState::HandshakeSent => "handshake-sent",
            ReceiverState::Listening => "listening",
            ReceiverState::Stopping => "stopping",
            ReceiverState::Closed => "closed",
        };
        f.write_str(name)
    }
}
