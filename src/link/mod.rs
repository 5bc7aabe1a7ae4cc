//! Radio link abstraction.
//!
//! A [`RadioLink`] owns the physical connection to the ground radio. All calls
//! are blocking; the receiver runs [`RadioLink::receive`] on a blocking thread and
//! relies on its timeout to notice stop requests.

use std::time::Duration;

use crate::Result;
use crate::types::{Frame, PeerAddress};

pub mod xbee;

#[cfg(feature = "serial")]
mod serial;

#[cfg(feature = "serial")]
pub use serial::{SerialXBeeLink, list_ports};

/// Payload asking the flight radio to begin transmitting telemetry.
pub const HANDSHAKE_MESSAGE: &str = " start";

/// Trait for point-to-point radio connections
///
/// Implementations must keep `open` and `send_handshake` bounded in time, and
/// must return from `receive` no later than `timeout` after it was called.
pub trait RadioLink: Send + 'static {
    /// Acquire the interface.
    ///
    /// Fails with [`LinkError::OpenFailed`](crate::LinkError::OpenFailed) when the
    /// device is busy, absent, or the baud rate is unusable.
    fn open(&mut self, port: &str, baud_rate: u32) -> Result<()>;

    /// Send the handshake payload to `peer`.
    ///
    /// Success means the bytes left the ground radio, not that the peer got them.
    fn send_handshake(&mut self, peer: PeerAddress, message: &str) -> Result<()>;

    /// Wait up to `timeout` for the next frame.
    ///
    /// Returns:
    /// - `Ok(Some(frame))` - data arrived
    /// - `Ok(None)` - nothing arrived before the timeout (the normal idle case)
    /// - `Err(e)` - transport fault
    fn receive(&mut self, timeout: Duration) -> Result<Option<Frame>>;

    /// Release the interface. Safe to call on a closed link.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

impl<L: RadioLink + ?Sized> RadioLink for Box<L> {
    fn open(&mut self, port: &str, baud_rate: u32) -> Result<()> {
        (**self).open(port, baud_rate)
    }

    fn send_handshake(&mut self, peer: PeerAddress, message: &str) -> Result<()> {
        (**self).send_handshake(peer, message)
    }

    fn receive(&mut self, timeout: Duration) -> Result<Option<Frame>> {
        (**self).receive(timeout)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}
