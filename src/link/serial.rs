//! XBee radio attached over a serial port

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::time::{Duration, Instant};

use serialport::SerialPort;
use tracing::{debug, info, trace, warn};

use super::RadioLink;
use super::xbee::{ApiFrame, ApiFrameDecoder, ApiMode};
use crate::types::{Frame, PeerAddress};
use crate::{LinkError, Result};

/// Upper bound on a single blocking serial read, so `receive` can honor its
/// deadline even when the port delivers a trickle of non-telemetry bytes.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Ground radio in API mode on a local serial port.
pub struct SerialXBeeLink {
    mode: ApiMode,
    port: Option<Box<dyn SerialPort>>,
    port_name: String,
    decoder: ApiFrameDecoder,
    pending: VecDeque<Frame>,
    next_frame_id: u8,
}

impl SerialXBeeLink {
    pub fn new(mode: ApiMode) -> Self {
        Self {
            mode,
            port: None,
            port_name: String::new(),
            decoder: ApiFrameDecoder::new(mode),
            pending: VecDeque::new(),
            next_frame_id: 1,
        }
    }

    /// Name of the currently (or last) opened port.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    // Frame id 0 disables the transmit status reply, so skip it.
    fn take_frame_id(&mut self) -> u8 {
        let id = self.next_frame_id;
        self.next_frame_id = self.next_frame_id.wrapping_add(1).max(1);
        id
    }

    fn absorb(&mut self, bytes: &[u8]) {
        for result in self.decoder.push(bytes) {
            match result {
                Ok(ApiFrame::ReceivePacket { source, payload, .. }) => {
                    trace!("Receive packet from {} ({} bytes)", source, payload.len());
                    self.pending.push_back(Frame::new(payload).with_source(source));
                }
                Ok(ApiFrame::TransmitStatus { frame_id, retries, delivery_status, .. }) => {
                    debug!(
                        "Transmit status for frame {}: delivery={:#04x} retries={}",
                        frame_id, delivery_status, retries
                    );
                }
                Ok(other) => {
                    trace!("Ignoring API frame type {:#04x}", other.frame_type());
                }
                Err(fault) => {
                    warn!("Dropping API frame on {}: {}", self.port_name, fault);
                }
            }
        }
    }
}

impl RadioLink for SerialXBeeLink {
    fn open(&mut self, port: &str, baud_rate: u32) -> Result<()> {
        if self.port.is_some() {
            debug!("Re-opening {}, closing previous port first", self.port_name);
            self.close();
        }
        if port.trim().is_empty() {
            return Err(LinkError::open_failed(port, baud_rate, "no serial port selected"));
        }
        if baud_rate == 0 {
            return Err(LinkError::open_failed(port, baud_rate, "baud rate must be positive"));
        }

        info!("Opening XBee on {} at {} baud ({:?} API mode)", port, baud_rate, self.mode);

        let serial = serialport::new(port, baud_rate)
            .timeout(POLL_INTERVAL)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None)
            .open()
            .map_err(|e| LinkError::open_failed_with_source(port, baud_rate, e))?;

        if let Err(e) = serial.clear(serialport::ClearBuffer::Input) {
            debug!("Could not clear input buffer on {}: {}", port, e);
        }

        self.port = Some(serial);
        self.port_name = port.to_string();
        self.decoder.reset();
        self.pending.clear();
        Ok(())
    }

    fn send_handshake(&mut self, peer: PeerAddress, message: &str) -> Result<()> {
        let frame_id = self.take_frame_id();
        let port = self.port.as_mut().ok_or(LinkError::NotOpen)?;

        let request = ApiFrame::TransmitRequest {
            frame_id,
            destination: peer,
            payload: message.as_bytes().to_vec(),
        };
        let bytes = request.encode(self.mode);

        port.write_all(&bytes)
            .and_then(|_| port.flush())
            .map_err(LinkError::send_failed_with_source)?;

        info!("Sent handshake {:?} to {} (frame id {})", message, peer, frame_id);
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Result<Option<Frame>> {
        if let Some(frame) = self.pending.pop_front() {
            return Ok(Some(frame));
        }
        if self.port.is_none() {
            return Err(LinkError::NotOpen);
        }

        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 512];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            let port = self.port.as_mut().ok_or(LinkError::NotOpen)?;
            port.set_timeout(remaining.min(POLL_INTERVAL))
                .map_err(LinkError::read_failed_with_source)?;

            match port.read(&mut buf) {
                Ok(0) => {}
                Ok(n) => {
                    self.absorb(&buf[..n]);
                    if let Some(frame) = self.pending.pop_front() {
                        return Ok(Some(frame));
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(LinkError::read_failed_with_source(e)),
            }
        }
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            info!("Closed {}", self.port_name);
        }
        self.decoder.reset();
        self.pending.clear();
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }
}

impl Drop for SerialXBeeLink {
    fn drop(&mut self) {
        self.close();
    }
}

/// Names of serial ports present on this machine.
pub fn list_ports() -> Vec<String> {
    match serialport::available_ports() {
        Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
        Err(e) => {
            warn!("Could not enumerate serial ports: {}", e);
            Vec::new()
        }
    }
}
