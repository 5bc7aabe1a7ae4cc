//! Test utilities: a scripted radio link and sample telemetry lines
//!
//! Shared by unit tests, integration tests, and benches so none of them need a
//! radio attached.

#![cfg(any(test, feature = "benchmark"))]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::link::RadioLink;
use crate::types::{Frame, PeerAddress, Record};
use crate::{FrameDecoder, LinkError, Result};

/// Reference telemetry line used throughout the tests.
pub const SAMPLE_LINE: &str = "4421,00:12:34,7,305.12,101325.00,23.40,7.98,00:12:33,12.971600,\
                               77.594100,920.50,9,14.20,3.00,1.234,-0.987,178.500";

/// Well-formed telemetry line with the given packet count.
///
/// Altitude climbs by a metre per packet so trends have something to show.
pub fn sample_line(packet_count: u64) -> String {
    let altitude = 300.0 + packet_count as f64;
    format!(
        "4421,00:12:34,{packet_count},{altitude:.2},101325.00,23.40,7.98,00:12:33,12.971600,\
         77.594100,920.50,9,14.20,3.00,1.234,-0.987,178.500"
    )
}

/// Decoded form of [`sample_line`].
pub fn sample_record(packet_count: u64) -> Record {
    match FrameDecoder::decode(&sample_line(packet_count)) {
        Ok(record) => record,
        Err(e) => panic!("sample line must decode: {e}"),
    }
}

/// One scripted outcome of [`RadioLink::receive`].
#[derive(Debug, Clone)]
pub enum LinkStep {
    Frame(Frame),
    Timeout,
    Fault(String),
}

impl LinkStep {
    pub fn line(text: impl AsRef<str>) -> Self {
        LinkStep::Frame(Frame::new(text.as_ref().as_bytes()))
    }
}

/// Calls observed by a [`ScriptedLink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Open { port: String, baud_rate: u32 },
    Handshake { peer: PeerAddress, message: String },
    Close,
}

/// State shared between a [`ScriptedLink`] and the test driving it.
#[derive(Debug, Default)]
pub struct LinkMonitor {
    script: Mutex<VecDeque<LinkStep>>,
    events: Mutex<Vec<LinkEvent>>,
    open: AtomicBool,
    receivers: AtomicUsize,
    max_receivers: AtomicUsize,
    receive_calls: AtomicUsize,
    timeouts: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl LinkMonitor {
    pub fn push(&self, step: LinkStep) {
        lock(&self.script).push_back(step);
    }

    pub fn push_line(&self, text: impl AsRef<str>) {
        self.push(LinkStep::line(text));
    }

    pub fn remaining_steps(&self) -> usize {
        lock(&self.script).len()
    }

    pub fn events(&self) -> Vec<LinkEvent> {
        lock(&self.events).clone()
    }

    pub fn count(&self, matches: impl Fn(&LinkEvent) -> bool) -> usize {
        lock(&self.events).iter().filter(|event| matches(event)).count()
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Threads currently inside `receive`.
    pub fn active_receivers(&self) -> usize {
        self.receivers.load(Ordering::SeqCst)
    }

    /// Highest number of threads ever inside `receive` at once.
    pub fn max_concurrent_receivers(&self) -> usize {
        self.max_receivers.load(Ordering::SeqCst)
    }

    pub fn receive_calls(&self) -> usize {
        self.receive_calls.load(Ordering::SeqCst)
    }

    /// `receive` calls that ended with no data.
    pub fn timeouts(&self) -> usize {
        self.timeouts.load(Ordering::SeqCst)
    }

    /// Wait (polling) until `condition` holds or `limit` passes.
    pub async fn wait_for(&self, limit: Duration, condition: impl Fn(&Self) -> bool) -> bool {
        let deadline = Instant::now() + limit;
        while Instant::now() < deadline {
            if condition(self) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        condition(self)
    }

    fn record(&self, event: LinkEvent) {
        lock(&self.events).push(event);
    }
}

/// In-memory [`RadioLink`] that replays a script of receive outcomes.
///
/// Once the script runs dry, `receive` sleeps for its timeout and reports no
/// data, like an idle radio.
#[derive(Debug, Default)]
pub struct ScriptedLink {
    monitor: Arc<LinkMonitor>,
    open_error: Option<String>,
    handshake_failures: u32,
}

impl ScriptedLink {
    pub fn new() -> (Self, Arc<LinkMonitor>) {
        let link = Self::default();
        let monitor = Arc::clone(&link.monitor);
        (link, monitor)
    }

    pub fn with_steps(steps: impl IntoIterator<Item = LinkStep>) -> (Self, Arc<LinkMonitor>) {
        let (link, monitor) = Self::new();
        for step in steps {
            monitor.push(step);
        }
        (link, monitor)
    }

    /// Make every `open` fail with `reason`.
    pub fn failing_open(mut self, reason: impl Into<String>) -> Self {
        self.open_error = Some(reason.into());
        self
    }

    /// Make the first `count` handshake sends fail.
    pub fn failing_handshakes(mut self, count: u32) -> Self {
        self.handshake_failures = count;
        self
    }
}

struct ReceiverGuard<'a>(&'a LinkMonitor);

impl<'a> ReceiverGuard<'a> {
    fn enter(monitor: &'a LinkMonitor) -> Self {
        let now = monitor.receivers.fetch_add(1, Ordering::SeqCst) + 1;
        monitor.max_receivers.fetch_max(now, Ordering::SeqCst);
        monitor.receive_calls.fetch_add(1, Ordering::SeqCst);
        Self(monitor)
    }
}

impl Drop for ReceiverGuard<'_> {
    fn drop(&mut self) {
        self.0.receivers.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RadioLink for ScriptedLink {
    fn open(&mut self, port: &str, baud_rate: u32) -> Result<()> {
        self.monitor.record(LinkEvent::Open { port: port.to_string(), baud_rate });
        if let Some(reason) = &self.open_error {
            return Err(LinkError::open_failed(port, baud_rate, reason.clone()));
        }
        self.monitor.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn send_handshake(&mut self, peer: PeerAddress, message: &str) -> Result<()> {
        if !self.is_open() {
            return Err(LinkError::NotOpen);
        }
        self.monitor.record(LinkEvent::Handshake { peer, message: message.to_string() });
        if self.handshake_failures > 0 {
            self.handshake_failures -= 1;
            return Err(LinkError::send_failed("scripted handshake failure"));
        }
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Result<Option<Frame>> {
        let _guard = ReceiverGuard::enter(&self.monitor);
        if !self.is_open() {
            return Err(LinkError::NotOpen);
        }

        let step = lock(&self.monitor.script).pop_front();
        match step {
            Some(LinkStep::Frame(frame)) => Ok(Some(frame)),
            Some(LinkStep::Fault(reason)) => Err(LinkError::read_failed(reason)),
            Some(LinkStep::Timeout) => {
                self.monitor.timeouts.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            }
            None => {
                std::thread::sleep(timeout);
                self.monitor.timeouts.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            }
        }
    }

    fn close(&mut self) {
        if self.monitor.open.swap(false, Ordering::SeqCst) {
            self.monitor.record(LinkEvent::Close);
        }
    }

    fn is_open(&self) -> bool {
        self.monitor.is_open()
    }
}
