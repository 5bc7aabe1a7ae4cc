//! Receiver service: owns the radio link and the background read task
//!
//! [`ReceiverService::start`] opens the link, sends the handshake and spawns a
//! blocking read task that appends every received frame to the queue.
//! [`ReceiverService::stop`] cancels that task, waits for it to hand the link
//! back, and closes the link.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::Stream;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::LinkConfig;
use crate::link::RadioLink;
use crate::queue::FrameWriter;
use crate::types::ReceiverState;
use crate::{LinkError, Result};

/// Longest pause after a run of read faults.
const MAX_FAULT_BACKOFF: Duration = Duration::from_millis(1600);

/// Snapshot of session counters. Counts accumulate across sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub sessions_started: u64,
    pub frames_received: u64,
    pub idle_timeouts: u64,
    pub read_faults: u64,
    pub handshake_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    sessions_started: AtomicU64,
    frames_received: AtomicU64,
    idle_timeouts: AtomicU64,
    read_faults: AtomicU64,
    handshake_failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ReceiverStats {
        ReceiverStats {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            idle_timeouts: self.idle_timeouts.load(Ordering::Relaxed),
            read_faults: self.read_faults.load(Ordering::Relaxed),
            handshake_failures: self.handshake_failures.load(Ordering::Relaxed),
        }
    }
}

/// A running read task. The task owns the link and writer until joined.
struct Session<L> {
    cancel: CancellationToken,
    task: JoinHandle<(L, FrameWriter)>,
}

/// Drives one [`RadioLink`] through its session lifecycle.
///
/// At most one read task exists at a time; it is the only writer to the
/// frame queue.
pub struct ReceiverService<L: RadioLink> {
    config: LinkConfig,
    link: Option<L>,
    writer: Option<FrameWriter>,
    session: Option<Session<L>>,
    state: watch::Sender<ReceiverState>,
    counters: Arc<Counters>,
}

impl<L: RadioLink> ReceiverService<L> {
    pub fn new(link: L, config: LinkConfig, writer: FrameWriter) -> Self {
        let (state, _) = watch::channel(ReceiverState::Idle);
        Self {
            config,
            link: Some(link),
            writer: Some(writer),
            session: None,
            state,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Replace the link settings used by the next `start()`.
    pub fn set_config(&mut self, config: LinkConfig) {
        self.config = config;
    }

    pub fn state(&self) -> ReceiverState {
        *self.state.borrow()
    }

    /// Stream of state changes, starting with the current state.
    pub fn state_updates(&self) -> impl Stream<Item = ReceiverState> + 'static {
        WatchStream::new(self.state.subscribe())
    }

    pub fn stats(&self) -> ReceiverStats {
        self.counters.snapshot()
    }

    fn set_state(&self, next: ReceiverState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!("Receiver state {} -> {}", previous, next);
        }
    }

    /// Open the link, send the handshake and begin listening.
    ///
    /// Calling this while a session is running stops that session first. Only
    /// an open failure is returned; the service is then back in `Idle`. A
    /// failed handshake is logged and counted, and the service listens anyway.
    pub async fn start(&mut self) -> Result<()> {
        if self.session.is_some() {
            info!("Receiver already running, restarting session");
            self.stop().await;
        }

        let (Some(mut link), Some(writer)) = (self.link.take(), self.writer.take()) else {
            error!("Radio link was lost with a failed read task; create a new receiver");
            self.set_state(ReceiverState::Idle);
            return Err(LinkError::open_failed(
                self.config.port.clone(),
                self.config.baud_rate,
                "radio link lost after read task failure",
            ));
        };

        let LinkConfig { port, baud_rate, .. } = &self.config;
        self.set_state(ReceiverState::Connecting);
        info!("Connecting to {} at {} baud", port, baud_rate);

        if let Err(e) = link.open(port, *baud_rate) {
            warn!("Open failed: {}", e);
            self.link = Some(link);
            self.writer = Some(writer);
            self.set_state(ReceiverState::Idle);
            return Err(e);
        }

        self.set_state(ReceiverState::HandshakeSent);
        send_handshake(&mut link, &self.config, &self.counters).await;

        let cancel = CancellationToken::new();
        let task = {
            let cancel = cancel.clone();
            let counters = Arc::clone(&self.counters);
            let timeout = self.config.read_timeout();
            let runtime = Handle::current();
            tokio::task::spawn_blocking(move || {
                read_loop(link, writer, timeout, cancel, counters, runtime)
            })
        };

        self.session = Some(Session { cancel, task });
        Counters::bump(&self.counters.sessions_started);
        self.set_state(ReceiverState::Listening);
        Ok(())
    }

    /// End the current session and close the link.
    ///
    /// Idempotent: without a running session this does nothing. Returns within
    /// about one read timeout, whether or not the peer is still transmitting.
    pub async fn stop(&mut self) {
        let Some(Session { cancel, task }) = self.session.take() else {
            trace!("Stop requested with no active session ({})", self.state());
            return;
        };

        self.set_state(ReceiverState::Stopping);
        cancel.cancel();

        match task.await {
            Ok((mut link, writer)) => {
                link.close();
                self.link = Some(link);
                self.writer = Some(writer);
            }
            Err(e) => {
                error!("Read task ended abnormally: {}", e);
            }
        }

        info!("Receiver stopped");
        self.set_state(ReceiverState::Closed);
    }
}

impl<L: RadioLink> Drop for ReceiverService<L> {
    fn drop(&mut self) {
        if let Some(session) = &self.session {
            debug!("Receiver dropped while listening, cancelling read task");
            session.cancel.cancel();
        }
    }
}

/// Send the handshake, retrying up to `handshake_attempts` times on failure.
async fn send_handshake<L: RadioLink>(link: &mut L, config: &LinkConfig, counters: &Counters) {
    let attempts = config.handshake_attempts.max(1);

    for attempt in 1..=attempts {
        match link.send_handshake(config.peer_address, &config.handshake_message) {
            Ok(()) => {
                debug!("Handshake sent to {} (attempt {}/{})", config.peer_address, attempt, attempts);
                tokio::time::sleep(config.handshake_settle()).await;
                return;
            }
            Err(e) => {
                Counters::bump(&counters.handshake_failures);
                warn!("Handshake attempt {}/{} failed: {}", attempt, attempts, e);
                if attempt < attempts {
                    tokio::time::sleep(config.handshake_settle()).await;
                }
            }
        }
    }
    warn!("Listening without a confirmed handshake send; the peer may already be transmitting");
}

/// Blocking read loop. Runs until cancelled, then hands the link and writer back.
fn read_loop<L: RadioLink>(
    mut link: L,
    writer: FrameWriter,
    timeout: Duration,
    cancel: CancellationToken,
    counters: Arc<Counters>,
    runtime: Handle,
) -> (L, FrameWriter) {
    info!("Read task started (receive timeout {:?})", timeout);
    let mut frame_count = 0u64;
    let mut fault_streak = 0u32;

    while !cancel.is_cancelled() {
        match link.receive(timeout) {
            Ok(Some(frame)) => {
                frame_count += 1;
                fault_streak = 0;
                trace!("Frame {}: {} bytes", frame_count, frame.len());
                Counters::bump(&counters.frames_received);
                writer.append(frame);
            }
            Ok(None) => {
                Counters::bump(&counters.idle_timeouts);
                trace!("No data within {:?}", timeout);
            }
            Err(e) => {
                fault_streak += 1;
                Counters::bump(&counters.read_faults);
                warn!("Read fault ({} in a row): {}", fault_streak, e);

                // 50ms, 100ms, 200ms, ... never longer than one receive timeout
                let backoff = Duration::from_millis(50 * (1 << fault_streak.min(5)))
                    .min(MAX_FAULT_BACKOFF)
                    .min(timeout);
                runtime.block_on(async {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(backoff) => {}
                    }
                });
            }
        }
    }

    info!("Read task ended (received {} frames)", frame_count);
    (link, writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{FrameQueue, FrameReader, Retention};
    use crate::test_utils::{LinkEvent, LinkMonitor, LinkStep, ScriptedLink, sample_line};
    use futures::StreamExt;
    use std::time::Instant;

    const WAIT: Duration = Duration::from_secs(2);

    fn test_config() -> LinkConfig {
        LinkConfig {
            port: "/dev/ttyTEST".into(),
            read_timeout_ms: 10,
            handshake_settle_ms: 0,
            ..LinkConfig::default()
        }
    }

    fn service(link: ScriptedLink) -> (ReceiverService<ScriptedLink>, FrameReader) {
        let _ = tracing_subscriber::fmt::try_init();
        let (writer, reader) = FrameQueue::channel(Retention::KeepAll);
        (ReceiverService::new(link, test_config(), writer), reader)
    }

    fn opens(monitor: &LinkMonitor) -> usize {
        monitor.count(|e| matches!(e, LinkEvent::Open { .. }))
    }

    fn closes(monitor: &LinkMonitor) -> usize {
        monitor.count(|e| matches!(e, LinkEvent::Close))
    }

    #[tokio::test]
    async fn start_opens_handshakes_and_listens() {
        let (link, monitor) = ScriptedLink::new();
        let (mut service, _reader) = service(link);
        assert_eq!(service.state(), ReceiverState::Idle);

        service.start().await.unwrap();
        assert_eq!(service.state(), ReceiverState::Listening);
        assert_eq!(
            monitor.events(),
            vec![
                LinkEvent::Open { port: "/dev/ttyTEST".into(), baud_rate: 9600 },
                LinkEvent::Handshake {
                    peer: crate::PeerAddress::REFERENCE_PAYLOAD,
                    message: " start".into()
                },
            ]
        );
        service.stop().await;
    }

    #[tokio::test]
    async fn frames_are_appended_and_read_faults_do_not_end_session() {
        let (link, monitor) = ScriptedLink::with_steps([
            LinkStep::line(sample_line(1)),
            LinkStep::Fault("framing error".into()),
            LinkStep::line(sample_line(2)),
        ]);
        let (mut service, mut reader) = service(link);
        service.start().await.unwrap();

        assert!(monitor.wait_for(WAIT, |p| p.remaining_steps() == 0).await);
        let mut frames = Vec::new();
        let deadline = Instant::now() + WAIT;
        while frames.len() < 2 && Instant::now() < deadline {
            frames.extend(reader.drain());
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        let texts: Vec<String> = frames.iter().map(|f| f.text()).collect();
        assert_eq!(texts, vec![sample_line(1), sample_line(2)]);
        assert_eq!(service.state(), ReceiverState::Listening);

        let stats = service.stats();
        assert_eq!(stats.frames_received, 2);
        assert_eq!(stats.read_faults, 1);
        service.stop().await;
    }

    #[tokio::test]
    async fn timeouts_append_nothing_and_keep_listening() {
        let (link, monitor) = ScriptedLink::with_steps(vec![LinkStep::Timeout; 5]);
        let (mut service, mut reader) = service(link);
        service.start().await.unwrap();

        assert!(monitor.wait_for(WAIT, |p| p.timeouts() >= 5).await);
        assert!(reader.drain().is_empty());
        assert_eq!(reader.queue().total_appended(), 0);
        assert_eq!(service.state(), ReceiverState::Listening);

        let stats = service.stats();
        assert!(stats.idle_timeouts >= 5);
        assert_eq!(stats.read_faults, 0);
        service.stop().await;
    }

    #[tokio::test]
    async fn start_while_listening_restarts_with_one_task() {
        let (link, monitor) = ScriptedLink::new();
        let (mut service, _reader) = service(link);

        service.start().await.unwrap();
        assert!(monitor.wait_for(WAIT, |p| p.receive_calls() > 0).await);
        service.start().await.unwrap();
        assert_eq!(service.state(), ReceiverState::Listening);

        let kinds: Vec<&'static str> = monitor
            .events()
            .iter()
            .map(|e| match e {
                LinkEvent::Open { .. } => "open",
                LinkEvent::Handshake { .. } => "handshake",
                LinkEvent::Close => "close",
            })
            .collect();
        assert_eq!(kinds, ["open", "handshake", "close", "open", "handshake"]);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(monitor.max_concurrent_receivers(), 1);
        assert_eq!(service.stats().sessions_started, 2);

        service.stop().await;
        assert_eq!(monitor.active_receivers(), 0);
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_closes_link() {
        let (link, monitor) = ScriptedLink::new();
        let (mut service, _reader) = service(link);

        service.stop().await;
        assert_eq!(service.state(), ReceiverState::Idle);
        assert_eq!(closes(&monitor), 0);

        service.start().await.unwrap();
        let started = Instant::now();
        service.stop().await;
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(service.state(), ReceiverState::Closed);
        assert!(!monitor.is_open());
        assert_eq!(monitor.active_receivers(), 0);

        let calls = monitor.receive_calls();
        service.stop().await;
        assert_eq!(service.state(), ReceiverState::Closed);
        assert_eq!(closes(&monitor), 1);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(monitor.receive_calls(), calls);
    }

    #[tokio::test]
    async fn open_failure_returns_to_idle() {
        let (link, monitor) = ScriptedLink::new();
        let (mut service, _reader) = service(link.failing_open("device busy"));

        let err = service.start().await.unwrap_err();
        assert!(matches!(err, LinkError::OpenFailed { .. }));
        assert_eq!(service.state(), ReceiverState::Idle);
        assert_eq!(opens(&monitor), 1);
        assert_eq!(monitor.count(|e| matches!(e, LinkEvent::Handshake { .. })), 0);
        assert_eq!(monitor.receive_calls(), 0);

        // The link stays with the service, so a retry is possible.
        assert!(service.start().await.is_err());
        assert_eq!(opens(&monitor), 2);
    }

    #[tokio::test]
    async fn failed_handshake_still_listens() {
        let (link, monitor) = ScriptedLink::new();
        let (mut service, _reader) = service(link.failing_handshakes(1));

        service.start().await.unwrap();
        assert_eq!(service.state(), ReceiverState::Listening);
        assert_eq!(service.stats().handshake_failures, 1);
        assert!(monitor.wait_for(WAIT, |p| p.receive_calls() > 0).await);
        service.stop().await;
    }

    #[tokio::test]
    async fn handshake_retries_up_to_configured_attempts() {
        let (link, monitor) = ScriptedLink::new();
        let (mut service, _reader) = service(link.failing_handshakes(2));
        service.set_config(LinkConfig { handshake_attempts: 3, ..test_config() });

        service.start().await.unwrap();
        assert_eq!(monitor.count(|e| matches!(e, LinkEvent::Handshake { .. })), 3);
        assert_eq!(service.stats().handshake_failures, 2);
        service.stop().await;
    }

    #[tokio::test]
    async fn restart_after_stop() {
        let (link, monitor) = ScriptedLink::new();
        let (mut service, _reader) = service(link);

        service.start().await.unwrap();
        service.stop().await;
        service.start().await.unwrap();
        assert_eq!(service.state(), ReceiverState::Listening);
        assert_eq!(opens(&monitor), 2);
        assert!(monitor.is_open());
        service.stop().await;
    }

    #[tokio::test]
    async fn state_updates_follow_lifecycle() {
        let (link, _monitor) = ScriptedLink::new();
        let (mut service, _reader) = service(link);
        let mut updates = service.state_updates();
        assert_eq!(updates.next().await, Some(ReceiverState::Idle));

        service.start().await.unwrap();
        assert_eq!(updates.next().await, Some(ReceiverState::Listening));
        service.stop().await;
        assert_eq!(updates.next().await, Some(ReceiverState::Closed));
    }

    #[tokio::test]
    async fn handshake_is_sent_in_handshake_sent_state() {
        let (link, monitor) = ScriptedLink::new();
        let (writer, _reader) = FrameQueue::channel(Retention::KeepAll);
        let config = LinkConfig { handshake_settle_ms: 200, ..test_config() };
        let mut service = ReceiverService::new(link, config, writer);
        let mut updates = service.state_updates();

        let watch_states = async {
            let mut seen = Vec::new();
            while let Some(state) = updates.next().await {
                let handshakes = monitor.count(|e| matches!(e, LinkEvent::Handshake { .. }));
                seen.push((state, handshakes, Instant::now()));
                if state == ReceiverState::Listening {
                    break;
                }
            }
            seen
        };
        let (started, seen) = tokio::join!(service.start(), watch_states);
        started.unwrap();

        let states: Vec<ReceiverState> = seen.iter().map(|(state, _, _)| *state).collect();
        assert!(states.contains(&ReceiverState::HandshakeSent), "{states:?}");

        let (_, handshakes, entered) =
            seen.iter().find(|(state, _, _)| *state == ReceiverState::HandshakeSent).unwrap();
        let (_, _, listening) = seen.last().unwrap();
        assert_eq!(*handshakes, 1);
        // The settle delay is spent in HandshakeSent, not before it.
        assert!(listening.duration_since(*entered) >= Duration::from_millis(150));
        service.stop().await;
    }
}
