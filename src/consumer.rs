//! Consumer loop: drains the frame queue, decodes, and fans records out to sinks

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::decoder::FrameDecoder;
use crate::error::DecodeError;
use crate::queue::FrameReader;
use crate::sinks::RecordSink;
use crate::types::Record;

/// Running totals since the loop was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub ticks: u64,
    pub frames_drained: u64,
    pub records_dispatched: u64,
    pub decode_errors: u64,
    pub sink_errors: u64,
    /// Frames with no text after trimming
    pub empty_frames: u64,
    /// Records whose packet count did not increase
    pub sequence_regressions: u64,
    /// Packet counts skipped between consecutive records
    pub packet_gaps: u64,
}

impl ConsumerStats {
    fn absorb(&mut self, tick: &TickSummary) {
        self.ticks += 1;
        self.frames_drained += tick.drained as u64;
        self.records_dispatched += tick.dispatched as u64;
        self.decode_errors += tick.decode_errors as u64;
        self.sink_errors += tick.sink_errors as u64;
        self.empty_frames += tick.empty_frames as u64;
        self.sequence_regressions += tick.sequence_regressions as u64;
        self.packet_gaps += tick.packet_gaps;
    }
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub drained: usize,
    pub dispatched: usize,
    pub decode_errors: usize,
    pub sink_errors: usize,
    pub empty_frames: usize,
    pub sequence_regressions: usize,
    pub packet_gaps: u64,
}

/// Sole reader of the frame queue.
///
/// Never touches the radio link; it only drains frames, decodes them, and
/// calls sinks. Nothing that goes wrong in a tick escapes it.
pub struct ConsumerLoop {
    reader: FrameReader,
    sinks: Vec<Box<dyn RecordSink>>,
    stats: watch::Sender<ConsumerStats>,
    last_packet: Option<u64>,
}

impl ConsumerLoop {
    pub fn new(reader: FrameReader) -> Self {
        let (stats, _) = watch::channel(ConsumerStats::default());
        Self { reader, sinks: Vec::new(), stats, last_packet: None }
    }

    pub fn with_sink<S: RecordSink>(mut self, sink: S) -> Self {
        self.add_sink(Box::new(sink));
        self
    }

    /// Sinks are called in the order they were added.
    pub fn add_sink(&mut self, sink: Box<dyn RecordSink>) {
        debug!("Adding sink '{}'", sink.name());
        self.sinks.push(sink);
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    pub fn stats(&self) -> ConsumerStats {
        *self.stats.borrow()
    }

    /// Forget the last packet count, e.g. when a new session starts.
    pub fn reset_sequence(&mut self) {
        self.last_packet = None;
    }

    /// Mark a session boundary: reset sequence tracking and let every sink
    /// drop its per-session state. Call after the old session's frames have
    /// been drained.
    pub async fn begin_session(&mut self) {
        self.reset_sequence();
        for sink in &mut self.sinks {
            if let Err(e) = sink.on_session_start().await {
                warn!("Sink '{}' failed to start a new session: {}", sink.name(), e);
            }
        }
        debug!("Consumer session reset");
    }

    /// Drain, decode, and dispatch everything appended since the last tick.
    pub async fn tick(&mut self) -> TickSummary {
        let frames = self.reader.drain();
        let mut summary = TickSummary { drained: frames.len(), ..TickSummary::default() };

        for frame in frames {
            match FrameDecoder::decode_frame(&frame) {
                Ok(Some(record)) => {
                    self.track_sequence(&record, &mut summary);
                    summary.sink_errors += self.dispatch(Arc::new(record)).await;
                    summary.dispatched += 1;
                }
                Ok(None) => {
                    trace!("Skipping empty frame");
                    summary.empty_frames += 1;
                }
                Err(e) => {
                    summary.decode_errors += 1;
                    debug!("Decode failed: {} (raw {:?})", e, e.raw_text);
                    summary.sink_errors += self.report(&e).await;
                }
            }
        }

        if summary.drained > 0 {
            trace!(
                "Tick: {} drained, {} dispatched, {} decode errors",
                summary.drained, summary.dispatched, summary.decode_errors
            );
        }
        self.stats.send_modify(|stats| stats.absorb(&summary));
        summary
    }

    fn track_sequence(&mut self, record: &Record, summary: &mut TickSummary) {
        let packet = record.packet_count;
        if let Some(last) = self.last_packet {
            if packet <= last {
                summary.sequence_regressions += 1;
                warn!("Packet count went from {} to {}", last, packet);
            } else if packet > last + 1 {
                let missed = packet - last - 1;
                summary.packet_gaps += missed;
                debug!("Missed {} packet(s) between {} and {}", missed, last, packet);
            }
        }
        self.last_packet = Some(packet);
    }

    async fn dispatch(&mut self, record: Arc<Record>) -> usize {
        let mut failures = 0;
        for sink in &mut self.sinks {
            if let Err(e) = sink.on_record(Arc::clone(&record)).await {
                failures += 1;
                warn!("Sink '{}' rejected packet {}: {}", sink.name(), record.packet_count, e);
            }
        }
        failures
    }

    async fn report(&mut self, decode_error: &DecodeError) -> usize {
        let mut failures = 0;
        for sink in &mut self.sinks {
            if let Err(e) = sink.on_decode_error(decode_error).await {
                failures += 1;
                warn!("Sink '{}' failed to take decode error: {}", sink.name(), e);
            }
        }
        failures
    }

    /// Flush and close every sink.
    pub async fn close_sinks(&mut self) {
        for sink in &mut self.sinks {
            if let Err(e) = sink.close().await {
                warn!("Sink '{}' failed to close: {}", sink.name(), e);
            }
        }
    }

    /// Run [`tick`](Self::tick) every `period` on a tokio task until `cancel` fires.
    ///
    /// A final tick runs after cancellation so frames appended just before the
    /// stop are not left in the queue.
    pub fn spawn(mut self, period: Duration, cancel: CancellationToken) -> ConsumerHandle {
        let period = period.max(Duration::from_millis(1));
        let stats = self.stats.subscribe();
        let task_cancel = cancel.clone();
        let (sessions, mut session_requests) = mpsc::channel::<oneshot::Sender<()>>(1);

        let task = tokio::spawn(async move {
            info!("Consumer loop started ({:?} period, {} sinks)", period, self.sinks.len());
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = interval.tick() => {
                        self.tick().await;
                    }
                    Some(ack) = session_requests.recv() => {
                        self.tick().await;
                        self.begin_session().await;
                        let _ = ack.send(());
                    }
                }
            }

            self.tick().await;
            let stats = self.stats();
            info!(
                "Consumer loop ended ({} records, {} decode errors)",
                stats.records_dispatched, stats.decode_errors
            );
            self
        });

        ConsumerHandle { stats, sessions, cancel, task }
    }
}

/// Handle to a spawned [`ConsumerLoop`].
pub struct ConsumerHandle {
    stats: watch::Receiver<ConsumerStats>,
    sessions: mpsc::Sender<oneshot::Sender<()>>,
    cancel: CancellationToken,
    task: JoinHandle<ConsumerLoop>,
}

impl ConsumerHandle {
    pub fn stats(&self) -> ConsumerStats {
        *self.stats.borrow()
    }

    /// Receiver that changes after every tick.
    pub fn stats_updates(&self) -> watch::Receiver<ConsumerStats> {
        self.stats.clone()
    }

    /// Drain what is queued, then run [`ConsumerLoop::begin_session`] on the
    /// loop's task. Resolves once the reset is done, or at once if the loop
    /// has already ended.
    pub async fn begin_session(&self) {
        let (ack, done) = oneshot::channel();
        if self.sessions.send(ack).await.is_err() {
            debug!("Consumer loop gone, skipping session reset");
            return;
        }
        let _ = done.await;
    }

    /// Stop the loop and get it back, or `None` if the task panicked.
    pub async fn stop(self) -> Option<ConsumerLoop> {
        self.cancel.cancel();
        match self.task.await {
            Ok(consumer) => Some(consumer),
            Err(e) => {
                error!("Consumer task failed: {}", e);
                None
            }
        }
    }
}
