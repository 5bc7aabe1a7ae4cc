//! Live display state: latest record plus rolling trend plots

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::{Stream, StreamExt};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, trace};

use super::RecordSink;
use crate::error::SinkError;
use crate::stream::ThrottleExt;
use crate::types::{Record, UpdateRate};

/// Quantities plotted over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrendSeries {
    Altitude,
    Temperature,
    Pressure,
    AirSpeed,
    Voltage,
    ParticleCount,
}

impl TrendSeries {
    pub const ALL: [TrendSeries; 6] = [
        TrendSeries::Altitude,
        TrendSeries::Temperature,
        TrendSeries::Pressure,
        TrendSeries::AirSpeed,
        TrendSeries::Voltage,
        TrendSeries::ParticleCount,
    ];

    pub fn label(self) -> &'static str {
        match self {
            TrendSeries::Altitude => "Altitude",
            TrendSeries::Temperature => "Temperature",
            TrendSeries::Pressure => "Pressure",
            TrendSeries::AirSpeed => "Air Speed",
            TrendSeries::Voltage => "Voltage",
            TrendSeries::ParticleCount => "Particle Count",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            TrendSeries::Altitude => "m",
            TrendSeries::Temperature => "°C",
            TrendSeries::Pressure => "Pa",
            TrendSeries::AirSpeed => "m/s",
            TrendSeries::Voltage => "V",
            TrendSeries::ParticleCount => "",
        }
    }

    pub fn value(self, record: &Record) -> f64 {
        match self {
            TrendSeries::Altitude => record.altitude,
            TrendSeries::Temperature => record.temperature,
            TrendSeries::Pressure => record.pressure,
            TrendSeries::AirSpeed => record.air_speed,
            TrendSeries::Voltage => record.voltage,
            TrendSeries::ParticleCount => record.particle_count,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Bounded history of `(packet_count, value)` points; the oldest point falls
/// off once `capacity` is reached.
#[derive(Debug, Clone, PartialEq)]
pub struct TrendBuffer {
    points: VecDeque<(u64, f64)>,
    capacity: usize,
}

impl TrendBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { points: VecDeque::with_capacity(capacity), capacity }
    }

    pub fn push(&mut self, sample: u64, value: f64) {
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back((sample, value));
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<(u64, f64)> {
        self.points.back().copied()
    }

    pub fn points(&self) -> impl Iterator<Item = (u64, f64)> + '_ {
        self.points.iter().copied()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }
}

/// Copy of every trend buffer at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct TrendSnapshot {
    buffers: Vec<TrendBuffer>,
}

impl TrendSnapshot {
    pub fn series(&self, series: TrendSeries) -> &TrendBuffer {
        &self.buffers[series.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (TrendSeries, &TrendBuffer)> {
        TrendSeries::ALL.into_iter().zip(self.buffers.iter())
    }
}

type SharedTrends = Arc<Mutex<Vec<TrendBuffer>>>;

fn lock_trends(trends: &SharedTrends) -> MutexGuard<'_, Vec<TrendBuffer>> {
    trends.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Sink feeding a UI.
///
/// The sink half lives in the consumer loop; the [`DisplayHandle`] half is
/// cloned into whatever renders the data.
pub struct DisplaySink {
    latest: watch::Sender<Option<Arc<Record>>>,
    trends: SharedTrends,
}

impl DisplaySink {
    /// `tick_hz` is the consumer loop frequency, used to resolve [`UpdateRate`].
    pub fn new(trend_points: usize, tick_hz: f64) -> (Self, DisplayHandle) {
        let (latest, records) = watch::channel(None);
        let trends: SharedTrends =
            Arc::new(Mutex::new(vec![TrendBuffer::new(trend_points); TrendSeries::ALL.len()]));

        debug!("Display sink created ({} trend points, {:.1} Hz tick)", trend_points, tick_hz);

        let handle = DisplayHandle {
            records,
            trends: Arc::clone(&trends),
            tick_hz,
            rate: UpdateRate::Native,
        };
        (Self { latest, trends }, handle)
    }
}

#[async_trait::async_trait]
impl RecordSink for DisplaySink {
    fn name(&self) -> &str {
        "display"
    }

    async fn on_record(&mut self, record: Arc<Record>) -> Result<(), SinkError> {
        {
            let mut trends = lock_trends(&self.trends);
            for series in TrendSeries::ALL {
                trends[series.index()].push(record.packet_count, series.value(&record));
            }
        }
        trace!("Display update for packet {}", record.packet_count);
        // No subscribers is fine; `latest()` still reads the stored value.
        self.latest.send_replace(Some(record));
        Ok(())
    }

    async fn on_session_start(&mut self) -> Result<(), SinkError> {
        for buffer in lock_trends(&self.trends).iter_mut() {
            buffer.clear();
        }
        Ok(())
    }
}

/// Read side of a [`DisplaySink`]. Cheap to clone.
#[derive(Clone)]
pub struct DisplayHandle {
    records: watch::Receiver<Option<Arc<Record>>>,
    trends: SharedTrends,
    tick_hz: f64,
    rate: UpdateRate,
}

impl DisplayHandle {
    /// Most recent record, if any arrived yet.
    pub fn latest(&self) -> Option<Arc<Record>> {
        self.records.borrow().clone()
    }

    /// Set the rate used by [`updates`](Self::updates).
    pub fn with_rate(mut self, rate: UpdateRate) -> Self {
        self.rate = rate;
        self
    }

    pub fn rate(&self) -> UpdateRate {
        self.rate
    }

    /// Stream of records at the handle's configured rate.
    pub fn updates(&self) -> impl Stream<Item = Arc<Record>> + 'static {
        self.records(self.rate)
    }

    /// Stream of records at the requested rate.
    ///
    /// Latest-wins: a subscriber that falls behind sees the newest record, not
    /// a backlog. The stream ends when the sink is dropped.
    pub fn records(&self, rate: UpdateRate) -> impl Stream<Item = Arc<Record>> + 'static {
        let records = WatchStream::new(self.records.clone()).filter_map(|opt| async move { opt });

        match rate.interval(self.tick_hz) {
            None => records.boxed(),
            Some(period) => records.throttle(period).boxed(),
        }
    }

    pub fn trends(&self) -> TrendSnapshot {
        TrendSnapshot { buffers: lock_trends(&self.trends).clone() }
    }

    pub fn clear_trends(&self) {
        for buffer in lock_trends(&self.trends).iter_mut() {
            buffer.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::sample_record;
    use std::time::Duration;

    #[test]
    fn trend_buffer_keeps_newest_points() {
        let mut buffer = TrendBuffer::new(3);
        for n in 0..5u64 {
            buffer.push(n, n as f64 * 10.0);
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.points().collect::<Vec<_>>(), vec![(2, 20.0), (3, 30.0), (4, 40.0)]);
        assert_eq!(buffer.latest(), Some((4, 40.0)));
    }

    #[tokio::test]
    async fn records_update_latest_and_trends() {
        let (mut sink, handle) = DisplaySink::new(300, 20.0);
        assert!(handle.latest().is_none());

        for packet in 1..=3 {
            sink.on_record(Arc::new(sample_record(packet))).await.unwrap();
        }

        assert_eq!(handle.latest().unwrap().packet_count, 3);
        let trends = handle.trends();
        for (series, buffer) in trends.iter() {
            assert_eq!(buffer.len(), 3, "{}", series.label());
        }
        let altitude = trends.series(TrendSeries::Altitude);
        assert_eq!(altitude.latest(), Some((3, sample_record(3).altitude)));

        handle.clear_trends();
        assert!(handle.trends().series(TrendSeries::Voltage).is_empty());
    }

    #[tokio::test]
    async fn new_session_clears_trends_but_keeps_latest() {
        let (mut sink, handle) = DisplaySink::new(10, 20.0);
        for packet in 100..=102 {
            sink.on_record(Arc::new(sample_record(packet))).await.unwrap();
        }

        sink.on_session_start().await.unwrap();
        assert!(handle.trends().iter().all(|(_, buffer)| buffer.is_empty()));
        assert_eq!(handle.latest().unwrap().packet_count, 102);

        sink.on_record(Arc::new(sample_record(1))).await.unwrap();
        assert_eq!(handle.trends().series(TrendSeries::Altitude).latest().map(|(n, _)| n), Some(1));
    }

    #[tokio::test]
    async fn trend_length_is_bounded() {
        let (mut sink, handle) = DisplaySink::new(300, 20.0);
        for packet in 0..350 {
            sink.on_record(Arc::new(sample_record(packet))).await.unwrap();
        }
        let snapshot = handle.trends();
        let pressure = snapshot.series(TrendSeries::Pressure);
        assert_eq!(pressure.len(), 300);
        assert_eq!(pressure.points().next().map(|(n, _)| n), Some(50));
    }

    #[tokio::test]
    async fn native_subscription_sees_updates() {
        let (mut sink, handle) = DisplaySink::new(10, 20.0);
        let stream = handle.records(UpdateRate::Native);
        tokio::pin!(stream);

        sink.on_record(Arc::new(sample_record(7))).await.unwrap();
        let record = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.packet_count, 7);
    }

    #[tokio::test]
    async fn stream_ends_when_sink_dropped() {
        let (sink, handle) = DisplaySink::new(10, 20.0);
        let stream = handle.records(UpdateRate::Max(5));
        drop(sink);
        let items: Vec<_> =
            tokio::time::timeout(Duration::from_secs(1), stream.collect::<Vec<_>>()).await.unwrap();
        assert!(items.is_empty());
    }
}
