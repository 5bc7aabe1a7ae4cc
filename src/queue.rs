//! Single-producer/single-consumer frame hand-off.
//!
//! The radio read task appends frames; the consumer loop drains everything
//! appended since its cursor. Frames keep absolute indices, so a cursor stays
//! meaningful even after old frames have been released.
//!
//! [`FrameQueue::channel`] returns a [`FrameWriter`] and a [`FrameReader`].
//! Neither is `Clone`, which keeps exactly one producer and one consumer.
//!
//! ```rust
//! use groundlink::queue::{FrameQueue, Retention};
//! use groundlink::types::Frame;
//!
//! let (writer, mut reader) = FrameQueue::channel(Retention::DropConsumed);
//! writer.append(Frame::new("a"));
//! writer.append(Frame::new("b"));
//! let frames = reader.drain();
//! assert_eq!(frames.len(), 2);
//! assert!(reader.drain().is_empty());
//! ```

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{trace, warn};

use crate::types::Frame;

/// What the queue keeps after frames are appended or drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum Retention {
    /// Keep every frame for the life of the queue (full-session replay).
    KeepAll,

    /// Release frames once a drain has returned them.
    #[default]
    DropConsumed,

    /// Release drained frames and keep at most `capacity` unread frames,
    /// discarding the oldest unread frame on overflow. Drained order is
    /// preserved for retained frames, but frames can be lost if the consumer
    /// falls behind.
    Ring { capacity: usize },
}

/// Consumer position: absolute index of the next frame to deliver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cursor(u64);

impl Cursor {
    pub const START: Cursor = Cursor(0);

    pub fn position(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Default)]
struct Log {
    frames: VecDeque<Frame>,
    /// Absolute index of `frames[0]`
    base: u64,
    dropped: u64,
}

impl Log {
    fn end(&self) -> u64 {
        self.base + self.frames.len() as u64
    }
}

/// Append log shared by one [`FrameWriter`] and one [`FrameReader`].
#[derive(Debug)]
pub struct FrameQueue {
    log: Mutex<Log>,
    retention: Retention,
}

impl FrameQueue {
    pub fn new(retention: Retention) -> Self {
        let retention = match retention {
            Retention::Ring { capacity: 0 } => {
                warn!("Ring retention with zero capacity, keeping one frame");
                Retention::Ring { capacity: 1 }
            }
            other => other,
        };
        Self { log: Mutex::new(Log::default()), retention }
    }

    /// Create a queue and split it into its producer and consumer halves.
    pub fn channel(retention: Retention) -> (FrameWriter, FrameReader) {
        let queue = Arc::new(Self::new(retention));
        let writer = FrameWriter { queue: Arc::clone(&queue) };
        let reader = FrameReader { queue, cursor: Cursor::START };
        (writer, reader)
    }

    // A panic while holding the lock cannot leave the log half-updated
    // (every mutation is a single push/pop), so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, Log> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a frame. Only the producer calls this.
    pub fn append(&self, frame: Frame) {
        let mut log = self.lock();
        if let Retention::Ring { capacity } = self.retention {
            while log.frames.len() >= capacity {
                log.frames.pop_front();
                log.base += 1;
                log.dropped += 1;
            }
        }
        log.frames.push_back(frame);
        trace!("Frame {} appended", log.end() - 1);
    }

    /// Return every retained frame at or after `cursor`, in append order, and the
    /// cursor to pass on the next call.
    pub fn drain_since(&self, cursor: Cursor) -> (Vec<Frame>, Cursor) {
        let mut log = self.lock();
        let end = log.end();

        if cursor.0 > end {
            warn!("Cursor {} is past the end of the frame log ({})", cursor.0, end);
            return (Vec::new(), Cursor(end));
        }

        let start = cursor.0.max(log.base);
        let skip = (start - log.base) as usize;
        let frames: Vec<Frame> = log.frames.iter().skip(skip).cloned().collect();

        if self.retention != Retention::KeepAll {
            log.frames.clear();
            log.base = end;
        }

        (frames, Cursor(end))
    }

    /// Number of frames currently held.
    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().frames.is_empty()
    }

    /// Total frames ever appended.
    pub fn total_appended(&self) -> u64 {
        self.lock().end()
    }

    /// Frames discarded unread by [`Retention::Ring`].
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    pub fn retention(&self) -> Retention {
        self.retention
    }
}

/// Producer half of a [`FrameQueue`].
#[derive(Debug)]
pub struct FrameWriter {
    queue: Arc<FrameQueue>,
}

impl FrameWriter {
    pub fn append(&self, frame: Frame) {
        self.queue.append(frame);
    }

    pub fn queue(&self) -> &FrameQueue {
        &self.queue
    }
}

/// Consumer half of a [`FrameQueue`], holding the consumer cursor.
#[derive(Debug)]
pub struct FrameReader {
    queue: Arc<FrameQueue>,
    cursor: Cursor,
}

impl FrameReader {
    /// Take every frame appended since the previous drain.
    pub fn drain(&mut self) -> Vec<Frame> {
        let (frames, cursor) = self.queue.drain_since(self.cursor);
        debug_assert!(cursor >= self.cursor);
        self.cursor = cursor;
        frames
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn queue(&self) -> &FrameQueue {
        &self.queue
    }
}
