//! Update rate control for display record streams

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How often a display subscriber wants to see the latest record.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateRate {
    /// Every record the consumer loop dispatches
    #[default]
    Native,

    /// At most this many records per second, latest wins.
    /// A rate at or above the consumer tick rate behaves like `Native`.
    Max(u32),
}

impl UpdateRate {
    /// Resolve against the consumer loop's tick frequency.
    pub fn normalize(self, tick_hz: f64) -> Self {
        match self {
            UpdateRate::Max(0) => UpdateRate::Native,
            UpdateRate::Max(hz) if hz as f64 >= tick_hz => UpdateRate::Native,
            other => other,
        }
    }

    /// Minimum spacing between emitted records, if any.
    pub fn interval(self, tick_hz: f64) -> Option<Duration> {
        match self.normalize(tick_hz) {
            UpdateRate::Native => None,
            UpdateRate::Max(hz) => Some(Duration::from_secs_f64(1.0 / hz as f64)),
        }
    }
}
