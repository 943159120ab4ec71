//! Monitor configuration types
//!
//! Tunables for the ingestion loop and the log channels. Every field has a serde
//! default so a partial `[monitor]` table in the application config is enough.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the worker and the channel registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Bounded read timeout of the worker loop; also the stop latency
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_ms: u64,

    /// Maximum number of entries kept per log channel
    #[serde(default = "default_capacity")]
    pub channel_capacity: usize,

    /// Delta unit thresholds
    #[serde(default)]
    pub delta: DeltaFormat,
}

fn default_poll_timeout() -> u64 {
    1
}

fn default_capacity() -> usize {
    200
}

fn default_micros_below() -> f64 {
    0.0009
}

fn default_millis_below() -> f64 {
    0.9
}

fn default_first_delta() -> f64 {
    99.99
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: default_poll_timeout(),
            channel_capacity: default_capacity(),
            delta: DeltaFormat::default(),
        }
    }
}

/// Unit selection for inter-arrival deltas
///
/// Deltas below `micros_below` seconds print as whole microseconds, deltas below
/// `millis_below` as milliseconds with one decimal, anything else as seconds with
/// two decimals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeltaFormat {
    #[serde(default = "default_micros_below")]
    pub micros_below: f64,

    #[serde(default = "default_millis_below")]
    pub millis_below: f64,

    /// Delta shown for the first entry after a clear or clock reset
    #[serde(default = "default_first_delta")]
    pub first_delta: f64,
}

impl Default for DeltaFormat {
    fn default() -> Self {
        Self {
            micros_below: default_micros_below(),
            millis_below: default_millis_below(),
            first_delta: default_first_delta(),
        }
    }
}

impl DeltaFormat {
    /// Render a delta in seconds as "+500us", "+5.0ms" or "+5.00s"
    pub fn format(&self, delta: f64) -> String {
        if delta < self.micros_below {
            format!("+{}us", (delta * 1_000_000.0).round() as i64)
        } else if delta < self.millis_below {
            format!("+{:.1}ms", delta * 1000.0)
        } else {
            format!("+{:.2}s", delta)
        }
    }
}

impl MonitorConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the worker poll timeout
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Builder method: set the per-channel entry limit
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Builder method: set the delta unit thresholds
    pub fn with_delta_format(mut self, delta: DeltaFormat) -> Self {
        self.delta = delta;
        self
    }

    /// Poll timeout as a `Duration`, never zero
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms.max(1))
    }
}
