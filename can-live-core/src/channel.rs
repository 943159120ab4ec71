//! Bounded per-identifier log channel
//!
//! A channel keeps the most recent formatted entries for one selector and the
//! timestamp of the last appended frame, from which the inter-arrival delta of
//! the next entry is computed.

use crate::config::DeltaFormat;
use std::collections::VecDeque;
use std::fmt;

/// Which frames a channel collects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Selector {
    /// Every identifier without a dedicated channel
    CatchAll,
    /// Exactly one identifier
    Id(u32),
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::CatchAll => write!(f, "All frames"),
            Selector::Id(id) => write!(f, "CAN ID: 0x{:X}", id),
        }
    }
}

/// A capacity-bounded, time-ordered list of formatted frame entries
#[derive(Debug, Clone)]
pub struct LogChannel {
    selector: Selector,
    entries: VecDeque<String>,
    last_timestamp: Option<f64>,
    capacity: usize,
    delta: DeltaFormat,
}

impl LogChannel {
    /// Create an empty channel
    pub fn new(selector: Selector, capacity: usize, delta: DeltaFormat) -> Self {
        Self {
            selector,
            entries: VecDeque::with_capacity(capacity.min(256) + 1),
            last_timestamp: None,
            capacity,
            delta,
        }
    }

    /// Selector this channel was created for
    pub fn selector(&self) -> Selector {
        self.selector
    }

    /// Display title ("All frames" or "CAN ID: 0x...")
    pub fn title(&self) -> String {
        self.selector.to_string()
    }

    /// Append a frame and return the formatted entry
    ///
    /// The entry reads `"<delta right-justified to 8> <text> <timestamp>s"`. Once the
    /// channel holds more than `capacity` entries the oldest one is dropped.
    pub fn append(&mut self, timestamp: f64, text: &str) -> &str {
        let delta = match self.last_timestamp {
            Some(last) => timestamp - last,
            None => self.delta.first_delta,
        };
        let entry = format!("{:>8} {} {:.2}s", self.delta.format(delta), text, timestamp);
        self.last_timestamp = Some(timestamp);

        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }

        self.entries.back().map(String::as_str).unwrap_or_default()
    }

    /// Drop all entries and forget the last timestamp
    pub fn clear(&mut self) {
        self.entries.clear();
        self.last_timestamp = None;
    }

    /// Forget the last timestamp but keep the visible history
    pub fn reset_clock(&mut self) {
        self.last_timestamp = None;
    }

    /// Entries, oldest first
    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    /// Most recent entry
    pub fn last_entry(&self) -> Option<&str> {
        self.entries.back().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Timestamp of the most recent frame since the last clear/reset
    pub fn last_timestamp(&self) -> Option<f64> {
        self.last_timestamp
    }
}
