//! Controller-side glue
//!
//! [`Monitor`] owns an ingestion worker and the channel registry. It applies
//! worker events to the registry on the thread that calls [`Monitor::pump`], so
//! channel state has a single writer and deltas are computed in arrival order.
//! Presentation layers plug in through [`MonitorObserver`].

use crate::channel::Selector;
use crate::config::MonitorConfig;
use crate::device::Driver;
use crate::registry::ChannelRegistry;
use crate::types::{MonitorError, Result, WorkerEvent};
use crate::worker::{IngestionWorker, WorkerState};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::time::Duration;

/// Callbacks for a presentation layer; every method defaults to a no-op
pub trait MonitorObserver {
    /// An accepted frame, before it is recorded on a channel
    fn on_frame_received(&mut self, _elapsed: f64, _id: u32, _payload_hex: &str) {}

    /// A formatted entry was appended to a channel
    fn on_entry_appended(&mut self, _selector: Selector, _entry: &str) {}

    /// Auto-add created a dedicated channel
    fn on_channel_created(&mut self, _selector: Selector) {}

    /// The adapter failed mid-stream
    fn on_disconnected(&mut self, _reason: &str) {}

    /// `start` failed before any frame was read
    fn on_start_failed(&mut self, _error: &MonitorError) {}
}

/// Observer that ignores everything
impl MonitorObserver for () {}

/// Worker + registry, driven from one controller thread
pub struct Monitor<D: Driver> {
    worker: IngestionWorker<D>,
    events: Receiver<WorkerEvent>,
    registry: ChannelRegistry,
}

impl<D: Driver> Monitor<D> {
    pub fn new(driver: D, config: MonitorConfig) -> Self {
        let worker = IngestionWorker::new(driver, &config);
        let events = worker.events();
        Self {
            worker,
            events,
            registry: ChannelRegistry::new(config),
        }
    }

    /// Start a new ingestion run
    ///
    /// Events left over from a previous run are applied first, then every channel's
    /// clock is reset so the first delta of this run does not reference the last one.
    pub fn start(&mut self, bitrate: u32, observer: &mut dyn MonitorObserver) -> Result<()> {
        if self.worker.is_running() {
            let error = MonitorError::AlreadyRunning;
            observer.on_start_failed(&error);
            return Err(error);
        }

        self.pump(observer, Duration::ZERO);
        self.registry.reset_clocks();

        self.worker.start(bitrate).map_err(|error| {
            observer.on_start_failed(&error);
            error
        })
    }

    /// Stop the current run, if any
    pub fn stop(&mut self) {
        self.worker.stop();
    }

    /// Apply pending worker events
    ///
    /// Waits up to `wait` for the first event, then drains whatever else is queued
    /// without blocking. Returns the number of events handled.
    pub fn pump(&mut self, observer: &mut dyn MonitorObserver, wait: Duration) -> usize {
        let first = if wait.is_zero() {
            self.events.try_recv().ok()
        } else {
            match self.events.recv_timeout(wait) {
                Ok(event) => Some(event),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
            }
        };

        let Some(first) = first else {
            return 0;
        };

        self.apply(first, observer);
        let mut handled = 1;
        while let Ok(event) = self.events.try_recv() {
            self.apply(event, observer);
            handled += 1;
        }
        handled
    }

    fn apply(&mut self, event: WorkerEvent, observer: &mut dyn MonitorObserver) {
        match event {
            WorkerEvent::FrameReceived {
                elapsed,
                id,
                payload_hex,
            } => {
                observer.on_frame_received(elapsed, id, &payload_hex);
                let routed = self.registry.record_frame(elapsed, id, &payload_hex);
                observer.on_entry_appended(routed.selector, &routed.entry);
                if let Some(created) = routed.created {
                    observer.on_channel_created(Selector::Id(created));
                }
            }
            WorkerEvent::Disconnected { reason } => {
                observer.on_disconnected(&reason);
            }
        }
    }

    /// Create a dedicated channel; returns true if it did not exist yet
    pub fn ensure_channel(&mut self, selector: Selector) -> bool {
        self.registry.ensure_channel(selector).1
    }

    /// Remove a dedicated channel; the catch-all channel stays
    pub fn remove_channel(&mut self, selector: Selector) -> bool {
        self.registry.remove_channel(selector)
    }

    /// Clear one channel's entries and clock; returns false if it does not exist
    pub fn clear_channel(&mut self, selector: Selector) -> bool {
        match self.registry.get_mut(selector) {
            Some(channel) => {
                channel.clear();
                true
            }
            None => false,
        }
    }

    pub fn set_auto_add(&mut self, enabled: bool) {
        self.registry.set_auto_add(enabled);
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn state(&self) -> WorkerState {
        self.worker.state()
    }

    pub fn worker(&self) -> &IngestionWorker<D> {
        &self.worker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ScriptedDriver, Step};

    #[derive(Default)]
    struct Recorder {
        frames: Vec<(f64, u32, String)>,
        entries: Vec<(Selector, String)>,
        created: Vec<Selector>,
        disconnects: Vec<String>,
        start_failures: usize,
    }

    impl MonitorObserver for Recorder {
        fn on_frame_received(&mut self, elapsed: f64, id: u32, payload_hex: &str) {
            self.frames.push((elapsed, id, payload_hex.to_string()));
        }
        fn on_entry_appended(&mut self, selector: Selector, entry: &str) {
            self.entries.push((selector, entry.to_string()));
        }
        fn on_channel_created(&mut self, selector: Selector) {
            self.created.push(selector);
        }
        fn on_disconnected(&mut self, reason: &str) {
            self.disconnects.push(reason.to_string());
        }
        fn on_start_failed(&mut self, _error: &MonitorError) {
            self.start_failures += 1;
        }
    }

    fn pump_until(monitor: &mut Monitor<ScriptedDriver>, rec: &mut Recorder, frames: usize) {
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while rec.frames.len() < frames {
            assert!(std::time::Instant::now() < deadline, "timed out waiting for frames");
            monitor.pump(rec, Duration::from_millis(10));
        }
    }

    #[test]
    fn test_start_failure_is_reported() {
        let mut monitor = Monitor::new(ScriptedDriver::missing(), MonitorConfig::default());
        let mut rec = Recorder::default();
        assert!(monitor.start(500_000, &mut rec).is_err());
        assert_eq!(rec.start_failures, 1);
        assert_eq!(monitor.state(), WorkerState::Idle);
    }

    #[test]
    fn test_frames_reach_channels() {
        let driver = ScriptedDriver::new(vec![
            Step::frame(2.0, 0x100, &[0xAA]).unwrap(),
            Step::frame(2.5, 0x300, &[0xBB]).unwrap(),
        ]);
        let mut monitor = Monitor::new(driver, MonitorConfig::default());
        monitor.ensure_channel(Selector::Id(0x100));
        let mut rec = Recorder::default();

        monitor.start(500_000, &mut rec).unwrap();
        pump_until(&mut monitor, &mut rec, 2);
        monitor.stop();

        assert_eq!(rec.entries[0].0, Selector::Id(0x100));
        assert_eq!(rec.entries[1].0, Selector::CatchAll);
        assert_eq!(rec.entries[1].1, " +99.99s ID 0x300: [BB] 0.50s");
    }

    #[test]
    fn test_clear_and_remove() {
        let mut monitor = Monitor::new(ScriptedDriver::new(vec![]), MonitorConfig::default());
        assert!(monitor.ensure_channel(Selector::Id(0x10)));
        assert!(!monitor.ensure_channel(Selector::Id(0x10)));
        assert!(monitor.clear_channel(Selector::CatchAll));
        assert!(!monitor.clear_channel(Selector::Id(0x20)));
        assert!(!monitor.remove_channel(Selector::CatchAll));
        assert!(monitor.remove_channel(Selector::Id(0x10)));
        assert_eq!(monitor.registry().len(), 1);
    }

    #[test]
    fn test_disconnect_reaches_observer() {
        let driver = ScriptedDriver::new(vec![Step::Fail("usb gone".to_string())]);
        let mut monitor = Monitor::new(driver, MonitorConfig::default());
        let mut rec = Recorder::default();
        monitor.start(500_000, &mut rec).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while rec.disconnects.is_empty() {
            assert!(std::time::Instant::now() < deadline);
            monitor.pump(&mut rec, Duration::from_millis(10));
        }
        assert_eq!(rec.disconnects.len(), 1);
        assert_eq!(monitor.state(), WorkerState::Disconnected);
    }
}
