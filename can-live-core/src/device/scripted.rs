//! Scripted in-memory driver
//!
//! Replays a fixed list of [`Step`]s instead of talking to hardware. Used by the
//! tests and by the CLI's demo mode. Clones of a driver share their counters, so a
//! test can keep a handle while the worker owns the driver.

use super::{CanAdapter, Driver};
use crate::types::{Frame, MonitorError, RawFrame, ReadOutcome, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted adapter action
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Deliver a frame immediately
    Frame(RawFrame),
    /// Report one read timeout
    Timeout,
    /// Stay silent for this long (spread over several timeouts)
    Idle(Duration),
    /// Fail the read, as an unplugged cable would
    Fail(String),
}

impl Step {
    /// A genuinely received frame
    pub fn frame(timestamp: f64, id: u32, payload: &[u8]) -> Result<Self> {
        Ok(Step::Frame(RawFrame::received(Frame::new(timestamp, id, payload)?)))
    }

    /// An adapter echo of a transmitted frame
    pub fn echo(echo_id: u32, timestamp: f64, id: u32, payload: &[u8]) -> Result<Self> {
        Ok(Step::Frame(RawFrame::echo(echo_id, Frame::new(timestamp, id, payload)?)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum OpenBehavior {
    Succeed,
    NotFound,
    StartFails,
}

#[derive(Debug, Default)]
struct Counters {
    opened: AtomicUsize,
    stopped: AtomicUsize,
}

/// Driver whose adapters replay scripted steps
#[derive(Debug, Clone)]
pub struct ScriptedDriver {
    runs: Arc<Mutex<VecDeque<Vec<Step>>>>,
    repeat: Option<Vec<Step>>,
    max_bitrate: u32,
    behavior: OpenBehavior,
    counters: Arc<Counters>,
}

impl ScriptedDriver {
    /// Every open replays `steps`
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            runs: Arc::new(Mutex::new(VecDeque::new())),
            repeat: Some(steps),
            max_bitrate: 1_000_000,
            behavior: OpenBehavior::Succeed,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Each open replays the next run; once they are used up adapters stay silent
    pub fn with_runs(runs: Vec<Vec<Step>>) -> Self {
        let mut driver = Self::new(Vec::new());
        driver.repeat = None;
        driver.runs = Arc::new(Mutex::new(runs.into_iter().collect()));
        driver
    }

    /// A driver that never finds an adapter
    pub fn missing() -> Self {
        let mut driver = Self::new(Vec::new());
        driver.behavior = OpenBehavior::NotFound;
        driver
    }

    /// A driver whose adapter refuses to start
    pub fn failing_start() -> Self {
        let mut driver = Self::new(Vec::new());
        driver.behavior = OpenBehavior::StartFails;
        driver
    }

    /// Reject bitrates above `max`
    pub fn with_max_bitrate(mut self, max: u32) -> Self {
        self.max_bitrate = max;
        self
    }

    /// Number of successful opens so far
    pub fn opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    /// Number of times an adapter was stopped
    pub fn stopped(&self) -> usize {
        self.counters.stopped.load(Ordering::SeqCst)
    }

    fn next_script(&self) -> Vec<Step> {
        if let Some(steps) = &self.repeat {
            return steps.clone();
        }
        match self.runs.lock() {
            Ok(mut runs) => runs.pop_front().unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }
}

impl Driver for ScriptedDriver {
    fn open(&mut self, bitrate: u32) -> Result<Box<dyn CanAdapter>> {
        match self.behavior {
            OpenBehavior::NotFound => return Err(MonitorError::DeviceNotFound),
            OpenBehavior::StartFails => {
                return Err(MonitorError::StartFailed("scripted start failure".to_string()))
            }
            OpenBehavior::Succeed => {}
        }

        if bitrate == 0 || bitrate > self.max_bitrate {
            return Err(MonitorError::BitrateRejected {
                bitrate,
                reason: format!("supported range is 1..={}", self.max_bitrate),
            });
        }

        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedAdapter {
            steps: self.next_script().into(),
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct ScriptedAdapter {
    steps: VecDeque<Step>,
    counters: Arc<Counters>,
}

impl CanAdapter for ScriptedAdapter {
    fn read(&mut self, timeout: Duration) -> Result<ReadOutcome> {
        match self.steps.pop_front() {
            Some(Step::Frame(frame)) => Ok(ReadOutcome::Frame(frame)),
            Some(Step::Fail(reason)) => Err(MonitorError::IoFailure(reason)),
            Some(Step::Idle(remaining)) => {
                let slept = remaining.min(timeout);
                std::thread::sleep(slept);
                if remaining > slept {
                    self.steps.push_front(Step::Idle(remaining - slept));
                }
                Ok(ReadOutcome::Timeout)
            }
            Some(Step::Timeout) | None => {
                std::thread::sleep(timeout);
                Ok(ReadOutcome::Timeout)
            }
        }
    }

    fn stop(&mut self) -> Result<()> {
        self.counters.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Synthetic bus traffic for demo mode
///
/// Three periodic identifiers paced in real time, with an adapter echo mixed in
/// now and then. Timestamps start at an arbitrary adapter uptime.
pub fn demo_traffic(frames: usize) -> Result<Vec<Step>> {
    const TICK: f64 = 0.010;
    let start = 1234.5;
    let mut steps = Vec::with_capacity(frames * 2);

    for n in 0..frames {
        let t = start + n as f64 * TICK;
        let counter = (n & 0xFF) as u8;
        steps.push(Step::frame(t, 0x100, &[counter, 0x00, 0x10, 0x27])?);
        if n % 10 == 0 {
            steps.push(Step::frame(t + 0.0004, 0x200, &[0xCC, counter])?);
        }
        if n % 50 == 25 {
            steps.push(Step::frame(t + 0.0007, 0x7E8, &[0x02, 0x41, 0x0C, counter, 0x20])?);
            steps.push(Step::echo(0, t + 0.0008, 0x7E0, &[0x02, 0x01, 0x0C])?);
        }
        steps.push(Step::Idle(Duration::from_secs_f64(TICK)));
    }

    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(adapter: &mut Box<dyn CanAdapter>, n: usize) -> Vec<Result<ReadOutcome>> {
        (0..n).map(|_| adapter.read(Duration::from_millis(1))).collect()
    }

    #[test]
    fn test_replays_steps_in_order() {
        let mut driver = ScriptedDriver::new(vec![
            Step::frame(1.0, 0x100, &[0xAA]).unwrap(),
            Step::Timeout,
            Step::Fail("unplugged".to_string()),
        ]);
        let mut adapter = driver.open(500_000).unwrap();
        let results = read_all(&mut adapter, 4);
        assert!(matches!(results[0], Ok(ReadOutcome::Frame(_))));
        assert!(matches!(results[1], Ok(ReadOutcome::Timeout)));
        assert!(matches!(results[2], Err(MonitorError::IoFailure(_))));
        assert!(matches!(results[3], Ok(ReadOutcome::Timeout)));
    }

    #[test]
    fn test_runs_are_consumed_per_open() {
        let mut driver = ScriptedDriver::with_runs(vec![
            vec![Step::frame(1.0, 0x1, &[]).unwrap()],
            vec![Step::Fail("gone".to_string())],
        ]);
        let mut first = driver.open(500_000).unwrap();
        assert!(matches!(first.read(Duration::from_millis(1)), Ok(ReadOutcome::Frame(_))));
        let mut second = driver.open(500_000).unwrap();
        assert!(second.read(Duration::from_millis(1)).is_err());
        let mut third = driver.open(500_000).unwrap();
        assert!(matches!(third.read(Duration::from_millis(1)), Ok(ReadOutcome::Timeout)));
        assert_eq!(driver.opened(), 3);
    }

    #[test]
    fn test_idle_is_split_across_timeouts() {
        let mut driver = ScriptedDriver::new(vec![
            Step::Idle(Duration::from_millis(3)),
            Step::frame(1.0, 0x1, &[]).unwrap(),
        ]);
        let mut adapter = driver.open(500_000).unwrap();
        let results = read_all(&mut adapter, 4);
        assert!(results[..3].iter().all(|r| matches!(r, Ok(ReadOutcome::Timeout))));
        assert!(matches!(results[3], Ok(ReadOutcome::Frame(_))));
    }

    #[test]
    fn test_open_failures() {
        assert!(matches!(
            ScriptedDriver::missing().open(500_000),
            Err(MonitorError::DeviceNotFound)
        ));
        assert!(matches!(
            ScriptedDriver::failing_start().open(500_000),
            Err(MonitorError::StartFailed(_))
        ));
        assert!(matches!(
            ScriptedDriver::new(vec![]).with_max_bitrate(500_000).open(1_000_000),
            Err(MonitorError::BitrateRejected { bitrate: 1_000_000, .. })
        ));
    }

    #[test]
    fn test_clones_share_counters() {
        let driver = ScriptedDriver::new(vec![]);
        let mut clone = driver.clone();
        let mut adapter = clone.open(125_000).unwrap();
        adapter.stop().unwrap();
        assert_eq!(driver.opened(), 1);
        assert_eq!(driver.stopped(), 1);
    }

    #[test]
    fn test_demo_traffic_contains_echoes() {
        let steps = demo_traffic(100).unwrap();
        let echoes = steps
            .iter()
            .filter(|s| matches!(s, Step::Frame(f) if f.is_echo()))
            .count();
        assert_eq!(echoes, 2);
    }
}
