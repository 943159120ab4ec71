//! Ingestion worker
//!
//! Runs the device read loop on its own thread and publishes accepted frames as
//! [`WorkerEvent`]s over an ordered channel. The controller only ever talks to
//! the worker through `start`/`stop`; the loop never touches channel state.
//!
//! State machine: `Idle -> Running -> {Stopped, Disconnected}`. A stopped or
//! disconnected worker can be started again.

use crate::config::MonitorConfig;
use crate::device::{DeviceSession, Driver};
use crate::types::{MonitorError, ReadOutcome, Result, WorkerEvent};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Lifecycle of the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    /// Never started, or the last start failed before any run
    Idle = 0,
    /// Read loop active
    Running = 1,
    /// Stopped on request
    Stopped = 2,
    /// Read loop ended on an adapter failure
    Disconnected = 3,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => WorkerState::Running,
            2 => WorkerState::Stopped,
            3 => WorkerState::Disconnected,
            _ => WorkerState::Idle,
        }
    }
}

/// State shared between the controller and the read loop
#[derive(Debug, Clone)]
struct SharedState(Arc<AtomicU8>);

impl SharedState {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(WorkerState::Idle as u8)))
    }

    fn get(&self) -> WorkerState {
        WorkerState::from_u8(self.0.load(Ordering::SeqCst))
    }

    fn set(&self, state: WorkerState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    /// Move `from -> to`; returns false if the state was something else
    fn transition(&self, from: WorkerState, to: WorkerState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// Owns the driver and at most one running read loop
pub struct IngestionWorker<D: Driver> {
    driver: D,
    poll_timeout: Duration,
    events_tx: Sender<WorkerEvent>,
    events_rx: Receiver<WorkerEvent>,
    state: SharedState,
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl<D: Driver> IngestionWorker<D> {
    /// Create an idle worker
    pub fn new(driver: D, config: &MonitorConfig) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            driver,
            poll_timeout: config.poll_timeout(),
            events_tx,
            events_rx,
            state: SharedState::new(),
            stop_flag: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Receiving end of the event channel; events of all runs arrive in order
    pub fn events(&self) -> Receiver<WorkerEvent> {
        self.events_rx.clone()
    }

    pub fn state(&self) -> WorkerState {
        self.state.get()
    }

    pub fn is_running(&self) -> bool {
        self.state() == WorkerState::Running
    }

    /// The driver, e.g. to inspect a scripted one
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Open a device session and start the read loop
    ///
    /// Open failures are returned here and leave the state unchanged; failures
    /// after the loop is running arrive later as `WorkerEvent::Disconnected`.
    pub fn start(&mut self, bitrate: u32) -> Result<()> {
        if self.is_running() {
            return Err(MonitorError::AlreadyRunning);
        }
        // A disconnected loop has already finished; reap it
        self.join_loop();

        let session = match DeviceSession::open(&mut self.driver, bitrate) {
            Ok(session) => session,
            Err(e) => {
                log::error!("Failed to start ingestion at {} bit/s: {}", bitrate, e);
                return Err(e);
            }
        };

        // Fresh flag per run so a late stop of an old run can not leak into this one
        let stop_flag = Arc::new(AtomicBool::new(false));
        self.stop_flag = Arc::clone(&stop_flag);
        let previous = self.state.get();
        self.state.set(WorkerState::Running);

        let read_loop = ReadLoop {
            session,
            stop_flag,
            events: self.events_tx.clone(),
            state: self.state.clone(),
            poll_timeout: self.poll_timeout,
        };

        let spawned = thread::Builder::new()
            .name("can-ingest".to_string())
            .spawn(move || read_loop.run());

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                log::info!("Ingestion started at {} bit/s", bitrate);
                Ok(())
            }
            Err(e) => {
                // The closure, and with it the session, was dropped: hardware is stopped
                self.state.set(previous);
                Err(MonitorError::StartFailed(format!(
                    "spawn ingestion thread: {}",
                    e
                )))
            }
        }
    }

    /// Ask the read loop to exit and wait for it
    ///
    /// The loop notices the request at its next poll timeout. No `Disconnected`
    /// event is emitted for a requested stop.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        self.join_loop();
        if self.state.transition(WorkerState::Running, WorkerState::Stopped) {
            log::info!("Ingestion stopped");
        }
    }

    fn join_loop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Ingestion thread panicked");
                self.state.set(WorkerState::Disconnected);
            }
        }
    }
}

impl<D: Driver> Drop for IngestionWorker<D> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Everything the read loop owns on its thread
struct ReadLoop {
    session: DeviceSession,
    stop_flag: Arc<AtomicBool>,
    events: Sender<WorkerEvent>,
    state: SharedState,
    poll_timeout: Duration,
}

impl ReadLoop {
    fn run(mut self) {
        let mut clock = ElapsedClock::default();
        let mut echoes = 0u64;
        let mut accepted = 0u64;

        let failure = loop {
            if self.stop_flag.load(Ordering::SeqCst) {
                break None;
            }

            match self.session.read_frame(self.poll_timeout) {
                Ok(ReadOutcome::Timeout) => continue,
                Ok(ReadOutcome::Frame(raw)) => {
                    if raw.is_echo() {
                        echoes += 1;
                        log::trace!("Dropping echo frame (echo id {})", raw.echo_id);
                        continue;
                    }

                    let elapsed = clock.elapsed(raw.frame.timestamp());
                    accepted += 1;
                    let event = WorkerEvent::FrameReceived {
                        elapsed,
                        id: raw.frame.id(),
                        payload_hex: raw.frame.payload_hex(),
                    };
                    if self.events.send(event).is_err() {
                        log::debug!("Event receiver gone, ending read loop");
                        break None;
                    }
                }
                Err(e) => break Some(e),
            }
        };

        self.session.close();
        log::debug!(
            "Read loop finished: {} frames accepted, {} echoes dropped",
            accepted,
            echoes
        );

        if let Some(error) = failure {
            log::warn!("Adapter disconnected: {}", error);
            // State first, so a controller reacting to the event sees it
            self.state.set(WorkerState::Disconnected);
            let _ = self.events.send(WorkerEvent::Disconnected {
                reason: error.to_string(),
            });
        }
    }
}

/// Session-relative time: the first accepted frame of a run is t = 0
#[derive(Debug, Default)]
struct ElapsedClock {
    origin: Option<f64>,
    last: f64,
}

impl ElapsedClock {
    fn elapsed(&mut self, raw: f64) -> f64 {
        let origin = *self.origin.get_or_insert(raw);
        let elapsed = raw - origin;
        if elapsed < self.last {
            log::warn!(
                "Adapter timestamp went backwards ({:.6}s < {:.6}s), holding",
                elapsed,
                self.last
            );
            return self.last;
        }
        self.last = elapsed;
        elapsed
    }
}
