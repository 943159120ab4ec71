//! CAN Live Log Core Library
//!
//! Receives frames from a USB CAN adapter and keeps a live, per-identifier log
//! of them with human-readable inter-arrival times.
//!
//! # Architecture
//!
//! - `device`: adapter drivers and the exclusive [`DeviceSession`]
//! - `worker`: the [`IngestionWorker`], a read loop on its own thread that
//!   filters adapter echoes, normalizes timestamps to the start of the run and
//!   publishes [`WorkerEvent`]s in order
//! - `registry` / `channel`: the [`ChannelRegistry`] of bounded [`LogChannel`]s,
//!   one per identifier plus a catch-all
//! - `monitor`: the [`Monitor`], which applies worker events to the registry and
//!   notifies a presentation layer
//!
//! The library does NOT:
//! - Transmit frames (receive-only)
//! - Persist frames to disk
//! - Decode payloads above the raw bytes
//!
//! # Example Usage
//!
//! ```no_run
//! use can_live_core::{Monitor, MonitorConfig, Selector};
//! use can_live_core::device::GsUsbDriver;
//! use std::time::Duration;
//!
//! let mut monitor = Monitor::new(GsUsbDriver::new(), MonitorConfig::new());
//! monitor.ensure_channel(Selector::Id(0x7E8));
//! monitor.set_auto_add(true);
//!
//! monitor.start(500_000, &mut ()).unwrap();
//! loop {
//!     monitor.pump(&mut (), Duration::from_millis(50));
//!     if let Some(channel) = monitor.registry().get(Selector::Id(0x7E8)) {
//!         if let Some(entry) = channel.last_entry() {
//!             println!("{}: {}", channel.title(), entry);
//!         }
//!     }
//! }
//! ```

// Public modules
pub mod channel;
pub mod config;
pub mod device;
pub mod monitor;
pub mod registry;
pub mod types;
pub mod worker;

// Re-export main types for convenience
pub use channel::{LogChannel, Selector};
pub use config::{DeltaFormat, MonitorConfig};
pub use device::{CanAdapter, DeviceSession, Driver};
pub use monitor::{Monitor, MonitorObserver};
pub use registry::{parse_selector, ChannelRegistry, Routed};
pub use types::{
    format_payload_hex, Frame, MonitorError, RawFrame, ReadOutcome, Result, WorkerEvent,
};
pub use worker::{IngestionWorker, WorkerState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
