//! Adapter layer
//!
//! A [`Driver`] opens an adapter at a bitrate; the resulting [`CanAdapter`] is
//! wrapped in a [`DeviceSession`], which owns it exclusively and guarantees the
//! hardware is stopped exactly once.
//!
//! Drivers:
//! - `gs_usb` (feature `gs-usb`): candleLight / gs_usb firmware over USB
//! - `scripted`: deterministic in-memory adapter for tests and demos

use crate::types::{ReadOutcome, Result};
use std::time::Duration;

pub mod protocol;
pub mod scripted;

#[cfg(feature = "gs-usb")]
pub mod gs_usb;

#[cfg(feature = "gs-usb")]
pub use gs_usb::GsUsbDriver;
pub use scripted::{ScriptedDriver, Step};

/// An opened, started adapter
pub trait CanAdapter: Send {
    /// Block up to `timeout` for the next frame
    fn read(&mut self, timeout: Duration) -> Result<ReadOutcome>;

    /// Stop the hardware. Called at most once by `DeviceSession`.
    fn stop(&mut self) -> Result<()>;
}

/// Something that can locate and start an adapter
pub trait Driver {
    /// Claim the first available adapter, configure `bitrate` and start it
    fn open(&mut self, bitrate: u32) -> Result<Box<dyn CanAdapter>>;
}

/// Exclusive handle on a started adapter
pub struct DeviceSession {
    adapter: Box<dyn CanAdapter>,
    active: bool,
}

impl DeviceSession {
    /// Open an adapter through `driver`
    ///
    /// Fails with `DeviceNotFound`, `BitrateRejected` or `StartFailed`; on failure no
    /// session exists and nothing needs closing.
    pub fn open<D: Driver + ?Sized>(driver: &mut D, bitrate: u32) -> Result<Self> {
        if bitrate == 0 {
            return Err(crate::types::MonitorError::BitrateRejected {
                bitrate,
                reason: "bitrate must be positive".to_string(),
            });
        }

        let adapter = driver.open(bitrate)?;
        log::info!("Device session active at {} bit/s", bitrate);
        Ok(Self {
            adapter,
            active: true,
        })
    }

    /// Read one frame, or `Timeout` if none arrived within `timeout`
    pub fn read_frame(&mut self, timeout: Duration) -> Result<ReadOutcome> {
        if !self.active {
            return Err(crate::types::MonitorError::IoFailure(
                "device session is closed".to_string(),
            ));
        }
        self.adapter.read(timeout)
    }

    /// Stop the hardware; later calls do nothing
    pub fn close(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        match self.adapter.stop() {
            Ok(()) => log::info!("Device session closed"),
            // The adapter may already be gone (e.g. unplugged)
            Err(e) => log::debug!("Error while stopping adapter: {}", e),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.close();
    }
}
