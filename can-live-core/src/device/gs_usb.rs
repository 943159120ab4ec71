//! gs_usb adapter driver
//!
//! Talks to candleLight / gs_usb firmware directly over USB using `nusb`: vendor
//! control requests for configuration, bulk IN transfers for received frames.
//! All transfers are driven synchronously with `MaybeFuture::wait`, so the
//! ingestion thread needs no async runtime.

use super::protocol::{
    BitTiming, BitTimingConst, DeviceMode, HostFrame, Request, TimestampUnwrapper, ENDPOINT_IN,
    GS_USB_DEVICES, HOST_FORMAT,
};
use super::{CanAdapter, Driver};
use crate::types::{MonitorError, ReadOutcome, Result};
use nusb::transfer::{Bulk, ControlIn, ControlOut, ControlType, In, Recipient};
use nusb::{Interface, MaybeFuture};
use std::time::{Duration, Instant};

/// Timeout for USB control transfers
const CONTROL_TIMEOUT: Duration = Duration::from_millis(1000);

/// Bulk IN request size (one full-speed packet)
const READ_SIZE: usize = 64;

/// Transfers kept in flight on the bulk IN endpoint
const READS_IN_FLIGHT: usize = 4;

/// Driver for the first gs_usb adapter found on the system
#[derive(Debug, Default, Clone)]
pub struct GsUsbDriver;

impl GsUsbDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Driver for GsUsbDriver {
    fn open(&mut self, bitrate: u32) -> Result<Box<dyn CanAdapter>> {
        log::debug!("Scanning for gs_usb adapters");

        let device_info = nusb::list_devices()
            .wait()
            .map_err(|e| MonitorError::StartFailed(format!("list USB devices: {}", e)))?
            .find(|dev| GS_USB_DEVICES.contains(&(dev.vendor_id(), dev.product_id())))
            .ok_or(MonitorError::DeviceNotFound)?;

        let name = format!(
            "{} ({:04x}:{:04x})",
            device_info.product_string().unwrap_or("gs_usb"),
            device_info.vendor_id(),
            device_info.product_id()
        );
        log::info!("Found adapter: {}", name);

        let device = device_info
            .open()
            .wait()
            .map_err(|e| MonitorError::StartFailed(format!("open {}: {}", name, e)))?;

        let interface = device
            .claim_interface(0)
            .wait()
            .map_err(|e| MonitorError::StartFailed(format!("claim {}: {}", name, e)))?;

        let mut link = UsbLink {
            interface,
            bulk_in: None,
        };
        bring_up(&mut link, bitrate)?;
        let UsbLink { interface, bulk_in } = link;
        let Some(bulk_in) = bulk_in else {
            let _ = control_out(&interface, Request::Mode, 0, &DeviceMode::reset().to_bytes());
            return Err(MonitorError::StartFailed(
                "bulk IN endpoint missing after start".to_string(),
            ));
        };

        Ok(Box::new(GsUsbAdapter {
            interface,
            bulk_in,
            clock: TimestampUnwrapper::new(),
            opened_at: Instant::now(),
            name,
        }))
    }
}

/// Steps of putting an adapter on the bus, in the order [`bring_up`] runs them
trait BringUp {
    fn host_format(&mut self) -> std::result::Result<(), String>;
    fn bt_const(&mut self) -> std::result::Result<BitTimingConst, String>;
    fn bit_timing(&mut self, timing: &BitTiming) -> std::result::Result<(), String>;
    /// Open the bulk IN endpoint and queue reads
    fn open_reads(&mut self) -> std::result::Result<(), String>;
    fn mode(&mut self, mode: DeviceMode) -> std::result::Result<(), String>;
}

/// Configure the adapter and start it
///
/// MODE start is the last step: every failure before it leaves the adapter in
/// reset, and nothing after it can fail.
fn bring_up(link: &mut impl BringUp, bitrate: u32) -> Result<()> {
    // 1. Byte order handshake
    link.host_format()
        .map_err(|e| MonitorError::StartFailed(format!("HOST_FORMAT: {}", e)))?;

    // 2. Bit timing derived from the adapter's own constraints
    let bt_const = link.bt_const().unwrap_or_else(|e| {
        log::warn!("BT_CONST query failed ({}), assuming 48 MHz candleLight", e);
        BitTimingConst::candlelight()
    });
    let timing = BitTiming::for_bitrate(bitrate, &bt_const)?;
    log::debug!("Bit timing for {} bit/s: {:?}", bitrate, timing);

    link.bit_timing(&timing)
        .map_err(|e| MonitorError::BitrateRejected {
            bitrate,
            reason: format!("BITTIMING refused: {}", e),
        })?;

    // 3. Reads queued before the bus starts
    link.open_reads()
        .map_err(|e| MonitorError::StartFailed(format!("open bulk IN endpoint: {}", e)))?;

    // 4. Start with hardware timestamps
    link.mode(DeviceMode::start())
        .map_err(|e| MonitorError::StartFailed(format!("MODE start: {}", e)))
}

struct UsbLink {
    interface: Interface,
    bulk_in: Option<nusb::Endpoint<Bulk, In>>,
}

impl BringUp for UsbLink {
    fn host_format(&mut self) -> std::result::Result<(), String> {
        control_out(&self.interface, Request::HostFormat, 1, &HOST_FORMAT.to_le_bytes())
    }

    fn bt_const(&mut self) -> std::result::Result<BitTimingConst, String> {
        read_bt_const(&self.interface)
    }

    fn bit_timing(&mut self, timing: &BitTiming) -> std::result::Result<(), String> {
        control_out(&self.interface, Request::BitTiming, 0, &timing.to_bytes())
    }

    fn open_reads(&mut self) -> std::result::Result<(), String> {
        let mut bulk_in = self
            .interface
            .endpoint::<Bulk, In>(ENDPOINT_IN)
            .map_err(|e| e.to_string())?;
        for _ in 0..READS_IN_FLIGHT {
            bulk_in.submit(bulk_in.allocate(READ_SIZE));
        }
        self.bulk_in = Some(bulk_in);
        Ok(())
    }

    fn mode(&mut self, mode: DeviceMode) -> std::result::Result<(), String> {
        control_out(&self.interface, Request::Mode, 0, &mode.to_bytes())
    }
}

struct GsUsbAdapter {
    interface: Interface,
    bulk_in: nusb::Endpoint<Bulk, In>,
    clock: TimestampUnwrapper,
    opened_at: Instant,
    name: String,
}

impl CanAdapter for GsUsbAdapter {
    fn read(&mut self, timeout: Duration) -> Result<ReadOutcome> {
        let Some(completion) = self.bulk_in.wait_next_complete(timeout) else {
            return Ok(ReadOutcome::Timeout);
        };

        completion.status.map_err(|e| {
            MonitorError::IoFailure(format!("{}: bulk transfer failed: {:?}", self.name, e))
        })?;

        let len = completion.actual_len;
        let host_frame = HostFrame::from_bytes(&completion.buffer[..len]);

        // Keep the endpoint fed for the next frame
        self.bulk_in.submit(self.bulk_in.allocate(READ_SIZE));

        let Some(host_frame) = host_frame else {
            log::trace!("Ignoring short bulk packet ({} bytes)", len);
            return Ok(ReadOutcome::Timeout);
        };
        if host_frame.is_error_frame() {
            log::debug!("Error frame from {}: class 0x{:X}", self.name, host_frame.identifier());
        } else if host_frame.is_extended() {
            log::trace!("Extended frame 0x{:X}", host_frame.identifier());
        }

        let timestamp = match host_frame.timestamp_us {
            Some(raw_us) => self.clock.unwrap(raw_us),
            // Firmware without timestamp support: fall back to the host clock
            None => self.opened_at.elapsed().as_secs_f64(),
        };

        Ok(ReadOutcome::Frame(host_frame.into_raw_frame(timestamp)?))
    }

    fn stop(&mut self) -> Result<()> {
        self.bulk_in.cancel_all();
        control_out(&self.interface, Request::Mode, 0, &DeviceMode::reset().to_bytes())
            .map_err(|e| MonitorError::IoFailure(format!("MODE reset: {}", e)))
    }
}

fn control_out(
    interface: &Interface,
    request: Request,
    value: u16,
    data: &[u8],
) -> std::result::Result<(), String> {
    interface
        .control_out(
            ControlOut {
                control_type: ControlType::Vendor,
                recipient: Recipient::Interface,
                request: request as u8,
                value,
                index: 0,
                data,
            },
            CONTROL_TIMEOUT,
        )
        .wait()
        .map_err(|e| format!("{:?}", e))
}

fn read_bt_const(interface: &Interface) -> std::result::Result<BitTimingConst, String> {
    let data = interface
        .control_in(
            ControlIn {
                control_type: ControlType::Vendor,
                recipient: Recipient::Interface,
                request: Request::BtConst as u8,
                value: 0,
                index: 0,
                length: BitTimingConst::SIZE as u16,
            },
            CONTROL_TIMEOUT,
        )
        .wait()
        .map_err(|e| format!("{:?}", e))?;

    BitTimingConst::from_bytes(&data).ok_or_else(|| {
        format!(
            "incomplete response: got {} bytes, expected {}",
            data.len(),
            BitTimingConst::SIZE
        )
    })
}
