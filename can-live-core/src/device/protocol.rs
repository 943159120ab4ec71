//! gs_usb wire structures
//!
//! Little-endian layouts of the control requests and bulk frames spoken by
//! candleLight-style adapters, plus the bit-timing solver used when configuring
//! a bitrate. Nothing here touches USB; the driver only moves the bytes.

use crate::types::{Frame, MonitorError, RawFrame, Result, MAX_PAYLOAD};
use byteorder::{ByteOrder, LittleEndian};

/// Known (vendor, product) pairs
pub const GS_USB_DEVICES: &[(u16, u16)] = &[
    (0x1D50, 0x606F), // gs_usb / candleLight
    (0x1209, 0x2323), // candleLight (pid.codes)
    (0x1CD2, 0x606F), // CES CANext FD
    (0x16D0, 0x10B8), // ABE CANdebugger FD
];

/// Bulk IN endpoint carrying received frames
pub const ENDPOINT_IN: u8 = 0x81;

/// Byte-order probe sent with HOST_FORMAT
pub const HOST_FORMAT: u32 = 0x0000_BEEF;

/// Vendor control requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Request {
    HostFormat = 0,
    BitTiming = 1,
    Mode = 2,
    BtConst = 4,
}

/// Mode word values
pub const MODE_RESET: u32 = 0;
pub const MODE_START: u32 = 1;

/// Mode flags
pub const FLAG_NORMAL: u32 = 0;
pub const FLAG_HW_TIMESTAMP: u32 = 1 << 4;

/// CAN id flag bits carried in the host frame
pub const CAN_EFF_FLAG: u32 = 0x8000_0000;
pub const CAN_ERR_FLAG: u32 = 0x2000_0000;
pub const CAN_EFF_MASK: u32 = 0x1FFF_FFFF;
pub const CAN_SFF_MASK: u32 = 0x0000_07FF;

/// Host frame size without the hardware timestamp
pub const HOST_FRAME_SIZE: usize = 20;

/// Host frame size with the trailing 32-bit microsecond timestamp
pub const HOST_FRAME_TS_SIZE: usize = 24;

/// A host frame as read from the bulk endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFrame {
    pub echo_id: u32,
    pub can_id: u32,
    pub can_dlc: u8,
    pub channel: u8,
    pub flags: u8,
    pub data: [u8; 8],
    /// Hardware timestamp in microseconds (wraps at 2^32)
    pub timestamp_us: Option<u32>,
}

impl HostFrame {
    /// Parse a host frame; returns `None` if the buffer is too short
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < HOST_FRAME_SIZE {
            return None;
        }

        let mut data = [0u8; 8];
        data.copy_from_slice(&buf[12..20]);

        let timestamp_us = if buf.len() >= HOST_FRAME_TS_SIZE {
            Some(LittleEndian::read_u32(&buf[20..24]))
        } else {
            None
        };

        Some(Self {
            echo_id: LittleEndian::read_u32(&buf[0..4]),
            can_id: LittleEndian::read_u32(&buf[4..8]),
            can_dlc: buf[8],
            channel: buf[9],
            flags: buf[10],
            data,
            timestamp_us,
        })
    }

    /// Identifier with the flag bits stripped
    pub fn identifier(&self) -> u32 {
        if self.can_id & CAN_EFF_FLAG != 0 {
            self.can_id & CAN_EFF_MASK
        } else {
            self.can_id & CAN_SFF_MASK
        }
    }

    pub fn is_extended(&self) -> bool {
        self.can_id & CAN_EFF_FLAG != 0
    }

    pub fn is_error_frame(&self) -> bool {
        self.can_id & CAN_ERR_FLAG != 0
    }

    /// Payload bytes, clamped to the classic CAN maximum
    pub fn payload(&self) -> &[u8] {
        let len = (self.can_dlc as usize).min(MAX_PAYLOAD);
        &self.data[..len]
    }

    /// Convert into a raw frame using an already unwrapped timestamp in seconds
    pub fn into_raw_frame(self, timestamp: f64) -> Result<RawFrame> {
        let frame = Frame::new(timestamp, self.identifier(), self.payload())?;
        Ok(RawFrame::echo(self.echo_id, frame))
    }
}

/// Largest prescaler the solver will try, whatever the device reports
pub const MAX_BRP: u32 = 1 << 16;

/// Bit-timing constraints reported by BT_CONST
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitTimingConst {
    pub feature: u32,
    pub fclk_can: u32,
    pub tseg1_min: u32,
    pub tseg1_max: u32,
    pub tseg2_min: u32,
    pub tseg2_max: u32,
    pub sjw_max: u32,
    pub brp_min: u32,
    pub brp_max: u32,
    pub brp_inc: u32,
}

impl BitTimingConst {
    pub const SIZE: usize = 40;

    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE {
            return None;
        }
        let word = |i: usize| LittleEndian::read_u32(&buf[i * 4..i * 4 + 4]);
        Some(Self {
            feature: word(0),
            fclk_can: word(1),
            tseg1_min: word(2),
            tseg1_max: word(3),
            tseg2_min: word(4),
            tseg2_max: word(5),
            sjw_max: word(6),
            brp_min: word(7),
            brp_max: word(8),
            brp_inc: word(9).max(1),
        })
    }

    /// Constraints of the common 48 MHz STM32 candleLight firmware
    pub fn candlelight() -> Self {
        Self {
            feature: 0,
            fclk_can: 48_000_000,
            tseg1_min: 1,
            tseg1_max: 16,
            tseg2_min: 1,
            tseg2_max: 8,
            sjw_max: 4,
            brp_min: 1,
            brp_max: 1024,
            brp_inc: 1,
        }
    }
}

/// BITTIMING request payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitTiming {
    pub prop_seg: u32,
    pub phase_seg1: u32,
    pub phase_seg2: u32,
    pub sjw: u32,
    pub brp: u32,
}

impl BitTiming {
    pub const SIZE: usize = 20;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        LittleEndian::write_u32(&mut buf[0..4], self.prop_seg);
        LittleEndian::write_u32(&mut buf[4..8], self.phase_seg1);
        LittleEndian::write_u32(&mut buf[8..12], self.phase_seg2);
        LittleEndian::write_u32(&mut buf[12..16], self.sjw);
        LittleEndian::write_u32(&mut buf[16..20], self.brp);
        buf
    }

    /// Time quanta per bit, including the sync segment
    pub fn total_tq(&self) -> u32 {
        1 + self.prop_seg + self.phase_seg1 + self.phase_seg2
    }

    /// Solve the bit timing for `bitrate` within the adapter's constraints
    ///
    /// Only exact bitrates are accepted. Among the exact solutions the one whose
    /// sample point is closest to 87.5% wins, preferring the smallest prescaler.
    pub fn for_bitrate(bitrate: u32, bt: &BitTimingConst) -> Result<Self> {
        if bitrate == 0 {
            return Err(MonitorError::BitrateRejected {
                bitrate,
                reason: "bitrate must be positive".to_string(),
            });
        }

        let min_tq = bt.tseg1_min.saturating_add(bt.tseg2_min).saturating_add(1);
        let max_tq = bt.tseg1_max.saturating_add(bt.tseg2_max).saturating_add(1);
        let brp_max = bt.brp_max.min(MAX_BRP);
        let mut best: Option<(u64, BitTiming)> = None;

        let mut brp = bt.brp_min.max(1);
        while brp <= brp_max {
            let divisor = brp as u64 * bitrate as u64;
            let fclk = bt.fclk_can as u64;
            if fclk % divisor == 0 {
                let total = (fclk / divisor) as u32;
                if (min_tq..=max_tq).contains(&total) {
                    if let Some(timing) = Self::split_segments(total, brp, bt) {
                        // Distance from 87.5% in per-mille
                        let sample =
                            (1000 * u64::from(total - timing.phase_seg2)) / u64::from(total);
                        let error = sample.abs_diff(875);
                        if best.map_or(true, |(e, _)| error < e) {
                            best = Some((error, timing));
                        }
                    }
                }
            }
            brp = match brp.checked_add(bt.brp_inc.max(1)) {
                Some(next) => next,
                None => break,
            };
        }

        best.map(|(_, timing)| timing).ok_or_else(|| MonitorError::BitrateRejected {
            bitrate,
            reason: format!(
                "no exact bit timing for a {} Hz CAN clock",
                bt.fclk_can
            ),
        })
    }

    fn split_segments(total: u32, brp: u32, bt: &BitTimingConst) -> Option<Self> {
        // Target 87.5% sample point: phase_seg2 is what remains after it
        let sample_tq = (u64::from(total) * 7 / 8) as u32;
        let tseg2 = (total - sample_tq).max(bt.tseg2_min).min(bt.tseg2_max);
        let tseg1 = total.checked_sub(1 + tseg2)?;
        if tseg1 < bt.tseg1_min || tseg1 > bt.tseg1_max {
            return None;
        }

        let prop_seg = tseg1 / 2;
        Some(Self {
            prop_seg,
            phase_seg1: tseg1 - prop_seg,
            phase_seg2: tseg2,
            sjw: tseg2.min(bt.sjw_max).max(1),
            brp,
        })
    }
}

/// MODE request payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceMode {
    pub mode: u32,
    pub flags: u32,
}

impl DeviceMode {
    pub const SIZE: usize = 8;

    pub fn start() -> Self {
        Self {
            mode: MODE_START,
            flags: FLAG_NORMAL | FLAG_HW_TIMESTAMP,
        }
    }

    pub fn reset() -> Self {
        Self {
            mode: MODE_RESET,
            flags: 0,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        LittleEndian::write_u32(&mut buf[0..4], self.mode);
        LittleEndian::write_u32(&mut buf[4..8], self.flags);
        buf
    }
}

/// Extends the 32-bit microsecond hardware counter across rollovers
#[derive(Debug, Clone, Default)]
pub struct TimestampUnwrapper {
    last: Option<u32>,
    wraps: u64,
}

impl TimestampUnwrapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next raw counter value and get seconds since counter zero
    pub fn unwrap(&mut self, raw_us: u32) -> f64 {
        if let Some(last) = self.last {
            // A large backwards jump means the counter wrapped
            if raw_us < last && last - raw_us > u32::MAX / 2 {
                self.wraps += 1;
            }
        }
        self.last = Some(raw_us);
        let micros = (self.wraps << 32) + raw_us as u64;
        micros as f64 / 1_000_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_frame_bytes(echo_id: u32, can_id: u32, data: &[u8], ts: u32) -> Vec<u8> {
        let mut buf = vec![0u8; HOST_FRAME_TS_SIZE];
        LittleEndian::write_u32(&mut buf[0..4], echo_id);
        LittleEndian::write_u32(&mut buf[4..8], can_id);
        buf[8] = data.len() as u8;
        buf[12..12 + data.len()].copy_from_slice(data);
        LittleEndian::write_u32(&mut buf[20..24], ts);
        buf
    }

    #[test]
    fn test_parse_standard_frame() {
        let buf = host_frame_bytes(0xFFFF_FFFF, 0x123, &[0xAA, 0xBB], 1_500_000);
        let frame = HostFrame::from_bytes(&buf).unwrap();
        assert_eq!(frame.identifier(), 0x123);
        assert!(!frame.is_extended());
        assert_eq!(frame.payload(), &[0xAA, 0xBB]);
        assert_eq!(frame.timestamp_us, Some(1_500_000));

        let raw = frame.into_raw_frame(1.5).unwrap();
        assert!(!raw.is_echo());
        assert_eq!(raw.frame.id(), 0x123);
        assert_eq!(raw.frame.payload_hex(), "AA BB");
    }

    #[test]
    fn test_parse_extended_frame_strips_flags() {
        let buf = host_frame_bytes(0xFFFF_FFFF, CAN_EFF_FLAG | 0x18DA_F110, &[1], 0);
        let frame = HostFrame::from_bytes(&buf).unwrap();
        assert!(frame.is_extended());
        assert_eq!(frame.identifier(), 0x18DA_F110);
    }

    #[test]
    fn test_echo_frame_keeps_echo_id() {
        let buf = host_frame_bytes(3, 0x100, &[], 0);
        let raw = HostFrame::from_bytes(&buf).unwrap().into_raw_frame(0.0).unwrap();
        assert!(raw.is_echo());
    }

    #[test]
    fn test_short_buffer_rejected() {
        assert!(HostFrame::from_bytes(&[0u8; 19]).is_none());
        let frame = HostFrame::from_bytes(&[0u8; HOST_FRAME_SIZE]).unwrap();
        assert_eq!(frame.timestamp_us, None);
    }

    #[test]
    fn test_dlc_is_clamped() {
        let mut buf = host_frame_bytes(0xFFFF_FFFF, 0x1, &[0; 8], 0);
        buf[8] = 15;
        let frame = HostFrame::from_bytes(&buf).unwrap();
        assert_eq!(frame.payload().len(), 8);
    }

    #[test]
    fn test_bit_timing_standard_rates() {
        let bt = BitTimingConst::candlelight();
        for bitrate in [125_000u32, 250_000, 500_000, 1_000_000] {
            let timing = BitTiming::for_bitrate(bitrate, &bt).unwrap();
            let actual = bt.fclk_can / (timing.brp * timing.total_tq());
            assert_eq!(actual, bitrate);
            assert!(timing.phase_seg2 >= bt.tseg2_min && timing.phase_seg2 <= bt.tseg2_max);
            assert!(timing.prop_seg + timing.phase_seg1 <= bt.tseg1_max);
        }
    }

    #[test]
    fn test_bit_timing_500k_sample_point() {
        let timing = BitTiming::for_bitrate(500_000, &BitTimingConst::candlelight()).unwrap();
        let total = timing.total_tq();
        let sample = (1000 * (total - timing.phase_seg2)) / total;
        assert_eq!(sample, 875);
    }

    #[test]
    fn test_bit_timing_rejects_unreachable_rates() {
        let bt = BitTimingConst::candlelight();
        assert!(matches!(
            BitTiming::for_bitrate(0, &bt),
            Err(MonitorError::BitrateRejected { bitrate: 0, .. })
        ));
        assert!(matches!(
            BitTiming::for_bitrate(7_000_000, &bt),
            Err(MonitorError::BitrateRejected { .. })
        ));
        assert!(matches!(
            BitTiming::for_bitrate(333_333, &bt),
            Err(MonitorError::BitrateRejected { .. })
        ));
    }

    #[test]
    fn test_bit_timing_with_extreme_constraints() {
        let bt = BitTimingConst {
            tseg1_max: u32::MAX,
            tseg2_max: u32::MAX,
            sjw_max: u32::MAX,
            brp_max: u32::MAX,
            ..BitTimingConst::candlelight()
        };

        let timing = BitTiming::for_bitrate(500_000, &bt).unwrap();
        assert_eq!(timing.brp, 1);
        assert_eq!(timing.total_tq(), 96);

        // Unreachable rates give up after the prescaler cap instead of spinning
        assert!(matches!(
            BitTiming::for_bitrate(333_333, &bt),
            Err(MonitorError::BitrateRejected { .. })
        ));
    }

    #[test]
    fn test_bt_const_layout() {
        let mut buf = [0u8; BitTimingConst::SIZE];
        for i in 0..10 {
            LittleEndian::write_u32(&mut buf[i * 4..i * 4 + 4], i as u32 + 1);
        }
        let bt = BitTimingConst::from_bytes(&buf).unwrap();
        assert_eq!(bt.fclk_can, 2);
        assert_eq!(bt.brp_inc, 10);
        assert!(BitTimingConst::from_bytes(&buf[..39]).is_none());
    }

    #[test]
    fn test_mode_bytes() {
        let bytes = DeviceMode::start().to_bytes();
        assert_eq!(LittleEndian::read_u32(&bytes[0..4]), MODE_START);
        assert_eq!(LittleEndian::read_u32(&bytes[4..8]), FLAG_HW_TIMESTAMP);
        assert_eq!(DeviceMode::reset().to_bytes(), [0u8; 8]);
    }

    #[test]
    fn test_timestamp_unwrapper_handles_rollover() {
        let mut ts = TimestampUnwrapper::new();
        assert_eq!(ts.unwrap(1_000_000), 1.0);
        let before = ts.unwrap(u32::MAX - 9);
        let after = ts.unwrap(10);
        assert!(after > before);
        assert!((after - before - 20e-6).abs() < 1e-9);
    }
}
