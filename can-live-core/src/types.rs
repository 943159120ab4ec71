//! Core types shared by the adapter layer, the ingestion worker and the log channels
//!
//! This module defines the frame value type read from an adapter, the events the
//! ingestion worker publishes to the controller, and the error taxonomy.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for monitor operations
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Largest identifier representable by an extended (29-bit) CAN frame
pub const MAX_CAN_ID: u32 = 0x1FFF_FFFF;

/// Maximum payload of a classic CAN frame
pub const MAX_PAYLOAD: usize = 8;

/// Echo id the gs_usb firmware puts on genuinely received frames.
///
/// Any other value marks a loopback acknowledgement of a transmitted frame.
pub const RX_ECHO_ID: u32 = 0xFFFF_FFFF;

/// A received CAN frame
///
/// Immutable once constructed: the identifier is limited to 29 bits and the
/// payload to 8 bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    timestamp: f64,
    id: u32,
    payload: Vec<u8>,
}

impl Frame {
    /// Build a frame, rejecting identifiers above 29 bits and payloads above 8 bytes
    pub fn new(timestamp: f64, id: u32, payload: &[u8]) -> Result<Self> {
        if id > MAX_CAN_ID {
            return Err(MonitorError::InvalidFrame(format!(
                "CAN ID 0x{:X} exceeds 29 bits",
                id
            )));
        }
        if payload.len() > MAX_PAYLOAD {
            return Err(MonitorError::InvalidFrame(format!(
                "payload of {} bytes exceeds {}",
                payload.len(),
                MAX_PAYLOAD
            )));
        }
        Ok(Self {
            timestamp,
            id,
            payload: payload.to_vec(),
        })
    }

    /// Timestamp in seconds as reported by the adapter
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// CAN identifier (11 or 29 bit)
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Payload bytes
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload as uppercase hex pairs separated by single spaces ("AA 01 FF")
    pub fn payload_hex(&self) -> String {
        format_payload_hex(&self.payload)
    }
}

/// A frame as delivered by an adapter, still carrying its echo id
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    /// Firmware echo id (`RX_ECHO_ID` for received frames)
    pub echo_id: u32,
    /// The frame itself
    pub frame: Frame,
}

impl RawFrame {
    /// Wrap a genuinely received frame
    pub fn received(frame: Frame) -> Self {
        Self {
            echo_id: RX_ECHO_ID,
            frame,
        }
    }

    /// Wrap a loopback acknowledgement of a transmitted frame
    pub fn echo(echo_id: u32, frame: Frame) -> Self {
        Self { echo_id, frame }
    }

    /// True if this is an adapter echo rather than a bus frame
    pub fn is_echo(&self) -> bool {
        self.echo_id != RX_ECHO_ID
    }
}

/// Outcome of a single bounded read
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    /// A frame arrived within the timeout
    Frame(RawFrame),
    /// Nothing arrived; the caller may re-check its stop flag
    Timeout,
}

/// Events published by the ingestion worker, in acceptance order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerEvent {
    /// An accepted frame, with its session-relative time in seconds
    FrameReceived {
        elapsed: f64,
        id: u32,
        payload_hex: String,
    },

    /// The adapter failed mid-stream; no further frames follow for this run
    Disconnected { reason: String },
}

/// Errors raised by the adapter layer and the worker
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("No CAN adapter found")]
    DeviceNotFound,

    #[error("Bitrate {bitrate} rejected: {reason}")]
    BitrateRejected { bitrate: u32, reason: String },

    #[error("Failed to start adapter: {0}")]
    StartFailed(String),

    #[error("Adapter I/O failure: {0}")]
    IoFailure(String),

    #[error("Ingestion already running")]
    AlreadyRunning,

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.6}s 0x{:X} [{}]",
            self.timestamp,
            self.id,
            self.payload_hex()
        )
    }
}

/// Format bytes as uppercase two-digit hex pairs separated by single spaces
pub fn format_payload_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
