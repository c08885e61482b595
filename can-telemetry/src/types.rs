//! Core types for the CAN telemetry library
//!
//! This module defines the frames the core consumes, the values it produces and
//! the error taxonomy shared by the decoder, the dispatcher and the conversation
//! poller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp type used throughout the library
pub type Timestamp = DateTime<Utc>;

/// Result type for library operations
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Maximum payload length of a classic CAN frame
pub const MAX_PAYLOAD_LEN: usize = 8;

/// Highest standard (11-bit) CAN identifier
pub const MAX_STANDARD_ID: u32 = 0x7FF;

/// Raw CAN frame as delivered by a bus collaborator
///
/// Frames are immutable once built and consumed exactly once by the
/// dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// CAN arbitration ID
    pub id: u32,
    /// Frame data bytes (0-8 bytes)
    pub data: Vec<u8>,
}

impl RawFrame {
    /// Build a frame, rejecting payloads longer than a classic CAN frame
    pub fn new(id: u32, data: &[u8]) -> Result<Self> {
        if data.len() > MAX_PAYLOAD_LEN {
            return Err(TelemetryError::InvalidFrame(format!(
                "payload of {} bytes exceeds {} bytes (ID 0x{:X})",
                data.len(),
                MAX_PAYLOAD_LEN,
                id
            )));
        }

        Ok(Self {
            id,
            data: data.to_vec(),
        })
    }

    /// Get the data length code (DLC) - number of data bytes
    pub fn dlc(&self) -> usize {
        self.data.len()
    }

    /// True if the ID fits in a standard 11-bit identifier
    pub fn is_standard(&self) -> bool {
        self.id <= MAX_STANDARD_ID
    }
}

impl fmt::Display for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:03X} [{}]", self.id, self.data.len())?;
        for byte in &self.data {
            write!(f, " {:02X}", byte)?;
        }
        Ok(())
    }
}

/// Failure of a single signal decode
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Payload too short: signal needs {required} bytes, frame has {actual}")]
    ShortPayload { required: usize, actual: usize },
}

/// Transport-level failures of a bus collaborator
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Failed to open CAN interface '{interface}': {source}")]
    Open {
        interface: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to send frame: {0}")]
    Send(String),

    #[error("Failed to receive frame: {0}")]
    Receive(String),

    #[error("Frame ID 0x{0:X} is not a standard 11-bit identifier")]
    InvalidId(u32),

    #[error("Bus disconnected")]
    Disconnected,
}

/// Errors that can occur in the telemetry core
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Malformed diagnostic response: {0}")]
    MalformedResponse(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Unknown signal: {0}")]
    UnknownSignal(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Signal value types produced by the decoders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalValue {
    /// Boolean value (single flag bit)
    Boolean(bool),
    /// Signed integer value
    Integer(i64),
    /// Floating-point value (after scaling/offset)
    Float(f64),
    /// Small fixed-size group of flags (e.g. left/right turn signals)
    Flags(Vec<bool>),
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalValue::Integer(v) => write!(f, "{}", v),
            SignalValue::Float(v) => write!(f, "{:.3}", v),
            SignalValue::Boolean(v) => write!(f, "{}", if *v { "true" } else { "false" }),
            SignalValue::Flags(flags) => {
                write!(f, "[")?;
                for (i, flag) in flags.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", if *flag { 1 } else { 0 })?;
                }
                write!(f, "]")
            }
        }
    }
}

impl SignalValue {
    /// Convert signal value to f64 (flag groups count their set flags)
    pub fn as_f64(&self) -> f64 {
        match self {
            SignalValue::Integer(v) => *v as f64,
            SignalValue::Float(v) => *v,
            SignalValue::Boolean(v) => if *v { 1.0 } else { 0.0 },
            SignalValue::Flags(flags) => flags.iter().filter(|f| **f).count() as f64,
        }
    }

    /// Convert signal value to i64 if possible
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SignalValue::Integer(v) => Some(*v),
            SignalValue::Float(v) => Some(*v as i64),
            SignalValue::Boolean(v) => Some(if *v { 1 } else { 0 }),
            SignalValue::Flags(_) => None,
        }
    }

    /// Check if this is a boolean value (any set flag counts as true)
    pub fn as_bool(&self) -> bool {
        match self {
            SignalValue::Boolean(v) => *v,
            SignalValue::Integer(v) => *v != 0,
            SignalValue::Float(v) => *v != 0.0,
            SignalValue::Flags(flags) => flags.iter().any(|f| *f),
        }
    }
}

/// One successfully decoded signal value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedEvent {
    /// Signal name from the signal tables
    pub signal_name: String,
    /// Decoded engineering value
    pub value: SignalValue,
    /// Wall-clock time the frame was decoded
    pub observed_at: Timestamp,
}

impl DecodedEvent {
    pub fn new(signal_name: impl Into<String>, value: SignalValue, observed_at: Timestamp) -> Self {
        Self {
            signal_name: signal_name.into(),
            value,
            observed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_value_conversions() {
        let int_val = SignalValue::Integer(42);
        assert_eq!(int_val.as_f64(), 42.0);
        assert_eq!(int_val.as_i64(), Some(42));
        assert!(int_val.as_bool());

        let float_val = SignalValue::Float(3.25);
        assert_eq!(float_val.as_f64(), 3.25);
        assert_eq!(float_val.as_i64(), Some(3));

        let bool_val = SignalValue::Boolean(true);
        assert_eq!(bool_val.as_f64(), 1.0);
        assert!(bool_val.as_bool());

        let flags = SignalValue::Flags(vec![true, false, true]);
        assert_eq!(flags.as_f64(), 2.0);
        assert_eq!(flags.as_i64(), None);
        assert!(flags.as_bool());
        assert!(!SignalValue::Flags(vec![false, false]).as_bool());
    }

    #[test]
    fn test_signal_value_display() {
        assert_eq!(format!("{}", SignalValue::Integer(42)), "42");
        assert_eq!(format!("{}", SignalValue::Float(1.23456)), "1.235");
        assert_eq!(format!("{}", SignalValue::Boolean(true)), "true");
        assert_eq!(format!("{}", SignalValue::Flags(vec![true, false])), "[1, 0]");
    }

    #[test]
    fn test_frame_rejects_oversize_payload() {
        assert!(RawFrame::new(0x100, &[0; 8]).is_ok());
        assert!(matches!(
            RawFrame::new(0x100, &[0; 9]),
            Err(TelemetryError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_frame_display() {
        let frame = RawFrame::new(0x7E8, &[0x03, 0x41, 0x0D]).unwrap();
        assert_eq!(frame.to_string(), "0x7E8 [3] 03 41 0D");
        assert!(frame.is_standard());
        assert_eq!(frame.dlc(), 3);
    }
}
