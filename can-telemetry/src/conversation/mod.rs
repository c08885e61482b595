//! ECU conversation: on-demand diagnostic queries
//!
//! Signals that are never broadcast are read by sending a single-frame query
//! on the configured send ID and decoding the single-frame answer arriving on
//! the response ID.
//!
//! Request:  `[request_size, mode, pid, filler x5]`
//! Response: `[byte_count, mode + 0x40, pid, value...]`

use crate::signals::registry::SignalDecoder;
use crate::types::{RawFrame, TelemetryError, MAX_PAYLOAD_LEN};
use std::time::Duration;

mod poller;

pub use poller::{ConversationPoller, ConversationState, PollerStats, TickOutcome};

/// Bytes before the value in a response: count, mode echo, pid echo
pub const RESPONSE_HEADER_LEN: usize = 3;

/// Largest value a single-frame response can carry
pub const MAX_RESPONSE_LEN: usize = MAX_PAYLOAD_LEN - RESPONSE_HEADER_LEN;

/// Added to the mode byte in a positive response
pub const MODE_ACK_OFFSET: u8 = 0x40;

/// Mode byte of a negative response
pub const NEGATIVE_RESPONSE_ID: u8 = 0x7F;

/// Default padding byte for unused request bytes
pub const DEFAULT_FILLER_BYTE: u8 = 0x55;

/// Default number of meaningful request bytes (mode + pid)
pub const DEFAULT_REQUEST_SIZE: u8 = 2;

/// One signal read through the conversation
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationSignalDefinition {
    pub name: String,
    /// Diagnostic service (e.g. 0x01 current data)
    pub mode_id: u8,
    /// Parameter ID within the mode
    pub parameter_id: u8,
    /// Value placed in byte 0 of the request
    pub request_size: u8,
    /// Number of value bytes handed to the decoder
    pub response_length: u8,
    pub decoder: SignalDecoder,
}

impl ConversationSignalDefinition {
    /// Create a definition; fails if the value cannot fit a single frame
    pub fn new(
        name: impl Into<String>,
        mode_id: u8,
        parameter_id: u8,
        response_length: u8,
        decoder: SignalDecoder,
    ) -> Result<Self, TelemetryError> {
        let name = name.into();
        if response_length as usize > MAX_RESPONSE_LEN {
            return Err(TelemetryError::Config(format!(
                "conversation signal '{}' expects {} value bytes, at most {} fit a single frame",
                name, response_length, MAX_RESPONSE_LEN
            )));
        }

        Ok(Self {
            name,
            mode_id,
            parameter_id,
            request_size: DEFAULT_REQUEST_SIZE,
            response_length,
            decoder,
        })
    }

    pub fn with_request_size(mut self, request_size: u8) -> Self {
        self.request_size = request_size;
        self
    }

    /// True if a response echoing `(mode_id, parameter_id)` carries this signal
    pub fn matches(&self, mode_id: u8, parameter_id: u8) -> bool {
        self.mode_id == mode_id && self.parameter_id == parameter_id
    }

    /// Build the 8-byte query frame for this signal
    pub fn build_request(&self, send_id: u32, filler: u8) -> RawFrame {
        let mut data = [filler; MAX_PAYLOAD_LEN];
        data[0] = self.request_size;
        data[1] = self.mode_id;
        data[2] = self.parameter_id;

        RawFrame {
            id: send_id,
            data: data.to_vec(),
        }
    }
}

/// Fixed identifiers and timing of the conversation
#[derive(Debug, Clone, PartialEq)]
pub struct PollerConfig {
    /// ID queries are sent on
    pub send_id: u32,
    /// ID the ECU answers on
    pub response_id: u32,
    /// Cadence of the outbound timer
    pub tick_period: Duration,
    /// How long a query may stay unanswered
    pub response_timeout: Duration,
    /// Padding byte for unused request bytes
    pub filler_byte: u8,
}

impl PollerConfig {
    pub fn new(send_id: u32, response_id: u32) -> Self {
        Self {
            send_id,
            response_id,
            tick_period: Duration::from_millis(10),
            response_timeout: Duration::from_millis(50),
            filler_byte: DEFAULT_FILLER_BYTE,
        }
    }

    pub fn with_tick_period(mut self, tick_period: Duration) -> Self {
        self.tick_period = tick_period;
        self
    }

    pub fn with_response_timeout(mut self, response_timeout: Duration) -> Self {
        self.response_timeout = response_timeout;
        self
    }

    pub fn with_filler_byte(mut self, filler_byte: u8) -> Self {
        self.filler_byte = filler_byte;
        self
    }
}

/// Parsed header of a diagnostic response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseHeader {
    /// `[count, mode + 0x40, pid, ...]`
    Positive {
        byte_count: u8,
        mode_id: u8,
        parameter_id: u8,
    },
    /// `[count, 0x7F, mode, code, ...]`
    Negative { mode_id: u8, code: u8 },
}

impl ResponseHeader {
    /// Parse and bound-check a response payload
    ///
    /// The ECU's self-reported byte count is never trusted: it must fit in
    /// what the frame actually carries after the header.
    pub fn parse(data: &[u8]) -> Result<Self, TelemetryError> {
        if data.len() < RESPONSE_HEADER_LEN {
            return Err(TelemetryError::MalformedResponse(format!(
                "{} bytes is shorter than the {}-byte header",
                data.len(),
                RESPONSE_HEADER_LEN
            )));
        }

        let byte_count = data[0];
        if byte_count as usize > data.len() - RESPONSE_HEADER_LEN {
            return Err(TelemetryError::MalformedResponse(format!(
                "reported {} value bytes but only {} follow the header",
                byte_count,
                data.len() - RESPONSE_HEADER_LEN
            )));
        }

        if data[1] == NEGATIVE_RESPONSE_ID {
            return Ok(ResponseHeader::Negative {
                mode_id: data[2],
                code: data.get(3).copied().unwrap_or(0),
            });
        }

        let mode_id = data[1].checked_sub(MODE_ACK_OFFSET).ok_or_else(|| {
            TelemetryError::MalformedResponse(format!(
                "mode byte 0x{:02X} is not a positive response",
                data[1]
            ))
        })?;

        Ok(ResponseHeader::Positive {
            byte_count,
            mode_id,
            parameter_id: data[2],
        })
    }
}
