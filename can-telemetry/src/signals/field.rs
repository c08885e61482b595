//! Configurable bit-field decoding
//!
//! Extracts a raw integer from an arbitrary bit span of a payload and applies
//! factor/offset scaling. Used for signals whose layout is supplied by
//! configuration rather than by a built-in decoder, so bit positions can be
//! corrected against bus captures without a rebuild.

use crate::types::{DecodeError, SignalValue};
use serde::{Deserialize, Serialize};

/// Byte order for signal extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    /// Little-endian (Intel format)
    #[default]
    LittleEndian,
    /// Big-endian (Motorola format)
    BigEndian,
}

/// Layout and scaling of a bit-field signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Start bit in the payload
    pub start_bit: u16,
    /// Length in bits (1..=64)
    pub length: u16,
    #[serde(default)]
    pub byte_order: ByteOrder,
    /// Interpret the raw bits as two's complement
    #[serde(default)]
    pub signed: bool,
    /// Scale factor to convert raw value to physical value
    #[serde(default = "default_factor")]
    pub factor: f64,
    /// Offset to add after scaling
    #[serde(default)]
    pub offset: f64,
}

fn default_factor() -> f64 {
    1.0
}

impl FieldSpec {
    /// Unsigned, unscaled little-endian field
    pub fn new(start_bit: u16, length: u16) -> Self {
        Self {
            start_bit,
            length,
            byte_order: ByteOrder::LittleEndian,
            signed: false,
            factor: 1.0,
            offset: 0.0,
        }
    }

    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    pub fn with_signed(mut self, signed: bool) -> Self {
        self.signed = signed;
        self
    }

    pub fn with_scaling(mut self, factor: f64, offset: f64) -> Self {
        self.factor = factor;
        self.offset = offset;
        self
    }

    /// Check the layout is decodable within a classic CAN payload
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.length == 0 || self.length > 64 {
            return Err(format!("bit length {} must be within 1..=64", self.length));
        }
        if self.required_len() > crate::types::MAX_PAYLOAD_LEN {
            return Err(format!(
                "bits {}..{} do not fit in an 8-byte payload",
                self.start_bit,
                self.start_bit as usize + self.length as usize
            ));
        }
        Ok(())
    }

    /// Number of payload bytes the field spans
    pub fn required_len(&self) -> usize {
        (self.start_bit as usize + self.length as usize + 7) / 8
    }

    /// Decode the field into a typed value
    ///
    /// A single unscaled bit becomes a boolean, a scaled field a float and
    /// anything else an integer.
    pub fn decode(&self, data: &[u8]) -> Result<SignalValue, DecodeError> {
        let raw_value = self.extract_raw(data)?;

        if self.factor == 1.0 && self.offset == 0.0 && self.length == 1 {
            Ok(SignalValue::Boolean(raw_value != 0))
        } else if self.factor != 1.0 || self.offset != 0.0 {
            Ok(SignalValue::Float(self.offset + self.factor * (raw_value as f64)))
        } else {
            Ok(SignalValue::Integer(raw_value))
        }
    }

    /// Extract the raw (sign-extended if configured) value
    pub fn extract_raw(&self, data: &[u8]) -> Result<i64, DecodeError> {
        let required = self.required_len();
        if required > data.len() {
            return Err(DecodeError::ShortPayload {
                required,
                actual: data.len(),
            });
        }

        let start_bit = self.start_bit as usize;
        let length = (self.length as usize).min(64);

        let raw_value = match self.byte_order {
            ByteOrder::LittleEndian => extract_little_endian(data, start_bit, length),
            ByteOrder::BigEndian => extract_big_endian(data, start_bit, length),
        };

        Ok(if self.signed {
            sign_extend(raw_value, length)
        } else {
            raw_value as i64
        })
    }
}

/// Extract bits with little-endian (Intel) numbering
///
/// The start bit is the LSB; bits are counted from LSB to MSB within each
/// byte and byte 0 comes first.
fn extract_little_endian(data: &[u8], start_bit: usize, length: usize) -> u64 {
    let mut result: u64 = 0;

    for i in 0..length {
        let bit_pos = start_bit + i;
        let byte_idx = bit_pos / 8;
        let bit_in_byte = bit_pos % 8;

        if let Some(byte) = data.get(byte_idx) {
            let bit_value = (byte >> bit_in_byte) & 0x01;
            result |= (bit_value as u64) << i;
        }
    }

    result
}

/// Extract bits with big-endian (Motorola) numbering
///
/// Bit 0 is the MSB of byte 0 and the field grows towards higher bit numbers.
fn extract_big_endian(data: &[u8], start_bit: usize, length: usize) -> u64 {
    let mut result: u64 = 0;

    for i in 0..length {
        let bit_pos = start_bit + i;
        let byte_idx = bit_pos / 8;
        let bit_in_byte = 7 - (bit_pos % 8);

        if let Some(byte) = data.get(byte_idx) {
            let bit_value = (byte >> bit_in_byte) & 0x01;
            result |= (bit_value as u64) << (length - 1 - i);
        }
    }

    result
}

/// Sign-extend a value from N bits to 64 bits
fn sign_extend(value: u64, bit_length: usize) -> i64 {
    if bit_length == 0 || bit_length >= 64 {
        return value as i64;
    }

    let sign_bit = 1u64 << (bit_length - 1);
    if (value & sign_bit) != 0 {
        let mask = !0u64 << bit_length;
        (value | mask) as i64
    } else {
        value as i64
    }
}
