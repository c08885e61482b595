//! Signal decoders and the broadcast signal table
//!
//! This module contains the built-in decode registry, the configurable
//! bit-field decoder and the table mapping frame IDs to signals.

pub mod field;
pub mod location;
pub mod registry;

// Re-export key types for convenience
pub use field::{ByteOrder, FieldSpec};
pub use location::{BroadcastSignalEntry, SignalLocationTable, TableStats};
pub use registry::{SignalDecoder, SignalDefinition, SignalKind};
