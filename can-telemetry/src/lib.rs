//! CAN Telemetry Library
//!
//! Decodes a vehicle's CAN traffic into named telemetry signals and polls the
//! ECU for the signals it never broadcasts.
//!
//! # Architecture
//!
//! - Broadcast frames are routed by ID to table-driven decoders
//! - On-demand signals are read through a single-outstanding-request
//!   diagnostic conversation with timeout recovery
//! - Decoded values land in a last-known-value store that notifies observers
//!   and channel subscribers
//!
//! Bus bring-up, gauge rendering and persistence are left to the application
//! layer (can-telemetry-cli).
//!
//! # Example Usage
//!
//! ```no_run
//! use can_telemetry::{TelemetryConfig, TelemetryService, VirtualBus};
//! use std::sync::Arc;
//!
//! let config = TelemetryConfig::from_toml_str(r#"
//!     [can_ids]
//!     rpm = 0x141
//!
//!     [[current_data]]
//!     name = "engine_load"
//!     pid = 0x04
//!     response_length = 1
//! "#).unwrap();
//!
//! let (core_end, _car_end) = VirtualBus::pair("vcan0");
//! let running = TelemetryService::new(&config, Arc::new(core_end))
//!     .unwrap()
//!     .start()
//!     .unwrap();
//!
//! for event in running.store().subscribe().iter().take(10) {
//!     println!("{} = {}", event.signal_name, event.value);
//! }
//!
//! running.shutdown().unwrap();
//! ```

// Public modules
pub mod bus;
pub mod config;
pub mod conversation;
pub mod derived;
pub mod dispatcher;
pub mod service;
pub mod signals;
pub mod simulator;
pub mod store;
pub mod types;

// Re-export main types for convenience
pub use bus::{CanBus, VirtualBus};
#[cfg(feature = "socketcan")]
pub use bus::SocketCanBus;
pub use config::{CurrentDataConfig, FieldSignalConfig, TelemetryConfig};
pub use conversation::{
    ConversationPoller, ConversationSignalDefinition, ConversationState, PollerConfig, PollerStats,
    TickOutcome,
};
pub use derived::{Drivetrain, GearEstimator};
pub use dispatcher::{DispatchOutcome, FrameDispatcher};
pub use service::{RunningService, TelemetryService};
pub use signals::{FieldSpec, SignalDecoder, SignalDefinition, SignalKind, SignalLocationTable};
pub use simulator::{SimulatedCar, SimulationStep};
pub use store::{CarStateStore, StoredValue};
pub use types::{
    BusError, DecodeError, DecodedEvent, RawFrame, Result, SignalValue, TelemetryError, Timestamp,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
