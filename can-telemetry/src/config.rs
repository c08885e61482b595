//! Telemetry configuration types
//!
//! Serde schema of the broadcast signal table, the on-demand poll cycle and
//! the conversation settings. The config is parsed once and turned into the
//! immutable tables handed to the dispatcher and poller.

use crate::conversation::{
    ConversationSignalDefinition, PollerConfig, DEFAULT_FILLER_BYTE, DEFAULT_REQUEST_SIZE,
};
use crate::derived::{Drivetrain, GearEstimator, ESTIMATED_GEAR};
use crate::signals::{ByteOrder, FieldSpec, SignalDecoder, SignalDefinition, SignalKind, SignalLocationTable};
use crate::types::{Result, TelemetryError, MAX_STANDARD_ID};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

/// Mode name used when a poll entry does not name one
pub const CURRENT_DATA_MODE: &str = "current_data";

/// Top-level telemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Diagnostic request/response identifiers
    #[serde(default)]
    pub conversation_ids: ConversationIds,

    /// Diagnostic mode name -> mode byte
    #[serde(default = "default_mode_ids")]
    pub mode_ids: BTreeMap<String, u8>,

    /// Poller timing and padding
    #[serde(default)]
    pub conversation: ConversationSettings,

    /// Built-in broadcast signal name -> frame ID
    #[serde(default)]
    pub can_ids: BTreeMap<String, u32>,

    /// Ordered poll cycle of on-demand signals
    #[serde(default)]
    pub current_data: Vec<CurrentDataConfig>,

    /// Custom bit-field signals
    #[serde(default)]
    pub fields: BTreeMap<String, FieldSignalConfig>,

    #[serde(default)]
    pub derived: DerivedConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            conversation_ids: ConversationIds::default(),
            mode_ids: default_mode_ids(),
            conversation: ConversationSettings::default(),
            can_ids: BTreeMap::new(),
            current_data: Vec::new(),
            fields: BTreeMap::new(),
            derived: DerivedConfig::default(),
        }
    }
}

/// Send and response IDs of the diagnostic conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationIds {
    pub send_id: u32,
    pub ecu_response_id: u32,
}

impl Default for ConversationIds {
    fn default() -> Self {
        Self {
            send_id: 0x7E0,
            ecu_response_id: 0x7E8,
        }
    }
}

/// Poller timing settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationSettings {
    /// Cadence of the outbound timer in milliseconds (default: 10ms)
    #[serde(default = "default_tick_period")]
    pub tick_period_ms: u64,

    /// Time a query may stay unanswered in milliseconds (default: 50ms)
    #[serde(default = "default_response_timeout")]
    pub response_timeout_ms: u64,

    /// Padding byte for unused request bytes (default: 0x55)
    #[serde(default = "default_filler_byte")]
    pub filler_byte: u8,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            tick_period_ms: default_tick_period(),
            response_timeout_ms: default_response_timeout(),
            filler_byte: default_filler_byte(),
        }
    }
}

/// One entry of the poll cycle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CurrentDataConfig {
    /// Built-in decoder name
    pub name: String,
    pub pid: u8,
    /// Value of the request's first byte (default: 2)
    #[serde(default = "default_sent_bytes")]
    pub sent_bytes: u8,
    /// Number of value bytes in the response
    pub response_length: u8,
    /// Key into `[mode_ids]`
    #[serde(default = "default_mode")]
    pub mode: String,
}

impl CurrentDataConfig {
    pub fn new(name: impl Into<String>, pid: u8, response_length: u8) -> Self {
        Self {
            name: name.into(),
            pid,
            sent_bytes: default_sent_bytes(),
            response_length,
            mode: default_mode(),
        }
    }
}

/// A custom signal decoded from a bit span of a broadcast frame
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldSignalConfig {
    pub frame_id: u32,
    pub start_bit: u16,
    pub length: u16,
    #[serde(default)]
    pub byte_order: ByteOrder,
    #[serde(default)]
    pub signed: bool,
    #[serde(default = "default_factor")]
    pub factor: f64,
    #[serde(default)]
    pub offset: f64,
}

impl FieldSignalConfig {
    pub fn spec(&self) -> FieldSpec {
        FieldSpec::new(self.start_bit, self.length)
            .with_byte_order(self.byte_order)
            .with_signed(self.signed)
            .with_scaling(self.factor, self.offset)
    }
}

/// Derived signal settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DerivedConfig {
    /// Publish `estimated_gear` from rpm and vehicle speed
    #[serde(default)]
    pub estimate_gear: bool,

    /// Overrides for the default drivetrain
    #[serde(default)]
    pub gear_ratios: Option<Vec<f64>>,
    #[serde(default)]
    pub final_drive_ratio: Option<f64>,
    #[serde(default)]
    pub tire_diameter_in: Option<f64>,
}

impl DerivedConfig {
    pub fn drivetrain(&self) -> Drivetrain {
        let defaults = Drivetrain::default();
        Drivetrain {
            gear_ratios: self.gear_ratios.clone().unwrap_or(defaults.gear_ratios),
            final_drive_ratio: self.final_drive_ratio.unwrap_or(defaults.final_drive_ratio),
            tire_diameter_in: self.tire_diameter_in.unwrap_or(defaults.tire_diameter_in),
        }
    }

    /// The estimator, if enabled
    pub fn gear_estimator(&self) -> Option<GearEstimator> {
        self.estimate_gear
            .then(|| GearEstimator::new(self.drivetrain()))
    }
}

fn default_mode_ids() -> BTreeMap<String, u8> {
    BTreeMap::from([(CURRENT_DATA_MODE.to_string(), 0x01)])
}

fn default_tick_period() -> u64 {
    10
}

fn default_response_timeout() -> u64 {
    50
}

fn default_filler_byte() -> u8 {
    DEFAULT_FILLER_BYTE
}

fn default_sent_bytes() -> u8 {
    DEFAULT_REQUEST_SIZE
}

fn default_mode() -> String {
    CURRENT_DATA_MODE.to_string()
}

fn default_factor() -> f64 {
    1.0
}

impl TelemetryConfig {
    /// Configuration with the default conversation and no signals
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| TelemetryError::ConfigParseError(e.to_string()))
    }

    /// Builder method: set the conversation IDs
    pub fn with_conversation_ids(mut self, send_id: u32, ecu_response_id: u32) -> Self {
        self.conversation_ids = ConversationIds {
            send_id,
            ecu_response_id,
        };
        self
    }

    /// Builder method: map a built-in broadcast signal to a frame ID
    pub fn with_broadcast(mut self, name: impl Into<String>, frame_id: u32) -> Self {
        self.can_ids.insert(name.into(), frame_id);
        self
    }

    /// Builder method: append an entry to the poll cycle
    pub fn with_current_data(mut self, entry: CurrentDataConfig) -> Self {
        self.current_data.push(entry);
        self
    }

    /// Builder method: add a custom bit-field signal
    pub fn with_field(mut self, name: impl Into<String>, field: FieldSignalConfig) -> Self {
        self.fields.insert(name.into(), field);
        self
    }

    /// Builder method: enable the gear estimate
    pub fn with_gear_estimate(mut self, enabled: bool) -> Self {
        self.derived.estimate_gear = enabled;
        self
    }

    /// Check every table can be built
    pub fn validate(&self) -> Result<()> {
        let ids = &self.conversation_ids;
        for (label, id) in [("send_id", ids.send_id), ("ecu_response_id", ids.ecu_response_id)] {
            if id > MAX_STANDARD_ID {
                return Err(TelemetryError::Config(format!(
                    "{} 0x{:X} is not a standard 11-bit identifier",
                    label, id
                )));
            }
        }
        if ids.send_id == ids.ecu_response_id {
            return Err(TelemetryError::Config(format!(
                "send_id and ecu_response_id are both 0x{:X}",
                ids.send_id
            )));
        }
        if self.conversation.tick_period_ms == 0 {
            return Err(TelemetryError::Config("tick_period_ms must be positive".to_string()));
        }

        self.build_location_table()?;
        self.build_conversation_signals()?;
        Ok(())
    }

    /// Build the broadcast signal table from `[can_ids]` and `[fields]`
    pub fn build_location_table(&self) -> Result<SignalLocationTable> {
        let mut table = SignalLocationTable::new();

        for (name, &frame_id) in &self.can_ids {
            let kind: SignalKind = name.parse()?;
            if kind.is_on_demand() {
                return Err(TelemetryError::Config(format!(
                    "'{}' is an on-demand signal and cannot be mapped to a broadcast frame",
                    name
                )));
            }
            self.check_broadcast_id(name, frame_id)?;
            table.add_signal(frame_id, SignalDefinition::builtin(kind));
        }

        for (name, field) in &self.fields {
            if self.can_ids.contains_key(name) {
                return Err(TelemetryError::Config(format!(
                    "field '{}' shadows a built-in signal",
                    name
                )));
            }
            let spec = field.spec();
            spec.validate()
                .map_err(|e| TelemetryError::Config(format!("field '{}': {}", name, e)))?;
            self.check_broadcast_id(name, field.frame_id)?;
            table.add_signal(field.frame_id, SignalDefinition::field(name.clone(), spec));
        }

        let stats = table.stats();
        log::debug!(
            "Built location table: {} signals in {} frames",
            stats.num_signals,
            stats.num_frames
        );

        Ok(table)
    }

    fn check_broadcast_id(&self, name: &str, frame_id: u32) -> Result<()> {
        if frame_id > MAX_STANDARD_ID {
            return Err(TelemetryError::Config(format!(
                "'{}' uses 0x{:X}, which is not a standard 11-bit identifier",
                name, frame_id
            )));
        }
        if frame_id == self.conversation_ids.ecu_response_id {
            return Err(TelemetryError::Config(format!(
                "'{}' is broadcast on the diagnostic response ID 0x{:X}",
                name, frame_id
            )));
        }
        Ok(())
    }

    /// Build the ordered poll cycle from `[[current_data]]`
    pub fn build_conversation_signals(&self) -> Result<Vec<ConversationSignalDefinition>> {
        let mut seen = HashSet::new();
        let mut signals = Vec::with_capacity(self.current_data.len());

        for entry in &self.current_data {
            let mode_id = *self.mode_ids.get(&entry.mode).ok_or_else(|| {
                TelemetryError::Config(format!(
                    "'{}' uses unknown mode '{}'",
                    entry.name, entry.mode
                ))
            })?;

            let decoder = SignalDecoder::Builtin(entry.name.parse()?);
            if (entry.response_length as usize) < decoder.required_len() {
                return Err(TelemetryError::Config(format!(
                    "'{}' needs {} value bytes but response_length is {}",
                    entry.name,
                    decoder.required_len(),
                    entry.response_length
                )));
            }

            if !seen.insert((mode_id, entry.pid)) {
                log::warn!(
                    "Mode 0x{:02X} PID 0x{:02X} is configured more than once; every match will be decoded",
                    mode_id,
                    entry.pid
                );
            }

            signals.push(
                ConversationSignalDefinition::new(
                    entry.name.clone(),
                    mode_id,
                    entry.pid,
                    entry.response_length,
                    decoder,
                )?
                .with_request_size(entry.sent_bytes),
            );
        }

        Ok(signals)
    }

    /// Poller identifiers and timing
    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig::new(
            self.conversation_ids.send_id,
            self.conversation_ids.ecu_response_id,
        )
        .with_tick_period(Duration::from_millis(self.conversation.tick_period_ms))
        .with_response_timeout(Duration::from_millis(self.conversation.response_timeout_ms))
        .with_filler_byte(self.conversation.filler_byte)
    }

    /// Every signal name this configuration can produce
    pub fn signal_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .can_ids
            .keys()
            .chain(self.fields.keys())
            .cloned()
            .chain(self.current_data.iter().map(|entry| entry.name.clone()))
            .collect();
        if self.derived.estimate_gear {
            names.push(ESTIMATED_GEAR.to_string());
        }
        names.sort();
        names.dedup();
        names
    }
}
