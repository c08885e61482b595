//! Built-in signal decoders
//!
//! Every decoder known by name is a variant of [`SignalKind`]. Config files refer
//! to these names; decoding is a pure function of the payload and never reads
//! past the span the signal declares.

use crate::signals::field::FieldSpec;
use crate::types::{DecodeError, SignalValue};
use byteorder::{ByteOrder as _, LittleEndian};
use std::fmt;
use std::str::FromStr;

const LOW_NIBBLE_MASK: u8 = 0x0F;
const SPEED_SCALE: f64 = 0.05625;
const TEMP_SENSOR_OFFSET: i64 = -40;
const FUEL_LEVEL_MAX: i64 = 0x3FF;
const FUEL_LEVEL_MIN: i64 = 0x25;
const FUEL_CONSUMPTION_SCALE: f64 = 0.24726;
const BOOST_SCALE: f64 = 0.3;
const BOOST_OFFSET: f64 = -15.1;
const ODOMETER_SCALE: f64 = 0.1;

/// Named built-in decoders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    // Broadcast signals
    Rpm,
    VehicleSpeed,
    CruiseControlSpeed,
    TurnSignals,
    FuelLevel,
    OilTemp,
    OilPressureWarning,
    CoolantTemp,
    HandbrakeSwitch,
    ReverseSwitch,
    ClutchSwitch,
    TpmsWarning,
    CruiseControlSet,
    CruiseControlStatus,
    SeatbeltDriver,
    DimmerDial,
    TractionControl,
    TractionControlMode,
    HillAssist,
    FogLights,
    Headlights,
    DoorStates,
    BoostPressure,
    CheckEngineLight,
    Gear,
    Odometer,
    FuelConsumption,
    SrsAirbagWarning,
    // On-demand (current data) signals, decoded from the response value bytes
    EngineLoad,
    IntakeManifoldAbsolutePressure,
    TimingAdvance,
    MassAirFlow,
    ThrottlePosition,
}

impl SignalKind {
    /// Every built-in decoder, in declaration order
    pub const ALL: [SignalKind; 33] = [
        SignalKind::Rpm,
        SignalKind::VehicleSpeed,
        SignalKind::CruiseControlSpeed,
        SignalKind::TurnSignals,
        SignalKind::FuelLevel,
        SignalKind::OilTemp,
        SignalKind::OilPressureWarning,
        SignalKind::CoolantTemp,
        SignalKind::HandbrakeSwitch,
        SignalKind::ReverseSwitch,
        SignalKind::ClutchSwitch,
        SignalKind::TpmsWarning,
        SignalKind::CruiseControlSet,
        SignalKind::CruiseControlStatus,
        SignalKind::SeatbeltDriver,
        SignalKind::DimmerDial,
        SignalKind::TractionControl,
        SignalKind::TractionControlMode,
        SignalKind::HillAssist,
        SignalKind::FogLights,
        SignalKind::Headlights,
        SignalKind::DoorStates,
        SignalKind::BoostPressure,
        SignalKind::CheckEngineLight,
        SignalKind::Gear,
        SignalKind::Odometer,
        SignalKind::FuelConsumption,
        SignalKind::SrsAirbagWarning,
        SignalKind::EngineLoad,
        SignalKind::IntakeManifoldAbsolutePressure,
        SignalKind::TimingAdvance,
        SignalKind::MassAirFlow,
        SignalKind::ThrottlePosition,
    ];

    /// Config/event name of the signal
    pub fn name(self) -> &'static str {
        match self {
            SignalKind::Rpm => "rpm",
            SignalKind::VehicleSpeed => "vehicle_speed",
            SignalKind::CruiseControlSpeed => "cruise_control_speed",
            SignalKind::TurnSignals => "turn_signals",
            SignalKind::FuelLevel => "fuel_level",
            SignalKind::OilTemp => "oil_temp",
            SignalKind::OilPressureWarning => "oil_pressure_warning",
            SignalKind::CoolantTemp => "coolant_temp",
            SignalKind::HandbrakeSwitch => "handbrake_switch",
            SignalKind::ReverseSwitch => "reverse_switch",
            SignalKind::ClutchSwitch => "clutch_switch",
            SignalKind::TpmsWarning => "tpms_warning",
            SignalKind::CruiseControlSet => "cruise_control_set",
            SignalKind::CruiseControlStatus => "cruise_control_status",
            SignalKind::SeatbeltDriver => "seatbelt_driver",
            SignalKind::DimmerDial => "dimmer_dial",
            SignalKind::TractionControl => "traction_control",
            SignalKind::TractionControlMode => "traction_control_mode",
            SignalKind::HillAssist => "hill_assist",
            SignalKind::FogLights => "fog_lights",
            SignalKind::Headlights => "headlights",
            SignalKind::DoorStates => "door_states",
            SignalKind::BoostPressure => "boost_pressure",
            SignalKind::CheckEngineLight => "check_engine_light",
            SignalKind::Gear => "gear",
            SignalKind::Odometer => "odometer",
            SignalKind::FuelConsumption => "fuel_consumption",
            SignalKind::SrsAirbagWarning => "srs_airbag_system_warning_light",
            SignalKind::EngineLoad => "engine_load",
            SignalKind::IntakeManifoldAbsolutePressure => "intake_manifold_absolute_pressure",
            SignalKind::TimingAdvance => "timing_advance",
            SignalKind::MassAirFlow => "mass_air_flow",
            SignalKind::ThrottlePosition => "throttle_position",
        }
    }

    /// Number of leading payload bytes the decoder reads
    pub fn required_len(self) -> usize {
        match self {
            SignalKind::Rpm => 6,
            SignalKind::VehicleSpeed => 2,
            SignalKind::CruiseControlSpeed => 8,
            SignalKind::TurnSignals => 6,
            SignalKind::FuelLevel => 2,
            SignalKind::OilTemp => 3,
            SignalKind::OilPressureWarning => 2,
            SignalKind::CoolantTemp => 4,
            SignalKind::HandbrakeSwitch => 7,
            SignalKind::ReverseSwitch => 7,
            SignalKind::ClutchSwitch => 2,
            SignalKind::TpmsWarning => 5,
            SignalKind::CruiseControlSet => 6,
            SignalKind::CruiseControlStatus => 6,
            SignalKind::SeatbeltDriver => 6,
            SignalKind::DimmerDial => 1,
            SignalKind::TractionControl => 2,
            SignalKind::TractionControlMode => 1,
            SignalKind::HillAssist => 2,
            SignalKind::FogLights => 2,
            SignalKind::Headlights => 8,
            SignalKind::DoorStates => 2,
            SignalKind::BoostPressure => 5,
            SignalKind::CheckEngineLight => 5,
            SignalKind::Gear => 7,
            SignalKind::Odometer => 4,
            SignalKind::FuelConsumption => 2,
            SignalKind::SrsAirbagWarning => 3,
            SignalKind::EngineLoad => 1,
            SignalKind::IntakeManifoldAbsolutePressure => 1,
            SignalKind::TimingAdvance => 1,
            SignalKind::MassAirFlow => 2,
            SignalKind::ThrottlePosition => 1,
        }
    }

    /// True for decoders that read a diagnostic response value rather than a
    /// broadcast frame
    pub fn is_on_demand(self) -> bool {
        matches!(
            self,
            SignalKind::EngineLoad
                | SignalKind::IntakeManifoldAbsolutePressure
                | SignalKind::TimingAdvance
                | SignalKind::MassAirFlow
                | SignalKind::ThrottlePosition
        )
    }

    /// Decode the payload into an engineering value
    pub fn decode(self, data: &[u8]) -> Result<SignalValue, DecodeError> {
        let required = self.required_len();
        if data.len() < required {
            return Err(DecodeError::ShortPayload {
                required,
                actual: data.len(),
            });
        }

        let value = match self {
            SignalKind::Rpm => {
                let rpm = data[4] as i64 | (((data[5] & LOW_NIBBLE_MASK) as i64) << 8);
                SignalValue::Integer(rpm)
            }
            SignalKind::VehicleSpeed => {
                SignalValue::Float(LittleEndian::read_u16(&data[0..2]) as f64 * SPEED_SCALE)
            }
            SignalKind::CruiseControlSpeed => SignalValue::Integer(data[7] as i64),
            SignalKind::TurnSignals => {
                SignalValue::Flags(vec![is_set(data[5], 4), is_set(data[5], 5)])
            }
            SignalKind::FuelLevel => {
                let raw = data[0] as i64 + (((data[1] & LOW_NIBBLE_MASK) as i64) << 8)
                    - FUEL_LEVEL_MIN;
                let fraction = raw as f64 / (FUEL_LEVEL_MAX - FUEL_LEVEL_MIN) as f64;
                SignalValue::Float((1.0 - fraction) * 100.0)
            }
            SignalKind::OilTemp => SignalValue::Integer(data[2] as i64 + TEMP_SENSOR_OFFSET),
            SignalKind::OilPressureWarning => SignalValue::Boolean(is_set(data[1], 4)),
            SignalKind::CoolantTemp => SignalValue::Integer(data[3] as i64 + TEMP_SENSOR_OFFSET),
            SignalKind::HandbrakeSwitch => SignalValue::Boolean(is_set(data[6], 3)),
            SignalKind::ReverseSwitch => SignalValue::Boolean(is_set(data[6], 2)),
            SignalKind::ClutchSwitch => SignalValue::Boolean(is_set(data[1], 7)),
            SignalKind::TpmsWarning => SignalValue::Boolean(is_set(data[4], 4)),
            SignalKind::CruiseControlSet => SignalValue::Boolean(is_set(data[5], 5)),
            SignalKind::CruiseControlStatus => SignalValue::Boolean(is_set(data[5], 4)),
            SignalKind::SeatbeltDriver => SignalValue::Boolean(is_set(data[5], 0)),
            SignalKind::DimmerDial => SignalValue::Integer(data[0] as i64),
            SignalKind::TractionControl => SignalValue::Boolean(is_set(data[1], 3)),
            SignalKind::TractionControlMode => SignalValue::Boolean(is_set(data[0], 3)),
            SignalKind::HillAssist => SignalValue::Boolean(is_set(data[1], 7)),
            SignalKind::FogLights => SignalValue::Boolean(is_set(data[1], 6)),
            // low beams, parking lights, high beams, running lights
            SignalKind::Headlights => SignalValue::Flags(vec![
                is_set(data[7], 3),
                is_set(data[7], 2),
                is_set(data[7], 4),
                is_set(data[7], 1),
            ]),
            // left front, right front, left rear, right rear, trunk
            SignalKind::DoorStates => SignalValue::Flags(vec![
                is_set(data[1], 0),
                is_set(data[1], 1),
                is_set(data[1], 3),
                is_set(data[1], 2),
                is_set(data[1], 5),
            ]),
            SignalKind::BoostPressure => {
                SignalValue::Float(data[4] as f64 * BOOST_SCALE + BOOST_OFFSET)
            }
            SignalKind::CheckEngineLight => SignalValue::Boolean(is_set(data[4], 7)),
            SignalKind::Gear => {
                let gear = data[6] & LOW_NIBBLE_MASK;
                // 0 and 7 are both reported while no gear is engaged
                let gear = if gear == 0 || gear == 7 { 0 } else { gear };
                SignalValue::Integer(gear as i64)
            }
            SignalKind::Odometer => {
                SignalValue::Float(LittleEndian::read_u32(&data[0..4]) as f64 * ODOMETER_SCALE)
            }
            SignalKind::FuelConsumption => {
                SignalValue::Float(data[1] as f64 * FUEL_CONSUMPTION_SCALE)
            }
            SignalKind::SrsAirbagWarning => SignalValue::Boolean(is_set(data[2], 0)),
            SignalKind::EngineLoad => SignalValue::Float(percent_of_full_scale(data[0])),
            SignalKind::IntakeManifoldAbsolutePressure => SignalValue::Integer(data[0] as i64),
            SignalKind::TimingAdvance => SignalValue::Float(data[0] as f64 / 2.0 - 64.0),
            SignalKind::MassAirFlow => {
                SignalValue::Float(LittleEndian::read_u16(&data[0..2]) as f64 / 100.0)
            }
            SignalKind::ThrottlePosition => SignalValue::Float(percent_of_full_scale(data[0])),
        };

        Ok(value)
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SignalKind {
    type Err = crate::types::TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SignalKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| crate::types::TelemetryError::UnknownSignal(s.to_string()))
    }
}

fn is_set(byte: u8, bit: u8) -> bool {
    (byte >> bit) & 0x01 != 0
}

fn percent_of_full_scale(raw: u8) -> f64 {
    raw as f64 / u8::MAX as f64 * 100.0
}

/// How a signal turns bytes into a value
#[derive(Debug, Clone, PartialEq)]
pub enum SignalDecoder {
    /// One of the named built-in decoders
    Builtin(SignalKind),
    /// A configured bit field
    Field(FieldSpec),
}

impl SignalDecoder {
    pub fn decode(&self, data: &[u8]) -> Result<SignalValue, DecodeError> {
        match self {
            SignalDecoder::Builtin(kind) => kind.decode(data),
            SignalDecoder::Field(spec) => spec.decode(data),
        }
    }

    pub fn required_len(&self) -> usize {
        match self {
            SignalDecoder::Builtin(kind) => kind.required_len(),
            SignalDecoder::Field(spec) => spec.required_len(),
        }
    }
}

/// A named signal and its decoder
#[derive(Debug, Clone, PartialEq)]
pub struct SignalDefinition {
    pub name: String,
    pub decoder: SignalDecoder,
}

impl SignalDefinition {
    /// Definition backed by a built-in decoder, named after it
    pub fn builtin(kind: SignalKind) -> Self {
        Self {
            name: kind.name().to_string(),
            decoder: SignalDecoder::Builtin(kind),
        }
    }

    /// Definition backed by a configured bit field
    pub fn field(name: impl Into<String>, spec: FieldSpec) -> Self {
        Self {
            name: name.into(),
            decoder: SignalDecoder::Field(spec),
        }
    }

    pub fn decode(&self, data: &[u8]) -> Result<SignalValue, DecodeError> {
        self.decoder.decode(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn float(value: SignalValue) -> f64 {
        match value {
            SignalValue::Float(v) => v,
            other => panic!("expected float, got {other:?}"),
        }
    }

    #[test]
    fn test_rpm() {
        let data = [0x00, 0x00, 0x00, 0x00, 0xFF, 0xFF, 0x00, 0x00];
        assert_eq!(SignalKind::Rpm.decode(&data).unwrap(), SignalValue::Integer(4095));

        let data = [0x00, 0x00, 0x00, 0x00, 0xB8, 0x0B, 0x00, 0x00];
        assert_eq!(SignalKind::Rpm.decode(&data).unwrap(), SignalValue::Integer(3000));
    }

    #[test]
    fn test_vehicle_speed() {
        let data = [0x0F, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        let speed = float(SignalKind::VehicleSpeed.decode(&data).unwrap());
        assert!((speed - 0x040F as f64 * SPEED_SCALE).abs() < 1e-9);
    }

    #[test]
    fn test_gear_sentinels() {
        for (nibble, expected) in [(0u8, 0i64), (1, 1), (2, 2), (3, 3), (4, 4), (5, 5), (6, 6), (7, 0)] {
            // High nibble carries unrelated bits.
            let data = [0, 0, 0, 0, 0, 0, 0xA0 | nibble, 0];
            assert_eq!(
                SignalKind::Gear.decode(&data).unwrap(),
                SignalValue::Integer(expected),
                "nibble {nibble}"
            );
        }
    }

    #[test]
    fn test_turn_signals() {
        let mut data = [0x0F, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(
            SignalKind::TurnSignals.decode(&data).unwrap(),
            SignalValue::Flags(vec![false, false])
        );
        data[5] = 0x10;
        assert_eq!(
            SignalKind::TurnSignals.decode(&data).unwrap(),
            SignalValue::Flags(vec![true, false])
        );
        data[5] = 0x30;
        assert_eq!(
            SignalKind::TurnSignals.decode(&data).unwrap(),
            SignalValue::Flags(vec![true, true])
        );
    }

    #[test]
    fn test_temperatures() {
        let data = [0, 0, 130, 40, 0, 0, 0, 0];
        assert_eq!(SignalKind::OilTemp.decode(&data).unwrap(), SignalValue::Integer(90));
        assert_eq!(SignalKind::CoolantTemp.decode(&data).unwrap(), SignalValue::Integer(0));
    }

    #[test]
    fn test_fuel_level_bounds() {
        let full = [0x25, 0x00];
        assert!((float(SignalKind::FuelLevel.decode(&full).unwrap()) - 100.0).abs() < 1e-9);

        let empty = [0xFF, 0x03];
        assert!(float(SignalKind::FuelLevel.decode(&empty).unwrap()).abs() < 1e-9);
    }

    #[test]
    fn test_odometer_little_endian() {
        let data = [0x10, 0x27, 0x00, 0x00];
        assert!((float(SignalKind::Odometer.decode(&data).unwrap()) - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_flag_groups() {
        let data = [0, 0b0010_1001, 0, 0, 0, 0, 0, 0b0001_1000];
        assert_eq!(
            SignalKind::DoorStates.decode(&data).unwrap(),
            SignalValue::Flags(vec![true, false, true, false, true])
        );
        assert_eq!(
            SignalKind::Headlights.decode(&data).unwrap(),
            SignalValue::Flags(vec![true, false, true, false])
        );
    }

    #[test]
    fn test_switch_bits() {
        let data = [0x08, 0x80, 0x01, 0, 0x90, 0x31, 0x0C, 0];
        assert_eq!(SignalKind::HandbrakeSwitch.decode(&data).unwrap(), SignalValue::Boolean(true));
        assert_eq!(SignalKind::ReverseSwitch.decode(&data).unwrap(), SignalValue::Boolean(true));
        assert_eq!(SignalKind::ClutchSwitch.decode(&data).unwrap(), SignalValue::Boolean(true));
        assert_eq!(SignalKind::TractionControlMode.decode(&data).unwrap(), SignalValue::Boolean(true));
        assert_eq!(SignalKind::TractionControl.decode(&data).unwrap(), SignalValue::Boolean(false));
        assert_eq!(SignalKind::CheckEngineLight.decode(&data).unwrap(), SignalValue::Boolean(true));
        assert_eq!(SignalKind::TpmsWarning.decode(&data).unwrap(), SignalValue::Boolean(true));
        assert_eq!(SignalKind::SeatbeltDriver.decode(&data).unwrap(), SignalValue::Boolean(true));
        assert_eq!(SignalKind::CruiseControlSet.decode(&data).unwrap(), SignalValue::Boolean(true));
        assert_eq!(SignalKind::CruiseControlStatus.decode(&data).unwrap(), SignalValue::Boolean(true));
        assert_eq!(SignalKind::SrsAirbagWarning.decode(&data).unwrap(), SignalValue::Boolean(true));
    }

    #[test]
    fn test_on_demand_decoders() {
        assert!((float(SignalKind::EngineLoad.decode(&[0xFF]).unwrap()) - 100.0).abs() < 1e-9);
        assert!((float(SignalKind::TimingAdvance.decode(&[0x90]).unwrap()) - 8.0).abs() < 1e-9);
        assert!((float(SignalKind::MassAirFlow.decode(&[0xE8, 0x03]).unwrap()) - 10.0).abs() < 1e-9);
        assert_eq!(
            SignalKind::IntakeManifoldAbsolutePressure.decode(&[101]).unwrap(),
            SignalValue::Integer(101)
        );
        let throttle = float(SignalKind::ThrottlePosition.decode(&[0x80]).unwrap());
        assert!((throttle - 128.0 / 255.0 * 100.0).abs() < 1e-9);
        assert!((float(SignalKind::ThrottlePosition.decode(&[0x00]).unwrap())).abs() < 1e-9);
        assert!(SignalKind::ThrottlePosition.is_on_demand());
        assert!(!SignalKind::Rpm.is_on_demand());
    }

    #[test]
    fn test_scaled_values() {
        let boost = [0, 0, 0, 0, 100];
        assert!((float(SignalKind::BoostPressure.decode(&boost).unwrap()) - 14.9).abs() < 1e-9);
        let boost = [0, 0, 0, 0, 0];
        assert!((float(SignalKind::BoostPressure.decode(&boost).unwrap()) + 15.1).abs() < 1e-9);

        let consumption = [0, 10];
        assert!((float(SignalKind::FuelConsumption.decode(&consumption).unwrap()) - 2.4726).abs() < 1e-9);

        let data = [0x7C, 0, 0, 0, 0, 0, 0, 0x64];
        assert_eq!(SignalKind::CruiseControlSpeed.decode(&data).unwrap(), SignalValue::Integer(100));
        assert_eq!(SignalKind::DimmerDial.decode(&data).unwrap(), SignalValue::Integer(124));
    }

    #[test]
    fn test_second_byte_flags() {
        let data = [0, 0b1101_0000];
        assert_eq!(SignalKind::OilPressureWarning.decode(&data).unwrap(), SignalValue::Boolean(true));
        assert_eq!(SignalKind::HillAssist.decode(&data).unwrap(), SignalValue::Boolean(true));
        assert_eq!(SignalKind::FogLights.decode(&data).unwrap(), SignalValue::Boolean(true));

        let data = [0xFF, 0b0010_1111];
        assert_eq!(SignalKind::OilPressureWarning.decode(&data).unwrap(), SignalValue::Boolean(false));
        assert_eq!(SignalKind::HillAssist.decode(&data).unwrap(), SignalValue::Boolean(false));
        assert_eq!(SignalKind::FogLights.decode(&data).unwrap(), SignalValue::Boolean(false));
    }

    #[test]
    fn test_short_payload_is_reported() {
        assert_eq!(
            SignalKind::Gear.decode(&[0; 3]),
            Err(DecodeError::ShortPayload { required: 7, actual: 3 })
        );
        assert!(SignalKind::EngineLoad.decode(&[]).is_err());
    }

    #[test]
    fn test_names_round_trip_through_from_str() {
        for kind in SignalKind::ALL {
            assert_eq!(kind.name().parse::<SignalKind>().unwrap(), kind);
        }
        assert!("warp_drive".parse::<SignalKind>().is_err());
    }
}
