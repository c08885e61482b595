//! Signals computed from other decoded signals
//!
//! The gear estimate compares engine speed against wheel speed through the
//! drivetrain ratios, which works on cars whose gear position is not broadcast
//! reliably.

use crate::signals::SignalKind;
use crate::types::{DecodedEvent, SignalValue};
use parking_lot::Mutex;
use std::f64::consts::PI;

/// Name of the derived signal
pub const ESTIMATED_GEAR: &str = "estimated_gear";

const KPH_TO_MPH: f64 = 0.621_371_19;
/// Inches per mile divided by minutes per hour
const INCHES_PER_MILE_PER_MINUTE: f64 = 5280.0 * 12.0 / 60.0;

/// Drivetrain geometry used by the estimator
#[derive(Debug, Clone, PartialEq)]
pub struct Drivetrain {
    /// Gear ratios from first to top gear
    pub gear_ratios: Vec<f64>,
    pub final_drive_ratio: f64,
    /// Tyre diameter in inches
    pub tire_diameter_in: f64,
}

impl Default for Drivetrain {
    fn default() -> Self {
        Self {
            gear_ratios: vec![3.454, 1.947, 1.296, 0.972, 0.78, 0.666],
            final_drive_ratio: 4.111,
            tire_diameter_in: 26.0,
        }
    }
}

impl Drivetrain {
    /// Gear whose ratio matches engine/wheel speed, 0 for neutral or stopped
    pub fn estimate_gear(&self, rpm: f64, speed_kph: f64) -> u8 {
        if rpm <= 0.0 || speed_kph <= 0.0 {
            return 0;
        }

        let wheel_rpm = speed_kph * KPH_TO_MPH * INCHES_PER_MILE_PER_MINUTE
            / (PI * self.tire_diameter_in);
        let ratio = rpm / (wheel_rpm * self.final_drive_ratio);

        // Ratios are ordered from first gear down; take the first one the
        // measured ratio reaches.
        self.gear_ratios
            .iter()
            .position(|&gear_ratio| ratio >= gear_ratio)
            .map(|index| (index + 1) as u8)
            .unwrap_or(0)
    }
}

#[derive(Debug, Default)]
struct Inputs {
    rpm: Option<f64>,
    speed_kph: Option<f64>,
    last_gear: Option<u8>,
}

/// Tracks rpm and vehicle speed and emits `estimated_gear` when it changes
#[derive(Debug, Default)]
pub struct GearEstimator {
    drivetrain: Drivetrain,
    inputs: Mutex<Inputs>,
}

impl GearEstimator {
    pub fn new(drivetrain: Drivetrain) -> Self {
        Self {
            drivetrain,
            inputs: Mutex::new(Inputs::default()),
        }
    }

    /// Feed a decoded event; returns a new estimate if the gear changed
    pub fn observe(&self, event: &DecodedEvent) -> Option<DecodedEvent> {
        let mut inputs = self.inputs.lock();

        if event.signal_name == SignalKind::Rpm.name() {
            inputs.rpm = Some(event.value.as_f64());
        } else if event.signal_name == SignalKind::VehicleSpeed.name() {
            inputs.speed_kph = Some(event.value.as_f64());
        } else {
            return None;
        }

        let (rpm, speed_kph) = (inputs.rpm?, inputs.speed_kph?);
        let gear = self.drivetrain.estimate_gear(rpm, speed_kph);
        if inputs.last_gear == Some(gear) {
            return None;
        }
        inputs.last_gear = Some(gear);

        Some(DecodedEvent::new(
            ESTIMATED_GEAR,
            SignalValue::Integer(gear as i64),
            event.observed_at,
        ))
    }
}
