//! Simulated car
//!
//! Sits on the far end of a [`VirtualBus`] and behaves like a vehicle: it
//! broadcasts random payloads on the configured frame IDs and answers
//! diagnostic queries arriving on the send ID. It can be told to ignore a
//! share of queries so the poller's timeout path gets exercised.

use crate::bus::{CanBus, VirtualBus};
use crate::config::TelemetryConfig;
use crate::conversation::{MODE_ACK_OFFSET, NEGATIVE_RESPONSE_ID, RESPONSE_HEADER_LEN};
use crate::types::{BusError, RawFrame, Result, TelemetryError, MAX_PAYLOAD_LEN};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Negative response code for a PID the simulated ECU does not know
const REQUEST_OUT_OF_RANGE: u8 = 0x31;

/// Summary of one simulation step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulationStep {
    /// Frame ID broadcast this step, if any
    pub broadcast_id: Option<u32>,
    /// Queries answered
    pub answered: usize,
    /// Queries deliberately left unanswered
    pub ignored: usize,
}

/// Random vehicle traffic plus a simulated ECU
pub struct SimulatedCar {
    bus: VirtualBus,
    broadcast_ids: Vec<u32>,
    /// (mode, pid) -> response_length
    responses: HashMap<(u8, u8), u8>,
    send_id: u32,
    response_id: u32,
    filler_byte: u8,
    silence_probability: f64,
    rng: StdRng,
}

impl SimulatedCar {
    /// Build a car answering the signals of `config` on the car end of a bus pair
    pub fn new(bus: VirtualBus, config: &TelemetryConfig) -> Result<Self> {
        let broadcast_ids = config.build_location_table()?.frame_ids();
        let responses = config
            .build_conversation_signals()?
            .into_iter()
            .map(|signal| ((signal.mode_id, signal.parameter_id), signal.response_length))
            .collect();

        Ok(Self {
            bus,
            broadcast_ids,
            responses,
            send_id: config.conversation_ids.send_id,
            response_id: config.conversation_ids.ecu_response_id,
            filler_byte: config.conversation.filler_byte,
            silence_probability: 0.0,
            rng: StdRng::from_entropy(),
        })
    }

    /// Builder method: deterministic traffic
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Builder method: chance (0.0..=1.0) that a query goes unanswered
    ///
    /// Out-of-range values are clamped; NaN means never silent.
    pub fn with_silence_probability(mut self, probability: f64) -> Self {
        self.silence_probability = if probability.is_nan() {
            0.0
        } else {
            probability.clamp(0.0, 1.0)
        };
        self
    }

    /// Broadcast one random frame and answer every pending query
    pub fn step(&mut self) -> std::result::Result<SimulationStep, BusError> {
        let mut step = SimulationStep::default();

        while let Some(frame) = self.bus.try_recv()? {
            if frame.id != self.send_id {
                continue;
            }
            if self.rng.gen_bool(self.silence_probability) {
                log::trace!("Simulated ECU ignoring {}", frame);
                step.ignored += 1;
                continue;
            }
            if let Some(response) = self.answer(&frame) {
                self.bus.send(&response)?;
                step.answered += 1;
            }
        }

        if let Some(&frame_id) = self.broadcast_ids.choose(&mut self.rng) {
            let mut data = [0u8; MAX_PAYLOAD_LEN];
            self.rng.fill(&mut data[..]);
            self.bus.send(&RawFrame {
                id: frame_id,
                data: data.to_vec(),
            })?;
            step.broadcast_id = Some(frame_id);
        }

        Ok(step)
    }

    /// Build the single-frame answer to a query
    ///
    /// Known PIDs get `[len, mode + 0x40, pid, random value, filler]`,
    /// unknown ones a negative response. Frames too short to carry a mode
    /// and PID get no answer.
    pub fn answer(&mut self, request: &RawFrame) -> Option<RawFrame> {
        let (mode_id, parameter_id) = match request.data.as_slice() {
            [_, mode_id, parameter_id, ..] => (*mode_id, *parameter_id),
            _ => return None,
        };

        let mut data = [self.filler_byte; MAX_PAYLOAD_LEN];
        match self.responses.get(&(mode_id, parameter_id)) {
            Some(&length) => {
                data[0] = length;
                data[1] = mode_id.wrapping_add(MODE_ACK_OFFSET);
                data[2] = parameter_id;
                let value_end = RESPONSE_HEADER_LEN + length as usize;
                self.rng.fill(&mut data[RESPONSE_HEADER_LEN..value_end]);
            }
            None => {
                data[0] = 3;
                data[1] = NEGATIVE_RESPONSE_ID;
                data[2] = mode_id;
                data[3] = REQUEST_OUT_OF_RANGE;
            }
        }

        Some(RawFrame {
            id: self.response_id,
            data: data.to_vec(),
        })
    }

    /// Run the car on its own thread until `shutdown` is raised
    ///
    /// The thread also stops, without error, once the core end of the bus is
    /// dropped.
    pub fn spawn(
        mut self,
        shutdown: Arc<AtomicBool>,
        period: Duration,
    ) -> Result<JoinHandle<std::result::Result<(), BusError>>> {
        thread::Builder::new()
            .name("simulated-car".to_string())
            .spawn(move || {
                log::info!(
                    "Simulated car running on '{}' ({} broadcast IDs, {} PIDs)",
                    self.bus.name(),
                    self.broadcast_ids.len(),
                    self.responses.len()
                );
                while !shutdown.load(Ordering::Relaxed) {
                    match self.step() {
                        Ok(_) => {}
                        Err(BusError::Disconnected) => {
                            log::debug!("Bus peer closed, simulated car stopping");
                            break;
                        }
                        Err(e) => return Err(e),
                    }
                    thread::sleep(period);
                }
                Ok(())
            })
            .map_err(TelemetryError::IoError)
    }
}

impl std::fmt::Debug for SimulatedCar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedCar")
            .field("bus", &self.bus.name())
            .field("broadcast_ids", &self.broadcast_ids)
            .field("pids", &self.responses.len())
            .field("silence_probability", &self.silence_probability)
            .finish()
    }
}
