//! In-memory bus
//!
//! Two connected endpoints: every frame sent on one end is received on the
//! other. Used to run the core against the simulated car and in tests.

use super::CanBus;
use crate::types::{BusError, RawFrame};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

/// One endpoint of an in-memory CAN link
#[derive(Debug, Clone)]
pub struct VirtualBus {
    name: String,
    tx: Sender<RawFrame>,
    rx: Receiver<RawFrame>,
}

impl VirtualBus {
    /// Create two connected endpoints
    pub fn pair(name: impl Into<String>) -> (VirtualBus, VirtualBus) {
        let name = name.into();
        let (a_tx, b_rx) = channel::unbounded();
        let (b_tx, a_rx) = channel::unbounded();

        (
            VirtualBus {
                name: name.clone(),
                tx: a_tx,
                rx: a_rx,
            },
            VirtualBus {
                name,
                tx: b_tx,
                rx: b_rx,
            },
        )
    }

    /// Channel name shared by both endpoints
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Receive a frame if one is already queued
    pub fn try_recv(&self) -> Result<Option<RawFrame>, BusError> {
        match self.rx.try_recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(BusError::Disconnected),
        }
    }

    /// Take every frame currently queued for this endpoint
    pub fn drain(&self) -> Vec<RawFrame> {
        self.rx.try_iter().collect()
    }
}

impl CanBus for VirtualBus {
    fn recv(&self, timeout: Duration) -> Result<Option<RawFrame>, BusError> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(BusError::Disconnected),
        }
    }

    fn send(&self, frame: &RawFrame) -> Result<(), BusError> {
        log::trace!("[{}] TX {}", self.name, frame);
        self.tx.send(frame.clone()).map_err(|_| BusError::Disconnected)
    }
}
