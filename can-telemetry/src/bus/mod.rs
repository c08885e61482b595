//! Bus collaborators
//!
//! The core only needs two operations from a CAN interface: a receive that may
//! time out and a send. [`CanBus`] captures that contract so the dispatcher and
//! the poller can run against SocketCAN on a vehicle or against the in-memory
//! [`VirtualBus`] in tests and simulation.

use crate::types::{BusError, RawFrame};
use std::time::Duration;

mod virtual_bus;
#[cfg(feature = "socketcan")]
mod socketcan_bus;

pub use virtual_bus::VirtualBus;
#[cfg(feature = "socketcan")]
pub use socketcan_bus::SocketCanBus;

/// A half-duplex view of a CAN bus
///
/// Implementations are shared between the listener and poller threads, so
/// both methods take `&self`.
pub trait CanBus: Send + Sync {
    /// Wait up to `timeout` for the next frame
    ///
    /// `Ok(None)` means no frame arrived in time and is not an error.
    fn recv(&self, timeout: Duration) -> Result<Option<RawFrame>, BusError>;

    /// Transmit a frame
    fn send(&self, frame: &RawFrame) -> Result<(), BusError>;
}

impl<B: CanBus + ?Sized> CanBus for std::sync::Arc<B> {
    fn recv(&self, timeout: Duration) -> Result<Option<RawFrame>, BusError> {
        (**self).recv(timeout)
    }

    fn send(&self, frame: &RawFrame) -> Result<(), BusError> {
        (**self).send(frame)
    }
}
