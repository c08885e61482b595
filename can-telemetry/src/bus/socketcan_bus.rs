//! Linux SocketCAN backend

use super::CanBus;
use crate::types::{BusError, RawFrame};
use socketcan::{CanFrame, CanSocket, EmbeddedFrame, Frame, Socket, StandardId};
use std::io::ErrorKind;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// A raw CAN socket bound to one interface (e.g. `can0`)
pub struct SocketCanBus {
    interface: String,
    socket: CanSocket,
}

impl SocketCanBus {
    /// Open a non-blocking raw socket on `interface`
    ///
    /// The interface must already be up; bitrate and link state are managed
    /// outside this crate.
    pub fn open(interface: &str) -> Result<Self, BusError> {
        let socket = CanSocket::open(interface).map_err(|source| BusError::Open {
            interface: interface.to_string(),
            source,
        })?;

        socket.set_nonblocking(true).map_err(|source| BusError::Open {
            interface: interface.to_string(),
            source,
        })?;

        log::info!("Opened SocketCAN interface {}", interface);
        Ok(Self {
            interface: interface.to_string(),
            socket,
        })
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }
}

impl CanBus for SocketCanBus {
    fn recv(&self, timeout: Duration) -> Result<Option<RawFrame>, BusError> {
        let deadline = Instant::now() + timeout;

        loop {
            match self.socket.read_frame() {
                Ok(frame) => {
                    // Error and extended frames never carry signals we decode
                    if matches!(frame, CanFrame::Error(_)) || frame.is_extended() {
                        log::trace!("Skipping non-data frame 0x{:X}", frame.raw_id());
                        if Instant::now() >= deadline {
                            return Ok(None);
                        }
                        continue;
                    }
                    let raw = RawFrame::new(frame.raw_id(), frame.data())
                        .map_err(|e| BusError::Receive(e.to_string()))?;
                    return Ok(Some(raw));
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {
                    if Instant::now() >= deadline {
                        return Ok(None);
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(BusError::Receive(e.to_string())),
            }
        }
    }

    fn send(&self, frame: &RawFrame) -> Result<(), BusError> {
        let id = u16::try_from(frame.id)
            .ok()
            .and_then(StandardId::new)
            .ok_or(BusError::InvalidId(frame.id))?;

        let can_frame = CanFrame::new(id, &frame.data)
            .ok_or_else(|| BusError::Send(format!("invalid payload for {}", frame)))?;

        self.socket
            .write_frame(&can_frame)
            .map_err(|e| BusError::Send(format!("{} on {}: {}", frame, self.interface, e)))
    }
}
