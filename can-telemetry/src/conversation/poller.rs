//! Single-outstanding-request polling state machine
//!
//! Two independent paths drive the poller: a periodic [`tick`] that sends the
//! next query or declares a timeout, and [`handle_response`] called by the
//! frame dispatcher for every frame on the response ID. Both take the same
//! lock for their whole transition, so a matching response and a timeout can
//! never both resolve the same in-flight query, and at most one query is ever
//! outstanding.
//!
//! [`tick`]: ConversationPoller::tick
//! [`handle_response`]: ConversationPoller::handle_response

use super::{ConversationSignalDefinition, PollerConfig, ResponseHeader, RESPONSE_HEADER_LEN};
use crate::bus::CanBus;
use crate::types::{BusError, DecodedEvent, RawFrame, Timestamp};
use parking_lot::Mutex;
use std::time::Instant;

/// Conversation state shared by the tick and response paths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    /// No query in flight; the next tick sends one
    Idle,
    /// A query was sent and has not been answered or timed out
    AwaitingResponse {
        mode_id: u8,
        parameter_id: u8,
        sent_at: Instant,
    },
}

impl ConversationState {
    pub fn is_awaiting(&self) -> bool {
        matches!(self, ConversationState::AwaitingResponse { .. })
    }
}

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A query for this signal index was sent
    Sent { index: usize, parameter_id: u8 },
    /// A query is in flight and still within its timeout
    Waiting,
    /// The in-flight query went unanswered; the next tick moves on
    TimedOut { parameter_id: u8 },
    /// No on-demand signals are configured
    Disabled,
}

/// Counters kept alongside the state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollerStats {
    pub queries_sent: u64,
    pub responses_matched: u64,
    pub timeouts: u64,
    pub malformed_responses: u64,
    pub negative_responses: u64,
}

#[derive(Debug)]
struct PollerInner {
    state: ConversationState,
    /// Index of the definition the next query is for
    next_index: usize,
    stats: PollerStats,
}

/// Drives the round-robin query cycle over the configured on-demand signals
#[derive(Debug)]
pub struct ConversationPoller {
    config: PollerConfig,
    signals: Vec<ConversationSignalDefinition>,
    inner: Mutex<PollerInner>,
}

impl ConversationPoller {
    /// Create a poller; the cycle follows the order of `signals`
    pub fn new(config: PollerConfig, signals: Vec<ConversationSignalDefinition>) -> Self {
        Self {
            config,
            signals,
            inner: Mutex::new(PollerInner {
                state: ConversationState::Idle,
                next_index: 0,
                stats: PollerStats::default(),
            }),
        }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// The configured poll cycle
    pub fn signals(&self) -> &[ConversationSignalDefinition] {
        &self.signals
    }

    /// ID the ECU answers on
    pub fn response_id(&self) -> u32 {
        self.config.response_id
    }

    /// Snapshot of the current state
    pub fn state(&self) -> ConversationState {
        self.inner.lock().state
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> PollerStats {
        self.inner.lock().stats
    }

    /// Definition the next query will be sent for
    pub fn next_signal(&self) -> Option<&ConversationSignalDefinition> {
        let index = self.inner.lock().next_index;
        self.signals.get(index)
    }

    /// Advance the outbound cycle
    ///
    /// Sends the next query when idle, or gives up on the in-flight query once
    /// `response_timeout` has elapsed since it was sent. The frame is sent
    /// while the state lock is held, so a response is never processed before
    /// its query is marked in flight. A failed send leaves the poller idle
    /// (the cycle still advances) and returns the transport error.
    pub fn tick<B: CanBus + ?Sized>(&self, bus: &B, now: Instant) -> Result<TickOutcome, BusError> {
        if self.signals.is_empty() {
            return Ok(TickOutcome::Disabled);
        }

        let mut inner = self.inner.lock();
        let state = inner.state;

        match state {
            ConversationState::AwaitingResponse {
                parameter_id,
                sent_at,
                ..
            } => {
                if now.saturating_duration_since(sent_at) >= self.config.response_timeout {
                    log::warn!(
                        "No response to PID 0x{:02X} within {:?}, continuing with next query",
                        parameter_id,
                        self.config.response_timeout
                    );
                    inner.state = ConversationState::Idle;
                    inner.stats.timeouts += 1;
                    Ok(TickOutcome::TimedOut { parameter_id })
                } else {
                    Ok(TickOutcome::Waiting)
                }
            }
            ConversationState::Idle => {
                let index = inner.next_index;
                let signal = &self.signals[index];
                inner.next_index = (index + 1) % self.signals.len();

                let request = signal.build_request(self.config.send_id, self.config.filler_byte);
                inner.state = ConversationState::AwaitingResponse {
                    mode_id: signal.mode_id,
                    parameter_id: signal.parameter_id,
                    sent_at: now,
                };

                if let Err(e) = bus.send(&request) {
                    inner.state = ConversationState::Idle;
                    log::error!("Failed to send query for '{}': {}", signal.name, e);
                    return Err(e);
                }

                inner.stats.queries_sent += 1;
                log::debug!(
                    "Queried '{}' (mode 0x{:02X}, PID 0x{:02X})",
                    signal.name,
                    signal.mode_id,
                    signal.parameter_id
                );
                Ok(TickOutcome::Sent {
                    index,
                    parameter_id: signal.parameter_id,
                })
            }
        }
    }

    /// Handle a frame received on the response ID
    ///
    /// Clears the in-flight marker when the echoed mode/PID matches it, then
    /// decodes every configured signal with that mode/PID, whether or not it
    /// was this poller's query. Malformed frames are logged and yield no
    /// events.
    pub fn handle_response(&self, frame: &RawFrame, observed_at: Timestamp) -> Vec<DecodedEvent> {
        let header = match ResponseHeader::parse(&frame.data) {
            Ok(header) => header,
            Err(e) => {
                log::error!("Dropping response {}: {}", frame, e);
                self.inner.lock().stats.malformed_responses += 1;
                return Vec::new();
            }
        };

        let (mode_id, parameter_id) = match header {
            ResponseHeader::Positive {
                mode_id,
                parameter_id,
                ..
            } => (mode_id, parameter_id),
            ResponseHeader::Negative { mode_id, code } => {
                let mut inner = self.inner.lock();
                inner.stats.negative_responses += 1;
                let state = inner.state;
                if let ConversationState::AwaitingResponse {
                    mode_id: pending_mode,
                    parameter_id,
                    ..
                } = state
                {
                    if pending_mode == mode_id {
                        log::warn!(
                            "ECU rejected PID 0x{:02X} (mode 0x{:02X}, code 0x{:02X})",
                            parameter_id,
                            mode_id,
                            code
                        );
                        inner.state = ConversationState::Idle;
                        return Vec::new();
                    }
                }
                log::warn!(
                    "Negative response for mode 0x{:02X} (code 0x{:02X}) with no matching query",
                    mode_id,
                    code
                );
                return Vec::new();
            }
        };

        {
            let mut inner = self.inner.lock();
            let state = inner.state;
            if let ConversationState::AwaitingResponse {
                mode_id: pending_mode,
                parameter_id: pending_pid,
                ..
            } = state
            {
                if pending_mode == mode_id && pending_pid == parameter_id {
                    inner.state = ConversationState::Idle;
                    inner.stats.responses_matched += 1;
                }
            }
        }

        let value_end = frame.data.len();
        let mut events = Vec::new();
        for signal in self.signals.iter().filter(|s| s.matches(mode_id, parameter_id)) {
            let end = (RESPONSE_HEADER_LEN + signal.response_length as usize).min(value_end);
            let value_bytes = &frame.data[RESPONSE_HEADER_LEN..end];

            match signal.decoder.decode(value_bytes) {
                Ok(value) => {
                    log::debug!("{} = {}", signal.name, value);
                    events.push(DecodedEvent::new(signal.name.clone(), value, observed_at));
                }
                Err(e) => log::debug!("Skipping '{}' in response {}: {}", signal.name, frame, e),
            }
        }

        if events.is_empty() {
            log::trace!(
                "Response for mode 0x{:02X} PID 0x{:02X} matched no configured signal",
                mode_id,
                parameter_id
            );
        }

        events
    }
}
