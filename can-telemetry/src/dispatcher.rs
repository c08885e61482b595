//! Frame dispatcher
//!
//! Single entry point for every inbound frame. Each frame is routed to one of:
//! 1. the conversation poller, if it arrived on the diagnostic response ID
//! 2. every decoder registered for its ID in the signal location table
//! 3. nowhere, if the ID is unknown (the bus carries plenty of traffic we do
//!    not decode)

use crate::conversation::ConversationPoller;
use crate::derived::GearEstimator;
use crate::signals::SignalLocationTable;
use crate::store::CarStateStore;
use crate::types::{DecodedEvent, RawFrame, Timestamp};
use chrono::Utc;
use std::sync::Arc;

/// What happened to one inbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The bus returned no frame
    Idle,
    /// Unknown frame ID, dropped silently
    Ignored,
    /// Broadcast frame; counts of decoded and skipped signals
    Broadcast { decoded: usize, failed: usize },
    /// Diagnostic response handed to the poller
    Conversation { decoded: usize },
}

/// Routes frames and publishes decoded events to the car state store
#[derive(Debug)]
pub struct FrameDispatcher {
    table: SignalLocationTable,
    poller: Arc<ConversationPoller>,
    store: Arc<CarStateStore>,
    gear_estimator: Option<GearEstimator>,
}

impl FrameDispatcher {
    pub fn new(
        table: SignalLocationTable,
        poller: Arc<ConversationPoller>,
        store: Arc<CarStateStore>,
    ) -> Self {
        Self {
            table,
            poller,
            store,
            gear_estimator: None,
        }
    }

    /// Also publish `estimated_gear` derived from rpm and vehicle speed
    pub fn with_gear_estimator(mut self, estimator: GearEstimator) -> Self {
        self.gear_estimator = Some(estimator);
        self
    }

    pub fn table(&self) -> &SignalLocationTable {
        &self.table
    }

    pub fn store(&self) -> &Arc<CarStateStore> {
        &self.store
    }

    /// Handle the result of one bus read
    pub fn dispatch(&self, frame: Option<&RawFrame>) -> DispatchOutcome {
        let Some(frame) = frame else {
            return DispatchOutcome::Idle;
        };
        let observed_at = Utc::now();

        if frame.id == self.poller.response_id() {
            let events = self.poller.handle_response(frame, observed_at);
            let decoded = events.len();
            for event in events {
                self.store.update(event);
            }
            return DispatchOutcome::Conversation { decoded };
        }

        if !self.table.contains_frame(frame.id) {
            log::trace!("Ignoring unknown frame 0x{:X}", frame.id);
            return DispatchOutcome::Ignored;
        }

        let (events, failed) = self.decode_broadcast(frame, observed_at);
        let decoded = events.len();
        for event in events {
            let derived = self
                .gear_estimator
                .as_ref()
                .and_then(|estimator| estimator.observe(&event));
            self.store.update(event);
            if let Some(derived) = derived {
                self.store.update(derived);
            }
        }

        DispatchOutcome::Broadcast { decoded, failed }
    }

    /// Decode every signal registered for a broadcast frame
    ///
    /// A signal whose span does not fit the payload is skipped; the others in
    /// the same frame are still decoded. Returns the events and the number of
    /// skipped signals.
    pub fn decode_broadcast(&self, frame: &RawFrame, observed_at: Timestamp) -> (Vec<DecodedEvent>, usize) {
        let mut events = Vec::new();
        let mut failed = 0;

        for signal in self.table.signals_for(frame.id) {
            match signal.decode(&frame.data) {
                Ok(value) => events.push(DecodedEvent::new(signal.name.clone(), value, observed_at)),
                Err(e) => {
                    failed += 1;
                    log::debug!("Skipping '{}' in frame {}: {}", signal.name, frame, e);
                }
            }
        }

        (events, failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{ConversationSignalDefinition, PollerConfig};
    use crate::signals::{FieldSpec, SignalDecoder, SignalDefinition, SignalKind};
    use crate::types::SignalValue;

    const RESPONSE_ID: u32 = 0x7E8;

    fn dispatcher() -> FrameDispatcher {
        let mut table = SignalLocationTable::new();
        table.add_signal(0x141, SignalDefinition::builtin(SignalKind::Rpm));
        table.add_signal(0x141, SignalDefinition::builtin(SignalKind::Gear));
        table.add_signal(0x0D1, SignalDefinition::builtin(SignalKind::VehicleSpeed));
        table.add_signal(0x002, SignalDefinition::field("steering_angle", FieldSpec::new(0, 16).with_signed(true)));

        let poller = ConversationPoller::new(
            PollerConfig::new(0x7E0, RESPONSE_ID),
            vec![ConversationSignalDefinition::new(
                "throttle_position",
                0x01,
                0x11,
                1,
                SignalDecoder::Builtin(SignalKind::ThrottlePosition),
            )
            .unwrap()],
        );

        FrameDispatcher::new(table, Arc::new(poller), Arc::new(CarStateStore::new()))
    }

    #[test]
    fn test_no_frame_is_a_noop() {
        let dispatcher = dispatcher();
        assert_eq!(dispatcher.dispatch(None), DispatchOutcome::Idle);
        assert!(dispatcher.store().is_empty());
    }

    #[test]
    fn test_unknown_frame_is_ignored() {
        let dispatcher = dispatcher();
        let frame = RawFrame::new(0x555, &[0xFF; 8]).unwrap();
        assert_eq!(dispatcher.dispatch(Some(&frame)), DispatchOutcome::Ignored);
        assert!(dispatcher.store().snapshot().is_empty());
    }

    #[test]
    fn test_shared_frame_decodes_every_signal() {
        let dispatcher = dispatcher();
        let frame = RawFrame::new(0x141, &[0, 0, 0, 0, 0xB8, 0x0B, 0x03, 0]).unwrap();

        assert_eq!(
            dispatcher.dispatch(Some(&frame)),
            DispatchOutcome::Broadcast { decoded: 2, failed: 0 }
        );
        assert_eq!(dispatcher.store().get("rpm"), Some(SignalValue::Integer(3000)));
        assert_eq!(dispatcher.store().get("gear"), Some(SignalValue::Integer(3)));
    }

    #[test]
    fn test_short_frame_skips_only_affected_signals() {
        let dispatcher = dispatcher();
        // Six bytes: enough for rpm, too short for gear (byte 6).
        let frame = RawFrame::new(0x141, &[0, 0, 0, 0, 0xFF, 0x0F]).unwrap();

        assert_eq!(
            dispatcher.dispatch(Some(&frame)),
            DispatchOutcome::Broadcast { decoded: 1, failed: 1 }
        );
        assert_eq!(dispatcher.store().get("rpm"), Some(SignalValue::Integer(4095)));
        assert_eq!(dispatcher.store().get("gear"), None);
    }

    #[test]
    fn test_configured_field_signal() {
        let dispatcher = dispatcher();
        let frame = RawFrame::new(0x002, &[0x38, 0xFF]).unwrap();
        dispatcher.dispatch(Some(&frame));
        assert_eq!(dispatcher.store().get("steering_angle"), Some(SignalValue::Integer(-200)));
    }

    #[test]
    fn test_response_frame_goes_to_poller() {
        let dispatcher = dispatcher();
        let frame = RawFrame::new(RESPONSE_ID, &[0x01, 0x41, 0x11, 0xFF, 0, 0, 0, 0]).unwrap();

        assert_eq!(
            dispatcher.dispatch(Some(&frame)),
            DispatchOutcome::Conversation { decoded: 1 }
        );
        assert_eq!(dispatcher.store().get("throttle_position"), Some(SignalValue::Float(100.0)));
    }

    #[test]
    fn test_gear_estimate_is_published() {
        let dispatcher = dispatcher().with_gear_estimator(GearEstimator::default());
        // 3000 rpm, then 20 km/h (0x0173 * 0.05625 = 20.8)
        dispatcher.dispatch(Some(&RawFrame::new(0x141, &[0, 0, 0, 0, 0xB8, 0x0B, 0x01, 0]).unwrap()));
        dispatcher.dispatch(Some(&RawFrame::new(0x0D1, &[0x73, 0x01]).unwrap()));

        assert_eq!(dispatcher.store().get("estimated_gear"), Some(SignalValue::Integer(1)));
    }
}
