//! Car state store
//!
//! Keeps the last decoded value of every signal and notifies consumers of
//! each update. Every signal name owns its own slot, so updates to different
//! signals never contend on a shared lock; the map of slots is only
//! write-locked the first time a name is seen.

use crate::types::{DecodedEvent, SignalValue, Timestamp};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// Default capacity of a subscriber channel
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 1024;

/// Last known value of a signal
#[derive(Debug, Clone, PartialEq)]
pub struct StoredValue {
    pub value: SignalValue,
    pub observed_at: Timestamp,
}

type Slot = Arc<Mutex<Option<StoredValue>>>;
type UpdateCallback = Arc<dyn Fn(&str, &SignalValue) + Send + Sync>;

/// Last-known-value cache with change notification
#[derive(Default)]
pub struct CarStateStore {
    slots: RwLock<HashMap<String, Slot>>,
    subscribers: Mutex<Vec<Sender<DecodedEvent>>>,
    callbacks: RwLock<Vec<UpdateCallback>>,
}

impl CarStateStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with a slot for each known signal name
    pub fn with_signals<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let slots = names
            .into_iter()
            .map(|name| (name.into(), Slot::default()))
            .collect();

        Self {
            slots: RwLock::new(slots),
            ..Self::default()
        }
    }

    fn slot(&self, signal_name: &str) -> Slot {
        if let Some(slot) = self.slots.read().get(signal_name) {
            return Arc::clone(slot);
        }

        Arc::clone(
            self.slots
                .write()
                .entry(signal_name.to_string())
                .or_default(),
        )
    }

    /// Record a decoded value and notify consumers
    ///
    /// The value is written before any consumer is notified; consumers may
    /// call back into the store.
    pub fn update(&self, event: DecodedEvent) {
        let slot = self.slot(&event.signal_name);
        *slot.lock() = Some(StoredValue {
            value: event.value.clone(),
            observed_at: event.observed_at,
        });

        self.publish(event);
    }

    fn publish(&self, event: DecodedEvent) {
        let callbacks: Vec<UpdateCallback> = self.callbacks.read().clone();
        for callback in &callbacks {
            callback(&event.signal_name, &event.value);
        }

        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::trace!("Subscriber queue full, dropping update for '{}'", event.signal_name);
                true
            }
            Err(TrySendError::Disconnected(_)) => {
                log::debug!("Removing disconnected subscriber");
                false
            }
        });
    }

    /// Last known value of a signal, if it has ever been observed
    pub fn get(&self, signal_name: &str) -> Option<SignalValue> {
        self.get_entry(signal_name).map(|stored| stored.value)
    }

    /// Last known value and the time it was observed
    pub fn get_entry(&self, signal_name: &str) -> Option<StoredValue> {
        let slot = self.slots.read().get(signal_name).cloned()?;
        let stored = slot.lock().clone();
        stored
    }

    /// Every observed value, sorted by signal name
    pub fn snapshot(&self) -> Vec<(String, StoredValue)> {
        let slots: Vec<(String, Slot)> = self
            .slots
            .read()
            .iter()
            .map(|(name, slot)| (name.clone(), Arc::clone(slot)))
            .collect();

        let mut values: Vec<(String, StoredValue)> = slots
            .into_iter()
            .filter_map(|(name, slot)| slot.lock().clone().map(|stored| (name, stored)))
            .collect();
        values.sort_by(|a, b| a.0.cmp(&b.0));
        values
    }

    /// Number of signals with a slot (observed or pre-registered)
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribe to every update through a bounded channel
    ///
    /// Updates are dropped for a subscriber whose queue is full; dropping the
    /// receiver unsubscribes.
    pub fn subscribe(&self) -> Receiver<DecodedEvent> {
        self.subscribe_with_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }

    pub fn subscribe_with_capacity(&self, capacity: usize) -> Receiver<DecodedEvent> {
        let (tx, rx) = channel::bounded(capacity);
        self.subscribers.lock().push(tx);
        rx
    }

    /// Register an observer called with `(signal_name, value)` on every update
    pub fn on_update<F>(&self, callback: F)
    where
        F: Fn(&str, &SignalValue) + Send + Sync + 'static,
    {
        self.callbacks.write().push(Arc::new(callback));
    }
}

impl std::fmt::Debug for CarStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CarStateStore")
            .field("signals", &self.len())
            .field("subscribers", &self.subscribers.lock().len())
            .field("callbacks", &self.callbacks.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(name: &str, value: i64) -> DecodedEvent {
        DecodedEvent::new(name, SignalValue::Integer(value), Utc::now())
    }

    #[test]
    fn test_get_unknown_is_none() {
        let store = CarStateStore::with_signals(["rpm", "gear"]);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("rpm"), None);
        assert_eq!(store.get("boost_pressure"), None);
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_last_write_wins() {
        let store = CarStateStore::new();
        for rpm in 0..100 {
            store.update(event("rpm", rpm));
        }
        assert_eq!(store.get("rpm"), Some(SignalValue::Integer(99)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_last_write_wins_with_concurrent_writers() {
        let store = Arc::new(CarStateStore::new());
        let writers: Vec<_> = (0..4)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let name = format!("other{t}");
                    for value in 0..5000 {
                        store.update(event(&name, value));
                    }
                })
            })
            .collect();

        for rpm in 0..5000 {
            store.update(event("rpm", rpm));
        }
        for writer in writers {
            writer.join().unwrap();
        }

        assert_eq!(store.get("rpm"), Some(SignalValue::Integer(4999)));
        assert_eq!(store.get("other3"), Some(SignalValue::Integer(4999)));
        assert_eq!(store.len(), 5);
    }

    #[test]
    fn test_subscribers_and_callbacks_see_updates() {
        let store = CarStateStore::new();
        let rx = store.subscribe();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        store.on_update(move |name, _| {
            assert_eq!(name, "gear");
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.update(event("gear", 3));
        store.update(event("gear", 4));

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let received: Vec<i64> = rx.try_iter().filter_map(|e| e.value.as_i64()).collect();
        assert_eq!(received, vec![3, 4]);
    }

    #[test]
    fn test_callback_can_read_back() {
        let store = Arc::new(CarStateStore::new());
        let seen = Arc::new(Mutex::new(None));
        let (store_ref, seen_ref) = (Arc::downgrade(&store), Arc::clone(&seen));
        store.on_update(move |name, _| {
            if let Some(store) = store_ref.upgrade() {
                *seen_ref.lock() = store.get(name);
            }
        });

        store.update(event("oil_temp", 90));
        assert_eq!(*seen.lock(), Some(SignalValue::Integer(90)));
    }

    #[test]
    fn test_full_and_dropped_subscribers() {
        let store = CarStateStore::new();
        let small = store.subscribe_with_capacity(1);
        let dropped = store.subscribe();
        drop(dropped);

        store.update(event("rpm", 1));
        store.update(event("rpm", 2));

        assert_eq!(small.try_iter().count(), 1);
        assert_eq!(store.subscribers.lock().len(), 1);
        assert_eq!(store.get("rpm"), Some(SignalValue::Integer(2)));
    }
}
