//! Signal location table
//!
//! Maps a broadcast frame ID to every signal packed into that frame. Built
//! once at startup from configuration and then only read.

use crate::signals::registry::SignalDefinition;
use std::collections::HashMap;

/// All signals broadcast in one frame
#[derive(Debug, Clone)]
pub struct BroadcastSignalEntry {
    /// CAN frame ID
    pub frame_id: u32,
    /// Signals decoded from this frame
    pub signals: Vec<SignalDefinition>,
}

/// The broadcast signal table
#[derive(Debug, Clone, Default)]
pub struct SignalLocationTable {
    /// Key: frame ID, Value: entry with all signals in that frame
    entries: HashMap<u32, BroadcastSignalEntry>,

    /// Signal name lookup for quick access
    /// Key: signal name, Value: frame ID
    signal_lookup: HashMap<String, u32>,
}

impl SignalLocationTable {
    /// Create a new empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a signal as being broadcast in `frame_id`
    ///
    /// Signal names are unique across the table; re-adding a name moves it to
    /// the new frame.
    pub fn add_signal(&mut self, frame_id: u32, signal: SignalDefinition) {
        if let Some(previous) = self.signal_lookup.insert(signal.name.clone(), frame_id) {
            if let Some(entry) = self.entries.get_mut(&previous) {
                entry.signals.retain(|s| s.name != signal.name);
                if entry.signals.is_empty() {
                    self.entries.remove(&previous);
                }
            }
        }

        self.entries
            .entry(frame_id)
            .or_insert_with(|| BroadcastSignalEntry {
                frame_id,
                signals: Vec::new(),
            })
            .signals
            .push(signal);
    }

    /// Signals carried by a frame ID (empty when the ID is unknown)
    pub fn signals_for(&self, frame_id: u32) -> &[SignalDefinition] {
        self.entries
            .get(&frame_id)
            .map(|entry| entry.signals.as_slice())
            .unwrap_or(&[])
    }

    /// Get the entry for a frame ID
    pub fn get_entry(&self, frame_id: u32) -> Option<&BroadcastSignalEntry> {
        self.entries.get(&frame_id)
    }

    /// True if any signal is broadcast in this frame
    pub fn contains_frame(&self, frame_id: u32) -> bool {
        self.entries.contains_key(&frame_id)
    }

    /// Frame ID a signal is broadcast in
    pub fn find_signal(&self, signal_name: &str) -> Option<u32> {
        self.signal_lookup.get(signal_name).copied()
    }

    /// Names of every signal in the table, sorted
    pub fn signal_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.signal_lookup.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Get all frame IDs in the table, sorted
    pub fn frame_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Get table statistics
    pub fn stats(&self) -> TableStats {
        TableStats {
            num_frames: self.entries.len(),
            num_signals: self.signal_lookup.len(),
        }
    }
}

/// Table statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableStats {
    /// Number of distinct frame IDs
    pub num_frames: usize,
    /// Number of broadcast signals
    pub num_signals: usize,
}
