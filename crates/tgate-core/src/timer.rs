//! Keyed one-shot timers on an epoch-millisecond timeline.
//!
//! Setting a key that is already pending replaces its deadline, which gives
//! trailing-edge debounce for free. Periodic work re-arms its key after it
//! fires. No clock access: the owner passes `now_ms` in.

use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct TimerQueue<K: Ord + Copy> {
    deadlines: BTreeMap<K, u64>,
}

impl<K: Ord + Copy> Default for TimerQueue<K> {
    fn default() -> Self {
        Self {
            deadlines: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Copy> TimerQueue<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `key` to fire `delay_ms` after `now_ms`, replacing any pending deadline.
    pub fn set(&mut self, key: K, now_ms: u64, delay_ms: u64) {
        self.deadlines.insert(key, now_ms.saturating_add(delay_ms));
    }

    /// Disarm `key`. Returns `true` if it was pending.
    pub fn cancel(&mut self, key: K) -> bool {
        self.deadlines.remove(&key).is_some()
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<u64> {
        self.deadlines.values().min().copied()
    }

    /// Remove and return the earliest key due at `now_ms`.
    ///
    /// Ties resolve by key order so firing is deterministic.
    pub fn pop_due(&mut self, now_ms: u64) -> Option<K> {
        let key = self
            .deadlines
            .iter()
            .filter(|(_, due)| **due <= now_ms)
            .min_by_key(|(key, due)| (**due, **key))
            .map(|(key, _)| *key)?;
        self.deadlines.remove(&key);
        Some(key)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
