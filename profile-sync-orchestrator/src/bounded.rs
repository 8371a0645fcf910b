//! Capacity-bounded collections used by the orchestrator.
//!
//! Every structure here has a hard cap; inserting past it evicts the
//! oldest entry rather than growing.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;

use profile_sync_core::{EventKey, ProfileChangeEvent};

// ---------------------------------------------------------------------------
// Offline queue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueuePush {
    Inserted,
    /// An entry with the same key was replaced in place.
    Replaced,
    /// A newer entry with the same key is already queued; nothing changed.
    Stale,
    /// The queue was full; the oldest entry was dropped.
    Evicted(Box<ProfileChangeEvent>),
}

/// FIFO of pending events holding at most one entry per [`EventKey`].
#[derive(Debug, Clone)]
pub struct KeyedQueue {
    capacity: usize,
    entries: VecDeque<ProfileChangeEvent>,
}

impl KeyedQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    /// Insert `event`, replacing an older same-key entry without changing
    /// its position.
    pub fn push(&mut self, event: ProfileChangeEvent) -> QueuePush {
        let key = event.key();
        if let Some(slot) = self.entries.iter_mut().find(|e| e.key() == key) {
            if slot.timestamp() > event.timestamp() {
                return QueuePush::Stale;
            }
            *slot = event;
            return QueuePush::Replaced;
        }
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(event);
        match evicted {
            Some(old) => QueuePush::Evicted(Box::new(old)),
            None => QueuePush::Inserted,
        }
    }

    pub fn drain(&mut self) -> Vec<ProfileChangeEvent> {
        self.entries.drain(..).collect()
    }

    pub fn get(&self, key: &EventKey) -> Option<&ProfileChangeEvent> {
        self.entries.iter().find(|e| e.key() == *key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProfileChangeEvent> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// ---------------------------------------------------------------------------
// Failed events
// ---------------------------------------------------------------------------

/// An event that exhausted its retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedEvent {
    pub event: ProfileChangeEvent,
    pub error: String,
    /// Scheduler milliseconds at which the event was given up on.
    pub timestamp: u64,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailedPush {
    Inserted,
    /// An older failure for the same key was replaced in place.
    Replaced,
    /// A newer failure for the same key is already recorded.
    Stale,
    /// The list was full; the oldest entry was dropped.
    Evicted(Box<FailedEvent>),
}

/// Dead-letter list holding at most one entry per [`EventKey`].
#[derive(Debug, Clone)]
pub struct FailedEvents {
    capacity: usize,
    entries: VecDeque<FailedEvent>,
}

impl FailedEvents {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    pub fn push(&mut self, failed: FailedEvent) -> FailedPush {
        let key = failed.event.key();
        if let Some(slot) = self.entries.iter_mut().find(|e| e.event.key() == key) {
            if slot.event.timestamp() > failed.event.timestamp() {
                return FailedPush::Stale;
            }
            *slot = failed;
            return FailedPush::Replaced;
        }
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(failed);
        match evicted {
            Some(old) => FailedPush::Evicted(Box::new(old)),
            None => FailedPush::Inserted,
        }
    }

    /// Drop the entry for `key` if a value at least as new as `timestamp`
    /// has replaced it. Returns whether anything was removed.
    pub fn remove_superseded(&mut self, key: &EventKey, timestamp: u64) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|e| e.event.key() != *key || e.event.timestamp() > timestamp);
        self.entries.len() != before
    }

    pub fn take_all(&mut self) -> Vec<FailedEvent> {
        self.entries.drain(..).collect()
    }

    pub fn to_vec(&self) -> Vec<FailedEvent> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// ---------------------------------------------------------------------------
// Frequency tracking
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct FrequencyCounter {
    count: u32,
    window_start: u64,
    latest_timestamp: u64,
}

/// Per-key event counts over a rolling window, capped at `capacity` keys.
#[derive(Debug, Clone)]
pub struct FrequencyTracker {
    window_ms: u64,
    capacity: usize,
    counters: HashMap<EventKey, FrequencyCounter>,
}

impl FrequencyTracker {
    pub fn new(window_ms: u64, capacity: usize) -> Self {
        Self {
            window_ms,
            capacity: capacity.max(1),
            counters: HashMap::new(),
        }
    }

    /// Count one event for `key` at scheduler time `now`, remembering the
    /// event's own timestamp. Returns the count within the current window.
    pub fn record(&mut self, key: EventKey, now: u64, event_timestamp: u64) -> u32 {
        if !self.counters.contains_key(&key) && self.counters.len() >= self.capacity {
            self.evict_oldest();
        }
        let window_ms = self.window_ms;
        let counter = self.counters.entry(key).or_insert(FrequencyCounter {
            count: 0,
            window_start: now,
            latest_timestamp: event_timestamp,
        });
        if now.saturating_sub(counter.window_start) >= window_ms {
            counter.count = 0;
            counter.window_start = now;
        }
        counter.count += 1;
        counter.latest_timestamp = counter.latest_timestamp.max(event_timestamp);
        counter.count
    }

    /// Newest event timestamp seen for `key`, if it is still tracked.
    pub fn latest_timestamp(&self, key: &EventKey) -> Option<u64> {
        self.counters.get(key).map(|c| c.latest_timestamp)
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    pub fn clear(&mut self) {
        self.counters.clear();
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .counters
            .iter()
            .min_by_key(|(_, c)| c.window_start)
            .map(|(key, _)| *key);
        if let Some(key) = oldest {
            self.counters.remove(&key);
        }
    }
}
