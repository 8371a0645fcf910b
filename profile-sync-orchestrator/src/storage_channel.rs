//! Persistent key-value fallback channel.
//!
//! [`SharedStorage`] models session-shared storage: writes notify every
//! watcher except the writer with the old and new value. A
//! [`StorageChannel`] posts by writing a payload under its key and
//! immediately removing it, so each post produces exactly one non-empty
//! change notification and the slot never holds stale data.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::TransportError;
use crate::transport::{ListenerId, MessageListener, Transport, TransportKind};

/// A change as observed by other writers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    pub key: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

type Watcher = Arc<dyn Fn(&StorageChange) + Send + Sync>;

#[derive(Default)]
struct StorageState {
    items: HashMap<String, String>,
    next_writer: u64,
    next_watch: u64,
    /// (watch id, owning writer, callback)
    watchers: Vec<(u64, u64, Watcher)>,
}

#[derive(Clone)]
pub struct SharedStorage {
    available: bool,
    quota: Option<usize>,
    state: Arc<Mutex<StorageState>>,
}

impl Default for SharedStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedStorage {
    pub fn new() -> Self {
        Self {
            available: true,
            quota: None,
            state: Arc::new(Mutex::new(StorageState::default())),
        }
    }

    /// Storage that rejects any single value larger than `quota` bytes.
    pub fn with_quota(quota: usize) -> Self {
        Self {
            quota: Some(quota),
            ..Self::new()
        }
    }

    /// Storage disabled by the environment (private mode, policy).
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn get_item(&self, key: &str) -> Option<String> {
        self.state.lock().items.get(key).cloned()
    }

    /// Open a channel endpoint on `key` with its own writer identity.
    pub fn channel(&self, key: &str) -> StorageChannel {
        let writer = {
            let mut state = self.state.lock();
            state.next_writer += 1;
            state.next_writer
        };
        StorageChannel {
            storage: self.clone(),
            key: key.to_string(),
            writer,
            watches: Mutex::new(HashMap::new()),
        }
    }

    fn set_item(&self, writer: u64, key: &str, value: &str) -> Result<(), TransportError> {
        if !self.available {
            return Err(TransportError::Unavailable {
                channel: TransportKind::Storage,
            });
        }
        if let Some(quota) = self.quota {
            if value.len() > quota {
                return Err(TransportError::QuotaExceeded {
                    size: value.len(),
                    quota,
                });
            }
        }
        let (old_value, watchers) = {
            let mut state = self.state.lock();
            let old = state.items.insert(key.to_string(), value.to_string());
            (old, Self::watchers_except(&state, writer))
        };
        Self::notify(
            &watchers,
            &StorageChange {
                key: key.to_string(),
                old_value,
                new_value: Some(value.to_string()),
            },
        );
        Ok(())
    }

    fn remove_item(&self, writer: u64, key: &str) {
        let (old_value, watchers) = {
            let mut state = self.state.lock();
            let Some(old) = state.items.remove(key) else {
                return;
            };
            (old, Self::watchers_except(&state, writer))
        };
        Self::notify(
            &watchers,
            &StorageChange {
                key: key.to_string(),
                old_value: Some(old_value),
                new_value: None,
            },
        );
    }

    fn watchers_except(state: &StorageState, writer: u64) -> Vec<Watcher> {
        state
            .watchers
            .iter()
            .filter(|(_, owner, _)| *owner != writer)
            .map(|(_, _, w)| w.clone())
            .collect()
    }

    fn notify(watchers: &[Watcher], change: &StorageChange) {
        for watcher in watchers {
            watcher(change);
        }
    }

    fn watch(&self, writer: u64, watcher: Watcher) -> u64 {
        let mut state = self.state.lock();
        state.next_watch += 1;
        let id = state.next_watch;
        state.watchers.push((id, writer, watcher));
        id
    }

    fn unwatch(&self, id: u64) -> bool {
        let mut state = self.state.lock();
        let before = state.watchers.len();
        state.watchers.retain(|(existing, _, _)| *existing != id);
        state.watchers.len() != before
    }
}

/// One context's endpoint on a storage key.
pub struct StorageChannel {
    storage: SharedStorage,
    key: String,
    writer: u64,
    watches: Mutex<HashMap<ListenerId, u64>>,
}

impl StorageChannel {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Transport for StorageChannel {
    fn kind(&self) -> TransportKind {
        TransportKind::Storage
    }

    fn post(&self, payload: &str) -> Result<(), TransportError> {
        self.storage.set_item(self.writer, &self.key, payload)?;
        self.storage.remove_item(self.writer, &self.key);
        Ok(())
    }

    fn listen(&self, listener: MessageListener) -> ListenerId {
        let key = self.key.clone();
        let watch = self.storage.watch(
            self.writer,
            Arc::new(move |change: &StorageChange| {
                if change.key != key {
                    return;
                }
                if let Some(value) = &change.new_value {
                    listener(value);
                }
            }),
        );
        let id = ListenerId(watch);
        self.watches.lock().insert(id, watch);
        id
    }

    fn unlisten(&self, id: ListenerId) -> bool {
        match self.watches.lock().remove(&id) {
            Some(watch) => self.storage.unwatch(watch),
            None => false,
        }
    }
}

impl Drop for StorageChannel {
    fn drop(&mut self) {
        for (_, watch) in self.watches.lock().drain() {
            self.storage.unwatch(watch);
        }
    }
}
