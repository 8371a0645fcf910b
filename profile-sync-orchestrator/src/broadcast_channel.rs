//! In-process broadcast channel: named topics fanned out synchronously to
//! every other open endpoint on the same hub.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::TransportError;
use crate::transport::{ListenerId, MessageListener, Transport, TransportKind};

struct Endpoint {
    name: String,
    listeners: Vec<(ListenerId, MessageListener)>,
}

#[derive(Default)]
struct HubState {
    next_endpoint: u64,
    next_listener: u64,
    endpoints: HashMap<u64, Endpoint>,
}

/// Shared broadcast medium for one browsing session. Clones share state.
#[derive(Clone)]
pub struct BroadcastHub {
    supported: bool,
    state: Arc<RwLock<HubState>>,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self {
            supported: true,
            state: Arc::new(RwLock::new(HubState::default())),
        }
    }

    /// A session without broadcast support: `open` always returns `None`.
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new()
        }
    }

    pub fn is_supported(&self) -> bool {
        self.supported
    }

    pub fn open(&self, name: &str) -> Option<BroadcastChannel> {
        if !self.supported {
            return None;
        }
        let mut state = self.state.write();
        state.next_endpoint += 1;
        let id = state.next_endpoint;
        state.endpoints.insert(
            id,
            Endpoint {
                name: name.to_string(),
                listeners: Vec::new(),
            },
        );
        Some(BroadcastChannel {
            hub: self.clone(),
            endpoint: id,
        })
    }

    /// Close every endpoint, as if the session tore the channel down.
    pub fn close_all(&self) {
        self.state.write().endpoints.clear();
    }

    pub fn open_endpoints(&self) -> usize {
        self.state.read().endpoints.len()
    }
}

/// One context's endpoint on a [`BroadcastHub`] topic.
pub struct BroadcastChannel {
    hub: BroadcastHub,
    endpoint: u64,
}

impl BroadcastChannel {
    pub fn close(&self) {
        self.hub.state.write().endpoints.remove(&self.endpoint);
    }

    pub fn is_closed(&self) -> bool {
        !self.hub.state.read().endpoints.contains_key(&self.endpoint)
    }
}

impl Drop for BroadcastChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl Transport for BroadcastChannel {
    fn kind(&self) -> TransportKind {
        TransportKind::Broadcast
    }

    fn post(&self, payload: &str) -> Result<(), TransportError> {
        let targets: Vec<MessageListener> = {
            let state = self.hub.state.read();
            let Some(own) = state.endpoints.get(&self.endpoint) else {
                return Err(TransportError::Closed {
                    channel: TransportKind::Broadcast,
                });
            };
            state
                .endpoints
                .iter()
                .filter(|(id, endpoint)| **id != self.endpoint && endpoint.name == own.name)
                .flat_map(|(_, endpoint)| endpoint.listeners.iter().map(|(_, l)| l.clone()))
                .collect()
        };
        // Listeners may post in turn; the lock is already released.
        for listener in targets {
            listener(payload);
        }
        Ok(())
    }

    fn listen(&self, listener: MessageListener) -> ListenerId {
        let mut state = self.hub.state.write();
        state.next_listener += 1;
        let id = ListenerId(state.next_listener);
        if let Some(endpoint) = state.endpoints.get_mut(&self.endpoint) {
            endpoint.listeners.push((id, listener));
        }
        id
    }

    fn unlisten(&self, id: ListenerId) -> bool {
        let mut state = self.hub.state.write();
        let Some(endpoint) = state.endpoints.get_mut(&self.endpoint) else {
            return false;
        };
        let before = endpoint.listeners.len();
        endpoint.listeners.retain(|(existing, _)| *existing != id);
        endpoint.listeners.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn delivers_to_peers_on_same_name_only() {
        let hub = BroadcastHub::new();
        let a = hub.open("profile-sync").unwrap();
        let b = hub.open("profile-sync").unwrap();
        let other = hub.open("unrelated").unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        for (label, channel) in [("a", &a), ("b", &b), ("other", &other)] {
            let seen = seen.clone();
            channel.listen(Arc::new(move |raw: &str| {
                seen.lock().push(format!("{label}:{raw}"))
            }));
        }

        a.post("hello").unwrap();
        assert_eq!(*seen.lock(), vec!["b:hello"]);
    }

    #[test]
    fn closed_endpoint_refuses_posts_and_is_removed_on_drop() {
        let hub = BroadcastHub::new();
        let a = hub.open("x").unwrap();
        {
            let _b = hub.open("x").unwrap();
            assert_eq!(hub.open_endpoints(), 2);
        }
        assert_eq!(hub.open_endpoints(), 1);

        a.close();
        assert!(a.is_closed());
        assert_eq!(
            a.post("late"),
            Err(TransportError::Closed {
                channel: TransportKind::Broadcast
            })
        );
    }

    #[test]
    fn unsupported_hub_opens_nothing() {
        assert!(BroadcastHub::unsupported().open("x").is_none());
    }
}
