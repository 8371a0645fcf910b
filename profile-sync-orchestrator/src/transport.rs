//! Transport abstraction shared by the ephemeral and persistent channels.
//!
//! A [`ContextTransport`] is what one context actually talks through: the
//! primary broadcast channel when the session supports it, the persistent
//! storage channel otherwise, and the storage channel again as a runtime
//! fallback when a primary send fails.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use profile_sync_core::SyncConfig;

use crate::broadcast_channel::BroadcastHub;
use crate::error::TransportError;
use crate::storage_channel::SharedStorage;

/// Callback invoked with each raw payload received from another context.
pub type MessageListener = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Low-latency, non-persistent broadcast channel.
    Broadcast,
    /// Shared key-value slot with change notification.
    Storage,
    /// No cross-context channel; changes stay local.
    None,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Broadcast => write!(f, "broadcast"),
            TransportKind::Storage => write!(f, "storage"),
            TransportKind::None => write!(f, "none"),
        }
    }
}

/// A same-origin channel between contexts. Implementations never deliver a
/// payload back to the endpoint that posted it.
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    fn post(&self, payload: &str) -> Result<(), TransportError>;

    fn listen(&self, listener: MessageListener) -> ListenerId;

    /// Detach a listener. Returns `false` if it was not attached.
    fn unlisten(&self, id: ListenerId) -> bool;
}

/// Capabilities of the browsing session a context runs in.
#[derive(Clone, Default)]
pub struct SessionEnvironment {
    pub broadcast: Option<BroadcastHub>,
    pub storage: Option<SharedStorage>,
}

impl SessionEnvironment {
    /// A session with both channels available.
    pub fn full() -> Self {
        Self {
            broadcast: Some(BroadcastHub::new()),
            storage: Some(SharedStorage::new()),
        }
    }
}

static NEXT_COMPOSITE_LISTENER: AtomicU64 = AtomicU64::new(1);

/// Primary channel with optional runtime fallback.
pub struct ContextTransport {
    primary: Arc<dyn Transport>,
    fallback: Option<Arc<dyn Transport>>,
    listeners: Mutex<HashMap<ListenerId, Vec<(usize, ListenerId)>>>,
}

impl ContextTransport {
    pub fn new(primary: Arc<dyn Transport>, fallback: Option<Arc<dyn Transport>>) -> Self {
        Self {
            primary,
            fallback,
            listeners: Mutex::new(HashMap::new()),
        }
    }

    /// Select channels for one context: broadcast if supported, else
    /// storage, else `None`.
    pub fn connect(env: &SessionEnvironment, config: &SyncConfig) -> Option<Self> {
        let storage = env
            .storage
            .as_ref()
            .filter(|storage| storage.is_available())
            .map(|storage| Arc::new(storage.channel(&config.storage_key)) as Arc<dyn Transport>);
        let broadcast = env
            .broadcast
            .as_ref()
            .and_then(|hub| hub.open(&config.channel_name))
            .map(|channel| Arc::new(channel) as Arc<dyn Transport>);

        let transport = match (broadcast, storage) {
            (Some(primary), fallback) => Some(Self::new(primary, fallback)),
            (None, Some(storage)) => Some(Self::new(storage, None)),
            (None, None) => None,
        };
        match &transport {
            Some(t) => tracing::debug!(kind = %t.kind(), "selected sync transport"),
            None => tracing::warn!("no cross-context transport available; sync stays local"),
        }
        transport
    }

    fn channels(&self) -> impl Iterator<Item = &Arc<dyn Transport>> {
        std::iter::once(&self.primary).chain(self.fallback.iter())
    }
}

impl Transport for ContextTransport {
    fn kind(&self) -> TransportKind {
        self.primary.kind()
    }

    fn post(&self, payload: &str) -> Result<(), TransportError> {
        let primary_err = match self.primary.post(payload) {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };
        let Some(fallback) = &self.fallback else {
            return Err(primary_err);
        };
        tracing::debug!(error = %primary_err, "primary channel send failed; trying fallback");
        fallback.post(payload).map_err(|fallback_err| {
            TransportError::AllChannelsFailed(format!(
                "{}: {primary_err}; {}: {fallback_err}",
                self.primary.kind(),
                fallback.kind()
            ))
        })
    }

    fn listen(&self, listener: MessageListener) -> ListenerId {
        let id = ListenerId(NEXT_COMPOSITE_LISTENER.fetch_add(1, Ordering::Relaxed));
        let inner = self
            .channels()
            .enumerate()
            .map(|(index, channel)| (index, channel.listen(listener.clone())))
            .collect();
        self.listeners.lock().insert(id, inner);
        id
    }

    fn unlisten(&self, id: ListenerId) -> bool {
        let Some(inner) = self.listeners.lock().remove(&id) else {
            return false;
        };
        let channels: Vec<_> = self.channels().collect();
        for (index, inner_id) in inner {
            if let Some(channel) = channels.get(index) {
                channel.unlisten(inner_id);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector() -> (Arc<Mutex<Vec<String>>>, MessageListener) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, Arc::new(move |raw: &str| sink.lock().push(raw.to_string())))
    }

    #[test]
    fn connect_prefers_broadcast_then_storage_then_none() {
        let config = SyncConfig::default();

        let full = SessionEnvironment::full();
        let t = ContextTransport::connect(&full, &config).unwrap();
        assert_eq!(t.kind(), TransportKind::Broadcast);

        let storage_only = SessionEnvironment {
            broadcast: Some(BroadcastHub::unsupported()),
            storage: Some(SharedStorage::new()),
        };
        let t = ContextTransport::connect(&storage_only, &config).unwrap();
        assert_eq!(t.kind(), TransportKind::Storage);

        let nothing = SessionEnvironment {
            broadcast: None,
            storage: Some(SharedStorage::unavailable()),
        };
        assert!(ContextTransport::connect(&nothing, &config).is_none());
    }

    #[test]
    fn falls_back_to_storage_when_broadcast_is_closed() {
        let env = SessionEnvironment::full();
        let config = SyncConfig::default();
        let sender = ContextTransport::connect(&env, &config).unwrap();
        let receiver = ContextTransport::connect(&env, &config).unwrap();
        let (seen, listener) = collector();
        receiver.listen(listener);

        sender.post("one").unwrap();
        if let Some(hub) = &env.broadcast {
            hub.close_all();
        }
        sender.post("two").unwrap();

        assert_eq!(*seen.lock(), vec!["one", "two"]);
    }

    #[test]
    fn reports_all_channels_failed() {
        let env = SessionEnvironment {
            broadcast: Some(BroadcastHub::new()),
            storage: Some(SharedStorage::with_quota(4)),
        };
        let sender = ContextTransport::connect(&env, &SyncConfig::default()).unwrap();
        if let Some(hub) = &env.broadcast {
            hub.close_all();
        }
        let err = sender.post("longer than four bytes").unwrap_err();
        assert!(matches!(err, TransportError::AllChannelsFailed(_)), "got: {err}");
        assert!(err.to_string().contains("broadcast"));
        assert!(err.to_string().contains("storage"));
    }

    #[test]
    fn unlisten_detaches_from_every_channel() {
        let env = SessionEnvironment::full();
        let config = SyncConfig::default();
        let sender = ContextTransport::connect(&env, &config).unwrap();
        let receiver = ContextTransport::connect(&env, &config).unwrap();
        let (seen, listener) = collector();
        let id = receiver.listen(listener);

        assert!(receiver.unlisten(id));
        assert!(!receiver.unlisten(id));
        sender.post("ignored").unwrap();
        assert!(seen.lock().is_empty());
    }
}
