//! # profile-sync-orchestrator
//!
//! Best-effort pub/sub bus that keeps profile state consistent across
//! contexts sharing one browser session.
//!
//! Build a [`SyncOrchestrator`] with a [`Scheduler`](profile_sync_core::Scheduler),
//! an optional [`Transport`] (see [`ContextTransport::connect`]) and a
//! reachability probe, then call [`SyncOrchestrator::broadcast`] for local
//! changes and [`SyncOrchestrator::subscribe`] for remote ones.

pub mod bounded;
pub mod broadcast_channel;
pub mod connectivity;
pub mod error;
pub mod orchestrator;
pub mod registry;
pub mod storage_channel;
pub mod transport;

pub use bounded::{
    FailedEvent, FailedEvents, FailedPush, FrequencyTracker, KeyedQueue, QueuePush,
};
pub use broadcast_channel::{BroadcastChannel, BroadcastHub};
pub use connectivity::{AlwaysReachable, ConnectivityTracker, ReachabilityProbe, Transition};
pub use error::{SyncError, TransportError};
pub use orchestrator::{
    BroadcastOutcome, Subscriber, SubscriptionId, SyncDependencies, SyncOrchestrator,
};
pub use storage_channel::{SharedStorage, StorageChange, StorageChannel};
pub use transport::{
    ContextTransport, ListenerId, MessageListener, SessionEnvironment, Transport, TransportKind,
};
