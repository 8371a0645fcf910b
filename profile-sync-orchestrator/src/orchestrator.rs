//! The sync orchestrator.
//!
//! One instance per context. Local changes go through [`SyncOrchestrator::broadcast`]
//! (throttle with trailing send) or [`SyncOrchestrator::broadcast_optimized`]
//! (adds high-frequency debounce and cross-key batching). Remote changes
//! arrive through the transport listener and fan out to subscribers.
//!
//! # Locking
//!
//! All mutable state sits behind one `parking_lot::Mutex`. The guard is
//! never held while posting to the transport, invoking subscribers or
//! emitting signals, so subscribers may call back into the orchestrator.
//! Timer callbacks hold a `Weak` reference and become no-ops once the
//! orchestrator is dropped or disposed.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use profile_sync_core::serializer::WireFrame;
use profile_sync_core::{
    EventKey, EventSerializer, ProfileChangeEvent, Scheduler, SignalHub, SyncConfig, SyncMetrics,
    SyncSignal, TimerHandle,
};

use crate::bounded::{
    FailedEvent, FailedEvents, FailedPush, FrequencyTracker, KeyedQueue, QueuePush,
};
use crate::connectivity::{AlwaysReachable, ConnectivityTracker, ReachabilityProbe, Transition};
use crate::error::{SyncError, TransportError};
use crate::transport::{ContextTransport, ListenerId, SessionEnvironment, Transport, TransportKind};

/// Callback receiving each validated remote event.
pub type Subscriber = Arc<dyn Fn(&ProfileChangeEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// What `broadcast` did with an accepted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastOutcome {
    /// Handed to the transport; the key entered its cool-down.
    Sent,
    /// The key is cooling down; this event is now its trailing send.
    Pending,
    /// Held until the key has been quiet for the debounce delay.
    Debounced,
    /// Joined the open batch frame.
    Batched,
    /// Offline; parked in the offline queue.
    Queued,
    /// No cross-context transport; nothing leaves this context.
    LocalOnly,
}

/// Collaborators injected into an orchestrator.
pub struct SyncDependencies {
    pub scheduler: Arc<dyn Scheduler>,
    pub transport: Option<Arc<dyn Transport>>,
    pub probe: Arc<dyn ReachabilityProbe>,
}

impl SyncDependencies {
    pub fn new(scheduler: Arc<dyn Scheduler>, transport: Option<Arc<dyn Transport>>) -> Self {
        Self {
            scheduler,
            transport,
            probe: Arc::new(AlwaysReachable),
        }
    }

    pub fn with_probe(mut self, probe: impl ReachabilityProbe + 'static) -> Self {
        self.probe = Arc::new(probe);
        self
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

enum KeyTimer {
    /// Cool-down after a send. `pending` is the trailing send, latest wins.
    Throttled {
        timer: TimerHandle,
        generation: u64,
        pending: Option<ProfileChangeEvent>,
    },
    Debounced {
        timer: TimerHandle,
        generation: u64,
        pending: ProfileChangeEvent,
    },
}

impl KeyTimer {
    fn timer(&self) -> TimerHandle {
        match self {
            KeyTimer::Throttled { timer, .. } | KeyTimer::Debounced { timer, .. } => *timer,
        }
    }

    fn generation(&self) -> u64 {
        match self {
            KeyTimer::Throttled { generation, .. } | KeyTimer::Debounced { generation, .. } => {
                *generation
            }
        }
    }
}

struct Batch {
    timer: TimerHandle,
    /// At most one event per key.
    events: Vec<ProfileChangeEvent>,
}

struct State {
    disposed: bool,
    connectivity: ConnectivityTracker,
    queue: KeyedQueue,
    failed: FailedEvents,
    frequency: FrequencyTracker,
    keys: HashMap<EventKey, KeyTimer>,
    batch: Option<Batch>,
    last_dispatch_ms: Option<u64>,
    retries: HashMap<u64, TimerHandle>,
    probe_timer: Option<TimerHandle>,
    transport_listener: Option<ListenerId>,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_subscription: u64,
    next_generation: u64,
    metrics: SyncMetrics,
}

impl State {
    fn new(config: &SyncConfig) -> Self {
        Self {
            disposed: false,
            connectivity: ConnectivityTracker::new(config.probe_failure_threshold),
            queue: KeyedQueue::new(config.max_queue_size),
            failed: FailedEvents::new(config.max_failed_events),
            frequency: FrequencyTracker::new(config.frequency_window_ms, config.max_tracked_keys),
            keys: HashMap::new(),
            batch: None,
            last_dispatch_ms: None,
            retries: HashMap::new(),
            probe_timer: None,
            transport_listener: None,
            subscribers: Vec::new(),
            next_subscription: 0,
            next_generation: 0,
            metrics: SyncMetrics::default(),
        }
    }

    fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// A newer value for the event's key was submitted after it.
    fn is_superseded(&self, event: &ProfileChangeEvent) -> bool {
        let key = event.key();
        self.frequency
            .latest_timestamp(&key)
            .into_iter()
            .chain(self.queue.get(&key).map(ProfileChangeEvent::timestamp))
            .max()
            .is_some_and(|latest| latest > event.timestamp())
    }
}

struct Shared {
    config: SyncConfig,
    serializer: EventSerializer,
    scheduler: Arc<dyn Scheduler>,
    transport: Option<Arc<dyn Transport>>,
    probe: Arc<dyn ReachabilityProbe>,
    signals: SignalHub,
    state: Mutex<State>,
}

// ---------------------------------------------------------------------------
// Public handle
// ---------------------------------------------------------------------------

/// Handle to one context's orchestrator. Clones share the same instance.
#[derive(Clone)]
pub struct SyncOrchestrator {
    shared: Arc<Shared>,
}

impl SyncOrchestrator {
    /// Validate `config`, attach to the transport and start connectivity probes.
    pub fn new(config: SyncConfig, deps: SyncDependencies) -> Result<Self, SyncError> {
        config.validate()?;
        let state = State::new(&config);
        let shared = Arc::new(Shared {
            serializer: EventSerializer::new(config.checksum),
            config,
            scheduler: deps.scheduler,
            transport: deps.transport,
            probe: deps.probe,
            signals: SignalHub::new(),
            state: Mutex::new(state),
        });

        if let Some(transport) = &shared.transport {
            let weak: Weak<Shared> = Arc::downgrade(&shared);
            let listener = transport.listen(Arc::new(move |raw: &str| {
                if let Some(shared) = weak.upgrade() {
                    shared.handle_incoming(raw);
                }
            }));
            shared.state.lock().transport_listener = Some(listener);
        }
        let probe_timer = shared.schedule_probe();
        shared.state.lock().probe_timer = probe_timer;

        let orchestrator = Self { shared };
        tracing::info!(transport = %orchestrator.transport_kind(), "sync orchestrator started");
        Ok(orchestrator)
    }

    /// Build an orchestrator on whichever channel `env` supports.
    pub fn connect(
        config: SyncConfig,
        env: &SessionEnvironment,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self, SyncError> {
        let transport = ContextTransport::connect(env, &config)
            .map(|transport| Arc::new(transport) as Arc<dyn Transport>);
        Self::new(config, SyncDependencies::new(scheduler, transport))
    }

    /// Throttled broadcast: immediate send, then at most one trailing send
    /// per key per cool-down.
    pub fn broadcast(&self, event: ProfileChangeEvent) -> Result<BroadcastOutcome, SyncError> {
        self.shared.submit(event, false)
    }

    /// Adaptive broadcast: debounces high-frequency keys and batches
    /// different keys that arrive within the batch window.
    pub fn broadcast_optimized(
        &self,
        event: ProfileChangeEvent,
    ) -> Result<BroadcastOutcome, SyncError> {
        self.shared.submit(event, true)
    }

    /// Register a callback for remote events. Events this context
    /// broadcasts are not echoed back to it.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ProfileChangeEvent) + Send + Sync + 'static,
    {
        let mut state = self.shared.state.lock();
        state.next_subscription += 1;
        let id = SubscriptionId(state.next_subscription);
        if !state.disposed {
            state.subscribers.push((id, Arc::new(callback)));
        }
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.shared.state.lock();
        let before = state.subscribers.len();
        state.subscribers.retain(|(existing, _)| *existing != id);
        state.subscribers.len() != before
    }

    pub fn is_online(&self) -> bool {
        self.shared.state.lock().connectivity.is_online()
    }

    /// Direct connectivity signal from the environment. Offline applies
    /// immediately; coming back online flushes the queue and retries failed
    /// events.
    pub fn set_online(&self, online: bool) {
        self.shared.set_online(online);
    }

    pub fn queue_len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Queued events in flush order.
    pub fn queued_events(&self) -> Vec<ProfileChangeEvent> {
        self.shared.state.lock().queue.iter().cloned().collect()
    }

    pub fn failed_events(&self) -> Vec<FailedEvent> {
        self.shared.state.lock().failed.to_vec()
    }

    /// Re-dispatch every failed event. Returns how many were resubmitted;
    /// nothing happens while offline.
    pub fn retry_failed_events(&self) -> usize {
        self.shared.retry_failed()
    }

    pub fn clear_failed_events(&self) {
        self.shared.state.lock().failed.clear();
    }

    pub fn metrics(&self) -> SyncMetrics {
        self.shared.state.lock().metrics
    }

    pub fn signals(&self) -> broadcast::Receiver<SyncSignal> {
        self.shared.signals.subscribe()
    }

    /// Sending half of this orchestrator's signal bus, for collaborators
    /// (such as the popup manager) that report on the same bus.
    pub fn signal_hub(&self) -> SignalHub {
        self.shared.signals.clone()
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.shared
            .transport
            .as_ref()
            .map_or(TransportKind::None, |transport| transport.kind())
    }

    pub fn config(&self) -> &SyncConfig {
        &self.shared.config
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.state.lock().disposed
    }

    /// Cancel every timer, empty all queues and detach from the transport.
    /// Safe to call more than once.
    pub fn dispose(&self) {
        if self.shared.shutdown() {
            tracing::info!("sync orchestrator disposed");
        }
    }
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

impl Shared {
    fn schedule<F>(self: &Arc<Self>, delay: Duration, f: F) -> TimerHandle
    where
        F: FnOnce(&Arc<Shared>) + Send + 'static,
    {
        let weak = Arc::downgrade(self);
        self.scheduler.after(
            delay,
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    f(&shared);
                }
            }),
        )
    }

    fn submit(
        self: &Arc<Self>,
        event: ProfileChangeEvent,
        adaptive: bool,
    ) -> Result<BroadcastOutcome, SyncError> {
        // Rejects events that only become invalid once sanitized.
        self.serializer.serialize(&event)?;

        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.disposed {
            return Err(SyncError::Disposed);
        }
        if self.transport.is_none() {
            return Ok(BroadcastOutcome::LocalOnly);
        }
        if !state.connectivity.is_online() {
            self.enqueue(state, event);
            let metrics = state.metrics;
            drop(guard);
            self.emit_metrics(metrics);
            return Ok(BroadcastOutcome::Queued);
        }

        let key = event.key();
        let now = self.scheduler.now_millis();
        let count = state.frequency.record(key, now, event.timestamp());

        if let Some(batch) = state.batch.as_mut() {
            if let Some(slot) = batch.events.iter_mut().find(|queued| queued.key() == key) {
                *slot = event;
                state.metrics.coalesced += 1;
                return Ok(BroadcastOutcome::Batched);
            }
        }

        match state.keys.remove(&key) {
            Some(KeyTimer::Throttled {
                timer,
                generation,
                pending,
            }) => {
                if pending.is_some() {
                    state.metrics.coalesced += 1;
                }
                state.keys.insert(
                    key,
                    KeyTimer::Throttled {
                        timer,
                        generation,
                        pending: Some(event),
                    },
                );
                return Ok(BroadcastOutcome::Pending);
            }
            Some(KeyTimer::Debounced { timer, .. }) => {
                self.scheduler.cancel(timer);
                state.metrics.coalesced += 1;
                self.start_debounce(state, event);
                return Ok(BroadcastOutcome::Debounced);
            }
            None => {}
        }

        if adaptive {
            if count > self.config.high_frequency_threshold {
                tracing::debug!(key = %key, count, "high-frequency key, debouncing");
                self.start_debounce(state, event);
                return Ok(BroadcastOutcome::Debounced);
            }
            if self.config.batching_enabled {
                if let Some(batch) = state.batch.as_mut() {
                    batch.events.push(event);
                    return Ok(BroadcastOutcome::Batched);
                }
                let recent = state
                    .last_dispatch_ms
                    .is_some_and(|last| now.saturating_sub(last) < self.config.batch_window_ms);
                if recent {
                    let timer = self.schedule(self.config.batch_window(), |shared| {
                        shared.flush_batch()
                    });
                    state.batch = Some(Batch {
                        timer,
                        events: vec![event],
                    });
                    return Ok(BroadcastOutcome::Batched);
                }
            }
        }

        state.last_dispatch_ms = Some(now);
        self.start_cooldown(state, key);
        drop(guard);
        self.dispatch(vec![event], 0);
        Ok(BroadcastOutcome::Sent)
    }

    fn start_cooldown(self: &Arc<Self>, state: &mut State, key: EventKey) {
        let generation = state.next_generation();
        let timer = self.schedule(self.config.throttle_delay(), move |shared| {
            shared.on_key_timer(key, generation)
        });
        state.keys.insert(
            key,
            KeyTimer::Throttled {
                timer,
                generation,
                pending: None,
            },
        );
    }

    fn start_debounce(self: &Arc<Self>, state: &mut State, event: ProfileChangeEvent) {
        let key = event.key();
        let generation = state.next_generation();
        let timer = self.schedule(self.config.debounce_delay(), move |shared| {
            shared.on_key_timer(key, generation)
        });
        state.keys.insert(
            key,
            KeyTimer::Debounced {
                timer,
                generation,
                pending: event,
            },
        );
    }

    /// Cool-down or debounce expiry: send whatever is pending for the key.
    fn on_key_timer(self: &Arc<Self>, key: EventKey, generation: u64) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.disposed || state.keys.get(&key).map(KeyTimer::generation) != Some(generation) {
            return;
        }
        let pending = match state.keys.remove(&key) {
            Some(KeyTimer::Throttled { pending, .. }) => pending,
            Some(KeyTimer::Debounced { pending, .. }) => Some(pending),
            None => None,
        };
        let Some(event) = pending else {
            return;
        };
        if !state.connectivity.is_online() {
            self.enqueue(state, event);
            let metrics = state.metrics;
            drop(guard);
            self.emit_metrics(metrics);
            return;
        }
        state.last_dispatch_ms = Some(self.scheduler.now_millis());
        self.start_cooldown(state, key);
        drop(guard);
        self.dispatch(vec![event], 0);
    }

    fn flush_batch(self: &Arc<Self>) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.disposed {
            return;
        }
        let Some(batch) = state.batch.take() else {
            return;
        };
        if !state.connectivity.is_online() {
            for event in batch.events {
                self.enqueue(state, event);
            }
            let metrics = state.metrics;
            drop(guard);
            self.emit_metrics(metrics);
            return;
        }
        state.last_dispatch_ms = Some(self.scheduler.now_millis());
        for event in &batch.events {
            self.start_cooldown(state, event.key());
        }
        drop(guard);
        tracing::debug!(events = batch.events.len(), "flushing batch");
        self.dispatch(batch.events, 0);
    }

    /// Serialize and post one frame. `attempt` counts retries already made.
    fn dispatch(self: &Arc<Self>, events: Vec<ProfileChangeEvent>, attempt: u32) {
        let Some(transport) = self.transport.as_ref() else {
            return;
        };

        let mut accepted = Vec::with_capacity(events.len());
        let mut wire = Vec::with_capacity(events.len());
        let mut rejected = 0u64;
        for event in events {
            match self.serializer.serialize(&event) {
                Ok(serialized) => {
                    wire.push(serialized);
                    accepted.push(event);
                }
                Err(err) => {
                    tracing::warn!(key = %event.key(), error = %err, "dropping event that failed serialization");
                    rejected += 1;
                }
            }
        }

        let frame = match wire.len() {
            0 => None,
            1 => wire.pop().map(WireFrame::Single),
            _ => Some(WireFrame::Batch(wire)),
        };
        let result = match frame.map(|frame| frame.encode()) {
            None => None,
            Some(Ok(payload)) => Some(transport.post(&payload)),
            Some(Err(err)) => {
                tracing::warn!(error = %err, events = accepted.len(), "dropping unencodable frame");
                rejected += accepted.len() as u64;
                accepted.clear();
                None
            }
        };

        let mut signals = Vec::new();
        let metrics = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.metrics.rejected += rejected;
            match result {
                None => {}
                Some(Ok(())) => {
                    for event in &accepted {
                        state.failed.remove_superseded(&event.key(), event.timestamp());
                    }
                    let sent = accepted.len() as u64;
                    state.metrics.sent += sent;
                    if sent > 1 {
                        state.metrics.batches_sent += 1;
                    }
                }
                Some(Err(err)) if state.disposed => {
                    tracing::debug!(error = %err, "send failed after dispose, dropping");
                }
                Some(Err(err)) => self.on_send_failure(state, accepted, attempt, err, &mut signals),
            }
            state.metrics
        };
        for signal in signals {
            self.signals.emit(signal);
        }
        self.emit_metrics(metrics);
    }

    fn on_send_failure(
        self: &Arc<Self>,
        state: &mut State,
        events: Vec<ProfileChangeEvent>,
        attempt: u32,
        err: TransportError,
        signals: &mut Vec<SyncSignal>,
    ) {
        let next = attempt + 1;
        if next <= self.config.max_retry_attempts {
            let delay = self.config.retry_delay(next);
            tracing::debug!(
                attempt = next,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "send failed, scheduling retry"
            );
            state.metrics.retries += 1;
            let retry_id = state.next_generation();
            let timer = self.schedule(delay, move |shared| shared.on_retry(retry_id, events, next));
            state.retries.insert(retry_id, timer);
            return;
        }

        let exhausted = SyncError::ExhaustedRetry {
            attempts: next,
            last_error: err.to_string(),
        };
        tracing::error!(error = %exhausted, events = events.len(), "giving up on sync events");
        let now = self.scheduler.now_millis();
        for event in events {
            if state.is_superseded(&event) {
                tracing::debug!(key = %event.key(), "newer event exists, not recording failure");
                continue;
            }
            let pushed = state.failed.push(FailedEvent {
                event: event.clone(),
                error: exhausted.to_string(),
                timestamp: now,
                attempts: next,
            });
            match pushed {
                FailedPush::Stale => continue,
                FailedPush::Evicted(evicted) => {
                    tracing::warn!(key = %evicted.event.key(), "failed-events list full, dropping oldest");
                }
                FailedPush::Inserted | FailedPush::Replaced => {}
            }
            state.metrics.failed += 1;
            signals.push(SyncSignal::sync_failure(event, exhausted.to_string()));
        }
    }

    fn on_retry(self: &Arc<Self>, retry_id: u64, events: Vec<ProfileChangeEvent>, attempt: u32) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.disposed || state.retries.remove(&retry_id).is_none() {
            return;
        }
        let live: Vec<ProfileChangeEvent> = events
            .into_iter()
            .filter(|event| {
                let superseded = state.is_superseded(event);
                if superseded {
                    tracing::debug!(key = %event.key(), "newer event exists, skipping retry");
                }
                !superseded
            })
            .collect();
        if live.is_empty() {
            return;
        }
        if !state.connectivity.is_online() {
            for event in live {
                self.enqueue(state, event);
            }
            let metrics = state.metrics;
            drop(guard);
            self.emit_metrics(metrics);
            return;
        }
        drop(guard);
        self.dispatch(live, attempt);
    }

    fn enqueue(&self, state: &mut State, event: ProfileChangeEvent) {
        state.failed.remove_superseded(&event.key(), event.timestamp());
        match state.queue.push(event) {
            QueuePush::Inserted => state.metrics.queued += 1,
            QueuePush::Replaced | QueuePush::Stale => state.metrics.coalesced += 1,
            QueuePush::Evicted(oldest) => {
                state.metrics.queued += 1;
                tracing::warn!(key = %oldest.key(), "offline queue full, dropped oldest event");
            }
        }
    }

    // -- connectivity ------------------------------------------------------

    fn schedule_probe(self: &Arc<Self>) -> Option<TimerHandle> {
        let interval = self.config.probe_interval()?;
        Some(self.schedule(interval, |shared| shared.run_probe()))
    }

    fn run_probe(self: &Arc<Self>) {
        if self.state.lock().disposed {
            return;
        }
        let reachable = self.probe.probe();
        let transition = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.disposed {
                return;
            }
            state.probe_timer = self.schedule_probe();
            let transition = state.connectivity.record_probe(reachable);
            if !reachable {
                tracing::debug!(
                    failures = state.connectivity.consecutive_failures(),
                    "reachability probe failed"
                );
            }
            transition
        };
        self.apply_transition(transition);
    }

    fn set_online(self: &Arc<Self>, online: bool) {
        let transition = {
            let mut state = self.state.lock();
            if state.disposed {
                return;
            }
            state.connectivity.set_direct(online)
        };
        self.apply_transition(transition);
    }

    fn apply_transition(self: &Arc<Self>, transition: Transition) {
        match transition {
            Transition::None => {}
            Transition::WentOffline => {
                tracing::info!("connectivity lost, queueing changes");
                self.signals
                    .emit(SyncSignal::ConnectivityChanged { online: false });
            }
            Transition::WentOnline => {
                tracing::info!("connectivity restored");
                self.signals
                    .emit(SyncSignal::ConnectivityChanged { online: true });
                self.replay_pending();
                self.verify_sync_state();
            }
        }
    }

    /// Reconnect: resend failed events and the offline queue together,
    /// keeping only the newest value per key so an old failure can never
    /// land after the value that replaced it.
    fn replay_pending(self: &Arc<Self>) {
        let events = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.disposed {
                return;
            }
            let failed = state.failed.take_all();
            let queued = state.queue.drain();
            let mut latest: Vec<ProfileChangeEvent> = Vec::with_capacity(failed.len() + queued.len());
            for event in failed.into_iter().map(|entry| entry.event).chain(queued) {
                match latest.iter_mut().find(|kept| kept.key() == event.key()) {
                    Some(kept) if kept.timestamp() > event.timestamp() => {}
                    Some(kept) => *kept = event,
                    None => latest.push(event),
                }
            }
            latest.retain(|event| !state.is_superseded(event));
            latest
        };
        if events.is_empty() {
            return;
        }
        tracing::info!(events = events.len(), "replaying queued and failed events");
        for event in events {
            self.dispatch(vec![event], 0);
        }
    }

    fn retry_failed(self: &Arc<Self>) -> usize {
        let failed = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.disposed || !state.connectivity.is_online() {
                return 0;
            }
            let mut failed = state.failed.take_all();
            failed.retain(|entry| !state.is_superseded(&entry.event));
            failed
        };
        let count = failed.len();
        if count > 0 {
            tracing::info!(events = count, "retrying failed events");
        }
        for entry in failed {
            self.dispatch(vec![entry.event], 0);
        }
        count
    }

    /// Post-reconnect consistency hook. There is no server of record to
    /// confirm against yet, so this only reports local state.
    fn verify_sync_state(&self) {
        let state = self.state.lock();
        tracing::debug!(
            queued = state.queue.len(),
            failed = state.failed.len(),
            pending_keys = state.keys.len(),
            "sync state after reconnect"
        );
    }

    // -- inbound -----------------------------------------------------------

    fn handle_incoming(&self, raw: &str) {
        let frame = match WireFrame::decode(raw) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(error = %err, "dropping unreadable sync frame");
                let metrics = {
                    let mut state = self.state.lock();
                    state.metrics.rejected += 1;
                    state.metrics
                };
                self.emit_metrics(metrics);
                return;
            }
        };

        let mut events = Vec::with_capacity(frame.len());
        let mut rejected = 0u64;
        for wire in frame.into_events() {
            match self.serializer.deserialize(&wire) {
                Ok(event) => events.push(event),
                Err(err) => {
                    tracing::warn!(kind = err.kind(), error = %err, "dropping remote event");
                    rejected += 1;
                }
            }
        }

        let (subscribers, metrics) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.disposed {
                return;
            }
            state.metrics.rejected += rejected;
            state.metrics.received += events.len() as u64;
            let subscribers: Vec<Subscriber> = state
                .subscribers
                .iter()
                .map(|(_, subscriber)| subscriber.clone())
                .collect();
            (subscribers, state.metrics)
        };

        for event in &events {
            for subscriber in &subscribers {
                deliver(subscriber, event);
            }
        }
        self.emit_metrics(metrics);
    }

    fn emit_metrics(&self, metrics: SyncMetrics) {
        self.signals.emit(SyncSignal::MetricsUpdated(metrics));
    }

    /// Returns `false` if already disposed.
    fn shutdown(&self) -> bool {
        let (timers, listener) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.disposed {
                return false;
            }
            state.disposed = true;
            let mut timers: Vec<TimerHandle> =
                state.keys.drain().map(|(_, timer)| timer.timer()).collect();
            timers.extend(state.batch.take().map(|batch| batch.timer));
            timers.extend(state.retries.drain().map(|(_, timer)| timer));
            timers.extend(state.probe_timer.take());
            state.queue.clear();
            state.failed.clear();
            state.frequency.clear();
            state.subscribers.clear();
            (timers, state.transport_listener.take())
        };
        for timer in timers {
            self.scheduler.cancel(timer);
        }
        if let (Some(transport), Some(listener)) = (&self.transport, listener) {
            transport.unlisten(listener);
        }
        true
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn deliver(subscriber: &Subscriber, event: &ProfileChangeEvent) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| subscriber(event))) {
        tracing::error!(
            key = %event.key(),
            panic = panic_message(&*payload),
            "subscriber panicked, continuing delivery"
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use profile_sync_core::{ManualScheduler, Theme};
    use uuid::Uuid;

    fn theme_event(theme: Theme) -> ProfileChangeEvent {
        ProfileChangeEvent::new(theme.into(), 1_700_000_000_000, "unit", Uuid::new_v4()).unwrap()
    }

    #[test]
    fn without_transport_changes_stay_local() {
        let scheduler = Arc::new(ManualScheduler::new());
        let orchestrator =
            SyncOrchestrator::new(SyncConfig::default(), SyncDependencies::new(scheduler, None))
                .unwrap();
        assert_eq!(orchestrator.transport_kind(), TransportKind::None);
        assert_eq!(
            orchestrator.broadcast(theme_event(Theme::Dark)).unwrap(),
            BroadcastOutcome::LocalOnly
        );
        assert_eq!(orchestrator.metrics(), SyncMetrics::default());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = SyncConfig {
            max_queue_size: 0,
            ..SyncConfig::default()
        };
        let deps = SyncDependencies::new(Arc::new(ManualScheduler::new()), None);
        assert!(matches!(
            SyncOrchestrator::new(config, deps),
            Err(SyncError::Config(_))
        ));
    }

    #[test]
    fn dispose_cancels_timers_and_rejects_broadcasts() {
        let scheduler = Arc::new(ManualScheduler::new());
        let orchestrator = SyncOrchestrator::connect(
            SyncConfig::default(),
            &SessionEnvironment::full(),
            scheduler.clone(),
        )
        .unwrap();
        orchestrator.broadcast(theme_event(Theme::Dark)).unwrap();
        // probe + throttle cool-down
        assert_eq!(scheduler.pending(), 2);

        orchestrator.dispose();
        orchestrator.dispose();
        assert!(orchestrator.is_disposed());
        assert_eq!(scheduler.pending(), 0);
        assert!(matches!(
            orchestrator.broadcast(theme_event(Theme::Light)),
            Err(SyncError::Disposed)
        ));
    }

    #[test]
    fn panic_message_reads_str_and_string_payloads() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
