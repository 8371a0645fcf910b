//! Typed signals emitted to collaborators (UI layers, domain adapters).
//!
//! Signals fan out over a `tokio::sync::broadcast` channel. Emitting never
//! blocks and never fails: with no receivers the signal is simply dropped, and
//! a receiver that falls behind skips the oldest signals.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::types::ProfileChangeEvent;

/// Broadcast channel capacity for signal receivers.
pub const SIGNAL_CAPACITY: usize = 64;

/// Actions offered to the user when a change could not be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RecoveryAction {
    RetryNow,
    Refresh,
}

/// Actions offered to the user when the profile popup was blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PopupRemediation {
    AllowPopups,
    OpenInNewTab,
    UseModal,
}

/// Running counters for one orchestrator instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetrics {
    /// Events handed to the transport successfully.
    pub sent: u64,
    /// Remote events delivered to subscribers.
    pub received: u64,
    /// Batch frames sent (each also counts its events in `sent`).
    pub batches_sent: u64,
    /// Events superseded by a newer event for the same key before sending.
    pub coalesced: u64,
    /// Events parked in the offline queue.
    pub queued: u64,
    pub retries: u64,
    /// Events moved to the failed-events list.
    pub failed: u64,
    /// Remote frames or events dropped by validation, integrity or parse checks.
    pub rejected: u64,
}

/// A collaborator-facing signal.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncSignal {
    ConnectivityChanged {
        online: bool,
    },
    SyncFailure {
        event: Box<ProfileChangeEvent>,
        error: String,
        recovery: Vec<RecoveryAction>,
    },
    PopupBlocked {
        app_name: String,
        remediation: Vec<PopupRemediation>,
    },
    MetricsUpdated(SyncMetrics),
}

impl SyncSignal {
    pub fn sync_failure(event: ProfileChangeEvent, error: impl Into<String>) -> Self {
        SyncSignal::SyncFailure {
            event: Box::new(event),
            error: error.into(),
            recovery: vec![RecoveryAction::RetryNow, RecoveryAction::Refresh],
        }
    }

    pub fn popup_blocked(app_name: impl Into<String>) -> Self {
        SyncSignal::PopupBlocked {
            app_name: app_name.into(),
            remediation: vec![
                PopupRemediation::AllowPopups,
                PopupRemediation::OpenInNewTab,
                PopupRemediation::UseModal,
            ],
        }
    }
}

/// Sending half of the signal bus; cheap to clone.
#[derive(Debug, Clone)]
pub struct SignalHub {
    tx: broadcast::Sender<SyncSignal>,
}

impl Default for SignalHub {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncSignal> {
        self.tx.subscribe()
    }

    pub fn emit(&self, signal: SyncSignal) {
        // No receivers is not an error for a best-effort bus.
        let _ = self.tx.send(signal);
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
