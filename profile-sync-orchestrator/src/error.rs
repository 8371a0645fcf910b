//! Error types for profile-sync-orchestrator.

use thiserror::Error;

use profile_sync_core::{ConfigError, EventError};

use crate::transport::TransportKind;

/// Failures of a single transport send. Always recoverable: the orchestrator
/// retries with backoff before giving up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("{channel} channel is closed")]
    Closed { channel: TransportKind },

    #[error("{channel} channel is unavailable in this environment")]
    Unavailable { channel: TransportKind },

    #[error("storage quota exceeded: {size} bytes requested, {quota} bytes allowed")]
    QuotaExceeded { size: usize, quota: usize },

    /// Primary and fallback both refused the payload.
    #[error("send failed on every channel: {0}")]
    AllChannelsFailed(String),
}

/// All errors surfaced by the orchestrator's public operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The event failed boundary validation; it is dropped, never retried.
    #[error(transparent)]
    Event(#[from] EventError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Retry cap reached; reported through the sync-failure signal.
    #[error("gave up after {attempts} attempts: {last_error}")]
    ExhaustedRetry { attempts: u32, last_error: String },

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("sync orchestrator has been disposed")]
    Disposed,

    #[error("a sync orchestrator is already registered for this process")]
    AlreadyInitialized,
}
