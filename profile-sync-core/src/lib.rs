//! Profile sync core library: event types, validation, wire format, timers.
//!
//! Public API surface:
//! - [`types`]: profile change events, payloads, keys, popup options
//! - [`error`]: [`EventError`], [`ValidationErrors`], [`ConfigError`]
//! - [`validation`] / [`sanitize`]: boundary checks and markup stripping
//! - [`serializer`]: wire form with integrity checksum
//! - [`signals`]: typed collaborator signals
//! - [`scheduler`]: injectable timers (tokio-backed and manual)
//! - [`config`]: tuning constants loaded from YAML

pub mod config;
pub mod error;
pub mod sanitize;
pub mod scheduler;
pub mod serializer;
pub mod signals;
pub mod types;
pub mod validation;

pub use config::{ChecksumAlgorithm, PopupConfig, SyncConfig};
pub use error::{ConfigError, EventError, FieldError, ValidationErrors};
pub use scheduler::{ManualScheduler, Scheduler, TimerCallback, TimerHandle, TokioScheduler};
pub use serializer::{create_event, deserialize, serialize, EventSerializer};
pub use signals::{PopupRemediation, RecoveryAction, SignalHub, SyncMetrics, SyncSignal};
pub use types::{
    AvatarData, DisplayNameData, EventData, EventKey, EventType, PopupOptions,
    ProfileChangeEvent, ProfileData, SerializedProfileChangeEvent, SignOutData, Theme, ThemeData,
};
pub use validation::{validate_event, validate_popup_options, ValidationOutcome};
