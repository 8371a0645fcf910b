//! Error types for profile-sync-popup.

use thiserror::Error;

use profile_sync_core::{ConfigError, ValidationErrors};

use crate::window::{BlockReason, WindowAccessError};

#[derive(Debug, Error)]
pub enum PopupError {
    #[error("invalid popup options: {0}")]
    InvalidOptions(#[from] ValidationErrors),

    #[error("invalid popup url: {0}")]
    Url(#[from] url::ParseError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Not fatal: the manager falls back to the modal handle.
    #[error("popup for '{app_name}' was blocked: {reason}")]
    Blocked { app_name: String, reason: BlockReason },

    #[error(transparent)]
    WindowAccess(#[from] WindowAccessError),

    /// The handle is a modal fallback and has no window to talk to.
    #[error("popup is showing as an in-page modal; there is no window")]
    NoWindow,

    #[error("popup has been closed")]
    Closed,
}
