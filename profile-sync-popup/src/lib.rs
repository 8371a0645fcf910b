//! # profile-sync-popup
//!
//! Opens the profile editor in a secondary window, detects popup blocking
//! and substitutes a modal fallback handle so callers see one surface
//! either way.
//!
//! The host environment is abstracted behind [`WindowHost`] and
//! [`PopupWindow`]; liveness polling runs on a
//! [`Scheduler`](profile_sync_core::Scheduler).

pub mod channel;
pub mod error;
pub mod handle;
pub mod manager;
pub mod window;

pub use channel::{MessageHandler, PopupChannel, PopupMessage};
pub use error::PopupError;
pub use handle::{FallbackReason, PopupHandle, PopupMode};
pub use manager::{popup_url, window_features, PopupManager, POPUP_WINDOW_NAME};
pub use window::{
    detect_block, BlockReason, HostListenerId, Liveness, PopupWindow, Viewport, WindowAccessError,
    WindowHost, WindowId,
};
