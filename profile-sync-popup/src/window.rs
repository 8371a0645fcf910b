//! Host window abstraction and blocking heuristics.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::channel::MessageHandler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostListenerId(pub u64);

/// Reading a property of the popup window threw.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("window access denied: {0}")]
pub struct WindowAccessError(pub String);

/// Size of the opener's viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    /// Touch-first device regardless of width.
    pub is_mobile_device: bool,
}

impl Viewport {
    pub fn desktop(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            is_mobile_device: false,
        }
    }

    /// Small screens and mobile devices get the modal directly.
    pub fn prefers_modal(&self, breakpoint_px: u32) -> bool {
        self.is_mobile_device || self.width < breakpoint_px
    }
}

/// A window opened by [`WindowHost::open`].
pub trait PopupWindow: Send + Sync {
    fn id(&self) -> WindowId;

    fn is_closed(&self) -> Result<bool, WindowAccessError>;

    /// Outer `(width, height)` in CSS pixels.
    fn outer_size(&self) -> Result<(i32, i32), WindowAccessError>;

    fn focus(&self) -> Result<(), WindowAccessError>;

    fn close(&self);

    fn post_message(&self, message: &Value, target_origin: &str) -> Result<(), WindowAccessError>;
}

/// The opener context.
pub trait WindowHost: Send + Sync {
    fn viewport(&self) -> Viewport;

    /// `None` when the environment refused to open a window.
    fn open(&self, url: &Url, name: &str, features: &str) -> Option<Arc<dyn PopupWindow>>;

    /// Listen for messages posted to the opener by any window.
    fn add_message_listener(&self, handler: MessageHandler) -> HostListenerId;

    fn remove_message_listener(&self, id: HostListenerId) -> bool;
}

// ---------------------------------------------------------------------------
// Heuristics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    NoWindow,
    ClosedImmediately,
    NonPositiveSize { width: i32, height: i32 },
    FocusFailed(String),
    AccessDenied(String),
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::NoWindow => write!(f, "no window was returned"),
            BlockReason::ClosedImmediately => write!(f, "window closed immediately"),
            BlockReason::NonPositiveSize { width, height } => {
                write!(f, "window has non-positive size {width}x{height}")
            }
            BlockReason::FocusFailed(msg) => write!(f, "window could not be focused: {msg}"),
            BlockReason::AccessDenied(msg) => write!(f, "window properties unreadable: {msg}"),
        }
    }
}

/// Any single heuristic firing means the popup was blocked.
pub fn detect_block(window: Option<&Arc<dyn PopupWindow>>) -> Option<BlockReason> {
    let Some(window) = window else {
        return Some(BlockReason::NoWindow);
    };
    if let Err(reason) = check_open_and_sized(window.as_ref()) {
        return Some(reason);
    }
    match window.focus() {
        Ok(()) => None,
        Err(err) => Some(BlockReason::FocusFailed(err.0)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Liveness {
    Open,
    Closed,
    Blocked(BlockReason),
}

/// Mid-session check used by the liveness poll. Does not steal focus.
pub fn liveness(window: &dyn PopupWindow) -> Liveness {
    match check_open_and_sized(window) {
        Ok(()) => Liveness::Open,
        Err(BlockReason::ClosedImmediately) => Liveness::Closed,
        Err(reason) => Liveness::Blocked(reason),
    }
}

fn check_open_and_sized(window: &dyn PopupWindow) -> Result<(), BlockReason> {
    match window.is_closed() {
        Ok(true) => return Err(BlockReason::ClosedImmediately),
        Ok(false) => {}
        Err(err) => return Err(BlockReason::AccessDenied(err.0)),
    }
    match window.outer_size() {
        Ok((width, height)) if width <= 0 || height <= 0 => {
            Err(BlockReason::NonPositiveSize { width, height })
        }
        Ok(_) => Ok(()),
        Err(err) => Err(BlockReason::AccessDenied(err.0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct StubWindow {
        closed: Result<bool, WindowAccessError>,
        size: Result<(i32, i32), WindowAccessError>,
        focus: Result<(), WindowAccessError>,
        focused: Mutex<bool>,
    }

    impl StubWindow {
        fn healthy() -> Self {
            Self {
                closed: Ok(false),
                size: Ok((480, 720)),
                focus: Ok(()),
                focused: Mutex::new(false),
            }
        }
    }

    impl PopupWindow for StubWindow {
        fn id(&self) -> WindowId {
            WindowId(1)
        }
        fn is_closed(&self) -> Result<bool, WindowAccessError> {
            self.closed.clone()
        }
        fn outer_size(&self) -> Result<(i32, i32), WindowAccessError> {
            self.size.clone()
        }
        fn focus(&self) -> Result<(), WindowAccessError> {
            *self.focused.lock() = true;
            self.focus.clone()
        }
        fn close(&self) {}
        fn post_message(&self, _: &Value, _: &str) -> Result<(), WindowAccessError> {
            Ok(())
        }
    }

    fn detect(window: StubWindow) -> Option<BlockReason> {
        let window: Arc<dyn PopupWindow> = Arc::new(window);
        detect_block(Some(&window))
    }

    #[test]
    fn healthy_window_is_not_blocked() {
        assert_eq!(detect(StubWindow::healthy()), None);
        assert_eq!(detect_block(None), Some(BlockReason::NoWindow));
    }

    #[test]
    fn each_heuristic_blocks_on_its_own() {
        let denied = || WindowAccessError("cross-origin".into());

        let closed = StubWindow {
            closed: Ok(true),
            ..StubWindow::healthy()
        };
        assert_eq!(detect(closed), Some(BlockReason::ClosedImmediately));

        let zero = StubWindow {
            size: Ok((0, 720)),
            ..StubWindow::healthy()
        };
        assert_eq!(
            detect(zero),
            Some(BlockReason::NonPositiveSize {
                width: 0,
                height: 720
            })
        );

        let unfocusable = StubWindow {
            focus: Err(denied()),
            ..StubWindow::healthy()
        };
        assert!(matches!(detect(unfocusable), Some(BlockReason::FocusFailed(_))));

        let unreadable = StubWindow {
            size: Err(denied()),
            ..StubWindow::healthy()
        };
        assert!(matches!(detect(unreadable), Some(BlockReason::AccessDenied(_))));
    }

    #[test]
    fn liveness_never_focuses() {
        let window = StubWindow::healthy();
        assert_eq!(liveness(&window), Liveness::Open);
        assert!(!*window.focused.lock());

        let closed = StubWindow {
            closed: Ok(true),
            ..StubWindow::healthy()
        };
        assert_eq!(liveness(&closed), Liveness::Closed);
    }

    #[test]
    fn narrow_or_mobile_viewports_prefer_modal() {
        assert!(Viewport::desktop(600, 900).prefers_modal(768));
        assert!(!Viewport::desktop(1280, 800).prefers_modal(768));
        let phone = Viewport {
            width: 1024,
            height: 1366,
            is_mobile_device: true,
        };
        assert!(phone.prefers_modal(768));
    }
}
