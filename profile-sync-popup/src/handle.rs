//! Handle to an open (or modal-fallback) profile editor popup.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;

use profile_sync_core::{Scheduler, SignalHub, SyncSignal, TimerHandle};

use crate::channel::{MessageHandler, PopupChannel, PopupMessage};
use crate::error::PopupError;
use crate::window::{liveness, BlockReason, HostListenerId, Liveness, PopupWindow, WindowHost};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    SmallViewport,
    Blocked(BlockReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopupMode {
    Window,
    /// In-page modal shown instead of a window.
    Modal(FallbackReason),
}

type CloseCallback = Box<dyn FnOnce() + Send>;

struct HandleState {
    window: Option<Arc<dyn PopupWindow>>,
    mode: PopupMode,
    closed: bool,
    poll_timer: Option<TimerHandle>,
    listeners: Vec<HostListenerId>,
    on_close: Vec<CloseCallback>,
}

struct HandleInner {
    host: Arc<dyn WindowHost>,
    scheduler: Arc<dyn Scheduler>,
    signals: SignalHub,
    origin: String,
    app_name: String,
    poll_interval: Duration,
    state: Mutex<HandleState>,
}

/// Uniform surface over a real popup window and the modal fallback.
/// Clones refer to the same popup.
#[derive(Clone)]
pub struct PopupHandle {
    inner: Arc<HandleInner>,
}

impl PopupHandle {
    pub(crate) fn open_window(
        host: Arc<dyn WindowHost>,
        scheduler: Arc<dyn Scheduler>,
        signals: SignalHub,
        origin: String,
        app_name: String,
        poll_interval: Duration,
        window: Arc<dyn PopupWindow>,
    ) -> Self {
        let handle = Self::build(
            host,
            scheduler,
            signals,
            origin,
            app_name,
            poll_interval,
            Some(window),
            PopupMode::Window,
        );
        let timer = handle.inner.schedule_poll();
        handle.inner.state.lock().poll_timer = Some(timer);
        handle
    }

    pub(crate) fn modal(
        host: Arc<dyn WindowHost>,
        scheduler: Arc<dyn Scheduler>,
        signals: SignalHub,
        origin: String,
        app_name: String,
        reason: FallbackReason,
    ) -> Self {
        Self::build(
            host,
            scheduler,
            signals,
            origin,
            app_name,
            Duration::ZERO,
            None,
            PopupMode::Modal(reason),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        host: Arc<dyn WindowHost>,
        scheduler: Arc<dyn Scheduler>,
        signals: SignalHub,
        origin: String,
        app_name: String,
        poll_interval: Duration,
        window: Option<Arc<dyn PopupWindow>>,
        mode: PopupMode,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                host,
                scheduler,
                signals,
                origin,
                app_name,
                poll_interval,
                state: Mutex::new(HandleState {
                    window,
                    mode,
                    closed: false,
                    poll_timer: None,
                    listeners: Vec::new(),
                    on_close: Vec::new(),
                }),
            }),
        }
    }

    /// The popup window; `None` for the modal fallback.
    pub fn window(&self) -> Option<Arc<dyn PopupWindow>> {
        self.inner.state.lock().window.clone()
    }

    pub fn mode(&self) -> PopupMode {
        self.inner.state.lock().mode.clone()
    }

    pub fn is_blocked(&self) -> bool {
        matches!(
            self.inner.state.lock().mode,
            PopupMode::Modal(FallbackReason::Blocked(_))
        )
    }

    pub fn is_modal(&self) -> bool {
        matches!(self.inner.state.lock().mode, PopupMode::Modal(_))
    }

    pub fn block_reason(&self) -> Option<BlockReason> {
        match &self.inner.state.lock().mode {
            PopupMode::Modal(FallbackReason::Blocked(reason)) => Some(reason.clone()),
            _ => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Serialized origin of the profile editor.
    pub fn origin(&self) -> &str {
        &self.inner.origin
    }

    pub fn app_name(&self) -> &str {
        &self.inner.app_name
    }

    /// Post `data` to the popup, restricted to the expected origin.
    pub fn post_message(&self, data: &Value) -> Result<(), PopupError> {
        let window = self.live_window()?;
        window.post_message(data, &self.inner.origin)?;
        Ok(())
    }

    /// Receive messages from the popup. Only messages from the expected
    /// origin, and from the popup window while there is one, get through.
    /// The window is looked up per message, so listeners keep working after
    /// a mid-session fallback to the modal.
    pub fn on_message<F>(&self, handler: F) -> Result<HostListenerId, PopupError>
    where
        F: Fn(&PopupMessage) + Send + Sync + 'static,
    {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(PopupError::Closed);
        }
        let weak: Weak<HandleInner> = Arc::downgrade(&self.inner);
        let filtered: MessageHandler = Arc::new(move |message: &PopupMessage| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.channel().accepts(message) {
                handler(message);
            }
        });
        let id = self.inner.host.add_message_listener(filtered);
        state.listeners.push(id);
        Ok(id)
    }

    /// Run `callback` once when the popup closes. Runs immediately if it
    /// already has.
    pub fn on_close<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        if state.closed {
            drop(state);
            callback();
            return;
        }
        state.on_close.push(Box::new(callback));
    }

    pub fn focus(&self) -> Result<(), PopupError> {
        self.live_window()?.focus()?;
        Ok(())
    }

    /// Close the window, stop polling and detach listeners. Idempotent.
    pub fn close(&self) {
        self.inner.finish(true);
    }

    fn live_window(&self) -> Result<Arc<dyn PopupWindow>, PopupError> {
        let state = self.inner.state.lock();
        if state.closed {
            return Err(PopupError::Closed);
        }
        state.window.clone().ok_or(PopupError::NoWindow)
    }
}

impl HandleInner {
    /// Acceptance rule for the popup as it is right now.
    fn channel(&self) -> PopupChannel {
        let source = self.state.lock().window.as_ref().map(|window| window.id());
        PopupChannel::new(self.origin.clone(), source)
    }

    fn schedule_poll(self: &Arc<Self>) -> TimerHandle {
        let weak: Weak<HandleInner> = Arc::downgrade(self);
        self.scheduler.after(
            self.poll_interval,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.poll();
                }
            }),
        )
    }

    fn poll(self: &Arc<Self>) {
        let window = {
            let mut state = self.state.lock();
            state.poll_timer = None;
            if state.closed {
                return;
            }
            match &state.window {
                Some(window) => window.clone(),
                None => return,
            }
        };

        match liveness(window.as_ref()) {
            Liveness::Open => {
                let mut state = self.state.lock();
                if !state.closed {
                    state.poll_timer = Some(self.schedule_poll());
                }
            }
            Liveness::Closed => {
                tracing::debug!(app = %self.app_name, "popup closed by user");
                self.finish(false);
            }
            Liveness::Blocked(reason) => self.escalate(reason),
        }
    }

    /// The window went unusable mid-session; continue as a modal.
    fn escalate(&self, reason: BlockReason) {
        let window = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.mode = PopupMode::Modal(FallbackReason::Blocked(reason.clone()));
            state.window.take()
        };
        if let Some(window) = window {
            window.close();
        }
        let err = PopupError::Blocked {
            app_name: self.app_name.clone(),
            reason,
        };
        tracing::warn!(error = %err, "popup lost mid-session, falling back to modal");
        self.signals.emit(SyncSignal::popup_blocked(self.app_name.clone()));
    }

    fn finish(&self, close_window: bool) {
        let (timer, listeners, callbacks, window) = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            (
                state.poll_timer.take(),
                std::mem::take(&mut state.listeners),
                std::mem::take(&mut state.on_close),
                state.window.take(),
            )
        };
        if let Some(timer) = timer {
            self.scheduler.cancel(timer);
        }
        for id in listeners {
            self.host.remove_message_listener(id);
        }
        if let (true, Some(window)) = (close_window, window) {
            window.close();
        }
        for callback in callbacks {
            callback();
        }
    }
}
