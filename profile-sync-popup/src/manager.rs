//! Popup manager: open the profile editor, detect blocking, fall back.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use url::Url;

use profile_sync_core::{
    validate_popup_options, PopupConfig, PopupOptions, Scheduler, SignalHub, SyncSignal,
};

use crate::error::PopupError;
use crate::handle::{FallbackReason, PopupHandle};
use crate::window::{detect_block, BlockReason, Viewport, WindowHost};

/// Target name passed to the host, so reopening reuses the same window.
pub const POPUP_WINDOW_NAME: &str = "profile-sync-editor";

/// `<origin><edit_path>?popup=true&app=<app_name>`
pub fn popup_url(options: &PopupOptions, edit_path: &str) -> Result<Url, PopupError> {
    let mut url = options.origin_url().join(edit_path)?;
    url.query_pairs_mut()
        .clear()
        .append_pair("popup", "true")
        .append_pair("app", options.app_name());
    url.set_fragment(None);
    Ok(url)
}

/// Window feature string, centred on the viewport unless an explicit
/// position was given.
pub fn window_features(options: &PopupOptions, viewport: &Viewport) -> String {
    let centre = |outer: u32, inner: u32| ((i64::from(outer) - i64::from(inner)) / 2).max(0) as i32;
    let left = options
        .left()
        .unwrap_or_else(|| centre(viewport.width, options.width()));
    let top = options
        .top()
        .unwrap_or_else(|| centre(viewport.height, options.height()));
    format!(
        "width={},height={},left={left},top={top},resizable=yes,scrollbars=yes",
        options.width(),
        options.height()
    )
}

pub struct PopupManager {
    host: Arc<dyn WindowHost>,
    scheduler: Arc<dyn Scheduler>,
    config: PopupConfig,
    signals: SignalHub,
    current: Mutex<Option<PopupHandle>>,
}

impl PopupManager {
    pub fn new(
        host: Arc<dyn WindowHost>,
        scheduler: Arc<dyn Scheduler>,
        config: PopupConfig,
        signals: SignalHub,
    ) -> Result<Self, PopupError> {
        config.validate()?;
        Ok(Self {
            host,
            scheduler,
            config,
            signals,
            current: Mutex::new(None),
        })
    }

    /// Validate raw options, then [`open`](Self::open).
    pub fn open_raw(&self, raw: &Value) -> Result<PopupHandle, PopupError> {
        let options = validate_popup_options(raw)?;
        self.open(&options)
    }

    /// Open the profile editor. Never fails because of blocking: a blocked
    /// or small-screen open yields a modal handle instead. Any previously
    /// open popup from this manager is closed first.
    pub fn open(&self, options: &PopupOptions) -> Result<PopupHandle, PopupError> {
        let url = popup_url(options, &self.config.edit_path)?;
        let previous = self.current.lock().take();
        if let Some(previous) = previous {
            previous.close();
        }

        let origin = options.origin();
        let app_name = options.app_name().to_string();
        let viewport = self.host.viewport();

        let handle = if viewport.prefers_modal(self.config.mobile_breakpoint_px) {
            tracing::debug!(app = %app_name, width = viewport.width, "small viewport, using modal");
            self.modal(origin, app_name, FallbackReason::SmallViewport)
        } else {
            let features = window_features(options, &viewport);
            let window = self.host.open(&url, POPUP_WINDOW_NAME, &features);
            match (detect_block(window.as_ref()), window) {
                (None, Some(window)) => {
                    tracing::debug!(app = %app_name, url = %url, "popup opened");
                    PopupHandle::open_window(
                        self.host.clone(),
                        self.scheduler.clone(),
                        self.signals.clone(),
                        origin,
                        app_name,
                        self.config.poll_interval(),
                        window,
                    )
                }
                (reason, window) => {
                    if let Some(window) = window {
                        window.close();
                    }
                    let reason = reason.unwrap_or(BlockReason::NoWindow);
                    let err = PopupError::Blocked {
                        app_name: app_name.clone(),
                        reason: reason.clone(),
                    };
                    tracing::warn!(error = %err, "falling back to modal");
                    self.signals
                        .emit(SyncSignal::popup_blocked(app_name.clone()));
                    self.modal(origin, app_name, FallbackReason::Blocked(reason))
                }
            }
        };

        *self.current.lock() = Some(handle.clone());
        Ok(handle)
    }

    pub fn current(&self) -> Option<PopupHandle> {
        self.current
            .lock()
            .as_ref()
            .filter(|handle| !handle.is_closed())
            .cloned()
    }

    /// Close the current popup. Returns `false` if none was open.
    pub fn close(&self) -> bool {
        let current = self.current.lock().take();
        match current {
            Some(handle) if !handle.is_closed() => {
                handle.close();
                true
            }
            _ => false,
        }
    }

    pub fn config(&self) -> &PopupConfig {
        &self.config
    }

    fn modal(&self, origin: String, app_name: String, reason: FallbackReason) -> PopupHandle {
        PopupHandle::modal(
            self.host.clone(),
            self.scheduler.clone(),
            self.signals.clone(),
            origin,
            app_name,
            reason,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_targets_edit_route_with_popup_query() {
        let options = PopupOptions::new("https://profile.example.com/some/page?x=1", "Docs & Notes")
            .unwrap();
        let url = popup_url(&options, "/profile/edit").unwrap();
        assert_eq!(
            url.as_str(),
            "https://profile.example.com/profile/edit?popup=true&app=Docs+%26+Notes"
        );
    }

    #[test]
    fn features_centre_on_viewport() {
        let options = PopupOptions::new("https://profile.example.com", "docs").unwrap();
        let features = window_features(&options, &Viewport::desktop(1280, 800));
        assert_eq!(
            features,
            "width=480,height=720,left=400,top=40,resizable=yes,scrollbars=yes"
        );

        let tiny = window_features(&options, &Viewport::desktop(300, 300));
        assert!(tiny.contains("left=0,top=0"));
    }
}
