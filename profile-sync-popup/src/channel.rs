//! Window-to-window messaging with origin and source checks.

use std::sync::Arc;

use serde_json::Value;

use crate::window::WindowId;

/// A message delivered to the opener.
#[derive(Debug, Clone, PartialEq)]
pub struct PopupMessage {
    /// Serialized origin of the sender, e.g. `https://profile.example.com`.
    pub origin: String,
    /// Sending window, when the host can tell.
    pub source: Option<WindowId>,
    pub data: Value,
}

pub type MessageHandler = Arc<dyn Fn(&PopupMessage) + Send + Sync>;

/// Acceptance rule for one popup: the origin must match exactly and, when a
/// window is known, so must the source window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopupChannel {
    expected_origin: String,
    expected_source: Option<WindowId>,
}

impl PopupChannel {
    pub fn new(expected_origin: impl Into<String>, expected_source: Option<WindowId>) -> Self {
        Self {
            expected_origin: expected_origin.into(),
            expected_source,
        }
    }

    pub fn expected_origin(&self) -> &str {
        &self.expected_origin
    }

    pub fn accepts(&self, message: &PopupMessage) -> bool {
        if message.origin != self.expected_origin {
            tracing::debug!(
                expected = %self.expected_origin,
                actual = %message.origin,
                "discarding popup message from unexpected origin"
            );
            return false;
        }
        if let Some(expected) = self.expected_source {
            if message.source != Some(expected) {
                tracing::debug!(
                    expected = expected.0,
                    "discarding popup message from unexpected window"
                );
                return false;
            }
        }
        true
    }
}
