//! Domain types for profile change events.
//!
//! A [`ProfileChangeEvent`] can only be obtained through validation, so every
//! value of the type satisfies the boundary invariants: positive timestamp,
//! non-empty source, parsed UUID and a payload shaped for its event type.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;
use uuid::Uuid;

use crate::error::ValidationErrors;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// The kind of profile change carried by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventType {
    Theme,
    Avatar,
    DisplayName,
    Profile,
    SignOut,
}

impl EventType {
    pub const ALL: [EventType; 5] = [
        EventType::Theme,
        EventType::Avatar,
        EventType::DisplayName,
        EventType::Profile,
        EventType::SignOut,
    ];

    /// Wire name of the type.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Theme => "theme",
            EventType::Avatar => "avatar",
            EventType::DisplayName => "displayName",
            EventType::Profile => "profile",
            EventType::SignOut => "signOut",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "unknown event type '{s}'; expected: theme, avatar, displayName, profile, signOut"
                )
            })
    }
}

/// Colour scheme preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Theme::Light => write!(f, "light"),
            Theme::Dark => write!(f, "dark"),
            Theme::System => write!(f, "system"),
        }
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeData {
    pub theme: Theme,
}

/// `avatar_url == None` means the avatar was removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvatarData {
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayNameData {
    pub display_name: String,
}

/// Partial profile update; at least one field is present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProfileData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<Theme>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SignOutData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Payload of a profile change; the variant determines the event type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum EventData {
    Theme(ThemeData),
    Avatar(AvatarData),
    DisplayName(DisplayNameData),
    Profile(ProfileData),
    SignOut(SignOutData),
}

impl EventData {
    pub fn event_type(&self) -> EventType {
        match self {
            EventData::Theme(_) => EventType::Theme,
            EventData::Avatar(_) => EventType::Avatar,
            EventData::DisplayName(_) => EventType::DisplayName,
            EventData::Profile(_) => EventType::Profile,
            EventData::SignOut(_) => EventType::SignOut,
        }
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

impl From<Theme> for EventData {
    fn from(theme: Theme) -> Self {
        EventData::Theme(ThemeData { theme })
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Coalescing key: at most one live entry per key in any queue or timer map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventKey {
    pub event_type: EventType,
    pub user_id: Uuid,
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.event_type, self.user_id)
    }
}

/// A validated, immutable profile change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "Value")]
pub struct ProfileChangeEvent {
    #[serde(rename = "type")]
    event_type: EventType,
    data: EventData,
    timestamp: u64,
    source: String,
    user_id: Uuid,
}

impl ProfileChangeEvent {
    /// Build an event from typed parts, enforcing the boundary invariants.
    pub fn new(
        data: EventData,
        timestamp: u64,
        source: impl Into<String>,
        user_id: Uuid,
    ) -> Result<Self, ValidationErrors> {
        let source = source.into();
        let mut errors = Vec::new();
        crate::validation::check_timestamp(timestamp, &mut errors);
        crate::validation::check_source(&source, &mut errors);
        crate::validation::check_data(&data, &mut errors);
        if !errors.is_empty() {
            return Err(ValidationErrors(errors));
        }
        Ok(Self::from_parts_unchecked(data, timestamp, source, user_id))
    }

    pub(crate) fn from_parts_unchecked(
        data: EventData,
        timestamp: u64,
        source: String,
        user_id: Uuid,
    ) -> Self {
        Self {
            event_type: data.event_type(),
            data,
            timestamp,
            source,
            user_id,
        }
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn data(&self) -> &EventData {
        &self.data
    }

    /// Milliseconds since the Unix epoch.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Name of the emitting application.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn key(&self) -> EventKey {
        EventKey {
            event_type: self.event_type,
            user_id: self.user_id,
        }
    }

    /// Plain JSON view, the shape accepted by [`crate::validate_event`].
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

impl TryFrom<Value> for ProfileChangeEvent {
    type Error = ValidationErrors;

    fn try_from(raw: Value) -> Result<Self, Self::Error> {
        crate::validation::validate_event(&raw).into_result()
    }
}

/// Transit form of an event: `data` is an opaque JSON string guarded by
/// `checksum`. Field types are loose on purpose so that structural problems
/// surface as validation errors rather than parse errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedProfileChangeEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: String,
    pub timestamp: i64,
    pub source: String,
    pub user_id: String,
    pub checksum: String,
}

// ---------------------------------------------------------------------------
// Popup options
// ---------------------------------------------------------------------------

/// Validated options for opening the profile editor popup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopupOptions {
    pub(crate) origin: Url,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) left: Option<i32>,
    pub(crate) top: Option<i32>,
    pub(crate) app_name: String,
}

impl PopupOptions {
    pub const DEFAULT_WIDTH: u32 = 480;
    pub const DEFAULT_HEIGHT: u32 = 720;

    /// Options with the default window size.
    pub fn new(origin: &str, app_name: &str) -> Result<Self, ValidationErrors> {
        crate::validation::validate_popup_options(&serde_json::json!({
            "origin": origin,
            "appName": app_name,
        }))
    }

    pub fn origin_url(&self) -> &Url {
        &self.origin
    }

    /// ASCII serialization of the origin, e.g. `https://profile.example.com`.
    pub fn origin(&self) -> String {
        self.origin.origin().ascii_serialization()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn left(&self) -> Option<i32> {
        self.left
    }

    pub fn top(&self) -> Option<i32> {
        self.top
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_type_parses_wire_names() {
        for t in EventType::ALL {
            assert_eq!(t.as_str().parse::<EventType>(), Ok(t));
        }
        assert!("ThemE".parse::<EventType>().is_err());
    }

    #[test]
    fn event_serializes_with_wire_field_names() {
        let user = Uuid::new_v4();
        let event =
            ProfileChangeEvent::new(Theme::Dark.into(), 1_700_000_000_000, "docs", user).unwrap();
        let value = event.to_value().unwrap();
        assert_eq!(
            value,
            json!({
                "type": "theme",
                "data": {"theme": "dark"},
                "timestamp": 1_700_000_000_000u64,
                "source": "docs",
                "userId": user.to_string(),
            })
        );
    }

    #[test]
    fn event_deserializes_through_validation() {
        let user = Uuid::new_v4();
        let raw = json!({
            "type": "displayName",
            "data": {"displayName": "Ada"},
            "timestamp": 5,
            "source": "paint",
            "userId": user.to_string(),
        });
        let event: ProfileChangeEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.event_type(), EventType::DisplayName);
        assert_eq!(event.key().to_string(), format!("displayName:{user}"));

        let bad = json!({"type": "theme", "data": {"theme": "dark"}, "timestamp": 0,
            "source": "paint", "userId": user.to_string()});
        assert!(serde_json::from_value::<ProfileChangeEvent>(bad).is_err());
    }

    #[test]
    fn new_rejects_empty_source_and_zero_timestamp() {
        let err = ProfileChangeEvent::new(Theme::Light.into(), 0, "  ", Uuid::new_v4())
            .unwrap_err();
        assert!(err.has_field("timestamp"));
        assert!(err.has_field("source"));
    }
}
