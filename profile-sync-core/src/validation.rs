//! Boundary validation for profile change events and popup options.
//!
//! [`validate_event`] never panics and never returns early on the first
//! problem: every violated constraint is reported so callers can log the full
//! picture of a rejected event.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use url::Url;
use uuid::Uuid;

use crate::error::{FieldError, ValidationErrors};
use crate::types::{
    AvatarData, DisplayNameData, EventData, EventType, PopupOptions, ProfileChangeEvent,
    ProfileData, SignOutData, ThemeData,
};

pub const MAX_SOURCE_CHARS: usize = 100;
pub const MAX_DISPLAY_NAME_CHARS: usize = 100;
pub const MAX_BIO_CHARS: usize = 500;
pub const MAX_REASON_CHARS: usize = 200;
pub const MAX_AVATAR_URL_CHARS: usize = 2048;
pub const MAX_AVATAR_DATA_URI_CHARS: usize = 1_000_000;

pub const MIN_POPUP_DIMENSION: u64 = 200;
pub const MAX_POPUP_DIMENSION: u64 = 4000;
pub const MAX_APP_NAME_CHARS: usize = 64;

/// Result of validating a raw event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub event: Option<ProfileChangeEvent>,
    pub errors: Vec<FieldError>,
}

impl ValidationOutcome {
    fn invalid(errors: Vec<FieldError>) -> Self {
        Self {
            event: None,
            errors,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.event.is_some() && self.errors.is_empty()
    }

    pub fn into_result(self) -> Result<ProfileChangeEvent, ValidationErrors> {
        match self.event {
            Some(event) if self.errors.is_empty() => Ok(event),
            _ => Err(ValidationErrors(self.errors)),
        }
    }
}

/// Validate a raw JSON event against the type enum and field constraints.
pub fn validate_event(raw: &Value) -> ValidationOutcome {
    let Some(obj) = raw.as_object() else {
        return ValidationOutcome::invalid(vec![FieldError::new(
            "event",
            "must be a JSON object",
        )]);
    };

    let mut errors = Vec::new();

    let event_type = match obj.get("type") {
        Some(Value::String(s)) => match s.parse::<EventType>() {
            Ok(t) => Some(t),
            Err(msg) => {
                errors.push(FieldError::new("type", msg));
                None
            }
        },
        Some(_) => {
            errors.push(FieldError::new("type", "must be a string"));
            None
        }
        None => {
            errors.push(FieldError::new("type", "is required"));
            None
        }
    };

    let timestamp = match obj.get("timestamp") {
        Some(v) => match v.as_u64() {
            Some(ts) => {
                check_timestamp(ts, &mut errors);
                Some(ts)
            }
            None => {
                errors.push(FieldError::new("timestamp", "must be a positive integer"));
                None
            }
        },
        None => {
            errors.push(FieldError::new("timestamp", "is required"));
            None
        }
    };

    let source = match obj.get("source") {
        Some(Value::String(s)) => {
            check_source(s, &mut errors);
            Some(s.clone())
        }
        Some(_) => {
            errors.push(FieldError::new("source", "must be a string"));
            None
        }
        None => {
            errors.push(FieldError::new("source", "is required"));
            None
        }
    };

    let user_id = match obj.get("userId") {
        Some(Value::String(s)) => match Uuid::try_parse(s) {
            Ok(id) => Some(id),
            Err(_) => {
                errors.push(FieldError::new("userId", "must be a valid UUID"));
                None
            }
        },
        Some(_) => {
            errors.push(FieldError::new("userId", "must be a string"));
            None
        }
        None => {
            errors.push(FieldError::new("userId", "is required"));
            None
        }
    };

    let data = event_type.and_then(|t| parse_data(t, obj.get("data"), &mut errors));

    match (data, timestamp, source, user_id) {
        (Some(data), Some(timestamp), Some(source), Some(user_id)) if errors.is_empty() => {
            ValidationOutcome {
                event: Some(ProfileChangeEvent::from_parts_unchecked(
                    data, timestamp, source, user_id,
                )),
                errors,
            }
        }
        _ => ValidationOutcome::invalid(errors),
    }
}

fn parse_data(
    event_type: EventType,
    raw: Option<&Value>,
    errors: &mut Vec<FieldError>,
) -> Option<EventData> {
    let Some(raw) = raw else {
        errors.push(FieldError::new("data", "is required"));
        return None;
    };
    if !raw.is_object() {
        errors.push(FieldError::new("data", "must be an object"));
        return None;
    }

    let data = match event_type {
        EventType::Theme => parse_payload::<ThemeData>(raw, errors).map(EventData::Theme),
        EventType::Avatar => parse_payload::<AvatarData>(raw, errors).map(EventData::Avatar),
        EventType::DisplayName => {
            parse_payload::<DisplayNameData>(raw, errors).map(EventData::DisplayName)
        }
        EventType::Profile => parse_payload::<ProfileData>(raw, errors).map(EventData::Profile),
        EventType::SignOut => parse_payload::<SignOutData>(raw, errors).map(EventData::SignOut),
    }?;

    let before = errors.len();
    check_data(&data, errors);
    (errors.len() == before).then_some(data)
}

fn parse_payload<T: DeserializeOwned>(raw: &Value, errors: &mut Vec<FieldError>) -> Option<T> {
    match serde_json::from_value::<T>(raw.clone()) {
        Ok(payload) => Some(payload),
        Err(err) => {
            errors.push(FieldError::new("data", err.to_string()));
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Field checks shared with `ProfileChangeEvent::new`
// ---------------------------------------------------------------------------

pub(crate) fn check_timestamp(timestamp: u64, errors: &mut Vec<FieldError>) {
    if timestamp == 0 {
        errors.push(FieldError::new("timestamp", "must be a positive integer"));
    }
}

pub(crate) fn check_source(source: &str, errors: &mut Vec<FieldError>) {
    if source.trim().is_empty() {
        errors.push(FieldError::new("source", "must not be empty"));
    } else if source.chars().count() > MAX_SOURCE_CHARS {
        errors.push(FieldError::new(
            "source",
            format!("must be at most {MAX_SOURCE_CHARS} characters"),
        ));
    }
}

pub(crate) fn check_data(data: &EventData, errors: &mut Vec<FieldError>) {
    match data {
        EventData::Theme(_) => {}
        EventData::Avatar(avatar) => {
            if let Some(url) = &avatar.avatar_url {
                check_avatar_url("data.avatarUrl", url, errors);
            }
        }
        EventData::DisplayName(name) => {
            check_display_name("data.displayName", &name.display_name, errors);
        }
        EventData::Profile(profile) => {
            if profile.display_name.is_none()
                && profile.avatar_url.is_none()
                && profile.theme.is_none()
                && profile.bio.is_none()
            {
                errors.push(FieldError::new("data", "profile update must change at least one field"));
            }
            if let Some(name) = &profile.display_name {
                check_display_name("data.displayName", name, errors);
            }
            if let Some(url) = &profile.avatar_url {
                check_avatar_url("data.avatarUrl", url, errors);
            }
            if let Some(bio) = &profile.bio {
                check_max_chars("data.bio", bio, MAX_BIO_CHARS, errors);
            }
        }
        EventData::SignOut(sign_out) => {
            if let Some(reason) = &sign_out.reason {
                check_max_chars("data.reason", reason, MAX_REASON_CHARS, errors);
            }
        }
    }
}

fn check_display_name(field: &str, name: &str, errors: &mut Vec<FieldError>) {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        errors.push(FieldError::new(field, "must not be empty"));
    } else {
        check_max_chars(field, trimmed, MAX_DISPLAY_NAME_CHARS, errors);
    }
}

fn check_avatar_url(field: &str, url: &str, errors: &mut Vec<FieldError>) {
    if url.starts_with("data:image/") {
        check_max_chars(field, url, MAX_AVATAR_DATA_URI_CHARS, errors);
        return;
    }
    if url.len() > MAX_AVATAR_URL_CHARS {
        errors.push(FieldError::new(
            field,
            format!("must be at most {MAX_AVATAR_URL_CHARS} characters"),
        ));
        return;
    }
    match Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
        _ => errors.push(FieldError::new(
            field,
            "must be an http(s) URL or a data:image URI",
        )),
    }
}

fn check_max_chars(field: &str, value: &str, max: usize, errors: &mut Vec<FieldError>) {
    if value.chars().count() > max {
        errors.push(FieldError::new(
            field,
            format!("must be at most {max} characters"),
        ));
    }
}

// ---------------------------------------------------------------------------
// Popup options
// ---------------------------------------------------------------------------

/// Validate raw popup options: absolute http(s) origin, sane dimensions and a
/// named requesting application. Missing dimensions fall back to defaults.
pub fn validate_popup_options(raw: &Value) -> Result<PopupOptions, ValidationErrors> {
    let Some(obj) = raw.as_object() else {
        return Err(ValidationErrors::single("options", "must be a JSON object"));
    };
    let mut errors = Vec::new();

    let origin = match obj.get("origin") {
        Some(Value::String(s)) => match Url::parse(s) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => Some(url),
            Ok(_) => {
                errors.push(FieldError::new("origin", "must be an absolute http(s) URL"));
                None
            }
            Err(err) => {
                errors.push(FieldError::new("origin", format!("invalid URL: {err}")));
                None
            }
        },
        Some(_) => {
            errors.push(FieldError::new("origin", "must be a string"));
            None
        }
        None => {
            errors.push(FieldError::new("origin", "is required"));
            None
        }
    };

    let width = dimension(obj, "width", PopupOptions::DEFAULT_WIDTH, &mut errors);
    let height = dimension(obj, "height", PopupOptions::DEFAULT_HEIGHT, &mut errors);
    let left = offset(obj, "left", &mut errors);
    let top = offset(obj, "top", &mut errors);

    let app_name = match obj.get("appName") {
        Some(Value::String(s)) if !s.trim().is_empty() => {
            let name = s.trim().to_string();
            check_max_chars("appName", &name, MAX_APP_NAME_CHARS, &mut errors);
            Some(name)
        }
        Some(Value::String(_)) => {
            errors.push(FieldError::new("appName", "must not be empty"));
            None
        }
        Some(_) => {
            errors.push(FieldError::new("appName", "must be a string"));
            None
        }
        None => {
            errors.push(FieldError::new("appName", "is required"));
            None
        }
    };

    match (origin, app_name) {
        (Some(origin), Some(app_name)) if errors.is_empty() => Ok(PopupOptions {
            origin,
            width,
            height,
            left,
            top,
            app_name,
        }),
        _ => Err(ValidationErrors(errors)),
    }
}

fn dimension(obj: &Map<String, Value>, field: &str, default: u32, errors: &mut Vec<FieldError>) -> u32 {
    match obj.get(field) {
        None | Some(Value::Null) => default,
        Some(v) => match v.as_u64() {
            Some(n) if (MIN_POPUP_DIMENSION..=MAX_POPUP_DIMENSION).contains(&n) => n as u32,
            _ => {
                errors.push(FieldError::new(
                    field,
                    format!(
                        "must be an integer between {MIN_POPUP_DIMENSION} and {MAX_POPUP_DIMENSION}"
                    ),
                ));
                default
            }
        },
    }
}

fn offset(obj: &Map<String, Value>, field: &str, errors: &mut Vec<FieldError>) -> Option<i32> {
    match obj.get(field) {
        None | Some(Value::Null) => None,
        Some(v) => match v.as_i64().and_then(|n| i32::try_from(n).ok()) {
            Some(n) if n >= 0 => Some(n),
            Some(_) => {
                errors.push(FieldError::new(field, "must not be negative"));
                None
            }
            None => {
                errors.push(FieldError::new(field, "must be an integer"));
                None
            }
        },
    }
}
