//! Error types for profile-sync-core.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// One failed constraint, attributed to the field that violated it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// A non-empty set of constraint violations for one event or options object.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", join_errors(.0))]
pub struct ValidationErrors(pub Vec<FieldError>);

impl ValidationErrors {
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self(vec![FieldError::new(field, message)])
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.0
    }

    /// `true` when any violation is attributed to `field`.
    pub fn has_field(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }
}

fn join_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failures on the event pipeline: constructing, serializing or decoding.
///
/// None of these are retried; retransmitting would reproduce the same data.
#[derive(Debug, Error)]
pub enum EventError {
    /// Malformed or semantically invalid event.
    #[error("invalid event: {0}")]
    Validation(#[from] ValidationErrors),

    /// The payload string no longer matches its checksum.
    #[error("checksum mismatch: expected {expected}, computed {actual}")]
    Integrity { expected: String, actual: String },

    /// The payload string (or the wire frame around it) is not valid JSON.
    #[error("malformed event payload: {0}")]
    Parse(#[source] serde_json::Error),

    /// The payload could not be encoded.
    #[error("failed to encode event payload: {0}")]
    Encode(#[source] serde_json::Error),
}

impl EventError {
    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EventError::Validation(_) => "validation",
            EventError::Integrity { .. } => "integrity",
            EventError::Parse(_) => "parse",
            EventError::Encode(_) => "encode",
        }
    }
}

/// All errors that can arise while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load, with the offending file.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// YAML serialization error (save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_join_every_field() {
        let err = ValidationErrors(vec![
            FieldError::new("timestamp", "must be a positive integer"),
            FieldError::new("source", "must not be empty"),
        ]);
        assert_eq!(
            err.to_string(),
            "timestamp: must be a positive integer; source: must not be empty"
        );
        assert!(err.has_field("source"));
        assert!(!err.has_field("userId"));
    }

    #[test]
    fn event_error_kind_labels() {
        let err = EventError::Integrity {
            expected: "a".into(),
            actual: "b".into(),
        };
        assert_eq!(err.kind(), "integrity");
        assert!(err.to_string().contains("expected a"));
    }
}
