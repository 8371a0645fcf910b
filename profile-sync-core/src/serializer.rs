//! Wire encoding for profile change events.
//!
//! The `data` payload travels as a JSON string with a checksum computed over
//! that exact string. The default checksum is a 32-bit rolling hash: it
//! detects corruption and truncation, it does not authenticate the sender.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::ChecksumAlgorithm;
use crate::error::{EventError, FieldError, ValidationErrors};
use crate::sanitize::sanitize_event_data;
use crate::types::{EventType, ProfileChangeEvent, SerializedProfileChangeEvent};
use crate::validation::validate_event;

/// One transport payload: a single wire event or a batch of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireFrame {
    Batch(Vec<SerializedProfileChangeEvent>),
    Single(SerializedProfileChangeEvent),
}

impl WireFrame {
    pub fn encode(&self) -> Result<String, EventError> {
        serde_json::to_string(self).map_err(EventError::Encode)
    }

    pub fn decode(raw: &str) -> Result<Self, EventError> {
        serde_json::from_str(raw).map_err(EventError::Parse)
    }

    pub fn len(&self) -> usize {
        match self {
            WireFrame::Batch(events) => events.len(),
            WireFrame::Single(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_events(self) -> Vec<SerializedProfileChangeEvent> {
        match self {
            WireFrame::Batch(events) => events,
            WireFrame::Single(event) => vec![event],
        }
    }
}

/// Serializer bound to one checksum algorithm. Both ends of a channel must
/// agree on the algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventSerializer {
    algorithm: ChecksumAlgorithm,
}

impl EventSerializer {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    /// Re-validate, sanitize and encode an event for transit.
    pub fn serialize(
        &self,
        event: &ProfileChangeEvent,
    ) -> Result<SerializedProfileChangeEvent, EventError> {
        let mut raw = event.to_value().map_err(EventError::Encode)?;
        if let Some(data) = raw.get_mut("data") {
            *data = sanitize_event_data(data.take());
        }
        let event = validate_event(&raw).into_result()?;

        let data = serde_json::to_string(event.data()).map_err(EventError::Encode)?;
        let timestamp = i64::try_from(event.timestamp())
            .map_err(|_| ValidationErrors::single("timestamp", "out of range"))?;
        Ok(SerializedProfileChangeEvent {
            event_type: event.event_type().as_str().to_string(),
            checksum: self.checksum(&data),
            data,
            timestamp,
            source: event.source().to_string(),
            user_id: event.user_id().to_string(),
        })
    }

    /// Decode a wire event: structure, then checksum, then payload JSON, then
    /// the reassembled event.
    pub fn deserialize(
        &self,
        serialized: &SerializedProfileChangeEvent,
    ) -> Result<ProfileChangeEvent, EventError> {
        check_wire_structure(serialized)?;

        let actual = self.checksum(&serialized.data);
        if actual != serialized.checksum {
            return Err(EventError::Integrity {
                expected: serialized.checksum.clone(),
                actual,
            });
        }

        let data: Value = serde_json::from_str(&serialized.data).map_err(EventError::Parse)?;
        let raw = json!({
            "type": serialized.event_type,
            "data": data,
            "timestamp": serialized.timestamp,
            "source": serialized.source,
            "userId": serialized.user_id,
        });
        Ok(validate_event(&raw).into_result()?)
    }

    /// Serialize several events into one frame; a single event is sent bare.
    pub fn encode_frame(&self, events: &[ProfileChangeEvent]) -> Result<String, EventError> {
        let mut wire = events
            .iter()
            .map(|event| self.serialize(event))
            .collect::<Result<Vec<_>, _>>()?;
        let frame = if wire.len() == 1 {
            WireFrame::Single(wire.remove(0))
        } else {
            WireFrame::Batch(wire)
        };
        frame.encode()
    }

    /// Checksum of a payload string under this serializer's algorithm.
    pub fn checksum(&self, payload: &str) -> String {
        match self.algorithm {
            ChecksumAlgorithm::Rolling => format!("{:08x}", rolling_hash(payload)),
            ChecksumAlgorithm::Sha256 => hex::encode(Sha256::digest(payload.as_bytes())),
        }
    }
}

fn check_wire_structure(serialized: &SerializedProfileChangeEvent) -> Result<(), ValidationErrors> {
    let mut errors = Vec::new();
    if serialized.event_type.parse::<EventType>().is_err() {
        errors.push(FieldError::new("type", format!("unknown event type '{}'", serialized.event_type)));
    }
    if serialized.timestamp <= 0 {
        errors.push(FieldError::new("timestamp", "must be a positive integer"));
    }
    if serialized.source.trim().is_empty() {
        errors.push(FieldError::new("source", "must not be empty"));
    }
    if Uuid::try_parse(&serialized.user_id).is_err() {
        errors.push(FieldError::new("userId", "must be a valid UUID"));
    }
    if serialized.checksum.is_empty() {
        errors.push(FieldError::new("checksum", "is required"));
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationErrors(errors))
    }
}

/// `h = h * 31 + unit` over UTF-16 code units, wrapping at 32 bits.
///
/// Any single code-unit substitution changes the result because 31 is odd
/// and therefore invertible modulo 2^32.
pub fn rolling_hash(payload: &str) -> u32 {
    payload
        .encode_utf16()
        .fold(0u32, |hash, unit| hash.wrapping_mul(31).wrapping_add(u32::from(unit)))
}

/// [`EventSerializer::serialize`] with the default rolling checksum.
pub fn serialize(event: &ProfileChangeEvent) -> Result<SerializedProfileChangeEvent, EventError> {
    EventSerializer::default().serialize(event)
}

/// [`EventSerializer::deserialize`] with the default rolling checksum.
pub fn deserialize(serialized: &SerializedProfileChangeEvent) -> Result<ProfileChangeEvent, EventError> {
    EventSerializer::default().deserialize(serialized)
}

/// Sanitize, stamp with the current time and validate. For trusted callers
/// building events from typed application state.
pub fn create_event(
    event_type: EventType,
    data: Value,
    source: &str,
    user_id: Uuid,
) -> Result<ProfileChangeEvent, EventError> {
    let timestamp = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(1).max(1);
    let raw = json!({
        "type": event_type.as_str(),
        "data": sanitize_event_data(data),
        "timestamp": timestamp,
        "source": source,
        "userId": user_id.to_string(),
    });
    Ok(validate_event(&raw).into_result()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventData, Theme};

    fn theme_event(theme: Theme) -> ProfileChangeEvent {
        ProfileChangeEvent::new(theme.into(), 1_700_000_000_000, "docs", Uuid::new_v4()).unwrap()
    }

    #[test]
    fn rolling_hash_matches_reference_values() {
        assert_eq!(rolling_hash(""), 0);
        assert_eq!(rolling_hash("a"), 97);
        // "ab" = 97 * 31 + 98
        assert_eq!(rolling_hash("ab"), 3105);
    }

    #[test]
    fn checksum_formats() {
        let rolling = EventSerializer::new(ChecksumAlgorithm::Rolling);
        assert_eq!(rolling.checksum("ab"), "00000c21");
        let sha = EventSerializer::new(ChecksumAlgorithm::Sha256);
        assert_eq!(sha.checksum("ab").len(), 64);
    }

    #[test]
    fn serialize_encodes_data_as_string() {
        let event = theme_event(Theme::Dark);
        let wire = serialize(&event).unwrap();
        assert_eq!(wire.event_type, "theme");
        assert_eq!(wire.data, r#"{"theme":"dark"}"#);
        assert_eq!(wire.checksum, EventSerializer::default().checksum(&wire.data));
    }

    #[test]
    fn deserialize_reports_integrity_before_parse() {
        let mut wire = serialize(&theme_event(Theme::Light)).unwrap();
        wire.data = "{not json".to_string();
        assert!(matches!(deserialize(&wire), Err(EventError::Integrity { .. })));

        wire.checksum = EventSerializer::default().checksum(&wire.data);
        assert!(matches!(deserialize(&wire), Err(EventError::Parse(_))));
    }

    #[test]
    fn deserialize_rejects_semantically_invalid_payload() {
        let mut wire = serialize(&theme_event(Theme::Light)).unwrap();
        wire.data = r#"{"theme":"sepia"}"#.to_string();
        wire.checksum = EventSerializer::default().checksum(&wire.data);
        assert!(matches!(deserialize(&wire), Err(EventError::Validation(_))));
    }

    #[test]
    fn mismatched_algorithms_fail_integrity() {
        let wire = EventSerializer::new(ChecksumAlgorithm::Sha256)
            .serialize(&theme_event(Theme::Dark))
            .unwrap();
        assert!(matches!(deserialize(&wire), Err(EventError::Integrity { .. })));
        assert!(EventSerializer::new(ChecksumAlgorithm::Sha256)
            .deserialize(&wire)
            .is_ok());
    }

    #[test]
    fn frames_round_trip_single_and_batch() {
        let serializer = EventSerializer::default();
        let single = serializer.encode_frame(&[theme_event(Theme::Dark)]).unwrap();
        assert!(single.starts_with('{'));
        assert_eq!(WireFrame::decode(&single).unwrap().len(), 1);

        let batch = serializer
            .encode_frame(&[theme_event(Theme::Dark), theme_event(Theme::Light)])
            .unwrap();
        assert!(batch.starts_with('['));
        let events = WireFrame::decode(&batch).unwrap().into_events();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn create_event_sanitizes_and_stamps() {
        let user = Uuid::new_v4();
        let event = create_event(
            EventType::DisplayName,
            json!({"displayName": "<b>Ada</b>"}),
            "paint",
            user,
        )
        .unwrap();
        assert!(event.timestamp() > 0);
        assert_eq!(
            event.data(),
            &EventData::DisplayName(crate::types::DisplayNameData {
                display_name: "Ada".to_string()
            })
        );

        let err = create_event(EventType::Theme, json!({"theme": 3}), "paint", user).unwrap_err();
        assert!(matches!(err, EventError::Validation(_)));
    }
}
