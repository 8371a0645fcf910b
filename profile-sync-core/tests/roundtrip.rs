//! Wire round-trip and tamper-detection tests for `profile-sync-core`.
//!
//! Each `#[case]` is isolated, no shared state.

use profile_sync_core::{
    deserialize, serialize,
    serializer::WireFrame,
    types::{AvatarData, DisplayNameData, ProfileData, SignOutData},
    ChecksumAlgorithm, EventData, EventError, EventSerializer, ProfileChangeEvent, Theme,
};
use rstest::rstest;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn event(data: EventData) -> ProfileChangeEvent {
    ProfileChangeEvent::new(data, 1_700_000_123_456, "docs", Uuid::new_v4()).expect("valid event")
}

fn full_profile() -> EventData {
    EventData::Profile(ProfileData {
        display_name: Some("アプリ-проект-项目".to_string()),
        avatar_url: Some("https://cdn.example.com/u/1.png".to_string()),
        theme: Some(Theme::Dark),
        bio: Some("Task with émojis 🚀 & spéçïal chars: \"quoted\"".to_string()),
    })
}

// ---------------------------------------------------------------------------
// 1. Round-trip
// ---------------------------------------------------------------------------

#[rstest]
#[case::theme(Theme::Light.into())]
#[case::avatar_removed(EventData::Avatar(AvatarData { avatar_url: None }))]
#[case::display_name(EventData::DisplayName(DisplayNameData { display_name: "Grace".into() }))]
#[case::profile(full_profile())]
#[case::sign_out(EventData::SignOut(SignOutData { reason: Some("expired".into()) }))]
fn deserialize_reproduces_serialized_event(#[case] data: EventData) {
    let original = event(data);
    let wire = serialize(&original).expect("serialize");
    let decoded = deserialize(&wire).expect("deserialize");
    assert_eq!(decoded, original);
}

#[test]
fn round_trip_strips_markup_only() {
    let original = event(EventData::DisplayName(DisplayNameData {
        display_name: "Ada<script>steal()</script> Lovelace".into(),
    }));
    let decoded = deserialize(&serialize(&original).unwrap()).unwrap();
    assert_eq!(decoded.user_id(), original.user_id());
    assert_eq!(decoded.timestamp(), original.timestamp());
    assert_eq!(
        decoded.data(),
        &EventData::DisplayName(DisplayNameData {
            display_name: "Ada Lovelace".into()
        })
    );
}

#[test]
fn wire_json_uses_camel_case_fields() {
    let wire = serialize(&event(Theme::Dark.into())).unwrap();
    let json = serde_json::to_value(&wire).unwrap();
    for field in ["type", "data", "timestamp", "source", "userId", "checksum"] {
        assert!(json.get(field).is_some(), "missing {field}");
    }
    assert!(json["data"].is_string());
}

// ---------------------------------------------------------------------------
// 2. Tamper detection
// ---------------------------------------------------------------------------

#[rstest]
#[case::rolling(ChecksumAlgorithm::Rolling)]
#[case::sha256(ChecksumAlgorithm::Sha256)]
fn mutating_any_payload_character_fails_integrity(#[case] algorithm: ChecksumAlgorithm) {
    let serializer = EventSerializer::new(algorithm);
    let wire = serializer.serialize(&event(full_profile())).unwrap();
    let chars: Vec<char> = wire.data.chars().collect();

    for index in 0..chars.len() {
        let mut mutated = chars.clone();
        mutated[index] = if mutated[index] == 'x' { 'y' } else { 'x' };
        let mut tampered = wire.clone();
        tampered.data = mutated.into_iter().collect();

        let err = serializer.deserialize(&tampered).unwrap_err();
        assert!(
            matches!(err, EventError::Integrity { .. }),
            "index {index}: expected integrity error, got {err}"
        );
    }
}

#[test]
fn truncated_payload_fails_integrity() {
    let mut wire = serialize(&event(Theme::System.into())).unwrap();
    wire.data.pop();
    assert!(matches!(deserialize(&wire), Err(EventError::Integrity { .. })));
}

#[test]
fn structurally_invalid_wire_event_is_a_validation_error() {
    let mut wire = serialize(&event(Theme::Dark.into())).unwrap();
    wire.user_id = "nope".into();
    wire.timestamp = 0;
    match deserialize(&wire) {
        Err(EventError::Validation(errors)) => {
            assert!(errors.has_field("userId"));
            assert!(errors.has_field("timestamp"));
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// 3. Frames
// ---------------------------------------------------------------------------

#[test]
fn garbage_frame_is_a_parse_error() {
    assert!(matches!(
        WireFrame::decode("definitely not json"),
        Err(EventError::Parse(_))
    ));
    assert!(matches!(
        WireFrame::decode(r#"{"type":"theme"}"#),
        Err(EventError::Parse(_))
    ));
}
