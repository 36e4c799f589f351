//! Structural validation of candidate messages.
//!
//! Validation runs in two stages: the base header (`type`, `timestamp`,
//! `source`) and then the variant's own predicate. A candidate that fails the
//! header never reaches the variant check. Unknown extra fields are ignored.

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::error::{ErrorCode, ValidationError};
use crate::message::{Message, MessageBody, NoteEvent, Source, StateSync};
use crate::midi::{validate_midi_number, validate_velocity};

/// The `type` tags the catalog recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    NoteOn,
    NoteOff,
    ChordOn,
    AllNotesOff,
    StateSync,
    Heartbeat,
}

impl Kind {
    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "note_on" => Some(Kind::NoteOn),
            "note_off" => Some(Kind::NoteOff),
            "chord_on" => Some(Kind::ChordOn),
            "all_notes_off" => Some(Kind::AllNotesOff),
            "state_sync" => Some(Kind::StateSync),
            "heartbeat" => Some(Kind::Heartbeat),
            _ => None,
        }
    }
}

/// Validate a parsed JSON candidate against the catalog.
pub fn validate(candidate: &Value) -> Result<Message, ValidationError> {
    let obj = candidate
        .as_object()
        .ok_or_else(|| ValidationError::malformed("message must be a JSON object"))?;

    let tag = match obj.get("type") {
        Some(Value::String(s)) => s.as_str(),
        Some(_) => return Err(ValidationError::malformed("type must be a string")),
        None => return Err(ValidationError::malformed("missing field: type")),
    };
    let kind = Kind::from_tag(tag).ok_or_else(|| {
        ValidationError::new(ErrorCode::UnknownType, format!("unknown message type '{}'", tag))
    })?;

    let timestamp = positive_integer(obj, "timestamp")?;
    let source = source(obj)?;

    let body = match kind {
        Kind::NoteOn => {
            let note = note_fields(obj)?;
            MessageBody::NoteOn {
                midi_number: note.midi_number,
                velocity: note.velocity,
            }
        }
        Kind::NoteOff => {
            let note = note_fields(obj)?;
            MessageBody::NoteOff {
                midi_number: note.midi_number,
                velocity: note.velocity,
            }
        }
        Kind::ChordOn => {
            let notes = note_list(obj, "notes")?;
            if notes.is_empty() {
                return Err(ValidationError::malformed("notes must not be empty"));
            }
            MessageBody::ChordOn {
                notes,
                chord_name: optional_string(obj, "chordName")?,
            }
        }
        Kind::AllNotesOff => MessageBody::AllNotesOff,
        Kind::StateSync => {
            let active_notes = note_list(obj, "activeNotes")?;
            let mut seen = HashSet::new();
            if !active_notes.iter().all(|n| seen.insert(n.midi_number)) {
                return Err(ValidationError::malformed(
                    "activeNotes contains a duplicate midiNumber",
                ));
            }
            let active_client_count = non_negative_integer(obj, "activeClientCount")?;
            let active_client_count = u32::try_from(active_client_count)
                .map_err(|_| ValidationError::malformed("activeClientCount is too large"))?;
            MessageBody::StateSync(StateSync {
                active_notes,
                last_update_timestamp: non_negative_integer(obj, "lastUpdateTimestamp")?,
                active_client_count,
                state_version: non_negative_integer(obj, "stateVersion")?,
            })
        }
        Kind::Heartbeat => MessageBody::Heartbeat {
            client_id: optional_string(obj, "clientId")?,
        },
    };

    Ok(Message {
        timestamp,
        source,
        body,
    })
}

fn required<'a>(obj: &'a Map<String, Value>, field: &str) -> Result<&'a Value, ValidationError> {
    obj.get(field)
        .ok_or_else(|| ValidationError::malformed(format!("missing field: {}", field)))
}

fn non_negative_integer(obj: &Map<String, Value>, field: &str) -> Result<u64, ValidationError> {
    required(obj, field)?.as_u64().ok_or_else(|| {
        ValidationError::malformed(format!("{} must be a non-negative integer", field))
    })
}

fn positive_integer(obj: &Map<String, Value>, field: &str) -> Result<u64, ValidationError> {
    match non_negative_integer(obj, field) {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ValidationError::malformed(format!(
            "{} must be a positive integer",
            field
        ))),
    }
}

fn source(obj: &Map<String, Value>) -> Result<Source, ValidationError> {
    match required(obj, "source")? {
        Value::String(s) if s == "server" => Ok(Source::Server),
        Value::String(s) if s == "client" => Ok(Source::Client),
        other => Err(ValidationError::malformed(format!(
            "source must be \"server\" or \"client\", got {}",
            other
        ))),
    }
}

fn optional_string(obj: &Map<String, Value>, field: &str) -> Result<Option<String>, ValidationError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ValidationError::malformed(format!(
            "{} must be a string",
            field
        ))),
    }
}

fn note_fields(obj: &Map<String, Value>) -> Result<NoteEvent, ValidationError> {
    let midi_number = validate_midi_number("midiNumber", required(obj, "midiNumber")?)?;
    let velocity = validate_velocity("velocity", required(obj, "velocity")?)?;
    Ok(NoteEvent {
        midi_number,
        velocity,
    })
}

fn note_list(obj: &Map<String, Value>, field: &str) -> Result<Vec<NoteEvent>, ValidationError> {
    let Value::Array(items) = required(obj, field)? else {
        return Err(ValidationError::malformed(format!("{} must be an array", field)));
    };
    items
        .iter()
        .map(|item| {
            let note = item.as_object().ok_or_else(|| {
                ValidationError::malformed(format!("{} entries must be objects", field))
            })?;
            note_fields(note)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn note_on(midi: Value) -> Value {
        json!({ "type": "note_on", "timestamp": 1, "source": "client", "midiNumber": midi, "velocity": 80 })
    }

    #[test]
    fn note_on_accepts_exactly_the_midi_range() {
        for n in -300i64..=300 {
            let ok = validate(&note_on(json!(n))).is_ok();
            assert_eq!(ok, (0..=127).contains(&n), "n = {}", n);
        }
    }

    #[test]
    fn out_of_range_and_fractional_codes() {
        assert_eq!(validate(&note_on(json!(200))).unwrap_err().code, ErrorCode::OutOfRange);
        assert_eq!(validate(&note_on(json!(-1))).unwrap_err().code, ErrorCode::OutOfRange);
        assert_eq!(validate(&note_on(json!(60.5))).unwrap_err().code, ErrorCode::OutOfRange);
    }

    #[test]
    fn unknown_type_code() {
        let err = validate(&json!({ "type": "pitch_bend", "timestamp": 1, "source": "client" }))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownType);
    }

    #[test]
    fn unknown_type_is_reported_before_header_fields() {
        let err = validate(&json!({ "type": "pitch_bend" })).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownType);
    }

    #[test]
    fn base_check_runs_before_variant_check() {
        // Out-of-range note, but the header is already broken.
        let err = validate(&json!({ "type": "note_on", "midiNumber": 200, "velocity": 10 }))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Malformed);

        let err = validate(&json!({
            "type": "note_on", "timestamp": 0, "source": "client", "midiNumber": 200, "velocity": 1
        }))
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::Malformed);

        let err = validate(&json!({
            "type": "note_on", "timestamp": 5, "source": "browser", "midiNumber": 200, "velocity": 1
        }))
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::Malformed);
    }

    #[test]
    fn missing_and_mistyped_fields_are_malformed() {
        let missing_velocity =
            json!({ "type": "note_off", "timestamp": 3, "source": "client", "midiNumber": 60 });
        assert_eq!(validate(&missing_velocity).unwrap_err().code, ErrorCode::Malformed);
        assert_eq!(validate(&json!([1, 2])).unwrap_err().code, ErrorCode::Malformed);
        assert_eq!(validate(&json!({ "type": 3 })).unwrap_err().code, ErrorCode::Malformed);
        assert_eq!(
            validate(&json!({ "type": "heartbeat", "timestamp": 3, "source": "client", "clientId": 9 }))
                .unwrap_err()
                .code,
            ErrorCode::Malformed
        );
    }

    #[test]
    fn chord_on_contract() {
        let ok = validate(&json!({
            "type": "chord_on", "timestamp": 9, "source": "client",
            "notes": [{ "midiNumber": 60, "velocity": 90 }, { "midiNumber": 64, "velocity": 90 }],
            "chordName": "C major"
        }))
        .unwrap();
        match ok.body {
            MessageBody::ChordOn { notes, chord_name } => {
                assert_eq!(notes.len(), 2);
                assert_eq!(chord_name.as_deref(), Some("C major"));
            }
            other => panic!("expected ChordOn, got {:?}", other),
        }

        let empty = json!({ "type": "chord_on", "timestamp": 9, "source": "client", "notes": [] });
        assert_eq!(validate(&empty).unwrap_err().code, ErrorCode::Malformed);

        let bad_note = json!({
            "type": "chord_on", "timestamp": 9, "source": "client",
            "notes": [{ "midiNumber": 60, "velocity": 128 }]
        });
        assert_eq!(validate(&bad_note).unwrap_err().code, ErrorCode::OutOfRange);
    }

    #[test]
    fn state_sync_rejects_duplicate_keys() {
        let dup = json!({
            "type": "state_sync", "timestamp": 9, "source": "server",
            "activeNotes": [{ "midiNumber": 60, "velocity": 1 }, { "midiNumber": 60, "velocity": 2 }],
            "lastUpdateTimestamp": 9, "activeClientCount": 1, "stateVersion": 4
        });
        assert_eq!(validate(&dup).unwrap_err().code, ErrorCode::Malformed);
    }

    #[test]
    fn extra_fields_are_ignored() {
        let msg = validate(&json!({
            "type": "all_notes_off", "timestamp": 77, "source": "server", "reason": "panic button"
        }))
        .unwrap();
        assert_eq!(msg.body, MessageBody::AllNotesOff);
        assert_eq!(msg.timestamp, 77);
        assert_eq!(msg.source, Source::Server);
    }
}
