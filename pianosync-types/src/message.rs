//! The message catalog: every frame a client or the server may emit.
//!
//! Values of [`Message`] are only ever produced by the constructors below or by
//! [`crate::validate`], so a `Message` in hand always satisfies its variant's
//! field contract. Deliberately no `Deserialize` impl: inbound JSON must go
//! through validation.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, ValidationError};
use crate::midi::MIDI_MAX;

/// Priority at or above which a message skips outbound batching by default.
pub const DEFAULT_PRIORITY_THRESHOLD: u8 = 8;

/// Milliseconds since the Unix epoch, never zero.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
        .max(1)
}

/// Which side of the connection produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Server,
    Client,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Server => "server",
            Source::Client => "client",
        }
    }
}

/// A `{midiNumber, velocity}` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteEvent {
    pub midi_number: u8,
    pub velocity: u8,
}

impl NoteEvent {
    pub fn new(midi_number: u8, velocity: u8) -> Result<Self, ValidationError> {
        check_seven_bit("midiNumber", midi_number)?;
        check_seven_bit("velocity", velocity)?;
        Ok(Self {
            midi_number,
            velocity,
        })
    }
}

/// Full snapshot of the active note set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSync {
    /// Sounding notes in ascending `midi_number` order.
    pub active_notes: Vec<NoteEvent>,
    pub last_update_timestamp: u64,
    pub active_client_count: u32,
    pub state_version: u64,
}

/// Variant-specific payload, discriminated on the wire by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(
    tag = "type",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum MessageBody {
    NoteOn {
        midi_number: u8,
        velocity: u8,
    },
    NoteOff {
        midi_number: u8,
        velocity: u8,
    },
    ChordOn {
        notes: Vec<NoteEvent>,
        #[serde(skip_serializing_if = "Option::is_none")]
        chord_name: Option<String>,
    },
    AllNotesOff,
    StateSync(StateSync),
    Heartbeat {
        #[serde(skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },
}

impl MessageBody {
    /// The wire `type` tag for this variant.
    pub fn type_tag(&self) -> &'static str {
        match self {
            MessageBody::NoteOn { .. } => "note_on",
            MessageBody::NoteOff { .. } => "note_off",
            MessageBody::ChordOn { .. } => "chord_on",
            MessageBody::AllNotesOff => "all_notes_off",
            MessageBody::StateSync(_) => "state_sync",
            MessageBody::Heartbeat { .. } => "heartbeat",
        }
    }
}

/// A catalog message: common header plus variant payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub timestamp: u64,
    pub source: Source,
    #[serde(flatten)]
    pub body: MessageBody,
}

impl Message {
    fn stamped(source: Source, body: MessageBody) -> Self {
        Self {
            timestamp: now_millis(),
            source,
            body,
        }
    }

    pub fn note_on(source: Source, midi_number: u8, velocity: u8) -> Result<Self, ValidationError> {
        let note = NoteEvent::new(midi_number, velocity)?;
        Ok(Self::stamped(
            source,
            MessageBody::NoteOn {
                midi_number: note.midi_number,
                velocity: note.velocity,
            },
        ))
    }

    pub fn note_off(source: Source, midi_number: u8, velocity: u8) -> Result<Self, ValidationError> {
        let note = NoteEvent::new(midi_number, velocity)?;
        Ok(Self::stamped(
            source,
            MessageBody::NoteOff {
                midi_number: note.midi_number,
                velocity: note.velocity,
            },
        ))
    }

    pub fn chord_on(
        source: Source,
        notes: Vec<NoteEvent>,
        chord_name: Option<String>,
    ) -> Result<Self, ValidationError> {
        if notes.is_empty() {
            return Err(ValidationError::malformed("chord_on requires at least one note"));
        }
        for note in &notes {
            check_seven_bit("midiNumber", note.midi_number)?;
            check_seven_bit("velocity", note.velocity)?;
        }
        Ok(Self::stamped(source, MessageBody::ChordOn { notes, chord_name }))
    }

    pub fn all_notes_off(source: Source) -> Self {
        Self::stamped(source, MessageBody::AllNotesOff)
    }

    pub fn state_sync(sync: StateSync) -> Self {
        Self::stamped(Source::Server, MessageBody::StateSync(sync))
    }

    pub fn heartbeat(source: Source, client_id: Option<String>) -> Self {
        Self::stamped(source, MessageBody::Heartbeat { client_id })
    }

    /// Replace the timestamp. Zero is rejected to keep the header contract.
    pub fn with_timestamp(mut self, timestamp: u64) -> Result<Self, ValidationError> {
        if timestamp == 0 {
            return Err(ValidationError::malformed("timestamp must be a positive integer"));
        }
        self.timestamp = timestamp;
        Ok(self)
    }

    pub fn type_tag(&self) -> &'static str {
        self.body.type_tag()
    }

    /// Batching priority. Messages at or above the configured threshold are
    /// sent immediately.
    pub fn priority(&self) -> u8 {
        match self.body {
            MessageBody::AllNotesOff => 10,
            MessageBody::NoteOn { .. } | MessageBody::NoteOff { .. } | MessageBody::ChordOn { .. } => 6,
            MessageBody::StateSync(_) => 5,
            MessageBody::Heartbeat { .. } => 1,
        }
    }

    /// Whether applying this message changes the active note set.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self.body,
            MessageBody::NoteOn { .. }
                | MessageBody::NoteOff { .. }
                | MessageBody::ChordOn { .. }
                | MessageBody::AllNotesOff
        )
    }
}

fn check_seven_bit(field: &str, value: u8) -> Result<(), ValidationError> {
    if value > MIDI_MAX {
        return Err(ValidationError::new(
            ErrorCode::OutOfRange,
            format!("{} must be in 0..={}, got {}", field, MIDI_MAX, value),
        ));
    }
    Ok(())
}
