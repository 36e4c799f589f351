//! MIDI number and velocity ranges, and the note lookup interface.
//!
//! The protocol only ever carries raw `midiNumber`/`velocity` integers.
//! Conversions to names and frequencies belong to whoever implements
//! [`NoteLookup`]; nothing in the sync path depends on them.

use serde_json::Value;

use crate::error::{ErrorCode, ValidationError};

/// Lowest valid MIDI note number or velocity.
pub const MIDI_MIN: u8 = 0;
/// Highest valid MIDI note number or velocity.
pub const MIDI_MAX: u8 = 127;

/// Lowest key on an 88-key piano (A0).
pub const PIANO_LOWEST: u8 = 21;
/// Highest key on an 88-key piano (C8).
pub const PIANO_HIGHEST: u8 = 108;

/// Whether `n` is a valid MIDI note number.
pub fn is_valid_midi_number(n: i64) -> bool {
    (MIDI_MIN as i64..=MIDI_MAX as i64).contains(&n)
}

/// Validate a JSON value as a MIDI note number.
pub fn validate_midi_number(field: &str, value: &Value) -> Result<u8, ValidationError> {
    seven_bit(field, value)
}

/// Validate a JSON value as a note velocity.
pub fn validate_velocity(field: &str, value: &Value) -> Result<u8, ValidationError> {
    seven_bit(field, value)
}

/// Shared 0..=127 integral check. Non-numbers are malformed; numbers that are
/// negative, too large, or fractional are out of range.
fn seven_bit(field: &str, value: &Value) -> Result<u8, ValidationError> {
    let Value::Number(n) = value else {
        return Err(ValidationError::new(
            ErrorCode::Malformed,
            format!("{} must be a number", field),
        ));
    };

    let integral = if let Some(i) = n.as_i64() {
        Some(i)
    } else if n.as_u64().is_some() {
        // Larger than i64::MAX
        None
    } else {
        n.as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < 1e15)
            .map(|f| f as i64)
    };

    match integral {
        Some(i) if (MIDI_MIN as i64..=MIDI_MAX as i64).contains(&i) => Ok(i as u8),
        _ => Err(ValidationError::new(
            ErrorCode::OutOfRange,
            format!("{} must be an integer in {}..={}, got {}", field, MIDI_MIN, MIDI_MAX, n),
        )),
    }
}

/// Lookup capability provided by a collaborator outside the sync core.
pub trait NoteLookup {
    fn midi_number_to_note_name(&self, midi_number: u8) -> String;
    fn note_name_to_midi_number(&self, name: &str) -> Option<u8>;
    fn midi_number_to_frequency(&self, midi_number: u8) -> f64;
}

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// 12-TET lookup with scientific pitch names (MIDI 60 = C4).
#[derive(Debug, Clone, Copy)]
pub struct EqualTemperament {
    /// Reference frequency for A4 (MIDI 69).
    pub tuning_a4: f64,
}

impl Default for EqualTemperament {
    fn default() -> Self {
        Self { tuning_a4: 440.0 }
    }
}

impl NoteLookup for EqualTemperament {
    fn midi_number_to_note_name(&self, midi_number: u8) -> String {
        let octave = midi_number as i32 / 12 - 1;
        format!("{}{}", NOTE_NAMES[(midi_number % 12) as usize], octave)
    }

    fn note_name_to_midi_number(&self, name: &str) -> Option<u8> {
        let name = name.trim();
        let mut chars = name.chars();
        let letter = chars.next()?.to_ascii_uppercase();
        let base: i32 = match letter {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return None,
        };
        let rest = &name[letter.len_utf8()..];
        let (accidental, octave) = match rest.chars().next() {
            Some('#') => (1, &rest[1..]),
            Some('b') => (-1, &rest[1..]),
            _ => (0, rest),
        };
        let octave: i32 = octave.parse().ok()?;
        let midi = (octave + 1) * 12 + base + accidental;
        u8::try_from(midi).ok().filter(|m| *m <= MIDI_MAX)
    }

    fn midi_number_to_frequency(&self, midi_number: u8) -> f64 {
        self.tuning_a4 * 2.0_f64.powf((midi_number as f64 - 69.0) / 12.0)
    }
}
