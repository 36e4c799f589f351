//! # pianosync-types
//!
//! Message catalog and validation for the shared piano state protocol.
//! This crate has no I/O; the network layer lives in `pianosync-net`.

pub mod error;
pub mod message;
pub mod midi;
pub mod validate;

pub use error::{ErrorCode, ValidationError};
pub use message::{
    now_millis, Message, MessageBody, NoteEvent, Source, StateSync, DEFAULT_PRIORITY_THRESHOLD,
};
pub use midi::{EqualTemperament, NoteLookup, MIDI_MAX, MIDI_MIN};
pub use validate::validate;
