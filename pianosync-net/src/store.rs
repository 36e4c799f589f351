//! The authoritative set of sounding notes.
//!
//! Owned by the dispatcher and mutated only through [`ActiveNoteStore::apply`].
//! Every mutation, including no-op ones, bumps `state_version` by exactly one.

use std::collections::BTreeMap;

use pianosync_types::{Message, MessageBody, NoteEvent, StateSync};

#[derive(Debug, Clone)]
pub struct ActiveNoteStore {
    /// midi number -> velocity
    notes: BTreeMap<u8, u8>,
    version: u64,
    last_update: u64,
}

impl ActiveNoteStore {
    /// Empty store. `created_at` is reported as the last update until the
    /// first mutation.
    pub fn new(created_at: u64) -> Self {
        Self {
            notes: BTreeMap::new(),
            version: 0,
            last_update: created_at,
        }
    }

    /// Apply a validated message. Mutations return the resulting snapshot;
    /// `Heartbeat` and `StateSync` pass through untouched.
    pub fn apply(&mut self, msg: &Message, now: u64, active_clients: u32) -> Option<StateSync> {
        match &msg.body {
            MessageBody::NoteOn {
                midi_number,
                velocity,
            } => {
                self.notes.insert(*midi_number, *velocity);
            }
            MessageBody::NoteOff { midi_number, .. } => {
                self.notes.remove(midi_number);
            }
            MessageBody::ChordOn { notes, .. } => {
                for note in notes {
                    self.notes.insert(note.midi_number, note.velocity);
                }
            }
            MessageBody::AllNotesOff => self.notes.clear(),
            MessageBody::StateSync(_) | MessageBody::Heartbeat { .. } => return None,
        }

        self.version += 1;
        self.last_update = now;
        Some(self.snapshot(active_clients))
    }

    /// Current state without mutating.
    pub fn snapshot(&self, active_clients: u32) -> StateSync {
        StateSync {
            active_notes: self
                .notes
                .iter()
                .map(|(&midi_number, &velocity)| NoteEvent {
                    midi_number,
                    velocity,
                })
                .collect(),
            last_update_timestamp: self.last_update,
            active_client_count: active_clients,
            state_version: self.version,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn velocity(&self, midi_number: u8) -> Option<u8> {
        self.notes.get(&midi_number).copied()
    }

    pub fn active_notes(&self) -> &BTreeMap<u8, u8> {
        &self.notes
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}
