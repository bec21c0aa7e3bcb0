//! Active-note bookkeeping for visualizers.

use crate::queue::MidiInput;
use crate::MidiEvent;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ActiveNote {
    pub velocity: u8,
    pub since_us: u64,
}

/// Which of the 128 notes are currently held, across all channels.
#[derive(Clone, Debug)]
pub struct NoteTracker {
    notes: [Option<ActiveNote>; 128],
    last_event_us: u64,
}

impl NoteTracker {
    pub fn new() -> Self {
        Self {
            notes: [None; 128],
            last_event_us: 0,
        }
    }

    pub fn apply(&mut self, event: &MidiEvent) {
        let Some(note) = event.note() else { return };
        let slot = &mut self.notes[(note & 0x7F) as usize];
        if event.is_note_on() {
            *slot = Some(ActiveNote {
                velocity: event.data[2],
                since_us: event.received_us,
            });
        } else if event.is_note_off() {
            *slot = None;
        }
        self.last_event_us = self.last_event_us.max(event.received_us);
    }

    /// Applies every event currently queued. Returns how many were applied.
    pub fn drain(&mut self, input: &impl MidiInput) -> usize {
        let mut applied = 0;
        while let Some(event) = input.try_next() {
            self.apply(&event);
            applied += 1;
        }
        applied
    }

    pub fn get(&self, note: u8) -> Option<ActiveNote> {
        self.notes[(note & 0x7F) as usize]
    }

    pub fn active(&self) -> impl Iterator<Item = (u8, ActiveNote)> + '_ {
        self.notes
            .iter()
            .enumerate()
            .filter_map(|(n, slot)| slot.map(|a| (n as u8, a)))
    }

    pub fn active_count(&self) -> usize {
        self.notes.iter().filter(|n| n.is_some()).count()
    }

    #[inline]
    pub fn last_event_us(&self) -> u64 {
        self.last_event_us
    }

    pub fn clear(&mut self) {
        self.notes = [None; 128];
    }
}

impl Default for NoteTracker {
    fn default() -> Self {
        Self::new()
    }
}
