//! Per-block MIDI event marshalling.
//!
//! Pending events are drained from the input queue once per block and
//! written into a preallocated `VstEvents` list. An event stamped after the
//! current block time is held over to the next block; only one such event
//! can be held, so a second future event seen in the same drain is dropped.

use crate::abi::{midi_event, VstEvent, VstEvents, VstMidiEvent};
use onair_midi::{MidiEvent, MidiInput, MidiOutput};
use std::mem::{offset_of, size_of};
use tracing::warn;

/// Upper bound on events dispatched in one block.
pub const MAX_EVENTS_PER_BLOCK: usize = 500;

/// Samples between `previous_us` and `event_us`, truncated, never negative.
#[inline]
pub fn delta_frames(event_us: u64, previous_us: u64, sample_rate: f64) -> i32 {
    if event_us <= previous_us {
        return 0;
    }
    ((event_us - previous_us) as f64 * sample_rate / 1_000_000.0) as i32
}

/// A `VstEvents` header with a fixed-capacity pointer array into owned
/// event records. Nothing here reallocates after construction.
pub struct EventList {
    records: Box<[VstMidiEvent]>,
    // u64 storage keeps the header 8-byte aligned.
    header: Box<[u64]>,
    len: usize,
}

impl EventList {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut records: Box<[VstMidiEvent]> =
            (0..capacity).map(|_| midi_event([0; 3], 0)).collect();

        let events_offset = offset_of!(VstEvents, events);
        let needed = events_offset + capacity * size_of::<*mut VstEvent>();
        let bytes = needed.max(size_of::<VstEvents>());
        let mut header = vec![0u64; bytes.div_ceil(8)].into_boxed_slice();

        // SAFETY: header is large enough and aligned for VstEvents followed
        // by `capacity` pointers; records never move.
        unsafe {
            let base = header.as_mut_ptr() as *mut u8;
            let slots = base.add(events_offset) as *mut *mut VstEvent;
            for (i, record) in records.iter_mut().enumerate() {
                *slots.add(i) = record as *mut VstMidiEvent as *mut VstEvent;
            }
        }

        Self {
            records,
            header,
            len: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Returns `false` when the list is full.
    pub fn push(&mut self, event: VstMidiEvent) -> bool {
        if self.len == self.records.len() {
            return false;
        }
        self.records[self.len] = event;
        self.len += 1;
        true
    }

    pub fn as_slice(&self) -> &[VstMidiEvent] {
        &self.records[..self.len]
    }

    /// Header pointer for `effProcessEvents`, with `num_events` set.
    pub fn as_vst_events(&mut self) -> *mut VstEvents {
        let events = self.header.as_mut_ptr() as *mut VstEvents;
        // SAFETY: header was sized for a VstEvents at offset 0.
        unsafe {
            (*events).num_events = self.len as i32;
            (*events)._reserved = 0;
        }
        events
    }
}

/// Decides which queued events go into each block.
pub struct EventScheduler {
    list: EventList,
    held: Option<MidiEvent>,
    dropped_future: u64,
    dropped_overflow: u64,
}

impl EventScheduler {
    pub fn new() -> Self {
        Self::with_capacity(MAX_EVENTS_PER_BLOCK)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            list: EventList::with_capacity(capacity),
            held: None,
            dropped_future: 0,
            dropped_overflow: 0,
        }
    }

    /// The event carried over to the next block, if any.
    #[inline]
    pub fn held(&self) -> Option<&MidiEvent> {
        self.held.as_ref()
    }

    /// Future events dropped because the hold-over slot was taken.
    #[inline]
    pub fn dropped_future(&self) -> u64 {
        self.dropped_future
    }

    /// Events dropped because the block's list was full.
    #[inline]
    pub fn dropped_overflow(&self) -> u64 {
        self.dropped_overflow
    }

    /// Builds the list for the block starting at `now_us`.
    ///
    /// The held-over event from the previous block goes first, then every
    /// queued event stamped at or before `now_us`. Consumed events are
    /// re-published to `output`. Delta frames are measured from
    /// `previous_us` with [`delta_frames`] and are not bounded by the block
    /// length: an event stamped long after the previous block keeps its
    /// full offset.
    pub fn collect(
        &mut self,
        now_us: u64,
        previous_us: u64,
        sample_rate: f64,
        input: &impl MidiInput,
        output: Option<&dyn MidiOutput>,
    ) -> &mut EventList {
        self.list.clear();

        let place = |list: &mut EventList, event: MidiEvent, dropped: &mut u64| {
            let delta = delta_frames(event.received_us, previous_us, sample_rate);
            if list.push(midi_event(event.data, delta)) {
                if let Some(out) = output {
                    out.publish(event);
                }
            } else {
                *dropped += 1;
                warn!(capacity = list.capacity(), "MIDI event list full, dropping event");
            }
        };

        if let Some(event) = self.held.take() {
            place(&mut self.list, event, &mut self.dropped_overflow);
        }

        while let Some(event) = input.try_next() {
            if event.received_us > now_us {
                if self.held.is_none() {
                    self.held = Some(event);
                } else {
                    self.dropped_future += 1;
                    warn!(
                        received_us = event.received_us,
                        now_us, "Second future MIDI event in one block, dropping"
                    );
                }
                continue;
            }
            place(&mut self.list, event, &mut self.dropped_overflow);
        }

        &mut self.list
    }
}

impl Default for EventScheduler {
    fn default() -> Self {
        Self::new()
    }
}
