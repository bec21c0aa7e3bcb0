//! Unbounded MIDI queues between input sources, the plugin host and
//! downstream observers.

use crate::MidiEvent;
use crossbeam_channel::{Receiver, Sender, TryRecvError};

pub type MidiSender = Sender<MidiEvent>;
pub type MidiReceiver = Receiver<MidiEvent>;

/// Creates an unbounded event queue.
pub fn midi_channel() -> (MidiSender, MidiReceiver) {
    crossbeam_channel::unbounded()
}

/// Non-blocking "try receive" view over a MIDI queue.
pub trait MidiInput {
    fn try_next(&self) -> Option<MidiEvent>;
}

impl MidiInput for MidiReceiver {
    #[inline]
    fn try_next(&self) -> Option<MidiEvent> {
        match self.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }
}

/// Where consumed events are re-published for observers.
pub trait MidiOutput {
    fn publish(&self, event: MidiEvent);
}

impl MidiOutput for MidiSender {
    #[inline]
    fn publish(&self, event: MidiEvent) {
        // Observers may be gone; the event has already been consumed.
        let _ = self.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_next_drains_in_order() {
        let (tx, rx) = midi_channel();
        tx.send(MidiEvent::note_on(1, 0, 60, 90)).unwrap();
        tx.send(MidiEvent::note_off(2, 0, 60, 0)).unwrap();

        assert_eq!(rx.try_next().map(|e| e.received_us), Some(1));
        assert_eq!(rx.try_next().map(|e| e.received_us), Some(2));
        assert_eq!(rx.try_next(), None);
    }

    #[test]
    fn test_publish_without_observers_is_silent() {
        let (tx, rx) = midi_channel();
        drop(rx);
        tx.publish(MidiEvent::note_on(0, 0, 60, 90));
    }
}
