//! MIDI plumbing for onair: timestamped events, the queues that carry them
//! into the plugin host, and note tracking for the video renderer.

pub mod event;
pub mod queue;
pub mod tracker;

pub use event::MidiEvent;
pub use queue::{midi_channel, MidiInput, MidiOutput, MidiReceiver, MidiSender};
pub use tracker::{ActiveNote, NoteTracker};

pub use midi_msg::{Channel, ChannelVoiceMsg};
