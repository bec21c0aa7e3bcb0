//! Timestamped MIDI events as they arrive from an input source.

use midi_msg::{Channel, ChannelVoiceMsg, MidiMsg};

const NOTE_OFF: u8 = 0x80;
const NOTE_ON: u8 = 0x90;
const CONTROL_CHANGE: u8 = 0xB0;
const PITCH_BEND: u8 = 0xE0;

/// Raw channel-voice bytes plus the clock time (µs) the event was received.
///
/// Bytes are kept unparsed so the plugin host can copy them straight into
/// native event records.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MidiEvent {
    pub data: [u8; 3],
    /// Valid bytes in `data` (1-3).
    pub len: u8,
    pub received_us: u64,
}

impl MidiEvent {
    #[inline]
    pub fn new(data: [u8; 3], len: u8, received_us: u64) -> Self {
        Self {
            data,
            len: len.clamp(1, 3),
            received_us,
        }
    }

    #[inline]
    pub fn note_on(received_us: u64, channel: u8, note: u8, velocity: u8) -> Self {
        Self::new(
            [NOTE_ON | (channel & 0x0F), note & 0x7F, velocity & 0x7F],
            3,
            received_us,
        )
    }

    #[inline]
    pub fn note_off(received_us: u64, channel: u8, note: u8, velocity: u8) -> Self {
        Self::new(
            [NOTE_OFF | (channel & 0x0F), note & 0x7F, velocity & 0x7F],
            3,
            received_us,
        )
    }

    #[inline]
    pub fn control_change(received_us: u64, channel: u8, cc: u8, value: u8) -> Self {
        Self::new(
            [CONTROL_CHANGE | (channel & 0x0F), cc & 0x7F, value & 0x7F],
            3,
            received_us,
        )
    }

    #[inline]
    pub fn pitch_bend(received_us: u64, channel: u8, bend: u16) -> Self {
        let bend = bend.min(16383);
        Self::new(
            [
                PITCH_BEND | (channel & 0x0F),
                (bend & 0x7F) as u8,
                ((bend >> 7) & 0x7F) as u8,
            ],
            3,
            received_us,
        )
    }

    /// Parses and validates a channel-voice message.
    pub fn from_bytes(bytes: &[u8], received_us: u64) -> Result<Self, midi_msg::ParseError> {
        let (msg, len) = MidiMsg::from_midi(bytes)?;
        if !matches!(msg, MidiMsg::ChannelVoice { .. }) {
            return Err(midi_msg::ParseError::Invalid(
                "Expected ChannelVoice message",
            ));
        }
        let len = len.min(3);
        let mut data = [0u8; 3];
        data[..len].copy_from_slice(&bytes[..len]);
        Ok(Self::new(data, len as u8, received_us))
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    #[inline]
    pub fn status(&self) -> u8 {
        self.data[0] & 0xF0
    }

    #[inline]
    pub fn channel_num(&self) -> u8 {
        self.data[0] & 0x0F
    }

    #[inline]
    pub fn is_note_on(&self) -> bool {
        self.status() == NOTE_ON && self.data[2] > 0
    }

    #[inline]
    pub fn is_note_off(&self) -> bool {
        self.status() == NOTE_OFF || (self.status() == NOTE_ON && self.data[2] == 0)
    }

    #[inline]
    pub fn note(&self) -> Option<u8> {
        match self.status() {
            NOTE_ON | NOTE_OFF | 0xA0 => Some(self.data[1]),
            _ => None,
        }
    }

    #[inline]
    pub fn velocity(&self) -> Option<u8> {
        match self.status() {
            NOTE_ON | NOTE_OFF => Some(self.data[2]),
            _ => None,
        }
    }

    /// Structured view of the message.
    pub fn message(&self) -> Option<(Channel, ChannelVoiceMsg)> {
        match MidiMsg::from_midi(self.bytes()) {
            Ok((MidiMsg::ChannelVoice { channel, msg }, _)) => Some((channel, msg)),
            _ => None,
        }
    }

    /// Same bytes, new receive time.
    #[inline]
    pub fn at(mut self, received_us: u64) -> Self {
        self.received_us = received_us;
        self
    }
}
