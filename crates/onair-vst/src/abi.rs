//! VST 2.4 binary interface.
//!
//! Event and time records come from `vst::api`. The descriptor and the
//! function-pointer types are declared here: `vst::api::AEffect` holds
//! non-nullable `fn` pointers, so a plugin that leaves `processReplacing`
//! null could not be detected without undefined behaviour. Our `AEffect`
//! wraps every entry in `Option` and the callback takes our descriptor.
//! Opcodes and flag bits are raw `i32`s because the dispatcher is driven
//! directly rather than through `vst::host::PluginInstance`.

use std::ffi::c_void;
use std::mem::size_of;

pub use vst::api::consts::VST_MAGIC;
pub use vst::api::{
    Event as VstEvent, EventType, Events as VstEvents, MidiEvent as VstMidiEvent,
    MidiEventFlags, TimeInfo as VstTimeInfo,
};

/// Host to plugin, and plugin to host for the callback.
pub type HostCallbackProc = extern "C" fn(
    effect: *mut AEffect,
    opcode: i32,
    index: i32,
    value: isize,
    ptr: *mut c_void,
    opt: f32,
) -> isize;

pub type DispatcherProc = extern "C-unwind" fn(
    effect: *mut AEffect,
    opcode: i32,
    index: i32,
    value: isize,
    ptr: *mut c_void,
    opt: f32,
) -> isize;

pub type ProcessProc =
    extern "C-unwind" fn(effect: *mut AEffect, inputs: *mut *mut f32, outputs: *mut *mut f32, frames: i32);

pub type ProcessDoubleProc =
    extern "C-unwind" fn(effect: *mut AEffect, inputs: *mut *mut f64, outputs: *mut *mut f64, frames: i32);

pub type SetParameterProc = extern "C-unwind" fn(effect: *mut AEffect, index: i32, value: f32);

pub type GetParameterProc = extern "C-unwind" fn(effect: *mut AEffect, index: i32) -> f32;

/// Exported as `VSTPluginMain` (or `main` on older plugins).
pub type PluginMainProc = extern "C-unwind" fn(callback: HostCallbackProc) -> *mut AEffect;

/// Plugin descriptor returned by the entry point.
#[repr(C)]
pub struct AEffect {
    pub magic: i32,
    pub dispatcher: Option<DispatcherProc>,
    /// Accumulating process, deprecated since 2.4.
    pub process: Option<ProcessProc>,
    pub set_parameter: Option<SetParameterProc>,
    pub get_parameter: Option<GetParameterProc>,
    pub num_programs: i32,
    pub num_params: i32,
    pub num_inputs: i32,
    pub num_outputs: i32,
    pub flags: i32,
    pub reserved1: isize,
    pub reserved2: isize,
    pub initial_delay: i32,
    pub real_qualities: i32,
    pub off_qualities: i32,
    pub io_ratio: f32,
    pub object: *mut c_void,
    pub user: *mut c_void,
    pub unique_id: i32,
    pub version: i32,
    pub process_replacing: Option<ProcessProc>,
    pub process_double_replacing: Option<ProcessDoubleProc>,
    pub future: [u8; 56],
}

pub mod effect_flags {
    pub const HAS_EDITOR: i32 = 1;
    pub const CAN_REPLACING: i32 = 1 << 4;
    pub const PROGRAM_CHUNKS: i32 = 1 << 5;
    pub const IS_SYNTH: i32 = 1 << 8;
    pub const NO_SOUND_IN_STOP: i32 = 1 << 9;
    pub const CAN_DOUBLE_REPLACING: i32 = 1 << 12;
}

/// Host to plugin dispatcher opcodes.
pub mod effect_opcode {
    pub const OPEN: i32 = 0;
    pub const CLOSE: i32 = 1;
    pub const SET_PROGRAM: i32 = 2;
    pub const GET_PROGRAM: i32 = 3;
    pub const SET_PROGRAM_NAME: i32 = 4;
    pub const GET_PROGRAM_NAME: i32 = 5;
    pub const GET_PARAM_LABEL: i32 = 6;
    pub const GET_PARAM_DISPLAY: i32 = 7;
    pub const GET_PARAM_NAME: i32 = 8;
    pub const SET_SAMPLE_RATE: i32 = 10;
    pub const SET_BLOCK_SIZE: i32 = 11;
    pub const MAINS_CHANGED: i32 = 12;
    pub const EDIT_GET_RECT: i32 = 13;
    pub const EDIT_OPEN: i32 = 14;
    pub const EDIT_CLOSE: i32 = 15;
    pub const EDIT_IDLE: i32 = 19;
    pub const PROCESS_EVENTS: i32 = 25;
    pub const GET_EFFECT_NAME: i32 = 45;
    pub const GET_VENDOR_STRING: i32 = 47;
    pub const GET_PRODUCT_STRING: i32 = 48;
    pub const GET_VENDOR_VERSION: i32 = 49;
    pub const CAN_DO: i32 = 51;
    pub const START_PROCESS: i32 = 71;
    pub const STOP_PROCESS: i32 = 72;
    pub const SET_PROCESS_PRECISION: i32 = 77;

    pub fn name(opcode: i32) -> &'static str {
        match opcode {
            OPEN => "effOpen",
            CLOSE => "effClose",
            SET_PROGRAM => "effSetProgram",
            GET_PROGRAM => "effGetProgram",
            SET_PROGRAM_NAME => "effSetProgramName",
            GET_PROGRAM_NAME => "effGetProgramName",
            GET_PARAM_LABEL => "effGetParamLabel",
            GET_PARAM_DISPLAY => "effGetParamDisplay",
            GET_PARAM_NAME => "effGetParamName",
            SET_SAMPLE_RATE => "effSetSampleRate",
            SET_BLOCK_SIZE => "effSetBlockSize",
            MAINS_CHANGED => "effMainsChanged",
            EDIT_GET_RECT => "effEditGetRect",
            EDIT_OPEN => "effEditOpen",
            EDIT_CLOSE => "effEditClose",
            EDIT_IDLE => "effEditIdle",
            PROCESS_EVENTS => "effProcessEvents",
            GET_EFFECT_NAME => "effGetEffectName",
            GET_VENDOR_STRING => "effGetVendorString",
            GET_PRODUCT_STRING => "effGetProductString",
            GET_VENDOR_VERSION => "effGetVendorVersion",
            CAN_DO => "effCanDo",
            START_PROCESS => "effStartProcess",
            STOP_PROCESS => "effStopProcess",
            SET_PROCESS_PRECISION => "effSetProcessPrecision",
            _ => "effUnknown",
        }
    }
}

/// Plugin to host callback opcodes.
pub mod host_opcode {
    pub const AUTOMATE: i32 = 0;
    pub const VERSION: i32 = 1;
    pub const CURRENT_ID: i32 = 2;
    pub const IDLE: i32 = 3;
    pub const GET_TIME: i32 = 7;
    pub const PROCESS_EVENTS: i32 = 8;
    pub const IO_CHANGED: i32 = 13;
    pub const SIZE_WINDOW: i32 = 15;
    pub const GET_SAMPLE_RATE: i32 = 16;
    pub const GET_BLOCK_SIZE: i32 = 17;
    pub const GET_INPUT_LATENCY: i32 = 18;
    pub const GET_OUTPUT_LATENCY: i32 = 19;
    pub const GET_CURRENT_PROCESS_LEVEL: i32 = 23;
    pub const GET_AUTOMATION_STATE: i32 = 24;
    pub const GET_VENDOR_STRING: i32 = 32;
    pub const GET_PRODUCT_STRING: i32 = 33;
    pub const GET_VENDOR_VERSION: i32 = 34;
    pub const VENDOR_SPECIFIC: i32 = 35;
    pub const CAN_DO: i32 = 37;
    pub const GET_LANGUAGE: i32 = 38;
    pub const UPDATE_DISPLAY: i32 = 42;
    pub const BEGIN_EDIT: i32 = 43;
    pub const END_EDIT: i32 = 44;
}

/// Answer to `audioMasterGetCurrentProcessLevel`.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessLevel {
    Unknown = 0,
    User = 1,
    Realtime = 2,
    Prefetch = 3,
    Offline = 4,
}

impl ProcessLevel {
    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => ProcessLevel::User,
            2 => ProcessLevel::Realtime,
            3 => ProcessLevel::Prefetch,
            4 => ProcessLevel::Offline,
            _ => ProcessLevel::Unknown,
        }
    }
}

/// `value` argument of `effSetProcessPrecision`.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precision {
    #[default]
    Single = 0,
    Double = 1,
}

pub mod time_info_flags {
    pub const TRANSPORT_CHANGED: i32 = 1;
    pub const TRANSPORT_PLAYING: i32 = 1 << 1;
    pub const NANOS_VALID: i32 = 1 << 8;
    pub const PPQ_POS_VALID: i32 = 1 << 9;
    pub const TEMPO_VALID: i32 = 1 << 10;
    pub const BARS_VALID: i32 = 1 << 11;
    pub const TIME_SIG_VALID: i32 = 1 << 13;
}

/// Builds a realtime MIDI record for `effProcessEvents`.
pub fn midi_event(data: [u8; 3], delta_frames: i32) -> VstMidiEvent {
    VstMidiEvent {
        event_type: EventType::Midi,
        byte_size: size_of::<VstMidiEvent>() as i32,
        delta_frames,
        flags: MidiEventFlags::REALTIME_EVENT.bits(),
        note_length: 0,
        note_offset: 0,
        midi_data: data,
        _midi_reserved: 0,
        detune: 0,
        note_off_velocity: 0,
        _reserved1: 0,
        _reserved2: 0,
    }
}

/// Editor rectangle reported by `effEditGetRect`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ERect {
    pub top: i16,
    pub left: i16,
    pub bottom: i16,
    pub right: i16,
}

impl ERect {
    pub fn width(&self) -> u16 {
        (self.right - self.left).max(0) as u16
    }

    pub fn height(&self) -> u16 {
        (self.bottom - self.top).max(0) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{offset_of, size_of};

    #[test]
    fn test_midi_event_is_32_bytes() {
        assert_eq!(size_of::<VstMidiEvent>(), 32);
        assert_eq!(size_of::<VstEvent>(), 32);
        assert_eq!(offset_of!(VstMidiEvent, midi_data), 24);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_aeffect_layout_64() {
        assert_eq!(offset_of!(AEffect, dispatcher), 8);
        assert_eq!(offset_of!(AEffect, num_programs), 40);
        assert_eq!(offset_of!(AEffect, reserved1), 64);
        assert_eq!(offset_of!(AEffect, object), 96);
        assert_eq!(offset_of!(AEffect, unique_id), 112);
        assert_eq!(offset_of!(AEffect, process_replacing), 120);
        assert_eq!(offset_of!(AEffect, process_double_replacing), 128);
        assert_eq!(size_of::<AEffect>(), 192);
    }

    #[test]
    fn test_time_info_layout() {
        assert_eq!(offset_of!(VstTimeInfo, time_sig_numerator), 64);
        assert_eq!(offset_of!(VstTimeInfo, flags), 84);
        assert_eq!(size_of::<VstTimeInfo>(), 88);
    }

    #[test]
    fn test_realtime_midi_event() {
        let event = midi_event([0x90, 60, 100], 12);
        assert!(matches!(event.event_type, EventType::Midi));
        assert_eq!(event.byte_size, 32);
        assert_eq!(event.delta_frames, 12);
        assert_eq!(event.flags, 1);
        assert_eq!(event.midi_data, [0x90, 60, 100]);
    }

    #[test]
    fn test_magic_is_vstp() {
        assert_eq!(VST_MAGIC, 0x5673_7450);
    }

    #[test]
    fn test_erect_size() {
        let rect = ERect {
            top: 10,
            left: 20,
            bottom: 250,
            right: 340,
        };
        assert_eq!((rect.width(), rect.height()), (320, 240));
    }

    #[test]
    fn test_opcode_names() {
        assert_eq!(effect_opcode::name(effect_opcode::PROCESS_EVENTS), "effProcessEvents");
        assert_eq!(effect_opcode::name(9999), "effUnknown");
    }
}
