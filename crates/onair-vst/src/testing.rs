//! An in-process mock instrument implementing the plugin side of the ABI.
//!
//! Lets host tests run without native plugin binaries. Every dispatcher
//! call is recorded in a shared [`MockProbe`] so tests can assert the exact
//! call sequence.

use crate::abi::{
    effect_flags, effect_opcode, host_opcode, AEffect, ERect, HostCallbackProc, ProcessDoubleProc,
    ProcessProc, VstEvent, VstEvents, VstMidiEvent, VstTimeInfo, VST_MAGIC,
};
use crate::error::Result;
use crate::module::PluginModule;
use parking_lot::Mutex;
use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct MockConfig {
    pub is_synth: bool,
    pub has_process: bool,
    pub has_process_double: bool,
    pub has_editor: bool,
    pub num_params: i32,
    pub num_outputs: i32,
    /// Panic inside processReplacing.
    pub fault_in_process: bool,
    /// Entry point returns null.
    pub refuse_instantiation: bool,
    /// Write this instead of the real magic.
    pub magic: i32,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            is_synth: true,
            has_process: true,
            has_process_double: true,
            has_editor: true,
            num_params: 4,
            num_outputs: 2,
            fault_in_process: false,
            refuse_instantiation: false,
            magic: VST_MAGIC,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispatchCall {
    pub opcode: i32,
    pub index: i32,
    pub value: isize,
    pub opt: f32,
}

/// One MIDI record as the mock received it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivedEvent {
    pub midi_data: [u8; 3],
    pub delta_frames: i32,
}

/// What the mock observed.
#[derive(Default)]
pub struct MockProbe {
    pub calls: Mutex<Vec<DispatchCall>>,
    /// One entry per effProcessEvents call.
    pub event_batches: Mutex<Vec<Vec<ReceivedEvent>>>,
    pub process_calls: AtomicUsize,
    /// Host answers seen while the entry point ran.
    pub host_version_at_entry: AtomicIsize,
    pub sample_rate_at_entry: AtomicIsize,
    /// Host answers seen during effOpen.
    pub block_size_at_open: AtomicIsize,
    pub last_time_nanos: Mutex<Option<f64>>,
    pub closed: AtomicBool,
}

impl MockProbe {
    pub fn opcodes(&self) -> Vec<i32> {
        self.calls.lock().iter().map(|c| c.opcode).collect()
    }

    pub fn calls_with(&self, opcode: i32) -> Vec<DispatchCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.opcode == opcode)
            .copied()
            .collect()
    }
}

pub struct MockModule {
    config: MockConfig,
    probe: Arc<MockProbe>,
}

impl MockModule {
    pub fn new(config: MockConfig) -> Self {
        Self {
            config,
            probe: Arc::new(MockProbe::default()),
        }
    }

    pub fn probe(&self) -> Arc<MockProbe> {
        self.probe.clone()
    }
}

impl Default for MockModule {
    fn default() -> Self {
        Self::new(MockConfig::default())
    }
}

impl PluginModule for MockModule {
    fn label(&self) -> &str {
        "mock-synth"
    }

    fn instantiate(&self, callback: HostCallbackProc) -> Result<*mut AEffect> {
        let null: *mut AEffect = std::ptr::null_mut();
        let null_ptr: *mut c_void = std::ptr::null_mut();
        let version = callback(null, host_opcode::VERSION, 0, 0, null_ptr, 0.0);
        let rate = callback(null, host_opcode::GET_SAMPLE_RATE, 0, 0, null_ptr, 0.0);
        self.probe.host_version_at_entry.store(version, Ordering::Relaxed);
        self.probe.sample_rate_at_entry.store(rate, Ordering::Relaxed);

        if self.config.refuse_instantiation {
            return Ok(null as *mut AEffect);
        }
        Ok(MockInstance::create(self.config.clone(), self.probe.clone(), callback))
    }
}

#[repr(C)]
struct MockInstance {
    // Must stay first: the host's *mut AEffect is a *mut MockInstance.
    effect: AEffect,
    config: MockConfig,
    probe: Arc<MockProbe>,
    host: HostCallbackProc,
    block_size: usize,
    note: Option<u8>,
    params: Vec<f32>,
    rect: ERect,
}

impl MockInstance {
    fn create(config: MockConfig, probe: Arc<MockProbe>, host: HostCallbackProc) -> *mut AEffect {
        let mut flags = effect_flags::CAN_REPLACING;
        if config.is_synth {
            flags |= effect_flags::IS_SYNTH;
        }
        if config.has_editor {
            flags |= effect_flags::HAS_EDITOR;
        }
        if config.has_process_double {
            flags |= effect_flags::CAN_DOUBLE_REPLACING;
        }

        let effect = AEffect {
            magic: config.magic,
            dispatcher: Some(mock_dispatcher),
            process: None,
            set_parameter: Some(mock_set_parameter),
            get_parameter: Some(mock_get_parameter),
            num_programs: 1,
            num_params: config.num_params,
            num_inputs: 0,
            num_outputs: config.num_outputs,
            flags,
            reserved1: 0,
            reserved2: 0,
            initial_delay: 0,
            real_qualities: 0,
            off_qualities: 0,
            io_ratio: 1.0,
            object: std::ptr::null_mut(),
            user: std::ptr::null_mut(),
            unique_id: i32::from_be_bytes(*b"OnAr"),
            version: 1,
            process_replacing: config.has_process.then_some(mock_process as ProcessProc),
            process_double_replacing: config.has_process_double.then_some(mock_process_double as ProcessDoubleProc),
            future: [0; 56],
        };

        let params = vec![0.5; config.num_params.max(0) as usize];
        let instance = Box::new(MockInstance {
            effect,
            config,
            probe,
            host,
            block_size: 0,
            note: None,
            params,
            rect: ERect {
                top: 0,
                left: 0,
                bottom: 240,
                right: 320,
            },
        });
        let raw = Box::into_raw(instance);
        // SAFETY: freshly allocated.
        unsafe { (*raw).effect.object = raw as *mut c_void };
        raw as *mut AEffect
    }

    /// # Safety
    /// `effect` must come from [`MockInstance::create`] and not be closed.
    unsafe fn from_effect<'a>(effect: *mut AEffect) -> &'a mut MockInstance {
        &mut *(effect as *mut MockInstance)
    }

    fn level(&self) -> f32 {
        self.note.map_or(0.0, |n| n as f32 / 128.0)
    }

    fn query_time(&self, effect: *mut AEffect) {
        let info = (self.host)(effect, host_opcode::GET_TIME, 0, 0, std::ptr::null_mut(), 0.0)
            as *const VstTimeInfo;
        if !info.is_null() {
            // SAFETY: the host keeps the time record alive for the instance.
            *self.probe.last_time_nanos.lock() = Some(unsafe { (*info).nanoseconds });
        }
    }
}

fn write_str(ptr: *mut c_void, text: &str) {
    if ptr.is_null() {
        return;
    }
    let bytes = text.as_bytes();
    // SAFETY: hosts pass buffers of at least kVstMaxEffectNameLen (32) bytes.
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr as *mut u8, bytes.len().min(31));
        *(ptr as *mut u8).add(bytes.len().min(31)) = 0;
    }
}

extern "C-unwind" fn mock_dispatcher(
    effect: *mut AEffect,
    opcode: i32,
    index: i32,
    value: isize,
    ptr: *mut c_void,
    opt: f32,
) -> isize {
    // SAFETY: the host only calls us with our own descriptor.
    let this = unsafe { MockInstance::from_effect(effect) };
    this.probe.calls.lock().push(DispatchCall {
        opcode,
        index,
        value,
        opt,
    });

    match opcode {
        effect_opcode::OPEN => {
            let null = std::ptr::null_mut();
            let size = (this.host)(effect, host_opcode::GET_BLOCK_SIZE, 0, 0, null, 0.0);
            this.probe.block_size_at_open.store(size, Ordering::Relaxed);
            0
        }
        effect_opcode::SET_BLOCK_SIZE => {
            this.block_size = value.max(0) as usize;
            0
        }
        effect_opcode::PROCESS_EVENTS => {
            let events = ptr as *const VstEvents;
            let mut batch = Vec::new();
            // SAFETY: the host passes a VstEvents with num_events valid pointers.
            unsafe {
                let slots = std::ptr::addr_of!((*events).events) as *const *mut VstEvent;
                for i in 0..(*events).num_events as usize {
                    let midi = &*(*slots.add(i) as *const VstMidiEvent);
                    let data = midi.midi_data;
                    match data[0] & 0xF0 {
                        0x90 if data[2] > 0 => this.note = Some(data[1]),
                        0x80 | 0x90 => this.note = None,
                        _ => {}
                    }
                    batch.push(ReceivedEvent {
                        midi_data: data,
                        delta_frames: midi.delta_frames,
                    });
                }
            }
            this.probe.event_batches.lock().push(batch);
            1
        }
        effect_opcode::GET_PARAM_NAME => {
            write_str(ptr, &format!("Param {index}"));
            0
        }
        effect_opcode::GET_PARAM_LABEL => {
            write_str(ptr, "%");
            0
        }
        effect_opcode::GET_PARAM_DISPLAY => {
            let v = this.params.get(index as usize).copied().unwrap_or(0.0);
            write_str(ptr, &format!("{:.0}", v * 100.0));
            0
        }
        effect_opcode::GET_EFFECT_NAME => {
            write_str(ptr, "Mock Synth");
            1
        }
        effect_opcode::GET_VENDOR_STRING => {
            write_str(ptr, "onair");
            1
        }
        effect_opcode::GET_PRODUCT_STRING => {
            write_str(ptr, "Mock");
            1
        }
        effect_opcode::GET_VENDOR_VERSION => 1000,
        effect_opcode::EDIT_GET_RECT => {
            if !ptr.is_null() {
                // SAFETY: ptr is an ERect** per the ABI.
                unsafe { *(ptr as *mut *mut ERect) = &mut this.rect };
            }
            1
        }
        effect_opcode::EDIT_OPEN => 1,
        effect_opcode::CLOSE => {
            this.probe.closed.store(true, Ordering::Release);
            // SAFETY: a closed plugin frees itself; the host must not touch it again.
            drop(unsafe { Box::from_raw(effect as *mut MockInstance) });
            1
        }
        _ => 0,
    }
}

extern "C-unwind" fn mock_process(effect: *mut AEffect, _inputs: *mut *mut f32, outputs: *mut *mut f32, frames: i32) {
    // SAFETY: called by the host with our descriptor.
    let this = unsafe { MockInstance::from_effect(effect) };
    if this.config.fault_in_process {
        panic!("mock plugin fault");
    }
    this.probe.process_calls.fetch_add(1, Ordering::Relaxed);
    this.query_time(effect);
    let level = this.level();
    for ch in 0..this.effect.num_outputs as usize {
        // SAFETY: the host supplies num_outputs channels of `frames` samples.
        let out = unsafe { std::slice::from_raw_parts_mut(*outputs.add(ch), frames as usize) };
        out.fill(if ch == 0 { level } else { -level });
    }
}

extern "C-unwind" fn mock_process_double(effect: *mut AEffect, _inputs: *mut *mut f64, outputs: *mut *mut f64, frames: i32) {
    // SAFETY: called by the host with our descriptor.
    let this = unsafe { MockInstance::from_effect(effect) };
    if this.config.fault_in_process {
        panic!("mock plugin fault");
    }
    this.probe.process_calls.fetch_add(1, Ordering::Relaxed);
    let level = this.level() as f64;
    for ch in 0..this.effect.num_outputs as usize {
        // SAFETY: as above.
        let out = unsafe { std::slice::from_raw_parts_mut(*outputs.add(ch), frames as usize) };
        out.fill(if ch == 0 { level } else { -level });
    }
}

extern "C-unwind" fn mock_set_parameter(effect: *mut AEffect, index: i32, value: f32) {
    // SAFETY: called by the host with our descriptor.
    let this = unsafe { MockInstance::from_effect(effect) };
    if let Some(slot) = this.params.get_mut(index as usize) {
        *slot = value;
    }
}

extern "C-unwind" fn mock_get_parameter(effect: *mut AEffect, index: i32) -> f32 {
    // SAFETY: called by the host with our descriptor.
    let this = unsafe { MockInstance::from_effect(effect) };
    this.params.get(index as usize).copied().unwrap_or(0.0)
}
