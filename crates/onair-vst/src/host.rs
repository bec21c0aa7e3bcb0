//! The host side of the plugin callback ABI.
//!
//! Every plugin gets the same `extern "C"` callback. It finds the calling
//! instance in a process-wide registry keyed by the `AEffect` pointer, so
//! several plugins (and several hosts) can share one process. While an
//! entry point is running the instance pointer is not known yet; calls made
//! then are answered from the host that is currently loading.

use crate::abi::{
    host_opcode, time_info_flags, AEffect, HostCallbackProc, ProcessLevel, VstTimeInfo,
};
use crate::effect::{Effect, EffectOptions};
use crate::error::Result;
use crate::module::{LibraryModule, PluginModule};
use dashmap::DashMap;
use onair_core::MonotonicClock;
use parking_lot::{Mutex, MutexGuard};
use std::cell::{RefCell, UnsafeCell};
use std::ffi::{c_void, CStr};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, trace, warn};

/// `audioMasterVersion` answer: VST 2.4.
pub const HOST_VERSION: isize = 2400;
pub const HOST_VENDOR: &str = "onair";
pub const HOST_PRODUCT: &str = "onair engine";
pub const HOST_VENDOR_VERSION: isize = 1;

/// Capabilities answered positively to `audioMasterCanDo`.
const HOST_CAN_DO: &[&str] = &["sendVstEvents", "sendVstMidiEvent", "sendVstTimeInfo"];

/// Transport and format state shared by every plugin of one host.
pub struct HostTimeBlock {
    clock: MonotonicClock,
    sample_rate: f64,
    block_size: usize,
    process_level: AtomicI32,
    tempo_bits: AtomicU64,
    time_signature: AtomicU64,
}

impl HostTimeBlock {
    pub fn new(clock: MonotonicClock, sample_rate: f64, block_size: usize) -> Self {
        Self {
            clock,
            sample_rate,
            block_size,
            process_level: AtomicI32::new(ProcessLevel::Realtime as i32),
            tempo_bits: AtomicU64::new(240.0f64.to_bits()),
            time_signature: AtomicU64::new((4 << 32) | 4),
        }
    }

    #[inline]
    pub fn clock(&self) -> MonotonicClock {
        self.clock
    }

    #[inline]
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn process_level(&self) -> ProcessLevel {
        ProcessLevel::from_i32(self.process_level.load(Ordering::Acquire))
    }

    pub fn set_process_level(&self, level: ProcessLevel) {
        self.process_level.store(level as i32, Ordering::Release);
    }

    pub fn tempo(&self) -> f64 {
        f64::from_bits(self.tempo_bits.load(Ordering::Acquire))
    }

    pub fn set_tempo(&self, bpm: f64) {
        self.tempo_bits.store(bpm.to_bits(), Ordering::Release);
    }

    pub fn time_signature(&self) -> (i32, i32) {
        let packed = self.time_signature.load(Ordering::Acquire);
        ((packed >> 32) as i32, (packed & 0xFFFF_FFFF) as i32)
    }

    pub fn set_time_signature(&self, numerator: u32, denominator: u32) {
        self.time_signature
            .store(((numerator as u64) << 32) | denominator as u64, Ordering::Release);
    }

    /// SMPTE fields keep their defaults (24 fps, no offset).
    fn fill(&self, info: &mut VstTimeInfo, sample_pos: u64) {
        let (numerator, denominator) = self.time_signature();
        let tempo = self.tempo();
        info.sample_pos = sample_pos as f64;
        info.sample_rate = self.sample_rate;
        info.nanoseconds = self.clock.now_ns() as f64;
        info.ppq_pos = sample_pos as f64 / self.sample_rate * tempo / 60.0;
        info.tempo = tempo;
        info.time_sig_numerator = numerator;
        info.time_sig_denominator = denominator;
        info.flags = time_info_flags::NANOS_VALID
            | time_info_flags::TEMPO_VALID
            | time_info_flags::PPQ_POS_VALID
            | time_info_flags::TIME_SIG_VALID;
    }
}

/// Per-instance callback state: the pinned time record handed out by
/// `audioMasterGetTime`, refreshed on every request.
pub(crate) struct InstanceSlot {
    block: Arc<HostTimeBlock>,
    time_info: Box<UnsafeCell<VstTimeInfo>>,
    sample_pos: AtomicU64,
}

// SAFETY: `time_info` is only written inside `audioMasterGetTime`, which the
// plugin calls synchronously from whichever thread is currently driving that
// instance; `Effect` serializes those calls.
unsafe impl Sync for InstanceSlot {}
unsafe impl Send for InstanceSlot {}

impl InstanceSlot {
    fn new(block: Arc<HostTimeBlock>) -> Self {
        Self {
            block,
            time_info: Box::new(UnsafeCell::new(VstTimeInfo::default())),
            sample_pos: AtomicU64::new(0),
        }
    }

    fn refresh_time(&self) -> *mut VstTimeInfo {
        let info = self.time_info.get();
        // SAFETY: see the Sync impl above.
        unsafe { self.block.fill(&mut *info, self.sample_pos.load(Ordering::Acquire)) };
        info
    }

    pub(crate) fn advance(&self, frames: usize) {
        self.sample_pos.fetch_add(frames as u64, Ordering::AcqRel);
    }

    pub(crate) fn sample_pos(&self) -> u64 {
        self.sample_pos.load(Ordering::Acquire)
    }
}

fn instances() -> &'static DashMap<usize, Arc<InstanceSlot>> {
    static INSTANCES: OnceLock<DashMap<usize, Arc<InstanceSlot>>> = OnceLock::new();
    INSTANCES.get_or_init(DashMap::new)
}

thread_local! {
    static LOADING: RefCell<Option<Arc<HostTimeBlock>>> = const { RefCell::new(None) };
}

/// Makes `block` answer callbacks that arrive before the instance pointer is
/// known (i.e. from inside the entry point).
pub(crate) fn with_loading_host<R>(block: &Arc<HostTimeBlock>, f: impl FnOnce() -> R) -> R {
    struct Reset;
    impl Drop for Reset {
        fn drop(&mut self) {
            LOADING.with(|l| l.borrow_mut().take());
        }
    }
    LOADING.with(|l| *l.borrow_mut() = Some(block.clone()));
    let _reset = Reset;
    f()
}

pub(crate) fn register_instance(effect: *mut AEffect, block: Arc<HostTimeBlock>) -> Arc<InstanceSlot> {
    let slot = Arc::new(InstanceSlot::new(block));
    instances().insert(effect as usize, slot.clone());
    slot
}

pub(crate) fn unregister_instance(effect: *mut AEffect) {
    instances().remove(&(effect as usize));
}

/// Number of plugin instances currently reachable by the callback.
pub fn registered_instances() -> usize {
    instances().len()
}

/// The callback handed to every plugin entry point.
pub fn host_callback_proc() -> HostCallbackProc {
    host_callback
}

extern "C" fn host_callback(
    effect: *mut AEffect,
    opcode: i32,
    index: i32,
    value: isize,
    ptr: *mut c_void,
    opt: f32,
) -> isize {
    // Never unwind into the plugin.
    catch_unwind(AssertUnwindSafe(|| {
        dispatch_host(effect, opcode, index, value, ptr, opt)
    }))
    .unwrap_or(0)
}

fn dispatch_host(
    effect: *mut AEffect,
    opcode: i32,
    index: i32,
    value: isize,
    ptr: *mut c_void,
    _opt: f32,
) -> isize {
    let slot = if effect.is_null() {
        None
    } else {
        instances().get(&(effect as usize)).map(|e| e.value().clone())
    };
    let block = slot
        .as_ref()
        .map(|s| s.block.clone())
        .or_else(|| LOADING.with(|l| l.borrow().clone()));

    match opcode {
        host_opcode::VERSION => HOST_VERSION,
        host_opcode::GET_TIME => slot.map_or(0, |s| s.refresh_time() as isize),
        host_opcode::GET_SAMPLE_RATE => block.map_or(0, |b| b.sample_rate() as isize),
        host_opcode::GET_BLOCK_SIZE => block.map_or(0, |b| b.block_size() as isize),
        host_opcode::GET_CURRENT_PROCESS_LEVEL => {
            block.map_or(ProcessLevel::Unknown as isize, |b| b.process_level() as isize)
        }
        host_opcode::GET_VENDOR_STRING => write_c_string(ptr, HOST_VENDOR),
        host_opcode::GET_PRODUCT_STRING => write_c_string(ptr, HOST_PRODUCT),
        host_opcode::GET_VENDOR_VERSION => HOST_VENDOR_VERSION,
        host_opcode::CAN_DO => can_do(ptr),
        host_opcode::AUTOMATE
        | host_opcode::BEGIN_EDIT
        | host_opcode::END_EDIT
        | host_opcode::IDLE
        | host_opcode::UPDATE_DISPLAY
        | host_opcode::IO_CHANGED => {
            trace!(opcode, index, value, "Host callback acknowledged");
            0
        }
        _ => {
            debug!(opcode, index, value, "Unhandled host callback opcode");
            0
        }
    }
}

/// Host strings are limited to 64 bytes including the terminator.
fn write_c_string(ptr: *mut c_void, text: &str) -> isize {
    if ptr.is_null() {
        return 0;
    }
    let bytes = text.as_bytes();
    let len = bytes.len().min(63);
    // SAFETY: the ABI guarantees at least 64 writable bytes for these opcodes.
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr as *mut u8, len);
        *(ptr as *mut u8).add(len) = 0;
    }
    1
}

fn can_do(ptr: *mut c_void) -> isize {
    if ptr.is_null() {
        return 0;
    }
    // SAFETY: canDo passes a NUL-terminated string.
    let query = unsafe { CStr::from_ptr(ptr as *const std::ffi::c_char) };
    match query.to_str() {
        Ok(q) if HOST_CAN_DO.contains(&q) => 1,
        Ok(q) => {
            debug!(capability = q, "Plugin asked for unsupported host capability");
            0
        }
        Err(_) => 0,
    }
}

/// Shared handle to a running plugin instance.
#[derive(Clone)]
pub struct EffectHandle {
    key: usize,
    label: Arc<str>,
    inner: Arc<Mutex<Effect>>,
}

impl EffectHandle {
    fn new(effect: Effect) -> Self {
        Self {
            key: effect.key(),
            label: Arc::from(effect.label()),
            inner: Arc::new(Mutex::new(effect)),
        }
    }

    /// Native instance pointer, as used for registry lookups.
    #[inline]
    pub fn key(&self) -> usize {
        self.key
    }

    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, Effect> {
        self.inner.lock()
    }
}

impl std::fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectHandle")
            .field("key", &format_args!("{:#x}", self.key))
            .field("label", &self.label)
            .finish()
    }
}

/// Owns the host time block and the plugins loaded through it.
pub struct AudioMaster {
    block: Arc<HostTimeBlock>,
    effects: DashMap<usize, EffectHandle>,
}

impl AudioMaster {
    pub fn new(clock: MonotonicClock, sample_rate: f64, block_size: usize) -> Self {
        info!(sample_rate, block_size, "AudioMaster created");
        Self {
            block: Arc::new(HostTimeBlock::new(clock, sample_rate, block_size)),
            effects: DashMap::new(),
        }
    }

    #[inline]
    pub fn time_block(&self) -> &Arc<HostTimeBlock> {
        &self.block
    }

    #[inline]
    pub fn sample_rate(&self) -> f64 {
        self.block.sample_rate()
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block.block_size()
    }

    pub fn set_process_level(&self, level: ProcessLevel) {
        self.block.set_process_level(level);
    }

    /// Loads a plugin library and brings it to the running state.
    pub fn add_effect(&self, path: impl AsRef<Path>, options: EffectOptions) -> Result<EffectHandle> {
        let module = LibraryModule::open(path)?;
        self.add_effect_module(Box::new(module), options)
    }

    /// Opens and starts a plugin from any module. The handle is registered
    /// only once the start sequence succeeded.
    pub fn add_effect_module(
        &self,
        module: Box<dyn PluginModule>,
        options: EffectOptions,
    ) -> Result<EffectHandle> {
        let mut effect = Effect::new(self.block.clone(), module, options);
        effect.open()?;
        effect.start()?;

        let handle = EffectHandle::new(effect);
        self.effects.insert(handle.key(), handle.clone());
        info!(plugin = %handle.label(), effects = self.effects.len(), "Effect added");
        Ok(handle)
    }

    /// Runs the stop/suspend/close sequence and unloads the module.
    pub fn remove_effect(&self, handle: &EffectHandle) {
        if self.effects.remove(&handle.key()).is_none() {
            warn!(plugin = %handle.label(), "Removing an effect this host does not own");
        }
        handle.lock().close();
        info!(plugin = %handle.label(), effects = self.effects.len(), "Effect removed");
    }

    pub fn effect_count(&self) -> usize {
        self.effects.len()
    }
}

impl Drop for AudioMaster {
    fn drop(&mut self) {
        let handles: Vec<EffectHandle> = self.effects.iter().map(|e| e.value().clone()).collect();
        for handle in handles {
            self.remove_effect(&handle);
        }
    }
}
