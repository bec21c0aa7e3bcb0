//! Per-plugin driver.
//!
//! Lifecycle: `Unopened -> Opened -> Running -> Stopped -> Closed`.
//! `open` instantiates the plugin and validates its descriptor, `start`
//! issues the configure/resume sequence, `close` tears down best-effort
//! from any state and unloads the module last.

use crate::abi::{
    effect_flags, effect_opcode, AEffect, DispatcherProc, ERect, GetParameterProc, Precision,
    ProcessDoubleProc, ProcessProc, SetParameterProc, VST_MAGIC,
};
use crate::buffer::{Sample, VstBuffer};
use crate::error::{panic_message, LoadStage, Result, VstError};
use crate::events::EventScheduler;
use crate::host::{self, HostTimeBlock, InstanceSlot};
use crate::module::PluginModule;
use onair_midi::{MidiInput, MidiOutput};
use std::ffi::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectState {
    Unopened,
    Opened,
    Running,
    Stopped,
    Closed,
}

#[derive(Debug, Clone, Copy)]
pub struct EffectOptions {
    pub precision: Precision,
    /// Reject plugins that do not declare themselves instruments.
    pub require_instrument: bool,
}

impl Default for EffectOptions {
    fn default() -> Self {
        Self {
            precision: Precision::Single,
            require_instrument: true,
        }
    }
}

/// Descriptor fields and identity strings read at open time.
#[derive(Debug, Clone, Default)]
pub struct PluginInfo {
    pub name: String,
    pub vendor: String,
    pub product: String,
    pub vendor_version: i32,
    pub unique_id: i32,
    pub version: i32,
    pub num_programs: i32,
    pub num_params: i32,
    pub num_inputs: i32,
    pub num_outputs: i32,
    pub flags: i32,
    pub initial_delay: i32,
}

impl PluginInfo {
    #[inline]
    pub fn is_synth(&self) -> bool {
        self.flags & effect_flags::IS_SYNTH != 0
    }

    #[inline]
    pub fn has_editor(&self) -> bool {
        self.flags & effect_flags::HAS_EDITOR != 0
    }

    #[inline]
    pub fn can_double_replacing(&self) -> bool {
        self.flags & effect_flags::CAN_DOUBLE_REPLACING != 0
    }
}

/// Function pointers resolved once from the descriptor.
#[derive(Clone, Copy)]
struct Procs {
    dispatcher: DispatcherProc,
    process: Option<ProcessProc>,
    process_double: Option<ProcessDoubleProc>,
    set_parameter: Option<SetParameterProc>,
    get_parameter: Option<GetParameterProc>,
}

const STRING_BUF_LEN: usize = 256;

pub struct Effect {
    label: String,
    block: Arc<HostTimeBlock>,
    module: Option<Box<dyn PluginModule>>,
    options: EffectOptions,
    state: EffectState,
    aeffect: *mut AEffect,
    procs: Option<Procs>,
    slot: Option<Arc<InstanceSlot>>,
    info: PluginInfo,
    scheduler: EventScheduler,
    previous_block_us: u64,
    editor_open: bool,
    strings: Box<[u8; STRING_BUF_LEN]>,
}

// SAFETY: the raw descriptor pointer is only dereferenced through `&mut self`
// or `&self` methods, and `EffectHandle` wraps the effect in a mutex.
unsafe impl Send for Effect {}

impl Effect {
    /// An unopened effect. No native code runs until [`Effect::open`].
    pub fn new(block: Arc<HostTimeBlock>, module: Box<dyn PluginModule>, options: EffectOptions) -> Self {
        Self {
            label: module.label().to_string(),
            block,
            module: Some(module),
            options,
            state: EffectState::Unopened,
            aeffect: std::ptr::null_mut(),
            procs: None,
            slot: None,
            info: PluginInfo::default(),
            scheduler: EventScheduler::new(),
            previous_block_us: 0,
            editor_open: false,
            strings: Box::new([0u8; STRING_BUF_LEN]),
        }
    }

    #[inline]
    pub fn state(&self) -> EffectState {
        self.state
    }

    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[inline]
    pub fn info(&self) -> &PluginInfo {
        &self.info
    }

    #[inline]
    pub fn options(&self) -> EffectOptions {
        self.options
    }

    #[inline]
    pub fn scheduler(&self) -> &EventScheduler {
        &self.scheduler
    }

    /// Native instance pointer (zero before open).
    #[inline]
    pub fn key(&self) -> usize {
        self.aeffect as usize
    }

    /// Samples processed since start.
    pub fn sample_position(&self) -> u64 {
        self.slot.as_ref().map_or(0, |s| s.sample_pos())
    }

    /// Calls the entry point and validates the descriptor.
    pub fn open(&mut self) -> Result<()> {
        self.require(EffectState::Unopened, "open")?;
        let module = self.module.as_ref().ok_or(VstError::InvalidState {
            operation: "open",
            actual: self.state,
        })?;

        let callback = host::host_callback_proc();
        let aeffect = host::with_loading_host(&self.block, || module.instantiate(callback))?;
        if aeffect.is_null() {
            self.unload();
            return Err(self.load_error(LoadStage::Instantiation, "entry point returned null"));
        }
        self.aeffect = aeffect;

        // SAFETY: non-null descriptor returned by the entry point.
        let descriptor = unsafe { &*aeffect };
        if descriptor.magic != VST_MAGIC {
            // No trustworthy dispatcher to close with; just unload.
            self.aeffect = std::ptr::null_mut();
            self.unload();
            return Err(self.load_error(
                LoadStage::Descriptor,
                &format!("bad magic {:#x}", descriptor.magic),
            ));
        }
        let Some(dispatcher) = descriptor.dispatcher else {
            self.aeffect = std::ptr::null_mut();
            self.unload();
            return Err(VstError::Protocol(format!("{}: descriptor has no dispatcher", self.label)));
        };

        self.procs = Some(Procs {
            dispatcher,
            process: descriptor.process_replacing,
            process_double: descriptor.process_double_replacing,
            set_parameter: descriptor.set_parameter,
            get_parameter: descriptor.get_parameter,
        });
        self.slot = Some(host::register_instance(aeffect, self.block.clone()));
        self.state = EffectState::Opened;
        self.info = PluginInfo {
            unique_id: descriptor.unique_id,
            version: descriptor.version,
            num_programs: descriptor.num_programs,
            num_params: descriptor.num_params,
            num_inputs: descriptor.num_inputs,
            num_outputs: descriptor.num_outputs,
            flags: descriptor.flags,
            initial_delay: descriptor.initial_delay,
            ..PluginInfo::default()
        };

        if let Err(e) = self.validate_descriptor() {
            self.close();
            return Err(e);
        }

        info!(
            plugin = %self.label,
            unique_id = self.info.unique_id,
            inputs = self.info.num_inputs,
            outputs = self.info.num_outputs,
            params = self.info.num_params,
            synth = self.info.is_synth(),
            "Plugin opened"
        );
        Ok(())
    }

    fn validate_descriptor(&self) -> Result<()> {
        let procs = self.procs()?;
        let missing = match self.options.precision {
            Precision::Single => procs.process.is_none(),
            Precision::Double => procs.process_double.is_none(),
        };
        if missing {
            return Err(VstError::Protocol(format!(
                "{}: no {:?}-precision processReplacing entry point",
                self.label, self.options.precision
            )));
        }
        if self.options.require_instrument && !self.info.is_synth() {
            return Err(VstError::Protocol(format!(
                "{}: not an instrument (flags {:#x})",
                self.label, self.info.flags
            )));
        }
        Ok(())
    }

    /// open, set-sample-rate, set-block-size, set-precision, resume, start.
    pub fn start(&mut self) -> Result<()> {
        self.require(EffectState::Opened, "start")?;
        let sample_rate = self.block.sample_rate() as f32;
        let block_size = self.block.block_size() as isize;
        let precision = self.options.precision as isize;
        let null = std::ptr::null_mut();

        let sequence = [
            (effect_opcode::OPEN, 0, 0.0),
            (effect_opcode::SET_SAMPLE_RATE, 0, sample_rate),
            (effect_opcode::SET_BLOCK_SIZE, block_size, 0.0),
            (effect_opcode::SET_PROCESS_PRECISION, precision, 0.0),
            (effect_opcode::MAINS_CHANGED, 1, 0.0),
            (effect_opcode::START_PROCESS, 0, 0.0),
        ];
        for (opcode, value, opt) in sequence {
            if let Err(e) = self.dispatch(opcode, 0, value, null, opt) {
                error!(plugin = %self.label, error = %e, "Start sequence failed");
                self.close();
                return Err(e);
            }
        }

        self.fill_identity();
        self.previous_block_us = self.block.clock().now_us();
        self.state = EffectState::Running;
        info!(
            plugin = %self.label,
            name = %self.info.name,
            vendor = %self.info.vendor,
            sample_rate,
            block_size,
            "Plugin running"
        );
        Ok(())
    }

    fn fill_identity(&mut self) {
        self.info.name = self.dispatch_string(effect_opcode::GET_EFFECT_NAME, 0).unwrap_or_default();
        self.info.vendor = self.dispatch_string(effect_opcode::GET_VENDOR_STRING, 0).unwrap_or_default();
        self.info.product = self.dispatch_string(effect_opcode::GET_PRODUCT_STRING, 0).unwrap_or_default();
        self.info.vendor_version = self
            .dispatch(effect_opcode::GET_VENDOR_VERSION, 0, 0, std::ptr::null_mut(), 0.0)
            .unwrap_or(0) as i32;
    }

    /// Renders one block into `buffer`'s output channels.
    pub fn process_replacing<S: Sample>(&mut self, now_us: u64, buffer: &mut VstBuffer<S>) -> Result<()> {
        self.require(EffectState::Running, "processReplacing")?;
        if S::PRECISION != self.options.precision {
            return Err(VstError::Protocol(format!(
                "{}: started with {:?} precision, got a {:?} buffer",
                self.label,
                self.options.precision,
                S::PRECISION
            )));
        }
        let frames = buffer.block_size();
        if frames > self.block.block_size() {
            return Err(VstError::Protocol(format!(
                "{}: block of {} frames exceeds negotiated {}",
                self.label,
                frames,
                self.block.block_size()
            )));
        }
        if (buffer.num_outputs() as i32) < self.info.num_outputs
            || (buffer.num_inputs() as i32) < self.info.num_inputs
        {
            return Err(VstError::Protocol(format!(
                "{}: buffer has {}in/{}out, plugin needs {}in/{}out",
                self.label,
                buffer.num_inputs(),
                buffer.num_outputs(),
                self.info.num_inputs,
                self.info.num_outputs
            )));
        }

        let procs = self.procs()?;
        let effect = self.aeffect;
        let inputs = buffer.raw_inputs();
        let outputs = buffer.raw_outputs();
        let frames_i32 = frames as i32;

        let outcome = match S::PRECISION {
            Precision::Single => {
                let process = procs.process.ok_or_else(|| self.missing_process())?;
                catch_unwind(AssertUnwindSafe(|| {
                    process(effect, inputs.cast(), outputs.cast(), frames_i32)
                }))
            }
            Precision::Double => {
                let process = procs.process_double.ok_or_else(|| self.missing_process())?;
                catch_unwind(AssertUnwindSafe(|| {
                    process(effect, inputs.cast(), outputs.cast(), frames_i32)
                }))
            }
        };

        if let Err(payload) = outcome {
            let reason = panic_message(payload);
            error!(plugin = %self.label, %reason, "processReplacing faulted");
            return Err(VstError::Processing {
                operation: "processReplacing",
                reason,
            });
        }

        if let Some(slot) = &self.slot {
            slot.advance(frames);
        }
        self.previous_block_us = now_us;
        buffer.log_mut().add("vst", now_us);
        Ok(())
    }

    /// Dispatches every queued MIDI event due by `now_us` as one
    /// `effProcessEvents` call. Returns the number of events dispatched.
    pub fn process_events(
        &mut self,
        now_us: u64,
        input: &impl MidiInput,
        output: Option<&dyn MidiOutput>,
    ) -> Result<usize> {
        self.require(EffectState::Running, "processEvents")?;
        let list = self.scheduler.collect(
            now_us,
            self.previous_block_us,
            self.block.sample_rate(),
            input,
            output,
        );
        let count = list.len();
        if count == 0 {
            return Ok(0);
        }
        let events = list.as_vst_events() as *mut c_void;
        self.dispatch(effect_opcode::PROCESS_EVENTS, 0, 0, events, 0.0)?;
        Ok(count)
    }

    pub fn get_parameter(&self, index: i32) -> Result<f32> {
        self.require_loaded("getParameter")?;
        self.check_param(index)?;
        let get = self.procs()?.get_parameter.ok_or_else(|| {
            VstError::Protocol(format!("{}: no getParameter entry point", self.label))
        })?;
        let effect = self.aeffect;
        catch_unwind(AssertUnwindSafe(|| get(effect, index))).map_err(|p| VstError::Processing {
            operation: "getParameter",
            reason: panic_message(p),
        })
    }

    pub fn set_parameter(&mut self, index: i32, value: f32) -> Result<()> {
        self.require_loaded("setParameter")?;
        self.check_param(index)?;
        let set = self.procs()?.set_parameter.ok_or_else(|| {
            VstError::Protocol(format!("{}: no setParameter entry point", self.label))
        })?;
        let effect = self.aeffect;
        let value = value.clamp(0.0, 1.0);
        catch_unwind(AssertUnwindSafe(|| set(effect, index, value))).map_err(|p| {
            VstError::Processing {
                operation: "setParameter",
                reason: panic_message(p),
            }
        })
    }

    pub fn parameter_name(&mut self, index: i32) -> Result<String> {
        self.check_param(index)?;
        self.dispatch_string(effect_opcode::GET_PARAM_NAME, index)
    }

    pub fn parameter_label(&mut self, index: i32) -> Result<String> {
        self.check_param(index)?;
        self.dispatch_string(effect_opcode::GET_PARAM_LABEL, index)
    }

    pub fn parameter_display(&mut self, index: i32) -> Result<String> {
        self.check_param(index)?;
        self.dispatch_string(effect_opcode::GET_PARAM_DISPLAY, index)
    }

    /// Opens the plugin editor inside `parent` (a native window handle).
    /// Returns the editor size, or `None` if the plugin has no editor.
    pub fn open_editor(&mut self, parent: *mut c_void) -> Result<Option<(u16, u16)>> {
        self.require_loaded("editOpen")?;
        if !self.info.has_editor() {
            info!(plugin = %self.label, "Plugin has no editor");
            return Ok(None);
        }
        if !self.editor_open {
            self.dispatch(effect_opcode::EDIT_OPEN, 0, 0, parent, 0.0)?;
            self.editor_open = true;
        }

        let mut rect: *mut ERect = std::ptr::null_mut();
        self.dispatch(
            effect_opcode::EDIT_GET_RECT,
            0,
            0,
            &mut rect as *mut *mut ERect as *mut c_void,
            0.0,
        )?;
        if rect.is_null() {
            return Ok(Some((0, 0)));
        }
        // SAFETY: the plugin owns the rect and keeps it valid while the editor is open.
        let rect = unsafe { *rect };
        Ok(Some((rect.width(), rect.height())))
    }

    pub fn idle_editor(&mut self) -> Result<()> {
        if self.editor_open {
            self.dispatch(effect_opcode::EDIT_IDLE, 0, 0, std::ptr::null_mut(), 0.0)?;
        }
        Ok(())
    }

    pub fn close_editor(&mut self) -> Result<()> {
        if self.editor_open {
            self.editor_open = false;
            self.dispatch(effect_opcode::EDIT_CLOSE, 0, 0, std::ptr::null_mut(), 0.0)?;
        }
        Ok(())
    }

    #[inline]
    pub fn is_editor_open(&self) -> bool {
        self.editor_open
    }

    /// Running -> Stopped: stop, then suspend.
    pub fn stop(&mut self) {
        if self.state != EffectState::Running {
            return;
        }
        let null = std::ptr::null_mut();
        if let Err(e) = self.dispatch(effect_opcode::STOP_PROCESS, 0, 0, null, 0.0) {
            warn!(plugin = %self.label, error = %e, "effStopProcess failed");
        }
        if let Err(e) = self.dispatch(effect_opcode::MAINS_CHANGED, 0, 0, null, 0.0) {
            warn!(plugin = %self.label, error = %e, "Suspend failed");
        }
        self.state = EffectState::Stopped;
    }

    /// Best-effort teardown from any state; unloads the module last.
    pub fn close(&mut self) {
        if self.state == EffectState::Closed {
            return;
        }
        if let Err(e) = self.close_editor() {
            warn!(plugin = %self.label, error = %e, "Closing editor failed");
        }
        self.stop();
        if !self.aeffect.is_null() {
            if let Err(e) = self.dispatch(effect_opcode::CLOSE, 0, 0, std::ptr::null_mut(), 0.0) {
                warn!(plugin = %self.label, error = %e, "effClose failed");
            }
            host::unregister_instance(self.aeffect);
        }
        // The plugin frees its descriptor on effClose.
        self.aeffect = std::ptr::null_mut();
        self.procs = None;
        self.slot = None;
        self.unload();
        self.state = EffectState::Closed;
        info!(plugin = %self.label, "Plugin closed");
    }

    fn unload(&mut self) {
        if self.module.take().is_some() {
            debug!(plugin = %self.label, "Module unloaded");
        }
    }

    fn dispatch(&self, opcode: i32, index: i32, value: isize, ptr: *mut c_void, opt: f32) -> Result<isize> {
        let dispatcher = self.procs()?.dispatcher;
        let effect = self.aeffect;
        debug!(plugin = %self.label, opcode = effect_opcode::name(opcode), index, value, "Dispatch");
        catch_unwind(AssertUnwindSafe(|| dispatcher(effect, opcode, index, value, ptr, opt))).map_err(
            |payload| VstError::Processing {
                operation: effect_opcode::name(opcode),
                reason: panic_message(payload),
            },
        )
    }

    fn dispatch_string(&mut self, opcode: i32, index: i32) -> Result<String> {
        self.strings.fill(0);
        let ptr = self.strings.as_mut_ptr() as *mut c_void;
        self.dispatch(opcode, index, 0, ptr, 0.0)?;
        // Some plugins ignore the length limit; never read past our buffer.
        let end = self.strings.iter().position(|&b| b == 0).unwrap_or(STRING_BUF_LEN);
        Ok(String::from_utf8_lossy(&self.strings[..end]).trim().to_string())
    }

    fn procs(&self) -> Result<Procs> {
        self.procs.ok_or(VstError::InvalidState {
            operation: "dispatch",
            actual: self.state,
        })
    }

    fn require(&self, state: EffectState, operation: &'static str) -> Result<()> {
        if self.state == state {
            Ok(())
        } else {
            Err(VstError::InvalidState {
                operation,
                actual: self.state,
            })
        }
    }

    fn require_loaded(&self, operation: &'static str) -> Result<()> {
        match self.state {
            EffectState::Opened | EffectState::Running | EffectState::Stopped => Ok(()),
            actual => Err(VstError::InvalidState { operation, actual }),
        }
    }

    fn check_param(&self, index: i32) -> Result<()> {
        self.require_loaded("parameter access")?;
        if index < 0 || index >= self.info.num_params {
            return Err(VstError::Protocol(format!(
                "{}: parameter {} out of range (0..{})",
                self.label, index, self.info.num_params
            )));
        }
        Ok(())
    }

    fn missing_process(&self) -> VstError {
        VstError::Protocol(format!("{}: processReplacing entry point missing", self.label))
    }

    fn load_error(&self, stage: LoadStage, reason: &str) -> VstError {
        VstError::LoadFailed {
            path: PathBuf::from(&self.label),
            stage,
            reason: reason.to_string(),
        }
    }
}

impl Drop for Effect {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("label", &self.label)
            .field("state", &self.state)
            .field("instance", &format_args!("{:#x}", self.key()))
            .finish()
    }
}
