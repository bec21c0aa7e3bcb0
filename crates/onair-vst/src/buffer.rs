//! Channel buffers handed to `processReplacing`.

use crate::abi::Precision;
use onair_core::{BufferLog, NativeMemoryBlock};

/// Sample formats the plugin can process.
pub trait Sample: Copy + Default + Send + Sync + 'static {
    const PRECISION: Precision;
}

impl Sample for f32 {
    const PRECISION: Precision = Precision::Single;
}

impl Sample for f64 {
    const PRECISION: Precision = Precision::Double;
}

/// Planar input/output channels plus the pinned pointer arrays that
/// `processReplacing` receives.
///
/// Channel storage never moves, so the pointer arrays are built once.
pub struct VstBuffer<S: Sample> {
    inputs: Vec<NativeMemoryBlock<S>>,
    outputs: Vec<NativeMemoryBlock<S>>,
    input_ptrs: Box<[*mut S]>,
    output_ptrs: Box<[*mut S]>,
    block_size: usize,
    log: BufferLog,
}

// SAFETY: the pointer arrays only point into channel blocks owned by this
// buffer, and the plugin only dereferences them during a call made through
// `&mut VstBuffer`.
unsafe impl<S: Sample> Send for VstBuffer<S> {}

impl<S: Sample> VstBuffer<S> {
    pub fn new(num_inputs: usize, num_outputs: usize, block_size: usize) -> Self {
        let mut inputs: Vec<_> = (0..num_inputs)
            .map(|_| NativeMemoryBlock::new(block_size))
            .collect();
        let mut outputs: Vec<_> = (0..num_outputs)
            .map(|_| NativeMemoryBlock::new(block_size))
            .collect();
        let input_ptrs = inputs.iter_mut().map(|b| b.as_mut_ptr()).collect();
        let output_ptrs = outputs.iter_mut().map(|b| b.as_mut_ptr()).collect();

        Self {
            inputs,
            outputs,
            input_ptrs,
            output_ptrs,
            block_size,
            log: BufferLog::new(),
        }
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    #[inline]
    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    #[inline]
    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    pub fn input(&self, channel: usize) -> Option<&[S]> {
        self.inputs.get(channel).map(|b| b.as_slice())
    }

    pub fn input_mut(&mut self, channel: usize) -> Option<&mut [S]> {
        self.inputs.get_mut(channel).map(|b| b.as_mut_slice())
    }

    pub fn output(&self, channel: usize) -> Option<&[S]> {
        self.outputs.get(channel).map(|b| b.as_slice())
    }

    pub fn output_mut(&mut self, channel: usize) -> Option<&mut [S]> {
        self.outputs.get_mut(channel).map(|b| b.as_mut_slice())
    }

    pub fn clear_outputs(&mut self) {
        for block in &mut self.outputs {
            block.fill(S::default());
        }
    }

    #[inline]
    pub fn log(&self) -> &BufferLog {
        &self.log
    }

    #[inline]
    pub fn log_mut(&mut self) -> &mut BufferLog {
        &mut self.log
    }

    /// Address of the first output channel, for identity checks.
    pub fn address(&self) -> usize {
        self.outputs.first().map_or(0, |b| b.address())
    }

    pub(crate) fn raw_inputs(&mut self) -> *mut *mut S {
        self.input_ptrs.as_mut_ptr()
    }

    pub(crate) fn raw_outputs(&mut self) -> *mut *mut S {
        self.output_ptrs.as_mut_ptr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_arrays_match_channels() {
        let mut buffer = VstBuffer::<f32>::new(0, 2, 960);
        let outputs = buffer.raw_outputs();
        let left = unsafe { *outputs };
        let right = unsafe { *outputs.add(1) };
        assert_eq!(left as *const f32, buffer.output(0).unwrap().as_ptr());
        assert_eq!(right as *const f32, buffer.output(1).unwrap().as_ptr());
    }

    #[test]
    fn test_pointers_survive_move() {
        let mut buffer = VstBuffer::<f64>::new(1, 2, 64);
        let before = unsafe { *buffer.raw_outputs().add(1) };
        let mut moved = Box::new(buffer);
        let after = unsafe { *moved.raw_outputs().add(1) };
        assert_eq!(before, after);
        assert_eq!(moved.output(1).unwrap().len(), 64);
    }

    #[test]
    fn test_clear_outputs() {
        let mut buffer = VstBuffer::<f32>::new(0, 2, 4);
        buffer.output_mut(0).unwrap().fill(0.5);
        buffer.clear_outputs();
        assert!(buffer.output(0).unwrap().iter().all(|&s| s == 0.0));
        assert_eq!(f32::PRECISION, Precision::Single);
        assert_eq!(f64::PRECISION, Precision::Double);
    }
}
