//! Interleaved PCM buffers and the planar-to-interleaved conversion.

use crate::error::{MediaError, Result};
use onair_core::{BufferLog, NativeMemoryBlock};
use onair_vst::{Sample, VstBuffer};

/// Interleaved f32 samples with a fixed capacity of `channels * frames`.
pub struct PcmBuffer {
    samples: NativeMemoryBlock<f32>,
    channels: usize,
    capacity_frames: usize,
    frames: usize,
}

impl PcmBuffer {
    pub fn new(channels: usize, frames: usize) -> Self {
        Self {
            samples: NativeMemoryBlock::new(channels * frames),
            channels,
            capacity_frames: frames,
            frames: 0,
        }
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Valid frames written by the last conversion.
    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    #[inline]
    pub fn capacity_frames(&self) -> usize {
        self.capacity_frames
    }

    pub fn set_frames(&mut self, frames: usize) {
        self.frames = frames.min(self.capacity_frames);
    }

    /// The valid interleaved samples.
    pub fn samples(&self) -> &[f32] {
        &self.samples.as_slice()[..self.frames * self.channels]
    }

    pub fn samples_mut(&mut self) -> &mut [f32] {
        let len = self.frames * self.channels;
        &mut self.samples.as_mut_slice()[..len]
    }

    #[inline]
    pub fn address(&self) -> usize {
        self.samples.address()
    }

    #[inline]
    pub fn log(&self) -> &BufferLog {
        self.samples.log()
    }

    #[inline]
    pub fn log_mut(&mut self) -> &mut BufferLog {
        self.samples.log_mut()
    }
}

/// Conversion of a rendered block into interleaved PCM.
pub trait ToPcm {
    /// Fills `out`, replacing its log with the source's. Returns the number
    /// of frames written.
    fn to_pcm(&self, out: &mut PcmBuffer) -> Result<usize>;
}

impl<S> ToPcm for VstBuffer<S>
where
    S: Sample + Into<f64>,
{
    fn to_pcm(&self, out: &mut PcmBuffer) -> Result<usize> {
        let sources = self.num_outputs();
        if sources == 0 {
            return Err(MediaError::Format("plugin buffer has no output channels".into()));
        }
        let frames = self.block_size().min(out.capacity_frames());
        let channels = out.channels();
        out.set_frames(frames);

        let dst = out.samples_mut();
        for ch in 0..channels {
            // Mono sources are duplicated across every output channel.
            let Some(src) = self.output(ch.min(sources - 1)) else {
                continue;
            };
            for (frame, &sample) in src[..frames].iter().enumerate() {
                dst[frame * channels + ch] = sample.into() as f32;
            }
        }
        out.log_mut().merge(self.log());
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interleaves_stereo() {
        let mut vst = VstBuffer::<f32>::new(0, 2, 4);
        vst.output_mut(0).unwrap().copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        vst.output_mut(1).unwrap().copy_from_slice(&[-1.0, -2.0, -3.0, -4.0]);
        vst.log_mut().add("vst", 10);

        let mut pcm = PcmBuffer::new(2, 4);
        pcm.log_mut().add("stale", 1);
        assert_eq!(vst.to_pcm(&mut pcm).unwrap(), 4);
        assert_eq!(pcm.samples(), &[1.0, -1.0, 2.0, -2.0, 3.0, -3.0, 4.0, -4.0]);
        assert_eq!(pcm.log().iter().copied().collect::<Vec<_>>(), vec![("vst", 10)]);
    }

    #[test]
    fn test_mono_source_is_duplicated() {
        let mut vst = VstBuffer::<f64>::new(0, 1, 3);
        vst.output_mut(0).unwrap().copy_from_slice(&[0.25, 0.5, 0.75]);
        let mut pcm = PcmBuffer::new(2, 3);
        vst.to_pcm(&mut pcm).unwrap();
        assert_eq!(pcm.samples(), &[0.25, 0.25, 0.5, 0.5, 0.75, 0.75]);
    }

    #[test]
    fn test_short_destination_truncates() {
        let vst = VstBuffer::<f32>::new(0, 2, 8);
        let mut pcm = PcmBuffer::new(2, 5);
        assert_eq!(vst.to_pcm(&mut pcm).unwrap(), 5);
        assert_eq!(pcm.samples().len(), 10);
    }

    #[test]
    fn test_no_outputs_is_a_format_error() {
        let vst = VstBuffer::<f32>::new(2, 0, 8);
        let mut pcm = PcmBuffer::new(2, 8);
        assert!(matches!(vst.to_pcm(&mut pcm), Err(MediaError::Format(_))));
    }
}
