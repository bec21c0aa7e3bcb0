//! The codec seam. Real codecs (Opus, H.264) implement [`Encoder`]; the raw
//! encoders here let the stream chain run without them.

use crate::error::{MediaError, Result};
use crate::pcm::PcmBuffer;
use crate::video::VideoFrame;
use onair_core::{BufferLog, NativeMemoryBlock};
use smallvec::SmallVec;

/// Encoded bytes plus the `(offset, length)` boundaries of each
/// network-transmittable unit.
pub struct EncodedBuffer {
    data: NativeMemoryBlock<u8>,
    len: usize,
    units: SmallVec<[(usize, usize); 4]>,
    timestamp_us: u64,
    keyframe: bool,
}

impl EncodedBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: NativeMemoryBlock::new(capacity),
            len: 0,
            units: SmallVec::new(),
            timestamp_us: 0,
            keyframe: false,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Forgets the previous payload. The log is left alone.
    pub fn clear(&mut self) {
        self.len = 0;
        self.units.clear();
        self.keyframe = false;
    }

    /// Appends one unit and records its boundary.
    pub fn push_unit(&mut self, bytes: &[u8]) -> Result<()> {
        let needed = self.len + bytes.len();
        if needed > self.capacity() {
            return Err(MediaError::OutputTooSmall {
                needed,
                capacity: self.capacity(),
            });
        }
        self.data.as_mut_slice()[self.len..needed].copy_from_slice(bytes);
        self.units.push((self.len, bytes.len()));
        self.len = needed;
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data.as_slice()[..self.len]
    }

    #[inline]
    pub fn units(&self) -> &[(usize, usize)] {
        &self.units
    }

    pub fn unit(&self, index: usize) -> Option<&[u8]> {
        let &(offset, length) = self.units.get(index)?;
        Some(&self.data.as_slice()[offset..offset + length])
    }

    #[inline]
    pub fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }

    #[inline]
    pub fn set_timestamp_us(&mut self, timestamp_us: u64) {
        self.timestamp_us = timestamp_us;
    }

    #[inline]
    pub fn is_keyframe(&self) -> bool {
        self.keyframe
    }

    #[inline]
    pub fn set_keyframe(&mut self, keyframe: bool) {
        self.keyframe = keyframe;
    }

    #[inline]
    pub fn log(&self) -> &BufferLog {
        self.data.log()
    }

    #[inline]
    pub fn log_mut(&mut self) -> &mut BufferLog {
        self.data.log_mut()
    }
}

/// Encodes one input per call into a cleared output buffer.
pub trait Encoder<I>: Send {
    fn name(&self) -> &'static str;

    /// Returns the number of bytes written.
    fn encode(&mut self, input: &I, output: &mut EncodedBuffer) -> Result<usize>;

    /// Asks for the next output to be independently decodable.
    fn request_keyframe(&mut self) {}
}

/// Little-endian f32 samples, one unit per block.
#[derive(Debug, Default)]
pub struct RawPcmEncoder;

impl Encoder<PcmBuffer> for RawPcmEncoder {
    fn name(&self) -> &'static str {
        "raw-pcm"
    }

    fn encode(&mut self, input: &PcmBuffer, output: &mut EncodedBuffer) -> Result<usize> {
        output.clear();
        let needed = input.samples().len() * 4;
        if needed > output.capacity() {
            return Err(MediaError::OutputTooSmall {
                needed,
                capacity: output.capacity(),
            });
        }
        let bytes = &mut output.data.as_mut_slice()[..needed];
        for (dst, &sample) in bytes.chunks_exact_mut(4).zip(input.samples()) {
            dst.copy_from_slice(&sample.to_le_bytes());
        }
        output.units.push((0, needed));
        output.len = needed;
        output.keyframe = true;
        output.log_mut().merge(input.log());
        Ok(needed)
    }
}

/// Uncompressed I420, one unit per plane.
#[derive(Debug, Default)]
pub struct RawVideoEncoder {
    keyframe_requested: bool,
    frames: u64,
}

impl RawVideoEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_encoded(&self) -> u64 {
        self.frames
    }
}

impl Encoder<VideoFrame> for RawVideoEncoder {
    fn name(&self) -> &'static str {
        "raw-i420"
    }

    fn encode(&mut self, input: &VideoFrame, output: &mut EncodedBuffer) -> Result<usize> {
        output.clear();
        output.push_unit(input.y())?;
        output.push_unit(input.u())?;
        output.push_unit(input.v())?;
        // Every raw frame is intra; the flag only reports that one was asked for.
        output.set_keyframe(std::mem::take(&mut self.keyframe_requested) || self.frames == 0);
        output.log_mut().merge(input.log());
        self.frames += 1;
        Ok(output.len())
    }

    fn request_keyframe(&mut self) {
        self.keyframe_requested = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_unit_records_boundaries() {
        let mut buf = EncodedBuffer::with_capacity(8);
        buf.push_unit(&[1, 2, 3]).unwrap();
        buf.push_unit(&[4, 5]).unwrap();
        assert_eq!(buf.units(), &[(0, 3), (3, 2)]);
        assert_eq!(buf.unit(1), Some(&[4u8, 5][..]));
        assert!(matches!(
            buf.push_unit(&[0; 4]),
            Err(MediaError::OutputTooSmall { needed: 9, capacity: 8 })
        ));
        buf.clear();
        assert!(buf.is_empty() && buf.units().is_empty());
    }

    #[test]
    fn test_raw_pcm_is_little_endian_f32() {
        let mut pcm = PcmBuffer::new(2, 2);
        pcm.set_frames(2);
        pcm.samples_mut().copy_from_slice(&[1.0, -1.0, 0.5, 0.0]);
        let mut out = EncodedBuffer::with_capacity(64);

        let written = RawPcmEncoder.encode(&pcm, &mut out).unwrap();
        assert_eq!(written, 16);
        assert_eq!(out.units(), &[(0, 16)]);
        assert_eq!(&out.as_bytes()[..4], &1.0f32.to_le_bytes());
        assert_eq!(&out.as_bytes()[12..], &0.0f32.to_le_bytes());
    }

    #[test]
    fn test_raw_pcm_rejects_small_output() {
        let mut pcm = PcmBuffer::new(2, 960);
        pcm.set_frames(960);
        let mut out = EncodedBuffer::with_capacity(100);
        assert!(RawPcmEncoder.encode(&pcm, &mut out).is_err());
    }

    #[test]
    fn test_raw_video_units_and_keyframes() {
        let frame = VideoFrame::new(4, 2);
        let mut encoder = RawVideoEncoder::new();
        let mut out = EncodedBuffer::with_capacity(64);

        assert_eq!(encoder.encode(&frame, &mut out).unwrap(), 12);
        assert_eq!(out.units(), &[(0, 8), (8, 2), (10, 2)]);
        assert!(out.is_keyframe());

        encoder.encode(&frame, &mut out).unwrap();
        assert!(!out.is_keyframe());

        encoder.request_keyframe();
        encoder.encode(&frame, &mut out).unwrap();
        assert!(out.is_keyframe());
        assert_eq!(encoder.frames_encoded(), 3);
    }
}
