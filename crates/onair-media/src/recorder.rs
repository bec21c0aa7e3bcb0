//! WAV recording sink used in local mode.

use crate::error::{MediaError, Result};
use crate::pcm::PcmBuffer;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub struct WavRecorder {
    path: PathBuf,
    writer: Option<WavWriter<BufWriter<File>>>,
    channels: usize,
    frames_written: u64,
}

impl WavRecorder {
    /// 32-bit float WAV.
    pub fn create(path: impl AsRef<Path>, sample_rate: f64, channels: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let spec = WavSpec {
            channels: channels as u16,
            sample_rate: sample_rate as u32,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let writer = WavWriter::new(BufWriter::new(File::create(&path)?), spec)?;
        info!(path = %path.display(), sample_rate, channels, "Recording started");
        Ok(Self {
            path,
            writer: Some(writer),
            channels,
            frames_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn write(&mut self, pcm: &PcmBuffer) -> Result<usize> {
        if pcm.channels() != self.channels {
            return Err(MediaError::Format(format!(
                "recorder has {} channels, buffer has {}",
                self.channels,
                pcm.channels()
            )));
        }
        let Some(writer) = self.writer.as_mut() else {
            return Err(MediaError::Egress("recorder already finalized".into()));
        };
        for &sample in pcm.samples() {
            writer.write_sample(sample)?;
        }
        self.frames_written += pcm.frames() as u64;
        Ok(pcm.frames())
    }

    /// Writes the header lengths and closes the file. Returns the frame count.
    pub fn finalize(&mut self) -> Result<u64> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
            info!(path = %self.path.display(), frames = self.frames_written, "Recording finalized");
        }
        Ok(self.frames_written)
    }
}

impl Drop for WavRecorder {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            warn!(path = %self.path.display(), error = %e, "Failed to finalize recording");
        }
    }
}
