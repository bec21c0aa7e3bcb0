//! The network seam: whatever carries encoded units off the machine.

use crate::encoder::EncodedBuffer;
use crate::error::{MediaError, Result};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Audio = 0,
    Video = 1,
}

pub trait Egress: Send + Sync {
    /// Sends one unit. `end_of_unit` marks the last unit of an encoded frame.
    fn send(&self, media: MediaType, timestamp_us: u64, data: &[u8], end_of_unit: bool) -> Result<()>;

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Sends every unit of `buffer`. Units sharing one frame get consecutive
/// timestamps starting at the buffer's. Returns the number of units sent.
pub fn send_units(egress: &dyn Egress, media: MediaType, buffer: &EncodedBuffer) -> Result<usize> {
    let count = buffer.units().len();
    for index in 0..count {
        let Some(unit) = buffer.unit(index) else { break };
        let timestamp = buffer.timestamp_us() + index as u64;
        egress.send(media, timestamp, unit, index + 1 == count)?;
    }
    Ok(count)
}

/// Appends each unit to a file as
/// `[media u8][timestamp u64 LE][length u32 LE][end u8][payload]`.
pub struct FileEgress {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl FileEgress {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        info!(path = %path.display(), "File egress opened");
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Egress for FileEgress {
    fn send(&self, media: MediaType, timestamp_us: u64, data: &[u8], end_of_unit: bool) -> Result<()> {
        let length = u32::try_from(data.len())
            .map_err(|_| MediaError::Egress(format!("unit of {} bytes too large", data.len())))?;
        let mut writer = self.writer.lock();
        writer.write_all(&[media as u8])?;
        writer.write_all(&timestamp_us.to_le_bytes())?;
        writer.write_all(&length.to_le_bytes())?;
        writer.write_all(&[end_of_unit as u8])?;
        writer.write_all(data)?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.writer.lock().flush()?;
        Ok(())
    }
}

impl Drop for FileEgress {
    fn drop(&mut self) {
        let _ = self.writer.get_mut().flush();
    }
}

/// One unit captured by [`MemoryEgress`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentUnit {
    pub media: MediaType,
    pub timestamp_us: u64,
    pub data: Vec<u8>,
    pub end_of_unit: bool,
}

/// Keeps every unit in memory.
#[derive(Default)]
pub struct MemoryEgress {
    sent: Mutex<Vec<SentUnit>>,
}

impl MemoryEgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentUnit> {
        self.sent.lock().clone()
    }

    pub fn count(&self, media: MediaType) -> usize {
        self.sent.lock().iter().filter(|u| u.media == media).count()
    }
}

impl Egress for MemoryEgress {
    fn send(&self, media: MediaType, timestamp_us: u64, data: &[u8], end_of_unit: bool) -> Result<()> {
        self.sent.lock().push(SentUnit {
            media,
            timestamp_us,
            data: data.to_vec(),
            end_of_unit,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units_get_consecutive_timestamps() {
        let mut buffer = EncodedBuffer::with_capacity(16);
        buffer.push_unit(&[1, 1]).unwrap();
        buffer.push_unit(&[2]).unwrap();
        buffer.push_unit(&[3, 3, 3]).unwrap();
        buffer.set_timestamp_us(1_000);

        let egress = MemoryEgress::new();
        assert_eq!(send_units(&egress, MediaType::Video, &buffer).unwrap(), 3);

        let sent = egress.sent();
        let stamps: Vec<u64> = sent.iter().map(|u| u.timestamp_us).collect();
        assert_eq!(stamps, vec![1_000, 1_001, 1_002]);
        let ends: Vec<bool> = sent.iter().map(|u| u.end_of_unit).collect();
        assert_eq!(ends, vec![false, false, true]);
        assert_eq!(sent[2].data, vec![3, 3, 3]);
    }

    #[test]
    fn test_empty_buffer_sends_nothing() {
        let egress = MemoryEgress::new();
        let buffer = EncodedBuffer::with_capacity(4);
        assert_eq!(send_units(&egress, MediaType::Audio, &buffer).unwrap(), 0);
        assert!(egress.sent().is_empty());
    }
}
