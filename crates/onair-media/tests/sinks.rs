//! File-backed sinks: the WAV recorder and the file egress.

use onair_media::{
    send_units, EncodedBuffer, Encoder, FileEgress, MediaType, PcmBuffer, RawPcmEncoder,
    WavRecorder,
};
use std::io::Read;
use tempfile::tempdir;

fn ramp(frames: usize) -> PcmBuffer {
    let mut pcm = PcmBuffer::new(2, frames);
    pcm.set_frames(frames);
    for (i, s) in pcm.samples_mut().iter_mut().enumerate() {
        *s = (i / 2) as f32 / frames as f32;
    }
    pcm
}

#[test]
fn test_wav_recorder_writes_float_stereo() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("take.wav");

    let mut recorder = WavRecorder::create(&path, 48_000.0, 2).unwrap();
    for _ in 0..5 {
        assert_eq!(recorder.write(&ramp(960)).unwrap(), 960);
    }
    assert_eq!(recorder.finalize().unwrap(), 4_800);

    let mut reader = hound::WavReader::open(&path).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.channels, 2);
    assert_eq!(spec.sample_rate, 48_000);
    assert_eq!(spec.sample_format, hound::SampleFormat::Float);
    assert_eq!(reader.duration(), 4_800);

    let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
    approx::assert_relative_eq!(samples[2], 1.0 / 960.0);
    approx::assert_relative_eq!(samples[3], 1.0 / 960.0);
}

#[test]
fn test_wav_recorder_rejects_channel_mismatch() {
    let dir = tempdir().unwrap();
    let mut recorder = WavRecorder::create(dir.path().join("mono.wav"), 44_100.0, 1).unwrap();
    assert!(recorder.write(&ramp(16)).is_err());
    assert_eq!(recorder.frames_written(), 0);
}

#[test]
fn test_dropped_recorder_is_still_readable() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("dropped.wav");
    {
        let mut recorder = WavRecorder::create(&path, 48_000.0, 2).unwrap();
        recorder.write(&ramp(100)).unwrap();
    }
    assert_eq!(hound::WavReader::open(&path).unwrap().duration(), 100);
}

#[test]
fn test_file_egress_record_layout() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("egress.bin");

    let mut encoded = EncodedBuffer::with_capacity(1 << 14);
    RawPcmEncoder.encode(&ramp(4), &mut encoded).unwrap();
    encoded.set_timestamp_us(42);

    {
        let egress = FileEgress::create(&path).unwrap();
        assert_eq!(send_units(&egress, MediaType::Audio, &encoded).unwrap(), 1);
        onair_media::Egress::flush(&egress).unwrap();
    }

    let mut bytes = Vec::new();
    std::fs::File::open(&path)
        .unwrap()
        .read_to_end(&mut bytes)
        .unwrap();
    assert_eq!(bytes.len(), 14 + 32);
    assert_eq!(bytes[0], MediaType::Audio as u8);
    assert_eq!(u64::from_le_bytes(bytes[1..9].try_into().unwrap()), 42);
    assert_eq!(u32::from_le_bytes(bytes[9..13].try_into().unwrap()), 32);
    assert_eq!(bytes[13], 1);
    assert_eq!(&bytes[14..], encoded.as_bytes());
}
