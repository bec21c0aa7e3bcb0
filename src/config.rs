//! Engine configuration, loaded from TOML.
//!
//! ```toml
//! buffer_count = 2
//! sampling_rate = 48000
//! sample_length = 0.02
//! width = 640
//! height = 360
//! max_frame_rate = 30.0
//! effect_path = "/usr/lib/vst/synth.so"
//! mode = "stream"
//! ```

use crate::Result;
use onair_core::Error as CoreError;
use onair_vst::Precision;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Block durations the audio codec accepts, in milliseconds.
pub const OPUS_FRAME_DURATIONS_MS: [f64; 9] = [2.5, 5.0, 10.0, 20.0, 40.0, 60.0, 80.0, 100.0, 120.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Plugin, encoders and egress, plus the video chain.
    #[default]
    Stream,
    /// Plugin straight into a WAV file.
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplePrecision {
    #[default]
    Single,
    Double,
}

impl From<SamplePrecision> for Precision {
    fn from(value: SamplePrecision) -> Self {
        match value {
            SamplePrecision::Single => Precision::Single,
            SamplePrecision::Double => Precision::Double,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Buffers pre-allocated per pool.
    pub buffer_count: usize,
    pub sampling_rate: u32,
    /// Seconds of audio per block.
    pub sample_length: f64,
    pub channels: usize,
    pub width: usize,
    pub height: usize,
    /// Bits per second handed to real encoders.
    pub target_bitrate: u32,
    pub max_frame_rate: f64,
    pub intra_frame_interval_us: u64,
    pub effect_path: Option<PathBuf>,
    pub require_instrument: bool,
    pub precision: SamplePrecision,
    pub mode: Mode,
    /// Let a fault in one chain stop the other.
    pub link_chains: bool,
    pub record_path: PathBuf,
    pub egress_path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_count: 2,
            sampling_rate: 48_000,
            sample_length: 0.02,
            channels: 2,
            width: 640,
            height: 360,
            target_bitrate: 2_500_000,
            max_frame_rate: 30.0,
            intra_frame_interval_us: 2_000_000,
            effect_path: None,
            require_instrument: true,
            precision: SamplePrecision::Single,
            mode: Mode::Stream,
            link_chains: false,
            record_path: PathBuf::from("onair.wav"),
            egress_path: PathBuf::from("onair.stream"),
        }
    }
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), CoreError> {
        if self.buffer_count == 0 {
            return Err(CoreError::InvalidConfig("buffer_count must be at least 1".into()));
        }
        if !(8_000..=384_000).contains(&self.sampling_rate) {
            return Err(CoreError::InvalidConfig(format!(
                "sampling_rate {} out of range (8000-384000 Hz)",
                self.sampling_rate
            )));
        }
        let block_ms = self.sample_length * 1000.0;
        if !OPUS_FRAME_DURATIONS_MS
            .iter()
            .any(|&d| (d - block_ms).abs() < 1e-6)
        {
            return Err(CoreError::InvalidConfig(format!(
                "sample_length {}s is not a codec frame duration {:?} ms",
                self.sample_length, OPUS_FRAME_DURATIONS_MS
            )));
        }
        let frames = self.sampling_rate as f64 * self.sample_length;
        if (frames - frames.round()).abs() > 1e-6 {
            return Err(CoreError::InvalidConfig(format!(
                "{} Hz x {}s is not a whole number of frames",
                self.sampling_rate, self.sample_length
            )));
        }
        if self.channels == 0 || self.channels > 8 {
            return Err(CoreError::InvalidConfig(format!(
                "channels {} out of range (1-8)",
                self.channels
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(CoreError::InvalidConfig("picture size must be non-zero".into()));
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(CoreError::InvalidConfig(format!(
                "picture size {}x{} must be even for I420",
                self.width, self.height
            )));
        }
        if !(self.max_frame_rate > 0.0 && self.max_frame_rate <= 240.0) {
            return Err(CoreError::InvalidConfig(format!(
                "max_frame_rate {} out of range (0-240]",
                self.max_frame_rate
            )));
        }
        if self.target_bitrate == 0 {
            return Err(CoreError::InvalidConfig("target_bitrate must be non-zero".into()));
        }
        if self.intra_frame_interval_us == 0 {
            return Err(CoreError::InvalidConfig(
                "intra_frame_interval_us must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Frames per audio block.
    pub fn block_size(&self) -> usize {
        (self.sampling_rate as f64 * self.sample_length).round() as usize
    }

    pub fn audio_interval(&self) -> Duration {
        Duration::from_secs_f64(self.sample_length)
    }

    pub fn video_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.max_frame_rate)
    }

    /// Bytes needed for one raw-encoded audio block.
    pub fn audio_payload_capacity(&self) -> usize {
        self.block_size() * self.channels * 4
    }

    /// Bytes needed for one raw I420 frame.
    pub fn video_payload_capacity(&self) -> usize {
        self.width * self.height * 3 / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.block_size(), 960);
        assert_eq!(config.audio_interval(), Duration::from_millis(20));
        assert_eq!(config.audio_payload_capacity(), 960 * 2 * 4);
        assert_eq!(config.video_payload_capacity(), 640 * 360 * 3 / 2);
    }

    #[test]
    fn test_every_codec_duration_accepted_at_48k() {
        for ms in OPUS_FRAME_DURATIONS_MS {
            let config = EngineConfig {
                sample_length: ms / 1000.0,
                ..EngineConfig::default()
            };
            assert!(config.validate().is_ok(), "{ms} ms rejected");
        }
    }

    #[test]
    fn test_rejects_non_codec_duration() {
        let config = EngineConfig {
            sample_length: 0.015,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(CoreError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_fractional_block() {
        let config = EngineConfig {
            sampling_rate: 44_100,
            sample_length: 0.0025,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_odd_picture() {
        let config = EngineConfig {
            width: 641,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_buffers_and_bad_rate() {
        let zero = EngineConfig {
            buffer_count: 0,
            ..EngineConfig::default()
        };
        assert!(zero.validate().is_err());
        let low = EngineConfig {
            sampling_rate: 4_000,
            ..EngineConfig::default()
        };
        assert!(low.validate().is_err());
    }

    #[test]
    fn test_parses_toml() {
        let config = EngineConfig::from_toml(
            r#"
            sampling_rate = 44100
            sample_length = 0.01
            mode = "local"
            precision = "double"
            effect_path = "/plugins/synth.so"
            "#,
        )
        .unwrap();
        assert_eq!(config.block_size(), 441);
        assert_eq!(config.mode, Mode::Local);
        assert_eq!(Precision::from(config.precision), Precision::Double);
        assert_eq!(config.effect_path, Some(PathBuf::from("/plugins/synth.so")));
        assert_eq!(config.buffer_count, 2);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(matches!(
            EngineConfig::from_toml("bogus = 1"),
            Err(crate::Error::ConfigParse(_))
        ));
    }
}
