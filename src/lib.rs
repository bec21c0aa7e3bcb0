//! # onair - real-time plugin-driven A/V production engine
//!
//! Hosts a VST2 instrument, drives it at fixed block intervals and routes
//! its audio plus a generated video feed through encoders to an egress.
//!
//! ## Architecture
//!
//! onair is an umbrella crate that coordinates:
//! - **onair-core** - clock, pacer, buffer pools, stages and the orchestrator
//! - **onair-midi** - timestamped MIDI events, queues and note tracking
//! - **onair-vst** - the VST2 host (AudioMaster, Effect, event marshalling)
//! - **onair-media** - PCM/video buffers, encoder and egress seams, WAV recording
//!
//! ## Quick Start
//!
//! ```ignore
//! use onair::prelude::*;
//!
//! let config = EngineConfig::load("onair.toml")?;
//! let mut engine = OnAirEngine::builder(config).build()?;
//! engine.start()?;
//!
//! let midi = engine.midi_sender();
//! midi.send(MidiEvent::note_on(engine.clock().now_us(), 0, 60, 100))?;
//!
//! let report = engine.stop()?;
//! assert!(report.is_clean());
//! ```

pub mod config;
pub mod engine;
pub mod error;

pub use onair_core as core;
pub use onair_media as media;
pub use onair_midi as midi;
pub use onair_vst as vst;

pub use config::{EngineConfig, Mode, SamplePrecision};
pub use engine::{OnAirEngine, OnAirEngineBuilder};
pub use error::{Error, Result};

pub mod prelude {
    pub use crate::config::{EngineConfig, Mode, SamplePrecision};
    pub use crate::engine::{OnAirEngine, OnAirEngineBuilder};
    pub use crate::error::{Error, Result};

    pub use onair_core::{
        BufferPool, CancelToken, Chain, IntervalPacer, MonotonicClock, NativeMemoryBlock,
        Orchestrator, RunReport, Stage, StageQueue,
    };
    pub use onair_media::{
        Egress, EncodedBuffer, Encoder, FileEgress, FrameRenderer, MediaType, PcmBuffer,
        VideoFrame,
    };
    pub use onair_midi::{midi_channel, MidiEvent, MidiSender, NoteTracker};
    pub use onair_vst::{AudioMaster, EffectHandle, EffectOptions, Precision, VstBuffer};
}
