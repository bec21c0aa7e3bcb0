//! # onair-media
//!
//! Buffers and collaborator seams for the stream and local chains:
//!
//! - [`PcmBuffer`] and [`ToPcm`] turn plugin output into interleaved samples
//! - [`Canvas`], [`FrameRenderer`] and [`VideoFrame`] produce I420 pictures
//! - [`Encoder`] and [`Egress`] are where real codecs and streaming clients plug in
//! - [`WavRecorder`] writes local-mode output

pub mod egress;
pub mod encoder;
pub mod error;
pub mod pcm;
pub mod recorder;
pub mod video;

pub use egress::{send_units, Egress, FileEgress, MediaType, MemoryEgress, SentUnit};
pub use encoder::{EncodedBuffer, Encoder, RawPcmEncoder, RawVideoEncoder};
pub use error::{MediaError, Result};
pub use pcm::{PcmBuffer, ToPcm};
pub use recorder::WavRecorder;
pub use video::{Canvas, FrameRenderer, Rgb, VideoFrame};
