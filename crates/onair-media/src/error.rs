//! Error types for onair-media.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("{codec} encoder failed: {reason}")]
    Encode { codec: &'static str, reason: String },

    #[error("Output buffer too small: need {needed} bytes, have {capacity}")]
    OutputTooSmall { needed: usize, capacity: usize },

    #[error("Format mismatch: {0}")]
    Format(String),

    #[error("Egress failed: {0}")]
    Egress(String),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MediaError>;

impl From<MediaError> for onair_core::Error {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::Encode { .. } | MediaError::OutputTooSmall { .. } | MediaError::Format(_) => {
                onair_core::Error::Encode(err.to_string())
            }
            MediaError::Egress(_) | MediaError::Wav(_) => onair_core::Error::Egress(err.to_string()),
            MediaError::Io(e) => onair_core::Error::Io(e),
        }
    }
}
