//! Centralized error type for the onair umbrella crate.
//!
//! Wraps the subsystem errors so `?` propagates across crate boundaries.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] onair_core::Error),

    #[error("Plugin: {0}")]
    Plugin(#[from] onair_vst::VstError),

    #[error("Media: {0}")]
    Media(#[from] onair_media::MediaError),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Engine is already running")]
    AlreadyStarted,

    #[error("Engine is not running")]
    NotRunning,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
