//! Error types for tsaudio.

use crate::audio::Codec;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Construction errors
    #[error("Unsupported codec: {0:?}")]
    UnsupportedCodec(Codec),

    #[error("Invalid sample info: {message}")]
    InvalidSampleInfo { message: String },

    // Native codec errors
    #[error("Opus encode failed: {message}")]
    Encode { message: String },

    #[error("Opus decode failed: {message}")]
    Decode { message: String },

    #[error("{what} used after it was released")]
    Disposed { what: &'static str },

    // Scheduler errors
    #[error("Not running on the scheduler's own thread")]
    NotOwnThread,

    #[error("Scheduler is closed")]
    SchedulerClosed,

    // Configuration / network
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
