//! tsaudio - Real-time voice transport for TeamSpeak clients
//!
//! A graph of small audio stages (framing, Opus, fan-out, gain, pacing)
//! driven by a single dedicated scheduler thread.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

pub mod audio;
pub mod config;
pub mod error;
pub mod net_bridge;
pub mod scheduler;

pub use error::{Error, Result};
