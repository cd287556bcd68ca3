use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::audio::{ChannelId, ClientId, Codec, GroupWhisperTarget, GroupWhisperType, SendMode, SendTarget};
use crate::error::Result;

/// Relay configuration, read from a TOML file. Every field has a default, so
/// an empty file is valid.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub routing: RoutingConfig,
    pub network: NetworkConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// `opus_voice` or `opus_music`
    pub send_codec: Codec,
    /// Overrides the codec's default bitrate (bits/s)
    pub bitrate: Option<i32>,
    pub volume: f32,
    pub tick_interval_ms: u64,
    pub buffer_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub mode: SendMode,
    pub channel_ids: Vec<ChannelId>,
    pub client_ids: Vec<ClientId>,
    pub group_type: GroupWhisperType,
    pub group_target: GroupWhisperTarget,
    pub target_id: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub bind: SocketAddr,
    pub remote: SocketAddr,
    /// Sender id written into outbound packet headers
    pub client_id: ClientId,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub name: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            send_codec: Codec::OpusMusic,
            bitrate: None,
            volume: 1.0,
            tick_interval_ms: 5,
            buffer_ms: 20,
        }
    }
}

impl AudioConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn buffer_length(&self) -> Duration {
        Duration::from_millis(self.buffer_ms)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 9987)),
            remote: SocketAddr::from(([127, 0, 0, 1], 9988)),
            client_id: 0,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: "audio".to_string(),
        }
    }
}

impl RoutingConfig {
    /// Routing descriptor for the static meta stage.
    pub fn to_send_target(&self) -> SendTarget {
        match self.mode {
            SendMode::None => SendTarget::None,
            SendMode::Voice => SendTarget::Voice,
            SendMode::Whisper => SendTarget::Whisper {
                channel_ids: self.channel_ids.as_slice().into(),
                client_ids: self.client_ids.as_slice().into(),
            },
            SendMode::WhisperGroup => SendTarget::WhisperGroup {
                kind: self.group_type,
                target: self.group_target,
                target_id: self.target_id,
            },
        }
    }
}

impl Config {
    /// Load configuration from a TOML file. Missing fields use defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }
}
