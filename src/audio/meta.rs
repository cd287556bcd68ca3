//! Per-chunk metadata carried alongside audio through the pipe graph.

use serde::Deserialize;
use std::sync::Arc;

pub type ClientId = u16;
pub type ChannelId = u64;

/// Voice codecs known to the TeamSpeak protocol.
///
/// Only the Opus variants can be encoded or decoded; the rest exist so that
/// inbound packets can be tagged and skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Codec {
    Raw,
    SpeexNarrowband,
    SpeexWideband,
    SpeexUltraWideband,
    CeltMono,
    OpusVoice,
    OpusMusic,
}

impl Codec {
    /// Map a wire codec tag. `Raw` has no tag.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Codec::SpeexNarrowband),
            1 => Some(Codec::SpeexWideband),
            2 => Some(Codec::SpeexUltraWideband),
            3 => Some(Codec::CeltMono),
            4 => Some(Codec::OpusVoice),
            5 => Some(Codec::OpusMusic),
            _ => None,
        }
    }

    pub fn tag(self) -> Option<u8> {
        match self {
            Codec::Raw => None,
            Codec::SpeexNarrowband => Some(0),
            Codec::SpeexWideband => Some(1),
            Codec::SpeexUltraWideband => Some(2),
            Codec::CeltMono => Some(3),
            Codec::OpusVoice => Some(4),
            Codec::OpusMusic => Some(5),
        }
    }

    pub fn is_opus(self) -> bool {
        matches!(self, Codec::OpusVoice | Codec::OpusMusic)
    }
}

/// How outbound audio is addressed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendMode {
    #[default]
    None,
    Voice,
    Whisper,
    WhisperGroup,
}

/// Which kind of group a group whisper is addressed to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupWhisperType {
    #[default]
    ServerGroup,
    ChannelGroup,
    ChannelCommander,
    AllClients,
}

/// Which channels a group whisper reaches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupWhisperTarget {
    #[default]
    AllChannels,
    CurrentChannel,
    ParentChannel,
    AllParentChannel,
    ChannelFamily,
    CompleteChannelFamily,
    Subchannels,
}

/// Immutable routing descriptor. Id lists are shared, cloning one is a
/// reference count bump.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SendTarget {
    #[default]
    None,
    Voice,
    Whisper {
        channel_ids: Arc<[ChannelId]>,
        client_ids: Arc<[ClientId]>,
    },
    WhisperGroup {
        kind: GroupWhisperType,
        target: GroupWhisperTarget,
        target_id: u64,
    },
}

impl SendTarget {
    pub fn mode(&self) -> SendMode {
        match self {
            SendTarget::None => SendMode::None,
            SendTarget::Voice => SendMode::Voice,
            SendTarget::Whisper { .. } => SendMode::Whisper,
            SendTarget::WhisperGroup { .. } => SendMode::WhisperGroup,
        }
    }
}

/// Metadata filled in on receive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetaIn {
    pub sender_id: ClientId,
    pub is_whisper: bool,
}

/// Routing filled in before send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetaOut {
    pub send_mode: SendMode,
    pub channel_ids: Option<Arc<[ChannelId]>>,
    pub client_ids: Option<Arc<[ClientId]>>,
    pub group_whisper_type: GroupWhisperType,
    pub group_whisper_target: GroupWhisperTarget,
    pub target_id: u64,
}

/// Metadata travelling with one chunk. Each stage may read `inbound` and
/// fill `outbound`; a value is never shared between concurrent writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Meta {
    pub codec: Option<Codec>,
    pub inbound: MetaIn,
    pub outbound: MetaOut,
}

impl Meta {
    pub fn with_codec(codec: Codec) -> Self {
        Self {
            codec: Some(codec),
            ..Self::default()
        }
    }

    pub fn from_sender(sender_id: ClientId) -> Self {
        Self {
            inbound: MetaIn {
                sender_id,
                is_whisper: false,
            },
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_tags_round_trip() {
        for tag in 0..=5u8 {
            let codec = Codec::from_tag(tag).unwrap();
            assert_eq!(codec.tag(), Some(tag));
        }
        assert_eq!(Codec::from_tag(6), None);
        assert_eq!(Codec::Raw.tag(), None);
    }

    #[test]
    fn test_only_opus_is_opus() {
        assert!(Codec::OpusVoice.is_opus());
        assert!(Codec::OpusMusic.is_opus());
        assert!(!Codec::CeltMono.is_opus());
        assert!(!Codec::Raw.is_opus());
    }

    #[test]
    fn test_send_target_mode() {
        assert_eq!(SendTarget::None.mode(), SendMode::None);
        assert_eq!(SendTarget::Voice.mode(), SendMode::Voice);
        let whisper = SendTarget::Whisper {
            channel_ids: Arc::from(vec![1u64]),
            client_ids: Arc::from(Vec::<ClientId>::new()),
        };
        assert_eq!(whisper.mode(), SendMode::Whisper);
    }

    #[test]
    fn test_cloned_whisper_target_shares_lists() {
        let channels: Arc<[ChannelId]> = Arc::from(vec![7u64, 8]);
        let target = SendTarget::Whisper {
            channel_ids: channels.clone(),
            client_ids: Arc::from(vec![3u16]),
        };
        let copy = target.clone();
        match copy {
            SendTarget::Whisper { channel_ids, .. } => {
                assert!(Arc::ptr_eq(&channel_ids, &channels))
            }
            other => panic!("unexpected target {:?}", other),
        }
    }
}
