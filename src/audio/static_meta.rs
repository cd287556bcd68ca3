//! Stamps outbound routing onto every chunk.

use std::sync::Arc;

use super::meta::{
    ChannelId, ClientId, GroupWhisperTarget, GroupWhisperType, Meta, SendMode, SendTarget,
};
use super::pipe::{ActiveProducer, ConsumerRef, PassiveConsumer, forward, out_active};
use crate::error::Result;

/// Holds one routing descriptor and copies it into `meta.outbound`.
///
/// While the target is [`SendTarget::None`] nothing is forwarded.
#[derive(Default)]
pub struct StaticMetaPipe {
    target: SendTarget,
    out: Option<ConsumerRef>,
}

impl StaticMetaPipe {
    pub fn new(target: SendTarget) -> Self {
        Self { target, out: None }
    }

    pub fn send_mode(&self) -> SendMode {
        self.target.mode()
    }

    pub fn target(&self) -> &SendTarget {
        &self.target
    }

    pub fn set_target(&mut self, target: SendTarget) {
        self.target = target;
    }

    pub fn set_none(&mut self) {
        self.target = SendTarget::None;
    }

    pub fn set_voice(&mut self) {
        self.target = SendTarget::Voice;
    }

    pub fn set_whisper(&mut self, channel_ids: Vec<ChannelId>, client_ids: Vec<ClientId>) {
        self.target = SendTarget::Whisper {
            channel_ids: Arc::from(channel_ids),
            client_ids: Arc::from(client_ids),
        };
    }

    pub fn set_whisper_group(
        &mut self,
        kind: GroupWhisperType,
        target: GroupWhisperTarget,
        target_id: u64,
    ) {
        self.target = SendTarget::WhisperGroup {
            kind,
            target,
            target_id,
        };
    }
}

impl PassiveConsumer for StaticMetaPipe {
    fn active(&self) -> bool {
        out_active(self.out.as_ref())
    }

    fn write(&mut self, data: &mut [u8], meta: &mut Meta) -> Result<()> {
        if self.out.is_none() || self.target == SendTarget::None {
            return Ok(());
        }

        let routing = &mut meta.outbound;
        routing.send_mode = self.target.mode();
        match &self.target {
            SendTarget::None | SendTarget::Voice => {}
            SendTarget::Whisper {
                channel_ids,
                client_ids,
            } => {
                routing.channel_ids = Some(channel_ids.clone());
                routing.client_ids = Some(client_ids.clone());
            }
            SendTarget::WhisperGroup {
                kind,
                target,
                target_id,
            } => {
                routing.group_whisper_type = *kind;
                routing.group_whisper_target = *target;
                routing.target_id = *target_id;
            }
        }

        forward(self.out.as_ref(), data, meta)
    }
}

impl ActiveProducer for StaticMetaPipe {
    fn out_stream(&self) -> Option<&ConsumerRef> {
        self.out.as_ref()
    }

    fn set_out_stream(&mut self, consumer: Option<ConsumerRef>) {
        self.out = consumer;
    }
}
