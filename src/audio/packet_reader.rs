//! Strips the voice packet header from inbound network payloads.
//!
//! Layout: `[0..2)` sequence, `[2..4)` sender id (big-endian), `[4]` codec
//! tag, `[5..]` Opus payload. The sequence number is read past; packets are
//! neither reordered nor de-duplicated.

use super::meta::{ClientId, Codec, Meta};
use super::pipe::{ActiveProducer, ConsumerRef, PassiveConsumer, forward, out_active};
use crate::error::Result;

pub const HEADER_LEN: usize = 5;

#[derive(Default)]
pub struct PacketReader {
    out: Option<ConsumerRef>,
}

impl PacketReader {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PassiveConsumer for PacketReader {
    fn active(&self) -> bool {
        out_active(self.out.as_ref())
    }

    fn write(&mut self, data: &mut [u8], meta: &mut Meta) -> Result<()> {
        if data.len() < HEADER_LEN {
            log::trace!("Dropping short voice packet ({} bytes)", data.len());
            return Ok(());
        }

        meta.inbound.sender_id = ClientId::from_be_bytes([data[2], data[3]]);
        meta.codec = Codec::from_tag(data[4]);
        forward(self.out.as_ref(), &mut data[HEADER_LEN..], meta)
    }
}

impl ActiveProducer for PacketReader {
    fn out_stream(&self) -> Option<&ConsumerRef> {
        self.out.as_ref()
    }

    fn set_out_stream(&mut self, consumer: Option<ConsumerRef>) {
        self.out = consumer;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pipe::{chain, lock, shared};
    use crate::audio::sink::CollectorSink;

    #[test]
    fn test_header_is_stripped() {
        let reader = shared(PacketReader::new());
        let sink = chain(&reader, shared(CollectorSink::new()));

        let mut packet = vec![0x00, 0x01, 0x00, 0x2A, 0x04, 0xDE, 0xAD];
        lock(&reader).write(&mut packet, &mut Meta::default()).unwrap();

        assert_eq!(lock(&sink).chunks(), vec![vec![0xDE, 0xAD]]);
        let metas = lock(&sink).metas();
        let meta = &metas[0];
        assert_eq!(meta.inbound.sender_id, 42);
        assert_eq!(meta.codec, Some(Codec::OpusVoice));
    }

    #[test]
    fn test_sender_is_big_endian() {
        let reader = shared(PacketReader::new());
        let sink = chain(&reader, shared(CollectorSink::new()));
        let mut packet = vec![0, 0, 0x12, 0x34, 5];
        lock(&reader).write(&mut packet, &mut Meta::default()).unwrap();

        let metas = lock(&sink).metas();
        let meta = &metas[0];
        assert_eq!(meta.inbound.sender_id, 0x1234);
        assert_eq!(meta.codec, Some(Codec::OpusMusic));
        assert!(lock(&sink).chunks()[0].is_empty());
    }

    #[test]
    fn test_short_packets_are_dropped() {
        let reader = shared(PacketReader::new());
        let sink = chain(&reader, shared(CollectorSink::new()));
        for len in 0..HEADER_LEN {
            lock(&reader)
                .write(&mut vec![4u8; len], &mut Meta::default())
                .unwrap();
        }
        assert!(lock(&sink).is_empty());
    }

    #[test]
    fn test_unknown_tag_and_whisper_flag() {
        let reader = shared(PacketReader::new());
        let sink = chain(&reader, shared(CollectorSink::new()));
        let mut meta = Meta::default();
        meta.inbound.is_whisper = true;
        lock(&reader).write(&mut vec![0, 0, 0, 1, 99, 7], &mut meta).unwrap();

        let metas = lock(&sink).metas();
        let meta = &metas[0];
        assert_eq!(meta.codec, None);
        assert!(meta.inbound.is_whisper);
    }
}
