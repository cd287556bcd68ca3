//! Opus to PCM, one native decoder per remote sender.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::time::{Duration, Instant};

use super::codec::FrameDecoder;
use super::meta::{ClientId, Codec, Meta};
use super::opus_codec::OpusDecoder;
use super::pipe::{ActiveProducer, ConsumerRef, PassiveConsumer, SampleInfo, forward, out_active};
use crate::error::{Error, Result};

/// Builds a frame decoder for one of the Opus codecs.
pub type DecoderFactory = Box<dyn Fn(Codec) -> Result<Box<dyn FrameDecoder>> + Send>;

fn native_decoder(codec: Codec) -> Result<Box<dyn FrameDecoder>> {
    let info = match codec {
        Codec::OpusVoice => SampleInfo::OPUS_VOICE,
        Codec::OpusMusic => SampleInfo::OPUS_MUSIC,
        other => return Err(Error::UnsupportedCodec(other)),
    };
    Ok(Box::new(OpusDecoder::new(info)?))
}

struct SenderDecoder {
    decoder: Box<dyn FrameDecoder>,
    codec: Codec,
    last_used: Instant,
}

/// Decodes inbound Opus packets to 48 kHz stereo 16-bit PCM.
///
/// Every sender gets its own decoder so interleaved streams do not corrupt
/// each other's state. Voice (mono) output is up-mixed to stereo so everything
/// downstream sees a single format. Packets without a codec, or with one that
/// is not Opus, are skipped.
pub struct DecoderPipe {
    decoders: HashMap<ClientId, SenderDecoder>,
    factory: DecoderFactory,
    decoded: Vec<u8>,
    released: bool,
    out: Option<ConsumerRef>,
}

impl DecoderPipe {
    pub fn new() -> Self {
        Self::with_factory(Box::new(native_decoder))
    }

    pub fn with_factory(factory: DecoderFactory) -> Self {
        Self {
            decoders: HashMap::new(),
            factory,
            decoded: Vec::with_capacity(4096 * 2),
            released: false,
            out: None,
        }
    }

    /// Output format; the same for every sender.
    pub fn sample_info(&self) -> SampleInfo {
        SampleInfo::OPUS_MUSIC
    }

    /// Number of senders with live decoder state.
    pub fn decoder_count(&self) -> usize {
        self.decoders.len()
    }

    /// Drop the decoder state of one sender, e.g. when they leave.
    pub fn forget(&mut self, sender: ClientId) -> bool {
        self.decoders.remove(&sender).is_some()
    }

    /// Drop the state of every sender not heard from for `idle` and return
    /// their ids.
    pub fn forget_idle(&mut self, idle: Duration) -> Vec<ClientId> {
        let mut gone = Vec::new();
        self.decoders.retain(|sender, state| {
            let keep = state.last_used.elapsed() < idle;
            if !keep {
                gone.push(*sender);
            }
            keep
        });
        gone
    }

    /// Drop every native decoder. Later writes fail with [`Error::Disposed`].
    pub fn release(&mut self) {
        self.decoders.clear();
        self.released = true;
    }

    fn decoder_for(&mut self, sender: ClientId, codec: Codec) -> Result<&mut Box<dyn FrameDecoder>> {
        if let Some(state) = self.decoders.get(&sender)
            && state.codec != codec
        {
            log::debug!("Sender {} switched to {:?}, replacing decoder", sender, codec);
            self.decoders.remove(&sender);
        }

        let factory = &self.factory;
        let state = match self.decoders.entry(sender) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(SenderDecoder {
                decoder: factory(codec)?,
                codec,
                last_used: Instant::now(),
            }),
        };
        state.last_used = Instant::now();
        Ok(&mut state.decoder)
    }
}

impl Default for DecoderPipe {
    fn default() -> Self {
        Self::new()
    }
}

impl PassiveConsumer for DecoderPipe {
    fn active(&self) -> bool {
        out_active(self.out.as_ref())
    }

    fn write(&mut self, data: &mut [u8], meta: &mut Meta) -> Result<()> {
        if self.released {
            return Err(Error::Disposed {
                what: "DecoderPipe",
            });
        }
        if self.out.is_none() {
            return Ok(());
        }
        let codec = match meta.codec {
            Some(codec) if codec.is_opus() => codec,
            _ => return Ok(()),
        };

        let pcm = self.decoder_for(meta.inbound.sender_id, codec)?.decode(data)?;
        if pcm.is_empty() {
            return Ok(());
        }

        self.decoded.clear();
        if codec == Codec::OpusVoice {
            for sample in pcm {
                let bytes = sample.to_le_bytes();
                self.decoded.extend_from_slice(&bytes);
                self.decoded.extend_from_slice(&bytes);
            }
        } else {
            self.decoded
                .extend(pcm.into_iter().flat_map(i16::to_le_bytes));
        }

        forward(self.out.as_ref(), &mut self.decoded, meta)
    }
}

impl ActiveProducer for DecoderPipe {
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
    use crate::audio::encoder_pipe::EncoderPipe;
    use crate::audio::pipe::{Shared, chain, lock, shared};
    use crate::audio::sink::CollectorSink;
    use std::sync::{Arc, Mutex};

    /// Decodes a packet into its bytes as samples; an empty packet into nothing.
    struct EchoDecoder;

    impl FrameDecoder for EchoDecoder {
        fn decode(&mut self, data: &[u8]) -> Result<Vec<i16>> {
            Ok(data.iter().map(|b| *b as i16).collect())
        }
    }

    fn counting_factory(created: Arc<Mutex<Vec<Codec>>>) -> DecoderFactory {
        Box::new(move |codec| {
            lock(&created).push(codec);
            Ok(Box::new(EchoDecoder) as Box<dyn FrameDecoder>)
        })
    }

    fn decoder_with_sink() -> (Shared<DecoderPipe>, Shared<CollectorSink>, Arc<Mutex<Vec<Codec>>>) {
        let created = Arc::new(Mutex::new(Vec::new()));
        let pipe = shared(DecoderPipe::with_factory(counting_factory(created.clone())));
        let sink = chain(&pipe, shared(CollectorSink::new()));
        (pipe, sink, created)
    }

    fn meta(sender: ClientId, codec: Option<Codec>) -> Meta {
        let mut meta = Meta::from_sender(sender);
        meta.codec = codec;
        meta
    }

    #[test]
    fn test_voice_is_upmixed_to_stereo() {
        let (pipe, sink, _) = decoder_with_sink();
        lock(&pipe)
            .write(&mut vec![1, 2], &mut meta(1, Some(Codec::OpusVoice)))
            .unwrap();
        assert_eq!(lock(&sink).chunks(), vec![vec![1, 0, 1, 0, 2, 0, 2, 0]]);
    }

    #[test]
    fn test_music_passes_through_interleaved() {
        let (pipe, sink, _) = decoder_with_sink();
        lock(&pipe)
            .write(&mut vec![1, 2], &mut meta(1, Some(Codec::OpusMusic)))
            .unwrap();
        assert_eq!(lock(&sink).chunks(), vec![vec![1, 0, 2, 0]]);
    }

    #[test]
    fn test_one_decoder_per_sender() {
        let (pipe, _sink, created) = decoder_with_sink();
        for sender in [1, 2, 1, 2, 3] {
            lock(&pipe)
                .write(&mut vec![9], &mut meta(sender, Some(Codec::OpusVoice)))
                .unwrap();
        }
        assert_eq!(lock(&pipe).decoder_count(), 3);
        assert_eq!(lock(&created).len(), 3);
    }

    #[test]
    fn test_codec_switch_replaces_decoder() {
        let (pipe, _sink, created) = decoder_with_sink();
        lock(&pipe)
            .write(&mut vec![9], &mut meta(5, Some(Codec::OpusVoice)))
            .unwrap();
        lock(&pipe)
            .write(&mut vec![9], &mut meta(5, Some(Codec::OpusMusic)))
            .unwrap();
        assert_eq!(lock(&pipe).decoder_count(), 1);
        assert_eq!(*lock(&created), vec![Codec::OpusVoice, Codec::OpusMusic]);
    }

    #[test]
    fn test_unknown_or_missing_codec_is_ignored() {
        let (pipe, sink, created) = decoder_with_sink();
        lock(&pipe).write(&mut vec![9], &mut meta(1, None)).unwrap();
        lock(&pipe)
            .write(&mut vec![9], &mut meta(1, Some(Codec::SpeexWideband)))
            .unwrap();
        assert!(lock(&sink).is_empty());
        assert!(lock(&created).is_empty());
    }

    #[test]
    fn test_lost_packet_forwards_nothing() {
        let (pipe, sink, _) = decoder_with_sink();
        lock(&pipe)
            .write(&mut [], &mut meta(1, Some(Codec::OpusVoice)))
            .unwrap();
        assert!(lock(&sink).is_empty());
    }

    #[test]
    fn test_forget_and_release() {
        let (pipe, _sink, _) = decoder_with_sink();
        lock(&pipe)
            .write(&mut vec![9], &mut meta(4, Some(Codec::OpusVoice)))
            .unwrap();
        assert!(lock(&pipe).forget(4));
        assert!(!lock(&pipe).forget(4));

        lock(&pipe).release();
        let result = lock(&pipe).write(&mut vec![9], &mut meta(4, Some(Codec::OpusVoice)));
        assert!(matches!(result, Err(Error::Disposed { what: "DecoderPipe" })));
    }

    #[test]
    fn test_forget_idle_drops_only_quiet_senders() {
        let (pipe, _sink, _) = decoder_with_sink();
        lock(&pipe)
            .write(&mut vec![9], &mut meta(1, Some(Codec::OpusVoice)))
            .unwrap();
        std::thread::sleep(Duration::from_millis(40));
        lock(&pipe)
            .write(&mut vec![9], &mut meta(2, Some(Codec::OpusVoice)))
            .unwrap();

        let gone = lock(&pipe).forget_idle(Duration::from_millis(20));
        assert_eq!(gone, vec![1]);
        assert_eq!(lock(&pipe).decoder_count(), 1);
        assert!(lock(&pipe).forget_idle(Duration::from_secs(60)).is_empty());
    }

    #[test]
    fn test_real_opus_round_trip_format() {
        let encoder = shared(EncoderPipe::new(Codec::OpusVoice).unwrap());
        let decoder = chain(&encoder, shared(DecoderPipe::new()));
        let sink = chain(&decoder, shared(CollectorSink::new()));

        let mut meta = Meta::from_sender(7);
        lock(&encoder).write(&mut vec![0u8; 1920 * 2], &mut meta).unwrap();

        let chunks = lock(&sink).chunks();
        assert_eq!(chunks.len(), 2);
        // 960 mono samples become 960 stereo frames
        assert!(chunks.iter().all(|chunk| chunk.len() == 960 * 4));
    }

    #[test]
    fn test_real_opus_lost_packet_is_silence_not_error() {
        let pipe = shared(DecoderPipe::new());
        let sink = chain(&pipe, shared(CollectorSink::new()));
        lock(&pipe)
            .write(&mut [], &mut meta(1, Some(Codec::OpusMusic)))
            .unwrap();
        assert!(lock(&sink).is_empty());
    }
}
