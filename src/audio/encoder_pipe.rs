//! PCM to Opus, re-chunking arbitrary writes into whole codec frames.

use std::time::Duration;

use super::codec::FrameEncoder;
use super::meta::{Codec, Meta};
use super::opus_codec::OpusEncoder;
use super::pipe::{ActiveProducer, ConsumerRef, PassiveConsumer, SampleInfo, forward, out_active};
use crate::error::{Error, Result};

/// Samples per channel in one Opus frame (20 ms at 48 kHz).
pub const SEGMENT_FRAMES: usize = 960;

/// Format and settings used to encode `codec`.
fn profile(codec: Codec) -> Result<(SampleInfo, opus::Application, i32)> {
    match codec {
        Codec::OpusVoice => Ok((SampleInfo::OPUS_VOICE, opus::Application::Voip, 8192 * 2)),
        Codec::OpusMusic => Ok((SampleInfo::OPUS_MUSIC, opus::Application::Audio, 8192 * 4)),
        other => Err(Error::UnsupportedCodec(other)),
    }
}

/// Encodes 16-bit little-endian PCM into Opus packets.
///
/// Input is collected until a whole frame of `packet_size` bytes is available;
/// whatever is left over waits for the next write. There is no flush, so a
/// trailing partial frame is only encoded once more audio arrives.
pub struct EncoderPipe {
    codec: Codec,
    info: SampleInfo,
    packet_size: usize,
    bitrate: i32,
    encoder: Option<Box<dyn FrameEncoder>>,
    not_encoded: Vec<u8>,
    samples: Vec<i16>,
    out: Option<ConsumerRef>,
}

impl EncoderPipe {
    /// Create an encoder backed by native Opus. Only the Opus codecs are
    /// accepted.
    pub fn new(codec: Codec) -> Result<Self> {
        let (info, application, bitrate) = profile(codec)?;
        let encoder = OpusEncoder::new(info, application, bitrate)?;
        Self::with_encoder(codec, Box::new(encoder))
    }

    /// Create an encoder around an already constructed frame encoder.
    pub fn with_encoder(codec: Codec, encoder: Box<dyn FrameEncoder>) -> Result<Self> {
        let (info, _, bitrate) = profile(codec)?;
        let packet_size = SEGMENT_FRAMES * info.bytes_per_sample() * info.channels() as usize;
        Ok(Self {
            codec,
            info,
            packet_size,
            bitrate,
            encoder: Some(encoder),
            not_encoded: Vec::with_capacity(packet_size),
            samples: Vec::with_capacity(packet_size / 2),
            out: None,
        })
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn sample_info(&self) -> SampleInfo {
        self.info
    }

    /// Bytes of PCM per encoded frame.
    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Bytes waiting for the next write to complete a frame.
    pub fn buffered_len(&self) -> usize {
        self.not_encoded.len()
    }

    pub fn bitrate(&self) -> i32 {
        self.bitrate
    }

    pub fn set_bitrate(&mut self, bitrate: i32) -> Result<()> {
        self.native()?.set_bitrate(bitrate)?;
        self.bitrate = bitrate;
        Ok(())
    }

    /// Playback time of `bytes` bytes of input PCM.
    pub fn play_length(&self, bytes: usize) -> Duration {
        self.info.duration_of(bytes)
    }

    /// Drop the native encoder. Later writes fail with [`Error::Disposed`].
    pub fn release(&mut self) {
        self.encoder = None;
        self.not_encoded.clear();
    }

    fn native(&mut self) -> Result<&mut Box<dyn FrameEncoder>> {
        self.encoder.as_mut().ok_or(Error::Disposed {
            what: "EncoderPipe",
        })
    }
}

impl PassiveConsumer for EncoderPipe {
    fn active(&self) -> bool {
        out_active(self.out.as_ref())
    }

    fn write(&mut self, data: &mut [u8], meta: &mut Meta) -> Result<()> {
        self.native()?;
        if self.out.is_none() {
            return Ok(());
        }

        self.not_encoded.extend_from_slice(data);
        let segment_count = self.not_encoded.len() / self.packet_size;
        let segments_end = segment_count * self.packet_size;

        let Self {
            codec,
            packet_size,
            encoder,
            not_encoded,
            samples,
            out,
            ..
        } = self;
        let Some(encoder) = encoder.as_mut() else {
            return Ok(());
        };

        let mut first_error = None;
        for segment in not_encoded[..segments_end].chunks_exact(*packet_size) {
            samples.clear();
            samples.extend(
                segment
                    .chunks_exact(2)
                    .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
            );

            let result = encoder.encode(samples).and_then(|mut packet| {
                let mut packet_meta = meta.clone();
                packet_meta.codec = Some(*codec);
                forward(out.as_ref(), &mut packet, &mut packet_meta)
            });
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        not_encoded.drain(..segments_end);

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl ActiveProducer for EncoderPipe {
    fn out_stream(&self) -> Option<&ConsumerRef> {
        self.out.as_ref()
    }

    fn set_out_stream(&mut self, consumer: Option<ConsumerRef>) {
        self.out = consumer;
    }
}
