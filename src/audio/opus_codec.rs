//! Opus encoder/decoder wrappers over the native library.
//!
//! Both own their native state and release it on drop. `release` frees it
//! early; any later call fails with [`Error::Disposed`].

use super::codec::{FrameDecoder, FrameEncoder};
use super::pipe::SampleInfo;
use crate::error::{Error, Result};

// https://tools.ietf.org/html/rfc6716#section-3.2.1
const MAX_ENCODED_SIZE: usize = 255 * 4 + 255;

// 120 ms at 48 kHz, the longest frame Opus produces
const MAX_FRAME_SAMPLES: usize = 5760;

fn check_opus_format(info: &SampleInfo) -> Result<opus::Channels> {
    if !matches!(info.sample_rate(), 8000 | 12000 | 16000 | 24000 | 48000) {
        return Err(Error::InvalidSampleInfo {
            message: format!("Opus cannot run at {} Hz", info.sample_rate()),
        });
    }
    if info.bits_per_sample() != 16 {
        return Err(Error::InvalidSampleInfo {
            message: "Opus pipes carry 16-bit PCM".to_string(),
        });
    }
    Ok(if info.channels() == 1 {
        opus::Channels::Mono
    } else {
        opus::Channels::Stereo
    })
}

// ======================== Opus Encoder ========================

pub struct OpusEncoder {
    encoder: Option<opus::Encoder>,
    encoded: Vec<u8>,
}

impl OpusEncoder {
    /// Create a new Opus encoder.
    ///
    /// * `info`        - Input PCM format (must be 16-bit at an Opus rate)
    /// * `application` - `Voip` for speech, `Audio` for music
    /// * `bitrate`     - Bitrate in bits/s (e.g. 16384)
    pub fn new(info: SampleInfo, application: opus::Application, bitrate: i32) -> Result<Self> {
        let channels = check_opus_format(&info)?;
        let mut encoder = opus::Encoder::new(info.sample_rate(), channels, application)
            .map_err(|e| Error::Encode {
                message: e.to_string(),
            })?;
        encoder
            .set_bitrate(opus::Bitrate::Bits(bitrate))
            .map_err(|e| Error::Encode {
                message: e.to_string(),
            })?;

        Ok(Self {
            encoder: Some(encoder),
            encoded: vec![0u8; MAX_ENCODED_SIZE],
        })
    }

    /// Free the native encoder now instead of on drop.
    pub fn release(&mut self) {
        self.encoder = None;
    }

    pub fn is_released(&self) -> bool {
        self.encoder.is_none()
    }

    fn native(&mut self) -> Result<&mut opus::Encoder> {
        self.encoder.as_mut().ok_or(Error::Disposed {
            what: "OpusEncoder",
        })
    }
}

impl FrameEncoder for OpusEncoder {
    fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>> {
        let mut encoded = std::mem::take(&mut self.encoded);
        let result = self.native().and_then(|encoder| {
            encoder.encode(pcm, &mut encoded).map_err(|e| Error::Encode {
                message: e.to_string(),
            })
        });
        let packet = result.map(|len| encoded[..len].to_vec());
        self.encoded = encoded;
        packet
    }

    fn set_bitrate(&mut self, bitrate: i32) -> Result<()> {
        self.native()?
            .set_bitrate(opus::Bitrate::Bits(bitrate))
            .map_err(|e| Error::Encode {
                message: e.to_string(),
            })
    }
}

// ======================== Opus Decoder ========================

pub struct OpusDecoder {
    decoder: Option<opus::Decoder>,
    channels: usize,
    decoded: Vec<i16>,
}

impl OpusDecoder {
    /// Create a new Opus decoder producing PCM in `info`'s format.
    pub fn new(info: SampleInfo) -> Result<Self> {
        let channels = check_opus_format(&info)?;
        let decoder =
            opus::Decoder::new(info.sample_rate(), channels).map_err(|e| Error::Decode {
                message: e.to_string(),
            })?;

        Ok(Self {
            decoder: Some(decoder),
            channels: info.channels() as usize,
            decoded: vec![0i16; MAX_FRAME_SAMPLES * info.channels() as usize],
        })
    }

    pub fn release(&mut self) {
        self.decoder = None;
    }

    pub fn is_released(&self) -> bool {
        self.decoder.is_none()
    }
}

impl FrameDecoder for OpusDecoder {
    fn decode(&mut self, data: &[u8]) -> Result<Vec<i16>> {
        let decoder = self.decoder.as_mut().ok_or(Error::Disposed {
            what: "OpusDecoder",
        })?;

        // Lost packet: no audio. Forward error correction is not implemented.
        if data.is_empty() {
            return Ok(Vec::new());
        }

        let samples_per_channel =
            decoder
                .decode(data, &mut self.decoded, false)
                .map_err(|e| Error::Decode {
                    message: e.to_string(),
                })?;

        Ok(self.decoded[..samples_per_channel * self.channels].to_vec())
    }
}
