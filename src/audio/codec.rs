//! Native codec seams used by the encoder and decoder pipes.

use crate::error::Result;

/// Encodes one fixed-size frame at a time.
pub trait FrameEncoder: Send {
    /// Encode exactly one frame of interleaved PCM samples into a packet.
    fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>>;

    /// Change the target bitrate in bits/s.
    fn set_bitrate(&mut self, bitrate: i32) -> Result<()>;
}

/// Turns compressed packets back into interleaved PCM.
pub trait FrameDecoder: Send {
    /// Decode one packet. An empty packet stands for a lost one.
    fn decode(&mut self, data: &[u8]) -> Result<Vec<i16>>;
}
