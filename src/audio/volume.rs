//! In-place gain for 16-bit little-endian PCM.

use super::meta::Meta;
use super::pipe::{ActiveProducer, ConsumerRef, PassiveConsumer, forward, out_active};
use crate::error::Result;

const SNAP_EPSILON: f32 = 1e-4;

fn is_about(value: f32, compare: f32) -> bool {
    (value - compare).abs() < SNAP_EPSILON
}

/// Scale every sample in `samples` by `volume`.
///
/// 1.0 leaves the buffer untouched, 0.0 zero-fills it and 0.5 halves by an
/// arithmetic shift. Any other gain multiplies and saturates to the i16 range.
/// A trailing odd byte is left as is.
pub fn adjust_volume(samples: &mut [u8], volume: f32) {
    if is_about(volume, 1.0) {
        return;
    }
    if is_about(volume, 0.0) {
        samples.fill(0);
        return;
    }

    let half = is_about(volume, 0.5);
    for pair in samples.chunks_exact_mut(2) {
        let sample = i16::from_le_bytes([pair[0], pair[1]]);
        let scaled = if half {
            sample >> 1
        } else {
            // `as` from f32 saturates at the i16 bounds
            (sample as f32 * volume) as i16
        };
        pair.copy_from_slice(&scaled.to_le_bytes());
    }
}

pub struct VolumePipe {
    volume: f32,
    out: Option<ConsumerRef>,
}

impl VolumePipe {
    pub fn new(volume: f32) -> Self {
        let mut pipe = Self {
            volume: 1.0,
            out: None,
        };
        pipe.set_volume(volume);
        pipe
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Negative gains are taken by absolute value; values within 1e-4 of 0
    /// or 1 snap to exactly that.
    pub fn set_volume(&mut self, volume: f32) {
        let volume = volume.abs();
        self.volume = if is_about(volume, 1.0) {
            1.0
        } else if is_about(volume, 0.0) {
            0.0
        } else {
            volume
        };
    }
}

impl PassiveConsumer for VolumePipe {
    fn active(&self) -> bool {
        out_active(self.out.as_ref())
    }

    fn write(&mut self, data: &mut [u8], meta: &mut Meta) -> Result<()> {
        if self.out.is_none() {
            return Ok(());
        }
        adjust_volume(data, self.volume);
        forward(self.out.as_ref(), data, meta)
    }
}

impl ActiveProducer for VolumePipe {
    fn out_stream(&self) -> Option<&ConsumerRef> {
        self.out.as_ref()
    }

    fn set_out_stream(&mut self, consumer: Option<ConsumerRef>) {
        self.out = consumer;
    }
}
