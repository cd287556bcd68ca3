//! Capability traits for the audio pipe graph and the `chain` operator that
//! wires stages together.
//!
//! A stage implements any combination of the four roles:
//!
//! - [`PassiveConsumer`]: accepts pushed audio through `write`.
//! - [`ActiveProducer`]: pushes audio into its single downstream slot.
//! - [`PassiveProducer`]: serves audio when somebody calls `read`.
//! - [`ActiveConsumer`]: pulls from its single upstream slot on its own schedule.
//!
//! Stages are shared as `Arc<Mutex<_>>` so a handle stays usable after the
//! stage has been linked into a chain.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::meta::Meta;
use super::splitter::{SplitterHandle, SplitterPipe};
use crate::error::{Error, Result};

pub type Shared<T> = Arc<Mutex<T>>;
pub type ConsumerRef = Arc<Mutex<dyn PassiveConsumer>>;
pub type ProducerRef = Arc<Mutex<dyn PassiveProducer>>;

/// Wrap a stage so it can be linked and still be reached afterwards.
pub fn shared<T>(stage: T) -> Shared<T> {
    Arc::new(Mutex::new(stage))
}

/// Lock a stage. A poisoned stage is still handed out: audio state stays
/// consistent between writes, so a panic in one write does not invalidate it.
pub fn lock<T: ?Sized>(stage: &Mutex<T>) -> MutexGuard<'_, T> {
    stage.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Receives audio pushed by an upstream stage.
pub trait PassiveConsumer: Send {
    /// Whether anything downstream still wants audio.
    fn active(&self) -> bool {
        true
    }

    /// Consume one chunk. Must not block. Stages with no downstream treat
    /// this as a no-op.
    fn write(&mut self, data: &mut [u8], meta: &mut Meta) -> Result<()>;

    /// Returns the consumer list when this stage is a splitter.
    fn splitter(&self) -> Option<SplitterHandle> {
        None
    }
}

/// Serves audio on demand.
pub trait PassiveProducer: Send {
    /// Fill as much of `buf` as is available and report the byte count.
    fn read(&mut self, buf: &mut [u8]) -> (usize, Meta);
}

/// Owns a single downstream slot.
pub trait ActiveProducer {
    fn out_stream(&self) -> Option<&ConsumerRef>;
    fn set_out_stream(&mut self, consumer: Option<ConsumerRef>);
}

/// Owns a single upstream slot and pulls from it.
pub trait ActiveConsumer {
    fn in_stream(&self) -> Option<&ProducerRef>;
    fn set_in_stream(&mut self, producer: Option<ProducerRef>);
}

/// Push a chunk into an optional downstream slot.
pub(crate) fn forward(out: Option<&ConsumerRef>, data: &mut [u8], meta: &mut Meta) -> Result<()> {
    match out {
        Some(consumer) => lock(consumer).write(data, meta),
        None => Ok(()),
    }
}

pub(crate) fn out_active(out: Option<&ConsumerRef>) -> bool {
    out.is_some_and(|consumer| lock(consumer).active())
}

pub(crate) fn same_consumer(a: &ConsumerRef, b: &ConsumerRef) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

pub(crate) fn same_producer(a: &ProducerRef, b: &ProducerRef) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Link `consumer` behind `producer` and hand the consumer back so calls can
/// be nested into a chain.
///
/// The first link fills the producer's slot. Any further link moves the
/// occupant and the newcomer under a [`SplitterPipe`], or joins the splitter
/// already sitting there.
pub fn chain<P, C>(producer: &Shared<P>, consumer: Shared<C>) -> Shared<C>
where
    P: ActiveProducer + ?Sized,
    C: PassiveConsumer + 'static,
{
    let link: ConsumerRef = consumer.clone();
    attach(&mut *lock(producer), link);
    consumer
}

/// Slot-level form of [`chain`] for producers that are not shared.
pub fn attach<P: ActiveProducer + ?Sized>(producer: &mut P, consumer: ConsumerRef) {
    let Some(existing) = producer.out_stream().cloned() else {
        producer.set_out_stream(Some(consumer));
        return;
    };
    if same_consumer(&existing, &consumer) {
        return;
    }

    let splitter = lock(&existing).splitter();
    match splitter {
        Some(handle) => {
            handle.add(consumer);
        }
        None => {
            let splitter = SplitterPipe::new();
            let handle = splitter.handle();
            handle.add(existing);
            handle.add(consumer);
            producer.set_out_stream(Some(shared(splitter)));
        }
    }
}

/// Make `consumer` pull from `producer`.
pub fn connect_source<C, P>(consumer: &Shared<C>, producer: Shared<P>) -> Shared<C>
where
    C: ActiveConsumer + ?Sized,
    P: PassiveProducer + 'static,
{
    let source: ProducerRef = producer;
    lock(consumer).set_in_stream(Some(source));
    consumer.clone()
}

/// Format of a PCM stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SampleInfo {
    sample_rate: u32,
    channels: u16,
    bits_per_sample: u16,
}

impl SampleInfo {
    pub const OPUS_VOICE: SampleInfo = SampleInfo {
        sample_rate: 48_000,
        channels: 1,
        bits_per_sample: 16,
    };

    pub const OPUS_MUSIC: SampleInfo = SampleInfo {
        sample_rate: 48_000,
        channels: 2,
        bits_per_sample: 16,
    };

    pub fn new(sample_rate: u32, channels: u16, bits_per_sample: u16) -> Result<Self> {
        if sample_rate == 0 {
            return Err(Error::InvalidSampleInfo {
                message: "sample rate must be positive".to_string(),
            });
        }
        if channels != 1 && channels != 2 {
            return Err(Error::InvalidSampleInfo {
                message: format!("unsupported channel count {}", channels),
            });
        }
        if !matches!(bits_per_sample, 8 | 16 | 24 | 32) {
            return Err(Error::InvalidSampleInfo {
                message: format!("unsupported sample width {}", bits_per_sample),
            });
        }
        Ok(Self {
            sample_rate,
            channels,
            bits_per_sample,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn bits_per_sample(&self) -> u16 {
        self.bits_per_sample
    }

    pub fn bytes_per_sample(&self) -> usize {
        self.bits_per_sample as usize / 8
    }

    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.bytes_per_sample() * self.channels as usize
    }

    /// Playback time of `bytes` bytes of this format.
    pub fn duration_of(&self, bytes: usize) -> Duration {
        Duration::from_secs_f64(bytes as f64 / self.bytes_per_second() as f64)
    }

    /// Byte length of `duration` of this format, rounded down to whole samples.
    pub fn byte_count(&self, duration: Duration) -> usize {
        let frame = self.bytes_per_sample() * self.channels as usize;
        let bytes = (duration.as_secs_f64() * self.bytes_per_second() as f64) as usize;
        bytes - bytes % frame
    }
}
