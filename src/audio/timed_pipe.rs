//! Pulls audio from a passive source at the pace it would be played back.

use std::sync::Arc;
use std::time::Duration;

use super::audio_timer::PreciseAudioTimer;
use super::meta::Meta;
use super::pipe::{
    ActiveConsumer, ActiveProducer, ConsumerRef, ProducerRef, SampleInfo, Shared, forward, lock,
};
use crate::error::Result;
use crate::scheduler::{DedicatedScheduler, TickWorker};

pub const DEFAULT_READ_BUFFER_SIZE: usize = 960 * 4;
pub const DEFAULT_BUFFER_LENGTH: Duration = Duration::from_millis(20);

/// Bridges a pull-based source into the push-based rest of a chain.
///
/// Every [`tick`](Self::tick) reads chunks of `read_buffer_size` bytes from
/// the upstream producer until `buffer_length` of audio is ahead of real
/// time, or the source has nothing more. The ticks themselves come from a
/// scheduler timer, see [`start`](Self::start).
pub struct PreciseTimedPipe {
    timer: PreciseAudioTimer,
    buffer_length: Duration,
    read_buffer_size: usize,
    read_buffer: Vec<u8>,
    paused: bool,
    input: Option<ProducerRef>,
    out: Option<ConsumerRef>,
}

impl PreciseTimedPipe {
    /// Pace audio of the given format.
    pub fn new(info: SampleInfo) -> Self {
        let mut timer = PreciseAudioTimer::new(info);
        timer.start();
        Self {
            timer,
            buffer_length: DEFAULT_BUFFER_LENGTH,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            read_buffer: Vec::new(),
            paused: false,
            input: None,
            out: None,
        }
    }

    /// Register this pipe's tick with `scheduler`, firing every `interval`.
    /// Must be called on the scheduler's thread.
    ///
    /// The timer holds the pipe weakly; once the last handle is gone the
    /// ticks do nothing.
    pub fn start(
        pipe: &Shared<Self>,
        scheduler: &DedicatedScheduler,
        interval: Duration,
    ) -> Result<TickWorker> {
        let weak = Arc::downgrade(pipe);
        lock(pipe).timer.start();
        scheduler.create_timer(
            move || {
                let Some(pipe) = weak.upgrade() else {
                    return;
                };
                if let Err(e) = lock(&pipe).tick() {
                    log::warn!("Timed pipe dropped audio: {}", e);
                }
            },
            interval,
            true,
        )
    }

    pub fn timer(&self) -> &PreciseAudioTimer {
        &self.timer
    }

    pub fn buffer_length(&self) -> Duration {
        self.buffer_length
    }

    pub fn set_buffer_length(&mut self, length: Duration) {
        self.buffer_length = length;
    }

    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size
    }

    pub fn set_read_buffer_size(&mut self, size: usize) {
        self.read_buffer_size = size;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Stop pulling and freeze the song position.
    pub fn pause(&mut self) {
        if self.paused {
            return;
        }
        self.paused = true;
        let position = self.timer.song_position();
        self.timer.set_song_position_offset(position);
        self.timer.stop();
    }

    pub fn resume(&mut self) {
        if !self.paused {
            return;
        }
        self.paused = false;
        self.timer.start();
    }

    /// One pacing step. Without an upstream, or while paused, nothing
    /// happens.
    pub fn tick(&mut self) -> Result<()> {
        if self.paused {
            return Ok(());
        }
        let Some(input) = self.input.clone() else {
            return Ok(());
        };

        if self.read_buffer.len() != self.read_buffer_size {
            self.read_buffer.resize(self.read_buffer_size, 0);
        }

        while self.timer.remaining_buffer_duration() < self.buffer_length {
            let (read, mut meta): (usize, Meta) = lock(&input).read(&mut self.read_buffer);
            if read == 0 {
                return Ok(());
            }

            if self.timer.is_behind() {
                self.timer.reset_remote_buffer();
            }
            self.timer.push_bytes(read);

            forward(self.out.as_ref(), &mut self.read_buffer[..read], &mut meta)?;
        }
        Ok(())
    }
}

impl ActiveConsumer for PreciseTimedPipe {
    fn in_stream(&self) -> Option<&ProducerRef> {
        self.input.as_ref()
    }

    fn set_in_stream(&mut self, producer: Option<ProducerRef>) {
        self.input = producer;
    }
}

impl ActiveProducer for PreciseTimedPipe {
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
    use crate::audio::pipe::{PassiveProducer, chain, connect_source, shared};
    use crate::audio::sink::CollectorSink;
    use std::thread;

    /// Serves `remaining` bytes of a constant value, tagged with a sender.
    struct FiniteSource {
        remaining: usize,
    }

    impl PassiveProducer for FiniteSource {
        fn read(&mut self, buf: &mut [u8]) -> (usize, Meta) {
            let take = buf.len().min(self.remaining);
            buf[..take].fill(3);
            self.remaining -= take;
            (take, Meta::from_sender(9))
        }
    }

    fn timed_with_sink() -> (Shared<PreciseTimedPipe>, Shared<CollectorSink>) {
        let pipe = shared(PreciseTimedPipe::new(SampleInfo::OPUS_MUSIC));
        let sink = chain(&pipe, shared(CollectorSink::new()));
        (pipe, sink)
    }

    #[test]
    fn test_tick_without_source_is_noop() {
        let (pipe, sink) = timed_with_sink();
        lock(&pipe).tick().unwrap();
        assert!(lock(&sink).is_empty());
    }

    #[test]
    fn test_tick_fills_buffer_ahead() {
        let (pipe, sink) = timed_with_sink();
        connect_source(&pipe, shared(FiniteSource { remaining: 1 << 20 }));
        lock(&pipe).tick().unwrap();

        let pushed = lock(&sink).total_bytes();
        // 20 ms of 48 kHz stereo is 3840 bytes; allow a chunk of clock drift
        assert!(pushed >= 3840, "pushed {}", pushed);
        assert!(pushed <= 3840 * 3, "pushed {}", pushed);
        assert!(lock(&pipe).timer().remaining_buffer_duration() >= Duration::from_millis(19));
        assert_eq!(lock(&sink).metas()[0].inbound.sender_id, 9);
    }

    #[test]
    fn test_second_tick_waits_for_playback() {
        let (pipe, sink) = timed_with_sink();
        connect_source(&pipe, shared(FiniteSource { remaining: 1 << 20 }));
        lock(&pipe).set_buffer_length(Duration::from_millis(200));
        lock(&pipe).tick().unwrap();
        let first = lock(&sink).len();
        lock(&pipe).tick().unwrap();
        assert_eq!(lock(&sink).len(), first);
    }

    #[test]
    fn test_exhausted_source_stops_tick() {
        let (pipe, sink) = timed_with_sink();
        connect_source(&pipe, shared(FiniteSource { remaining: 100 }));
        lock(&pipe).tick().unwrap();
        assert_eq!(lock(&sink).chunks(), vec![vec![3u8; 100]]);
        lock(&pipe).tick().unwrap();
        assert_eq!(lock(&sink).len(), 1);
    }

    #[test]
    fn test_read_buffer_size_bounds_chunks() {
        let (pipe, sink) = timed_with_sink();
        connect_source(&pipe, shared(FiniteSource { remaining: 1000 }));
        lock(&pipe).set_read_buffer_size(256);
        lock(&pipe).tick().unwrap();
        assert!(lock(&sink).chunks().iter().all(|chunk| chunk.len() <= 256));
        assert_eq!(lock(&sink).total_bytes(), 1000);
    }

    #[test]
    fn test_pause_holds_position() {
        let (pipe, sink) = timed_with_sink();
        connect_source(&pipe, shared(FiniteSource { remaining: 3840 }));
        lock(&pipe).pause();
        lock(&pipe).tick().unwrap();
        assert!(lock(&sink).is_empty());

        lock(&pipe).resume();
        lock(&pipe).tick().unwrap();
        assert_eq!(lock(&sink).total_bytes(), 3840);
        assert_eq!(lock(&pipe).timer().song_position(), Duration::from_millis(20));

        lock(&pipe).pause();
        assert_eq!(
            lock(&pipe).timer().song_position_offset(),
            Duration::from_millis(20)
        );
    }

    #[test]
    fn test_scheduler_drives_ticks() {
        let scheduler = DedicatedScheduler::new("timed-pipe").unwrap();
        let (pipe, sink) = timed_with_sink();
        connect_source(&pipe, shared(FiniteSource { remaining: 1 << 20 }));

        let registered = pipe.clone();
        let handle = scheduler.clone();
        let worker = scheduler
            .invoke(move || PreciseTimedPipe::start(&registered, &handle, Duration::from_millis(5)))
            .wait()
            .unwrap()
            .unwrap();

        thread::sleep(Duration::from_millis(120));
        worker.disable().wait().unwrap();

        // roughly real time: 120 ms is 23040 bytes
        let pushed = lock(&sink).total_bytes();
        assert!(pushed >= 3840 * 3, "pushed {}", pushed);
        assert!(pushed <= 3840 * 12, "pushed {}", pushed);
    }
}
