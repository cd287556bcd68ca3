//! Tracks how far pushed audio runs ahead of the wall clock.

use std::time::{Duration, Instant};

use super::pipe::SampleInfo;

/// Measures a remote playback buffer by comparing the bytes sent so far
/// with the time that has passed since the stream (re)started.
#[derive(Debug)]
pub struct PreciseAudioTimer {
    info: SampleInfo,
    bytes_per_second: u64,
    // stopwatch: time accumulated before the current run, plus the run start
    accumulated: Duration,
    running_since: Option<Instant>,
    pushed: u64,
    song_position_offset: Duration,
}

impl PreciseAudioTimer {
    /// A stopped timer for audio in `info`'s format.
    pub fn new(info: SampleInfo) -> Self {
        Self {
            info,
            bytes_per_second: info.bytes_per_second() as u64,
            accumulated: Duration::ZERO,
            running_since: None,
            pushed: 0,
            song_position_offset: Duration::ZERO,
        }
    }

    pub fn sample_info(&self) -> SampleInfo {
        self.info
    }

    /// Forget everything pushed and restart the clock.
    pub fn start(&mut self) {
        self.pushed = 0;
        self.accumulated = Duration::ZERO;
        self.running_since = Some(Instant::now());
    }

    /// Freeze the clock. Pushed bytes are kept.
    pub fn stop(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += since.elapsed();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running_since.is_some()
    }

    pub fn reset(&mut self) {
        self.song_position_offset = Duration::ZERO;
        self.pushed = 0;
    }

    pub fn push_bytes(&mut self, count: usize) {
        self.pushed += count as u64;
    }

    /// The remote side drained its buffer; continue the song position from
    /// here and measure from zero again.
    pub fn reset_remote_buffer(&mut self) {
        self.song_position_offset = self.song_position();
        self.start();
    }

    fn elapsed(&self) -> Duration {
        self.accumulated + self.running_since.map_or(Duration::ZERO, |since| since.elapsed())
    }

    /// Bytes that should have been played by now.
    fn elapsed_len(&self) -> u64 {
        self.elapsed().as_millis() as u64 * self.bytes_per_second / 1000
    }

    /// Bytes pushed but not yet played. Negative once playback outran the
    /// pushed audio.
    pub fn remaining_buffer_len(&self) -> i64 {
        self.pushed as i64 - self.elapsed_len() as i64
    }

    /// Playback time still buffered remotely, zero when running dry.
    pub fn remaining_buffer_duration(&self) -> Duration {
        match u64::try_from(self.remaining_buffer_len()) {
            Ok(bytes) => Duration::from_secs_f64(bytes as f64 / self.bytes_per_second as f64),
            Err(_) => Duration::ZERO,
        }
    }

    /// Whether playback ran out of pushed audio.
    pub fn is_behind(&self) -> bool {
        self.remaining_buffer_len() < 0
    }

    pub fn song_position_offset(&self) -> Duration {
        self.song_position_offset
    }

    pub fn set_song_position_offset(&mut self, offset: Duration) {
        self.song_position_offset = offset;
    }

    /// Playback position: everything pushed since the last restart plus the
    /// offset carried over from before it.
    pub fn song_position(&self) -> Duration {
        Duration::from_secs_f64(self.pushed as f64 / self.bytes_per_second as f64)
            + self.song_position_offset
    }
}
