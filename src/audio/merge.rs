//! Fan-in: sums several passive producers into one stream.

use std::sync::Arc;

use super::meta::Meta;
use super::pipe::{PassiveProducer, ProducerRef, lock, same_producer};
use super::snapshot::{SharedList, Snapshot};

/// Thread-safe view of a merge pipe's producer list.
#[derive(Clone)]
pub struct MergeHandle {
    producers: Arc<SharedList<ProducerRef>>,
}

impl MergeHandle {
    /// Returns `false` if the producer was already merged.
    pub fn add(&self, producer: ProducerRef) -> bool {
        self.producers.add(producer, same_producer)
    }

    pub fn remove(&self, producer: &ProducerRef) -> bool {
        self.producers.remove(producer, same_producer)
    }

    pub fn clear(&self) {
        self.producers.clear();
    }

    pub fn len(&self) -> usize {
        self.producers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Mixes 16-bit little-endian PCM from every producer, saturating at the
/// sample range. The result is as long as the longest read; a single
/// producer is read straight into the caller's buffer.
pub struct PassiveMergePipe {
    snapshot: Snapshot<ProducerRef>,
    scratch: Vec<u8>,
    acc: Vec<i32>,
}

impl PassiveMergePipe {
    pub fn new() -> Self {
        Self {
            snapshot: Snapshot::new(SharedList::new()),
            scratch: Vec::new(),
            acc: Vec::new(),
        }
    }

    pub fn handle(&self) -> MergeHandle {
        MergeHandle {
            producers: self.snapshot.shared().clone(),
        }
    }
}

impl Default for PassiveMergePipe {
    fn default() -> Self {
        Self::new()
    }
}

impl PassiveProducer for PassiveMergePipe {
    fn read(&mut self, buf: &mut [u8]) -> (usize, Meta) {
        let producers = self.snapshot.refresh();
        match producers {
            [] => return (0, Meta::default()),
            [only] => return lock(only).read(buf),
            _ => {}
        }

        self.scratch.resize(buf.len(), 0);
        self.acc.clear();
        self.acc.resize(buf.len() / 2, 0);

        let mut meta = Meta::default();
        let mut read = 0;
        for producer in producers {
            let (count, producer_meta) = lock(producer).read(&mut self.scratch);
            if count == 0 {
                continue;
            }
            meta = producer_meta;
            read = read.max(count);
            for (acc, pair) in self.acc.iter_mut().zip(self.scratch[..count].chunks_exact(2)) {
                *acc += i16::from_le_bytes([pair[0], pair[1]]) as i32;
            }
        }

        for (out, acc) in buf[..read].chunks_exact_mut(2).zip(&self.acc) {
            let sample = (*acc).clamp(i16::MIN as i32, i16::MAX as i32) as i16;
            out.copy_from_slice(&sample.to_le_bytes());
        }
        (read, meta)
    }
}
