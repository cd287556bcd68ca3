//! Fan-out of one stream to many consumers.

use std::sync::Arc;

use super::meta::Meta;
use super::pipe::{ActiveProducer, ConsumerRef, PassiveConsumer, lock, same_consumer};
use super::snapshot::{SharedList, Snapshot};
use crate::error::Result;

/// Thread-safe view of a splitter's consumer list.
///
/// Changes become visible to the splitter on its next write.
#[derive(Clone)]
pub struct SplitterHandle {
    consumers: Arc<SharedList<ConsumerRef>>,
}

impl SplitterHandle {
    /// Returns `false` if the consumer was already attached.
    pub fn add(&self, consumer: ConsumerRef) -> bool {
        self.consumers.add(consumer, same_consumer)
    }

    pub fn remove(&self, consumer: &ConsumerRef) -> bool {
        self.consumers.remove(consumer, same_consumer)
    }

    pub fn clear(&self) {
        self.consumers.clear();
    }

    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Writes every chunk to each attached consumer.
///
/// One consumer gets the original buffer. With several, all but the last get
/// a copy in a reused scratch buffer and the last gets the original, so a
/// dispatch costs N-1 copies. Each consumer gets its own copy of the meta.
pub struct SplitterPipe {
    snapshot: Snapshot<ConsumerRef>,
    scratch: Vec<u8>,
}

impl SplitterPipe {
    pub fn new() -> Self {
        Self {
            snapshot: Snapshot::new(SharedList::new()),
            scratch: Vec::new(),
        }
    }

    pub fn handle(&self) -> SplitterHandle {
        SplitterHandle {
            consumers: self.snapshot.shared().clone(),
        }
    }
}

impl Default for SplitterPipe {
    fn default() -> Self {
        Self::new()
    }
}

impl PassiveConsumer for SplitterPipe {
    fn active(&self) -> bool {
        self.snapshot
            .shared()
            .to_vec()
            .iter()
            .any(|consumer| lock(consumer).active())
    }

    fn write(&mut self, data: &mut [u8], meta: &mut Meta) -> Result<()> {
        let Self { snapshot, scratch } = self;
        let consumers = snapshot.refresh();

        let Some((last, rest)) = consumers.split_last() else {
            return Ok(());
        };
        if rest.is_empty() {
            return lock(last).write(data, meta);
        }

        if scratch.len() < data.len() {
            scratch.resize(data.len(), 0);
        }
        let copy = &mut scratch[..data.len()];

        let mut first_error = None;
        for consumer in rest {
            copy.copy_from_slice(data);
            let mut branch_meta = meta.clone();
            if let Err(e) = lock(consumer).write(copy, &mut branch_meta) {
                log::warn!("Splitter consumer failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = lock(last).write(data, meta) {
            first_error.get_or_insert(e);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn splitter(&self) -> Option<SplitterHandle> {
        Some(self.handle())
    }
}

/// Linking behind a splitter adds a consumer instead of replacing one.
impl ActiveProducer for SplitterPipe {
    fn out_stream(&self) -> Option<&ConsumerRef> {
        None
    }

    fn set_out_stream(&mut self, consumer: Option<ConsumerRef>) {
        if let Some(consumer) = consumer {
            self.handle().add(consumer);
        }
    }
}
