//! Terminal consumers.

use super::meta::Meta;
use super::pipe::PassiveConsumer;
use crate::error::Result;

/// Consumer that records everything written to it.
#[derive(Debug, Default)]
pub struct CollectorSink {
    chunks: Vec<(Vec<u8>, Meta)>,
    bytes: usize,
}

impl CollectorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunks(&self) -> Vec<Vec<u8>> {
        self.chunks.iter().map(|(data, _)| data.clone()).collect()
    }

    pub fn metas(&self) -> Vec<Meta> {
        self.chunks.iter().map(|(_, meta)| meta.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Total bytes received since creation, including drained chunks.
    pub fn total_bytes(&self) -> usize {
        self.bytes
    }

    /// Take the recorded chunks, leaving the byte counter untouched.
    pub fn drain(&mut self) -> Vec<(Vec<u8>, Meta)> {
        std::mem::take(&mut self.chunks)
    }
}

impl PassiveConsumer for CollectorSink {
    fn write(&mut self, data: &mut [u8], meta: &mut Meta) -> Result<()> {
        self.bytes += data.len();
        self.chunks.push((data.to_vec(), meta.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_records_and_drains() {
        let mut sink = CollectorSink::new();
        sink.write(&mut [1, 2], &mut Meta::from_sender(3)).unwrap();
        sink.write(&mut [4], &mut Meta::default()).unwrap();

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.chunks(), vec![vec![1, 2], vec![4]]);
        assert_eq!(sink.metas()[0].inbound.sender_id, 3);

        let drained = sink.drain();
        assert_eq!(drained.len(), 2);
        assert!(sink.is_empty());
        assert_eq!(sink.total_bytes(), 3);
    }
}
