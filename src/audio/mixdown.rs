//! Per-sender buffering of decoded audio, mixed into one stream on read.

use std::collections::HashMap;

use super::merge::{MergeHandle, PassiveMergePipe};
use super::meta::{ClientId, Meta};
use super::pipe::{PassiveConsumer, PassiveProducer, ProducerRef, Shared, lock, shared};
use crate::error::Result;

/// Bytes buffered per sender before further audio is dropped.
pub const CLIENT_BUFFER_SIZE: usize = 4096 * 8;

/// Audio of one sender waiting to be mixed.
pub struct ClientMix {
    buffer: Vec<u8>,
    last_meta: Meta,
}

impl ClientMix {
    fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(CLIENT_BUFFER_SIZE),
            last_meta: Meta::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    fn push(&mut self, data: &[u8], meta: &Meta) {
        let take = data.len().min(CLIENT_BUFFER_SIZE - self.buffer.len());
        self.buffer.extend_from_slice(&data[..take]);
        self.last_meta = meta.clone();
    }
}

impl PassiveProducer for ClientMix {
    fn read(&mut self, buf: &mut [u8]) -> (usize, Meta) {
        let take = self.buffer.len().min(buf.len());
        buf[..take].copy_from_slice(&self.buffer[..take]);
        self.buffer.drain(..take);
        (take, self.last_meta.clone())
    }
}

/// Sits between the decoder and a timed pipe: every sender writes into its
/// own [`ClientMix`], reading returns the sum of all of them.
pub struct ClientMixdown {
    merge: PassiveMergePipe,
    handle: MergeHandle,
    mixes: HashMap<ClientId, Shared<ClientMix>>,
}

impl ClientMixdown {
    pub fn new() -> Self {
        let merge = PassiveMergePipe::new();
        let handle = merge.handle();
        Self {
            merge,
            handle,
            mixes: HashMap::new(),
        }
    }

    pub fn sender_count(&self) -> usize {
        self.mixes.len()
    }

    /// Bytes waiting for `sender`.
    pub fn buffered(&self, sender: ClientId) -> usize {
        self.mixes.get(&sender).map_or(0, |mix| lock(mix).len())
    }

    /// Drop a sender's buffer, e.g. after they left.
    pub fn forget(&mut self, sender: ClientId) -> bool {
        let Some(mix) = self.mixes.remove(&sender) else {
            return false;
        };
        let mix: ProducerRef = mix;
        self.handle.remove(&mix)
    }
}

impl Default for ClientMixdown {
    fn default() -> Self {
        Self::new()
    }
}

impl PassiveConsumer for ClientMixdown {
    fn write(&mut self, data: &mut [u8], meta: &mut Meta) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let handle = &self.handle;
        let mix = self
            .mixes
            .entry(meta.inbound.sender_id)
            .or_insert_with(|| {
                let mix = shared(ClientMix::new());
                handle.add(mix.clone());
                mix
            });
        lock(mix).push(data, meta);
        Ok(())
    }
}

impl PassiveProducer for ClientMixdown {
    fn read(&mut self, buf: &mut [u8]) -> (usize, Meta) {
        self.merge.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_senders_are_mixed() {
        let mut mixdown = ClientMixdown::new();
        mixdown.write(&mut pcm(&[10, 20]), &mut Meta::from_sender(1)).unwrap();
        mixdown.write(&mut pcm(&[1, 2, 3]), &mut Meta::from_sender(2)).unwrap();
        assert_eq!(mixdown.sender_count(), 2);

        let mut buf = [0u8; 16];
        let (read, _) = mixdown.read(&mut buf);
        assert_eq!(&buf[..read], pcm(&[11, 22, 3]).as_slice());
        assert_eq!(mixdown.buffered(1), 0);
        assert_eq!(mixdown.buffered(2), 0);
    }

    #[test]
    fn test_one_sender_keeps_order_across_writes() {
        let mut mixdown = ClientMixdown::new();
        mixdown.write(&mut pcm(&[1, 2]), &mut Meta::from_sender(4)).unwrap();
        mixdown.write(&mut pcm(&[3]), &mut Meta::from_sender(4)).unwrap();

        let mut buf = [0u8; 4];
        let (read, meta) = mixdown.read(&mut buf);
        assert_eq!(&buf[..read], pcm(&[1, 2]).as_slice());
        assert_eq!(meta.inbound.sender_id, 4);
        let (read, _) = mixdown.read(&mut buf);
        assert_eq!(&buf[..read], pcm(&[3]).as_slice());
    }

    #[test]
    fn test_buffer_is_bounded() {
        let mut mixdown = ClientMixdown::new();
        mixdown
            .write(&mut vec![1u8; CLIENT_BUFFER_SIZE + 100], &mut Meta::from_sender(1))
            .unwrap();
        mixdown.write(&mut vec![1u8; 10], &mut Meta::from_sender(1)).unwrap();
        assert_eq!(mixdown.buffered(1), CLIENT_BUFFER_SIZE);
    }

    #[test]
    fn test_empty_writes_and_forget() {
        let mut mixdown = ClientMixdown::new();
        mixdown.write(&mut [], &mut Meta::from_sender(1)).unwrap();
        assert_eq!(mixdown.sender_count(), 0);

        mixdown.write(&mut pcm(&[5]), &mut Meta::from_sender(1)).unwrap();
        assert!(mixdown.forget(1));
        assert!(!mixdown.forget(1));
        let mut buf = [0u8; 4];
        assert_eq!(mixdown.read(&mut buf).0, 0);
    }
}
