//! UDP transport for the relay: inbound packets are handed to the scheduler,
//! outbound packets are framed and sent from a tokio task.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::audio::{ClientId, ConsumerRef, HEADER_LEN, Meta, PassiveConsumer, lock};
use crate::error::Result;
use crate::scheduler::DedicatedScheduler;

const RECV_BUFFER_SIZE: usize = 2048;

/// Frames outgoing audio with the voice packet header and queues it for the
/// network task. Never blocks: when the queue is full the packet is dropped.
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
    client_id: ClientId,
    sequence: u16,
    sent: u64,
    dropped: u64,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Bytes>, client_id: ClientId) -> Self {
        Self {
            tx,
            client_id,
            sequence: 0,
            sent: 0,
            dropped: 0,
        }
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl PassiveConsumer for ChannelSink {
    fn active(&self) -> bool {
        !self.tx.is_closed()
    }

    fn write(&mut self, data: &mut [u8], meta: &mut Meta) -> Result<()> {
        let Some(tag) = meta.codec.and_then(|codec| codec.tag()) else {
            log::trace!("Not sending packet without a wire codec");
            return Ok(());
        };

        let mut packet = BytesMut::with_capacity(HEADER_LEN + data.len());
        packet.put_u16(self.sequence);
        packet.put_u16(self.client_id);
        packet.put_u8(tag);
        packet.put_slice(data);
        self.sequence = self.sequence.wrapping_add(1);

        match self.tx.try_send(packet.freeze()) {
            Ok(()) => self.sent += 1,
            Err(e) => {
                self.dropped += 1;
                log::debug!("Dropping outbound packet: {}", e);
            }
        }
        Ok(())
    }
}

pub struct NetBridge {
    socket: Arc<UdpSocket>,
    remote: SocketAddr,
}

impl NetBridge {
    pub async fn bind(bind: SocketAddr, remote: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(bind).await?;
        log::info!("Relay listening on {}, sending to {}", socket.local_addr()?, remote);
        Ok(Self {
            socket: Arc::new(socket),
            remote,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive packets forever, writing each one into `inbound` on the
    /// scheduler thread.
    pub async fn run_inbound(&self, scheduler: DedicatedScheduler, inbound: ConsumerRef) -> Result<()> {
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        loop {
            let (len, from) = self.socket.recv_from(&mut buf).await?;
            if len == 0 {
                continue;
            }
            log::trace!("Received {} bytes from {}", len, from);

            let mut packet = buf[..len].to_vec();
            let inbound = inbound.clone();
            // fire and forget: the network task never waits on audio work
            drop(scheduler.invoke(move || {
                if let Err(e) = lock(&inbound).write(&mut packet, &mut Meta::default()) {
                    log::warn!("Inbound packet failed: {}", e);
                }
            }));
        }
    }

    /// Send every framed packet from `rx` to the remote address until the
    /// channel closes.
    pub async fn run_outbound(&self, mut rx: mpsc::Receiver<Bytes>) -> Result<()> {
        while let Some(packet) = rx.recv().await {
            self.socket.send_to(&packet, self.remote).await?;
        }
        Ok(())
    }
}
