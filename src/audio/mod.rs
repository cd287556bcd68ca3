//! audio - Composable real-time audio pipeline
//!
//! Stages are shared as `Arc<Mutex<_>>` handles and linked with [`chain`]
//! (push side) and [`connect_source`] (pull side). Inbound network audio flows
//! through [`PacketReader`], [`DecoderPipe`] and [`ClientMixdown`]; outbound
//! audio is paced by [`PreciseTimedPipe`] and leaves through [`EncoderPipe`],
//! [`StaticMetaPipe`] and a [`SplitterPipe`] fan-out.

mod audio_timer;
mod codec;
mod decoder_pipe;
mod encoder_pipe;
mod merge;
mod meta;
mod mixdown;
mod opus_codec;
mod packet_reader;
mod pipe;
mod sink;
mod snapshot;
mod splitter;
mod static_meta;
mod timed_pipe;
mod volume;

pub use audio_timer::PreciseAudioTimer;
pub use codec::{FrameDecoder, FrameEncoder};
pub use decoder_pipe::{DecoderFactory, DecoderPipe};
pub use encoder_pipe::{EncoderPipe, SEGMENT_FRAMES};
pub use merge::{MergeHandle, PassiveMergePipe};
pub use meta::{
    ChannelId, ClientId, Codec, GroupWhisperTarget, GroupWhisperType, Meta, MetaIn, MetaOut,
    SendMode, SendTarget,
};
pub use mixdown::{CLIENT_BUFFER_SIZE, ClientMix, ClientMixdown};
pub use opus_codec::{OpusDecoder, OpusEncoder};
pub use packet_reader::{HEADER_LEN, PacketReader};
pub use pipe::{
    ActiveConsumer, ActiveProducer, ConsumerRef, PassiveConsumer, PassiveProducer, ProducerRef,
    SampleInfo, Shared, attach, chain, connect_source, lock, shared,
};
pub use sink::CollectorSink;
pub use splitter::{SplitterHandle, SplitterPipe};
pub use static_meta::StaticMetaPipe;
pub use timed_pipe::{DEFAULT_BUFFER_LENGTH, DEFAULT_READ_BUFFER_SIZE, PreciseTimedPipe};
pub use volume::{VolumePipe, adjust_volume};
