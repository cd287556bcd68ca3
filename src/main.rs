use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use bytes::Bytes;
use tokio::signal;
use tokio::sync::mpsc;

use tsaudio::audio::{
    ClientMixdown, Codec, CollectorSink, DecoderPipe, EncoderPipe, PacketReader, PreciseTimedPipe,
    SampleInfo, Shared, StaticMetaPipe, VolumePipe, chain, connect_source, lock, shared,
};
use tsaudio::config::Config;
use tsaudio::net_bridge::{ChannelSink, NetBridge};
use tsaudio::scheduler::{DedicatedScheduler, TickWorker};

const STATS_INTERVAL: Duration = Duration::from_secs(5);
/// Senders quiet for this long lose their decoder and mix buffer.
const SENDER_IDLE: Duration = Duration::from_secs(30);

fn prune_idle(decoder: &Shared<DecoderPipe>, mixdown: &Shared<ClientMixdown>) {
    let gone = lock(decoder).forget_idle(SENDER_IDLE);
    if gone.is_empty() {
        return;
    }
    let mut mixdown = lock(mixdown);
    for sender in &gone {
        mixdown.forget(*sender);
    }
    log::debug!("Forgot idle senders {:?}", gone);
}

fn report(stats: &Shared<CollectorSink>, sink: &Shared<ChannelSink>) {
    let packets = lock(stats).drain();
    let bytes: usize = packets.iter().map(|(data, _)| data.len()).sum();
    let sink = lock(sink);
    log::info!(
        "Relayed {} packets ({} bytes) in the last {:?}; sent {}, dropped {} in total",
        packets.len(),
        bytes,
        STATS_INTERVAL,
        sink.sent(),
        sink.dropped(),
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("tsaudio.toml"));
    let config = if path.exists() {
        Config::load(&path)?
    } else {
        log::info!("No config at {}, using defaults", path.display());
        Config::default()
    };

    // decoded audio is always stereo, so it can only be re-encoded as music
    if config.audio.send_codec != Codec::OpusMusic {
        bail!(
            "send_codec {:?} is not supported by the relay, use opus_music",
            config.audio.send_codec
        );
    }

    let scheduler = DedicatedScheduler::new(&config.scheduler.name)?;
    let bridge = Arc::new(NetBridge::bind(config.network.bind, config.network.remote).await?);
    let (tx_out, rx_out) = mpsc::channel::<Bytes>(100);

    // inbound: network -> reader -> decoder -> mixdown
    let reader = shared(PacketReader::new());
    let decoder = chain(&reader, shared(DecoderPipe::new()));
    let mixdown = chain(&decoder, shared(ClientMixdown::new()));

    // outbound: timed pull -> volume -> encoder -> routing -> {udp, stats}
    let timed = connect_source(
        &shared(PreciseTimedPipe::new(SampleInfo::OPUS_MUSIC)),
        mixdown.clone(),
    );
    lock(&timed).set_buffer_length(config.audio.buffer_length());
    let volume = chain(&timed, shared(VolumePipe::new(config.audio.volume)));
    let encoder = chain(&volume, shared(EncoderPipe::new(config.audio.send_codec)?));
    if let Some(bitrate) = config.audio.bitrate {
        lock(&encoder).set_bitrate(bitrate)?;
    }
    let routing = chain(
        &encoder,
        shared(StaticMetaPipe::new(config.routing.to_send_target())),
    );
    let udp_sink = chain(&routing, shared(ChannelSink::new(tx_out, config.network.client_id)));
    let stats = chain(&routing, shared(CollectorSink::new()));

    let tick_interval = config.audio.tick_interval();
    let (pacer, stats_timer): (TickWorker, TickWorker) = {
        let timed = timed.clone();
        let decoder = decoder.clone();
        let handle = scheduler.clone();
        scheduler
            .invoke(move || -> tsaudio::Result<(TickWorker, TickWorker)> {
                let pacer = PreciseTimedPipe::start(&timed, &handle, tick_interval)?;
                let stats_timer = handle.create_timer(
                    move || {
                        report(&stats, &udp_sink);
                        prune_idle(&decoder, &mixdown);
                    },
                    STATS_INTERVAL,
                    true,
                )?;
                Ok((pacer, stats_timer))
            })
            .await??
    };
    log::info!(
        "Relay started: {:?} at {} bit/s, routing {:?}",
        config.audio.send_codec,
        lock(&encoder).bitrate(),
        config.routing.mode,
    );

    let inbound = {
        let bridge = bridge.clone();
        let scheduler = scheduler.clone();
        let reader = reader.clone();
        tokio::spawn(async move { bridge.run_inbound(scheduler, reader).await })
    };
    let outbound = {
        let bridge = bridge.clone();
        tokio::spawn(async move { bridge.run_outbound(rx_out).await })
    };

    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Received Ctrl+C, shutting down...");
        }
        result = inbound => {
            log::error!("Inbound network task ended: {:?}", result);
        }
        result = outbound => {
            log::error!("Outbound network task ended: {:?}", result);
        }
    }

    pacer.disable().await?;
    stats_timer.disable().await?;
    drop(pacer);
    drop(stats_timer);
    tokio::task::spawn_blocking(move || scheduler.dispose()).await?;
    log::info!("Relay stopped");
    Ok(())
}
