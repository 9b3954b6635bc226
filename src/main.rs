use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use realtime_voice::Config;
use realtime_voice::audio::OpusEncoder;
use realtime_voice::io::MicrophoneInput;
use realtime_voice::session::{
    PeerSessionFactory, RealtimeApiClient, RemoteTrackHandler, SessionNegotiator,
};
use realtime_voice::stream::{OutboundEncodeLoop, ShutdownTrigger, StreamEnd, player_for};

/// How long remote-track players get to flush after shutdown.
const PLAYER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        error!("Application error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    info!("Starting realtime voice client...");

    let config = Config::load().context("Failed to load configuration")?;
    info!(
        "Model {}, voice {}, player {}",
        config.realtime.model, config.realtime.voice, config.audio.player
    );

    let player = player_for(&config.audio.player, &config)?;
    let audio = config.audio.clone();
    let (_microphone, capture) = tokio::task::spawn_blocking(move || MicrophoneInput::start(&audio))
        .await
        .context("Microphone setup task failed")??;
    let encoder = OpusEncoder::new(&config.audio)?;

    let api = Arc::new(RealtimeApiClient::new(&config.realtime)?);
    let negotiator = SessionNegotiator::new(
        config.realtime.clone(),
        api.clone(),
        api,
        Arc::new(PeerSessionFactory::new(config.realtime.clone())),
    );

    let shutdown = ShutdownTrigger::new();

    let players = Arc::new(Mutex::new(JoinSet::<()>::new()));

    let on_remote_track: RemoteTrackHandler = {
        let signal = shutdown.subscribe();
        let players = players.clone();
        Arc::new(move |track| {
            let player = player.clone();
            let signal = signal.clone();
            players.lock().spawn(async move {
                match player.play_track(track, signal).await {
                    Ok(end) => info!("Remote audio finished: {:?}", end),
                    Err(e) => error!("Remote audio failed: {}", e),
                }
            });
        })
    };

    let session = negotiator.connect(on_remote_track).await?;
    info!("Connected, talk away (Ctrl-C to quit)");

    let mut outbound = tokio::spawn(
        OutboundEncodeLoop::new(capture, encoder, &config.audio, shutdown.subscribe())
            .run(session.local_track.clone()),
    );

    let outbound_done = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            false
        }
        result = &mut outbound => {
            log_outbound(result);
            true
        }
    };

    shutdown.trigger();
    if !outbound_done {
        log_outbound(outbound.await);
    }

    let mut players = std::mem::take(&mut *players.lock());
    let joined = tokio::time::timeout(PLAYER_JOIN_TIMEOUT, async {
        while let Some(result) = players.join_next().await {
            if let Err(e) = result {
                error!("Remote audio task failed: {}", e);
            }
        }
    })
    .await;
    if joined.is_err() {
        warn!("Remote audio did not stop in time, aborting");
        players.shutdown().await;
    }

    negotiator.disconnect().await;
    info!("Goodbye");
    Ok(())
}

fn log_outbound(result: std::result::Result<realtime_voice::Result<StreamEnd>, JoinError>) {
    match result {
        Ok(Ok(end)) => info!("Microphone stream finished: {:?}", end),
        Ok(Err(e)) => error!("Microphone stream failed: {}", e),
        Err(e) => error!("Microphone task failed: {}", e),
    }
}
