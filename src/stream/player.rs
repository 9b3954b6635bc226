//! Consumers for a remote audio track.
//!
//! Every player runs an [`InboundDecodeLoop`] into a fresh [`JitterBuffer`]
//! and drains the buffer its own way:
//! - [`SpeakerPlayer`] through the cpal output callback (never blocks)
//! - [`PipePlayer`] through a blocking `io::copy` into any writer (raw s16le)

use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::StreamEnd;
use super::inbound::InboundDecodeLoop;
use super::shutdown::Shutdown;
use crate::audio::buffers::{JitterBuffer, JitterReader};
use crate::audio::opus::OpusDecoder;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::io::audio::SpeakerOutput;
use crate::io::playback::PlaybackAdapter;
use crate::session::media::RemoteTrack;

const OPUS_MIME: &str = "audio/opus";

#[async_trait]
pub trait TrackPlayer: Send + Sync {
    /// Plays `track` until it ends, fails, or `shutdown` fires.
    async fn play_track(&self, track: Arc<dyn RemoteTrack>, shutdown: Shutdown) -> Result<StreamEnd>;
}

/// Picks a player by name: `speaker` or `stdout`.
pub fn player_for(kind: &str, config: &Config) -> Result<Arc<dyn TrackPlayer>> {
    match kind {
        "speaker" => Ok(Arc::new(SpeakerPlayer::new(config.clone()))),
        "stdout" => Ok(Arc::new(PipePlayer::new(config.clone(), io::stdout))),
        other => Err(Error::InvalidConfig(format!(
            "unknown player {:?} (expected \"speaker\" or \"stdout\")",
            other
        ))),
    }
}

fn check_codec(track: &dyn RemoteTrack) -> Result<()> {
    let codec = track.codec();
    if codec.mime_type.eq_ignore_ascii_case(OPUS_MIME) {
        Ok(())
    } else {
        Err(Error::UnsupportedCodec(codec.mime_type))
    }
}

pub struct SpeakerPlayer {
    config: Config,
}

impl SpeakerPlayer {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Gives the output callback time to play what is still buffered.
    async fn drain(&self, buffer: &JitterBuffer) {
        let step = Duration::from_millis(10);
        let limit = Duration::from_millis(self.config.buffer.capacity_ms as u64);
        let mut waited = Duration::ZERO;
        while !buffer.is_empty() && waited < limit {
            tokio::time::sleep(step).await;
            waited += step;
        }
    }
}

#[async_trait]
impl TrackPlayer for SpeakerPlayer {
    async fn play_track(&self, track: Arc<dyn RemoteTrack>, shutdown: Shutdown) -> Result<StreamEnd> {
        check_codec(track.as_ref())?;

        let audio = self.config.audio.clone();
        let buffer = Arc::new(JitterBuffer::for_format(&audio, &self.config.buffer)?);
        let decoder = OpusDecoder::new(&audio)?;

        let adapter = PlaybackAdapter::with_capacity(buffer.clone(), audio.frame_len());
        let short_pulls = adapter.short_pulls();
        let output = tokio::task::spawn_blocking(move || SpeakerOutput::start(&audio, adapter))
            .await
            .map_err(|e| Error::Device(format!("playback setup panicked: {e}")))?
            .map_err(|e| Error::Device(format!("{e:#}")))?;

        let result = InboundDecodeLoop::new(decoder, buffer.clone(), &self.config.diagnostics, shutdown)
            .run(track)
            .await;

        if matches!(result, Ok(StreamEnd::Ended)) {
            self.drain(&buffer).await;
        }
        drop(output);

        info!(
            "Speaker playback finished ({} underruns, {} short pulls, {} bytes dropped)",
            buffer.stats().underruns(),
            short_pulls.load(Ordering::Relaxed),
            buffer.stats().bytes_dropped()
        );
        result
    }
}

/// Streams decoded PCM into a writer. `make_writer` is called once per track.
pub struct PipePlayer<F> {
    config: Config,
    make_writer: F,
}

impl<F> PipePlayer<F> {
    pub fn new(config: Config, make_writer: F) -> Self {
        Self {
            config,
            make_writer,
        }
    }
}

#[async_trait]
impl<F, W> TrackPlayer for PipePlayer<F>
where
    F: Fn() -> W + Send + Sync,
    W: Write + Send + 'static,
{
    async fn play_track(&self, track: Arc<dyn RemoteTrack>, shutdown: Shutdown) -> Result<StreamEnd> {
        check_codec(track.as_ref())?;

        let buffer = Arc::new(JitterBuffer::for_format(&self.config.audio, &self.config.buffer)?);
        let decoder = OpusDecoder::new(&self.config.audio)?;

        let mut reader = JitterReader::new(buffer.clone());
        let mut writer = (self.make_writer)();
        let copier = tokio::task::spawn_blocking(move || -> io::Result<u64> {
            let copied = io::copy(&mut reader, &mut writer)?;
            writer.flush()?;
            Ok(copied)
        });

        let result = InboundDecodeLoop::new(decoder, buffer, &self.config.diagnostics, shutdown)
            .run(track)
            .await;

        // The loop closed the buffer, so the copy finishes once it drains.
        match copier.await {
            Ok(Ok(copied)) => debug!("Piped {} bytes of PCM", copied),
            Ok(Err(e)) => warn!("PCM output failed: {}", e),
            Err(e) => warn!("PCM output task failed: {}", e),
        }
        result
    }
}
