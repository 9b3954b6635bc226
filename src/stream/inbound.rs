//! Remote track -> decoder -> jitter buffer.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use super::StreamEnd;
use super::shutdown::Shutdown;
use crate::audio::buffers::JitterBuffer;
use crate::audio::codec::FrameDecoder;
use crate::audio::diagnostics::{Diagnostics, Stage, StageTimings};
use crate::audio::sample::i16_to_le_bytes;
use crate::config::DiagnosticsConfig;
use crate::error::{Error, Result};
use crate::session::media::{RemoteTrack, TrackError};

/// Decodes frames from one remote track into a jitter buffer until the
/// track ends, fails, or shutdown fires.
///
/// A frame that fails to decode is logged and skipped. The buffer is closed
/// on every exit, including when the task is dropped mid-await, so its
/// consumer sees end-of-stream.
pub struct InboundDecodeLoop<D: FrameDecoder> {
    decoder: D,
    buffer: Arc<JitterBuffer>,
    diagnostics: Diagnostics,
    timings: StageTimings,
    shutdown: Shutdown,
    pcm: Vec<i16>,
    bytes: Vec<u8>,
    /// Samples per channel of the last decoded frame, used to size FEC recovery.
    last_frame_samples: usize,
}

impl<D: FrameDecoder> InboundDecodeLoop<D> {
    pub fn new(
        decoder: D,
        buffer: Arc<JitterBuffer>,
        diagnostics: &DiagnosticsConfig,
        shutdown: Shutdown,
    ) -> Self {
        let pcm = vec![0; decoder.max_frame_len()];
        Self {
            decoder,
            buffer,
            diagnostics: Diagnostics::new(diagnostics.report_interval()),
            timings: StageTimings::new(diagnostics.timing_window),
            shutdown,
            pcm,
            bytes: Vec::new(),
            last_frame_samples: 0,
        }
    }

    pub async fn run(mut self, track: Arc<dyn RemoteTrack>) -> Result<StreamEnd> {
        info!("Inbound stream started for track {}", track.id());
        let result = self.decode_until_done(track.as_ref()).await;
        self.buffer.close();
        result
    }

    async fn decode_until_done(&mut self, track: &dyn RemoteTrack) -> Result<StreamEnd> {
        loop {
            let read_start = Instant::now();
            let next = tokio::select! {
                biased;
                _ = self.shutdown.wait() => None,
                frame = track.read_frame() => Some(frame),
            };

            let frame = match next {
                None => {
                    info!("Inbound stream cancelled");
                    return Ok(StreamEnd::Cancelled);
                }
                Some(Ok(frame)) => frame,
                Some(Err(TrackError::Ended)) => {
                    info!("Remote track ended");
                    return Ok(StreamEnd::Ended);
                }
                Some(Err(TrackError::Transport(message))) => {
                    error!("Remote track failed: {}", message);
                    return Err(Error::Transport(message));
                }
            };
            self.timings.add(Stage::Read, read_start.elapsed());

            let decode_start = Instant::now();
            let lost = self
                .diagnostics
                .record_packet(frame.sequence, frame.payload.len());
            if lost == 1 {
                self.recover_lost(&frame.payload)?;
            }

            let samples = match self.decoder.decode(&frame.payload, &mut self.pcm) {
                Ok(samples) => samples,
                Err(e) => {
                    warn!("Failed to decode frame {}: {:#}", frame.sequence, e);
                    self.diagnostics.record_decode_failure();
                    continue;
                }
            };
            self.timings.add(Stage::Decode, decode_start.elapsed());

            if samples == 0 {
                continue;
            }
            self.last_frame_samples = samples;

            let write_start = Instant::now();
            self.write_pcm(samples)?;
            self.timings.add(Stage::Write, write_start.elapsed());

            if let Some(report) = self.diagnostics.poll() {
                info!("Inbound: {}", report);
            }
            if let Some([read, decode, write]) = self.timings.finish_iteration() {
                debug!(
                    "Inbound loop averages: read {:?}, decode {:?}, write {:?}",
                    read, decode, write
                );
            }
        }
    }

    /// Rebuilds the single frame lost before `next_frame` from its FEC data.
    fn recover_lost(&mut self, next_frame: &[u8]) -> Result<()> {
        if self.last_frame_samples == 0 {
            return Ok(());
        }
        let len = self.last_frame_samples * self.decoder.channels();
        if len > self.pcm.len() {
            return Ok(());
        }

        match self.decoder.recover(next_frame, &mut self.pcm[..len]) {
            Ok(0) => Ok(()),
            Ok(samples) => {
                debug!("Recovered one lost frame from FEC");
                self.write_pcm(samples)
            }
            Err(e) => {
                debug!("FEC recovery failed: {:#}", e);
                Ok(())
            }
        }
    }

    fn write_pcm(&mut self, samples_per_channel: usize) -> Result<()> {
        let len = (samples_per_channel * self.decoder.channels()).min(self.pcm.len());
        let pcm = &self.pcm[..len];
        self.diagnostics.record_pcm(samples_per_channel, pcm);

        self.bytes.clear();
        i16_to_le_bytes(pcm, &mut self.bytes);
        self.buffer.write(&self.bytes)?;
        Ok(())
    }
}

impl<D: FrameDecoder> Drop for InboundDecodeLoop<D> {
    fn drop(&mut self) {
        self.buffer.close();
    }
}
