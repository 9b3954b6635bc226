//! Capture -> encoder -> local track.

use std::sync::Arc;

use tracing::{error, info, warn};

use super::StreamEnd;
use super::shutdown::Shutdown;
use crate::audio::codec::FrameEncoder;
use crate::audio::frame::FramePacketizer;
use crate::audio::sample::f32_slice_to_i16;
use crate::config::AudioConfig;
use crate::error::{Error, Result};
use crate::io::capture::{CaptureError, CaptureSource};
use crate::session::media::LocalTrack;

/// Encodes captured frames and sends them on the local track.
///
/// Overflows and encode failures cost one frame each and the loop carries
/// on. A failed send ends the loop, since the transport is gone.
pub struct OutboundEncodeLoop<C: CaptureSource, E: FrameEncoder> {
    capture: C,
    encoder: E,
    packetizer: FramePacketizer,
    shutdown: Shutdown,
    pcm: Vec<i16>,
}

impl<C: CaptureSource, E: FrameEncoder> OutboundEncodeLoop<C, E> {
    pub fn new(capture: C, encoder: E, config: &AudioConfig, shutdown: Shutdown) -> Self {
        Self {
            capture,
            encoder,
            packetizer: FramePacketizer::new(config),
            shutdown,
            pcm: Vec::with_capacity(config.frame_len()),
        }
    }

    pub async fn run(mut self, track: Arc<dyn LocalTrack>) -> Result<StreamEnd> {
        info!("Outbound stream started");
        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.wait() => None,
                frame = self.capture.read_frame() => Some(frame),
            };

            let frame = match next {
                None => {
                    info!("Outbound stream cancelled");
                    return Ok(StreamEnd::Cancelled);
                }
                Some(Ok(frame)) => frame,
                Some(Err(CaptureError::Overflow { dropped_frames })) => {
                    warn!("Capture overflow, {} frame(s) dropped", dropped_frames);
                    for _ in 0..dropped_frames {
                        self.packetizer.skip();
                    }
                    continue;
                }
                Some(Err(CaptureError::Closed)) => {
                    info!("Capture ended");
                    return Ok(StreamEnd::Ended);
                }
                Some(Err(CaptureError::Device(message))) => {
                    error!("Capture device failed: {}", message);
                    return Err(Error::Device(message));
                }
            };

            f32_slice_to_i16(&frame, &mut self.pcm);
            let encoded = match self.encoder.encode(&self.pcm) {
                Ok(data) => self.packetizer.pack(data),
                Err(e) => {
                    warn!("Failed to encode frame: {:#}", e);
                    self.packetizer.skip();
                    continue;
                }
            };

            if let Err(e) = track.send_frame(&encoded).await {
                error!("Failed to send frame {}: {:#}", encoded.sequence, e);
                return Err(Error::Transport(format!("{e:#}")));
            }
        }
    }
}
