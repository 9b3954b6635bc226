//! Push-side capture plumbing.
//!
//! The device callback pushes whatever it recorded into a [`FrameAssembler`],
//! which cuts the stream into fixed-size frames and hands them to the encode
//! loop through a bounded channel. The loop reads them back through the
//! [`CaptureSource`] trait implemented by [`CaptureReceiver`].
//!
//! The callback never waits: when the channel is full the frame is dropped
//! and counted, and the reader is told about it as an overflow.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::config::AudioConfig;
use crate::pipeline::Pushable;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CaptureError {
    #[error("capture overflow, {dropped_frames} frame(s) dropped")]
    Overflow { dropped_frames: u64 },

    #[error("capture stream closed")]
    Closed,

    #[error("capture device error: {0}")]
    Device(String),
}

/// Source of fixed-duration interleaved PCM frames, samples in `[-1.0, 1.0]`.
#[async_trait]
pub trait CaptureSource: Send {
    /// Waits for the next complete frame.
    async fn read_frame(&mut self) -> Result<Vec<f32>, CaptureError>;
}

#[derive(Default)]
struct CaptureShared {
    dropped_frames: AtomicU64,
    device_error: Mutex<Option<String>>,
}

/// Creates a connected assembler/receiver pair for frames of `config`'s
/// size, fed by a device recording `device_channels` channels.
pub fn capture_channel(config: &AudioConfig, device_channels: u16) -> (FrameAssembler, CaptureReceiver) {
    let (tx, rx) = mpsc::channel(config.capture_queue_frames.max(1));
    let shared = Arc::new(CaptureShared::default());

    let assembler = FrameAssembler {
        frame_len: config.frame_len(),
        device_channels: device_channels.max(1) as usize,
        target_channels: config.channels as usize,
        pending: Vec::with_capacity(config.frame_len() * 2),
        tx,
        shared: shared.clone(),
    };
    let receiver = CaptureReceiver {
        rx,
        shared,
        reported_dropped: 0,
    };
    (assembler, receiver)
}

pub struct FrameAssembler {
    frame_len: usize,
    device_channels: usize,
    target_channels: usize,
    pending: Vec<f32>,
    tx: mpsc::Sender<Vec<f32>>,
    shared: Arc<CaptureShared>,
}

impl FrameAssembler {
    /// Records a device failure, reported once the receiver drains.
    pub fn device_error_handle(&self) -> DeviceErrorHandle {
        DeviceErrorHandle {
            shared: self.shared.clone(),
        }
    }
}

impl Pushable<[f32]> for FrameAssembler {
    fn push(&mut self, input: &[f32]) {
        remix(input, self.device_channels, self.target_channels, &mut self.pending);

        while self.pending.len() >= self.frame_len {
            let frame: Vec<f32> = self.pending.drain(..self.frame_len).collect();
            match self.tx.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.shared.dropped_frames.fetch_add(1, Ordering::Relaxed);
                }
                // Reader is gone; nothing left to do with the audio.
                Err(TrySendError::Closed(_)) => {
                    self.pending.clear();
                    return;
                }
            }
        }
    }
}

/// Lets the device error callback record why capture stopped.
#[derive(Clone)]
pub struct DeviceErrorHandle {
    shared: Arc<CaptureShared>,
}

impl DeviceErrorHandle {
    pub fn report(&self, message: String) {
        let mut slot = self.shared.device_error.lock();
        if slot.is_none() {
            *slot = Some(message);
        }
    }
}

pub struct CaptureReceiver {
    rx: mpsc::Receiver<Vec<f32>>,
    shared: Arc<CaptureShared>,
    reported_dropped: u64,
}

#[async_trait]
impl CaptureSource for CaptureReceiver {
    async fn read_frame(&mut self) -> Result<Vec<f32>, CaptureError> {
        let dropped = self.shared.dropped_frames.load(Ordering::Relaxed);
        if dropped > self.reported_dropped {
            let dropped_frames = dropped - self.reported_dropped;
            self.reported_dropped = dropped;
            return Err(CaptureError::Overflow { dropped_frames });
        }

        match self.rx.recv().await {
            Some(frame) => Ok(frame),
            None => match self.shared.device_error.lock().take() {
                Some(message) => Err(CaptureError::Device(message)),
                None => Err(CaptureError::Closed),
            },
        }
    }
}

/// Appends `input` (interleaved, `from` channels) to `out` as `to` channels.
///
/// Mono is duplicated to every output channel, anything folded down to mono
/// is averaged, and other layouts map channel-by-channel, repeating the last
/// source channel when widening.
pub fn remix(input: &[f32], from: usize, to: usize, out: &mut Vec<f32>) {
    if from == to {
        out.extend_from_slice(input);
        return;
    }

    for frame in input.chunks_exact(from) {
        if to == 1 {
            out.push(frame.iter().sum::<f32>() / from as f32);
        } else {
            out.extend((0..to).map(|c| frame[c.min(from - 1)]));
        }
    }
}
