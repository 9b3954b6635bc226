use std::time::Duration;

use bytes::Bytes;

use crate::config::AudioConfig;

/// One compressed frame ready for transmission.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedFrame {
    /// Monotonic per-stream frame counter, starting at 0.
    pub sequence: u64,

    /// Position of the first sample, in sample-clock units.
    pub timestamp: u64,

    /// Nominal playback duration of the frame.
    pub duration: Duration,

    pub data: Bytes,
}

/// One compressed frame as delivered by the network.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedFrame {
    /// Transport sequence number (wraps at `u16::MAX`).
    pub sequence: u16,
    pub payload: Bytes,
}

/// Stamps encoded payloads with sequence numbers and sample-clock timestamps.
///
/// Timestamps advance by exactly one frame per packed payload, so skipped
/// frames (encode failures) leave no gap in the sequence but do advance time.
#[derive(Debug)]
pub struct FramePacketizer {
    next_sequence: u64,
    next_timestamp: u64,
    samples_per_frame: u64,
    duration: Duration,
}

impl FramePacketizer {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            next_sequence: 0,
            next_timestamp: 0,
            samples_per_frame: config.frame_samples() as u64,
            duration: config.frame_duration(),
        }
    }

    pub fn pack(&mut self, data: &[u8]) -> EncodedFrame {
        let frame = EncodedFrame {
            sequence: self.next_sequence,
            timestamp: self.next_timestamp,
            duration: self.duration,
            data: Bytes::copy_from_slice(data),
        };
        self.next_sequence += 1;
        self.next_timestamp += self.samples_per_frame;
        frame
    }

    /// Advances the clock over a frame that was captured but not sent.
    pub fn skip(&mut self) {
        self.next_timestamp += self.samples_per_frame;
    }
}
