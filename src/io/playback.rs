//! Pull-side adapter between the jitter buffer and a playback device.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::audio::buffers::JitterBuffer;
use crate::audio::sample::{AudioSample, le_bytes_to_i16};
use crate::pipeline::Pullable;

/// Serves hardware pull requests from a [`JitterBuffer`] without ever
/// waiting on it. Whatever the buffer cannot supply right now is played as
/// silence.
pub struct PlaybackAdapter {
    buffer: Arc<JitterBuffer>,
    scratch: Vec<u8>,
    short_pulls: Arc<AtomicU64>,
}

impl PlaybackAdapter {
    pub fn new(buffer: Arc<JitterBuffer>) -> Self {
        Self {
            buffer,
            scratch: Vec::new(),
            short_pulls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Sizes the scratch space up front so the first callbacks don't allocate.
    pub fn with_capacity(buffer: Arc<JitterBuffer>, samples: usize) -> Self {
        let mut adapter = Self::new(buffer);
        adapter.scratch.resize(samples * 2, 0);
        adapter
    }

    /// Counter of pulls that had to be padded with silence.
    pub fn short_pulls(&self) -> Arc<AtomicU64> {
        self.short_pulls.clone()
    }
}

impl Pullable<i16> for PlaybackAdapter {
    fn pull(&mut self, out: &mut [i16]) -> usize {
        let wanted = out.len() * 2;
        if self.scratch.len() < wanted {
            self.scratch.resize(wanted, 0);
        }

        let got = self.buffer.try_read(&mut self.scratch[..wanted]);
        let samples = le_bytes_to_i16(&self.scratch[..got], out);
        out[samples..].fill(i16::silence());

        if samples < out.len() {
            self.short_pulls.fetch_add(1, Ordering::Relaxed);
        }
        samples
    }
}
