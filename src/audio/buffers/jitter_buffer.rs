//! A byte-oriented jitter buffer between network-paced decode and
//! hardware-paced playback.
//!
//! The producer never blocks. When a write would push the fill above the
//! high-water mark, the oldest bytes are discarded first, so latency stays
//! bounded and the retained bytes are always the most recent suffix of the
//! stream. Discards are rounded up to whole sample frames.
//!
//! Two consumer flavours:
//! - [`JitterBuffer::read`] blocks until the fill reaches the low-water mark
//!   or the buffer is closed.
//! - [`JitterBuffer::try_read`] never blocks. After running dry it stays
//!   silent until the low-water mark is reached again.
//!
//! All locking is internal. The buffer has one producer and one consumer.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::config::{AudioConfig, BufferConfig};
use crate::error::{Error, Result};

/// Counters for buffer behaviour, readable without taking the buffer lock.
#[derive(Default)]
pub struct JitterBufferStats {
    bytes_written: AtomicU64,
    bytes_dropped: AtomicU64,
    underruns: AtomicU64,
}

impl JitterBufferStats {
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Bytes discarded by the high-water policy, including the head of any
    /// single write larger than the high-water mark.
    pub fn bytes_dropped(&self) -> u64 {
        self.bytes_dropped.load(Ordering::Relaxed)
    }

    /// Times a non-blocking reader drained the buffer to empty.
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }
}

struct BufferState {
    data: VecDeque<u8>,
    closed: bool,
    /// Non-blocking reads are enabled. Cleared when the buffer runs dry.
    primed: bool,
}

pub struct JitterBuffer {
    state: Mutex<BufferState>,
    readable: Condvar,
    capacity: usize,
    low_water: usize,
    high_water: usize,
    align: usize,
    stats: JitterBufferStats,
}

impl JitterBuffer {
    /// Creates a buffer with explicit byte thresholds.
    ///
    /// `align` is the size of one interleaved sample frame. Requires
    /// `low_water < high_water < capacity` and `align > 0`.
    pub fn new(capacity: usize, low_water: usize, high_water: usize, align: usize) -> Result<Self> {
        if align == 0 {
            return Err(Error::InvalidConfig("buffer alignment must be > 0".into()));
        }
        if !(low_water < high_water && high_water < capacity) {
            return Err(Error::InvalidConfig(format!(
                "buffer watermarks must satisfy low < high < capacity, got {} / {} / {}",
                low_water, high_water, capacity
            )));
        }

        Ok(Self {
            state: Mutex::new(BufferState {
                data: VecDeque::with_capacity(capacity),
                closed: false,
                primed: false,
            }),
            readable: Condvar::new(),
            capacity,
            low_water,
            high_water,
            align,
            stats: JitterBufferStats::default(),
        })
    }

    /// Sizes a buffer for i16 PCM in the given format.
    pub fn for_format(audio: &AudioConfig, buffer: &BufferConfig) -> Result<Self> {
        Self::new(
            audio.bytes_for_ms(buffer.capacity_ms),
            audio.bytes_for_ms(buffer.low_water_ms),
            audio.bytes_for_ms(buffer.high_water_ms),
            audio.bytes_per_frame(),
        )
    }

    /// Appends `data`, discarding the oldest buffered bytes if the result
    /// would exceed the high-water mark.
    ///
    /// Returns the number of bytes accepted from the caller (always
    /// `data.len()`), or [`Error::BufferClosed`] after [`close`](Self::close).
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::BufferClosed);
        }

        let mut incoming = data;
        let mut dropped = 0usize;

        if incoming.len() > self.high_water {
            let skip = round_up(incoming.len() - self.high_water, self.align).min(incoming.len());
            dropped += state.data.len() + skip;
            state.data.clear();
            incoming = &incoming[skip..];
        } else if state.data.len() + incoming.len() > self.high_water {
            let excess = state.data.len() + incoming.len() - self.high_water;
            let discard = round_up(excess, self.align).min(state.data.len());
            state.data.drain(..discard);
            dropped += discard;
        }

        state.data.extend(incoming.iter().copied());
        debug_assert!(state.data.len() <= self.high_water);

        if dropped > 0 {
            self.stats.bytes_dropped.fetch_add(dropped as u64, Ordering::Relaxed);
            debug!(
                "Jitter buffer over high-water, dropped {} oldest bytes (fill {})",
                dropped,
                state.data.len()
            );
        }
        self.stats
            .bytes_written
            .fetch_add(data.len() as u64, Ordering::Relaxed);

        let wake = state.data.len() >= self.low_water;
        drop(state);
        if wake {
            self.readable.notify_all();
        }

        Ok(data.len())
    }

    /// Blocks until the fill reaches the low-water mark or the buffer is
    /// closed, then copies up to `out.len()` bytes.
    ///
    /// Returns `None` once the buffer is closed and fully drained.
    pub fn read(&self, out: &mut [u8]) -> Option<usize> {
        let threshold = self.low_water.max(1);
        let mut state = self.state.lock();
        while state.data.len() < threshold && !state.closed {
            self.readable.wait(&mut state);
        }

        if state.data.is_empty() {
            return None;
        }
        Some(copy_out(&mut state.data, out))
    }

    /// Copies whatever is immediately available into `out` without waiting.
    ///
    /// After the buffer runs dry, returns 0 until the low-water mark is
    /// reached again (or the buffer is closed with data left), so playback
    /// restarts with a full cushion instead of stuttering on every packet.
    pub fn try_read(&self, out: &mut [u8]) -> usize {
        let mut state = self.state.lock();

        if !state.primed {
            let ready = state.data.len() >= self.low_water.max(1)
                || (state.closed && !state.data.is_empty());
            if !ready {
                return 0;
            }
            state.primed = true;
        }

        let n = copy_out(&mut state.data, out);
        if state.data.is_empty() {
            state.primed = false;
            if !state.closed {
                self.stats.underruns.fetch_add(1, Ordering::Relaxed);
            }
        }
        n
    }

    /// Marks the buffer closed and wakes every blocked reader. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if !state.closed {
            state.closed = true;
            debug!("Jitter buffer closed with {} bytes left", state.data.len());
        }
        drop(state);
        self.readable.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn low_water(&self) -> usize {
        self.low_water
    }

    pub fn high_water(&self) -> usize {
        self.high_water
    }

    pub fn stats(&self) -> &JitterBufferStats {
        &self.stats
    }
}

fn round_up(n: usize, align: usize) -> usize {
    n.div_ceil(align) * align
}

fn copy_out(data: &mut VecDeque<u8>, out: &mut [u8]) -> usize {
    let n = out.len().min(data.len());
    let (front, back) = data.as_slices();
    let from_front = n.min(front.len());
    out[..from_front].copy_from_slice(&front[..from_front]);
    out[from_front..n].copy_from_slice(&back[..n - from_front]);
    data.drain(..n);
    n
}

/// [`io::Read`] adapter over the blocking read. End of stream reads as `Ok(0)`.
pub struct JitterReader {
    buffer: Arc<JitterBuffer>,
}

impl JitterReader {
    pub fn new(buffer: Arc<JitterBuffer>) -> Self {
        Self { buffer }
    }
}

impl io::Read for JitterReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        Ok(self.buffer.read(buf).unwrap_or(0))
    }
}
