//! Audio buffer implementations.
//!
//! - [`JitterBuffer`] - Bounded-latency byte buffer with low/high watermarks
//! - [`JitterReader`] - Blocking [`std::io::Read`] view of a [`JitterBuffer`]

pub mod jitter_buffer;

pub use jitter_buffer::{JitterBuffer, JitterBufferStats, JitterReader};
