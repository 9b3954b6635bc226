//! Audio data types and processing.
//!
//! # Data Types
//! - [`AudioSample`] - Trait for sample types (i16, u16, f32) with saturating conversions
//! - [`frame::EncodedFrame`] - A compressed frame with sequence and timestamp
//! - [`frame::ReceivedFrame`] - A compressed frame as delivered by the network
//!
//! # Codec
//! - [`codec`] - Encoder/decoder traits used by the stream loops
//! - [`opus`] - Opus codec with FEC
//!
//! # Buffers
//! - [`buffers::JitterBuffer`] - Watermarked byte buffer between decode and playback
//!
//! # Diagnostics
//! - [`diagnostics::Diagnostics`] - Per-interval receive counters

pub mod buffers;
pub mod codec;
pub mod diagnostics;
pub mod frame;
pub mod opus;
pub mod sample;

pub use buffers::{JitterBuffer, JitterBufferStats, JitterReader};
pub use codec::{FrameDecoder, FrameEncoder};
pub use frame::{EncodedFrame, FramePacketizer, ReceivedFrame};
pub use opus::{OpusDecoder, OpusEncoder};
pub use sample::AudioSample;
