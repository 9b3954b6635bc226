//! Sample representations and conversions between them.
//!
//! Every float to fixed-point conversion here saturates: values outside
//! `[-1.0, 1.0]` clamp to the nearest representable extremum instead of
//! wrapping.

use std::fmt::Debug;

use num_traits::{Bounded, FromPrimitive, Num, ToPrimitive};

pub trait AudioSample:
    Num + Copy + Send + Sync + PartialOrd + ToPrimitive + FromPrimitive + Bounded + Debug + 'static
{
    fn silence() -> Self;

    fn to_f64_normalized(self) -> f64;

    fn from_f64_normalized(value: f64) -> Self;
}

impl AudioSample for f32 {
    fn silence() -> Self {
        0.0
    }

    fn to_f64_normalized(self) -> f64 {
        self as f64
    }

    fn from_f64_normalized(value: f64) -> Self {
        value.clamp(-1.0, 1.0) as f32
    }
}

impl AudioSample for i16 {
    fn silence() -> Self {
        0
    }

    fn to_f64_normalized(self) -> f64 {
        self as f64 / 32768.0
    }

    fn from_f64_normalized(value: f64) -> Self {
        // NaN survives clamp and then casts to 0.
        (value * i16::MAX as f64).clamp(i16::MIN as f64, i16::MAX as f64) as i16
    }
}

impl AudioSample for u16 {
    fn silence() -> Self {
        32768
    }

    fn to_f64_normalized(self) -> f64 {
        (self as f64 - 32768.0) / 32768.0
    }

    fn from_f64_normalized(value: f64) -> Self {
        ((value * 32768.0) + 32768.0).clamp(0.0, u16::MAX as f64) as u16
    }
}

/// Converts one float sample to i16, saturating out-of-range input.
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    i16::from_f64_normalized(sample as f64)
}

#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Converts an interleaved float frame into `out`, replacing its contents.
pub fn f32_slice_to_i16(input: &[f32], out: &mut Vec<i16>) {
    out.clear();
    out.extend(input.iter().map(|&s| f32_to_i16(s)));
}

/// Appends `samples` to `out` as little-endian byte pairs.
pub fn i16_to_le_bytes(samples: &[i16], out: &mut Vec<u8>) {
    out.reserve(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
}

/// Decodes little-endian byte pairs into `out`. A trailing odd byte is ignored.
/// Returns the number of samples written.
pub fn le_bytes_to_i16(bytes: &[u8], out: &mut [i16]) -> usize {
    let mut written = 0;
    for (pair, slot) in bytes.chunks_exact(2).zip(out.iter_mut()) {
        *slot = i16::from_le_bytes([pair[0], pair[1]]);
        written += 1;
    }
    written
}
