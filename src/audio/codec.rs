//! Codec seams used by the stream loops.
//!
//! The loops only see these traits, so tests can drive them with scripted
//! codecs and the binary plugs in [`super::opus`].

use anyhow::Result;

/// Compresses one fixed-size frame of interleaved i16 PCM.
pub trait FrameEncoder: Send {
    /// Returns the encoded bytes. The slice is valid until the next call.
    fn encode(&mut self, pcm: &[i16]) -> Result<&[u8]>;
}

/// Expands compressed frames back into interleaved i16 PCM.
pub trait FrameDecoder: Send {
    fn channels(&self) -> usize;

    /// Interleaved sample count the decoder may write for one frame.
    fn max_frame_len(&self) -> usize;

    /// Decodes `frame` into `pcm` and returns the samples written per channel.
    fn decode(&mut self, frame: &[u8], pcm: &mut [i16]) -> Result<usize>;

    /// Reconstructs the frame lost just before `next_frame` from the
    /// redundancy carried in `next_frame`. `pcm.len()` must be exactly one
    /// frame. Decoders without redundancy support return `Ok(0)`.
    fn recover(&mut self, _next_frame: &[u8], _pcm: &mut [i16]) -> Result<usize> {
        Ok(0)
    }
}
