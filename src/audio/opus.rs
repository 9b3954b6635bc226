//! Opus codec integration with Forward Error Correction (FEC).
//!
//! Opus is configured with:
//! - **Inband FEC**: each packet carries redundant data for the previous frame,
//!   so a single lost packet can be rebuilt from the one after it.
//! - **VoIP mode**: tuned for speech intelligibility.

use anyhow::{Context, Result};
use opus::{Application, Bitrate, Channels, Decoder, Encoder};

use super::codec::{FrameDecoder, FrameEncoder};
use crate::config::AudioConfig;

const OPUS_BITRATE: i32 = 64000;
const OPUS_EXPECTED_PACKET_LOSS: i32 = 10;
const MAX_OPUS_PACKET_SIZE: usize = 4000;
/// 120 ms at 48 kHz, the longest frame Opus can emit.
const MAX_FRAME_SAMPLES: usize = 5760;

const VALID_FRAME_DURATIONS_MS: [f64; 6] = [2.5, 5.0, 10.0, 20.0, 40.0, 60.0];

pub fn is_valid_frame_duration(duration_ms: f64) -> bool {
    VALID_FRAME_DURATIONS_MS
        .iter()
        .any(|&valid| (valid - duration_ms).abs() < f64::EPSILON)
}

fn channels_to_opus(channels: u16) -> Result<Channels> {
    match channels {
        1 => Ok(Channels::Mono),
        2 => Ok(Channels::Stereo),
        _ => anyhow::bail!("Opus only supports 1 or 2 channels, got {}", channels),
    }
}

pub struct OpusEncoder {
    encoder: Encoder,
    frame_len: usize,
    output_buffer: Vec<u8>,
}

impl OpusEncoder {
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let channels = channels_to_opus(config.channels)?;

        let mut encoder = Encoder::new(config.sample_rate, channels, Application::Voip)
            .context("Failed to create Opus encoder")?;

        encoder
            .set_bitrate(Bitrate::Bits(OPUS_BITRATE))
            .context("Failed to set bitrate")?;

        encoder
            .set_inband_fec(true)
            .context("Failed to enable FEC")?;

        encoder
            .set_packet_loss_perc(OPUS_EXPECTED_PACKET_LOSS)
            .context("Failed to set packet loss percentage")?;

        Ok(Self {
            encoder,
            frame_len: config.frame_len(),
            output_buffer: vec![0u8; MAX_OPUS_PACKET_SIZE],
        })
    }
}

impl FrameEncoder for OpusEncoder {
    fn encode(&mut self, pcm: &[i16]) -> Result<&[u8]> {
        if pcm.len() != self.frame_len {
            anyhow::bail!(
                "Invalid Opus frame: {} samples, expected {}",
                pcm.len(),
                self.frame_len
            );
        }

        let len = self
            .encoder
            .encode(pcm, &mut self.output_buffer)
            .context("Opus encoding failed")?;

        Ok(&self.output_buffer[..len])
    }
}

pub struct OpusDecoder {
    decoder: Decoder,
    channels: usize,
}

impl OpusDecoder {
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let channels = channels_to_opus(config.channels)?;

        let decoder = Decoder::new(config.sample_rate, channels)
            .context("Failed to create Opus decoder")?;

        Ok(Self {
            decoder,
            channels: config.channels as usize,
        })
    }
}

impl FrameDecoder for OpusDecoder {
    fn channels(&self) -> usize {
        self.channels
    }

    fn max_frame_len(&self) -> usize {
        MAX_FRAME_SAMPLES * self.channels
    }

    fn decode(&mut self, frame: &[u8], pcm: &mut [i16]) -> Result<usize> {
        if frame.is_empty() {
            anyhow::bail!("Empty Opus packet");
        }
        self.decoder
            .decode(frame, pcm, false)
            .context("Opus decoding failed")
    }

    fn recover(&mut self, next_frame: &[u8], pcm: &mut [i16]) -> Result<usize> {
        if next_frame.is_empty() {
            return Ok(0);
        }
        self.decoder
            .decode(next_frame, pcm, true)
            .context("FEC decoding failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(frame_len: usize, frames: usize) -> Vec<i16> {
        (0..frame_len * frames)
            .map(|i| ((i as f32 * 0.05).sin() * 8000.0) as i16)
            .collect()
    }

    #[test]
    fn test_frame_duration_validation() {
        assert!(is_valid_frame_duration(20.0));
        assert!(is_valid_frame_duration(2.5));
        assert!(!is_valid_frame_duration(15.0));
        assert!(!is_valid_frame_duration(0.0));
    }

    #[test]
    fn test_encode_decode_frames() {
        let config = AudioConfig::default();
        let mut encoder = OpusEncoder::new(&config).unwrap();
        let mut decoder = OpusDecoder::new(&config).unwrap();
        let mut pcm = vec![0i16; decoder.max_frame_len()];

        let input = tone(config.frame_len(), 3);
        for frame in input.chunks(config.frame_len()) {
            let encoded = encoder.encode(frame).unwrap().to_vec();
            assert!(!encoded.is_empty());
            assert!(encoded.len() < frame.len() * 2);

            let samples = decoder.decode(&encoded, &mut pcm).unwrap();
            assert_eq!(samples, config.frame_samples());
        }
    }

    #[test]
    fn test_encoder_rejects_wrong_frame_size() {
        let config = AudioConfig::default();
        let mut encoder = OpusEncoder::new(&config).unwrap();
        assert!(encoder.encode(&[0i16; 100]).is_err());
    }

    #[test]
    fn test_decoder_rejects_garbage() {
        let config = AudioConfig::default();
        let mut decoder = OpusDecoder::new(&config).unwrap();
        let mut pcm = vec![0i16; decoder.max_frame_len()];
        assert!(decoder.decode(&[], &mut pcm).is_err());
    }

    #[test]
    fn test_recover_lost_frame_from_next() {
        let config = AudioConfig::default();
        let mut encoder = OpusEncoder::new(&config).unwrap();
        let mut decoder = OpusDecoder::new(&config).unwrap();
        let mut pcm = vec![0i16; decoder.max_frame_len()];

        let input = tone(config.frame_len(), 3);
        let packets: Vec<Vec<u8>> = input
            .chunks(config.frame_len())
            .map(|f| encoder.encode(f).unwrap().to_vec())
            .collect();

        decoder.decode(&packets[0], &mut pcm).unwrap();
        let recovered = decoder
            .recover(&packets[2], &mut pcm[..config.frame_len()])
            .unwrap();
        assert_eq!(recovered, config.frame_samples());
    }
}
