//! PCM conversions between device samples and the wire representation.
//!
//! The wire carries mono 16-bit little-endian PCM, base64 encoded.

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD};

use crate::error::SessionError;

use super::CAPTURE_SAMPLE_RATE;

/// Bytes per 16-bit sample on the wire.
pub const SAMPLE_WIDTH: usize = 2;

/// Base64 PCM plus its MIME type, ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    pub mime_type: String,
    pub data: String,
}

/// Decoded mono audio at a fixed sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl PlaybackBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    pub fn samples(&self) -> &Arc<[f32]> {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames(&self) -> usize {
        self.samples.len()
    }

    /// Length in seconds.
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Scale a normalized sample to i16. NaN maps to silence, everything else is
/// clamped to the full range.
#[inline]
pub fn sample_to_i16(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    (sample * 32768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

#[inline]
pub fn i16_to_sample(value: i16) -> f32 {
    value as f32 / 32768.0
}

/// Encode samples recorded at `sample_rate`.
pub fn encode(samples: &[f32], sample_rate: u32) -> EncodedChunk {
    let mut bytes = Vec::with_capacity(samples.len() * SAMPLE_WIDTH);
    for &sample in samples {
        bytes.extend_from_slice(&sample_to_i16(sample).to_le_bytes());
    }
    EncodedChunk {
        mime_type: pcm_mime_type(sample_rate),
        data: STANDARD.encode(&bytes),
    }
}

/// Encode one captured microphone block.
pub fn encode_block(samples: &[f32]) -> EncodedChunk {
    encode(samples, CAPTURE_SAMPLE_RATE)
}

/// Decode a base64 PCM payload into a playable buffer.
pub fn decode(data: &str, sample_rate: u32) -> Result<PlaybackBuffer, SessionError> {
    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|e| SessionError::Decode(format!("invalid base64: {}", e)))?;

    if bytes.len() % SAMPLE_WIDTH != 0 {
        return Err(SessionError::Decode(format!(
            "{} bytes is not a whole number of 16-bit samples",
            bytes.len()
        )));
    }

    let samples = bytes
        .chunks_exact(SAMPLE_WIDTH)
        .map(|pair| i16_to_sample(i16::from_le_bytes([pair[0], pair[1]])))
        .collect();

    Ok(PlaybackBuffer::new(samples, sample_rate))
}
