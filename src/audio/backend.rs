//! Device factory used by the session at connect time.

use anyhow::Result;
use tokio::sync::mpsc;

use super::capture::{AlsaCapture, CaptureStream};
use super::output::{AlsaOutput, AudioOutput, SegmentId};
use crate::config::Config;

/// Opens the speaker and microphone for one session.
pub trait AudioBackend: Send + Sync {
    /// Open the 24 kHz output. Finished segment ids are sent on `done`.
    fn open_output(&self, done: mpsc::UnboundedSender<SegmentId>) -> Result<Box<dyn AudioOutput>>;

    /// Acquire the 16 kHz microphone without starting it.
    fn open_input(&self) -> Result<Box<dyn CaptureStream>>;
}

#[derive(Debug, Clone)]
pub struct AlsaBackend {
    capture_device: String,
    playback_device: String,
    playback_period_size: usize,
    output_gain: f32,
}

impl AlsaBackend {
    pub fn from_config(config: &Config) -> Self {
        Self {
            capture_device: config.capture_device.clone(),
            playback_device: config.playback_device.clone(),
            playback_period_size: config.playback_period_size,
            output_gain: config.output_gain,
        }
    }
}

impl AudioBackend for AlsaBackend {
    fn open_output(&self, done: mpsc::UnboundedSender<SegmentId>) -> Result<Box<dyn AudioOutput>> {
        let output = AlsaOutput::open(
            &self.playback_device,
            self.playback_period_size,
            self.output_gain,
            done,
        )?;
        Ok(Box::new(output))
    }

    fn open_input(&self) -> Result<Box<dyn CaptureStream>> {
        Ok(Box::new(AlsaCapture::open(&self.capture_device)?))
    }
}
