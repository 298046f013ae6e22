//! Microphone capture.
//!
//! Uses a dedicated std::thread for ALSA reads. Blocks are pushed into the
//! session queue with `try_send`; when the queue is full the block is dropped,
//! since late microphone audio is worthless to a live conversation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use alsa::pcm::PCM;
use anyhow::{Context, Result, bail};
use tokio::sync::mpsc::{self, error::TrySendError};

use super::alsa_device::{self, AlsaParams};
use super::codec::i16_to_sample;
use super::{CAPTURE_BLOCK_SIZE, CAPTURE_SAMPLE_RATE};

/// A microphone that has been acquired but not necessarily started.
pub trait CaptureStream: Send {
    /// Begin delivering fixed-size blocks into `blocks`.
    fn start(&mut self, blocks: mpsc::Sender<Vec<f32>>) -> Result<()>;

    /// Stop delivery and release the device. Safe to call repeatedly and
    /// before `start`.
    fn stop(&mut self);
}

/// Cuts an arbitrary stream of i16 periods into normalized blocks of exactly
/// `block_size` samples.
#[derive(Debug)]
pub struct BlockAssembler {
    block_size: usize,
    pending: Vec<f32>,
}

impl BlockAssembler {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size,
            pending: Vec::with_capacity(block_size),
        }
    }

    /// Append samples, calling `emit` for every completed block.
    pub fn push(&mut self, samples: &[i16], mut emit: impl FnMut(Vec<f32>)) {
        for &s in samples {
            self.pending.push(i16_to_sample(s));
            if self.pending.len() == self.block_size {
                let block = std::mem::replace(&mut self.pending, Vec::with_capacity(self.block_size));
                emit(block);
            }
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// ALSA-backed microphone.
pub struct AlsaCapture {
    device: String,
    pcm: Option<(PCM, AlsaParams)>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AlsaCapture {
    /// Acquire the capture device at 16 kHz mono.
    pub fn open(device: &str) -> Result<Self> {
        let opened = alsa_device::open_capture(device, CAPTURE_SAMPLE_RATE)
            .with_context(|| format!("Cannot acquire microphone '{}'", device))?;
        Ok(Self {
            device: device.to_string(),
            pcm: Some(opened),
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        })
    }
}

impl CaptureStream for AlsaCapture {
    fn start(&mut self, blocks: mpsc::Sender<Vec<f32>>) -> Result<()> {
        let Some((pcm, params)) = self.pcm.take() else {
            bail!("Capture device '{}' already started or released", self.device);
        };

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let handle = thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                // Dropping `blocks` on exit tells the session the microphone is gone.
                if let Err(e) = capture_thread(pcm, params, blocks, &running) {
                    log::error!("Capture thread error: {}", e);
                }
            })?;
        self.handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
            log::info!("Microphone '{}' released", self.device);
        }
        // Never started: dropping the PCM closes the device.
        if self.pcm.take().is_some() {
            log::info!("Microphone '{}' released before capture started", self.device);
        }
    }
}

impl Drop for AlsaCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_thread(
    pcm: PCM,
    params: AlsaParams,
    blocks: mpsc::Sender<Vec<f32>>,
    running: &AtomicBool,
) -> Result<()> {
    let io = pcm.io_i16()?;
    let mut read_buf = vec![0i16; params.period_size.max(1)];
    let mut assembler = BlockAssembler::new(CAPTURE_BLOCK_SIZE);
    let mut receiver_gone = false;

    log::info!(
        "Capture started: rate={}, period={}, block={}",
        params.sample_rate,
        params.period_size,
        CAPTURE_BLOCK_SIZE,
    );

    while running.load(Ordering::Relaxed) && !receiver_gone {
        match io.readi(&mut read_buf) {
            Ok(frames) => {
                assembler.push(&read_buf[..frames], |block| match blocks.try_send(block) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        log::debug!("Capture queue full, dropping block");
                    }
                    Err(TrySendError::Closed(_)) => receiver_gone = true,
                });
            }
            Err(e) => {
                log::warn!("ALSA capture error: {}, recovering...", e);
                if let Err(e2) = pcm.prepare() {
                    log::error!("Failed to recover PCM capture: {}", e2);
                    break;
                }
            }
        }
    }

    log::info!("Capture stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembler_emits_exact_blocks_across_periods() {
        let mut assembler = BlockAssembler::new(4);
        let mut blocks = Vec::new();

        assembler.push(&[0, 16384, -16384], |b| blocks.push(b));
        assert!(blocks.is_empty());
        assert_eq!(assembler.pending_len(), 3);

        assembler.push(&[i16::MIN, 1, 2, 3, 4, 5], |b| blocks.push(b));
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0], vec![0.0, 0.5, -0.5, -1.0]);
        assert!(blocks.iter().all(|b| b.len() == 4));
        assert_eq!(assembler.pending_len(), 1);
    }

    #[test]
    fn capture_block_is_256ms() {
        let ms = CAPTURE_BLOCK_SIZE as f64 * 1000.0 / CAPTURE_SAMPLE_RATE as f64;
        assert_eq!(ms, 256.0);
    }
}
