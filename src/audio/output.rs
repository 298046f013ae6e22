//! Speaker output with a sample-accurate timeline.
//!
//! The ALSA implementation runs a mixer on its own OS thread. Its clock is the
//! mix horizon: the number of frames already mixed, divided by the sample rate.
//! Each segment starts on the exact frame that corresponds to its start time,
//! so two segments scheduled back to back share a boundary frame with no gap.
//! A segment whose start frame is already behind the horizon loses its head
//! instead of being delayed, so its end frame never moves.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use alsa::pcm::PCM;
use anyhow::{Context, Result, bail};
use tokio::sync::mpsc;

use super::alsa_device::{self, AlsaParams};
use super::codec::{PlaybackBuffer, sample_to_i16};
use super::PLAYBACK_SAMPLE_RATE;

/// Handle identifying one scheduled segment.
pub type SegmentId = u64;

/// An output device with its own playback clock.
///
/// Natural completion of a segment is reported through the completion
/// channel handed to the backend when the output was opened.
pub trait AudioOutput: Send {
    /// Current position of the device clock, in seconds.
    fn current_time(&self) -> f64;

    /// Arrange for `buffer` to begin at `when` on the device clock.
    fn start(&mut self, id: SegmentId, buffer: &PlaybackBuffer, when: f64) -> Result<()>;

    /// Halt a segment immediately. Fails if it already finished.
    fn stop(&mut self, id: SegmentId) -> Result<()>;

    /// Release the device. Idempotent.
    fn close(&mut self);
}

struct Voice {
    id: SegmentId,
    samples: Arc<[f32]>,
    start_frame: u64,
    cursor: usize,
}

/// Mix every voice overlapping `[period_start, period_start + mix.len())`
/// into `mix`, returning the ids of voices that ran out during this period.
fn mix_period(voices: &mut Vec<Voice>, period_start: u64, mix: &mut [f32]) -> Vec<SegmentId> {
    mix.fill(0.0);
    let period_end = period_start + mix.len() as u64;
    let mut finished = Vec::new();

    voices.retain_mut(|voice| {
        if voice.start_frame >= period_end {
            return true;
        }
        let offset = voice.start_frame.saturating_sub(period_start) as usize;
        // Samples that fell due before this period are skipped, never shifted.
        let due = period_start.saturating_sub(voice.start_frame) as usize;
        voice.cursor = voice.cursor.max(due).min(voice.samples.len());
        let remaining = &voice.samples[voice.cursor..];
        let n = remaining.len().min(mix.len() - offset);
        for (dst, src) in mix[offset..offset + n].iter_mut().zip(remaining) {
            *dst += *src;
        }
        voice.cursor += n;
        if voice.cursor >= voice.samples.len() {
            finished.push(voice.id);
            false
        } else {
            true
        }
    });

    finished
}

struct Shared {
    voices: Mutex<Vec<Voice>>,
    /// Frames mixed so far. Only advanced with `voices` locked.
    frames_mixed: AtomicU64,
    running: AtomicBool,
}

/// ALSA-backed speaker at 24 kHz mono.
pub struct AlsaOutput {
    device: String,
    sample_rate: u32,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl AlsaOutput {
    /// Open the playback device and start the mixer thread.
    pub fn open(
        device: &str,
        period_size: usize,
        gain: f32,
        done: mpsc::UnboundedSender<SegmentId>,
    ) -> Result<Self> {
        let period = if period_size > 0 { Some(period_size) } else { None };
        let (pcm, params) = alsa_device::open_playback(device, PLAYBACK_SAMPLE_RATE, period)
            .with_context(|| format!("Cannot open speaker '{}'", device))?;

        let shared = Arc::new(Shared {
            voices: Mutex::new(Vec::new()),
            frames_mixed: AtomicU64::new(0),
            running: AtomicBool::new(true),
        });

        let handle = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("audio-mixer".into())
                .spawn(move || {
                    // Dropping `done` on exit tells the session the speaker is gone.
                    if let Err(e) = mixer_thread(pcm, params, gain, &shared, done) {
                        log::error!("Mixer thread error: {:#}", e);
                    }
                    shared.running.store(false, Ordering::SeqCst);
                })?
        };

        Ok(Self {
            device: device.to_string(),
            sample_rate: PLAYBACK_SAMPLE_RATE,
            shared,
            handle: Some(handle),
        })
    }

    fn voices(&self) -> std::sync::MutexGuard<'_, Vec<Voice>> {
        self.shared
            .voices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl AudioOutput for AlsaOutput {
    fn current_time(&self) -> f64 {
        self.shared.frames_mixed.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    fn start(&mut self, id: SegmentId, buffer: &PlaybackBuffer, when: f64) -> Result<()> {
        if !self.shared.running.load(Ordering::SeqCst) {
            bail!("Speaker '{}' is closed", self.device);
        }
        if buffer.sample_rate() != self.sample_rate {
            bail!(
                "Segment is {}Hz but the speaker runs at {}Hz",
                buffer.sample_rate(),
                self.sample_rate
            );
        }
        let start_frame = (when.max(0.0) * self.sample_rate as f64).round() as u64;
        self.voices().push(Voice {
            id,
            samples: buffer.samples().clone(),
            start_frame,
            cursor: 0,
        });
        Ok(())
    }

    fn stop(&mut self, id: SegmentId) -> Result<()> {
        let mut voices = self.voices();
        match voices.iter().position(|v| v.id == id) {
            Some(idx) => {
                voices.swap_remove(idx);
                Ok(())
            }
            None => bail!("Segment {} is not playing", id),
        }
    }

    fn close(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
            log::info!("Speaker '{}' released", self.device);
        }
        self.voices().clear();
    }
}

impl Drop for AlsaOutput {
    fn drop(&mut self) {
        self.close();
    }
}

fn mixer_thread(
    pcm: PCM,
    params: AlsaParams,
    gain: f32,
    shared: &Shared,
    done: mpsc::UnboundedSender<SegmentId>,
) -> Result<()> {
    let period = params.period_size.max(1);
    let io = pcm.io_i16()?;
    let mut mix = vec![0f32; period];
    let mut out = vec![0i16; period];

    log::info!(
        "Mixer started: rate={}, period={}, gain={}",
        params.sample_rate,
        period,
        gain
    );

    while shared.running.load(Ordering::Relaxed) {
        let finished = {
            let mut voices = shared.voices.lock().unwrap_or_else(PoisonError::into_inner);
            let period_start = shared.frames_mixed.load(Ordering::Acquire);
            let finished = mix_period(&mut voices, period_start, &mut mix);
            shared
                .frames_mixed
                .store(period_start + period as u64, Ordering::Release);
            finished
        };

        for (dst, src) in out.iter_mut().zip(&mix) {
            *dst = sample_to_i16(*src * gain);
        }

        // Short writes and XRUNs are retried; persistent failure drops the
        // rest of the period so the clock keeps moving.
        let mut frames_written = 0;
        let mut retry_count = 0u32;
        while frames_written < period {
            match io.writei(&out[frames_written..]) {
                Ok(n) => {
                    frames_written += n;
                    retry_count = 0;
                }
                Err(e) => {
                    log::warn!("ALSA XRUN or error: {}, recovering...", e);
                    retry_count += 1;
                    if let Err(e2) = pcm.prepare() {
                        log::error!("Failed to recover PCM playback: {}", e2);
                        return Err(e2.into());
                    }
                    if retry_count >= 3 {
                        log::error!(
                            "Max recovery retries reached, dropping {} frames",
                            period - frames_written
                        );
                        break;
                    }
                }
            }
        }

        for id in finished {
            let _ = done.send(id);
        }
    }

    log::info!("Mixer stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voice(id: SegmentId, len: usize, start_frame: u64, value: f32) -> Voice {
        Voice {
            id,
            samples: vec![value; len].into(),
            start_frame,
            cursor: 0,
        }
    }

    #[test]
    fn back_to_back_voices_share_a_boundary() {
        let mut voices = vec![voice(1, 6, 2, 0.25), voice(2, 4, 8, 0.5)];
        let mut mix = vec![0.0; 8];

        let finished = mix_period(&mut voices, 0, &mut mix);
        assert_eq!(finished, vec![1]);
        assert_eq!(mix, vec![0.0, 0.0, 0.25, 0.25, 0.25, 0.25, 0.25, 0.25]);
        assert_eq!(voices.len(), 1);

        let finished = mix_period(&mut voices, 8, &mut mix);
        assert_eq!(finished, vec![2]);
        assert_eq!(mix, vec![0.5, 0.5, 0.5, 0.5, 0.0, 0.0, 0.0, 0.0]);
        assert!(voices.is_empty());
    }

    #[test]
    fn voice_ending_on_period_edge_finishes_in_that_period() {
        let mut voices = vec![voice(7, 8, 0, 0.1)];
        let mut mix = vec![0.0; 8];
        assert_eq!(mix_period(&mut voices, 0, &mut mix), vec![7]);
        assert!(voices.is_empty());
    }

    #[test]
    fn late_voice_drops_its_head_and_keeps_its_end() {
        // Frames 8..14, first mixed at 10: samples for 8 and 9 are gone.
        let samples: Vec<f32> = (0..6).map(|i| i as f32).collect();
        let mut voices = vec![Voice {
            id: 3,
            samples: samples.into(),
            start_frame: 8,
            cursor: 0,
        }];
        let mut mix = vec![0.0; 4];
        let finished = mix_period(&mut voices, 10, &mut mix);
        assert_eq!(finished, vec![3]);
        assert_eq!(mix, vec![2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn voice_entirely_in_the_past_finishes_silently() {
        let mut voices = vec![voice(4, 2, 1, 1.0)];
        let mut mix = vec![0.0; 4];
        assert_eq!(mix_period(&mut voices, 10, &mut mix), vec![4]);
        assert_eq!(mix, vec![0.0; 4]);
    }

    #[test]
    fn segment_started_inside_a_mixed_period_does_not_overlap_its_successor() {
        // Period 4. Frames 0..4 were mixed before A arrived with start 0;
        // B follows on the nominal timeline at A's end.
        let mut voices = Vec::new();
        let mut mix = vec![0.0; 4];
        mix_period(&mut voices, 0, &mut mix);

        voices.push(voice(1, 12, 0, 0.25));
        voices.push(voice(2, 8, 12, 0.5));

        let mut heard = Vec::new();
        let mut finished = Vec::new();
        for period_start in (4..24).step_by(4) {
            finished.extend(mix_period(&mut voices, period_start, &mut mix));
            heard.extend_from_slice(&mix);
        }

        assert_eq!(finished, vec![1, 2]);
        assert!(voices.is_empty());
        // Frames 4..12 belong to A, 12..20 to B, nothing sounds twice.
        assert_eq!(&heard[..8], &[0.25; 8]);
        assert_eq!(&heard[8..16], &[0.5; 8]);
        assert_eq!(&heard[16..], &[0.0; 4]);
    }

    #[test]
    fn overlapping_voices_are_summed() {
        let mut voices = vec![voice(1, 4, 0, 0.25), voice(2, 2, 1, 0.5)];
        let mut mix = vec![0.0; 4];
        let mut finished = mix_period(&mut voices, 0, &mut mix);
        finished.sort();
        assert_eq!(finished, vec![1, 2]);
        assert_eq!(mix, vec![0.25, 0.75, 0.75, 0.25]);
    }
}
