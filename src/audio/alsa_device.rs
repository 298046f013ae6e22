//! ALSA PCM device wrappers for the microphone and the speaker.
//!
//! Both directions are opened mono, S16LE, at the fixed contract rates. A
//! device that negotiates a different rate is rejected rather than resampled.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result, bail};

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
pub struct AlsaParams {
    pub sample_rate: u32,
    /// Period size in frames (mono, so one frame = one sample)
    pub period_size: usize,
}

/// Open a PCM device for capture (recording).
pub fn open_capture(device: &str, sample_rate: u32) -> Result<(PCM, AlsaParams)> {
    open_mono(device, Direction::Capture, sample_rate, None)
}

/// Open a PCM device for playback.
pub fn open_playback(
    device: &str,
    sample_rate: u32,
    period_size: Option<usize>,
) -> Result<(PCM, AlsaParams)> {
    open_mono(device, Direction::Playback, sample_rate, period_size)
}

fn open_mono(
    device: &str,
    direction: Direction,
    sample_rate: u32,
    period_size: Option<usize>,
) -> Result<(PCM, AlsaParams)> {
    let dir_name = match direction {
        Direction::Capture => "capture",
        Direction::Playback => "playback",
    };

    let pcm = PCM::new(device, direction, false)
        .with_context(|| format!("Failed to open PCM device '{}' for {}", device, dir_name))?;

    {
        let hwp = HwParams::any(&pcm).context("Failed to initialize HwParams")?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::S16LE)?;
        hwp.set_channels(1)
            .with_context(|| format!("Device '{}' does not support mono {}", device, dir_name))?;
        hwp.set_rate(sample_rate, ValueOr::Nearest)
            .with_context(|| format!("Device '{}' does not support {}Hz", device, sample_rate))?;
        if let Some(ps) = period_size {
            hwp.set_period_size_near(ps as alsa::pcm::Frames, ValueOr::Nearest)?;
        }
        pcm.hw_params(&hwp)?;
    }

    let (actual_rate, period_size) = {
        let hwp = pcm.hw_params_current()?;
        (hwp.get_rate()?, hwp.get_period_size()? as usize)
    };

    if actual_rate != sample_rate {
        bail!(
            "Device '{}' negotiated {}Hz for {}, expected {}Hz",
            device,
            actual_rate,
            dir_name,
            sample_rate
        );
    }

    log::info!(
        "ALSA {}: device={}, rate={}, period_size={}",
        dir_name,
        device,
        actual_rate,
        period_size,
    );

    Ok((
        pcm,
        AlsaParams {
            sample_rate: actual_rate,
            period_size,
        },
    ))
}
