//! audio - microphone capture, speaker output and PCM codec
//!
//! Uses ALSA for audio I/O on dedicated threads. The session talks to the
//! devices only through the `AudioBackend`, `CaptureStream` and `AudioOutput`
//! traits.

mod alsa_device;
pub mod backend;
pub mod capture;
pub mod codec;
pub mod output;
pub mod scheduler;

/// Microphone rate expected by the remote model.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;
/// Rate of synthesized speech sent by the remote model.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;
/// Samples per outbound block (256 ms at 16 kHz).
pub const CAPTURE_BLOCK_SIZE: usize = 4096;

pub use backend::{AlsaBackend, AudioBackend};
pub use capture::{AlsaCapture, BlockAssembler, CaptureStream};
pub use codec::{EncodedChunk, PlaybackBuffer};
pub use output::{AlsaOutput, AudioOutput, SegmentId};
pub use scheduler::PlaybackScheduler;
