//! Failure kinds reported by a live session.
//!
//! Device and transport code work with `anyhow::Result`; the session maps
//! those into a [`SessionError`] at the boundary so the listener receives a
//! single readable message per failure.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Missing or empty credential.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Microphone could not be acquired.
    #[error("Microphone permission denied or unavailable: {0}")]
    Permission(String),

    /// Speaker could not be initialized or stopped working.
    #[error("Audio output failed: {0}")]
    Device(String),

    /// Remote session failed to open.
    #[error("Failed to open live session: {0}")]
    Handshake(String),

    /// Mid-session network failure.
    #[error("Connection error occurred: {0}")]
    Transport(String),

    /// Malformed inbound audio chunk.
    #[error("Malformed audio chunk: {0}")]
    Decode(String),
}

impl SessionError {
    /// Decode failures drop one chunk; everything else ends the session.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SessionError::Decode(_))
    }
}
