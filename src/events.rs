//! What the session reports to its owner.

use std::fmt;

use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Disconnected => "DISCONNECTED",
            SessionState::Connecting => "CONNECTING",
            SessionState::Connected => "CONNECTED",
        })
    }
}

/// A fragment of recognized (user) or synthesized (model) speech.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    pub text: String,
    pub is_user: bool,
    pub is_final: bool,
}

/// Observer for session lifecycle, errors and transcripts.
pub trait SessionListener: Send {
    fn on_state_change(&self, state: SessionState);
    fn on_error(&self, message: &str);
    fn on_transcript(&self, transcript: &Transcript);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    State(SessionState),
    Error(String),
    Transcript(Transcript),
}

/// Forwards every callback as a [`SessionEvent`] on an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            log::debug!("Session event dropped, receiver gone");
        }
    }
}

impl SessionListener for ChannelListener {
    fn on_state_change(&self, state: SessionState) {
        self.emit(SessionEvent::State(state));
    }

    fn on_error(&self, message: &str) {
        self.emit(SessionEvent::Error(message.to_string()));
    }

    fn on_transcript(&self, transcript: &Transcript) {
        self.emit(SessionEvent::Transcript(transcript.clone()));
    }
}
