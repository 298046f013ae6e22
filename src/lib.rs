//! Realtime duplex voice sessions against a live speech model.
//!
//! Microphone audio is captured at 16 kHz, streamed to the model over a
//! WebSocket, and the model's 24 kHz reply is scheduled back to back on the
//! speaker. The [`SessionManager`] owns one session at a time and reports
//! state, errors and transcripts to a [`SessionListener`].

pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod net_link;
pub mod persona;
pub mod protocol;
pub mod session;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::SessionError;
pub use events::{ChannelListener, SessionEvent, SessionListener, SessionState, Transcript};
pub use net_link::{Connector, WsConnector};
pub use persona::{Persona, VoiceName};
pub use session::SessionManager;
