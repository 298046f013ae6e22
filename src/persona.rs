//! Persona snapshot handed to `connect`.

use std::fmt;
use std::str::FromStr;

/// Prebuilt voices accepted by the live endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VoiceName {
    Puck,
    Charon,
    #[default]
    Kore,
    Fenrir,
    Zephyr,
    Aoede,
    Leda,
    Orus,
}

impl VoiceName {
    pub const ALL: [VoiceName; 8] = [
        VoiceName::Puck,
        VoiceName::Charon,
        VoiceName::Kore,
        VoiceName::Fenrir,
        VoiceName::Zephyr,
        VoiceName::Aoede,
        VoiceName::Leda,
        VoiceName::Orus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VoiceName::Puck => "Puck",
            VoiceName::Charon => "Charon",
            VoiceName::Kore => "Kore",
            VoiceName::Fenrir => "Fenrir",
            VoiceName::Zephyr => "Zephyr",
            VoiceName::Aoede => "Aoede",
            VoiceName::Leda => "Leda",
            VoiceName::Orus => "Orus",
        }
    }
}

impl fmt::Display for VoiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoiceName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        VoiceName::ALL
            .iter()
            .copied()
            .find(|v| v.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| format!("Unknown voice name: {}", wanted))
    }
}

/// Instruction text and voice, captured once per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persona {
    pub system_instruction: String,
    pub voice: VoiceName,
}

impl Persona {
    pub fn new(system_instruction: impl Into<String>, voice: VoiceName) -> Self {
        Self {
            system_instruction: system_instruction.into(),
            voice,
        }
    }
}
