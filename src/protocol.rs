//! Wire messages of the live (bidirectional generate-content) protocol.

use serde::{Deserialize, Serialize};

use crate::audio::EncodedChunk;
use crate::persona::Persona;

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

/// First frame after the WebSocket upgrade.
#[derive(Serialize, Debug, Clone)]
pub struct SetupMessage {
    pub setup: Setup,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    pub input_audio_transcription: Enabled,
    pub output_audio_transcription: Enabled,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<Modality>,
    pub speech_config: SpeechConfig,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modality {
    Audio,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Serialize, Debug, Clone)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Serialize, Debug, Clone)]
pub struct TextPart {
    pub text: String,
}

/// Serializes as `{}`; presence alone switches a feature on.
#[derive(Serialize, Debug, Clone, Copy, Default)]
pub struct Enabled {}

impl SetupMessage {
    /// `model` may be given with or without the `models/` prefix.
    pub fn new(model: &str, persona: &Persona) -> Self {
        let model = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{}", model)
        };
        Self {
            setup: Setup {
                model,
                generation_config: GenerationConfig {
                    response_modalities: vec![Modality::Audio],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: persona.voice.to_string(),
                            },
                        },
                    },
                },
                system_instruction: Content {
                    parts: vec![TextPart {
                        text: persona.system_instruction.clone(),
                    }],
                },
                input_audio_transcription: Enabled {},
                output_audio_transcription: Enabled {},
            },
        }
    }
}

/// One microphone block.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub data: String,
}

impl RealtimeInputMessage {
    pub fn new(chunk: EncodedChunk) -> Self {
        Self {
            realtime_input: RealtimeInput {
                media_chunks: vec![Blob {
                    mime_type: Some(chunk.mime_type),
                    data: chunk.data,
                }],
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

/// Any subset of the fields may be present in a single message.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<SetupComplete>,
    pub server_content: Option<ServerContent>,
    pub go_away: Option<GoAway>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupComplete {}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    pub model_turn: Option<ModelTurn>,
    #[serde(default)]
    pub interrupted: bool,
    pub input_transcription: Option<Transcription>,
    pub output_transcription: Option<Transcription>,
    #[serde(default)]
    pub turn_complete: bool,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    pub inline_data: Option<Blob>,
    pub text: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcription {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    pub time_left: Option<String>,
}

impl ServerMessage {
    pub fn parse(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Base64 audio of the first model-turn part that carries inline data.
    pub fn audio_payload(&self) -> Option<&str> {
        self.server_content
            .as_ref()?
            .model_turn
            .as_ref()?
            .parts
            .iter()
            .find_map(|p| p.inline_data.as_ref())
            .map(|blob| blob.data.as_str())
    }

    pub fn interrupted(&self) -> bool {
        self.server_content.as_ref().is_some_and(|c| c.interrupted)
    }

    pub fn turn_complete(&self) -> bool {
        self.server_content.as_ref().is_some_and(|c| c.turn_complete)
    }

    /// Recognized user speech. A transcription object without text yields "".
    pub fn input_transcript(&self) -> Option<&str> {
        self.server_content
            .as_ref()?
            .input_transcription
            .as_ref()
            .map(|t| t.text.as_deref().unwrap_or(""))
    }

    /// Text of the synthesized reply.
    pub fn output_transcript(&self) -> Option<&str> {
        self.server_content
            .as_ref()?
            .output_transcription
            .as_ref()
            .map(|t| t.text.as_deref().unwrap_or(""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::VoiceName;
    use serde_json::json;

    #[test]
    fn setup_message_shape() {
        let persona = Persona::new("Be brief.", VoiceName::Fenrir);
        let msg = SetupMessage::new("gemini-live-test", &persona);
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(
            value,
            json!({
                "setup": {
                    "model": "models/gemini-live-test",
                    "generationConfig": {
                        "responseModalities": ["AUDIO"],
                        "speechConfig": {
                            "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": "Fenrir" } }
                        }
                    },
                    "systemInstruction": { "parts": [{ "text": "Be brief." }] },
                    "inputAudioTranscription": {},
                    "outputAudioTranscription": {}
                }
            })
        );
    }

    #[test]
    fn model_prefix_is_not_doubled() {
        let persona = Persona::new("", VoiceName::Kore);
        let msg = SetupMessage::new("models/x", &persona);
        assert_eq!(msg.setup.model, "models/x");
    }

    #[test]
    fn realtime_input_shape() {
        let msg = RealtimeInputMessage::new(EncodedChunk {
            mime_type: "audio/pcm;rate=16000".into(),
            data: "AAA=".into(),
        });
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "realtimeInput": {
                    "mediaChunks": [{ "mimeType": "audio/pcm;rate=16000", "data": "AAA=" }]
                }
            })
        );
    }

    #[test]
    fn parses_combined_server_content() {
        let raw = json!({
            "serverContent": {
                "modelTurn": { "parts": [
                    { "text": "thinking" },
                    { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AAAA" } }
                ]},
                "outputTranscription": { "text": "Hello" },
                "inputTranscription": {},
                "turnComplete": true
            }
        });
        let msg = ServerMessage::parse(raw.to_string().as_bytes()).unwrap();

        assert_eq!(msg.audio_payload(), Some("AAAA"));
        assert_eq!(msg.output_transcript(), Some("Hello"));
        assert_eq!(msg.input_transcript(), Some(""));
        assert!(msg.turn_complete());
        assert!(!msg.interrupted());
        assert!(!msg.is_setup_complete());
    }

    #[test]
    fn parses_setup_complete_and_interruption() {
        let msg = ServerMessage::parse(br#"{"setupComplete":{}}"#).unwrap();
        assert!(msg.is_setup_complete());
        assert_eq!(msg.audio_payload(), None);

        let msg = ServerMessage::parse(br#"{"serverContent":{"interrupted":true}}"#).unwrap();
        assert!(msg.interrupted());
        assert_eq!(msg.input_transcript(), None);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let msg = ServerMessage::parse(br#"{"usageMetadata":{"totalTokenCount":3}}"#).unwrap();
        assert_eq!(msg, ServerMessage::default());
    }
}
