//! Gemini Live WebSocket message types.
//!
//! All frames are JSON. The server sends them in binary WebSocket frames as
//! often as text frames, so both are decoded the same way.
//!
//! # Protocol Overview
//!
//! Client messages (sent to server):
//! - setup - Session configuration, must be the first frame
//! - clientContent - Complete conversational turns
//! - realtimeInput - Streaming caller audio
//!
//! Server messages (received from server):
//! - setupComplete - Setup accepted
//! - serverContent - Model output, interruption, transcriptions, turn boundaries
//! - toolCall / toolCallCancellation - Function calling
//! - usageMetadata - Token accounting
//! - goAway - Server is about to disconnect

use base64::prelude::*;
use serde::{Deserialize, Serialize};

use super::config::{EndSensitivity, LiveSessionConfig, StartSensitivity};
use crate::core::codec::AI_INPUT_SAMPLE_RATE;

// =============================================================================
// Shared content types
// =============================================================================

/// A conversational turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// One piece of a turn: text or inline media.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

/// Base64 media with its MIME type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

impl Blob {
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64_STANDARD.decode(&self.data)
    }
}

// =============================================================================
// Client messages
// =============================================================================

/// Messages sent to the server.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    ClientContent(ClientContent),
    RealtimeInput(RealtimeInput),
}

impl ClientMessage {
    /// Setup frame for a session.
    pub fn setup(config: &LiveSessionConfig) -> Self {
        let system_instruction = config
            .system_prompt
            .as_deref()
            .filter(|prompt| !prompt.trim().is_empty())
            .map(|prompt| Content {
                role: None,
                parts: vec![Part {
                    text: Some(prompt.to_string()),
                    inline_data: None,
                }],
            });

        ClientMessage::Setup(Setup {
            model: config.model_path(),
            generation_config: GenerationConfig {
                response_modalities: vec![Modality::Audio],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: config.voice.clone(),
                        },
                    },
                },
            },
            system_instruction,
            realtime_input_config: RealtimeInputConfig {
                automatic_activity_detection: AutomaticActivityDetection {
                    disabled: false,
                    start_of_speech_sensitivity: config.vad.start_sensitivity,
                    prefix_padding_ms: config.vad.prefix_padding_ms,
                    end_of_speech_sensitivity: config.vad.end_sensitivity,
                    silence_duration_ms: config.vad.silence_duration_ms,
                },
                activity_handling: ActivityHandling::StartOfActivityInterrupts,
            },
            input_audio_transcription: AudioTranscriptionConfig {},
            output_audio_transcription: AudioTranscriptionConfig {},
        })
    }

    /// A complete user text turn.
    pub fn user_turn(text: &str) -> Self {
        ClientMessage::ClientContent(ClientContent {
            turns: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(text.to_string()),
                    inline_data: None,
                }],
            }],
            turn_complete: true,
        })
    }

    /// Caller audio as 16 kHz PCM16LE.
    pub fn audio_input(pcm16k: &[u8]) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            audio: Blob {
                mime_type: format!("audio/pcm;rate={AI_INPUT_SAMPLE_RATE}"),
                data: BASE64_STANDARD.encode(pcm16k),
            },
        })
    }
}

/// Session setup.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    pub realtime_input_config: RealtimeInputConfig,
    pub input_audio_transcription: AudioTranscriptionConfig,
    pub output_audio_transcription: AudioTranscriptionConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<Modality>,
    pub speech_config: SpeechConfig,
}

/// Output modality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modality {
    Audio,
    Text,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputConfig {
    pub automatic_activity_detection: AutomaticActivityDetection,
    pub activity_handling: ActivityHandling,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomaticActivityDetection {
    pub disabled: bool,
    pub start_of_speech_sensitivity: StartSensitivity,
    pub prefix_padding_ms: u32,
    pub end_of_speech_sensitivity: EndSensitivity,
    pub silence_duration_ms: u32,
}

/// What caller speech does to model output in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityHandling {
    StartOfActivityInterrupts,
    NoInterruption,
}

/// Empty object enabling transcription.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AudioTranscriptionConfig {}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub audio: Blob,
}

// =============================================================================
// Server messages
// =============================================================================

/// One inbound frame. Several top-level keys may be present at once.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub tool_call: Option<serde_json::Value>,
    #[serde(default)]
    pub tool_call_cancellation: Option<serde_json::Value>,
    #[serde(default)]
    pub usage_metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub go_away: Option<serde_json::Value>,
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub input_transcription: Option<Transcription>,
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub generation_complete: bool,
}

/// Transcription text, sent either bare or wrapped in an object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Transcription {
    Text(String),
    Object {
        #[serde(default)]
        text: Option<String>,
    },
}

impl Transcription {
    pub fn text(&self) -> Option<&str> {
        match self {
            Transcription::Text(text) => Some(text.as_str()),
            Transcription::Object { text } => text.as_deref(),
        }
    }
}
