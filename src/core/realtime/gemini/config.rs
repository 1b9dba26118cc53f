//! Gemini Live configuration types.
//!
//! - Endpoint and model defaults
//! - Voice activity detection sensitivities
//! - [`LiveSessionConfig`], everything one call's client needs

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::ApiKey;
use crate::core::realtime::base::{RealtimeError, RealtimeResult, ReconnectionConfig};
use crate::core::realtime::processor::ProcessorSettings;
use crate::core::realtime::pump::PumpSettings;

/// Gemini Live bidirectional streaming endpoint.
pub const GEMINI_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Default model.
pub const DEFAULT_GEMINI_MODEL: &str = "models/gemini-2.0-flash-exp";

/// Default prebuilt voice.
pub const DEFAULT_GEMINI_VOICE: &str = "Puck";

/// Default greeting sent once the session is up.
pub const DEFAULT_INITIAL_MESSAGE: &str = "Hi";

/// Default handshake timeout.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Sensitivities
// =============================================================================

/// How eagerly the AI decides the caller started speaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StartSensitivity {
    #[default]
    StartSensitivityHigh,
    StartSensitivityLow,
}

impl StartSensitivity {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StartSensitivityHigh => "START_SENSITIVITY_HIGH",
            Self::StartSensitivityLow => "START_SENSITIVITY_LOW",
        }
    }

    /// Accepts the wire name or a bare `high` / `low`.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "START_SENSITIVITY_LOW" | "LOW" => Self::StartSensitivityLow,
            _ => Self::default(),
        }
    }
}

/// How eagerly the AI decides the caller stopped speaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndSensitivity {
    #[default]
    EndSensitivityHigh,
    EndSensitivityLow,
}

impl EndSensitivity {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EndSensitivityHigh => "END_SENSITIVITY_HIGH",
            Self::EndSensitivityLow => "END_SENSITIVITY_LOW",
        }
    }

    pub fn from_str_or_default(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "END_SENSITIVITY_LOW" | "LOW" => Self::EndSensitivityLow,
            _ => Self::default(),
        }
    }
}

impl std::fmt::Display for StartSensitivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::fmt::Display for EndSensitivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Server-side voice activity detection parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VadSettings {
    pub start_sensitivity: StartSensitivity,
    pub end_sensitivity: EndSensitivity,
    /// Audio kept before detected speech start (ms)
    pub prefix_padding_ms: u32,
    /// Silence that ends a caller turn (ms)
    pub silence_duration_ms: u32,
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            start_sensitivity: StartSensitivity::default(),
            end_sensitivity: EndSensitivity::default(),
            prefix_padding_ms: 200,
            silence_duration_ms: 600,
        }
    }
}

// =============================================================================
// Session config
// =============================================================================

/// Per-call client configuration.
#[derive(Debug, Clone)]
pub struct LiveSessionConfig {
    pub api_key: ApiKey,
    pub url: String,
    pub model: String,
    pub voice: String,
    pub system_prompt: Option<String>,
    /// Sent as the first user turn; `None` skips the greeting
    pub initial_message: Option<String>,
    pub vad: VadSettings,
    pub reconnection: ReconnectionConfig,
    pub handshake_timeout: Duration,
    pub pump: PumpSettings,
    pub audio: ProcessorSettings,
}

impl Default for LiveSessionConfig {
    fn default() -> Self {
        Self {
            api_key: ApiKey::default(),
            url: GEMINI_LIVE_URL.to_string(),
            model: DEFAULT_GEMINI_MODEL.to_string(),
            voice: DEFAULT_GEMINI_VOICE.to_string(),
            system_prompt: None,
            initial_message: Some(DEFAULT_INITIAL_MESSAGE.to_string()),
            vad: VadSettings::default(),
            reconnection: ReconnectionConfig::default(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            pump: PumpSettings::default(),
            audio: ProcessorSettings::default(),
        }
    }
}

impl LiveSessionConfig {
    /// Endpoint URL with the API key attached as the `key` query parameter.
    pub fn websocket_url(&self) -> RealtimeResult<Url> {
        if self.api_key.is_empty() {
            return Err(RealtimeError::InvalidConfiguration(
                "API key is required".to_string(),
            ));
        }
        Url::parse_with_params(&self.url, &[("key", self.api_key.expose())])
            .map_err(|e| RealtimeError::InvalidConfiguration(format!("Invalid URL {}: {e}", self.url)))
    }

    /// Model name in `models/<name>` form.
    pub fn model_path(&self) -> String {
        if self.model.starts_with("models/") || self.model.starts_with("tunedModels/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        }
    }

    /// Greeting text, ignoring blank values.
    pub fn greeting(&self) -> Option<&str> {
        self.initial_message
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }
}
