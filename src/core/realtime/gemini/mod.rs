//! Gemini Live realtime provider.
//!
//! JSON over a persistent WebSocket. The session is configured with a
//! `setup` frame and becomes usable once `setupComplete` arrives. Model audio
//! comes back as base64 inline data parts with a declared MIME type.

mod client;
mod config;
pub mod messages;

pub use client::GeminiLiveClient;
pub use config::{
    DEFAULT_GEMINI_MODEL, DEFAULT_GEMINI_VOICE, DEFAULT_HANDSHAKE_TIMEOUT,
    DEFAULT_INITIAL_MESSAGE, EndSensitivity, GEMINI_LIVE_URL, LiveSessionConfig,
    StartSensitivity, VadSettings,
};
pub use messages::{ClientMessage, ServerContent, ServerMessage, Transcription};
