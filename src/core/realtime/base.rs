//! Base traits and types for the realtime AI link.
//!
//! A [`RealtimeLink`] owns one call's socket to the speech AI: handshake,
//! reconnect, outbound turns and caller audio. Everything the AI sends back
//! is turned into calls on an [`AudioEventHandler`], which decides how the
//! audio reaches the telephone leg.
//!
//! # Audio Format
//!
//! The telephone leg is 8 kHz G.711 µ-law. AI payloads declare their own
//! format through a MIME type, see [`AudioPayloadFormat`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::core::codec::{AI_OUTPUT_SAMPLE_RATE, CodecError};
use crate::core::transport::TransportError;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur on the realtime link.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Connection to the AI service failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Setup acknowledgement did not arrive in time
    #[error("Handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// No session record for the call
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Session was removed while a reconnect was pending
    #[error("Session removed: {0}")]
    SessionRemoved(String),

    /// Reconnect budget spent
    #[error("Connection lost after {attempts} reconnection attempts")]
    RetriesExhausted { attempts: u32 },

    /// Call limit reached
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// Session-level failure
    #[error("Session error: {0}")]
    SessionError(String),

    /// Outbound transport failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Payload could not be converted for the telephone leg
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Configuration Types
// =============================================================================

/// Bounded reconnect policy with a fixed delay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectionConfig {
    /// Attempts allowed over the lifetime of a call.
    /// Default: 3
    pub max_attempts: u32,

    /// Delay before each attempt (milliseconds).
    /// Default: 1000ms
    pub delay_ms: u64,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 1000,
        }
    }
}

impl ReconnectionConfig {
    /// Check if another attempt is allowed given how many were already made.
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle of one AI connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Never connected
    #[default]
    Idle,
    /// Opening the socket
    Connecting,
    /// Setup sent, waiting for the acknowledgement
    AwaitingAck,
    /// Handshake complete, audio flowing
    Active,
    /// Close requested locally
    Closing,
    /// Socket closed
    Closed,
    /// Gave up after transient failures
    Failed,
}

impl ConnectionState {
    pub fn is_active(&self) -> bool {
        matches!(self, ConnectionState::Active)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "Idle"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::AwaitingAck => write!(f, "AwaitingAck"),
            ConnectionState::Active => write!(f, "Active"),
            ConnectionState::Closing => write!(f, "Closing"),
            ConnectionState::Closed => write!(f, "Closed"),
            ConnectionState::Failed => write!(f, "Failed"),
        }
    }
}

// =============================================================================
// Payload format
// =============================================================================

/// Encoding of an AI audio payload, taken from its declared MIME type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioPayloadFormat {
    /// Linear PCM16LE at the given rate
    Pcm16 { sample_rate: u32 },
    /// 8 kHz µ-law, ready for the telephone leg
    MuLaw,
}

impl AudioPayloadFormat {
    /// Parse `audio/pcm`, `audio/pcm;rate=N`, `audio/pcmu`, `audio/x-mulaw`, `audio/basic`.
    ///
    /// `audio/pcm` without a rate is 24 kHz, the AI's native output.
    pub fn from_mime_type(mime: &str) -> Result<Self, CodecError> {
        let mut parts = mime.split(';').map(str::trim);
        let essence = parts.next().unwrap_or_default().to_ascii_lowercase();

        match essence.as_str() {
            "audio/pcmu" | "audio/x-mulaw" | "audio/mulaw" | "audio/basic" => Ok(Self::MuLaw),
            "audio/pcm" | "audio/l16" => {
                let mut sample_rate = AI_OUTPUT_SAMPLE_RATE;
                for param in parts {
                    if let Some((key, value)) = param.split_once('=')
                        && key.trim().eq_ignore_ascii_case("rate")
                    {
                        sample_rate = value
                            .trim()
                            .parse()
                            .map_err(|_| CodecError::UnsupportedFormat(mime.to_string()))?;
                    }
                }
                Ok(Self::Pcm16 { sample_rate })
            }
            _ => Err(CodecError::UnsupportedFormat(mime.to_string())),
        }
    }
}

impl fmt::Display for AudioPayloadFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioPayloadFormat::Pcm16 { sample_rate } => write!(f, "pcm16@{sample_rate}"),
            AudioPayloadFormat::MuLaw => write!(f, "mulaw@8000"),
        }
    }
}

// =============================================================================
// Link handle
// =============================================================================

/// Command for a connection's I/O task.
#[derive(Debug, Clone)]
pub enum LinkCommand {
    /// Serialized JSON frame
    Frame(String),
    /// Close the socket
    Close,
}

/// Cloneable handle to one live AI connection.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    connection_id: u64,
    commands: mpsc::Sender<LinkCommand>,
}

impl LinkHandle {
    pub fn new(connection_id: u64, commands: mpsc::Sender<LinkCommand>) -> Self {
        Self {
            connection_id,
            commands,
        }
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    pub fn is_open(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Serialize and queue a frame.
    pub async fn send_json<T: Serialize>(&self, message: &T) -> RealtimeResult<()> {
        let json = serde_json::to_string(message)
            .map_err(|e| RealtimeError::SerializationError(e.to_string()))?;
        self.commands
            .send(LinkCommand::Frame(json))
            .await
            .map_err(|_| RealtimeError::NotConnected)
    }

    /// Ask the I/O task to close the socket.
    pub async fn close(&self) -> RealtimeResult<()> {
        self.commands
            .send(LinkCommand::Close)
            .await
            .map_err(|_| RealtimeError::NotConnected)
    }
}

// =============================================================================
// Callback Types
// =============================================================================

/// Callback type for terminal link failures after the handshake succeeded.
pub type RealtimeErrorCallback =
    Arc<dyn Fn(RealtimeError) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

// =============================================================================
// Traits
// =============================================================================

/// What happened to one audio delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOutcome {
    /// Sent to the sink; `bytes` includes any silence padding
    Forwarded { bytes: usize, padded: bool },
    /// Empty or pure silence
    Discarded,
    /// Session still registered but no sink yet
    NoSink,
    /// Session no longer registered
    SessionGone,
}

/// Consumer of AI output events for one call.
pub trait AudioEventHandler: Send + Sync {
    /// Handle one decoded audio payload in its declared format.
    fn on_audio_delta(
        &self,
        payload: &[u8],
        format: AudioPayloadFormat,
    ) -> RealtimeResult<DeltaOutcome>;

    /// Caller barged in; drop whatever is still queued for playout.
    fn on_interrupt(&self);

    /// The AI finished its turn.
    fn on_turn_complete(&self);
}

/// One call's connection to the realtime AI.
#[async_trait]
pub trait RealtimeLink: Send + Sync {
    /// Connect and complete the handshake, retrying transient failures.
    async fn connect(&self) -> RealtimeResult<()>;

    /// Close the socket. No reconnect follows.
    async fn disconnect(&self) -> RealtimeResult<()>;

    /// Send a complete user text turn.
    async fn send_user_turn(&self, text: &str) -> RealtimeResult<()>;

    /// Forward caller audio (8 kHz µ-law).
    async fn send_audio(&self, mulaw: &[u8]) -> RealtimeResult<()>;

    fn connection_state(&self) -> ConnectionState;

    fn is_active(&self) -> bool {
        self.connection_state().is_active()
    }
}
