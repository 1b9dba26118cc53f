//! Realtime speech AI link.
//!
//! - [`RealtimeLink`] - one call's connection: handshake, reconnect, outbound turns
//! - [`AudioEventHandler`] - what to do with AI audio, barge-in and turn ends
//! - [`pump`] - rate-limited, order-preserving delivery of server frames
//! - [`processor`] - the handler used for telephone calls
//!
//! # Supported Providers
//!
//! - **Gemini Live** - bidirectional audio over WebSocket, see [`gemini`]

mod base;
pub mod gemini;
pub mod processor;
pub mod pump;

pub use base::{
    AudioEventHandler, AudioPayloadFormat, ConnectionState, DeltaOutcome, LinkCommand,
    LinkHandle, RealtimeError, RealtimeErrorCallback, RealtimeLink, RealtimeResult,
    ReconnectionConfig,
};
pub use gemini::{GeminiLiveClient, LiveSessionConfig};
pub use processor::{AudioDeltaProcessor, ProcessorSettings};
pub use pump::{InboundMessageQueue, MessagePump, PumpSettings};
