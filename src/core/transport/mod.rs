//! Outbound audio transport boundary.
//!
//! The bridge never touches RTP sockets directly. Each call gets an
//! [`OutboundSink`] from a [`Transport`] once the AI handshake completes; the
//! sink accepts 8 kHz µ-law payloads, reports how much audio is still waiting
//! to be paced out, and can discard everything on barge-in.
//!
//! # Implementations
//!
//! - [`UdpRtpTransport`] - PCMU over UDP, 20 ms pacing
//! - [`MemoryTransport`] - records payloads in memory (tests, dry runs)

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::futures::Notified;
use tokio::sync::{Notify, mpsc};

pub mod memory;
pub mod rtp;

pub use memory::{MemorySink, MemoryTransport};
pub use rtp::{RtpHeader, RtpPacketizer, RtpSink, UdpRtpTransport};

// =============================================================================
// Error Types
// =============================================================================

/// Errors raised by transport implementations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Local socket could not be bound
    #[error("Failed to bind RTP socket {addr}: {reason}")]
    Bind { addr: String, reason: String },

    /// Remote endpoint could not be resolved
    #[error("Invalid RTP endpoint: {0}")]
    InvalidEndpoint(String),

    /// Socket I/O failure
    #[error("Transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Sink is no longer accepting audio
    #[error("Sink closed")]
    Closed,
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

// =============================================================================
// Endpoint
// =============================================================================

/// Default address media is sent to when call control supplies none.
pub const DEFAULT_RTP_ADDRESS: &str = "127.0.0.1";

/// Default remote media port.
pub const DEFAULT_RTP_PORT: u16 = 12000;

/// Remote media endpoint for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpEndpoint {
    pub address: String,
    pub port: u16,
}

impl RtpEndpoint {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    /// Parse `host:port`.
    pub fn parse(value: &str) -> TransportResult<Self> {
        let (address, port) = value
            .rsplit_once(':')
            .ok_or_else(|| TransportError::InvalidEndpoint(value.to_string()))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| TransportError::InvalidEndpoint(value.to_string()))?;
        if address.is_empty() {
            return Err(TransportError::InvalidEndpoint(value.to_string()));
        }
        Ok(Self::new(address, port))
    }
}

impl Default for RtpEndpoint {
    fn default() -> Self {
        Self::new(DEFAULT_RTP_ADDRESS, DEFAULT_RTP_PORT)
    }
}

impl fmt::Display for RtpEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

// =============================================================================
// Audio finished signal
// =============================================================================

/// Per-call completion handle fired when the sink has paced out everything it
/// was given.
///
/// Only waiters that exist when the sink fires are woken; a signal that fired
/// before anyone listened is not replayed.
#[derive(Debug, Clone, Default)]
pub struct AudioFinishedSignal {
    notify: Arc<Notify>,
}

impl AudioFinishedSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake every current waiter.
    pub fn notify(&self) {
        self.notify.notify_waiters();
    }

    /// Future resolving on the next [`notify`](Self::notify).
    ///
    /// The registration happens when this is called, not when it is first polled.
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }
}

// =============================================================================
// Sink / Transport traits
// =============================================================================

/// Per-call outbound audio handle.
pub trait OutboundSink: Send + Sync {
    /// Queue 8 kHz µ-law audio for playout.
    fn send(&self, payload: Bytes) -> TransportResult<()>;

    /// Discard everything not yet sent.
    fn stop_playback(&self);

    /// Bytes accepted but not yet framed into packets.
    fn pending_buffer_bytes(&self) -> usize;

    /// Packets framed but not yet sent.
    fn pending_queue_packets(&self) -> usize;

    fn has_pending(&self) -> bool {
        self.pending_buffer_bytes() > 0 || self.pending_queue_packets() > 0
    }

    /// Completion handle created together with this sink.
    fn audio_finished(&self) -> AudioFinishedSignal;

    /// Caller audio (8 kHz µ-law payloads) received on this call's media leg.
    ///
    /// Yields the receiver once; later calls return `None`.
    fn take_inbound(&self) -> Option<mpsc::Receiver<Bytes>> {
        None
    }
}

/// Factory for per-call sinks.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open_sink(
        &self,
        channel_id: &str,
        endpoint: &RtpEndpoint,
    ) -> TransportResult<Arc<dyn OutboundSink>>;
}
