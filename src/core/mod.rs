pub mod bridge;
pub mod codec;
pub mod drain;
pub mod realtime;
pub mod session;
pub mod transport;

// Re-export commonly used types for convenience
pub use bridge::{BridgeSettings, CallBridge};
pub use codec::CodecError;
pub use drain::{DrainOutcome, DrainSynchronizer};
pub use realtime::{
    AudioDeltaProcessor, AudioEventHandler, ConnectionState, GeminiLiveClient,
    LiveSessionConfig, RealtimeError, RealtimeLink, RealtimeResult,
};
pub use session::{CallSession, CloseWaiters, SessionRegistry};
pub use transport::{
    MemoryTransport, OutboundSink, RtpEndpoint, Transport, TransportError, UdpRtpTransport,
};
