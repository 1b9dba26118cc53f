//! Gemini Live client for one call.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use voice_bridge::core::realtime::gemini::{GeminiLiveClient, LiveSessionConfig};
//! use voice_bridge::core::realtime::RealtimeLink;
//! use voice_bridge::core::session::{CallSession, CloseWaiters, SessionRegistry};
//! use voice_bridge::core::transport::{MemoryTransport, RtpEndpoint};
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = SessionRegistry::new();
//!     registry.set("call-1", CallSession::new("call-1", RtpEndpoint::default()));
//!
//!     let client = GeminiLiveClient::new(
//!         "call-1",
//!         LiveSessionConfig::default(),
//!         registry,
//!         Arc::new(MemoryTransport::new()),
//!         CloseWaiters::new(),
//!     )
//!     .unwrap();
//!
//!     client.connect().await.unwrap();
//!     client.send_user_turn("What are your opening hours?").await.unwrap();
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};

use super::config::LiveSessionConfig;
use super::messages::{ClientMessage, ServerMessage};
use crate::core::codec::mulaw_to_pcm16k;
use crate::core::realtime::base::{
    ConnectionState, LinkCommand, LinkHandle, RealtimeError, RealtimeErrorCallback,
    RealtimeLink, RealtimeResult,
};
use crate::core::realtime::processor::AudioDeltaProcessor;
use crate::core::realtime::pump::{InboundMessageQueue, InboundMessageReceiver, MessagePump};
use crate::core::session::{CloseWaiters, SessionRegistry};
use crate::core::transport::{OutboundSink, Transport};

/// Channel capacity for outbound frames.
const COMMAND_CHANNEL_CAPACITY: usize = 256;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;
type ReadySender = oneshot::Sender<RealtimeResult<()>>;

/// How one connection attempt ended.
enum ConnectionEnd {
    /// Closed on request or by the server
    Closed,
    /// Socket failure, eligible for reconnect
    Dropped(RealtimeError),
    /// Not worth retrying
    Fatal(RealtimeError),
}

enum RetryDecision {
    Retry,
    GiveUp(RealtimeError),
    /// Session went away or disconnect was requested during backoff
    Abandon,
}

/// One call's Gemini Live connection.
///
/// Cloning is cheap; clones share the same connection.
#[derive(Clone)]
pub struct GeminiLiveClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    channel_id: String,
    config: LiveSessionConfig,
    registry: SessionRegistry,
    transport: Arc<dyn Transport>,
    close_waiters: CloseWaiters,
    processor: Arc<AudioDeltaProcessor>,

    state: RwLock<ConnectionState>,
    link: Mutex<Option<LinkHandle>>,
    queue: InboundMessageQueue<ServerMessage>,
    /// Taken by the pump on first connect
    pump_rx: Mutex<Option<InboundMessageReceiver<ServerMessage>>>,
    intentional_disconnect: AtomicBool,
    error_callback: Mutex<Option<RealtimeErrorCallback>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    connection_seq: AtomicU64,
}

impl GeminiLiveClient {
    /// Create a client. Fails if the API key or URL is unusable.
    pub fn new(
        channel_id: impl Into<String>,
        config: LiveSessionConfig,
        registry: SessionRegistry,
        transport: Arc<dyn Transport>,
        close_waiters: CloseWaiters,
    ) -> RealtimeResult<Self> {
        config.websocket_url()?;

        let channel_id = channel_id.into();
        let processor = Arc::new(AudioDeltaProcessor::new(
            channel_id.clone(),
            registry.clone(),
            config.audio.clone(),
        ));
        let (queue, pump_rx) = InboundMessageQueue::new();

        Ok(Self {
            inner: Arc::new(ClientInner {
                channel_id,
                config,
                registry,
                transport,
                close_waiters,
                processor,
                state: RwLock::new(ConnectionState::Idle),
                link: Mutex::new(None),
                queue,
                pump_rx: Mutex::new(Some(pump_rx)),
                intentional_disconnect: AtomicBool::new(false),
                error_callback: Mutex::new(None),
                supervisor: Mutex::new(None),
                connection_seq: AtomicU64::new(0),
            }),
        })
    }

    pub fn channel_id(&self) -> &str {
        &self.inner.channel_id
    }

    pub fn config(&self) -> &LiveSessionConfig {
        &self.inner.config
    }

    /// Register the callback for failures after the call was established.
    pub fn on_error(&self, callback: RealtimeErrorCallback) {
        *self.inner.error_callback.lock() = Some(callback);
    }

    /// Server frames waiting for the pump.
    pub fn pending_messages(&self) -> usize {
        self.inner.queue.len()
    }

    fn active_link(&self) -> RealtimeResult<LinkHandle> {
        if !self.inner.state.read().is_active() {
            return Err(RealtimeError::NotConnected);
        }
        self.inner
            .link
            .lock()
            .clone()
            .ok_or(RealtimeError::NotConnected)
    }
}

#[async_trait]
impl RealtimeLink for GeminiLiveClient {
    async fn connect(&self) -> RealtimeResult<()> {
        if self.inner.state.read().is_active() {
            return Ok(());
        }

        self.inner
            .intentional_disconnect
            .store(false, Ordering::SeqCst);
        self.inner.start_pump();

        let (ready_tx, ready_rx) = oneshot::channel();
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move { inner.supervise(ready_tx).await });
        if let Some(previous) = self.inner.supervisor.lock().replace(handle) {
            previous.abort();
        }

        match ready_rx.await {
            Ok(result) => result,
            Err(_) => Err(RealtimeError::ConnectionFailed(
                "Connection attempt cancelled".to_string(),
            )),
        }
    }

    async fn disconnect(&self) -> RealtimeResult<()> {
        self.inner
            .intentional_disconnect
            .store(true, Ordering::SeqCst);

        let link = self.inner.link.lock().clone();
        match link {
            Some(link) => {
                self.inner.set_state(ConnectionState::Closing);
                if link.close().await.is_err() {
                    debug!(channel_id = %self.inner.channel_id, "Link already closed");
                }
            }
            None => {
                // Connecting or waiting out a backoff
                if let Some(handle) = self.inner.supervisor.lock().take() {
                    handle.abort();
                }
                self.inner.set_state(ConnectionState::Closed);
            }
        }

        info!(channel_id = %self.inner.channel_id, "Disconnect requested");
        Ok(())
    }

    async fn send_user_turn(&self, text: &str) -> RealtimeResult<()> {
        let link = self.active_link()?;
        debug!(channel_id = %self.inner.channel_id, "Sending user turn: {}", text);
        link.send_json(&ClientMessage::user_turn(text)).await
    }

    async fn send_audio(&self, mulaw: &[u8]) -> RealtimeResult<()> {
        if mulaw.is_empty() {
            return Ok(());
        }
        let link = self.active_link()?;
        let pcm = mulaw_to_pcm16k(mulaw);
        link.send_json(&ClientMessage::audio_input(&pcm)).await
    }

    fn connection_state(&self) -> ConnectionState {
        *self.inner.state.read()
    }
}

impl ClientInner {
    fn set_state(&self, state: ConnectionState) {
        let mut current = self.state.write();
        if *current != state {
            debug!(channel_id = %self.channel_id, "Connection state {} -> {}", *current, state);
            *current = state;
        }
    }

    fn start_pump(&self) {
        let Some(rx) = self.pump_rx.lock().take() else {
            return;
        };
        let pump = MessagePump::new(self.config.pump.clone());
        let processor = self.processor.clone();
        let channel_id = self.channel_id.clone();

        tokio::spawn(async move {
            pump.run(rx, |message| {
                if let Err(e) = processor.process(message) {
                    error!(channel_id = %channel_id, "Failed to process AI message: {}", e);
                }
            })
            .await;
        });
    }

    // =========================================================================
    // Supervision
    // =========================================================================

    async fn supervise(self: Arc<Self>, ready: ReadySender) {
        let mut ready = Some(ready);

        loop {
            match self.run_connection(&mut ready).await {
                ConnectionEnd::Closed => {
                    info!(channel_id = %self.channel_id, "Gemini Live connection closed");
                    break;
                }
                ConnectionEnd::Fatal(e) => {
                    self.fail(e, &mut ready).await;
                    break;
                }
                ConnectionEnd::Dropped(e) => {
                    if self.intentional_disconnect.load(Ordering::SeqCst) {
                        info!(channel_id = %self.channel_id, "Intentional disconnect, not reconnecting");
                        self.set_state(ConnectionState::Closed);
                        if let Some(tx) = ready.take() {
                            let _ = tx.send(Err(e));
                        }
                        break;
                    }

                    error!(channel_id = %self.channel_id, "Gemini Live connection lost: {}", e);
                    match self.schedule_retry().await {
                        RetryDecision::Retry => continue,
                        RetryDecision::GiveUp(err) => {
                            self.fail(err, &mut ready).await;
                            break;
                        }
                        RetryDecision::Abandon => {
                            self.set_state(ConnectionState::Closed);
                            if let Some(tx) = ready.take() {
                                let _ = tx.send(Err(RealtimeError::SessionRemoved(
                                    self.channel_id.clone(),
                                )));
                            }
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn schedule_retry(&self) -> RetryDecision {
        let reconnection = &self.config.reconnection;
        let claimed = self.registry.update(&self.channel_id, |session| {
            if reconnection.should_retry(session.retry_count) {
                session.retry_count += 1;
                Ok(session.retry_count)
            } else {
                Err(session.retry_count)
            }
        });
        let attempt = match claimed {
            None => {
                return RetryDecision::GiveUp(RealtimeError::SessionNotFound(
                    self.channel_id.clone(),
                ));
            }
            Some(Err(attempts)) => {
                return RetryDecision::GiveUp(RealtimeError::RetriesExhausted { attempts });
            }
            Some(Ok(attempt)) => attempt,
        };

        warn!(
            channel_id = %self.channel_id,
            "Reconnecting in {}ms (attempt {}/{})",
            reconnection.delay_ms,
            attempt,
            reconnection.max_attempts
        );
        tokio::time::sleep(reconnection.delay()).await;

        if self.intentional_disconnect.load(Ordering::SeqCst) {
            return RetryDecision::Abandon;
        }
        if !self.registry.has(&self.channel_id) {
            debug!(channel_id = %self.channel_id, "Session removed during backoff");
            return RetryDecision::Abandon;
        }
        RetryDecision::Retry
    }

    async fn fail(&self, err: RealtimeError, ready: &mut Option<ReadySender>) {
        error!(channel_id = %self.channel_id, "Gemini Live link failed: {}", err);
        self.set_state(ConnectionState::Failed);

        if let Some(tx) = ready.take() {
            let _ = tx.send(Err(err));
            return;
        }

        let callback = self.error_callback.lock().clone();
        if let Some(callback) = callback {
            callback(err).await;
        }
    }

    // =========================================================================
    // One connection
    // =========================================================================

    async fn run_connection(&self, ready: &mut Option<ReadySender>) -> ConnectionEnd {
        let url = match self.config.websocket_url() {
            Ok(url) => url,
            Err(e) => return ConnectionEnd::Fatal(e),
        };

        self.set_state(ConnectionState::Connecting);
        info!(channel_id = %self.channel_id, model = %self.config.model_path(), "Connecting to Gemini Live");

        let (ws, _response) = match connect_async(url.as_str()).await {
            Ok(pair) => pair,
            Err(e) => return ConnectionEnd::Dropped(RealtimeError::ConnectionFailed(e.to_string())),
        };
        let (mut ws_sink, mut ws_source) = ws.split();

        let setup = match serde_json::to_string(&ClientMessage::setup(&self.config)) {
            Ok(json) => json,
            Err(e) => return ConnectionEnd::Fatal(RealtimeError::SerializationError(e.to_string())),
        };
        if let Err(e) = ws_sink.send(Message::Text(setup.into())).await {
            return ConnectionEnd::Dropped(RealtimeError::WebSocketError(e.to_string()));
        }
        self.set_state(ConnectionState::AwaitingAck);

        let timeout = self.config.handshake_timeout;
        match tokio::time::timeout(timeout, self.await_setup_complete(&mut ws_sink, &mut ws_source))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return ConnectionEnd::Dropped(e),
            Err(_) => {
                warn!(channel_id = %self.channel_id, "No setup acknowledgement within {:?}", timeout);
                let _ = ws_sink.close().await;
                return ConnectionEnd::Dropped(RealtimeError::HandshakeTimeout(timeout));
            }
        }

        let Some(endpoint) = self
            .registry
            .get(&self.channel_id)
            .map(|session| session.rtp_endpoint)
        else {
            let _ = ws_sink.close().await;
            return ConnectionEnd::Fatal(RealtimeError::SessionNotFound(self.channel_id.clone()));
        };

        let sink = match self.transport.open_sink(&self.channel_id, &endpoint).await
        {
            Ok(sink) => sink,
            Err(e) => {
                let _ = ws_sink.close().await;
                return ConnectionEnd::Fatal(e.into());
            }
        };

        let connection_id = self.connection_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let (cmd_tx, mut cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let link = LinkHandle::new(connection_id, cmd_tx);

        let published = self.registry.update(&self.channel_id, |session| {
            session.socket = Some(link.clone());
            session.outbound_sink = Some(sink.clone());
            session.total_delta_bytes = 0;
            session.logged_delta_bytes = 0;
            session.segment_count = 0;
            session.closed = false;
        });
        if published.is_none() {
            let _ = ws_sink.close().await;
            return ConnectionEnd::Fatal(RealtimeError::SessionNotFound(self.channel_id.clone()));
        }
        *self.link.lock() = Some(link.clone());
        self.set_state(ConnectionState::Active);
        info!(channel_id = %self.channel_id, connection_id, "Gemini Live session established");

        if let Some(greeting) = self.config.greeting() {
            match serde_json::to_string(&ClientMessage::user_turn(greeting)) {
                Ok(json) => {
                    if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                        error!(channel_id = %self.channel_id, "Failed to send greeting: {}", e);
                    }
                }
                Err(e) => error!(channel_id = %self.channel_id, "Failed to serialize greeting: {}", e),
            }
        }

        if let Some(tx) = ready.take() {
            let _ = tx.send(Ok(()));
        }

        let uplink = Self::spawn_caller_audio(&self.channel_id, sink.as_ref(), link);

        let end = loop {
            tokio::select! {
                command = cmd_rx.recv() => match command {
                    Some(LinkCommand::Frame(json)) => {
                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            break ConnectionEnd::Dropped(RealtimeError::WebSocketError(e.to_string()));
                        }
                    }
                    Some(LinkCommand::Close) | None => {
                        self.set_state(ConnectionState::Closing);
                        if let Err(e) = ws_sink.close().await {
                            debug!(channel_id = %self.channel_id, "Error closing socket: {}", e);
                        }
                        break ConnectionEnd::Closed;
                    }
                },

                frame = ws_source.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.enqueue_frame(&text),
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => self.enqueue_frame(text),
                        Err(e) => warn!(channel_id = %self.channel_id, "Dropping non-UTF-8 binary frame: {}", e),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                            error!(channel_id = %self.channel_id, "Failed to send pong: {}", e);
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(channel_id = %self.channel_id, "WebSocket closed by server: {:?}", frame);
                        break ConnectionEnd::Closed;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        break ConnectionEnd::Dropped(RealtimeError::WebSocketError(e.to_string()));
                    }
                    None => {
                        info!(channel_id = %self.channel_id, "WebSocket stream ended");
                        break ConnectionEnd::Closed;
                    }
                },
            }
        };

        if let Some(uplink) = uplink {
            uplink.abort();
        }
        self.handle_socket_closed(connection_id);
        end
    }

    async fn await_setup_complete(
        &self,
        ws_sink: &mut WsSink,
        ws_source: &mut WsSource,
    ) -> RealtimeResult<()> {
        while let Some(frame) = ws_source.next().await {
            let text = match frame {
                Ok(Message::Text(text)) => text.as_str().to_string(),
                Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(channel_id = %self.channel_id, "Dropping non-UTF-8 binary frame: {}", e);
                        continue;
                    }
                },
                Ok(Message::Ping(data)) => {
                    ws_sink
                        .send(Message::Pong(data))
                        .await
                        .map_err(|e| RealtimeError::WebSocketError(e.to_string()))?;
                    continue;
                }
                Ok(Message::Close(frame)) => {
                    return Err(RealtimeError::ConnectionFailed(format!(
                        "Socket closed during handshake: {frame:?}"
                    )));
                }
                Ok(_) => continue,
                Err(e) => return Err(RealtimeError::WebSocketError(e.to_string())),
            };

            match ServerMessage::parse(&text) {
                Ok(message) => {
                    let acknowledged = message.is_setup_complete();
                    self.queue.push(message);
                    if acknowledged {
                        return Ok(());
                    }
                }
                Err(e) => {
                    warn!(channel_id = %self.channel_id, "Failed to parse server event: {}", e);
                    debug!(channel_id = %self.channel_id, "Unparsed frame: {}", text);
                }
            }
        }

        Err(RealtimeError::ConnectionFailed(
            "Socket closed during handshake".to_string(),
        ))
    }

    fn enqueue_frame(&self, text: &str) {
        match ServerMessage::parse(text) {
            Ok(message) => {
                if !self.queue.push(message) {
                    debug!(channel_id = %self.channel_id, "Pump stopped, dropping frame");
                }
            }
            Err(e) => {
                warn!(channel_id = %self.channel_id, "Failed to parse server event: {}", e);
                debug!(channel_id = %self.channel_id, "Unparsed frame: {}", text);
            }
        }
    }

    /// Forward caller audio from the sink's media leg, if it has one.
    fn spawn_caller_audio(
        channel_id: &str,
        sink: &dyn OutboundSink,
        link: LinkHandle,
    ) -> Option<JoinHandle<()>> {
        let mut inbound = sink.take_inbound()?;
        let channel_id = channel_id.to_string();

        Some(tokio::spawn(async move {
            while let Some(payload) = inbound.recv().await {
                let pcm = mulaw_to_pcm16k(&payload);
                if let Err(e) = link.send_json(&ClientMessage::audio_input(&pcm)).await {
                    debug!(channel_id = %channel_id, "Stopping caller audio uplink: {}", e);
                    break;
                }
            }
        }))
    }

    fn handle_socket_closed(&self, connection_id: u64) {
        self.set_state(ConnectionState::Closed);

        {
            let mut link = self.link.lock();
            if link.as_ref().map(LinkHandle::connection_id) == Some(connection_id) {
                *link = None;
            }
        }

        self.registry.update(&self.channel_id, |session| {
            if session.socket.as_ref().map(LinkHandle::connection_id) == Some(connection_id) {
                session.socket = None;
                session.closed = true;
            }
        });

        if self.close_waiters.resolve(&self.channel_id) {
            debug!(channel_id = %self.channel_id, "Resolved socket-closed waiter");
        }
    }
}

impl std::fmt::Debug for GeminiLiveClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiLiveClient")
            .field("channel_id", &self.inner.channel_id)
            .field("state", &*self.inner.state.read())
            .finish()
    }
}
