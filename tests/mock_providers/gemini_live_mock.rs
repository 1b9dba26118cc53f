//! WebSocket mock of the Gemini Live endpoint
//!
//! Acknowledges `setup` frames, records every client frame and lets the test
//! push server frames or drop the connection.

use base64::prelude::*;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// How the mock treats new connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    /// Acknowledge setup and stay open
    Normal,
    /// Close right after the WebSocket upgrade
    RefuseHandshake,
    /// Accept setup but never acknowledge it
    NoAck,
}

enum ServerAction {
    Text(String),
    Binary(Vec<u8>),
    Close,
    Abort,
}

/// Mock server state
pub struct MockState {
    behavior: Mutex<MockBehavior>,
    pub connections: AtomicU64,
    pub closed: AtomicU64,
    received: Mutex<Vec<Value>>,
    current: Mutex<Option<mpsc::UnboundedSender<ServerAction>>>,
}

pub struct GeminiLiveMock {
    pub url: String,
    pub state: Arc<MockState>,
    handle: tokio::task::JoinHandle<()>,
}

impl GeminiLiveMock {
    pub async fn start(behavior: MockBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(MockState {
            behavior: Mutex::new(behavior),
            connections: AtomicU64::new(0),
            closed: AtomicU64::new(0),
            received: Mutex::new(Vec::new()),
            current: Mutex::new(None),
        });

        let accept_state = state.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(handle_connection(stream, accept_state.clone()));
            }
        });

        Self {
            url: format!("ws://{addr}/ws"),
            state,
            handle,
        }
    }

    pub fn set_behavior(&self, behavior: MockBehavior) {
        *self.state.behavior.lock() = behavior;
    }

    pub fn connections(&self) -> u64 {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> u64 {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Every client frame received so far, across connections.
    pub fn received(&self) -> Vec<Value> {
        self.state.received.lock().clone()
    }

    /// Client frames carrying the given top-level key.
    pub fn received_with(&self, key: &str) -> Vec<Value> {
        self.received()
            .into_iter()
            .filter(|frame| frame.get(key).is_some())
            .collect()
    }

    pub fn send_text(&self, frame: impl Into<String>) -> bool {
        self.push(ServerAction::Text(frame.into()))
    }

    pub fn send_binary(&self, frame: impl Into<String>) -> bool {
        self.push(ServerAction::Binary(frame.into().into_bytes()))
    }

    /// Close the live connection from the server side.
    pub fn close_current(&self) -> bool {
        self.push(ServerAction::Close)
    }

    /// Drop the live TCP connection without a closing handshake.
    pub fn abort_current(&self) -> bool {
        self.push(ServerAction::Abort)
    }

    fn push(&self, action: ServerAction) -> bool {
        self.state
            .current
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(action).is_ok())
    }
}

impl Drop for GeminiLiveMock {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_connection(stream: TcpStream, state: Arc<MockState>) {
    let Ok(ws_stream) = accept_async(stream).await else {
        return;
    };
    state.connections.fetch_add(1, Ordering::SeqCst);
    let (mut ws_sink, mut ws_source) = ws_stream.split();

    let behavior = *state.behavior.lock();
    if behavior == MockBehavior::RefuseHandshake {
        let _ = ws_sink.close().await;
        state.closed.fetch_add(1, Ordering::SeqCst);
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    *state.current.lock() = Some(tx);

    loop {
        tokio::select! {
            frame = ws_source.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let Ok(value) = serde_json::from_str::<Value>(text.as_str()) else {
                        continue;
                    };
                    let is_setup = value.get("setup").is_some();
                    state.received.lock().push(value);
                    if is_setup && behavior == MockBehavior::Normal {
                        let ack = json!({"setupComplete": {}}).to_string();
                        if ws_sink.send(Message::Text(ack.into())).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            action = rx.recv() => match action {
                Some(ServerAction::Text(text)) => {
                    if ws_sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Some(ServerAction::Binary(data)) => {
                    if ws_sink.send(Message::Binary(data.into())).await.is_err() {
                        break;
                    }
                }
                Some(ServerAction::Close) | None => {
                    let _ = ws_sink.close().await;
                    break;
                }
                Some(ServerAction::Abort) => break,
            },
        }
    }

    state.closed.fetch_add(1, Ordering::SeqCst);
}

/// A `serverContent` frame carrying one inline audio part.
pub fn audio_frame(mime_type: &str, payload: &[u8], interrupted: bool) -> String {
    json!({
        "serverContent": {
            "interrupted": interrupted,
            "modelTurn": {
                "parts": [
                    {"inlineData": {"mimeType": mime_type, "data": BASE64_STANDARD.encode(payload)}}
                ]
            }
        }
    })
    .to_string()
}
