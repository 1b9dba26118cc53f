//! Call orchestration.
//!
//! [`CallBridge`] owns everything shared between calls: the session registry,
//! the transport, the close waiters and one [`GeminiLiveClient`] per call.
//! Call control drives it through [`start_call`](CallBridge::start_call) and
//! [`end_call`](CallBridge::end_call).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::core::drain::{
    DEFAULT_DRAIN_CHECK_INTERVAL, DEFAULT_DRAIN_MAX_WAIT, DrainOutcome, DrainSynchronizer,
};
use crate::core::realtime::{
    GeminiLiveClient, LiveSessionConfig, RealtimeError, RealtimeErrorCallback, RealtimeLink,
    RealtimeResult,
};
use crate::core::session::{CallSession, CloseWaiters, SessionRegistry};
use crate::core::transport::{RtpEndpoint, Transport};

/// Default bound on waiting for the AI socket to close during teardown.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Default concurrent call limit.
pub const DEFAULT_MAX_CONCURRENT_CALLS: usize = 10;

#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub session: LiveSessionConfig,
    pub max_concurrent_calls: usize,
    /// Calls are ended automatically after this long
    pub call_duration_limit: Option<Duration>,
    pub drain_max_wait: Duration,
    pub drain_check_interval: Duration,
    pub close_timeout: Duration,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            session: LiveSessionConfig::default(),
            max_concurrent_calls: DEFAULT_MAX_CONCURRENT_CALLS,
            call_duration_limit: None,
            drain_max_wait: DEFAULT_DRAIN_MAX_WAIT,
            drain_check_interval: DEFAULT_DRAIN_CHECK_INTERVAL,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

/// Bridges calls to the realtime AI.
pub struct CallBridge {
    settings: BridgeSettings,
    registry: SessionRegistry,
    transport: Arc<dyn Transport>,
    close_waiters: CloseWaiters,
    drain: DrainSynchronizer,
    clients: DashMap<String, GeminiLiveClient>,
    timers: DashMap<String, JoinHandle<()>>,
}

impl CallBridge {
    pub fn new(settings: BridgeSettings, transport: Arc<dyn Transport>) -> Arc<Self> {
        let registry = SessionRegistry::new();
        Arc::new(Self {
            settings,
            drain: DrainSynchronizer::new(registry.clone()),
            registry,
            transport,
            close_waiters: CloseWaiters::new(),
            clients: DashMap::new(),
            timers: DashMap::new(),
        })
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    pub fn active_calls(&self) -> usize {
        self.clients.len()
    }

    pub fn client(&self, channel_id: &str) -> Option<GeminiLiveClient> {
        self.clients
            .get(channel_id)
            .map(|entry| entry.value().clone())
    }

    /// Register a call and connect it to the AI.
    ///
    /// On failure nothing about the call is left behind.
    pub async fn start_call(
        self: &Arc<Self>,
        channel_id: &str,
        endpoint: RtpEndpoint,
    ) -> RealtimeResult<()> {
        if self.registry.has(channel_id) || self.clients.contains_key(channel_id) {
            return Err(RealtimeError::SessionError(format!(
                "Call {channel_id} is already active"
            )));
        }
        if self.clients.len() >= self.settings.max_concurrent_calls {
            warn!(
                channel_id = %channel_id,
                "Rejecting call, {} calls already active",
                self.clients.len()
            );
            return Err(RealtimeError::CapacityExceeded(format!(
                "{} concurrent calls",
                self.settings.max_concurrent_calls
            )));
        }

        info!(channel_id = %channel_id, endpoint = %endpoint, "Starting call");
        self.registry
            .set(channel_id, CallSession::new(channel_id, endpoint));

        let client = match GeminiLiveClient::new(
            channel_id,
            self.settings.session.clone(),
            self.registry.clone(),
            self.transport.clone(),
            self.close_waiters.clone(),
        ) {
            Ok(client) => client,
            Err(e) => {
                self.registry.delete(channel_id);
                return Err(e);
            }
        };
        client.on_error(self.link_failure_callback(channel_id));
        self.clients.insert(channel_id.to_string(), client.clone());

        if let Err(e) = client.connect().await {
            error!(channel_id = %channel_id, "Failed to connect call: {}", e);
            self.clients.remove(channel_id);
            self.registry.delete(channel_id);
            return Err(e);
        }

        if let Some(limit) = self.settings.call_duration_limit {
            self.arm_duration_limit(channel_id, limit);
        }
        Ok(())
    }

    /// Forward caller audio (8 kHz µ-law) to the call's AI session.
    pub async fn send_caller_audio(&self, channel_id: &str, mulaw: &[u8]) -> RealtimeResult<()> {
        let client = self
            .client(channel_id)
            .ok_or_else(|| RealtimeError::SessionNotFound(channel_id.to_string()))?;
        client.send_audio(mulaw).await
    }

    pub async fn send_user_turn(&self, channel_id: &str, text: &str) -> RealtimeResult<()> {
        let client = self
            .client(channel_id)
            .ok_or_else(|| RealtimeError::SessionNotFound(channel_id.to_string()))?;
        client.send_user_turn(text).await
    }

    /// Drain outbound audio, close the AI link and forget the call.
    ///
    /// A drain timeout is reported in the outcome but does not stop teardown.
    pub async fn end_call(&self, channel_id: &str) -> RealtimeResult<DrainOutcome> {
        if !self.registry.has(channel_id) && !self.clients.contains_key(channel_id) {
            return Err(RealtimeError::SessionNotFound(channel_id.to_string()));
        }
        info!(channel_id = %channel_id, "Ending call");

        if let Some((_, timer)) = self.timers.remove(channel_id) {
            timer.abort();
        }

        let outcome = self
            .drain
            .wait_for_buffer_empty(
                channel_id,
                self.settings.drain_max_wait,
                self.settings.drain_check_interval,
            )
            .await;
        if !outcome.is_success() {
            warn!(channel_id = %channel_id, "Tearing down with audio still queued");
        }

        if let Some((_, client)) = self.clients.remove(channel_id) {
            let socket_open = self
                .registry
                .get(channel_id)
                .is_some_and(|session| session.socket.is_some());

            if socket_open {
                let closed = self.close_waiters.register(channel_id);
                if let Err(e) = client.disconnect().await {
                    warn!(channel_id = %channel_id, "Disconnect failed: {}", e);
                }
                match tokio::time::timeout(self.settings.close_timeout, closed).await {
                    Ok(_) => debug!(channel_id = %channel_id, "AI socket closed"),
                    Err(_) => warn!(
                        channel_id = %channel_id,
                        "AI socket did not close within {:?}",
                        self.settings.close_timeout
                    ),
                }
            } else if let Err(e) = client.disconnect().await {
                warn!(channel_id = %channel_id, "Disconnect failed: {}", e);
            }
        }

        self.registry.delete(channel_id);
        info!(channel_id = %channel_id, outcome = ?outcome, "Call ended");
        Ok(outcome)
    }

    /// End every active call.
    pub async fn shutdown(&self) {
        let mut channel_ids: Vec<String> = self
            .clients
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for channel_id in self.registry.channel_ids() {
            if !channel_ids.contains(&channel_id) {
                channel_ids.push(channel_id);
            }
        }

        for channel_id in channel_ids {
            if let Err(e) = self.end_call(&channel_id).await {
                debug!(channel_id = %channel_id, "Skipping teardown: {}", e);
            }
        }
    }

    fn link_failure_callback(self: &Arc<Self>, channel_id: &str) -> RealtimeErrorCallback {
        let bridge = Arc::downgrade(self);
        let channel_id = channel_id.to_string();
        Arc::new(move |err: RealtimeError| {
            let bridge = bridge.clone();
            let channel_id = channel_id.clone();
            Box::pin(async move {
                error!(channel_id = %channel_id, "AI link lost for good: {}", err);
                if let Some(bridge) = bridge.upgrade() {
                    bridge.release(&channel_id);
                }
            }) as Pin<Box<dyn Future<Output = ()> + Send>>
        })
    }

    /// Forget a call whose link is already gone.
    fn release(&self, channel_id: &str) {
        if let Some((_, timer)) = self.timers.remove(channel_id) {
            timer.abort();
        }
        self.clients.remove(channel_id);
        self.registry.delete(channel_id);
    }

    fn arm_duration_limit(self: &Arc<Self>, channel_id: &str, limit: Duration) {
        let bridge = Arc::downgrade(self);
        let id = channel_id.to_string();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            let Some(bridge) = bridge.upgrade() else {
                return;
            };
            // Removed first so end_call does not abort this task
            bridge.timers.remove(&id);
            info!(channel_id = %id, "Call duration limit of {:?} reached", limit);
            if let Err(e) = bridge.end_call(&id).await {
                debug!(channel_id = %id, "Call already gone: {}", e);
            }
        });
        self.timers.insert(channel_id.to_string(), timer);
    }
}

impl Drop for CallBridge {
    fn drop(&mut self) {
        for entry in self.timers.iter() {
            entry.value().abort();
        }
    }
}
