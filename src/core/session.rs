//! Per-call session records.
//!
//! [`SessionRegistry`] is the one shared store every component consults. It
//! hands out whole-record copies and takes whole-record replacements. Edits
//! that depend on the current record go through [`SessionRegistry::update`],
//! which runs under the map's lock; nothing holds a reference into the map
//! across an await point.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::core::realtime::LinkHandle;
use crate::core::transport::{OutboundSink, RtpEndpoint};

/// State for one bridged call.
#[derive(Clone, Default)]
pub struct CallSession {
    /// Call identifier, stable for the session lifetime
    pub channel_id: String,
    /// Where outbound media is sent
    pub rtp_endpoint: RtpEndpoint,
    /// Handle to the live AI connection, if one is open
    pub socket: Option<LinkHandle>,
    /// Outbound audio handle, set once the AI handshake completes
    pub outbound_sink: Option<Arc<dyn OutboundSink>>,
    /// AI audio bytes received during the current AI session
    pub total_delta_bytes: u64,
    /// Value of `total_delta_bytes` at the last progress log
    pub logged_delta_bytes: u64,
    /// Audio chunks since the last progress log
    pub segment_count: u64,
    /// Reconnect attempts made for this call
    pub retry_count: u32,
    /// Set once the AI socket has closed
    pub closed: bool,
}

impl CallSession {
    pub fn new(channel_id: impl Into<String>, rtp_endpoint: RtpEndpoint) -> Self {
        Self {
            channel_id: channel_id.into(),
            rtp_endpoint,
            ..Default::default()
        }
    }

    pub fn has_sink(&self) -> bool {
        self.outbound_sink.is_some()
    }
}

impl fmt::Debug for CallSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSession")
            .field("channel_id", &self.channel_id)
            .field("rtp_endpoint", &self.rtp_endpoint)
            .field("socket", &self.socket)
            .field("has_sink", &self.outbound_sink.is_some())
            .field("total_delta_bytes", &self.total_delta_bytes)
            .field("logged_delta_bytes", &self.logged_delta_bytes)
            .field("segment_count", &self.segment_count)
            .field("retry_count", &self.retry_count)
            .field("closed", &self.closed)
            .finish()
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Shared map from channel id to [`CallSession`]. Cloning shares the map.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, CallSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current record.
    pub fn get(&self, channel_id: &str) -> Option<CallSession> {
        self.sessions.get(channel_id).map(|entry| entry.value().clone())
    }

    /// Replace (or create) the record.
    pub fn set(&self, channel_id: &str, session: CallSession) {
        self.sessions.insert(channel_id.to_string(), session);
    }

    /// Edit the record in place. Returns `None` when there is no record.
    ///
    /// The closure runs while the entry is locked, so concurrent updates to
    /// the same call are serialized. It must not touch the registry itself.
    pub fn update<R>(&self, channel_id: &str, f: impl FnOnce(&mut CallSession) -> R) -> Option<R> {
        self.sessions
            .get_mut(channel_id)
            .map(|mut entry| f(entry.value_mut()))
    }

    pub fn has(&self, channel_id: &str) -> bool {
        self.sessions.contains_key(channel_id)
    }

    pub fn delete(&self, channel_id: &str) -> Option<CallSession> {
        let removed = self.sessions.remove(channel_id).map(|(_, session)| session);
        if removed.is_some() {
            info!(channel_id = %channel_id, "Removed call session");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn channel_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }
}

// =============================================================================
// Close waiters
// =============================================================================

/// One-shot "AI socket closed" notifications keyed by channel id.
///
/// Each waiter is resolved at most once; resolving removes it.
#[derive(Clone, Default)]
pub struct CloseWaiters {
    waiters: Arc<DashMap<String, oneshot::Sender<()>>>,
}

impl CloseWaiters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in the next socket close for a call.
    ///
    /// Replaces any earlier waiter, whose receiver then sees a closed channel.
    pub fn register(&self, channel_id: &str) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(channel_id.to_string(), tx);
        rx
    }

    /// Resolve the waiter for a call. Returns `true` if one was pending.
    pub fn resolve(&self, channel_id: &str) -> bool {
        match self.waiters.remove(channel_id) {
            Some((_, tx)) => {
                debug!(channel_id = %channel_id, "Resolving socket close waiter");
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, channel_id: &str) -> bool {
        self.waiters.contains_key(channel_id)
    }
}
