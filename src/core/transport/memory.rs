//! In-memory transport.
//!
//! Sinks record every payload instead of sending it. Pending depths are
//! driven by hand so teardown behavior can be exercised without a network.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{
    AudioFinishedSignal, OutboundSink, RtpEndpoint, Transport, TransportError, TransportResult,
};

const INBOUND_CAPACITY: usize = 64;

/// Transport handing out [`MemorySink`]s, one per call.
#[derive(Default)]
pub struct MemoryTransport {
    sinks: DashMap<String, Arc<MemorySink>>,
    opened: AtomicUsize,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recently opened sink for a call.
    pub fn sink(&self, channel_id: &str) -> Option<Arc<MemorySink>> {
        self.sinks.get(channel_id).map(|entry| entry.value().clone())
    }

    /// Total sinks opened across all calls.
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open_sink(
        &self,
        channel_id: &str,
        endpoint: &RtpEndpoint,
    ) -> TransportResult<Arc<dyn OutboundSink>> {
        let sink = Arc::new(MemorySink::new(endpoint.clone()));
        self.sinks.insert(channel_id.to_string(), sink.clone());
        self.opened.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(channel_id = %channel_id, endpoint = %endpoint, "Opened in-memory sink");
        Ok(sink)
    }
}

/// Sink that keeps every payload it receives.
pub struct MemorySink {
    endpoint: RtpEndpoint,
    sent: Mutex<Vec<Bytes>>,
    pending_bytes: AtomicUsize,
    pending_packets: AtomicUsize,
    stop_count: AtomicUsize,
    finished: AudioFinishedSignal,
    inbound_tx: mpsc::Sender<Bytes>,
    inbound_rx: Mutex<Option<mpsc::Receiver<Bytes>>>,
    closed: AtomicBool,
}

impl MemorySink {
    pub fn new(endpoint: RtpEndpoint) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        Self {
            endpoint,
            sent: Mutex::new(Vec::new()),
            pending_bytes: AtomicUsize::new(0),
            pending_packets: AtomicUsize::new(0),
            stop_count: AtomicUsize::new(0),
            finished: AudioFinishedSignal::new(),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            closed: AtomicBool::new(false),
        }
    }

    pub fn endpoint(&self) -> &RtpEndpoint {
        &self.endpoint
    }

    /// Payloads in the order they were sent.
    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().clone()
    }

    /// All sent payloads concatenated.
    pub fn sent_bytes(&self) -> Vec<u8> {
        self.sent
            .lock()
            .iter()
            .flat_map(|chunk| chunk.iter().copied())
            .collect()
    }

    pub fn stop_count(&self) -> usize {
        self.stop_count.load(Ordering::SeqCst)
    }

    /// Pretend the given amount of audio is still waiting for playout.
    pub fn set_pending(&self, buffer_bytes: usize, queue_packets: usize) {
        self.pending_bytes.store(buffer_bytes, Ordering::SeqCst);
        self.pending_packets.store(queue_packets, Ordering::SeqCst);
    }

    /// Clear the pending depths and fire the audio-finished signal.
    pub fn finish_playout(&self) {
        self.set_pending(0, 0);
        self.finished.notify();
    }

    /// Inject caller audio as if it had arrived on the media leg.
    pub fn push_inbound(&self, payload: Bytes) -> TransportResult<()> {
        self.inbound_tx
            .try_send(payload)
            .map_err(|_| TransportError::Closed)
    }

    /// Reject further sends.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl OutboundSink for MemorySink {
    fn send(&self, payload: Bytes) -> TransportResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.sent.lock().push(payload);
        Ok(())
    }

    fn stop_playback(&self) {
        self.stop_count.fetch_add(1, Ordering::SeqCst);
        self.set_pending(0, 0);
    }

    fn pending_buffer_bytes(&self) -> usize {
        self.pending_bytes.load(Ordering::SeqCst)
    }

    fn pending_queue_packets(&self) -> usize {
        self.pending_packets.load(Ordering::SeqCst)
    }

    fn audio_finished(&self) -> AudioFinishedSignal {
        self.finished.clone()
    }

    fn take_inbound(&self) -> Option<mpsc::Receiver<Bytes>> {
        self.inbound_rx.lock().take()
    }
}
