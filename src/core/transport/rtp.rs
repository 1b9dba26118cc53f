//! PCMU over UDP.
//!
//! Each sink owns one UDP socket. Audio handed to [`RtpSink::send`] is cut
//! into 160-byte frames (20 ms at 8 kHz) and paced out by a ticker; a short
//! tail is padded with µ-law silence. Packets arriving on the same socket are
//! stripped to their payload and exposed as caller audio.
//!
//! There is no jitter buffer: inbound packets are forwarded in arrival order.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{
    AudioFinishedSignal, OutboundSink, RtpEndpoint, Transport, TransportError, TransportResult,
};
use crate::core::codec::{MULAW_FRAME_BYTES, MULAW_FRAME_MS, MULAW_SILENCE};

/// Static payload type for G.711 µ-law.
pub const PCMU_PAYLOAD_TYPE: u8 = 0;

const RTP_VERSION: u8 = 2;
const RTP_HEADER_LEN: usize = 12;
const MAX_DATAGRAM: usize = 2048;
const INBOUND_CAPACITY: usize = 256;
/// Number of even ports handed out before wrapping back to the start.
const PORT_SLOTS: u32 = 1000;

// =============================================================================
// Header
// =============================================================================

/// Fixed RTP header (RFC 3550 section 5.1), without CSRCs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_u8(RTP_VERSION << 6);
        buf.put_u8(((self.marker as u8) << 7) | (self.payload_type & 0x7F));
        buf.put_u16(self.sequence);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
    }

    /// Split a datagram into header and payload.
    ///
    /// Skips CSRCs and header extensions and strips trailing padding.
    pub fn parse(packet: &[u8]) -> Option<(RtpHeader, &[u8])> {
        if packet.len() < RTP_HEADER_LEN {
            return None;
        }
        let mut cursor = packet;
        let first = cursor.get_u8();
        if first >> 6 != RTP_VERSION {
            return None;
        }
        let has_padding = first & 0x20 != 0;
        let has_extension = first & 0x10 != 0;
        let csrc_count = (first & 0x0F) as usize;

        let second = cursor.get_u8();
        let header = RtpHeader {
            marker: second & 0x80 != 0,
            payload_type: second & 0x7F,
            sequence: cursor.get_u16(),
            timestamp: cursor.get_u32(),
            ssrc: cursor.get_u32(),
        };

        let mut offset = RTP_HEADER_LEN + csrc_count * 4;
        if has_extension {
            if packet.len() < offset + 4 {
                return None;
            }
            let words = u16::from_be_bytes([packet[offset + 2], packet[offset + 3]]) as usize;
            offset += 4 + words * 4;
        }

        let mut end = packet.len();
        if has_padding {
            let pad = *packet.last()? as usize;
            end = end.checked_sub(pad)?;
        }
        if offset > end {
            return None;
        }
        Some((header, &packet[offset..end]))
    }
}

// =============================================================================
// Packetizer
// =============================================================================

/// Stamps successive PCMU frames with sequence numbers and timestamps.
#[derive(Debug)]
pub struct RtpPacketizer {
    ssrc: u32,
    sequence: u16,
    timestamp: u32,
    talkspurt: bool,
}

impl RtpPacketizer {
    pub fn new(ssrc: u32) -> Self {
        Self {
            ssrc,
            sequence: 0,
            timestamp: 0,
            talkspurt: true,
        }
    }

    /// Mark the next packet as the start of a talkspurt.
    pub fn start_talkspurt(&mut self) {
        self.talkspurt = true;
    }

    pub fn packetize(&mut self, payload: &[u8]) -> Bytes {
        let header = RtpHeader {
            marker: self.talkspurt,
            payload_type: PCMU_PAYLOAD_TYPE,
            sequence: self.sequence,
            timestamp: self.timestamp,
            ssrc: self.ssrc,
        };
        self.talkspurt = false;
        self.sequence = self.sequence.wrapping_add(1);
        // One µ-law byte per sample
        self.timestamp = self.timestamp.wrapping_add(payload.len() as u32);

        let mut buf = BytesMut::with_capacity(RTP_HEADER_LEN + payload.len());
        header.write(&mut buf);
        buf.put_slice(payload);
        buf.freeze()
    }
}

// =============================================================================
// Playout state
// =============================================================================

#[derive(Debug)]
struct PlayoutState {
    /// Audio not yet cut into a whole frame
    buffer: BytesMut,
    /// Packets ready to go out
    queue: VecDeque<Bytes>,
    packetizer: RtpPacketizer,
    playing: bool,
}

impl PlayoutState {
    fn new(ssrc: u32) -> Self {
        Self {
            buffer: BytesMut::new(),
            queue: VecDeque::new(),
            packetizer: RtpPacketizer::new(ssrc),
            playing: false,
        }
    }

    fn push(&mut self, payload: &[u8]) {
        self.buffer.extend_from_slice(payload);
        while self.buffer.len() >= MULAW_FRAME_BYTES {
            let frame = self.buffer.split_to(MULAW_FRAME_BYTES);
            let packet = self.packetizer.packetize(&frame);
            self.queue.push_back(packet);
        }
    }

    fn next_packet(&mut self) -> Option<Bytes> {
        if let Some(packet) = self.queue.pop_front() {
            return Some(packet);
        }
        if self.buffer.is_empty() {
            return None;
        }
        let mut frame = std::mem::take(&mut self.buffer);
        frame.resize(MULAW_FRAME_BYTES, MULAW_SILENCE);
        Some(self.packetizer.packetize(&frame))
    }

    fn clear(&mut self) {
        self.buffer.clear();
        self.queue.clear();
        self.packetizer.start_talkspurt();
    }
}

// =============================================================================
// Transport
// =============================================================================

/// Opens one UDP socket per call, allocating even local ports upward from a base.
///
/// A base port of 0 lets the OS pick every port.
pub struct UdpRtpTransport {
    bind_host: String,
    port_start: u16,
    next_slot: AtomicU32,
}

impl UdpRtpTransport {
    pub fn new(bind_host: impl Into<String>, port_start: u16) -> Self {
        Self {
            bind_host: bind_host.into(),
            port_start,
            next_slot: AtomicU32::new(0),
        }
    }

    fn next_port(&self) -> u16 {
        if self.port_start == 0 {
            return 0;
        }
        let slot = self.next_slot.fetch_add(1, Ordering::Relaxed) % PORT_SLOTS;
        let port = self.port_start as u32 + slot * 2;
        if port > u16::MAX as u32 {
            self.port_start
        } else {
            port as u16
        }
    }

    /// Open a sink and return the concrete type.
    pub async fn open(&self, channel_id: &str, endpoint: &RtpEndpoint) -> TransportResult<Arc<RtpSink>> {
        let remote = tokio::net::lookup_host(endpoint.to_string())
            .await
            .map_err(|e| TransportError::InvalidEndpoint(format!("{endpoint}: {e}")))?
            .next()
            .ok_or_else(|| TransportError::InvalidEndpoint(endpoint.to_string()))?;

        let local = format!("{}:{}", self.bind_host, self.next_port());
        let socket = UdpSocket::bind(&local)
            .await
            .map_err(|e| TransportError::Bind {
                addr: local.clone(),
                reason: e.to_string(),
            })?;
        let local_addr = socket.local_addr()?;
        let socket = Arc::new(socket);

        let ssrc = uuid::Uuid::new_v4().as_u128() as u32;
        let state = Arc::new(Mutex::new(PlayoutState::new(ssrc)));
        let finished = AudioFinishedSignal::new();
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);

        let playout = tokio::spawn(run_playout(
            socket.clone(),
            remote,
            state.clone(),
            finished.clone(),
        ));
        let receive = tokio::spawn(run_receive(socket, inbound_tx));

        tracing::info!(
            channel_id = %channel_id,
            local = %local_addr,
            remote = %remote,
            "Opened RTP sink"
        );

        Ok(Arc::new(RtpSink {
            local_addr,
            remote,
            state,
            finished,
            inbound: Mutex::new(Some(inbound_rx)),
            tasks: vec![playout, receive],
        }))
    }
}

#[async_trait]
impl Transport for UdpRtpTransport {
    async fn open_sink(
        &self,
        channel_id: &str,
        endpoint: &RtpEndpoint,
    ) -> TransportResult<Arc<dyn OutboundSink>> {
        let sink = self.open(channel_id, endpoint).await?;
        Ok(sink)
    }
}

async fn run_playout(
    socket: Arc<UdpSocket>,
    remote: SocketAddr,
    state: Arc<Mutex<PlayoutState>>,
    finished: AudioFinishedSignal,
) {
    let mut ticker = tokio::time::interval(Duration::from_millis(MULAW_FRAME_MS));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let (packet, drained) = {
            let mut state = state.lock();
            match state.next_packet() {
                Some(packet) => {
                    state.playing = true;
                    (Some(packet), false)
                }
                None if state.playing => {
                    state.playing = false;
                    state.packetizer.start_talkspurt();
                    (None, true)
                }
                None => (None, false),
            }
        };

        if let Some(packet) = packet
            && let Err(e) = socket.send_to(&packet, remote).await
        {
            tracing::warn!("Failed to send RTP packet to {}: {}", remote, e);
        }
        if drained {
            finished.notify();
        }
    }
}

async fn run_receive(socket: Arc<UdpSocket>, inbound: mpsc::Sender<Bytes>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let len = match socket.recv_from(&mut buf).await {
            Ok((len, _)) => len,
            Err(e) => {
                tracing::debug!("RTP receive error: {}", e);
                continue;
            }
        };
        let Some((header, payload)) = RtpHeader::parse(&buf[..len]) else {
            tracing::trace!("Ignoring non-RTP datagram ({} bytes)", len);
            continue;
        };
        if header.payload_type != PCMU_PAYLOAD_TYPE || payload.is_empty() {
            continue;
        }
        match inbound.try_send(Bytes::copy_from_slice(payload)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::trace!("Inbound audio channel full, dropping packet");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => break,
        }
    }
}

// =============================================================================
// Sink
// =============================================================================

/// UDP-backed sink for one call. Dropping it stops both socket tasks.
pub struct RtpSink {
    local_addr: SocketAddr,
    remote: SocketAddr,
    state: Arc<Mutex<PlayoutState>>,
    finished: AudioFinishedSignal,
    inbound: Mutex<Option<mpsc::Receiver<Bytes>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl RtpSink {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }
}

impl Drop for RtpSink {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl OutboundSink for RtpSink {
    fn send(&self, payload: Bytes) -> TransportResult<()> {
        if self.tasks.iter().any(|t| t.is_finished()) {
            return Err(TransportError::Closed);
        }
        self.state.lock().push(&payload);
        Ok(())
    }

    fn stop_playback(&self) {
        self.state.lock().clear();
    }

    fn pending_buffer_bytes(&self) -> usize {
        self.state.lock().buffer.len()
    }

    fn pending_queue_packets(&self) -> usize {
        self.state.lock().queue.len()
    }

    fn audio_finished(&self) -> AudioFinishedSignal {
        self.finished.clone()
    }

    fn take_inbound(&self) -> Option<mpsc::Receiver<Bytes>> {
        self.inbound.lock().take()
    }
}
