//! AI output handling for one call.
//!
//! [`AudioDeltaProcessor`] turns decoded server frames into telephone audio:
//! it converts each payload to 8 kHz µ-law according to its declared format,
//! pads the first chunk of an AI session with silence, cancels playout on
//! barge-in and keeps the byte counters used for drain estimation.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tracing::{debug, error, info, warn};

use super::base::{
    AudioEventHandler, AudioPayloadFormat, DeltaOutcome, RealtimeError, RealtimeResult,
};
use super::gemini::messages::{ServerContent, ServerMessage};
use crate::core::codec::{self, is_mulaw_silence, mulaw_silence};
use crate::core::session::SessionRegistry;

/// Default silence prepended to the first audio of an AI session.
pub const DEFAULT_SILENCE_PADDING_MS: u64 = 100;

/// Default byte delta between progress logs.
pub const DEFAULT_PROGRESS_LOG_BYTES: u64 = 4000;

/// Default chunk count between progress logs.
pub const DEFAULT_PROGRESS_LOG_SEGMENTS: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorSettings {
    pub silence_padding_ms: u64,
    pub progress_log_bytes: u64,
    pub progress_log_segments: u64,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            silence_padding_ms: DEFAULT_SILENCE_PADDING_MS,
            progress_log_bytes: DEFAULT_PROGRESS_LOG_BYTES,
            progress_log_segments: DEFAULT_PROGRESS_LOG_SEGMENTS,
        }
    }
}

/// Per-call consumer of AI server frames.
pub struct AudioDeltaProcessor {
    channel_id: String,
    registry: SessionRegistry,
    settings: ProcessorSettings,
    client_transcripts: AtomicU64,
    ai_transcripts: AtomicU64,
}

impl AudioDeltaProcessor {
    pub fn new(
        channel_id: impl Into<String>,
        registry: SessionRegistry,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            registry,
            settings,
            client_transcripts: AtomicU64::new(0),
            ai_transcripts: AtomicU64::new(0),
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Handle one server frame.
    ///
    /// Every part of the frame is attempted; the first failure is returned
    /// after the rest has been handled.
    pub fn process(&self, message: ServerMessage) -> RealtimeResult<()> {
        let mut first_error = None;

        if message.is_setup_complete() {
            info!(channel_id = %self.channel_id, "AI setup complete");
        }

        if let Some(content) = message.server_content
            && let Err(e) = self.process_content(content)
        {
            first_error.get_or_insert(e);
        }

        if let Some(tool_call) = message.tool_call {
            debug!(channel_id = %self.channel_id, "Tool call: {}", tool_call);
        }
        if let Some(cancellation) = message.tool_call_cancellation {
            debug!(channel_id = %self.channel_id, "Tool call cancellation: {}", cancellation);
        }
        if let Some(usage) = message.usage_metadata {
            debug!(channel_id = %self.channel_id, "Usage: {}", usage);
        }
        if let Some(go_away) = message.go_away {
            warn!(channel_id = %self.channel_id, "Server going away: {}", go_away);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn process_content(&self, content: ServerContent) -> RealtimeResult<()> {
        let mut first_error = None;

        if content.interrupted {
            self.on_interrupt();
        }

        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                if let Some(blob) = part.inline_data {
                    if content.interrupted {
                        debug!(channel_id = %self.channel_id, "Dropping audio from interrupted turn");
                        continue;
                    }
                    let result = AudioPayloadFormat::from_mime_type(&blob.mime_type)
                        .map_err(RealtimeError::from)
                        .and_then(|format| {
                            let bytes = blob.decode().map_err(|e| {
                                RealtimeError::SerializationError(format!(
                                    "Invalid base64 audio: {e}"
                                ))
                            })?;
                            self.on_audio_delta(&bytes, format)
                        });
                    if let Err(e) = result {
                        error!(channel_id = %self.channel_id, "Failed to handle audio part: {}", e);
                        first_error.get_or_insert(e);
                    }
                }
                if let Some(text) = part.text {
                    debug!(channel_id = %self.channel_id, "AI text: {}", text);
                }
            }
        }

        if let Some(text) = content.input_transcription.as_ref().and_then(|t| t.text()) {
            let seq = self.client_transcripts.fetch_add(1, Ordering::Relaxed) + 1;
            info!(channel_id = %self.channel_id, "[Client #{}] {}", seq, text);
        }
        if let Some(text) = content.output_transcription.as_ref().and_then(|t| t.text()) {
            let seq = self.ai_transcripts.fetch_add(1, Ordering::Relaxed) + 1;
            info!(channel_id = %self.channel_id, "[AI #{}] {}", seq, text);
        }

        if content.generation_complete {
            debug!(channel_id = %self.channel_id, "Generation complete");
        }
        if content.turn_complete {
            self.on_turn_complete();
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn to_mulaw(payload: &[u8], format: AudioPayloadFormat) -> RealtimeResult<Vec<u8>> {
        match format {
            AudioPayloadFormat::MuLaw => Ok(payload.to_vec()),
            AudioPayloadFormat::Pcm16 { sample_rate } => {
                Ok(codec::pcm_to_mulaw(payload, sample_rate)?)
            }
        }
    }
}

impl AudioEventHandler for AudioDeltaProcessor {
    fn on_audio_delta(
        &self,
        payload: &[u8],
        format: AudioPayloadFormat,
    ) -> RealtimeResult<DeltaOutcome> {
        if payload.is_empty() {
            warn!(channel_id = %self.channel_id, "Discarding empty audio delta");
            return Ok(DeltaOutcome::Discarded);
        }

        let mulaw = Self::to_mulaw(payload, format)?;
        if mulaw.is_empty() || is_mulaw_silence(&mulaw) {
            warn!(
                channel_id = %self.channel_id,
                bytes = payload.len(),
                format = %format,
                "Discarding silent audio delta"
            );
            return Ok(DeltaOutcome::Discarded);
        }

        let chunk_len = mulaw.len() as u64;
        let progress_bytes = self.settings.progress_log_bytes;
        let progress_segments = self.settings.progress_log_segments;
        let update = self.registry.update(&self.channel_id, |session| {
            session.total_delta_bytes += chunk_len;
            session.segment_count += 1;

            // First audio since the AI session (re)started
            let first = session.total_delta_bytes == chunk_len;

            let progress = (session.total_delta_bytes - session.logged_delta_bytes
                >= progress_bytes
                || session.segment_count >= progress_segments)
                .then(|| {
                    let snapshot = (session.total_delta_bytes, session.segment_count);
                    session.logged_delta_bytes = session.total_delta_bytes;
                    session.segment_count = 0;
                    snapshot
                });

            (first, progress, session.outbound_sink.clone())
        });
        let Some((first, progress, sink)) = update else {
            debug!(channel_id = %self.channel_id, "Session gone, dropping audio delta");
            return Ok(DeltaOutcome::SessionGone);
        };

        if let Some((total_bytes, segments)) = progress {
            info!(
                channel_id = %self.channel_id,
                total_bytes,
                segments,
                "Streaming AI audio"
            );
        }

        let padded = first && self.settings.silence_padding_ms > 0;
        let outbound = if padded {
            let mut buf = mulaw_silence(self.settings.silence_padding_ms);
            info!(
                channel_id = %self.channel_id,
                "Prepending {} bytes of silence ({}ms)",
                buf.len(),
                self.settings.silence_padding_ms
            );
            buf.extend_from_slice(&mulaw);
            buf
        } else {
            mulaw
        };

        let Some(sink) = sink else {
            warn!(channel_id = %self.channel_id, "No outbound sink yet, dropping audio delta");
            return Ok(DeltaOutcome::NoSink);
        };

        let bytes = outbound.len();
        sink.send(Bytes::from(outbound))?;
        Ok(DeltaOutcome::Forwarded { bytes, padded })
    }

    fn on_interrupt(&self) {
        let sink = self
            .registry
            .get(&self.channel_id)
            .and_then(|session| session.outbound_sink);
        match sink {
            Some(sink) => {
                info!(channel_id = %self.channel_id, "Caller interrupted, stopping playback");
                sink.stop_playback();
            }
            None => debug!(channel_id = %self.channel_id, "Interrupted with no active sink"),
        }
    }

    fn on_turn_complete(&self) {
        let total_bytes = self.registry.update(&self.channel_id, |session| {
            session.logged_delta_bytes = 0;
            session.segment_count = 0;
            session.total_delta_bytes
        });
        if let Some(total_bytes) = total_bytes {
            info!(channel_id = %self.channel_id, total_bytes, "AI turn complete");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::{MULAW_SILENCE, samples_to_pcm16le};
    use crate::core::session::CallSession;
    use crate::core::transport::{MemorySink, OutboundSink, RtpEndpoint};
    use base64::prelude::*;
    use std::sync::Arc;

    fn setup(with_sink: bool) -> (AudioDeltaProcessor, SessionRegistry, Arc<MemorySink>) {
        let registry = SessionRegistry::new();
        let sink = Arc::new(MemorySink::new(RtpEndpoint::default()));
        let mut session = CallSession::new("call-1", RtpEndpoint::default());
        if with_sink {
            session.outbound_sink = Some(sink.clone() as Arc<dyn OutboundSink>);
        }
        registry.set("call-1", session);
        let processor =
            AudioDeltaProcessor::new("call-1", registry.clone(), ProcessorSettings::default());
        (processor, registry, sink)
    }

    fn audio_frame(mime: &str, payload: &[u8], interrupted: bool) -> ServerMessage {
        let json = serde_json::json!({
            "serverContent": {
                "interrupted": interrupted,
                "modelTurn": {"parts": [
                    {"inlineData": {"mimeType": mime, "data": BASE64_STANDARD.encode(payload)}}
                ]}
            }
        });
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_first_chunk_gets_silence_padding() {
        let (processor, registry, sink) = setup(true);
        let chunk = vec![0x10u8; 240];

        let outcome = processor
            .on_audio_delta(&chunk, AudioPayloadFormat::MuLaw)
            .unwrap();
        assert_eq!(
            outcome,
            DeltaOutcome::Forwarded {
                bytes: 800 + 240,
                padded: true
            }
        );

        let sent = sink.sent_bytes();
        assert_eq!(sent.len(), 1040);
        assert!(sent[..800].iter().all(|&b| b == MULAW_SILENCE));
        assert_eq!(&sent[800..], chunk.as_slice());
        assert_eq!(registry.get("call-1").unwrap().total_delta_bytes, 240);
    }

    #[test]
    fn test_later_chunks_are_not_padded() {
        let (processor, registry, sink) = setup(true);
        processor
            .on_audio_delta(&[0x10; 160], AudioPayloadFormat::MuLaw)
            .unwrap();
        let outcome = processor
            .on_audio_delta(&[0x20; 160], AudioPayloadFormat::MuLaw)
            .unwrap();

        assert_eq!(
            outcome,
            DeltaOutcome::Forwarded {
                bytes: 160,
                padded: false
            }
        );
        assert_eq!(sink.sent().len(), 2);
        let session = registry.get("call-1").unwrap();
        assert_eq!(session.total_delta_bytes, 320);
        assert_eq!(session.segment_count, 2);
    }

    #[test]
    fn test_pcm_payload_is_transcoded() {
        let (processor, registry, sink) = setup(true);
        let pcm = samples_to_pcm16le(&[1000i16; 480]);

        processor
            .on_audio_delta(&pcm, AudioPayloadFormat::Pcm16 { sample_rate: 24000 })
            .unwrap();

        // 480 samples at 24 kHz -> 160 µ-law bytes, after 800 bytes of padding
        assert_eq!(sink.sent_bytes().len(), 960);
        assert_eq!(registry.get("call-1").unwrap().total_delta_bytes, 160);
    }

    #[test]
    fn test_silent_and_empty_deltas_discarded() {
        let (processor, registry, sink) = setup(true);

        assert_eq!(
            processor
                .on_audio_delta(&[], AudioPayloadFormat::MuLaw)
                .unwrap(),
            DeltaOutcome::Discarded
        );
        assert_eq!(
            processor
                .on_audio_delta(&[MULAW_SILENCE; 160], AudioPayloadFormat::MuLaw)
                .unwrap(),
            DeltaOutcome::Discarded
        );
        // Two samples at 24 kHz decimate to nothing
        assert_eq!(
            processor
                .on_audio_delta(&[1, 0, 2, 0], AudioPayloadFormat::Pcm16 { sample_rate: 24000 })
                .unwrap(),
            DeltaOutcome::Discarded
        );

        assert!(sink.sent().is_empty());
        assert_eq!(registry.get("call-1").unwrap().total_delta_bytes, 0);
    }

    #[test]
    fn test_digital_silence_pcm_discarded() {
        let (processor, registry, sink) = setup(true);

        // 480 zero samples at 24 kHz encode to 160 bytes of 0xFF
        let outcome = processor
            .on_audio_delta(&[0u8; 960], AudioPayloadFormat::Pcm16 { sample_rate: 24000 })
            .unwrap();

        assert_eq!(outcome, DeltaOutcome::Discarded);
        assert!(sink.sent().is_empty());
        assert_eq!(registry.get("call-1").unwrap().total_delta_bytes, 0);
    }

    #[test]
    fn test_counters_survive_concurrent_session_edits() {
        let (processor, registry, sink) = setup(true);
        let processor = Arc::new(processor);
        const ROUNDS: u64 = 5_000;

        let audio = {
            let processor = processor.clone();
            std::thread::spawn(move || {
                for _ in 0..ROUNDS {
                    processor
                        .on_audio_delta(&[0x10; 160], AudioPayloadFormat::MuLaw)
                        .unwrap();
                }
            })
        };
        let retries = {
            let registry = registry.clone();
            std::thread::spawn(move || {
                for _ in 0..ROUNDS {
                    registry.update("call-1", |session| session.retry_count += 1);
                }
            })
        };
        audio.join().unwrap();
        retries.join().unwrap();

        let session = registry.get("call-1").unwrap();
        assert_eq!(session.total_delta_bytes, ROUNDS * 160);
        assert_eq!(session.retry_count as u64, ROUNDS);
        assert_eq!(sink.sent().len() as u64, ROUNDS);
    }

    #[test]
    fn test_no_sink_counts_but_does_not_send() {
        let (processor, registry, sink) = setup(false);
        let outcome = processor
            .on_audio_delta(&[0x10; 160], AudioPayloadFormat::MuLaw)
            .unwrap();
        assert_eq!(outcome, DeltaOutcome::NoSink);
        assert!(sink.sent().is_empty());
        assert_eq!(registry.get("call-1").unwrap().total_delta_bytes, 160);
    }

    #[test]
    fn test_session_gone() {
        let (processor, registry, sink) = setup(true);
        registry.delete("call-1");
        let outcome = processor
            .on_audio_delta(&[0x10; 160], AudioPayloadFormat::MuLaw)
            .unwrap();
        assert_eq!(outcome, DeltaOutcome::SessionGone);
        assert!(sink.sent().is_empty());
    }

    #[test]
    fn test_unsupported_rate_is_an_error() {
        let (processor, _registry, _sink) = setup(true);
        let result =
            processor.on_audio_delta(&[1, 0, 2, 0], AudioPayloadFormat::Pcm16 { sample_rate: 44100 });
        assert!(matches!(result, Err(RealtimeError::Codec(_))));
    }

    #[test]
    fn test_interruption_stops_playback_once_and_drops_its_audio() {
        let (processor, _registry, sink) = setup(true);

        processor
            .process(audio_frame("audio/pcmu", &[0x10; 160], true))
            .unwrap();
        assert_eq!(sink.stop_count(), 1);
        assert!(sink.sent().is_empty());

        processor
            .process(audio_frame("audio/pcmu", &[0x20; 160], false))
            .unwrap();
        assert_eq!(sink.stop_count(), 1);
        let sent = sink.sent_bytes();
        assert_eq!(&sent[sent.len() - 160..], &[0x20; 160]);
    }

    #[test]
    fn test_turn_complete_resets_turn_counters_only() {
        let (processor, registry, _sink) = setup(true);
        processor
            .on_audio_delta(&[0x10; 160], AudioPayloadFormat::MuLaw)
            .unwrap();

        let frame: ServerMessage =
            serde_json::from_str(r#"{"serverContent":{"turnComplete":true}}"#).unwrap();
        processor.process(frame).unwrap();

        let session = registry.get("call-1").unwrap();
        assert_eq!(session.total_delta_bytes, 160);
        assert_eq!(session.logged_delta_bytes, 0);
        assert_eq!(session.segment_count, 0);
    }

    #[test]
    fn test_progress_log_resets_counters() {
        let (processor, registry, _sink) = setup(true);
        for _ in 0..25 {
            processor
                .on_audio_delta(&[0x10; 160], AudioPayloadFormat::MuLaw)
                .unwrap();
        }
        // 25 * 160 = 4000 bytes crosses the threshold on the last chunk
        let session = registry.get("call-1").unwrap();
        assert_eq!(session.logged_delta_bytes, 4000);
        assert_eq!(session.segment_count, 0);
    }

    #[test]
    fn test_process_continues_after_bad_part() {
        let (processor, registry, sink) = setup(true);
        let frame: ServerMessage = serde_json::from_value(serde_json::json!({
            "serverContent": {
                "modelTurn": {"parts": [
                    {"inlineData": {"mimeType": "audio/pcmu", "data": "!!!not base64"}},
                    {"inlineData": {"mimeType": "audio/pcmu", "data": BASE64_STANDARD.encode([0x10; 160])}}
                ]},
                "turnComplete": true
            }
        }))
        .unwrap();

        let result = processor.process(frame);
        assert!(matches!(result, Err(RealtimeError::SerializationError(_))));
        assert_eq!(sink.sent().len(), 1);
        assert_eq!(registry.get("call-1").unwrap().segment_count, 0);
    }
}
