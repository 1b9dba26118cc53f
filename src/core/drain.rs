//! Waiting for queued AI audio to finish playing before teardown.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::core::codec::TELEPHONY_SAMPLE_RATE;
use crate::core::session::SessionRegistry;

/// Default upper bound on a drain.
pub const DEFAULT_DRAIN_MAX_WAIT: Duration = Duration::from_millis(6000);

/// Default poll interval while the sink still holds audio.
pub const DEFAULT_DRAIN_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// Estimate used when no audio was recorded.
const EMPTY_ESTIMATE: Duration = Duration::from_millis(1000);

/// Slack added on top of the raw audio duration.
const ESTIMATE_MARGIN_MS: u64 = 500;

/// Minimum spacing between "still draining" logs.
const PROGRESS_LOG_INTERVAL: Duration = Duration::from_millis(50);

/// How a drain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Sink emptied and playout finished or the estimate elapsed
    Completed,
    /// Sink still held audio at the deadline
    TimedOut,
    /// Nothing to drain: no session or no sink
    Skipped,
}

impl DrainOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, DrainOutcome::TimedOut)
    }
}

/// Playout estimate for `total_delta_bytes` of 8 kHz µ-law, capped at `max_wait`.
pub fn estimate_playout(total_delta_bytes: u64, max_wait: Duration) -> Duration {
    let estimate = if total_delta_bytes == 0 {
        EMPTY_ESTIMATE
    } else {
        let audio_ms = (total_delta_bytes * 1000).div_ceil(TELEPHONY_SAMPLE_RATE as u64);
        Duration::from_millis(audio_ms + ESTIMATE_MARGIN_MS)
    };
    estimate.min(max_wait)
}

/// Blocks a caller until a call's outbound audio has drained.
#[derive(Debug, Clone)]
pub struct DrainSynchronizer {
    registry: SessionRegistry,
}

impl DrainSynchronizer {
    pub fn new(registry: SessionRegistry) -> Self {
        Self { registry }
    }

    /// Wait until the call's sink is empty and its playout has finished.
    ///
    /// Never waits longer than `max_wait` for the sink to empty, plus at most
    /// the playout estimate (itself capped at `max_wait`) for the finish signal.
    pub async fn wait_for_buffer_empty(
        &self,
        channel_id: &str,
        max_wait: Duration,
        check_interval: Duration,
    ) -> DrainOutcome {
        let Some(session) = self.registry.get(channel_id) else {
            debug!(channel_id = %channel_id, "No session, nothing to drain");
            return DrainOutcome::Skipped;
        };
        let Some(sink) = session.outbound_sink else {
            debug!(channel_id = %channel_id, "No outbound sink, nothing to drain");
            return DrainOutcome::Skipped;
        };

        let estimate = estimate_playout(session.total_delta_bytes, max_wait);
        let finished = sink.audio_finished();
        // Registered now so a finish during polling is not missed
        let notified = finished.notified();
        tokio::pin!(notified);

        let started = Instant::now();
        let mut last_log = started;
        while sink.has_pending() && started.elapsed() < max_wait {
            if last_log.elapsed() >= PROGRESS_LOG_INTERVAL {
                debug!(
                    channel_id = %channel_id,
                    buffer_bytes = sink.pending_buffer_bytes(),
                    queue_packets = sink.pending_queue_packets(),
                    "Waiting for outbound audio to drain"
                );
                last_log = Instant::now();
            }
            tokio::time::sleep(check_interval).await;
        }

        if sink.has_pending() {
            warn!(
                channel_id = %channel_id,
                buffer_bytes = sink.pending_buffer_bytes(),
                queue_packets = sink.pending_queue_packets(),
                "Outbound audio still pending after {:?}",
                max_wait
            );
            return DrainOutcome::TimedOut;
        }

        tokio::select! {
            _ = &mut notified => {
                debug!(channel_id = %channel_id, "Playout finished signal received");
            }
            _ = tokio::time::sleep(estimate) => {
                debug!(channel_id = %channel_id, "Playout estimate of {:?} elapsed", estimate);
            }
        }

        info!(
            channel_id = %channel_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Outbound audio drained"
        );
        DrainOutcome::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::CallSession;
    use crate::core::transport::{MemorySink, OutboundSink, RtpEndpoint};
    use std::sync::Arc;

    fn registry_with_sink(total_delta_bytes: u64) -> (SessionRegistry, Arc<MemorySink>) {
        let registry = SessionRegistry::new();
        let sink = Arc::new(MemorySink::new(RtpEndpoint::default()));
        let mut session = CallSession::new("call-1", RtpEndpoint::default());
        session.outbound_sink = Some(sink.clone() as Arc<dyn OutboundSink>);
        session.total_delta_bytes = total_delta_bytes;
        registry.set("call-1", session);
        (registry, sink)
    }

    #[test]
    fn test_estimate_playout() {
        let max = Duration::from_millis(6000);
        assert_eq!(estimate_playout(16000, max), Duration::from_millis(2500));
        assert_eq!(estimate_playout(0, max), Duration::from_millis(1000));
        assert_eq!(estimate_playout(1, max), Duration::from_millis(501));
        assert_eq!(estimate_playout(80_000, max), max);
    }

    #[test]
    fn test_outcome_success() {
        assert!(DrainOutcome::Completed.is_success());
        assert!(DrainOutcome::Skipped.is_success());
        assert!(!DrainOutcome::TimedOut.is_success());
    }

    #[tokio::test]
    async fn test_no_sink_succeeds_immediately() {
        let registry = SessionRegistry::new();
        registry.set("call-1", CallSession::new("call-1", RtpEndpoint::default()));
        let drain = DrainSynchronizer::new(registry);

        let started = Instant::now();
        let outcome = drain
            .wait_for_buffer_empty("call-1", DEFAULT_DRAIN_MAX_WAIT, DEFAULT_DRAIN_CHECK_INTERVAL)
            .await;
        assert_eq!(outcome, DrainOutcome::Skipped);
        assert!(started.elapsed() < Duration::from_millis(50));

        let outcome = drain
            .wait_for_buffer_empty("missing", DEFAULT_DRAIN_MAX_WAIT, DEFAULT_DRAIN_CHECK_INTERVAL)
            .await;
        assert_eq!(outcome, DrainOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_finish_signal_ends_wait() {
        let (registry, sink) = registry_with_sink(16000);
        sink.set_pending(320, 2);
        let drain = DrainSynchronizer::new(registry);

        let finisher = sink.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            finisher.finish_playout();
        });

        let started = Instant::now();
        let outcome = drain
            .wait_for_buffer_empty("call-1", DEFAULT_DRAIN_MAX_WAIT, DEFAULT_DRAIN_CHECK_INTERVAL)
            .await;
        assert_eq!(outcome, DrainOutcome::Completed);
        // Well short of the 2500ms estimate
        assert!(started.elapsed() < Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_estimate_bounds_wait_without_signal() {
        let (registry, _sink) = registry_with_sink(0);
        let drain = DrainSynchronizer::new(registry);

        let started = Instant::now();
        let outcome = drain
            .wait_for_buffer_empty(
                "call-1",
                Duration::from_millis(100),
                DEFAULT_DRAIN_CHECK_INTERVAL,
            )
            .await;
        assert_eq!(outcome, DrainOutcome::Completed);
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(started.elapsed() < Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_times_out_when_sink_never_empties() {
        let (registry, sink) = registry_with_sink(8000);
        sink.set_pending(1600, 10);
        let drain = DrainSynchronizer::new(registry);

        let started = Instant::now();
        let outcome = drain
            .wait_for_buffer_empty(
                "call-1",
                Duration::from_millis(80),
                Duration::from_millis(10),
            )
            .await;
        assert_eq!(outcome, DrainOutcome::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(80));
        assert!(started.elapsed() < Duration::from_millis(500));
    }
}
