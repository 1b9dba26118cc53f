//! Mock provider servers for integration tests
//!
//! - Gemini Live (WebSocket, JSON frames)

// Allow dead code in test infrastructure - not every test binary uses every helper
#![allow(dead_code)]

pub mod gemini_live_mock;

pub use gemini_live_mock::{GeminiLiveMock, MockBehavior, audio_frame};

use std::time::{Duration, Instant};

/// Poll `condition` every 10ms until it holds or `timeout` elapses.
pub async fn wait_until<F>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let started = Instant::now();
    while started.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
