use std::env;
use std::fmt::Display;
use std::str::FromStr;

use super::{ApiKey, BridgeConfig};
use crate::core::bridge::DEFAULT_MAX_CONCURRENT_CALLS;
use crate::core::realtime::gemini::{
    DEFAULT_GEMINI_MODEL, DEFAULT_GEMINI_VOICE, DEFAULT_INITIAL_MESSAGE, EndSensitivity,
    GEMINI_LIVE_URL, StartSensitivity,
};

/// Read a variable, treating unset and non-UTF-8 the same.
pub(super) fn env_var(key: &str) -> Option<String> {
    env::var(key).ok()
}

/// Parse a variable, falling back to `default` when it is unset or blank.
pub(super) fn env_parse<T>(key: &str, default: T) -> Result<T, Box<dyn std::error::Error>>
where
    T: FromStr,
    T::Err: Display,
{
    match env_var(key) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<T>()
            .map_err(|e| format!("Invalid value for {key}: {value} ({e})").into()),
        _ => Ok(default),
    }
}

/// Build a configuration from environment variables and defaults.
///
/// No validation happens here; YAML may still fill required values.
pub(super) fn load_from_env() -> Result<BridgeConfig, Box<dyn std::error::Error>> {
    // An empty INITIAL_MESSAGE disables the greeting, so unset and empty differ
    let initial_message = match env_var("INITIAL_MESSAGE") {
        Some(value) if value.trim().is_empty() => None,
        Some(value) => Some(value),
        None => Some(DEFAULT_INITIAL_MESSAGE.to_string()),
    };

    Ok(BridgeConfig {
        gemini_api_key: ApiKey::new(env_var("GEMINI_API_KEY").unwrap_or_default()),
        gemini_url: env_var("GEMINI_REALTIME_URL").unwrap_or_else(|| GEMINI_LIVE_URL.to_string()),
        gemini_model: env_var("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
        gemini_voice: env_var("GEMINI_VOICE").unwrap_or_else(|| DEFAULT_GEMINI_VOICE.to_string()),
        system_prompt: env_var("SYSTEM_PROMPT").unwrap_or_default(),
        initial_message,

        start_sensitivity: env_var("START_SENSITIVITY")
            .map(|s| StartSensitivity::from_str_or_default(&s))
            .unwrap_or_default(),
        end_sensitivity: env_var("END_SENSITIVITY")
            .map(|s| EndSensitivity::from_str_or_default(&s))
            .unwrap_or_default(),
        vad_prefix_padding_ms: env_parse("VAD_PREFIX_PADDING_MS", 200)?,
        vad_silence_duration_ms: env_parse("VAD_SILENCE_DURATION_MS", 600)?,

        silence_padding_ms: env_parse("SILENCE_PADDING_MS", 100)?,
        progress_log_bytes: env_parse("PROGRESS_LOG_BYTES", 4000)?,
        progress_log_segments: env_parse("PROGRESS_LOG_SEGMENTS", 100)?,

        max_retries: env_parse("MAX_RETRIES", 3)?,
        retry_delay_ms: env_parse("RETRY_DELAY_MS", 1000)?,
        handshake_timeout_ms: env_parse("HANDSHAKE_TIMEOUT_MS", 10_000)?,
        pump_interval_ms: env_parse("PUMP_INTERVAL_MS", 25)?,
        pump_batch_size: env_parse("PUMP_BATCH_SIZE", 5)?,

        drain_max_wait_ms: env_parse("DRAIN_MAX_WAIT_MS", 6000)?,
        drain_check_interval_ms: env_parse("DRAIN_CHECK_INTERVAL_MS", 10)?,

        rtp_bind_host: env_var("RTP_BIND_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
        rtp_port_start: env_parse("RTP_PORT_START", 12000)?,

        max_concurrent_calls: env_parse("MAX_CONCURRENT_CALLS", DEFAULT_MAX_CONCURRENT_CALLS)?,
        call_duration_limit_seconds: env_parse("CALL_DURATION_LIMIT_SECONDS", 0)?,

        log_level: env_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
    })
}
