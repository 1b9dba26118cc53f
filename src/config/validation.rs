use super::BridgeConfig;

/// Fatal preconditions checked before any call is bridged.
pub(super) fn validate(config: &BridgeConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.gemini_api_key.is_empty() {
        return Err("GEMINI_API_KEY is required (or ai.api_key in YAML)".into());
    }
    if config.system_prompt.trim().is_empty() {
        return Err("SYSTEM_PROMPT must not be empty (or set ai.system_prompt in YAML)".into());
    }
    url::Url::parse(&config.gemini_url)
        .map_err(|e| format!("Invalid GEMINI_REALTIME_URL {}: {e}", config.gemini_url))?;

    if config.pump_batch_size == 0 {
        return Err("PUMP_BATCH_SIZE must be greater than 0".into());
    }
    if config.pump_interval_ms == 0 {
        return Err("PUMP_INTERVAL_MS must be greater than 0".into());
    }
    if config.drain_check_interval_ms == 0 {
        return Err("DRAIN_CHECK_INTERVAL_MS must be greater than 0".into());
    }
    if config.max_concurrent_calls == 0 {
        return Err("MAX_CONCURRENT_CALLS must be greater than 0".into());
    }

    config.tracing_level()?;
    Ok(())
}
