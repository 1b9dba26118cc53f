use super::yaml::YamlConfig;
use super::{ApiKey, BridgeConfig, env};
use crate::core::realtime::gemini::{EndSensitivity, StartSensitivity};

/// Environment variables (with defaults) form the base; YAML values win.
pub(super) fn merge_config(
    yaml: Option<YamlConfig>,
) -> Result<BridgeConfig, Box<dyn std::error::Error>> {
    let mut config = env::load_from_env()?;
    let Some(yaml) = yaml else {
        return Ok(config);
    };

    if let Some(ai) = yaml.ai {
        if let Some(api_key) = ai.api_key {
            config.gemini_api_key = ApiKey::new(api_key);
        }
        if let Some(url) = ai.url {
            config.gemini_url = url;
        }
        if let Some(model) = ai.model {
            config.gemini_model = model;
        }
        if let Some(voice) = ai.voice {
            config.gemini_voice = voice;
        }
        if let Some(prompt) = ai.system_prompt {
            config.system_prompt = prompt;
        }
        if let Some(message) = ai.initial_message {
            config.initial_message = (!message.trim().is_empty()).then_some(message);
        }
    }

    if let Some(vad) = yaml.vad {
        if let Some(start) = vad.start_sensitivity {
            config.start_sensitivity = StartSensitivity::from_str_or_default(&start);
        }
        if let Some(end) = vad.end_sensitivity {
            config.end_sensitivity = EndSensitivity::from_str_or_default(&end);
        }
        if let Some(ms) = vad.prefix_padding_ms {
            config.vad_prefix_padding_ms = ms;
        }
        if let Some(ms) = vad.silence_duration_ms {
            config.vad_silence_duration_ms = ms;
        }
    }

    if let Some(audio) = yaml.audio {
        if let Some(ms) = audio.silence_padding_ms {
            config.silence_padding_ms = ms;
        }
        if let Some(bytes) = audio.progress_log_bytes {
            config.progress_log_bytes = bytes;
        }
        if let Some(segments) = audio.progress_log_segments {
            config.progress_log_segments = segments;
        }
    }

    if let Some(link) = yaml.link {
        if let Some(retries) = link.max_retries {
            config.max_retries = retries;
        }
        if let Some(ms) = link.retry_delay_ms {
            config.retry_delay_ms = ms;
        }
        if let Some(ms) = link.handshake_timeout_ms {
            config.handshake_timeout_ms = ms;
        }
        if let Some(ms) = link.pump_interval_ms {
            config.pump_interval_ms = ms;
        }
        if let Some(size) = link.pump_batch_size {
            config.pump_batch_size = size;
        }
    }

    if let Some(drain) = yaml.drain {
        if let Some(ms) = drain.max_wait_ms {
            config.drain_max_wait_ms = ms;
        }
        if let Some(ms) = drain.check_interval_ms {
            config.drain_check_interval_ms = ms;
        }
    }

    if let Some(rtp) = yaml.rtp {
        if let Some(host) = rtp.bind_host {
            config.rtp_bind_host = host;
        }
        if let Some(port) = rtp.port_start {
            config.rtp_port_start = port;
        }
    }

    if let Some(calls) = yaml.calls {
        if let Some(max) = calls.max_concurrent {
            config.max_concurrent_calls = max;
        }
        if let Some(seconds) = calls.duration_limit_seconds {
            config.call_duration_limit_seconds = seconds;
        }
    }

    if let Some(level) = yaml.log_level {
        config.log_level = level;
    }

    Ok(config)
}
