use serde::Deserialize;
use std::path::PathBuf;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present here
/// override the matching environment variables.
///
/// # Example YAML structure
/// ```yaml
/// ai:
///   api_key: "your-gemini-key"
///   model: "models/gemini-2.0-flash-exp"
///   voice: "Puck"
///   system_prompt: "You are the front desk of a dental practice."
///   initial_message: "Hi"
///
/// vad:
///   start_sensitivity: "START_SENSITIVITY_HIGH"
///   end_sensitivity: "END_SENSITIVITY_HIGH"
///   prefix_padding_ms: 200
///   silence_duration_ms: 600
///
/// audio:
///   silence_padding_ms: 100
///   progress_log_bytes: 4000
///   progress_log_segments: 100
///
/// link:
///   max_retries: 3
///   retry_delay_ms: 1000
///   handshake_timeout_ms: 10000
///   pump_interval_ms: 25
///   pump_batch_size: 5
///
/// drain:
///   max_wait_ms: 6000
///   check_interval_ms: 10
///
/// rtp:
///   bind_host: "0.0.0.0"
///   port_start: 12000
///
/// calls:
///   max_concurrent: 10
///   duration_limit_seconds: 0
///
/// log_level: "info"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub ai: Option<AiYaml>,
    pub vad: Option<VadYaml>,
    pub audio: Option<AudioYaml>,
    pub link: Option<LinkYaml>,
    pub drain: Option<DrainYaml>,
    pub rtp: Option<RtpYaml>,
    pub calls: Option<CallsYaml>,
    pub log_level: Option<String>,
}

/// Realtime AI settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AiYaml {
    pub api_key: Option<String>,
    pub url: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub system_prompt: Option<String>,
    /// Empty string disables the greeting
    pub initial_message: Option<String>,
}

/// Voice activity detection from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct VadYaml {
    /// `START_SENSITIVITY_HIGH` / `START_SENSITIVITY_LOW` (or `high` / `low`)
    pub start_sensitivity: Option<String>,
    /// `END_SENSITIVITY_HIGH` / `END_SENSITIVITY_LOW` (or `high` / `low`)
    pub end_sensitivity: Option<String>,
    pub prefix_padding_ms: Option<u32>,
    pub silence_duration_ms: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AudioYaml {
    pub silence_padding_ms: Option<u64>,
    pub progress_log_bytes: Option<u64>,
    pub progress_log_segments: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LinkYaml {
    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub handshake_timeout_ms: Option<u64>,
    pub pump_interval_ms: Option<u64>,
    pub pump_batch_size: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct DrainYaml {
    pub max_wait_ms: Option<u64>,
    pub check_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RtpYaml {
    pub bind_host: Option<String>,
    pub port_start: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CallsYaml {
    pub max_concurrent: Option<usize>,
    /// 0 disables the limit
    pub duration_limit_seconds: Option<u64>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file cannot be read
    /// - The YAML is malformed
    /// - Fields have invalid types
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}
