//! Configuration module for the voice bridge
//!
//! This module handles bridge configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use voice_bridge::config::BridgeConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = BridgeConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = BridgeConfig::from_file(&config_path)?;
//!
//! println!("Bridging calls with model {}", config.gemini_model);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use zeroize::{Zeroize, ZeroizeOnDrop};

mod env;
mod merge;
mod validation;
mod yaml;

pub use yaml::YamlConfig;

use crate::core::bridge::BridgeSettings;
use crate::core::realtime::gemini::{
    EndSensitivity, LiveSessionConfig, StartSensitivity, VadSettings,
};
use crate::core::realtime::{ProcessorSettings, PumpSettings, ReconnectionConfig};

/// API credential, wiped from memory on drop and never printed.
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "ApiKey(<empty>)")
        } else {
            write!(f, "ApiKey(<redacted>)")
        }
    }
}

/// Bridge configuration
///
/// Contains everything needed to bridge calls to the realtime AI:
/// - AI credential, endpoint, model, voice and prompts
/// - Voice activity detection parameters
/// - Outbound audio shaping and progress logging
/// - Link retry, handshake and pump pacing
/// - Drain limits, RTP transport and call limits
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    // AI settings
    pub gemini_api_key: ApiKey,
    pub gemini_url: String,
    pub gemini_model: String,
    pub gemini_voice: String,
    pub system_prompt: String,
    /// Greeting sent once the AI session is up; `None` disables it
    pub initial_message: Option<String>,

    // VAD
    pub start_sensitivity: StartSensitivity,
    pub end_sensitivity: EndSensitivity,
    pub vad_prefix_padding_ms: u32,
    pub vad_silence_duration_ms: u32,

    // Outbound audio
    pub silence_padding_ms: u64,
    pub progress_log_bytes: u64,
    pub progress_log_segments: u64,

    // Link
    /// Reconnect attempts allowed per call
    /// Default: 3
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub handshake_timeout_ms: u64,
    pub pump_interval_ms: u64,
    pub pump_batch_size: usize,

    // Drain
    pub drain_max_wait_ms: u64,
    pub drain_check_interval_ms: u64,

    // RTP transport
    pub rtp_bind_host: String,
    /// First local port handed out; 0 lets the OS choose
    pub rtp_port_start: u16,

    // Calls
    pub max_concurrent_calls: usize,
    /// 0 disables the limit
    pub call_duration_limit_seconds: u64,

    pub log_level: String,
}

impl BridgeConfig {
    /// Load configuration from environment variables
    ///
    /// `.env` is loaded in `main.rs` before this runs, so its values are
    /// already visible as environment variables.
    ///
    /// # Errors
    /// Returns an error if a variable has an invalid format or validation fails.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge::merge_config(None)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Per-call client configuration.
    pub fn live_session_config(&self) -> LiveSessionConfig {
        LiveSessionConfig {
            api_key: self.gemini_api_key.clone(),
            url: self.gemini_url.clone(),
            model: self.gemini_model.clone(),
            voice: self.gemini_voice.clone(),
            system_prompt: Some(self.system_prompt.clone()),
            initial_message: self.initial_message.clone(),
            vad: VadSettings {
                start_sensitivity: self.start_sensitivity,
                end_sensitivity: self.end_sensitivity,
                prefix_padding_ms: self.vad_prefix_padding_ms,
                silence_duration_ms: self.vad_silence_duration_ms,
            },
            reconnection: ReconnectionConfig {
                max_attempts: self.max_retries,
                delay_ms: self.retry_delay_ms,
            },
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            pump: PumpSettings {
                interval: Duration::from_millis(self.pump_interval_ms),
                batch_size: self.pump_batch_size,
            },
            audio: ProcessorSettings {
                silence_padding_ms: self.silence_padding_ms,
                progress_log_bytes: self.progress_log_bytes,
                progress_log_segments: self.progress_log_segments,
            },
        }
    }

    /// Settings for a [`CallBridge`](crate::core::bridge::CallBridge).
    pub fn bridge_settings(&self) -> BridgeSettings {
        BridgeSettings {
            session: self.live_session_config(),
            max_concurrent_calls: self.max_concurrent_calls,
            call_duration_limit: self.call_duration_limit(),
            drain_max_wait: Duration::from_millis(self.drain_max_wait_ms),
            drain_check_interval: Duration::from_millis(self.drain_check_interval_ms),
            ..Default::default()
        }
    }

    pub fn call_duration_limit(&self) -> Option<Duration> {
        (self.call_duration_limit_seconds > 0)
            .then(|| Duration::from_secs(self.call_duration_limit_seconds))
    }

    /// Maximum tracing level, from `log_level`.
    pub fn tracing_level(&self) -> Result<tracing::Level, String> {
        tracing::Level::from_str(self.log_level.trim())
            .map_err(|_| format!("Invalid log level: {}", self.log_level))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::fs;
    use tempfile::TempDir;

    const ENV_KEYS: &[&str] = &[
        "GEMINI_API_KEY",
        "GEMINI_REALTIME_URL",
        "GEMINI_MODEL",
        "GEMINI_VOICE",
        "SYSTEM_PROMPT",
        "INITIAL_MESSAGE",
        "START_SENSITIVITY",
        "END_SENSITIVITY",
        "VAD_PREFIX_PADDING_MS",
        "VAD_SILENCE_DURATION_MS",
        "SILENCE_PADDING_MS",
        "PROGRESS_LOG_BYTES",
        "PROGRESS_LOG_SEGMENTS",
        "MAX_RETRIES",
        "RETRY_DELAY_MS",
        "HANDSHAKE_TIMEOUT_MS",
        "PUMP_INTERVAL_MS",
        "PUMP_BATCH_SIZE",
        "DRAIN_MAX_WAIT_MS",
        "DRAIN_CHECK_INTERVAL_MS",
        "RTP_BIND_HOST",
        "RTP_PORT_START",
        "MAX_CONCURRENT_CALLS",
        "CALL_DURATION_LIMIT_SECONDS",
        "LOG_LEVEL",
    ];

    // Helper to clean up environment variables
    fn cleanup_env_vars() {
        unsafe {
            for key in ENV_KEYS {
                env::remove_var(key);
            }
        }
    }

    fn set_required_env() {
        unsafe {
            env::set_var("GEMINI_API_KEY", "env-key");
            env::set_var("SYSTEM_PROMPT", "You answer the phone.");
        }
    }

    #[test]
    fn test_api_key_debug_is_redacted() {
        let key = ApiKey::new("super-secret");
        assert_eq!(format!("{key:?}"), "ApiKey(<redacted>)");
        assert_eq!(key.expose(), "super-secret");
        assert!(ApiKey::new("  ").is_empty());
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        cleanup_env_vars();
        set_required_env();

        let config = BridgeConfig::from_env().unwrap();

        assert_eq!(config.gemini_api_key.expose(), "env-key");
        assert_eq!(config.gemini_model, "models/gemini-2.0-flash-exp");
        assert_eq!(config.gemini_voice, "Puck");
        assert_eq!(config.initial_message.as_deref(), Some("Hi"));
        assert_eq!(config.start_sensitivity, StartSensitivity::StartSensitivityHigh);
        assert_eq!(config.vad_prefix_padding_ms, 200);
        assert_eq!(config.vad_silence_duration_ms, 600);
        assert_eq!(config.silence_padding_ms, 100);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay_ms, 1000);
        assert_eq!(config.pump_interval_ms, 25);
        assert_eq!(config.pump_batch_size, 5);
        assert_eq!(config.drain_max_wait_ms, 6000);
        assert_eq!(config.rtp_port_start, 12000);
        assert_eq!(config.max_concurrent_calls, 10);
        assert_eq!(config.call_duration_limit(), None);
        assert_eq!(config.tracing_level().unwrap(), tracing::Level::INFO);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        cleanup_env_vars();
        set_required_env();
        unsafe {
            env::set_var("GEMINI_VOICE", "Kore");
            env::set_var("INITIAL_MESSAGE", "");
            env::set_var("END_SENSITIVITY", "low");
            env::set_var("MAX_RETRIES", "5");
            env::set_var("CALL_DURATION_LIMIT_SECONDS", "300");
            env::set_var("LOG_LEVEL", "debug");
        }

        let config = BridgeConfig::from_env().unwrap();

        assert_eq!(config.gemini_voice, "Kore");
        assert_eq!(config.initial_message, None);
        assert_eq!(config.end_sensitivity, EndSensitivity::EndSensitivityLow);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.call_duration_limit(), Some(Duration::from_secs(300)));
        assert_eq!(config.tracing_level().unwrap(), tracing::Level::DEBUG);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_missing_api_key() {
        cleanup_env_vars();
        unsafe {
            env::set_var("SYSTEM_PROMPT", "You answer the phone.");
        }

        let result = BridgeConfig::from_env();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("GEMINI_API_KEY"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_empty_system_prompt() {
        cleanup_env_vars();
        unsafe {
            env::set_var("GEMINI_API_KEY", "env-key");
            env::set_var("SYSTEM_PROMPT", "   ");
        }

        let result = BridgeConfig::from_env();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("SYSTEM_PROMPT"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_number() {
        cleanup_env_vars();
        set_required_env();
        unsafe {
            env::set_var("MAX_RETRIES", "-1");
        }

        let result = BridgeConfig::from_env();
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Invalid value for MAX_RETRIES")
        );

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_zero_pump_batch() {
        cleanup_env_vars();
        set_required_env();
        unsafe {
            env::set_var("PUMP_BATCH_SIZE", "0");
        }

        let result = BridgeConfig::from_env();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("PUMP_BATCH_SIZE"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_only() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let yaml_content = r#"
ai:
  api_key: "yaml-key"
  model: "gemini-live-2.5-flash"
  system_prompt: "You are a helpful receptionist."
  initial_message: "Hello there"

vad:
  start_sensitivity: "START_SENSITIVITY_LOW"
  silence_duration_ms: 800

link:
  max_retries: 2
  handshake_timeout_ms: 5000

rtp:
  bind_host: "127.0.0.1"
  port_start: 20000

calls:
  max_concurrent: 4
  duration_limit_seconds: 120

log_level: "warn"
"#;

        fs::write(&config_path, yaml_content).unwrap();

        let config = BridgeConfig::from_file(&config_path).unwrap();

        assert_eq!(config.gemini_api_key.expose(), "yaml-key");
        assert_eq!(config.gemini_model, "gemini-live-2.5-flash");
        assert_eq!(config.system_prompt, "You are a helpful receptionist.");
        assert_eq!(config.initial_message.as_deref(), Some("Hello there"));
        assert_eq!(config.start_sensitivity, StartSensitivity::StartSensitivityLow);
        assert_eq!(config.vad_silence_duration_ms, 800);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.handshake_timeout_ms, 5000);
        assert_eq!(config.rtp_bind_host, "127.0.0.1");
        assert_eq!(config.rtp_port_start, 20000);
        assert_eq!(config.max_concurrent_calls, 4);
        assert_eq!(config.call_duration_limit_seconds, 120);
        assert_eq!(config.tracing_level().unwrap(), tracing::Level::WARN);

        let session = config.live_session_config();
        assert_eq!(session.model_path(), "models/gemini-live-2.5-flash");
        assert_eq!(session.reconnection.max_attempts, 2);
        assert_eq!(session.handshake_timeout, Duration::from_secs(5));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_overrides_env() {
        cleanup_env_vars();
        set_required_env();
        unsafe {
            env::set_var("GEMINI_VOICE", "Charon");
            env::set_var("SILENCE_PADDING_MS", "40");
        }

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(
            &config_path,
            r#"
ai:
  voice: "Aoede"
"#,
        )
        .unwrap();

        let config = BridgeConfig::from_file(&config_path).unwrap();

        // YAML overrides ENV
        assert_eq!(config.gemini_voice, "Aoede");
        // ENV value
        assert_eq!(config.silence_padding_ms, 40);
        assert_eq!(config.gemini_api_key.expose(), "env-key");

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_missing_file() {
        cleanup_env_vars();

        let config_path = PathBuf::from("/nonexistent/config.yaml");
        let result = BridgeConfig::from_file(&config_path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_invalid_yaml() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid.yaml");
        fs::write(&config_path, "invalid: yaml: [content").unwrap();

        let result = BridgeConfig::from_file(&config_path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to parse YAML")
        );

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_bridge_settings_mapping() {
        cleanup_env_vars();
        set_required_env();
        unsafe {
            env::set_var("DRAIN_MAX_WAIT_MS", "3000");
            env::set_var("MAX_CONCURRENT_CALLS", "2");
        }

        let settings = BridgeConfig::from_env().unwrap().bridge_settings();
        assert_eq!(settings.drain_max_wait, Duration::from_secs(3));
        assert_eq!(settings.drain_check_interval, Duration::from_millis(10));
        assert_eq!(settings.max_concurrent_calls, 2);
        assert_eq!(
            settings.session.system_prompt.as_deref(),
            Some("You answer the phone.")
        );

        cleanup_env_vars();
    }
}
