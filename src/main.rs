use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use voice_bridge::{BridgeConfig, CallBridge, RtpEndpoint, UdpRtpTransport};

/// Voice bridge - connects telephone calls to a realtime speech AI
#[derive(Parser, Debug)]
#[command(name = "voice-bridge")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Bridge one call to a remote RTP endpoint until Ctrl-C
    Run {
        /// Call identifier used in logs and the session registry
        #[arg(long = "channel-id", default_value = "cli-call")]
        channel_id: String,

        /// Where outbound PCMU is sent (host:port)
        #[arg(long = "remote", value_name = "HOST:PORT")]
        remote: String,
    },

    /// Load and validate the configuration, then exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let config = if let Some(config_path) = &cli.config {
        println!("Loading configuration from {}", config_path.display());
        BridgeConfig::from_file(config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        BridgeConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    let level = config.tracing_level().map_err(|e| anyhow!(e))?;
    tracing_subscriber::fmt().with_max_level(level).init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    match cli.command {
        Commands::CheckConfig => {
            info!(
                model = %config.gemini_model,
                voice = %config.gemini_voice,
                max_calls = config.max_concurrent_calls,
                "Configuration is valid"
            );
            println!("Configuration OK");
            Ok(())
        }
        Commands::Run { channel_id, remote } => run_call(config, &channel_id, &remote).await,
    }
}

async fn run_call(config: BridgeConfig, channel_id: &str, remote: &str) -> anyhow::Result<()> {
    let endpoint = RtpEndpoint::parse(remote)?;
    let transport = Arc::new(UdpRtpTransport::new(
        config.rtp_bind_host.clone(),
        config.rtp_port_start,
    ));
    let bridge = CallBridge::new(config.bridge_settings(), transport);

    info!(channel_id = %channel_id, remote = %endpoint, "Starting bridge");
    bridge.start_call(channel_id, endpoint).await?;
    info!(channel_id = %channel_id, "Call bridged, press Ctrl-C to hang up");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    if bridge.registry().has(channel_id) {
        let outcome = bridge.end_call(channel_id).await?;
        if !outcome.is_success() {
            warn!(channel_id = %channel_id, "Outbound audio was cut short");
        }
    } else {
        warn!(channel_id = %channel_id, "Call already ended");
    }
    bridge.shutdown().await;

    Ok(())
}
