use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use clap::{Parser, Subcommand};
use serde_json::Value;

use anyhow::anyhow;

use rtvi_client::{
    ActionRequestData, ClientConfig, HttpActionClient, RtviClient, RtviEvent, RtviMessage,
    Transport, WebSocketTransport,
};

/// RTVI client - connect to a realtime voice agent
#[derive(Parser, Debug)]
#[command(name = "rtvi-client")]
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
    /// Start a session and log agent events until Ctrl-C
    Connect,

    /// Run a single action over the action endpoint
    Action {
        /// Target service (e.g. "llm")
        service: String,

        /// Action name (e.g. "get_context")
        action: String,

        /// Action argument as NAME=JSON; repeatable
        #[arg(short = 'a', long = "arg", value_name = "NAME=JSON")]
        args: Vec<String>,
    },
}

/// Parse a `NAME=JSON` argument. Values that are not valid JSON are sent as
/// strings.
fn parse_argument(raw: &str) -> anyhow::Result<(String, Value)> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("Invalid argument '{}'. Expected NAME=JSON", raw))?;
    if name.is_empty() {
        anyhow::bail!("Invalid argument '{}'. Name must not be empty", raw);
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}

fn log_event(event: &RtviEvent) {
    match event {
        RtviEvent::TransportStateChanged(state) => info!(state = %state, "Transport state"),
        RtviEvent::BotReady(data) => info!(version = %data.version, "Bot ready"),
        RtviEvent::UserTranscript(t) if t.is_final => info!(text = %t.text, "User"),
        RtviEvent::BotTranscript(t) => info!(text = %t.text, "Bot"),
        RtviEvent::Error(message) => warn!(error = %message.error_text(), "Bot error"),
        RtviEvent::MessageError(message) => {
            warn!(message_type = %message.message_type(), "Message error")
        }
        other => tracing::debug!(event = %other.name(), "Event"),
    }
}

async fn run_connect(config: ClientConfig) -> anyhow::Result<()> {
    let client = RtviClient::new(
        config,
        Arc::new(|| Arc::new(WebSocketTransport::new(Default::default())) as Arc<dyn Transport>),
    )?;

    let mut events = client.subscribe();
    let logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event log lagging");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let bot = client.connect().await?;
    println!("Connected, bot protocol version {}", bot.version);

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow!("Failed to listen for Ctrl-C: {}", e))?;

    info!("Shutting down session");
    client.disconnect().await;
    logger.abort();
    Ok(())
}

async fn run_action(
    config: ClientConfig,
    service: String,
    action: String,
    args: Vec<String>,
) -> anyhow::Result<()> {
    let url = config
        .action_url()
        .ok_or_else(|| anyhow!("A base URL is required to run actions"))?;

    let mut request = ActionRequestData::new(service, action);
    for raw in &args {
        let (name, value) = parse_argument(raw)?;
        request = request.with_argument(name, value);
    }

    let client = HttpActionClient::new(url, &config.params);
    let outcome = client.send(&RtviMessage::action(&request)?).await?;

    for message in &outcome.messages {
        info!(message_type = %message.message_type(), "Streamed message");
    }
    let response = outcome.response?;
    println!("{}", serde_json::to_string_pretty(response.result())?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration from file or environment
    let config = if let Some(config_path) = cli.config {
        println!("Loading configuration from {}", config_path.display());
        ClientConfig::from_file(&config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        ClientConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    match cli.command {
        Commands::Connect => run_connect(config).await,
        Commands::Action {
            service,
            action,
            args,
        } => run_action(config, service, action, args).await,
    }
}
