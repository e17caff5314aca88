use agent_relay::error::{RelayError, Result};
use agent_relay::services::bridge::AgentBridge;
use agent_relay::services::relay_client::ResponderClient;
use agent_relay::services::transport::UnixTransport;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "agent-relay-responder")]
#[command(about = "Answers relayed requests with a local SSH agent")]
struct Cli {
    /// Relay endpoint URL.
    #[arg(long)]
    url: String,

    /// Agent socket path.
    #[arg(long, env = "SSH_AUTH_SOCK")]
    agent: Option<String>,

    #[arg(long, env = "AGENT_RELAY_TOKEN", default_value = "")]
    token: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,agent_relay=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let cli = Cli::parse();

    let socket = cli
        .agent
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| RelayError::Config("no --agent given and SSH_AUTH_SOCK is unset".to_string()))?;
    let mut bridge = AgentBridge::connect(&UnixTransport::new(&socket)).await?;
    let relay = ResponderClient::connect(&cli.url, &cli.token).await?;
    info!(agent = %socket, queue = %relay.url(), "responder connected");

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        on_signal.cancel();
    });
    bridge.serve(&relay, &cancel).await
}
