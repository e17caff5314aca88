use std::path::PathBuf;
use std::sync::Arc;

use agent_relay::error::{RelayError, Result};
use agent_relay::services::bridge::{benchmark, serve_connection};
use agent_relay::services::relay_client::RequesterClient;
use clap::Parser;
use tokio::net::UnixListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "agent-relay-requester")]
#[command(about = "Exposes a local SSH agent socket backed by the relay")]
struct Cli {
    /// Relay endpoint URL.
    #[arg(long)]
    url: String,

    /// Socket to listen on; defaults to a fresh temporary directory.
    #[arg(long)]
    bind: Option<PathBuf>,

    /// Run this many ping round trips and exit.
    #[arg(long)]
    benchmark: Option<u32>,

    #[arg(long, env = "AGENT_RELAY_TOKEN", default_value = "")]
    token: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,agent_relay=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let cli = Cli::parse();

    if let Some(iterations) = cli.benchmark {
        let relay = RequesterClient::connect(&cli.url, &cli.token).await?;
        let result = benchmark(&relay, iterations).await;
        let disconnected = relay.disconnect().await;
        println!("{}", result?);
        return disconnected;
    }

    let bind = match cli.bind {
        Some(path) => path,
        None => {
            let dir = std::env::temp_dir().join(format!("agent-relay-{}", std::process::id()));
            std::fs::create_dir_all(&dir)?;
            dir.join("agent.sock")
        }
    };
    let _ = std::fs::remove_file(&bind);
    let listener = UnixListener::bind(&bind)
        .map_err(|e| RelayError::Io(format!("{}: {e}", bind.display())))?;
    println!("SSH_AUTH_SOCK={}", bind.display());

    let url = Arc::new(cli.url);
    let token = Arc::new(cli.token);
    loop {
        let (mut stream, _) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = tokio::signal::ctrl_c() => break,
        };
        let url = url.clone();
        let token = token.clone();
        tokio::spawn(async move {
            let relay = match RequesterClient::connect(&url, &token).await {
                Ok(relay) => relay,
                Err(err) => {
                    warn!(error = %err, "relay connect failed");
                    return;
                }
            };
            info!(client = %relay.id(), "agent connection opened");
            if let Err(err) = serve_connection(&mut stream, &relay).await {
                warn!(client = %relay.id(), error = %err, "agent connection failed");
            }
            if let Err(err) = relay.disconnect().await {
                warn!(client = %relay.id(), error = %err, "relay disconnect failed");
            }
        });
    }

    let _ = std::fs::remove_file(&bind);
    Ok(())
}
