use agent_relay::config::Config;
use agent_relay::daemon;
use agent_relay::error::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "agent-relayd")]
#[command(about = "HTTP relay between SSH agent requesters and responders")]
struct Cli {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = 8080)]
    port: u16,

    #[arg(long)]
    config: Option<String>,

    #[arg(long, env = "AGENT_RELAY_TOKEN", default_value = "")]
    token: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,agent_relay=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let cli = Cli::parse();

    let config = match cli.config.as_deref() {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    daemon::run_with_shutdown(&cli.host, cli.port, &config, &cli.token, shutdown).await
}
