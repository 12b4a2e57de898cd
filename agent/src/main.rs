use anyhow::Result;
use clap::{CommandFactory, Parser};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod endpoint;
mod forwarder;
mod keepalive;
mod manager;
mod session;
mod tunnel;

use config::{AgentConfig, RawConfig};
use forwarder::Forwarder;
use manager::ConnectionManager;
use tunnel::RelayTunnel;

const EXAMPLES: &str = "\
Example:
  relay-agent -s https://relay.example.com -a app_F63GRnbJR6xINLyK -t $RELAY_TOKEN -p 8082

Every option can also be set in relay-agent.yml (server, app, token, port).";

#[derive(Parser)]
#[command(name = "relay-agent")]
#[command(version)]
#[command(about = "Expose a private HTTP service through a plugin relay", long_about = None)]
#[command(after_help = EXAMPLES)]
struct Cli {
    /// Relay server address (e.g. https://relay.example.com)
    #[arg(short, long, env = "RELAY_AGENT_SERVER")]
    server: Option<String>,

    /// Application ID
    #[arg(short, long, env = "RELAY_AGENT_APP")]
    app: Option<String>,

    /// Relay authorization token
    #[arg(short, long, env = "RELAY_AGENT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Local target service port
    #[arg(short, long, env = "RELAY_AGENT_PORT")]
    port: Option<u16>,

    /// Configuration file (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn raw_config(&self) -> RawConfig {
        RawConfig {
            server: self.server.clone(),
            app: self.app.clone(),
            token: self.token.clone(),
            port: self.port,
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("relay_agent={}", level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}\n", e);
            Cli::command().print_help()?;
            std::process::exit(2);
        }
    };

    let forwarder = Forwarder::new(config.target_base()?, config.request_timeout)?;
    let tunnel = RelayTunnel::new(&config, forwarder)?;

    println!("\n╔══════════════════════════════════════════════════════════════╗");
    println!("║  Relay Agent                                                 ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!("  Access URL: {}", config.access_url());
    println!("  Local:      http://127.0.0.1:{}", config.port);
    println!("\nPress Ctrl+C to stop the agent\n");

    info!("Dialing {}", tunnel.dial_url());
    let mut manager = ConnectionManager::new(tunnel, config.retry);

    tokio::select! {
        _ = manager.run() => {}
        _ = tokio::signal::ctrl_c() => {}
    }

    info!(
        state = ?manager.state(),
        sessions = manager.sessions(),
        failed_dials = manager.failed_dials(),
        dial_streak = manager.dial_streak(),
        "Shutting down..."
    );

    Ok(())
}

/// Merge flags with the config file (explicit or discovered) and validate.
fn load_config(cli: &Cli) -> Result<AgentConfig> {
    let file = match cli.config.clone().or_else(RawConfig::find_config) {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            RawConfig::load(&path)?
        }
        None => RawConfig::default(),
    };

    Ok(cli.raw_config().or(file).resolve()?)
}
