//! The master binary: serves the task-dispatch API.

use std::net::SocketAddr;
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use agentflow::config::Config;
use agentflow::error::exit_codes;
use agentflow::master::server::{self, AppState};
use agentflow::{db, Result};

#[derive(Parser)]
#[command(name = "agentflow-master", about = "AgentFlow task-dispatch master", version)]
struct Cli {
    /// Configuration file (YAML)
    #[arg(long)]
    config: Option<String>,

    /// Listen address (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Listen port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Database path (overrides config)
    #[arg(long)]
    db: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::from(exit_codes::SUCCESS as u8),
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.master.host = host;
    }
    if let Some(port) = cli.port {
        config.master.port = port;
    }
    if let Some(db_path) = cli.db {
        config.master.db_path = db_path;
    }
    config.validate()?;

    let pool = db::connection::open(Path::new(&config.master.db_path)).await?;

    let addr: SocketAddr = format!("{}:{}", config.master.host, config.master.port)
        .parse()
        .map_err(|e| {
            agentflow::AgentFlowError::InvalidConfig(format!("invalid listen address: {e}"))
        })?;

    let state = AppState::new(pool, config);
    let supervisor = state.supervisor.clone();

    tokio::select! {
        result = server::serve(state, addr) => result?,
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    supervisor.shutdown();
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("sigterm handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("sigint handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
