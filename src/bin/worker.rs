//! The continuous worker binary: claims and executes tasks until stopped.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use agentflow::config::Config;
use agentflow::error::exit_codes;
use agentflow::worker::safety::SafetyPolicy;
use agentflow::worker::{Worker, WorkerSettings};
use agentflow::Result;

#[derive(Parser)]
#[command(name = "agentflow-worker", about = "AgentFlow task worker", version)]
struct Cli {
    /// Configuration file (YAML)
    #[arg(long)]
    config: Option<String>,

    /// Master URL (overrides config)
    #[arg(long)]
    master: Option<String>,

    /// Database path for local mode (overrides config)
    #[arg(long)]
    db: Option<String>,

    /// Worker group (auto-detected when omitted)
    #[arg(long)]
    group: Option<String>,

    /// Worker id (generated when omitted)
    #[arg(long = "worker-id")]
    worker_id: Option<String>,
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
    if let Some(master) = cli.master {
        config.worker.master_url = master;
    }
    if let Some(db_path) = cli.db {
        config.worker.db_path = db_path;
    }
    if let Some(group) = cli.group {
        config.worker.group_name = Some(group);
    }
    if let Some(id) = cli.worker_id {
        config.worker.id = Some(id);
    }
    config.validate()?;

    let settings = WorkerSettings {
        id: config.worker.id.clone(),
        master_url: config.worker.master_url.clone(),
        // Remote mode wins when both a master URL and a db path exist but
        // the db file's directory is absent; local mode needs the file.
        db_path: local_db_path(&config),
        group: config.worker.group_name.clone(),
        claude: config.claude.clone(),
        safety: SafetyPolicy::from_env(),
    };

    let worker = Worker::new(settings).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    worker.run(shutdown_rx).await
}

/// Local mode applies when the worker's database file already exists;
/// otherwise the worker drives the master API.
fn local_db_path(config: &Config) -> Option<PathBuf> {
    let path = PathBuf::from(&config.worker.db_path);
    path.exists().then_some(path)
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
