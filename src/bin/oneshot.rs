//! The one-shot worker binary: claim one task, execute it, print the
//! result, exit.
//!
//! Exits 0 with "No tasks to execute" when the pending list is empty or the
//! claim is lost. A deadline (default five minutes) cancels execution; the
//! abandoned claim expires on its own.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use agentflow::config::Config;
use agentflow::error::exit_codes;
use agentflow::worker::safety::SafetyPolicy;
use agentflow::worker::{Worker, WorkerSettings};
use agentflow::{AgentFlowError, Result};

#[derive(Parser)]
#[command(name = "agentflow-oneshot", about = "AgentFlow one-shot worker", version)]
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

    /// Maximum time to wait for the task, e.g. "5m" or "90s"
    #[arg(long, default_value = "5m", value_parser = parse_duration)]
    timeout: Duration,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    match run(Cli::parse()).await {
        Ok(Some(result)) => {
            println!("Task completed successfully:");
            println!("{}", result);
            ExitCode::from(exit_codes::SUCCESS as u8)
        }
        Ok(None) => {
            println!("No tasks to execute");
            ExitCode::from(exit_codes::SUCCESS as u8)
        }
        Err(e) => {
            eprintln!("One-shot execution failed: {}", e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

async fn run(cli: Cli) -> Result<Option<String>> {
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

    let db_path = PathBuf::from(&config.worker.db_path);
    let settings = WorkerSettings {
        id: config.worker.id.clone(),
        master_url: config.worker.master_url.clone(),
        db_path: db_path.exists().then_some(db_path),
        group: config.worker.group_name.clone(),
        claude: config.claude.clone(),
        safety: SafetyPolicy::from_env(),
    };

    let worker = Worker::new(settings).await?;

    match tokio::time::timeout(cli.timeout, worker.run_one_shot()).await {
        Ok(result) => result,
        Err(_) => {
            // Cancellation is not an error state for the claim itself: the
            // lease expires and another worker takes over.
            tracing::warn!("one-shot deadline reached, abandoning claim");
            Err(AgentFlowError::Execution(format!(
                "timed out after {:?}",
                cli.timeout
            )))
        }
    }
}

fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    let (value, unit) = s.split_at(s.len() - 1);
    match unit {
        "s" => value.parse().map(Duration::from_secs).map_err(|e| e.to_string()),
        "m" => value
            .parse::<u64>()
            .map(|m| Duration::from_secs(m * 60))
            .map_err(|e| e.to_string()),
        "h" => value
            .parse::<u64>()
            .map(|h| Duration::from_secs(h * 3600))
            .map_err(|e| e.to_string()),
        _ => s
            .parse()
            .map(Duration::from_secs)
            .map_err(|_| format!("invalid duration: {s} (use 90s, 5m, 1h)")),
    }
}
