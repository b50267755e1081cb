//! Worker runtime: register, then claim → execute → report until stopped.
//!
//! A worker runs in one of two modes. Local workers share the master's
//! database file and talk to the store directly; remote workers drive the
//! master's HTTP API. Either way a worker holds at most one task at a time
//! and is not internally concurrent: the loop body runs to completion
//! before the next poll tick is considered.

pub mod executor;
pub mod safety;
mod subtasks;

use std::path::PathBuf;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::watch;

use agentflow_types::{
    detect_capabilities, generate_worker_id, LogLevel, RegisterWorker, Task, WorkerType,
};

use crate::config::ClaudeConfig;
use crate::db;
use crate::error::{AgentFlowError, Result};
use crate::master::client::MasterClient;
use executor::ExecutorChain;
use safety::SafetyPolicy;

pub const POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// How many pending tasks one poll inspects.
const FETCH_LIMIT: i64 = 10;

/// Everything a worker needs to start. Built by the binaries from config,
/// flags, and the environment.
pub struct WorkerSettings {
    pub id: Option<String>,
    pub master_url: String,
    /// When set the worker runs in local mode against this database file.
    pub db_path: Option<PathBuf>,
    pub group: Option<String>,
    pub claude: ClaudeConfig,
    pub safety: SafetyPolicy,
}

pub struct Worker {
    id: String,
    group: String,
    worker_type: WorkerType,
    pool: Option<SqlitePool>,
    client: Option<MasterClient>,
    chain: ExecutorChain,
}

impl Worker {
    pub async fn new(settings: WorkerSettings) -> Result<Self> {
        let group = settings.group.unwrap_or_else(detect_group);
        let id = settings
            .id
            .unwrap_or_else(|| generate_worker_id(&group));

        let (pool, client, worker_type) = match &settings.db_path {
            Some(path) => {
                let pool = db::connection::open(path).await?;
                (Some(pool), None, WorkerType::Local)
            }
            None => {
                let client = MasterClient::new(settings.master_url.clone())?;
                (None, Some(client), WorkerType::Remote)
            }
        };

        let chain = ExecutorChain::standard(&settings.claude, &id, settings.safety);

        Ok(Self {
            id,
            group,
            worker_type,
            pool,
            client,
            chain,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// The continuous loop: poll, heartbeat, repeat until the shutdown
    /// signal flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.register().await?;

        tracing::info!(
            worker_id = %self.id,
            group = %self.group,
            worker_type = self.worker_type.as_str(),
            "worker started"
        );

        let mut poll = tokio::time::interval(POLL_INTERVAL);
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        // The first immediate ticks would double up with registration.
        poll.tick().await;
        heartbeat.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!(worker_id = %self.id, "stop signal received");
                        return Ok(());
                    }
                }
                _ = heartbeat.tick() => {
                    if let Err(e) = self.send_heartbeat().await {
                        tracing::warn!(worker_id = %self.id, "heartbeat failed: {e}");
                    }
                }
                _ = poll.tick() => {
                    if let Err(e) = self.poll_and_execute().await {
                        tracing::error!(worker_id = %self.id, "task execution failed: {e}");
                    }
                }
            }
        }
    }

    /// One-shot mode: a single fetch → claim → execute → report pass.
    ///
    /// Returns the task result, or `None` when there was no work or the
    /// claim was lost. Heartbeats keep flowing while the task executes.
    pub async fn run_one_shot(&self) -> Result<Option<String>> {
        self.register().await?;

        tracing::info!(
            worker_id = %self.id,
            group = %self.group,
            "one-shot worker started"
        );

        let pass = self.one_shot_pass();
        tokio::pin!(pass);

        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                result = &mut pass => return result,
                _ = heartbeat.tick() => {
                    if let Err(e) = self.send_heartbeat().await {
                        tracing::warn!(worker_id = %self.id, "heartbeat failed: {e}");
                    }
                }
            }
        }
    }

    async fn one_shot_pass(&self) -> Result<Option<String>> {
        let Some(task) = self.next_claimed_task().await? else {
            tracing::info!("no pending tasks");
            return Ok(None);
        };

        tracing::info!(task_id = task.id, "task claimed (one-shot)");
        match self.execute_and_report(&task).await? {
            Some(result) => Ok(Some(result)),
            None => Err(AgentFlowError::Execution(format!(
                "task {} failed",
                task.id
            ))),
        }
    }

    async fn register(&self) -> Result<()> {
        let registration = RegisterWorker {
            id: self.id.clone(),
            group_name: self.group.clone(),
            worker_type: self.worker_type,
            capabilities: detect_capabilities(),
        };

        match (&self.pool, &self.client) {
            (Some(pool), _) => db::workers::upsert(pool, &registration).await,
            (None, Some(client)) => client.register_worker(&registration).await,
            (None, None) => unreachable!("worker has neither pool nor client"),
        }
    }

    pub async fn send_heartbeat(&self) -> Result<()> {
        match (&self.pool, &self.client) {
            (Some(pool), _) => {
                db::workers::touch_heartbeat(pool, &self.id).await?;
                Ok(())
            }
            (None, Some(client)) => client.heartbeat(&self.id).await,
            (None, None) => unreachable!(),
        }
    }

    async fn poll_and_execute(&self) -> Result<()> {
        let Some(task) = self.next_claimed_task().await? else {
            return Ok(());
        };

        tracing::info!(task_id = task.id, "task claimed");
        self.execute_and_report(&task).await?;
        Ok(())
    }

    /// Fetch the head of the pending list and race for its claim.
    async fn next_claimed_task(&self) -> Result<Option<Task>> {
        match (&self.pool, &self.client) {
            (Some(pool), _) => {
                let pending = db::tasks::list_pending(pool, &self.group, FETCH_LIMIT).await?;
                let Some(head) = pending.into_iter().next() else {
                    return Ok(None);
                };
                if db::tasks::try_claim(pool, head.id, &self.id).await? {
                    Ok(db::tasks::get(pool, head.id).await?)
                } else {
                    Ok(None)
                }
            }
            (None, Some(client)) => {
                let pending = client.fetch_pending(&self.group).await?;
                let Some(head) = pending.into_iter().next() else {
                    return Ok(None);
                };
                if client.lock_task(head.id, &self.id).await? {
                    Ok(Some(client.get_task(head.id).await?))
                } else {
                    Ok(None)
                }
            }
            (None, None) => unreachable!(),
        }
    }

    /// Drive the execution and report the outcome. `Ok(Some(result))` on
    /// success, `Ok(None)` after a reported failure. `task:` plans fan out
    /// into child tasks; everything else goes through the executor chain.
    async fn execute_and_report(&self, task: &Task) -> Result<Option<String>> {
        self.log(task.id, LogLevel::Info, "task execution started")
            .await;

        let outcome = match subtasks::subtask_params(task) {
            Some(params) => self.execute_subtask_plan(task, params).await,
            None => self.chain.execute(task).await,
        };

        match outcome {
            Ok(result) => {
                self.report_completed(task.id, &result).await?;
                self.log(task.id, LogLevel::Info, "task completed").await;
                tracing::info!(task_id = task.id, "task completed");
                Ok(Some(result))
            }
            Err(e) => {
                let message = e.to_string();
                self.report_failed(task.id, &message).await?;
                self.log(task.id, LogLevel::Error, &message).await;
                tracing::warn!(task_id = task.id, "task failed: {message}");
                Ok(None)
            }
        }
    }

    async fn report_completed(&self, task_id: i64, result: &str) -> Result<()> {
        match (&self.pool, &self.client) {
            (Some(pool), _) => {
                db::tasks::mark_completed(pool, task_id, &self.id, result).await?;
                Ok(())
            }
            (None, Some(client)) => client.complete_task(task_id, &self.id, result).await,
            (None, None) => unreachable!(),
        }
    }

    async fn report_failed(&self, task_id: i64, error: &str) -> Result<()> {
        match (&self.pool, &self.client) {
            (Some(pool), _) => {
                db::tasks::mark_failed(pool, task_id, &self.id, error).await?;
                Ok(())
            }
            (None, Some(client)) => client.fail_task(task_id, &self.id, error).await,
            (None, None) => unreachable!(),
        }
    }

    /// Task logs live in the store; only local workers can reach it.
    async fn log(&self, task_id: i64, level: LogLevel, message: &str) {
        if let Some(pool) = &self.pool {
            if let Err(e) = db::task_logs::append(pool, task_id, &self.id, level, message).await {
                tracing::warn!(task_id, "task log append failed: {e}");
            }
        }
    }
}

/// Resolve the worker group: explicit value, `WORKER_GROUP`, container
/// markers, OS family, then `default`.
pub fn detect_group() -> String {
    if let Ok(group) = std::env::var("WORKER_GROUP") {
        if !group.is_empty() {
            return group;
        }
    }
    if std::path::Path::new("/.dockerenv").exists() {
        return "docker".to_string();
    }
    if std::path::Path::new("/var/run/secrets/kubernetes.io").exists() {
        return "k8s".to_string();
    }
    match std::env::consts::OS {
        "linux" => "linux".to_string(),
        "macos" => "darwin".to_string(),
        "windows" => "windows".to_string(),
        _ => "default".to_string(),
    }
}
