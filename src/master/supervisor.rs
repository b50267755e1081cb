//! Supervised co-located workers.
//!
//! With `auto_start` enabled the master detects which groups this host can
//! serve (OS family plus container markers) and spawns one worker
//! subprocess per group. Children are tracked in a mutex-guarded map and
//! killed on shutdown; a supervised worker that dies is not restarted.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;

use tokio::process::{Child, Command};
use uuid::Uuid;

use crate::error::{AgentFlowError, Result};

pub struct Supervisor {
    master_url: String,
    db_path: String,
    children: Mutex<HashMap<String, Child>>,
}

impl Supervisor {
    pub fn new(master_url: impl Into<String>, db_path: impl Into<String>) -> Self {
        Self {
            master_url: master_url.into(),
            db_path: db_path.into(),
            children: Mutex::new(HashMap::new()),
        }
    }

    /// Spawn one worker per detected local group. Individual spawn failures
    /// are logged, not fatal: the master still serves remote workers.
    pub fn start_local_workers(&self) {
        for group in detect_local_groups() {
            match self.spawn_worker(&group) {
                Ok(worker_id) => {
                    tracing::info!(%worker_id, %group, "local worker started");
                }
                Err(e) => {
                    tracing::error!(%group, "failed to start local worker: {e}");
                }
            }
        }
    }

    fn spawn_worker(&self, group: &str) -> Result<String> {
        let worker_id = format!("{}-{}", group, Uuid::new_v4());
        let binary = worker_binary_path()?;

        let child = Command::new(&binary)
            .args([
                "--master",
                &self.master_url,
                "--db",
                &self.db_path,
                "--group",
                group,
                "--worker-id",
                &worker_id,
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        self.children
            .lock()
            .unwrap()
            .insert(worker_id.clone(), child);
        Ok(worker_id)
    }

    pub fn supervised_count(&self) -> usize {
        self.children.lock().unwrap().len()
    }

    /// Kill every supervised child. Called once at shutdown.
    pub fn shutdown(&self) {
        let mut children = self.children.lock().unwrap();
        for (worker_id, child) in children.iter_mut() {
            if let Err(e) = child.start_kill() {
                tracing::error!(%worker_id, "failed to stop local worker: {e}");
            } else {
                tracing::info!(%worker_id, "local worker stopped");
            }
        }
        children.clear();
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// The worker binary ships next to the master binary.
fn worker_binary_path() -> Result<PathBuf> {
    let current = std::env::current_exe()?;
    let name = if cfg!(windows) {
        "agentflow-worker.exe"
    } else {
        "agentflow-worker"
    };
    let path = current.with_file_name(name);
    if path.exists() {
        Ok(path)
    } else {
        Err(AgentFlowError::InvalidConfig(format!(
            "worker binary not found at {}",
            path.display()
        )))
    }
}

/// Groups this host can serve: its OS family, plus `docker` and `k8s` when
/// the respective markers exist.
pub fn detect_local_groups() -> Vec<String> {
    let mut groups = Vec::new();

    match std::env::consts::OS {
        "linux" => groups.push("linux".to_string()),
        "macos" => groups.push("darwin".to_string()),
        "windows" => groups.push("windows".to_string()),
        _ => {}
    }

    if std::path::Path::new("/.dockerenv").exists() {
        groups.push("docker".to_string());
    }
    if std::path::Path::new("/var/run/secrets/kubernetes.io").exists() {
        groups.push("k8s".to_string());
    }

    groups
}
