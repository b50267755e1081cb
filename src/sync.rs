//! Status synchronization with Claude session files.
//!
//! Claude records each session as a JSON-lines file named
//! `{session_uuid}.jsonl`. The synchronizer appends agentflow status
//! updates to those files and reads updates written by the other side,
//! applying them to mapped tasks. Lines that are not
//! `agentflow_status_update` records are ignored, as are malformed lines.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tokio::sync::watch;

use agentflow_types::{ClaudeMapping, Task, TaskStatus};

use crate::db;
use crate::error::{AgentFlowError, Result};

pub const SYNC_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);

const STATUS_UPDATE_TYPE: &str = "agentflow_status_update";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    ToClaude,
    FromClaude,
    Bidirectional,
}

/// One record in the session file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: String,
    pub data: StatusUpdateData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdateData {
    pub task_id: i64,
    pub message_uuid: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct TaskSynchronizer {
    pool: SqlitePool,
    claude_dir: PathBuf,
}

impl TaskSynchronizer {
    pub fn new(pool: SqlitePool, claude_dir: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            claude_dir: claude_dir.into(),
        }
    }

    /// Synchronize one task in the given direction. A task without a Claude
    /// mapping is not an error; there is simply nothing to sync.
    pub async fn sync_task_status(&self, task_id: i64, direction: SyncDirection) -> Result<()> {
        let task = db::tasks::get(&self.pool, task_id)
            .await?
            .ok_or(AgentFlowError::TaskNotFound(task_id))?;

        let Some(mapping) = db::claude_mappings::get_by_task(&self.pool, task_id).await? else {
            tracing::debug!(task_id, "no claude mapping, skipping sync");
            return Ok(());
        };

        match direction {
            SyncDirection::ToClaude => self.sync_to_claude(&task, &mapping).await,
            SyncDirection::FromClaude => self.sync_from_claude(&mapping).await,
            SyncDirection::Bidirectional => {
                self.sync_to_claude(&task, &mapping).await?;
                self.sync_from_claude(&mapping).await
            }
        }
    }

    /// Append the task's current status to the session file.
    async fn sync_to_claude(&self, task: &Task, mapping: &ClaudeMapping) -> Result<()> {
        let update = StatusUpdate {
            kind: STATUS_UPDATE_TYPE.to_string(),
            timestamp: db::now(),
            data: StatusUpdateData {
                task_id: task.id,
                message_uuid: mapping.message_uuid.clone(),
                status: task.status.clone(),
                result: task.result.clone(),
                error: task.error.clone(),
            },
        };

        let path = self.session_file(&mapping.session_uuid);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let mut line = serde_json::to_string(&update)?;
        line.push('\n');

        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;

        tracing::info!(task_id = task.id, status = %task.status, "task status synced to claude");
        Ok(())
    }

    /// Read updates for this mapping's message and apply the most recent
    /// valid status to the task.
    async fn sync_from_claude(&self, mapping: &ClaudeMapping) -> Result<()> {
        let path = self.session_file(&mapping.session_uuid);
        if !path.exists() {
            tracing::debug!(path = %path.display(), "claude session file not found");
            return Ok(());
        }

        for update in read_status_updates(&path).await? {
            if update.data.message_uuid != mapping.message_uuid {
                continue;
            }
            let Ok(status) = update.data.status.parse::<TaskStatus>() else {
                tracing::warn!(
                    task_id = mapping.task_id,
                    status = %update.data.status,
                    "ignoring update with unknown status"
                );
                continue;
            };
            db::tasks::set_status(&self.pool, mapping.task_id, status).await?;
            tracing::info!(
                task_id = mapping.task_id,
                status = status.as_str(),
                "task status synced from claude"
            );
        }

        Ok(())
    }

    /// Push the status of every running mapped task out to its session
    /// file. This is the periodic body of [`run_auto_sync`].
    ///
    /// [`run_auto_sync`]: Self::run_auto_sync
    pub async fn sync_running_tasks(&self) -> Result<usize> {
        let running = db::tasks::list(&self.pool, Some("running"), None).await?;
        let mut synced = 0;

        for task in &running {
            let Some(mapping) = db::claude_mappings::get_by_task(&self.pool, task.id).await? else {
                continue;
            };
            self.sync_to_claude(task, &mapping).await?;
            synced += 1;
        }

        Ok(synced)
    }

    /// Periodic synchronization until the shutdown signal flips.
    pub async fn run_auto_sync(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        tracing::info!(claude_dir = %self.claude_dir.display(), "auto-sync started");
        let mut tick = tokio::time::interval(SYNC_INTERVAL);
        tick.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("auto-sync stopped");
                        return Ok(());
                    }
                }
                _ = tick.tick() => {
                    if let Err(e) = self.sync_running_tasks().await {
                        tracing::error!("auto-sync pass failed: {e}");
                    }
                }
            }
        }
    }

    /// Whether the session file exists and is readable.
    pub async fn validate_session(&self, session_uuid: &str) -> Result<()> {
        let path = self.session_file(session_uuid);
        tokio::fs::File::open(&path).await.map_err(|e| {
            AgentFlowError::InvalidArgument(format!(
                "session file {} is not readable: {}",
                path.display(),
                e
            ))
        })?;
        Ok(())
    }

    fn session_file(&self, session_uuid: &str) -> PathBuf {
        self.claude_dir.join(format!("{session_uuid}.jsonl"))
    }
}

/// Parse the status-update lines of a session file, skipping everything
/// else (Claude writes its own record types into the same file).
async fn read_status_updates(path: &Path) -> Result<Vec<StatusUpdate>> {
    let contents = tokio::fs::read_to_string(path).await?;
    let mut updates = Vec::new();

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<StatusUpdate>(line) {
            Ok(update) if update.kind == STATUS_UPDATE_TYPE => updates.push(update),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("skipping malformed session line: {e}");
            }
        }
    }

    Ok(updates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection;
    use agentflow_types::{CreateClaudeMapping, CreateTask};
    use tempfile::TempDir;

    async fn setup() -> (TempDir, SqlitePool, TaskSynchronizer, i64) {
        let dir = TempDir::new().unwrap();
        let pool = connection::open(&dir.path().join("sync.db")).await.unwrap();

        let task = db::tasks::create(
            &pool,
            &CreateTask {
                title: "mapped".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        db::claude_mappings::create(
            &pool,
            &CreateClaudeMapping {
                task_id: task.id,
                session_uuid: "sess-sync".to_string(),
                message_uuid: "msg-sync".to_string(),
                parent_message_uuid: None,
                slug: "mapped-task".to_string(),
                source: "claude".to_string(),
            },
        )
        .await
        .unwrap();

        let synchronizer = TaskSynchronizer::new(pool.clone(), dir.path().join("sessions"));
        (dir, pool, synchronizer, task.id)
    }

    #[tokio::test]
    async fn to_claude_appends_jsonl_lines() {
        let (dir, pool, synchronizer, task_id) = setup().await;

        synchronizer
            .sync_task_status(task_id, SyncDirection::ToClaude)
            .await
            .unwrap();

        db::tasks::try_claim(&pool, task_id, "w1").await.unwrap();
        synchronizer
            .sync_task_status(task_id, SyncDirection::ToClaude)
            .await
            .unwrap();

        let path = dir.path().join("sessions").join("sess-sync.jsonl");
        let updates = read_status_updates(&path).await.unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].data.status, "pending");
        assert_eq!(updates[1].data.status, "running");
        assert_eq!(updates[1].data.message_uuid, "msg-sync");
    }

    #[tokio::test]
    async fn from_claude_applies_latest_status() {
        let (dir, pool, synchronizer, task_id) = setup().await;
        db::tasks::try_claim(&pool, task_id, "w1").await.unwrap();

        let sessions = dir.path().join("sessions");
        tokio::fs::create_dir_all(&sessions).await.unwrap();
        let lines = [
            // Claude's own record types are ignored.
            serde_json::json!({"type": "assistant_message", "content": "hi"}).to_string(),
            serde_json::json!({
                "type": "agentflow_status_update",
                "timestamp": db::now(),
                "data": {"task_id": task_id, "message_uuid": "msg-sync", "status": "completed"}
            })
            .to_string(),
            "not json at all".to_string(),
        ];
        tokio::fs::write(sessions.join("sess-sync.jsonl"), lines.join("\n"))
            .await
            .unwrap();

        synchronizer
            .sync_task_status(task_id, SyncDirection::FromClaude)
            .await
            .unwrap();

        let task = db::tasks::get(&pool, task_id).await.unwrap().unwrap();
        assert_eq!(task.status, "completed");
        // Leaving running cleared the claim and stamped completion.
        assert_eq!(task.lock_holder, None);
        assert!(task.completed_at.is_some());
    }

    #[tokio::test]
    async fn unknown_statuses_are_ignored() {
        let (dir, pool, synchronizer, task_id) = setup().await;

        let sessions = dir.path().join("sessions");
        tokio::fs::create_dir_all(&sessions).await.unwrap();
        let line = serde_json::json!({
            "type": "agentflow_status_update",
            "timestamp": db::now(),
            "data": {"task_id": task_id, "message_uuid": "msg-sync", "status": "exploded"}
        })
        .to_string();
        tokio::fs::write(sessions.join("sess-sync.jsonl"), line)
            .await
            .unwrap();

        synchronizer
            .sync_task_status(task_id, SyncDirection::FromClaude)
            .await
            .unwrap();

        let task = db::tasks::get(&pool, task_id).await.unwrap().unwrap();
        assert_eq!(task.status, "pending");
    }

    #[tokio::test]
    async fn unmapped_tasks_sync_as_noop() {
        let (_dir, pool, synchronizer, _task_id) = setup().await;

        let orphan = db::tasks::create(
            &pool,
            &CreateTask {
                title: "orphan".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        synchronizer
            .sync_task_status(orphan.id, SyncDirection::Bidirectional)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn running_pass_counts_mapped_tasks_only() {
        let (_dir, pool, synchronizer, task_id) = setup().await;

        // One running mapped task, one running unmapped task.
        db::tasks::try_claim(&pool, task_id, "w1").await.unwrap();
        let other = db::tasks::create(
            &pool,
            &CreateTask {
                title: "unmapped".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        db::tasks::try_claim(&pool, other.id, "w1").await.unwrap();

        let synced = synchronizer.sync_running_tasks().await.unwrap();
        assert_eq!(synced, 1);
    }

    #[tokio::test]
    async fn validate_session_reports_missing_files() {
        let (_dir, _pool, synchronizer, _task_id) = setup().await;
        assert!(synchronizer.validate_session("no-such-session").await.is_err());
    }
}
