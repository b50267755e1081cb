//! Git-aware coordination: boundary checks, file locking, agent branches.
//!
//! [`GitIntegration`] is the public seam workers use before side-effectful
//! work. It composes the in-process [`BoundaryManager`] with the
//! [`BranchManager`] and persists conflict records and lock wait entries in
//! the store. Lock decisions are process-local: with multiple masters the
//! wait-queue table is the migration path, but a single master process must
//! own all boundary decisions.

pub mod boundary;
pub mod branch;

pub use boundary::BoundaryManager;
pub use branch::BranchManager;

use std::path::PathBuf;
use std::sync::Arc;

use sqlx::SqlitePool;

use agentflow_types::{Conflict, FileBoundary, LockType, MergeOutcome, MergeStrategy};

use crate::db;
use crate::error::{AgentFlowError, Result};

pub struct GitIntegration {
    boundaries: Arc<BoundaryManager>,
    branches: BranchManager,
    pool: SqlitePool,
}

impl GitIntegration {
    pub fn new(
        repo_path: impl Into<PathBuf>,
        descriptor_path: impl Into<PathBuf>,
        pool: SqlitePool,
    ) -> Self {
        Self {
            boundaries: Arc::new(BoundaryManager::new(descriptor_path)),
            branches: BranchManager::new(repo_path),
            pool,
        }
    }

    pub fn boundary_manager(&self) -> Arc<BoundaryManager> {
        Arc::clone(&self.boundaries)
    }

    /// Boundary check plus lock probe. Write requests against a path that is
    /// write-locked elsewhere persist a conflict record and fail.
    pub async fn verify_file_access(
        &self,
        agent_id: &str,
        path: &str,
        access: LockType,
    ) -> Result<()> {
        self.boundaries.verify_access(agent_id, path, access)?;

        if access == LockType::Write {
            let conflicts = self
                .record_conflicts(agent_id, &[path.to_string()])
                .await?;
            if let Some(conflict) = conflicts.first() {
                return Err(AgentFlowError::ResourceBusy(conflict.description.clone()));
            }
        }
        Ok(())
    }

    /// Persist and return the conflicts for the requested paths.
    pub async fn record_conflicts(
        &self,
        agent_id: &str,
        paths: &[String],
    ) -> Result<Vec<Conflict>> {
        let conflicts = self.boundaries.check_conflicts(agent_id, paths);
        for conflict in &conflicts {
            db::conflicts::create(&self.pool, conflict).await?;
        }
        Ok(conflicts)
    }

    /// Run `op` on `path` under a write lock.
    ///
    /// Verifies boundary access first (the operation is never invoked on
    /// denial), takes the write lock (enqueueing a wait entry and returning
    /// `ResourceBusy` when it is held elsewhere), releases the lock on every
    /// exit path, and commits the change on the agent's current branch when
    /// the operation succeeds.
    pub async fn safe_file_operation<T, F>(&self, agent_id: &str, path: &str, op: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        self.boundaries
            .verify_access(agent_id, path, LockType::Write)?;

        if !self.boundaries.acquire_lock(agent_id, path, LockType::Write) {
            db::lock_queue::enqueue(
                &self.pool,
                None,
                agent_id,
                path,
                LockType::Write,
                None,
                None,
                0,
            )
            .await?;
            return Err(AgentFlowError::ResourceBusy(format!(
                "could not acquire write lock for {}",
                path
            )));
        }

        let outcome = op();

        self.boundaries.release_lock(agent_id, path, LockType::Write);
        self.promote_waiters(path).await;

        let value = outcome?;
        self.branches
            .commit_all(agent_id, &format!("Modified {}", path))
            .await?;
        Ok(value)
    }

    /// Create the working branch for an agent task and report the agent's
    /// declared boundaries alongside it.
    pub async fn create_agent_task(
        &self,
        agent_id: &str,
        task_id: i64,
    ) -> Result<(String, Vec<FileBoundary>)> {
        let branch = self.branches.create_agent_branch(agent_id, task_id).await?;
        Ok((branch, self.boundaries.agent_boundaries(agent_id)))
    }

    /// Fold the agent branch back into the default branch. A merge that
    /// leaves unmerged paths is reported with the conflicting files and the
    /// branch is kept; otherwise the branch is deleted.
    pub async fn complete_agent_task(
        &self,
        agent_id: &str,
        task_id: i64,
        strategy: MergeStrategy,
    ) -> Result<MergeOutcome> {
        let branch = BranchManager::branch_name(agent_id, task_id);

        // The task is terminal either way; its locks must not outlive it.
        for path in self.boundaries.release_all_for_agent(agent_id) {
            self.promote_waiters(&path).await;
        }

        let merged = self.branches.merge_to_default(&branch, strategy).await?;
        if !merged {
            let conflicts = self.branches.merge_conflicts().await.unwrap_or_default();
            return Ok(MergeOutcome {
                status: "conflict".to_string(),
                branch: branch.clone(),
                message: format!("Merge conflicts detected in {} files", conflicts.len()),
                conflicts,
            });
        }

        self.branches.delete_branch(&branch, true).await?;
        Ok(MergeOutcome {
            status: "completed".to_string(),
            branch: branch.clone(),
            conflicts: Vec::new(),
            message: format!("Task {} merged successfully", task_id),
        })
    }

    /// After a release, the best waiting entry for the path is marked
    /// granted so its owner can retry immediately.
    async fn promote_waiters(&self, path: &str) {
        let waiting = match db::lock_queue::list_waiting(&self.pool, path).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(path, "lock queue read failed: {e}");
                return;
            }
        };
        if let Some(head) = waiting.first() {
            if let Err(e) = db::lock_queue::grant(&self.pool, head.id).await {
                tracing::warn!(path, entry = head.id, "lock queue grant failed: {e}");
            }
        }
    }
}
