//! Agent branch management over the external `git` tool.
//!
//! Every agent task works on its own branch, `agent-{agent}/task-{task}`.
//! Completion merges that branch into the repository's default branch
//! (`main`, falling back to `master`) with one of three strategies. A merge
//! that leaves unmerged paths is reported, never aborted.

use std::path::PathBuf;

use tokio::process::Command;

use agentflow_types::MergeStrategy;

use crate::error::{AgentFlowError, Result};

pub struct BranchManager {
    repo_path: PathBuf,
}

impl BranchManager {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
        }
    }

    pub fn branch_name(agent_id: &str, task_id: i64) -> String {
        format!("agent-{}/task-{}", agent_id, task_id)
    }

    /// Create and check out the branch for an agent task.
    pub async fn create_agent_branch(&self, agent_id: &str, task_id: i64) -> Result<String> {
        let branch = Self::branch_name(agent_id, task_id);
        self.git(&["checkout", "-b", &branch]).await?;
        tracing::info!(%branch, agent_id, task_id, "branch created");
        Ok(branch)
    }

    pub async fn switch_branch(&self, branch: &str) -> Result<()> {
        self.git(&["checkout", branch]).await?;
        Ok(())
    }

    pub async fn delete_branch(&self, branch: &str, force: bool) -> Result<()> {
        let flag = if force { "-D" } else { "-d" };
        self.git(&["branch", flag, branch]).await?;
        tracing::info!(branch, "branch deleted");
        Ok(())
    }

    /// Stage everything and commit on the current branch, returning the
    /// commit hash.
    pub async fn commit_all(&self, agent_id: &str, message: &str) -> Result<String> {
        self.git(&["add", "."]).await?;
        let full_message = format!("[{}] {}", agent_id, message);
        self.git(&["commit", "-m", &full_message]).await?;
        let hash = self.git(&["rev-parse", "HEAD"]).await?;
        Ok(hash.trim().to_string())
    }

    /// Merge `branch` into the default branch. Returns false when the tool
    /// reports a failure (typically conflicts); the repository is left
    /// untouched for inspection.
    pub async fn merge_to_default(&self, branch: &str, strategy: MergeStrategy) -> Result<bool> {
        if self.switch_branch("main").await.is_err() {
            self.switch_branch("master").await.map_err(|_| {
                AgentFlowError::Git("no main or master branch found".to_string())
            })?;
        }

        let result = match strategy {
            MergeStrategy::Merge => self.git(&["merge", branch]).await,
            MergeStrategy::Squash => self.git(&["merge", "--squash", branch]).await,
            MergeStrategy::Rebase => self.git(&["rebase", branch]).await,
        };

        match result {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!(branch, strategy = strategy.as_str(), "merge failed: {e}");
                Ok(false)
            }
        }
    }

    /// Paths currently in the unmerged state.
    pub async fn merge_conflicts(&self) -> Result<Vec<String>> {
        let output = self.git(&["diff", "--name-only", "--diff-filter=U"]).await?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_path)
            .output()
            .await?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(AgentFlowError::Git(format!(
                "git {} failed: {}",
                args.first().unwrap_or(&""),
                stderr.trim()
            )))
        }
    }
}
