use serde::{Deserialize, Serialize};

#[cfg(feature = "sqlx")]
use sqlx::FromRow;

/// How long a claim on a task stays valid without a release or report.
pub const CLAIM_LEASE_MINUTES: i64 = 5;

/// Task status enum with snake_case serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Blocked,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Blocked => "blocked",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "blocked" => Ok(TaskStatus::Blocked),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A unit of work with a durable id and lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(FromRow))]
pub struct Task {
    pub id: i64,
    #[serde(default)]
    pub parent_id: Option<i64>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub group_name: String,
    #[serde(default)]
    pub completion_criteria: Option<String>,
    pub status: String,
    pub priority: i64,
    #[serde(default)]
    pub lock_holder: Option<String>,
    #[serde(default)]
    pub lock_time: Option<String>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub workspace_dir: Option<String>,
    #[serde(default)]
    pub sandboxed: bool,
    #[serde(default)]
    pub allow_network: bool,
    #[serde(default)]
    pub max_memory: Option<String>,
    #[serde(default)]
    pub max_cpu: Option<i64>,
    #[serde(default)]
    pub created_by: Option<String>,
    pub created_at: String,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
}

impl Task {
    pub fn status_enum(&self) -> TaskStatus {
        self.status.parse().unwrap_or_default()
    }

    pub fn is_terminal(&self) -> bool {
        self.status_enum().is_terminal()
    }

    /// Whether the current claim is still within its lease window.
    pub fn claim_is_fresh(&self) -> bool {
        if let (Some(holder), Some(lock_time)) = (&self.lock_holder, &self.lock_time) {
            if holder.is_empty() {
                return false;
            }
            if let Ok(locked) = chrono::DateTime::parse_from_rfc3339(lock_time) {
                let lease = chrono::Duration::minutes(CLAIM_LEASE_MINUTES);
                return chrono::Utc::now().signed_duration_since(locked) <= lease;
            }
        }
        false
    }
}

/// Input for creating a new task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTask {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub completion_criteria: Option<String>,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub workspace_dir: Option<String>,
    #[serde(default)]
    pub sandboxed: bool,
    #[serde(default)]
    pub allow_network: bool,
    #[serde(default)]
    pub max_memory: Option<String>,
    #[serde(default)]
    pub max_cpu: Option<i64>,
    #[serde(default)]
    pub created_by: Option<String>,
}

/// Severity of an appended task log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Append-only execution log attached to a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(FromRow))]
pub struct TaskLog {
    pub id: i64,
    pub task_id: i64,
    pub worker_id: String,
    pub level: String,
    pub message: String,
    pub created_at: String,
}
