use serde::{Deserialize, Serialize};

#[cfg(feature = "sqlx")]
use sqlx::FromRow;

/// Access level a boundary grants its agent over the matched paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessType {
    Exclusive,
    Shared,
    Readonly,
}

impl AccessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessType::Exclusive => "exclusive",
            AccessType::Shared => "shared",
            AccessType::Readonly => "readonly",
        }
    }
}

/// The declared file scope an agent may touch.
///
/// A `path_pattern` ending in `**` matches any path under the prefix before
/// the `**`; otherwise the pattern is a plain glob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileBoundary {
    pub path_pattern: String,
    pub access_type: AccessType,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockType {
    Read,
    Write,
}

impl LockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockType::Read => "read",
            LockType::Write => "write",
        }
    }

    /// Two reads coexist; anything involving a write does not.
    pub fn compatible_with(&self, other: LockType) -> bool {
        matches!((self, other), (LockType::Read, LockType::Read))
    }
}

impl std::str::FromStr for LockType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "read" => Ok(LockType::Read),
            "write" => Ok(LockType::Write),
            _ => Err(()),
        }
    }
}

/// An in-memory advisory lock on a path, held by one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileLock {
    pub path: String,
    pub lock_type: LockType,
    pub agent_id: String,
    pub acquired_at: String,
}

/// Kind of a detected coordination conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    FileLocked,
    BoundaryOverlap,
    MergeConflict,
}

impl ConflictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictKind::FileLocked => "file_locked",
            ConflictKind::BoundaryOverlap => "boundary_overlap",
            ConflictKind::MergeConflict => "merge_conflict",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ConflictSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictSeverity::Low => "low",
            ConflictSeverity::Medium => "medium",
            ConflictSeverity::High => "high",
            ConflictSeverity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    #[default]
    Pending,
    Resolving,
    Resolved,
}

impl ConflictStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStatus::Pending => "pending",
            ConflictStatus::Resolving => "resolving",
            ConflictStatus::Resolved => "resolved",
        }
    }
}

impl std::str::FromStr for ConflictStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ConflictStatus::Pending),
            "resolving" => Ok(ConflictStatus::Resolving),
            "resolved" => Ok(ConflictStatus::Resolved),
            _ => Err(()),
        }
    }
}

/// A persisted conflict record. `file_paths` is a JSON array of paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(FromRow))]
pub struct Conflict {
    pub id: String,
    #[serde(default)]
    pub task_id: Option<i64>,
    pub agent_id: String,
    pub kind: String,
    pub file_paths: String,
    pub description: String,
    pub severity: String,
    pub status: String,
    pub created_at: String,
    #[serde(default)]
    pub resolved_at: Option<String>,
}

impl Conflict {
    pub fn file_paths_vec(&self) -> Vec<String> {
        serde_json::from_str(&self.file_paths).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WaitStatus {
    #[default]
    Waiting,
    Granted,
    Cancelled,
}

impl WaitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitStatus::Waiting => "waiting",
            WaitStatus::Granted => "granted",
            WaitStatus::Cancelled => "cancelled",
        }
    }
}

/// A persisted entry in the file-lock wait queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(FromRow))]
pub struct LockWaitEntry {
    pub id: i64,
    #[serde(default)]
    pub task_id: Option<i64>,
    pub worker_id: String,
    pub path: String,
    pub lock_type: String,
    #[serde(default)]
    pub line_start: Option<i64>,
    #[serde(default)]
    pub line_end: Option<i64>,
    pub priority: i64,
    pub requested_at: String,
    pub status: String,
}

/// How an agent branch is folded back into the default branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    Merge,
    Squash,
    Rebase,
}

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::Merge => "merge",
            MergeStrategy::Squash => "squash",
            MergeStrategy::Rebase => "rebase",
        }
    }
}

impl std::str::FromStr for MergeStrategy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "merge" => Ok(MergeStrategy::Merge),
            "squash" => Ok(MergeStrategy::Squash),
            "rebase" => Ok(MergeStrategy::Rebase),
            _ => Err(()),
        }
    }
}

/// Result of completing an agent task: either merged (branch deleted) or a
/// conflict report listing the unmerged paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub status: String,
    pub branch: String,
    #[serde(default)]
    pub conflicts: Vec<String>,
    pub message: String,
}
