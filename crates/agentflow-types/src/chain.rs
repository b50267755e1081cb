use serde::{Deserialize, Serialize};

#[cfg(feature = "sqlx")]
use sqlx::FromRow;

/// Shape of a task chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainType {
    /// One node after another, `node_order` = 0..n-1.
    Sequential,
    /// All nodes at `node_order` = 0.
    Parallel,
    /// Parent/child structure via `parent_node_id`.
    Tree,
}

impl ChainType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainType::Sequential => "sequential",
            ChainType::Parallel => "parallel",
            ChainType::Tree => "tree",
        }
    }
}

impl std::str::FromStr for ChainType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sequential" => Ok(ChainType::Sequential),
            "parallel" => Ok(ChainType::Parallel),
            "tree" => Ok(ChainType::Tree),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChainStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl ChainStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainStatus::Pending => "pending",
            ChainStatus::Running => "running",
            ChainStatus::Completed => "completed",
            ChainStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ChainStatus::Completed | ChainStatus::Failed)
    }
}

impl std::str::FromStr for ChainStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ChainStatus::Pending),
            "running" => Ok(ChainStatus::Running),
            "completed" => Ok(ChainStatus::Completed),
            "failed" => Ok(ChainStatus::Failed),
            _ => Err(()),
        }
    }
}

/// An ordered, parallel, or tree composition of tasks bound to one
/// external session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(FromRow))]
pub struct TaskChain {
    pub id: String,
    pub session_uuid: String,
    pub root_message_uuid: String,
    pub chain_type: String,
    pub status: String,
    pub created_at: String,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
}

impl TaskChain {
    pub fn chain_type_enum(&self) -> Option<ChainType> {
        self.chain_type.parse().ok()
    }

    pub fn status_enum(&self) -> ChainStatus {
        self.status.parse().unwrap_or_default()
    }
}

/// One task's position inside a chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(FromRow))]
pub struct ChainNode {
    pub id: i64,
    pub chain_id: String,
    pub task_id: i64,
    #[serde(default)]
    pub parent_node_id: Option<i64>,
    pub node_order: i64,
    pub created_at: String,
}

/// Node description for tree-chain creation.
///
/// `parent_index` points at an earlier entry of the same definition list
/// (`None` marks the root); the chain manager resolves it to the stored
/// `parent_node_id` as nodes are inserted. Parents must precede children,
/// which keeps the stored graph acyclic by construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeNodeDef {
    pub task_id: i64,
    #[serde(default)]
    pub parent_index: Option<usize>,
}
