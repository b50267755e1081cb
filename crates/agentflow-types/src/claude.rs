use serde::{Deserialize, Serialize};

#[cfg(feature = "sqlx")]
use sqlx::FromRow;

/// Mapping between an agentflow task and the Claude session/message that
/// produced it. `message_uuid` and `slug` are unique; a `session_uuid`
/// groups related tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(FromRow))]
pub struct ClaudeMapping {
    pub id: i64,
    pub task_id: i64,
    pub session_uuid: String,
    pub message_uuid: String,
    #[serde(default)]
    pub parent_message_uuid: Option<String>,
    pub slug: String,
    pub source: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Input for creating a Claude mapping row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateClaudeMapping {
    pub task_id: i64,
    pub session_uuid: String,
    pub message_uuid: String,
    #[serde(default)]
    pub parent_message_uuid: Option<String>,
    pub slug: String,
    pub source: String,
}
