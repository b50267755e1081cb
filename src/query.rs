//! Unified read path over tasks and their Claude mappings.
//!
//! One LEFT JOIN, filterable from both sides, paginated. Join duplicates
//! (a task with several mapping rows) collapse to the first row per task id.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Row, SqlitePool};

use crate::error::{AgentFlowError, Result};
use agentflow_types::{ClaudeMapping, Task};

pub const DEFAULT_LIMIT: i64 = 50;

/// Filter set for [`UnifiedQuery::query_tasks`]. Every field is optional;
/// filters combine with AND.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskQuery {
    pub task_id: Option<i64>,
    pub status: Option<String>,
    pub group: Option<String>,

    pub session_uuid: Option<String>,
    pub message_uuid: Option<String>,
    pub slug: Option<String>,
    pub parent_message_uuid: Option<String>,

    pub order_by: Option<String>,
    #[serde(default)]
    pub order_desc: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// A task row with its Claude mapping, when one exists.
#[derive(Debug, Clone, Serialize)]
pub struct UnifiedTask {
    #[serde(flatten)]
    pub task: Task,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claude: Option<ClaudeMapping>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnifiedQueryResult {
    pub tasks: Vec<UnifiedTask>,
    pub total_count: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Sortable columns. Anything else is rejected rather than interpolated.
fn order_column(name: &str) -> Option<&'static str> {
    match name {
        "id" => Some("t.id"),
        "title" => Some("t.title"),
        "status" => Some("t.status"),
        "priority" => Some("t.priority"),
        "created_at" => Some("t.created_at"),
        "started_at" => Some("t.started_at"),
        "completed_at" => Some("t.completed_at"),
        _ => None,
    }
}

pub struct UnifiedQuery {
    pool: SqlitePool,
}

impl UnifiedQuery {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn query_tasks(&self, query: &TaskQuery) -> Result<UnifiedQueryResult> {
        let limit = query.limit.unwrap_or(DEFAULT_LIMIT).max(0);
        let offset = query.offset.unwrap_or(0).max(0);

        let order = match &query.order_by {
            Some(name) => order_column(name).ok_or_else(|| {
                AgentFlowError::InvalidArgument(format!("cannot order by {:?}", name))
            })?,
            None => "t.created_at",
        };
        let direction = if query.order_by.is_none() || query.order_desc {
            "DESC"
        } else {
            "ASC"
        };

        let (where_clause, binds) = build_where(query);

        let sql = format!(
            r#"
            SELECT t.*,
                   cm.id AS cm_id, cm.task_id AS cm_task_id,
                   cm.session_uuid AS cm_session_uuid, cm.message_uuid AS cm_message_uuid,
                   cm.parent_message_uuid AS cm_parent_message_uuid, cm.slug AS cm_slug,
                   cm.source AS cm_source, cm.created_at AS cm_created_at,
                   cm.updated_at AS cm_updated_at
            FROM tasks t
            LEFT JOIN claude_mappings cm ON t.id = cm.task_id
            {where_clause}
            ORDER BY {order} {direction}
            LIMIT ? OFFSET ?
            "#
        );

        let mut q = sqlx::query(&sql);
        for bind in &binds {
            q = q.bind(bind.as_str());
        }
        q = q.bind(limit).bind(offset);

        let rows = q.fetch_all(&self.pool).await?;

        let mut seen: HashSet<i64> = HashSet::new();
        let mut tasks = Vec::with_capacity(rows.len());
        for row in rows {
            let task = Task::from_row(&row)?;
            if !seen.insert(task.id) {
                continue;
            }

            let claude = match row.try_get::<Option<i64>, _>("cm_id")? {
                Some(id) => Some(ClaudeMapping {
                    id,
                    task_id: row.try_get("cm_task_id")?,
                    session_uuid: row.try_get("cm_session_uuid")?,
                    message_uuid: row.try_get("cm_message_uuid")?,
                    parent_message_uuid: row.try_get("cm_parent_message_uuid")?,
                    slug: row.try_get("cm_slug")?,
                    source: row.try_get("cm_source")?,
                    created_at: row.try_get("cm_created_at")?,
                    updated_at: row.try_get("cm_updated_at")?,
                }),
                None => None,
            };

            tasks.push(UnifiedTask { task, claude });
        }

        let count_sql = format!(
            "SELECT COUNT(DISTINCT t.id) FROM tasks t \
             LEFT JOIN claude_mappings cm ON t.id = cm.task_id {where_clause}"
        );
        let mut cq = sqlx::query_scalar::<_, i64>(&count_sql);
        for bind in &binds {
            cq = cq.bind(bind.as_str());
        }
        let total_count = cq.fetch_one(&self.pool).await?;

        Ok(UnifiedQueryResult {
            tasks,
            total_count,
            limit,
            offset,
        })
    }

    /// Single task by its Claude message uuid.
    pub async fn task_by_message_uuid(&self, message_uuid: &str) -> Result<UnifiedTask> {
        let result = self
            .query_tasks(&TaskQuery {
                message_uuid: Some(message_uuid.to_string()),
                limit: Some(1),
                ..Default::default()
            })
            .await?;
        result.tasks.into_iter().next().ok_or_else(|| {
            AgentFlowError::MappingNotFound(format!("message_uuid {}", message_uuid))
        })
    }

    /// Single task by its Claude slug.
    pub async fn task_by_slug(&self, slug: &str) -> Result<UnifiedTask> {
        let result = self
            .query_tasks(&TaskQuery {
                slug: Some(slug.to_string()),
                limit: Some(1),
                ..Default::default()
            })
            .await?;
        result
            .tasks
            .into_iter()
            .next()
            .ok_or_else(|| AgentFlowError::MappingNotFound(format!("slug {}", slug)))
    }

    /// All tasks of one Claude session.
    pub async fn tasks_by_session(
        &self,
        session_uuid: &str,
        limit: i64,
        offset: i64,
    ) -> Result<UnifiedQueryResult> {
        self.query_tasks(&TaskQuery {
            session_uuid: Some(session_uuid.to_string()),
            limit: Some(limit),
            offset: Some(offset),
            ..Default::default()
        })
        .await
    }
}

fn build_where(query: &TaskQuery) -> (String, Vec<String>) {
    let mut conditions: Vec<&str> = Vec::new();
    let mut binds: Vec<String> = Vec::new();

    if let Some(id) = query.task_id {
        conditions.push("t.id = ?");
        binds.push(id.to_string());
    }
    if let Some(status) = &query.status {
        conditions.push("t.status = ?");
        binds.push(status.clone());
    }
    if let Some(group) = &query.group {
        conditions.push("t.group_name = ?");
        binds.push(group.clone());
    }
    if let Some(session) = &query.session_uuid {
        conditions.push("cm.session_uuid = ?");
        binds.push(session.clone());
    }
    if let Some(message) = &query.message_uuid {
        conditions.push("cm.message_uuid = ?");
        binds.push(message.clone());
    }
    if let Some(slug) = &query.slug {
        conditions.push("cm.slug = ?");
        binds.push(slug.clone());
    }
    if let Some(parent) = &query.parent_message_uuid {
        conditions.push("cm.parent_message_uuid = ?");
        binds.push(parent.clone());
    }

    if conditions.is_empty() {
        (String::new(), binds)
    } else {
        (format!("WHERE {}", conditions.join(" AND ")), binds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{self, connection};
    use agentflow_types::{CreateClaudeMapping, CreateTask};
    use tempfile::TempDir;

    async fn setup() -> (TempDir, SqlitePool, UnifiedQuery, Vec<i64>) {
        let dir = TempDir::new().unwrap();
        let pool = connection::open(&dir.path().join("query.db")).await.unwrap();

        let mut ids = Vec::new();
        for title in ["first", "second", "third"] {
            let task = db::tasks::create(
                &pool,
                &CreateTask {
                    title: title.to_string(),
                    group_name: Some("default".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
            ids.push(task.id);
        }

        // Two of the three belong to session S.
        for (i, task_id) in ids.iter().take(2).enumerate() {
            db::claude_mappings::create(
                &pool,
                &CreateClaudeMapping {
                    task_id: *task_id,
                    session_uuid: "S".to_string(),
                    message_uuid: format!("msg-{}", i),
                    parent_message_uuid: None,
                    slug: format!("slug-{}", i),
                    source: "claude".to_string(),
                },
            )
            .await
            .unwrap();
        }

        let query = UnifiedQuery::new(pool.clone());
        (dir, pool, query, ids)
    }

    #[tokio::test]
    async fn session_filter_returns_mapped_tasks_only() {
        let (_dir, _pool, query, ids) = setup().await;

        let result = query
            .query_tasks(&TaskQuery {
                session_uuid: Some("S".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(result.total_count, 2);
        assert_eq!(result.tasks.len(), 2);
        assert!(result.tasks.iter().all(|t| t.claude.is_some()));
        let returned: HashSet<i64> = result.tasks.iter().map(|t| t.task.id).collect();
        assert!(returned.contains(&ids[0]) && returned.contains(&ids[1]));

        // total_count is pagination independent.
        let paged = query
            .query_tasks(&TaskQuery {
                session_uuid: Some("S".to_string()),
                limit: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(paged.tasks.len(), 1);
        assert_eq!(paged.total_count, 2);
    }

    #[tokio::test]
    async fn unmapped_tasks_surface_without_claude() {
        let (_dir, _pool, query, ids) = setup().await;

        let result = query.query_tasks(&TaskQuery::default()).await.unwrap();
        assert_eq!(result.total_count, 3);
        let unmapped = result
            .tasks
            .iter()
            .find(|t| t.task.id == ids[2])
            .expect("third task present");
        assert!(unmapped.claude.is_none());
    }

    #[tokio::test]
    async fn duplicate_join_rows_collapse() {
        let (_dir, pool, query, ids) = setup().await;

        // Second mapping for the first task produces a duplicate join row.
        db::claude_mappings::create(
            &pool,
            &CreateClaudeMapping {
                task_id: ids[0],
                session_uuid: "S".to_string(),
                message_uuid: "msg-extra".to_string(),
                parent_message_uuid: Some("msg-0".to_string()),
                slug: "slug-extra".to_string(),
                source: "claude".to_string(),
            },
        )
        .await
        .unwrap();

        let result = query
            .query_tasks(&TaskQuery {
                session_uuid: Some("S".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        let occurrences = result
            .tasks
            .iter()
            .filter(|t| t.task.id == ids[0])
            .count();
        assert_eq!(occurrences, 1);
        assert_eq!(result.total_count, 2);
    }

    #[tokio::test]
    async fn pagination_pages_concatenate_to_full_window() {
        let (_dir, _pool, query, _ids) = setup().await;

        let full = query
            .query_tasks(&TaskQuery {
                order_by: Some("id".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        let mut paged = Vec::new();
        for page in 0..3 {
            let result = query
                .query_tasks(&TaskQuery {
                    order_by: Some("id".to_string()),
                    limit: Some(1),
                    offset: Some(page),
                    ..Default::default()
                })
                .await
                .unwrap();
            paged.extend(result.tasks.into_iter().map(|t| t.task.id));
        }

        assert_eq!(
            full.tasks.iter().map(|t| t.task.id).collect::<Vec<_>>(),
            paged
        );
    }

    #[tokio::test]
    async fn lookups_by_slug_and_message() {
        let (_dir, _pool, query, ids) = setup().await;

        let by_slug = query.task_by_slug("slug-1").await.unwrap();
        assert_eq!(by_slug.task.id, ids[1]);

        let by_msg = query.task_by_message_uuid("msg-0").await.unwrap();
        assert_eq!(by_msg.task.id, ids[0]);

        assert!(matches!(
            query.task_by_slug("missing").await,
            Err(AgentFlowError::MappingNotFound(_))
        ));
    }

    #[tokio::test]
    async fn unknown_order_column_is_rejected() {
        let (_dir, _pool, query, _ids) = setup().await;

        let err = query
            .query_tasks(&TaskQuery {
                order_by: Some("lock_holder; DROP TABLE tasks".to_string()),
                ..Default::default()
            })
            .await;
        assert!(matches!(err, Err(AgentFlowError::InvalidArgument(_))));
    }
}
