//! Store operations over the SQLite pool.
//!
//! Each entity gets a nested module of free async functions. The store is the
//! single source of truth for task state; callers never cache rows. All
//! timestamps are RFC 3339 UTC strings; SQL comparisons go through
//! `datetime(...)` so stored values and SQLite's `'now'` normalize the same
//! way.

pub mod connection;

use sqlx::SqlitePool;

use crate::error::Result;
use agentflow_types::*;

/// Current time as stored in every timestamp column.
pub fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Database operations for tasks, including the claim protocol.
pub mod tasks {
    use super::*;

    pub async fn create(pool: &SqlitePool, input: &CreateTask) -> Result<Task> {
        let group = input
            .group_name
            .clone()
            .unwrap_or_else(|| "default".to_string());

        let result = sqlx::query(
            r#"
            INSERT INTO tasks (parent_id, title, description, group_name, completion_criteria,
                status, priority, workspace_dir, sandboxed, allow_network, max_memory, max_cpu,
                created_by, created_at)
            VALUES (?, ?, ?, ?, ?, 'pending', ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(input.parent_id)
        .bind(&input.title)
        .bind(&input.description)
        .bind(&group)
        .bind(&input.completion_criteria)
        .bind(input.priority)
        .bind(&input.workspace_dir)
        .bind(input.sandboxed)
        .bind(input.allow_network)
        .bind(&input.max_memory)
        .bind(input.max_cpu)
        .bind(&input.created_by)
        .bind(now())
        .execute(pool)
        .await?;

        get(pool, result.last_insert_rowid())
            .await?
            .ok_or_else(|| sqlx::Error::RowNotFound.into())
    }

    pub async fn get(pool: &SqlitePool, id: i64) -> Result<Option<Task>> {
        let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(task)
    }

    pub async fn list(
        pool: &SqlitePool,
        status: Option<&str>,
        group: Option<&str>,
    ) -> Result<Vec<Task>> {
        let mut query = String::from("SELECT * FROM tasks WHERE 1=1");

        if status.is_some() {
            query.push_str(" AND status = ?");
        }
        if group.is_some() {
            query.push_str(" AND group_name = ?");
        }
        query.push_str(" ORDER BY created_at DESC");

        let mut q = sqlx::query_as::<_, Task>(&query);
        if let Some(s) = status {
            q = q.bind(s);
        }
        if let Some(g) = group {
            q = q.bind(g);
        }

        let tasks = q.fetch_all(pool).await?;
        Ok(tasks)
    }

    /// Pending tasks for a group, most urgent first.
    pub async fn list_pending(pool: &SqlitePool, group: &str, limit: i64) -> Result<Vec<Task>> {
        let tasks = sqlx::query_as::<_, Task>(
            r#"
            SELECT * FROM tasks
            WHERE status = 'pending' AND group_name = ?
            ORDER BY priority DESC, created_at ASC
            LIMIT ?
            "#,
        )
        .bind(group)
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(tasks)
    }

    /// Tasks fanned out under a parent task.
    pub async fn list_children(pool: &SqlitePool, parent_id: i64) -> Result<Vec<Task>> {
        let tasks = sqlx::query_as::<_, Task>(
            "SELECT * FROM tasks WHERE parent_id = ? ORDER BY id ASC",
        )
        .bind(parent_id)
        .fetch_all(pool)
        .await?;
        Ok(tasks)
    }

    /// Force a status from an external source (the session synchronizer),
    /// keeping the claim/timestamp invariants intact: leaving `running`
    /// clears the claim, entering a terminal status stamps `completed_at`
    /// once.
    pub async fn set_status(pool: &SqlitePool, task_id: i64, status: TaskStatus) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = ?,
                lock_holder = CASE WHEN ? = 'running' THEN lock_holder ELSE NULL END,
                lock_time = CASE WHEN ? = 'running' THEN lock_time ELSE NULL END,
                completed_at = CASE WHEN ? IN ('completed', 'failed') AND completed_at IS NULL
                    THEN ? ELSE completed_at END
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(status.as_str())
        .bind(status.as_str())
        .bind(status.as_str())
        .bind(now())
        .bind(task_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Attempt to claim a task for a worker. Returns whether the claim won.
    ///
    /// A row is claimable when it is pending with no holder, when the caller
    /// already holds it, or when a running claim's lease has lapsed
    /// (`lock_time` older than five minutes). Terminal rows never match. The
    /// single conditional UPDATE is the only isolation needed; SQLite applies
    /// it atomically.
    pub async fn try_claim(pool: &SqlitePool, task_id: i64, worker_id: &str) -> Result<bool> {
        let ts = now();
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'running',
                lock_holder = ?,
                lock_time = ?,
                started_at = ?
            WHERE id = ?
              AND status IN ('pending', 'running')
              AND (lock_holder IS NULL
                   OR lock_holder = ''
                   OR lock_holder = ?
                   OR datetime(lock_time) < datetime('now', '-5 minutes'))
            "#,
        )
        .bind(worker_id)
        .bind(&ts)
        .bind(&ts)
        .bind(task_id)
        .bind(worker_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Best-effort release: puts the task back to pending iff the caller
    /// still holds the claim.
    pub async fn release_claim(pool: &SqlitePool, task_id: i64, worker_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'pending',
                lock_holder = NULL,
                lock_time = NULL
            WHERE id = ? AND lock_holder = ?
            "#,
        )
        .bind(task_id)
        .bind(worker_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a successful outcome. No-op unless the caller is the recorded
    /// holder of a running claim, which makes retries and duplicate reports
    /// safe.
    pub async fn mark_completed(
        pool: &SqlitePool,
        task_id: i64,
        worker_id: &str,
        result_text: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'completed',
                lock_holder = NULL,
                lock_time = NULL,
                result = ?,
                error = NULL,
                completed_at = ?
            WHERE id = ? AND lock_holder = ? AND status = 'running'
            "#,
        )
        .bind(result_text)
        .bind(now())
        .bind(task_id)
        .bind(worker_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a failed outcome, holder-guarded like [`mark_completed`].
    pub async fn mark_failed(
        pool: &SqlitePool,
        task_id: i64,
        worker_id: &str,
        error_text: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'failed',
                lock_holder = NULL,
                lock_time = NULL,
                error = ?,
                result = NULL,
                completed_at = ?
            WHERE id = ? AND lock_holder = ? AND status = 'running'
            "#,
        )
        .bind(error_text)
        .bind(now())
        .bind(task_id)
        .bind(worker_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Database operations for workers.
pub mod workers {
    use super::*;

    /// Insert or refresh a worker row. Registration doubles as a heartbeat.
    pub async fn upsert(pool: &SqlitePool, input: &RegisterWorker) -> Result<()> {
        let ts = now();
        sqlx::query(
            r#"
            INSERT INTO workers (id, group_name, worker_type, capabilities, status,
                last_heartbeat, created_at)
            VALUES (?, ?, ?, ?, 'active', ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                group_name = excluded.group_name,
                worker_type = excluded.worker_type,
                capabilities = excluded.capabilities,
                status = 'active',
                last_heartbeat = excluded.last_heartbeat
            "#,
        )
        .bind(&input.id)
        .bind(&input.group_name)
        .bind(input.worker_type.as_str())
        .bind(if input.capabilities.is_empty() {
            "{}"
        } else {
            input.capabilities.as_str()
        })
        .bind(&ts)
        .bind(&ts)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Refresh `last_heartbeat`; false when the worker is unknown.
    pub async fn touch_heartbeat(pool: &SqlitePool, worker_id: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE workers SET last_heartbeat = ? WHERE id = ?")
            .bind(now())
            .bind(worker_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get(pool: &SqlitePool, worker_id: &str) -> Result<Option<Worker>> {
        let worker = sqlx::query_as::<_, Worker>("SELECT * FROM workers WHERE id = ?")
            .bind(worker_id)
            .fetch_optional(pool)
            .await?;
        Ok(worker)
    }

    pub async fn list(pool: &SqlitePool, group: Option<&str>) -> Result<Vec<Worker>> {
        let workers = if let Some(g) = group {
            sqlx::query_as::<_, Worker>(
                "SELECT * FROM workers WHERE group_name = ? ORDER BY created_at DESC",
            )
            .bind(g)
            .fetch_all(pool)
            .await?
        } else {
            sqlx::query_as::<_, Worker>("SELECT * FROM workers ORDER BY created_at DESC")
                .fetch_all(pool)
                .await?
        };
        Ok(workers)
    }
}

/// Append-only task execution logs.
pub mod task_logs {
    use super::*;

    pub async fn append(
        pool: &SqlitePool,
        task_id: i64,
        worker_id: &str,
        level: LogLevel,
        message: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO task_logs (task_id, worker_id, level, message, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(task_id)
        .bind(worker_id)
        .bind(level.as_str())
        .bind(message)
        .bind(now())
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn list_for_task(pool: &SqlitePool, task_id: i64) -> Result<Vec<TaskLog>> {
        let logs = sqlx::query_as::<_, TaskLog>(
            "SELECT * FROM task_logs WHERE task_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(task_id)
        .fetch_all(pool)
        .await?;
        Ok(logs)
    }
}

/// Claude session/message mapping rows.
pub mod claude_mappings {
    use super::*;

    pub async fn create(pool: &SqlitePool, input: &CreateClaudeMapping) -> Result<ClaudeMapping> {
        let ts = now();
        let result = sqlx::query(
            r#"
            INSERT INTO claude_mappings
                (task_id, session_uuid, message_uuid, parent_message_uuid, slug, source,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(input.task_id)
        .bind(&input.session_uuid)
        .bind(&input.message_uuid)
        .bind(&input.parent_message_uuid)
        .bind(&input.slug)
        .bind(&input.source)
        .bind(&ts)
        .bind(&ts)
        .execute(pool)
        .await?;

        let mapping =
            sqlx::query_as::<_, ClaudeMapping>("SELECT * FROM claude_mappings WHERE id = ?")
                .bind(result.last_insert_rowid())
                .fetch_one(pool)
                .await?;
        Ok(mapping)
    }

    pub async fn get_by_task(pool: &SqlitePool, task_id: i64) -> Result<Option<ClaudeMapping>> {
        let mapping =
            sqlx::query_as::<_, ClaudeMapping>("SELECT * FROM claude_mappings WHERE task_id = ?")
                .bind(task_id)
                .fetch_optional(pool)
                .await?;
        Ok(mapping)
    }

    pub async fn get_by_message_uuid(
        pool: &SqlitePool,
        message_uuid: &str,
    ) -> Result<Option<ClaudeMapping>> {
        let mapping = sqlx::query_as::<_, ClaudeMapping>(
            "SELECT * FROM claude_mappings WHERE message_uuid = ?",
        )
        .bind(message_uuid)
        .fetch_optional(pool)
        .await?;
        Ok(mapping)
    }

    pub async fn get_by_slug(pool: &SqlitePool, slug: &str) -> Result<Option<ClaudeMapping>> {
        let mapping =
            sqlx::query_as::<_, ClaudeMapping>("SELECT * FROM claude_mappings WHERE slug = ?")
                .bind(slug)
                .fetch_optional(pool)
                .await?;
        Ok(mapping)
    }

    pub async fn list_by_session(
        pool: &SqlitePool,
        session_uuid: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ClaudeMapping>> {
        let mappings = sqlx::query_as::<_, ClaudeMapping>(
            r#"
            SELECT * FROM claude_mappings
            WHERE session_uuid = ?
            ORDER BY created_at ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(session_uuid)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;
        Ok(mappings)
    }

    pub async fn update_slug(pool: &SqlitePool, task_id: i64, slug: &str) -> Result<bool> {
        let result =
            sqlx::query("UPDATE claude_mappings SET slug = ?, updated_at = ? WHERE task_id = ?")
                .bind(slug)
                .bind(now())
                .bind(task_id)
                .execute(pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(pool: &SqlitePool, task_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM claude_mappings WHERE task_id = ?")
            .bind(task_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Task chain rows and their nodes.
pub mod chains {
    use super::*;

    pub async fn create(pool: &SqlitePool, chain: &TaskChain) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO task_chains (id, session_uuid, root_message_uuid, chain_type, status,
                created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&chain.id)
        .bind(&chain.session_uuid)
        .bind(&chain.root_message_uuid)
        .bind(&chain.chain_type)
        .bind(&chain.status)
        .bind(&chain.created_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Insert one node, returning its assigned id.
    pub async fn add_node(
        pool: &SqlitePool,
        chain_id: &str,
        task_id: i64,
        parent_node_id: Option<i64>,
        node_order: i64,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO task_chain_nodes (chain_id, task_id, parent_node_id, node_order, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(chain_id)
        .bind(task_id)
        .bind(parent_node_id)
        .bind(node_order)
        .bind(now())
        .execute(pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get(pool: &SqlitePool, chain_id: &str) -> Result<Option<TaskChain>> {
        let chain = sqlx::query_as::<_, TaskChain>("SELECT * FROM task_chains WHERE id = ?")
            .bind(chain_id)
            .fetch_optional(pool)
            .await?;
        Ok(chain)
    }

    pub async fn nodes(pool: &SqlitePool, chain_id: &str) -> Result<Vec<ChainNode>> {
        let nodes = sqlx::query_as::<_, ChainNode>(
            "SELECT * FROM task_chain_nodes WHERE chain_id = ? ORDER BY node_order ASC, id ASC",
        )
        .bind(chain_id)
        .fetch_all(pool)
        .await?;
        Ok(nodes)
    }

    pub async fn list_by_session(pool: &SqlitePool, session_uuid: &str) -> Result<Vec<TaskChain>> {
        let chains = sqlx::query_as::<_, TaskChain>(
            "SELECT * FROM task_chains WHERE session_uuid = ? ORDER BY created_at DESC",
        )
        .bind(session_uuid)
        .fetch_all(pool)
        .await?;
        Ok(chains)
    }

    /// Set the chain status, stamping `started_at` on the transition into
    /// running and `completed_at` on the transition into a terminal status.
    /// Existing stamps are never overwritten.
    pub async fn update_status(
        pool: &SqlitePool,
        chain_id: &str,
        status: ChainStatus,
    ) -> Result<bool> {
        let ts = now();
        let result = sqlx::query(
            r#"
            UPDATE task_chains
            SET status = ?,
                started_at = CASE WHEN ? = 'running' AND started_at IS NULL
                    THEN ? ELSE started_at END,
                completed_at = CASE WHEN ? IN ('completed', 'failed') AND completed_at IS NULL
                    THEN ? ELSE completed_at END
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(status.as_str())
        .bind(&ts)
        .bind(status.as_str())
        .bind(&ts)
        .bind(chain_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Persisted conflict records.
pub mod conflicts {
    use super::*;

    pub async fn create(pool: &SqlitePool, conflict: &Conflict) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO conflicts (id, task_id, agent_id, kind, file_paths, description,
                severity, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&conflict.id)
        .bind(conflict.task_id)
        .bind(&conflict.agent_id)
        .bind(&conflict.kind)
        .bind(&conflict.file_paths)
        .bind(&conflict.description)
        .bind(&conflict.severity)
        .bind(&conflict.status)
        .bind(&conflict.created_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn list(pool: &SqlitePool, status: Option<&str>) -> Result<Vec<Conflict>> {
        let conflicts = if let Some(s) = status {
            sqlx::query_as::<_, Conflict>(
                "SELECT * FROM conflicts WHERE status = ? ORDER BY created_at DESC",
            )
            .bind(s)
            .fetch_all(pool)
            .await?
        } else {
            sqlx::query_as::<_, Conflict>("SELECT * FROM conflicts ORDER BY created_at DESC")
                .fetch_all(pool)
                .await?
        };
        Ok(conflicts)
    }

    pub async fn update_status(
        pool: &SqlitePool,
        conflict_id: &str,
        status: ConflictStatus,
    ) -> Result<bool> {
        let resolved_at = if status == ConflictStatus::Resolved {
            Some(now())
        } else {
            None
        };
        let result =
            sqlx::query("UPDATE conflicts SET status = ?, resolved_at = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(resolved_at)
                .bind(conflict_id)
                .execute(pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Persisted file-lock wait queue.
pub mod lock_queue {
    use super::*;

    #[allow(clippy::too_many_arguments)]
    pub async fn enqueue(
        pool: &SqlitePool,
        task_id: Option<i64>,
        worker_id: &str,
        path: &str,
        lock_type: LockType,
        line_start: Option<i64>,
        line_end: Option<i64>,
        priority: i64,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO file_lock_queue
                (task_id, worker_id, path, lock_type, line_start, line_end, priority,
                 requested_at, status)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'waiting')
            "#,
        )
        .bind(task_id)
        .bind(worker_id)
        .bind(path)
        .bind(lock_type.as_str())
        .bind(line_start)
        .bind(line_end)
        .bind(priority)
        .bind(now())
        .execute(pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Waiting entries for a path, best candidate first.
    pub async fn list_waiting(pool: &SqlitePool, path: &str) -> Result<Vec<LockWaitEntry>> {
        let entries = sqlx::query_as::<_, LockWaitEntry>(
            r#"
            SELECT * FROM file_lock_queue
            WHERE path = ? AND status = 'waiting'
            ORDER BY priority DESC, requested_at ASC, id ASC
            "#,
        )
        .bind(path)
        .fetch_all(pool)
        .await?;
        Ok(entries)
    }

    pub async fn grant(pool: &SqlitePool, entry_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE file_lock_queue SET status = 'granted' WHERE id = ? AND status = 'waiting'",
        )
        .bind(entry_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn cancel(pool: &SqlitePool, entry_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE file_lock_queue SET status = 'cancelled' WHERE id = ? AND status = 'waiting'",
        )
        .bind(entry_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Aggregated task counters.
pub mod stats {
    use super::*;

    pub async fn by_group(pool: &SqlitePool) -> Result<Vec<GroupStats>> {
        let stats = sqlx::query_as::<_, GroupStats>(
            r#"
            SELECT
                group_name,
                COUNT(*) AS total_tasks,
                SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END) AS pending_tasks,
                SUM(CASE WHEN status = 'running' THEN 1 ELSE 0 END) AS running_tasks,
                SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END) AS completed_tasks,
                SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END) AS failed_tasks
            FROM tasks
            GROUP BY group_name
            ORDER BY group_name ASC
            "#,
        )
        .fetch_all(pool)
        .await?;
        Ok(stats)
    }

    pub async fn totals(pool: &SqlitePool) -> Result<SystemStats> {
        let stats = sqlx::query_as::<_, SystemStats>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM tasks) AS total_tasks,
                (SELECT COUNT(*) FROM tasks WHERE status = 'pending') AS pending_tasks,
                (SELECT COUNT(*) FROM tasks WHERE status = 'running') AS running_tasks,
                (SELECT COUNT(*) FROM tasks WHERE status = 'completed') AS completed_tasks,
                (SELECT COUNT(*) FROM tasks WHERE status = 'failed') AS failed_tasks,
                (SELECT COUNT(*) FROM workers) AS total_workers
            "#,
        )
        .fetch_one(pool)
        .await?;
        Ok(stats)
    }
}
