//! Request handlers for the master API.
//!
//! Each handler validates its input, calls one or two store operations, and
//! maps the result. Failure bodies are `{"error": ...}` via
//! [`ApiError`](crate::master::server::ApiError).

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use agentflow_types::{CreateTask, RegisterWorker, TaskStatus, WorkerType};

use crate::db;
use crate::error::AgentFlowError;
use crate::master::server::{ApiResult, AppState};

/// How many pending tasks one fetch hands out.
const PENDING_FETCH_LIMIT: i64 = 10;

#[derive(Debug, Deserialize)]
pub struct TaskFilter {
    pub status: Option<String>,
    pub group: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GroupFilter {
    pub group: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WorkerBody {
    pub worker_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CompleteBody {
    pub worker_id: String,
    #[serde(default)]
    pub result: String,
}

#[derive(Debug, Deserialize)]
pub struct FailBody {
    pub worker_id: String,
    #[serde(default)]
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterBody {
    pub group_name: String,
    #[serde(default)]
    pub worker_type: Option<WorkerType>,
    #[serde(default)]
    pub capabilities: Option<String>,
}

pub async fn create_task(
    State(state): State<AppState>,
    Json(input): Json<CreateTask>,
) -> ApiResult<Response> {
    if input.title.trim().is_empty() {
        return Err(AgentFlowError::InvalidArgument("title is required".to_string()).into());
    }
    if let Some(group) = &input.group_name {
        if group.trim().is_empty() || group.contains(char::is_whitespace) {
            return Err(
                AgentFlowError::InvalidArgument(format!("invalid group name: {group:?}")).into(),
            );
        }
    }

    let task = db::tasks::create(&state.pool, &input).await?;
    tracing::info!(task_id = task.id, title = %task.title, group = %task.group_name, "task created");

    Ok((StatusCode::CREATED, Json(json!({ "task_id": task.id }))).into_response())
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Query(filter): Query<TaskFilter>,
) -> ApiResult<Response> {
    if let Some(status) = &filter.status {
        if status.parse::<TaskStatus>().is_err() {
            return Err(
                AgentFlowError::InvalidArgument(format!("unknown status: {status}")).into(),
            );
        }
    }

    let tasks = db::tasks::list(&state.pool, filter.status.as_deref(), filter.group.as_deref())
        .await?;
    Ok(Json(json!({ "tasks": tasks })).into_response())
}

pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Response> {
    let task = db::tasks::get(&state.pool, id)
        .await?
        .ok_or(AgentFlowError::TaskNotFound(id))?;
    Ok(Json(task).into_response())
}

/// Pending tasks for one group. An empty set is a distinguished 204.
pub async fn fetch_pending(
    State(state): State<AppState>,
    Query(filter): Query<GroupFilter>,
) -> ApiResult<Response> {
    let group = filter.group.unwrap_or_else(|| "default".to_string());
    let tasks = db::tasks::list_pending(&state.pool, &group, PENDING_FETCH_LIMIT).await?;

    if tasks.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    Ok(Json(json!({ "tasks": tasks })).into_response())
}

pub async fn lock_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<WorkerBody>,
) -> ApiResult<Response> {
    if db::tasks::get(&state.pool, id).await?.is_none() {
        return Err(AgentFlowError::TaskNotFound(id).into());
    }

    let won = db::tasks::try_claim(&state.pool, id, &body.worker_id).await?;
    if !won {
        return Ok((
            StatusCode::CONFLICT,
            Json(json!({ "status": "already_locked" })),
        )
            .into_response());
    }

    tracing::info!(task_id = id, worker_id = %body.worker_id, "task locked");
    Ok(Json(json!({ "status": "locked" })).into_response())
}

pub async fn unlock_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<WorkerBody>,
) -> ApiResult<Response> {
    db::tasks::release_claim(&state.pool, id, &body.worker_id).await?;
    Ok(Json(json!({ "status": "unlocked" })).into_response())
}

pub async fn complete_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<CompleteBody>,
) -> ApiResult<Response> {
    let updated = db::tasks::mark_completed(&state.pool, id, &body.worker_id, &body.result).await?;
    if !updated {
        return report_noop(&state, id, &body.worker_id).await;
    }

    tracing::info!(task_id = id, worker_id = %body.worker_id, "task completed");
    Ok(Json(json!({ "status": "completed" })).into_response())
}

pub async fn fail_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<FailBody>,
) -> ApiResult<Response> {
    let updated = db::tasks::mark_failed(&state.pool, id, &body.worker_id, &body.error).await?;
    if !updated {
        return report_noop(&state, id, &body.worker_id).await;
    }

    tracing::warn!(task_id = id, worker_id = %body.worker_id, error = %body.error, "task failed");
    Ok(Json(json!({ "status": "failed" })).into_response())
}

/// A report that updated no row is fine when the task already reached a
/// terminal state (retry of a delivered report); anything else means the
/// caller is not the holder.
async fn report_noop(state: &AppState, id: i64, worker_id: &str) -> ApiResult<Response> {
    let task = db::tasks::get(&state.pool, id)
        .await?
        .ok_or(AgentFlowError::TaskNotFound(id))?;

    if task.is_terminal() {
        return Ok(Json(json!({ "status": task.status })).into_response());
    }

    Err(AgentFlowError::Conflict(format!(
        "worker {} does not hold the claim on task {}",
        worker_id, id
    ))
    .into())
}

pub async fn list_workers(
    State(state): State<AppState>,
    Query(filter): Query<GroupFilter>,
) -> ApiResult<Response> {
    let workers = db::workers::list(&state.pool, filter.group.as_deref()).await?;
    Ok(Json(json!({ "workers": workers })).into_response())
}

pub async fn register_worker(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RegisterBody>,
) -> ApiResult<Response> {
    if id.trim().is_empty() || body.group_name.trim().is_empty() {
        return Err(AgentFlowError::InvalidArgument(
            "worker id and group_name are required".to_string(),
        )
        .into());
    }

    let registration = RegisterWorker {
        id,
        group_name: body.group_name,
        worker_type: body.worker_type.unwrap_or_default(),
        capabilities: body.capabilities.unwrap_or_default(),
    };
    db::workers::upsert(&state.pool, &registration).await?;

    tracing::info!(worker_id = %registration.id, group = %registration.group_name, "worker registered");
    Ok(Json(json!({ "status": "registered" })).into_response())
}

pub async fn worker_heartbeat(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let known = db::workers::touch_heartbeat(&state.pool, &id).await?;
    if !known {
        return Err(AgentFlowError::WorkerNotFound(id).into());
    }
    Ok(Json(json!({ "status": "ok" })).into_response())
}

pub async fn get_stats(State(state): State<AppState>) -> ApiResult<Response> {
    let stats = db::stats::totals(&state.pool).await?;
    Ok(Json(json!({ "stats": stats })).into_response())
}

pub async fn get_group_stats(State(state): State<AppState>) -> ApiResult<Response> {
    let stats = db::stats::by_group(&state.pool).await?;
    Ok(Json(json!({ "group_stats": stats })).into_response())
}

pub async fn health() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}
