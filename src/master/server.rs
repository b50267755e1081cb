//! Master HTTP server: state, router, and error mapping.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use sqlx::SqlitePool;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::error::{AgentFlowError, Result};
use crate::master::routes;
use crate::master::supervisor::Supervisor;

/// Shared state for all request handlers. Handlers are thin: the pool is
/// the only mutable state and it protects itself.
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Config,
    pub supervisor: Arc<Supervisor>,
}

impl AppState {
    pub fn new(pool: SqlitePool, config: Config) -> Self {
        let supervisor = Arc::new(Supervisor::new(
            format!("http://localhost:{}", config.master.port),
            config.master.db_path.clone(),
        ));
        Self {
            pool,
            config,
            supervisor,
        }
    }
}

/// Build the full router. Split out from [`serve`] so tests can drive the
/// app without binding a fixed port.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/tasks", post(routes::create_task).get(routes::list_tasks))
        .route("/tasks/pending", get(routes::fetch_pending))
        .route("/tasks/:id", get(routes::get_task))
        .route("/tasks/:id/lock", post(routes::lock_task))
        .route("/tasks/:id/unlock", post(routes::unlock_task))
        .route("/tasks/:id/complete", post(routes::complete_task))
        .route("/tasks/:id/fail", post(routes::fail_task))
        .route("/workers", get(routes::list_workers))
        .route("/workers/:id/register", post(routes::register_worker))
        .route("/workers/:id/heartbeat", post(routes::worker_heartbeat))
        .route("/stats", get(routes::get_stats))
        .route("/stats/groups", get(routes::get_group_stats));

    Router::new()
        .nest("/api/v1", api)
        .route("/health", get(routes::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the process is stopped. Supervised workers are
/// started first when configured.
pub async fn serve(state: AppState, addr: SocketAddr) -> Result<()> {
    if state.config.master.auto_start {
        state.supervisor.start_local_workers();
    }

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        AgentFlowError::InvalidConfig(format!("cannot bind {}: {}", addr, e))
    })?;

    tracing::info!(%addr, "master listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// JSON error envelope: every failure body is `{"error": "<message>"}` with
/// the status drawn from the error taxonomy.
pub struct ApiError(pub AgentFlowError);

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            AgentFlowError::InvalidArgument(_) | AgentFlowError::InvalidConfig(_) => {
                StatusCode::BAD_REQUEST
            }
            AgentFlowError::TaskNotFound(_)
            | AgentFlowError::WorkerNotFound(_)
            | AgentFlowError::ChainNotFound(_)
            | AgentFlowError::MappingNotFound(_) => StatusCode::NOT_FOUND,
            AgentFlowError::Conflict(_)
            | AgentFlowError::AlreadyLocked { .. }
            | AgentFlowError::ResourceBusy(_) => StatusCode::CONFLICT,
            AgentFlowError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed: {}", self.0);
        }
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

impl From<AgentFlowError> for ApiError {
    fn from(err: AgentFlowError) -> Self {
        Self(err)
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
