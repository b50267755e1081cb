use thiserror::Error;

/// Process exit codes shared by the three binaries.
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const INTERNAL: i32 = 1;
    pub const USER_ERROR: i32 = 2;
    pub const NOT_FOUND: i32 = 3;
    pub const CONFLICT: i32 = 4;
    pub const DENIED: i32 = 5;
}

#[derive(Error, Debug)]
pub enum AgentFlowError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Task not found: {0}")]
    TaskNotFound(i64),

    #[error("Worker not found: {0}")]
    WorkerNotFound(String),

    #[error("Chain not found: {0}")]
    ChainNotFound(String),

    #[error("Claude mapping not found: {0}")]
    MappingNotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Task {task_id} is locked by {holder}")]
    AlreadyLocked { task_id: i64, holder: String },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Resource busy: {0}")]
    ResourceBusy(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Git operation failed: {0}")]
    Git(String),

    #[error("Master API error: {0}")]
    MasterApi(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl AgentFlowError {
    pub fn exit_code(&self) -> i32 {
        match self {
            AgentFlowError::InvalidArgument(_) | AgentFlowError::InvalidConfig(_) => {
                exit_codes::USER_ERROR
            }

            AgentFlowError::TaskNotFound(_)
            | AgentFlowError::WorkerNotFound(_)
            | AgentFlowError::ChainNotFound(_)
            | AgentFlowError::MappingNotFound(_) => exit_codes::NOT_FOUND,

            AgentFlowError::Conflict(_) | AgentFlowError::AlreadyLocked { .. } => {
                exit_codes::CONFLICT
            }

            AgentFlowError::PermissionDenied(_) | AgentFlowError::ResourceBusy(_) => {
                exit_codes::DENIED
            }

            AgentFlowError::Execution(_)
            | AgentFlowError::Git(_)
            | AgentFlowError::MasterApi(_)
            | AgentFlowError::Database(_)
            | AgentFlowError::Migration(_)
            | AgentFlowError::Io(_)
            | AgentFlowError::Json(_)
            | AgentFlowError::Yaml(_)
            | AgentFlowError::Http(_) => exit_codes::INTERNAL,
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentFlowError>;
