use serde::{Deserialize, Serialize};

#[cfg(feature = "sqlx")]
use sqlx::FromRow;

/// A worker is considered dead once its last heartbeat is older than this.
/// Must stay above twice the heartbeat interval (30s).
pub const WORKER_DEAD_AFTER_SECS: i64 = 90;

/// Where a worker runs relative to the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkerType {
    /// Shares the master's database file directly.
    Local,
    /// Talks to the master over the HTTP API.
    #[default]
    Remote,
}

impl WorkerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerType::Local => "local",
            WorkerType::Remote => "remote",
        }
    }
}

impl std::str::FromStr for WorkerType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(WorkerType::Local),
            "remote" => Ok(WorkerType::Remote),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    #[default]
    Active,
    Inactive,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Active => "active",
            WorkerStatus::Inactive => "inactive",
        }
    }
}

impl std::str::FromStr for WorkerStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(WorkerStatus::Active),
            "inactive" => Ok(WorkerStatus::Inactive),
            _ => Err(()),
        }
    }
}

/// A registered worker process.
///
/// Workers are upserted on registration and refreshed on every heartbeat;
/// liveness is derived from `last_heartbeat`, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(FromRow))]
pub struct Worker {
    pub id: String,
    pub group_name: String,
    pub worker_type: String,
    /// Free-form JSON blob describing the host (os, arch, cpu count, markers).
    pub capabilities: String,
    pub status: String,
    pub last_heartbeat: String,
    pub created_at: String,
}

impl Worker {
    pub fn status_enum(&self) -> WorkerStatus {
        self.status.parse().unwrap_or_default()
    }

    pub fn type_enum(&self) -> WorkerType {
        self.worker_type.parse().unwrap_or_default()
    }

    /// Parse the capabilities JSON blob, or an empty object when malformed.
    pub fn capabilities_json(&self) -> serde_json::Value {
        serde_json::from_str(&self.capabilities)
            .unwrap_or_else(|_| serde_json::Value::Object(Default::default()))
    }

    /// A worker is alive iff its last heartbeat is within the dead threshold.
    pub fn is_alive(&self) -> bool {
        if let Ok(beat) = chrono::DateTime::parse_from_rfc3339(&self.last_heartbeat) {
            let age = chrono::Utc::now().signed_duration_since(beat);
            return age <= chrono::Duration::seconds(WORKER_DEAD_AFTER_SECS);
        }
        false
    }
}

/// Input for registering (or re-registering) a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterWorker {
    pub id: String,
    pub group_name: String,
    pub worker_type: WorkerType,
    /// JSON blob; callers typically use [`detect_capabilities`].
    #[serde(default)]
    pub capabilities: String,
}

/// Describe the current host for worker registration.
pub fn detect_capabilities() -> String {
    let mut caps = serde_json::json!({
        "os": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "cpu_num": std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
    });
    if std::path::Path::new("/.dockerenv").exists() {
        caps["docker"] = serde_json::Value::Bool(true);
    }
    if std::path::Path::new("/var/run/secrets/kubernetes.io").exists() {
        caps["kubernetes"] = serde_json::Value::Bool(true);
    }
    caps.to_string()
}
