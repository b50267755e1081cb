//! Application configuration.
//!
//! Configuration is layered: built-in defaults, then an optional YAML file,
//! then environment variables. Each binary applies its command-line flags on
//! top of the loaded [`Config`].

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{AgentFlowError, Result};

pub const DEFAULT_MASTER_PORT: u16 = 8848;
pub const DEFAULT_DB_PATH: &str = ".cpds/agentflow.db";
pub const DEFAULT_MASTER_URL: &str = "http://localhost:8848";
pub const DEFAULT_CLAUDE_SERVER_URL: &str = "http://localhost:8849";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub master: MasterConfig,
    pub worker: WorkerConfig,
    pub claude: ClaudeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    pub host: String,
    pub port: u16,
    pub db_path: String,
    pub auto_start: bool,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_MASTER_PORT,
            db_path: DEFAULT_DB_PATH.to_string(),
            auto_start: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub id: Option<String>,
    pub master_url: String,
    pub db_path: String,
    pub group_name: Option<String>,
    pub mode: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            id: None,
            master_url: DEFAULT_MASTER_URL.to_string(),
            db_path: DEFAULT_DB_PATH.to_string(),
            group_name: None,
            mode: "auto".to_string(),
        }
    }
}

/// Settings for the Claude execution service and CLI fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaudeConfig {
    pub server_url: String,
    pub model: Option<String>,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Executor call timeout in seconds.
    pub timeout: u64,
}

impl Default for ClaudeConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_CLAUDE_SERVER_URL.to_string(),
            model: None,
            max_tokens: 4096,
            temperature: 0.7,
            timeout: 120,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            master: MasterConfig::default(),
            worker: WorkerConfig::default(),
            claude: ClaudeConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with env > file > defaults precedence.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut cfg = match config_path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        cfg.apply_env();
        Ok(cfg)
    }

    /// Read configuration from a YAML file, expanding a leading `~`.
    pub fn from_file(path: &str) -> Result<Self> {
        let path = expand_home(path);
        let data = std::fs::read_to_string(&path).map_err(|e| {
            AgentFlowError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    /// Overlay environment variables onto the current values.
    pub fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("MASTER_HOST") {
            self.master.host = host;
        }
        if let Some(port) = env_parse("MASTER_PORT") {
            self.master.port = port;
        }
        if let Ok(path) = std::env::var("MASTER_DB_PATH") {
            self.master.db_path = path;
        }
        if let Some(auto) = env_bool("MASTER_AUTO_START") {
            self.master.auto_start = auto;
        }

        if let Ok(id) = std::env::var("WORKER_ID") {
            self.worker.id = Some(id);
        }
        if let Ok(url) = std::env::var("WORKER_MASTER_URL") {
            self.worker.master_url = url;
        }
        if let Ok(path) = std::env::var("WORKER_DB_PATH") {
            self.worker.db_path = path;
        }
        if let Ok(group) = std::env::var("WORKER_GROUP_NAME") {
            self.worker.group_name = Some(group);
        }
        if let Ok(mode) = std::env::var("WORKER_MODE") {
            self.worker.mode = mode;
        }

        if let Ok(url) = std::env::var("CLAUDE_SERVER_URL") {
            self.claude.server_url = url;
        }
        if let Ok(model) = std::env::var("CLAUDE_MODEL") {
            self.claude.model = Some(model);
        }
        if let Some(tokens) = env_parse("CLAUDE_MAX_TOKENS") {
            self.claude.max_tokens = tokens;
        }
        if let Some(temp) = env_parse("CLAUDE_TEMPERATURE") {
            self.claude.temperature = temp;
        }
        if let Some(timeout) = env_parse("CLAUDE_TIMEOUT") {
            self.claude.timeout = timeout;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.master.port == 0 {
            return Err(AgentFlowError::InvalidConfig(format!(
                "invalid master port: {}",
                self.master.port
            )));
        }
        if self.worker.master_url.is_empty() {
            return Err(AgentFlowError::InvalidConfig(
                "worker master_url cannot be empty".to_string(),
            ));
        }
        if self.claude.max_tokens == 0 {
            return Err(AgentFlowError::InvalidConfig(
                "claude max_tokens must be positive".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.claude.temperature) {
            return Err(AgentFlowError::InvalidConfig(format!(
                "invalid claude temperature: {} (must be 0-2)",
                self.claude.temperature
            )));
        }
        if self.claude.timeout == 0 {
            return Err(AgentFlowError::InvalidConfig(
                "claude timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key).ok().map(|v| v == "true" || v == "1")
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}
