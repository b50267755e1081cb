//! The ordered executor fallback.
//!
//! Four strategies share one trait and run as a fold over the chain: the
//! first applicable strategy that succeeds wins. A transient failure falls
//! through to the next level; `PermissionDenied` is terminal, as is any
//! outcome of the prefix dispatcher (retrying an explicit `shell:` command
//! against an AI backend would be nonsense).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use agentflow_types::Task;

use crate::config::ClaudeConfig;
use crate::error::{AgentFlowError, Result};
use crate::worker::safety::SafetyPolicy;

const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[async_trait]
pub trait ExecutorStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this strategy can take the task right now.
    async fn available(&self, task: &Task) -> bool;

    async fn run(&self, task: &Task) -> Result<String>;

    /// A terminal strategy's failure does not fall through.
    fn terminal(&self) -> bool {
        false
    }
}

/// The ordered chain itself.
pub struct ExecutorChain {
    strategies: Vec<Box<dyn ExecutorStrategy>>,
}

impl ExecutorChain {
    /// The standard four-level chain: prefix dispatch, Claude HTTP server,
    /// Claude CLI, plain shell.
    pub fn standard(claude: &ClaudeConfig, worker_id: &str, safety: SafetyPolicy) -> Self {
        let safety = Arc::new(safety);
        Self {
            strategies: vec![
                Box::new(PrefixExecutor {
                    safety: Arc::clone(&safety),
                }),
                Box::new(HttpExecutor::new(claude, worker_id)),
                Box::new(CliExecutor::discover()),
                Box::new(ShellExecutor { safety }),
            ],
        }
    }

    #[cfg(test)]
    pub fn with_strategies(strategies: Vec<Box<dyn ExecutorStrategy>>) -> Self {
        Self { strategies }
    }

    /// Fold over the strategies in priority order.
    pub async fn execute(&self, task: &Task) -> Result<String> {
        let mut last_error: Option<AgentFlowError> = None;

        for strategy in &self.strategies {
            if !strategy.available(task).await {
                continue;
            }

            tracing::info!(task_id = task.id, strategy = strategy.name(), "executing task");
            match strategy.run(task).await {
                Ok(output) => return Ok(output),
                Err(e @ AgentFlowError::PermissionDenied(_)) => return Err(e),
                Err(e) if strategy.terminal() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        task_id = task.id,
                        strategy = strategy.name(),
                        "strategy failed, falling through: {e}"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            AgentFlowError::Execution("no executor strategy accepted the task".to_string())
        }))
    }
}

fn description(task: &Task) -> &str {
    task.description.as_deref().unwrap_or("").trim()
}

/// Level 1: explicit `shell:` / `script:` prefixes run verbatim.
struct PrefixExecutor {
    safety: Arc<SafetyPolicy>,
}

#[async_trait]
impl ExecutorStrategy for PrefixExecutor {
    fn name(&self) -> &'static str {
        "prefix"
    }

    async fn available(&self, task: &Task) -> bool {
        let desc = description(task);
        desc.starts_with("shell:") || desc.starts_with("script:")
    }

    async fn run(&self, task: &Task) -> Result<String> {
        let desc = description(task);
        let workspace = task.workspace_dir.as_deref();

        if let Some(command) = desc.strip_prefix("shell:") {
            self.safety.run_shell(command.trim(), workspace).await
        } else if let Some(script) = desc.strip_prefix("script:") {
            self.safety.run_script(script.trim(), workspace).await
        } else {
            Err(AgentFlowError::Execution("no dispatch prefix".to_string()))
        }
    }

    fn terminal(&self) -> bool {
        true
    }
}

/// Level 2: the Claude execution server, when its health probe answers.
pub struct HttpExecutor {
    server_url: String,
    probe: Client,
    client: Client,
    worker_id: String,
}

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    #[serde(default)]
    output: String,
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    tokens_used: i64,
}

impl HttpExecutor {
    pub fn new(claude: &ClaudeConfig, worker_id: &str) -> Self {
        let probe = Client::builder()
            .timeout(HEALTH_PROBE_TIMEOUT)
            .build()
            .unwrap_or_default();
        let client = Client::builder()
            .timeout(Duration::from_secs(claude.timeout))
            .build()
            .unwrap_or_default();
        Self {
            server_url: claude.server_url.trim_end_matches('/').to_string(),
            probe,
            client,
            worker_id: worker_id.to_string(),
        }
    }
}

#[async_trait]
impl ExecutorStrategy for HttpExecutor {
    fn name(&self) -> &'static str {
        "claude-http"
    }

    async fn available(&self, _task: &Task) -> bool {
        let url = format!("{}/health", self.server_url);
        match self.probe.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn run(&self, task: &Task) -> Result<String> {
        let started = std::time::Instant::now();
        let body = serde_json::json!({
            "task_id": task.id,
            "title": task.title,
            "description": description(task),
            "worker_id": self.worker_id,
        });

        let response = self
            .client
            .post(format!("{}/execute", self.server_url))
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AgentFlowError::Execution(format!(
                "claude server returned {}",
                response.status()
            )));
        }

        let parsed: ExecuteResponse = response.json().await?;
        tracing::info!(
            task_id = task.id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            tokens_used = parsed.tokens_used,
            "claude server execution finished"
        );

        if parsed.success {
            Ok(parsed.output)
        } else {
            Err(AgentFlowError::Execution(
                parsed.error.unwrap_or_else(|| "execution failed".to_string()),
            ))
        }
    }
}

/// Level 3: the `claudecli` binary, when present on the search path.
pub struct CliExecutor {
    cli_path: Option<PathBuf>,
}

impl CliExecutor {
    pub fn discover() -> Self {
        let cli_path = find_in_path("claudecli");
        match &cli_path {
            Some(path) => tracing::info!("claude CLI found: {}", path.display()),
            None => tracing::debug!("claude CLI not found in PATH"),
        }
        Self { cli_path }
    }
}

#[async_trait]
impl ExecutorStrategy for CliExecutor {
    fn name(&self) -> &'static str {
        "claude-cli"
    }

    async fn available(&self, _task: &Task) -> bool {
        self.cli_path.is_some()
    }

    async fn run(&self, task: &Task) -> Result<String> {
        let cli = self
            .cli_path
            .as_ref()
            .ok_or_else(|| AgentFlowError::Execution("claudecli not available".to_string()))?;

        let output = tokio::process::Command::new(cli)
            .args(["chat", "--prompt", description(task), "--no-interactive"])
            .kill_on_drop(true)
            .output()
            .await?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if output.status.success() {
            Ok(combined)
        } else {
            Err(AgentFlowError::Execution(format!(
                "claudecli exited with {}: {}",
                output.status.code().unwrap_or(-1),
                combined.trim()
            )))
        }
    }
}

/// Level 4: the task description as a plain shell command.
struct ShellExecutor {
    safety: Arc<SafetyPolicy>,
}

#[async_trait]
impl ExecutorStrategy for ShellExecutor {
    fn name(&self) -> &'static str {
        "shell"
    }

    async fn available(&self, task: &Task) -> bool {
        !description(task).is_empty()
    }

    async fn run(&self, task: &Task) -> Result<String> {
        self.safety
            .run_shell(description(task), task.workspace_dir.as_deref())
            .await
    }
}

fn find_in_path(binary: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(binary);
        if candidate.is_file() {
            return Some(candidate);
        }
        #[cfg(windows)]
        {
            let exe = dir.join(format!("{binary}.exe"));
            if exe.is_file() {
                return Some(exe);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_with_description(desc: &str) -> Task {
        Task {
            id: 1,
            parent_id: None,
            title: "test".to_string(),
            description: Some(desc.to_string()),
            group_name: "default".to_string(),
            completion_criteria: None,
            status: "running".to_string(),
            priority: 0,
            lock_holder: Some("w1".to_string()),
            lock_time: None,
            result: None,
            error: None,
            workspace_dir: None,
            sandboxed: false,
            allow_network: false,
            max_memory: None,
            max_cpu: None,
            created_by: None,
            created_at: chrono::Utc::now().to_rfc3339(),
            started_at: None,
            completed_at: None,
        }
    }

    struct FixedStrategy {
        name: &'static str,
        applies: bool,
        outcome: std::result::Result<&'static str, &'static str>,
    }

    #[async_trait]
    impl ExecutorStrategy for FixedStrategy {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn available(&self, _task: &Task) -> bool {
            self.applies
        }

        async fn run(&self, _task: &Task) -> Result<String> {
            match self.outcome {
                Ok(out) => Ok(out.to_string()),
                Err(msg) => Err(AgentFlowError::Execution(msg.to_string())),
            }
        }
    }

    #[tokio::test]
    async fn fold_falls_through_transient_failures() {
        let chain = ExecutorChain::with_strategies(vec![
            Box::new(FixedStrategy {
                name: "skipped",
                applies: false,
                outcome: Ok("unreachable"),
            }),
            Box::new(FixedStrategy {
                name: "flaky",
                applies: true,
                outcome: Err("transient"),
            }),
            Box::new(FixedStrategy {
                name: "solid",
                applies: true,
                outcome: Ok("done"),
            }),
        ]);

        let output = chain.execute(&task_with_description("x")).await.unwrap();
        assert_eq!(output, "done");
    }

    #[tokio::test]
    async fn exhaustion_surfaces_last_error() {
        let chain = ExecutorChain::with_strategies(vec![
            Box::new(FixedStrategy {
                name: "a",
                applies: true,
                outcome: Err("first"),
            }),
            Box::new(FixedStrategy {
                name: "b",
                applies: true,
                outcome: Err("second"),
            }),
        ]);

        let err = chain.execute(&task_with_description("x")).await.unwrap_err();
        match err {
            AgentFlowError::Execution(msg) => assert!(msg.contains("second")),
            other => panic!("unexpected error: {other}"),
        }
    }

    struct DenyingStrategy;

    #[async_trait]
    impl ExecutorStrategy for DenyingStrategy {
        fn name(&self) -> &'static str {
            "deny"
        }

        async fn available(&self, _task: &Task) -> bool {
            true
        }

        async fn run(&self, _task: &Task) -> Result<String> {
            Err(AgentFlowError::PermissionDenied("nope".to_string()))
        }
    }

    #[tokio::test]
    async fn permission_denied_is_terminal() {
        let chain = ExecutorChain::with_strategies(vec![
            Box::new(DenyingStrategy),
            Box::new(FixedStrategy {
                name: "never",
                applies: true,
                outcome: Ok("unreachable"),
            }),
        ]);

        let err = chain.execute(&task_with_description("x")).await.unwrap_err();
        assert!(matches!(err, AgentFlowError::PermissionDenied(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn prefix_dispatch_runs_shell_commands() {
        let chain = ExecutorChain::with_strategies(vec![Box::new(PrefixExecutor {
            safety: Arc::new(SafetyPolicy::default()),
        })]);

        let output = chain
            .execute(&task_with_description("shell: echo prefixed"))
            .await
            .unwrap();
        assert!(output.contains("prefixed"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn prefix_failure_does_not_fall_through() {
        let chain = ExecutorChain::with_strategies(vec![
            Box::new(PrefixExecutor {
                safety: Arc::new(SafetyPolicy::default()),
            }),
            Box::new(FixedStrategy {
                name: "fallback",
                applies: true,
                outcome: Ok("should not run"),
            }),
        ]);

        let err = chain
            .execute(&task_with_description("shell: exit 9"))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentFlowError::Execution(_)));
    }

    #[tokio::test]
    async fn unavailable_http_executor_is_skipped() {
        // Nothing listens on this port; the 2s probe fails fast and the
        // chain reports exhaustion rather than hanging.
        let claude = ClaudeConfig {
            server_url: "http://127.0.0.1:1".to_string(),
            ..Default::default()
        };
        let chain =
            ExecutorChain::with_strategies(vec![Box::new(HttpExecutor::new(&claude, "w1"))]);

        let err = chain.execute(&task_with_description("x")).await.unwrap_err();
        assert!(matches!(err, AgentFlowError::Execution(_)));
    }
}
