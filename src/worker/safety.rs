//! Execution safety policy.
//!
//! Three independent switches, each settable from the environment:
//! `READ_ONLY` rejects anything that could mutate state, `SANDBOXED` wraps
//! commands in a container rooted at the workspace, and `RESTRICT_PATH`
//! pins execution to an absolute workspace directory. Applied to the
//! prefix-dispatch and shell executors before anything runs.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::error::{AgentFlowError, Result};

#[derive(Debug, Clone, Default)]
pub struct SafetyPolicy {
    pub workspace_dir: Option<PathBuf>,
    pub read_only: bool,
    pub sandboxed: bool,
    pub restrict_path: bool,
}

impl SafetyPolicy {
    /// Build the policy from `WORKSPACE_DIR`, `READ_ONLY`, `SANDBOXED` and
    /// `RESTRICT_PATH`.
    pub fn from_env() -> Self {
        Self {
            workspace_dir: std::env::var("WORKSPACE_DIR").ok().map(PathBuf::from),
            read_only: env_true("READ_ONLY"),
            sandboxed: env_true("SANDBOXED"),
            restrict_path: env_true("RESTRICT_PATH"),
        }
    }

    /// Run a shell command under the policy, returning combined
    /// stdout+stderr.
    pub async fn run_shell(&self, command: &str, task_workspace: Option<&str>) -> Result<String> {
        if self.read_only {
            return Err(AgentFlowError::PermissionDenied(
                "read-only mode forbids command execution".to_string(),
            ));
        }

        if self.sandboxed {
            return self.run_in_sandbox(command).await;
        }

        let workdir = self.effective_workdir(task_workspace)?;
        run_platform_shell(command, workdir.as_deref()).await
    }

    /// Run a script file under the policy.
    pub async fn run_script(&self, script_path: &str, task_workspace: Option<&str>) -> Result<String> {
        if self.read_only {
            return Err(AgentFlowError::PermissionDenied(
                "read-only mode forbids script execution".to_string(),
            ));
        }

        let workdir = self.effective_workdir(task_workspace)?;

        if self.restrict_path {
            let script = std::path::absolute(script_path)?;
            let root = workdir.clone().ok_or_else(|| {
                AgentFlowError::PermissionDenied(
                    "restricted mode requires a workspace directory".to_string(),
                )
            })?;
            if !script.starts_with(&root) {
                return Err(AgentFlowError::PermissionDenied(format!(
                    "script {} is outside the workspace {}",
                    script.display(),
                    root.display()
                )));
            }
        }

        let mut cmd = script_command(script_path);
        if let Some(dir) = &workdir {
            cmd.current_dir(dir);
        }
        run_command(cmd).await
    }

    /// Resolve the working directory, enforcing absoluteness when restricted.
    /// The task's own workspace overrides the policy default.
    fn effective_workdir(&self, task_workspace: Option<&str>) -> Result<Option<PathBuf>> {
        let dir = task_workspace
            .map(PathBuf::from)
            .or_else(|| self.workspace_dir.clone());

        if self.restrict_path {
            match &dir {
                Some(d) if d.is_absolute() => {}
                _ => {
                    return Err(AgentFlowError::PermissionDenied(
                        "restricted mode requires an absolute workspace directory".to_string(),
                    ))
                }
            }
        }
        Ok(dir)
    }

    /// Wrap the command in a disposable container mounted on the workspace.
    async fn run_in_sandbox(&self, command: &str) -> Result<String> {
        let workspace = self
            .workspace_dir
            .as_deref()
            .unwrap_or(Path::new("."))
            .to_string_lossy()
            .into_owned();

        let mut cmd = Command::new("docker");
        cmd.args([
            "run",
            "--rm",
            "-v",
            &format!("{}:/workspace", workspace),
            "-w",
            "/workspace",
            "alpine",
            "sh",
            "-c",
            command,
        ]);
        run_command(cmd).await
    }
}

/// `sh -c` everywhere except Windows, which gets `cmd /c`.
async fn run_platform_shell(command: &str, workdir: Option<&Path>) -> Result<String> {
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.args(["/c", command]);
        c
    } else {
        let mut c = Command::new("sh");
        c.args(["-c", command]);
        c
    };
    if let Some(dir) = workdir {
        cmd.current_dir(dir);
    }
    run_command(cmd).await
}

fn script_command(script_path: &str) -> Command {
    if cfg!(windows) {
        if script_path.ends_with(".ps1") {
            let mut c = Command::new("powershell");
            c.args(["-File", script_path]);
            c
        } else {
            let mut c = Command::new("cmd");
            c.args(["/c", script_path]);
            c
        }
    } else {
        Command::new(script_path)
    }
}

async fn run_command(mut cmd: Command) -> Result<String> {
    cmd.stdin(Stdio::null()).kill_on_drop(true);
    let output = cmd.output().await?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    if output.status.success() {
        Ok(combined)
    } else {
        Err(AgentFlowError::Execution(format!(
            "command exited with {}: {}",
            output.status.code().unwrap_or(-1),
            combined.trim()
        )))
    }
}

fn env_true(key: &str) -> bool {
    std::env::var(key).map(|v| v == "true" || v == "1").unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_only_rejects_commands_and_scripts() {
        let policy = SafetyPolicy {
            read_only: true,
            ..Default::default()
        };

        assert!(matches!(
            policy.run_shell("echo hi", None).await,
            Err(AgentFlowError::PermissionDenied(_))
        ));
        assert!(matches!(
            policy.run_script("./build.sh", None).await,
            Err(AgentFlowError::PermissionDenied(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shell_captures_combined_output() {
        let policy = SafetyPolicy::default();
        let output = policy
            .run_shell("echo out; echo err 1>&2", None)
            .await
            .unwrap();
        assert!(output.contains("out"));
        assert!(output.contains("err"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_command_reports_exit_code() {
        let policy = SafetyPolicy::default();
        let err = policy.run_shell("exit 3", None).await.unwrap_err();
        match err {
            AgentFlowError::Execution(msg) => assert!(msg.contains("3")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn restricted_mode_requires_absolute_workdir() {
        let policy = SafetyPolicy {
            restrict_path: true,
            workspace_dir: Some(PathBuf::from("relative/dir")),
            ..Default::default()
        };
        assert!(matches!(
            policy.run_shell("echo hi", None).await,
            Err(AgentFlowError::PermissionDenied(_))
        ));

        // An absolute task workspace satisfies the check.
        let tmp = tempfile::TempDir::new().unwrap();
        let ok = policy
            .run_shell("echo hi", Some(tmp.path().to_str().unwrap()))
            .await;
        #[cfg(unix)]
        assert!(ok.is_ok());
        let _ = ok;
    }

    #[tokio::test]
    async fn restricted_mode_fences_script_paths() {
        let tmp = tempfile::TempDir::new().unwrap();
        let policy = SafetyPolicy {
            restrict_path: true,
            workspace_dir: Some(tmp.path().to_path_buf()),
            ..Default::default()
        };

        let err = policy.run_script("/usr/bin/env", None).await.unwrap_err();
        assert!(matches!(err, AgentFlowError::PermissionDenied(_)));
    }
}
