//! Subtask fan-out.
//!
//! A task whose description starts with `task:` is a plan rather than a
//! command: the worker expands it into child tasks (linked through
//! `parent_id`), waits for every child to reach a terminal state, and
//! completes the parent with the aggregated child output. The children are
//! ordinary tasks in the same group, executed by whichever workers claim
//! them.

use std::collections::HashMap;

use agentflow_types::{CreateTask, Task, TaskStatus};

use crate::db;
use crate::error::{AgentFlowError, Result};
use crate::worker::{Worker, POLL_INTERVAL};

/// The plan parameters when the task is a `task:` plan.
pub(crate) fn subtask_params(task: &Task) -> Option<&str> {
    task.description
        .as_deref()
        .map(str::trim)
        .and_then(|d| d.strip_prefix("task:"))
}

/// One child to create: title and description.
struct PlannedChild {
    title: String,
    description: String,
}

/// Expand a plan type into concrete children. Unknown plan types become a
/// single child carrying the raw parameters.
fn expand_plan(plan_type: &str, subject: &str) -> Vec<PlannedChild> {
    match plan_type {
        "implement" => vec![
            PlannedChild {
                title: format!("Design the data model: {subject}"),
                description: format!("task:design_model:{subject}"),
            },
            PlannedChild {
                title: format!("Implement the core logic: {subject}"),
                description: format!("task:implement_core:{subject}"),
            },
            PlannedChild {
                title: format!("Write tests: {subject}"),
                description: format!("task:write_tests:{subject}"),
            },
        ],
        "test" => vec![
            PlannedChild {
                title: "Run unit tests".to_string(),
                description: "shell:cargo test --lib".to_string(),
            },
            PlannedChild {
                title: "Run integration tests".to_string(),
                description: "shell:cargo test --tests".to_string(),
            },
        ],
        _ => vec![PlannedChild {
            title: subject.to_string(),
            description: format!("{plan_type}:{subject}"),
        }],
    }
}

impl Worker {
    /// Execute a `task:` plan: fan out children, wait for all of them, and
    /// return the aggregated results as the parent's output.
    pub(crate) async fn execute_subtask_plan(&self, parent: &Task, params: &str) -> Result<String> {
        let (plan_type, subject) = params
            .split_once(':')
            .ok_or_else(|| {
                AgentFlowError::InvalidArgument(format!("invalid subtask plan: {params:?}"))
            })?;

        let children = expand_plan(plan_type.trim(), subject.trim());
        let mut child_ids = Vec::with_capacity(children.len());

        for child in children {
            let input = CreateTask {
                title: child.title.clone(),
                description: Some(child.description),
                group_name: Some(parent.group_name.clone()),
                parent_id: Some(parent.id),
                created_by: Some(self.id().to_string()),
                ..Default::default()
            };
            match self.create_task(&input).await {
                Ok(id) => {
                    tracing::info!(
                        parent_id = parent.id,
                        child_task_id = id,
                        title = %child.title,
                        "child task created"
                    );
                    child_ids.push(id);
                }
                Err(e) => {
                    tracing::error!(parent_id = parent.id, "child task creation failed: {e}");
                }
            }
        }

        if child_ids.is_empty() {
            return Err(AgentFlowError::Execution(
                "subtask plan produced no children".to_string(),
            ));
        }

        let outcomes = self.wait_for_children(&child_ids).await?;
        Ok(aggregate(&child_ids, &outcomes))
    }

    async fn create_task(&self, input: &CreateTask) -> Result<i64> {
        match (&self.pool, &self.client) {
            (Some(pool), _) => Ok(db::tasks::create(pool, input).await?.id),
            (None, Some(client)) => client.create_task(input).await,
            (None, None) => unreachable!(),
        }
    }

    /// Poll until every child is terminal. Transient read failures keep the
    /// child pending for the next tick.
    async fn wait_for_children(&self, child_ids: &[i64]) -> Result<HashMap<i64, Task>> {
        tracing::info!(count = child_ids.len(), "waiting for child tasks");

        let mut done: HashMap<i64, Task> = HashMap::new();
        let mut tick = tokio::time::interval(POLL_INTERVAL);

        while done.len() < child_ids.len() {
            tick.tick().await;

            for &child_id in child_ids {
                if done.contains_key(&child_id) {
                    continue;
                }
                let task = match self.fetch_task(child_id).await {
                    Ok(task) => task,
                    Err(e) => {
                        tracing::warn!(child_task_id = child_id, "child status read failed: {e}");
                        continue;
                    }
                };
                if task.is_terminal() {
                    tracing::info!(
                        child_task_id = child_id,
                        status = %task.status,
                        "child task finished"
                    );
                    done.insert(child_id, task);
                }
            }
        }

        Ok(done)
    }

    async fn fetch_task(&self, task_id: i64) -> Result<Task> {
        match (&self.pool, &self.client) {
            (Some(pool), _) => db::tasks::get(pool, task_id)
                .await?
                .ok_or(AgentFlowError::TaskNotFound(task_id)),
            (None, Some(client)) => client.get_task(task_id).await,
            (None, None) => unreachable!(),
        }
    }
}

/// Child results joined in creation order, with a trailing error section
/// when any child failed.
fn aggregate(child_ids: &[i64], outcomes: &HashMap<i64, Task>) -> String {
    let mut results = Vec::new();
    let mut errors = Vec::new();

    for child_id in child_ids {
        let Some(task) = outcomes.get(child_id) else {
            continue;
        };
        match task.status_enum() {
            TaskStatus::Completed => {
                if let Some(result) = &task.result {
                    results.push(result.clone());
                }
            }
            TaskStatus::Failed => {
                errors.push(format!(
                    "task {}: {}",
                    task.id,
                    task.error.as_deref().unwrap_or("unknown error")
                ));
            }
            _ => {}
        }
    }

    let mut output = results.join("\n\n");
    if !errors.is_empty() {
        output.push_str("\n\nErrors:\n");
        output.push_str(&errors.join("\n"));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terminal(id: i64, status: TaskStatus, text: &str) -> Task {
        Task {
            id,
            parent_id: Some(1),
            title: format!("child {id}"),
            description: None,
            group_name: "default".to_string(),
            completion_criteria: None,
            status: status.as_str().to_string(),
            priority: 0,
            lock_holder: None,
            lock_time: None,
            result: (status == TaskStatus::Completed).then(|| text.to_string()),
            error: (status == TaskStatus::Failed).then(|| text.to_string()),
            workspace_dir: None,
            sandboxed: false,
            allow_network: false,
            max_memory: None,
            max_cpu: None,
            created_by: None,
            created_at: chrono::Utc::now().to_rfc3339(),
            started_at: None,
            completed_at: Some(chrono::Utc::now().to_rfc3339()),
        }
    }

    #[test]
    fn implement_plan_expands_to_three_steps() {
        let children = expand_plan("implement", "user login");
        assert_eq!(children.len(), 3);
        assert!(children[0].description.starts_with("task:design_model:"));
        assert!(children[2].title.contains("tests"));
    }

    #[test]
    fn unknown_plan_becomes_single_child() {
        let children = expand_plan("refactor", "the parser");
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].title, "the parser");
        assert_eq!(children[0].description, "refactor:the parser");
    }

    #[test]
    fn aggregate_joins_results_and_lists_errors() {
        let ids = vec![10, 11, 12];
        let mut outcomes = HashMap::new();
        outcomes.insert(10, terminal(10, TaskStatus::Completed, "alpha"));
        outcomes.insert(11, terminal(11, TaskStatus::Failed, "boom"));
        outcomes.insert(12, terminal(12, TaskStatus::Completed, "omega"));

        let output = aggregate(&ids, &outcomes);
        assert!(output.starts_with("alpha\n\nomega"));
        assert!(output.contains("Errors:"));
        assert!(output.contains("task 11: boom"));
    }

    #[test]
    fn subtask_prefix_detection() {
        let mut task = terminal(1, TaskStatus::Pending, "");
        task.description = Some("task:implement:auth".to_string());
        assert_eq!(subtask_params(&task), Some("implement:auth"));

        task.description = Some("shell:echo hi".to_string());
        assert_eq!(subtask_params(&task), None);

        task.description = None;
        assert_eq!(subtask_params(&task), None);
    }
}
