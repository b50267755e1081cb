//! HTTP client for the master API, used by remote workers.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;

use agentflow_types::{CreateTask, RegisterWorker, Task};

use crate::error::{AgentFlowError, Result};

const HTTP_TIMEOUT_SECS: u64 = 30;

pub struct MasterClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct TasksResponse {
    tasks: Vec<Task>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

impl MasterClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Submit a new task, returning its assigned id.
    pub async fn create_task(&self, input: &CreateTask) -> Result<i64> {
        let url = format!("{}/api/v1/tasks", self.base_url);
        let response = self.client.post(&url).json(input).send().await?;
        if response.status() != StatusCode::CREATED {
            return Err(api_error(response).await);
        }

        #[derive(Deserialize)]
        struct Created {
            task_id: i64,
        }
        let body: Created = response.json().await?;
        Ok(body.task_id)
    }

    /// Pending tasks for a group. An empty list is the master's 204 answer.
    pub async fn fetch_pending(&self, group: &str) -> Result<Vec<Task>> {
        let url = format!("{}/api/v1/tasks/pending?group={}", self.base_url, group);
        let response = self.client.get(&url).send().await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        let body: TasksResponse = response.json().await?;
        Ok(body.tasks)
    }

    pub async fn get_task(&self, task_id: i64) -> Result<Task> {
        let url = format!("{}/api/v1/tasks/{}", self.base_url, task_id);
        let response = self.client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(AgentFlowError::TaskNotFound(task_id));
        }
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        Ok(response.json().await?)
    }

    /// Attempt to claim a task. False means another worker won.
    pub async fn lock_task(&self, task_id: i64, worker_id: &str) -> Result<bool> {
        let url = format!("{}/api/v1/tasks/{}/lock", self.base_url, task_id);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "worker_id": worker_id }))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::CONFLICT => Ok(false),
            _ => Err(api_error(response).await),
        }
    }

    pub async fn unlock_task(&self, task_id: i64, worker_id: &str) -> Result<()> {
        let url = format!("{}/api/v1/tasks/{}/unlock", self.base_url, task_id);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "worker_id": worker_id }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        Ok(())
    }

    pub async fn complete_task(&self, task_id: i64, worker_id: &str, result: &str) -> Result<()> {
        let url = format!("{}/api/v1/tasks/{}/complete", self.base_url, task_id);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "worker_id": worker_id, "result": result }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        Ok(())
    }

    pub async fn fail_task(&self, task_id: i64, worker_id: &str, error: &str) -> Result<()> {
        let url = format!("{}/api/v1/tasks/{}/fail", self.base_url, task_id);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "worker_id": worker_id, "error": error }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        Ok(())
    }

    pub async fn register_worker(&self, registration: &RegisterWorker) -> Result<()> {
        let url = format!(
            "{}/api/v1/workers/{}/register",
            self.base_url, registration.id
        );
        let response = self.client.post(&url).json(registration).send().await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        Ok(())
    }

    pub async fn heartbeat(&self, worker_id: &str) -> Result<()> {
        let url = format!("{}/api/v1/workers/{}/heartbeat", self.base_url, worker_id);
        let response = self.client.post(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(AgentFlowError::WorkerNotFound(worker_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        Ok(())
    }

    pub async fn health(&self) -> Result<bool> {
        let url = format!("{}/health", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}

async fn api_error(response: reqwest::Response) -> AgentFlowError {
    let status = response.status();
    let message = match response.json::<ErrorResponse>().await {
        Ok(body) => body.error,
        Err(_) => status.to_string(),
    };
    AgentFlowError::MasterApi(format!("{}: {}", status.as_u16(), message))
}
