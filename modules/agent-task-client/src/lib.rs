pub mod error;
pub mod types;

pub use error::{AgentTaskError, Result};
pub use types::{CreateTaskInput, TaskCreated, TaskPhase, TaskStatus};

use std::time::Duration;

/// Agent used for text-only classification tasks.
const DEFAULT_AGENT: &str = "gemini";
const TEXT_MODE: &str = "text";

pub struct AgentTaskClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl AgentTaskClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// Submit a text task. Returns immediately with the task id.
    pub async fn create_task(&self, prompt: &str, step_limit: u32) -> Result<String> {
        let input = CreateTaskInput {
            agent: DEFAULT_AGENT.to_string(),
            prompt: prompt.to_string(),
            mode: TEXT_MODE.to_string(),
            step_limit,
        };

        let url = format!("{}/v1/task/create", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&input)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AgentTaskError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let body = resp.text().await?;
        let created: TaskCreated = serde_json::from_str(&body)?;
        let task_id = created
            .task_id()
            .ok_or_else(|| AgentTaskError::Parse(format!("No task id in response: {body}")))?;

        tracing::debug!(task_id, step_limit, "Agent task created");
        Ok(task_id.to_string())
    }

    /// Fetch the current status of a task.
    pub async fn get_task(&self, task_id: &str) -> Result<TaskStatus> {
        let url = format!("{}/v1/task/{}", self.base_url, task_id);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(10))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AgentTaskError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let task: TaskStatus = resp.json().await?;
        if task.phase() == TaskPhase::Failed {
            tracing::debug!(
                task_id,
                reason = %task.failure_reason(),
                attempts = task.attempts_made.unwrap_or(0),
                "Agent task reported failure"
            );
        }
        Ok(task)
    }

    /// Stop a task to free backend quota. Tries `DELETE /v1/task/{id}` and
    /// falls back to `POST /v1/task/{id}/stop` when the delete route is 404.
    /// Returns whether either call was acknowledged.
    pub async fn stop_task(&self, task_id: &str) -> Result<bool> {
        let url = format!("{}/v1/task/{}", self.base_url, task_id);
        let resp = self
            .client
            .delete(&url)
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(5))
            .send()
            .await?;

        match resp.status().as_u16() {
            200 | 204 => return Ok(true),
            404 => {}
            other => {
                tracing::debug!(task_id, status = other, "Agent task delete not acknowledged");
                return Ok(false);
            }
        }

        let stop_url = format!("{}/v1/task/{}/stop", self.base_url, task_id);
        let resp = self
            .client
            .post(&stop_url)
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(5))
            .send()
            .await?;

        Ok(resp.status().as_u16() == 200)
    }
}
