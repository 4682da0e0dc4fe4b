use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `POST /v1/task/create`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateTaskInput {
    pub agent: String,
    pub prompt: String,
    pub mode: String,
    #[serde(rename = "stepLimit")]
    pub step_limit: u32,
}

/// Response of `POST /v1/task/create`. Id is read from `taskId`, then `id`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskCreated {
    #[serde(default, rename = "taskId")]
    pub task_id: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

impl TaskCreated {
    pub fn task_id(&self) -> Option<&str> {
        [self.task_id.as_deref(), self.id.as_deref()]
            .into_iter()
            .flatten()
            .find(|id| !id.is_empty())
    }
}

/// Where a task is in its lifecycle, collapsed from the backend's free-form
/// state strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    /// active / running / pending / anything unrecognised: poll again.
    Pending,
    Completed,
    Failed,
}

const COMPLETED_STATES: &[&str] = &["completed", "done", "success", "finished"];
const FAILED_STATES: &[&str] = &["failed", "error"];

/// Response of `GET /v1/task/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskStatus {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default, rename = "failedReason")]
    pub failed_reason: Option<String>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default, rename = "stoppedAt")]
    pub stopped_at: Option<Value>,
    #[serde(default, rename = "attemptsMade")]
    pub attempts_made: Option<u32>,
}

impl TaskStatus {
    /// Lowercased state, read from `state` then `status`.
    pub fn state(&self) -> String {
        [self.state.as_deref(), self.status.as_deref()]
            .into_iter()
            .flatten()
            .find(|s| !s.is_empty())
            .unwrap_or_default()
            .to_lowercase()
    }

    pub fn phase(&self) -> TaskPhase {
        let state = self.state();
        if FAILED_STATES.contains(&state.as_str()) {
            return TaskPhase::Failed;
        }
        let stopped = self.stopped_at.as_ref().is_some_and(|v| !v.is_null());
        if stopped || COMPLETED_STATES.contains(&state.as_str()) || self.result_value().is_some() {
            return TaskPhase::Completed;
        }
        TaskPhase::Pending
    }

    /// First non-null result in fallback order: `result`, `output`,
    /// `data.result`, `data.output`.
    pub fn result_value(&self) -> Option<&Value> {
        let nested = self.data.as_ref();
        [
            self.result.as_ref(),
            self.output.as_ref(),
            nested.and_then(|d| d.get("result")),
            nested.and_then(|d| d.get("output")),
        ]
        .into_iter()
        .flatten()
        .find(|v| !v.is_null())
    }

    /// Human-readable failure description for logs.
    pub fn failure_reason(&self) -> String {
        match (&self.failed_reason, &self.error) {
            (Some(reason), _) if !reason.is_empty() => reason.clone(),
            (_, Some(err)) if !err.is_null() => err.to_string(),
            _ => "Unknown".to_string(),
        }
    }
}
