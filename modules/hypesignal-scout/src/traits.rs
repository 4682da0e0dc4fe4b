// Trait seams for the network collaborators.
//
// SessionBackend: remote browser session API (create / status / release).
// RenderConnector: attaches a control channel to a session's DevTools endpoint.
// RenderChannel: navigate / evaluate / screenshot on the attached page.
// ClassificationBackend: remote labelling tasks (create / poll / stop).
//
// Mocks for all four live in `testing`.

use std::sync::Arc;

use agent_task_client::{AgentTaskClient, TaskStatus};
use async_trait::async_trait;
use browser_session_client::BrowserSessionClient;
use serde_json::Value;

use crate::error::Result;

// ---------------------------------------------------------------------------
// SessionBackend
// ---------------------------------------------------------------------------

#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Create a session and return its id.
    async fn create(&self) -> Result<String>;

    /// Current lifecycle status string reported by the backend.
    async fn status(&self, session_id: &str) -> Result<Option<String>>;

    /// Release a session.
    async fn release(&self, session_id: &str) -> Result<()>;

    /// Websocket endpoint for the session's DevTools channel.
    async fn devtools_url(&self, session_id: &str) -> Result<String>;
}

#[async_trait]
impl SessionBackend for BrowserSessionClient {
    async fn create(&self) -> Result<String> {
        Ok(self.create_session().await?)
    }

    async fn status(&self, session_id: &str) -> Result<Option<String>> {
        let info = self.get_session(session_id).await?;
        Ok(info.status().map(str::to_string))
    }

    async fn release(&self, session_id: &str) -> Result<()> {
        Ok(self.delete_session(session_id).await?)
    }

    async fn devtools_url(&self, session_id: &str) -> Result<String> {
        Ok(BrowserSessionClient::devtools_url(self, session_id).await?)
    }
}

// ---------------------------------------------------------------------------
// Rendering channel
// ---------------------------------------------------------------------------

#[async_trait]
pub trait RenderConnector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn RenderChannel>>;
}

#[async_trait]
pub trait RenderChannel: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Evaluate a script expression and return its JSON value
    /// (`Value::Null` when the script returns nothing).
    async fn evaluate(&self, script: &str) -> Result<Value>;

    /// PNG screenshot of the current viewport.
    async fn screenshot(&self) -> Result<Vec<u8>>;

    /// Detach from the page. Best effort.
    async fn close(&self);
}

// ---------------------------------------------------------------------------
// ClassificationBackend
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ClassificationBackend: Send + Sync {
    async fn create_task(&self, prompt: &str, step_limit: u32) -> Result<String>;

    async fn get_task(&self, task_id: &str) -> Result<TaskStatus>;

    /// Cancel a task to free quota. Returns whether the backend acknowledged.
    async fn stop_task(&self, task_id: &str) -> Result<bool>;
}

#[async_trait]
impl ClassificationBackend for AgentTaskClient {
    async fn create_task(&self, prompt: &str, step_limit: u32) -> Result<String> {
        Ok(AgentTaskClient::create_task(self, prompt, step_limit).await?)
    }

    async fn get_task(&self, task_id: &str) -> Result<TaskStatus> {
        Ok(AgentTaskClient::get_task(self, task_id).await?)
    }

    async fn stop_task(&self, task_id: &str) -> Result<bool> {
        Ok(AgentTaskClient::stop_task(self, task_id).await?)
    }
}
