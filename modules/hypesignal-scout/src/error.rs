use std::time::Duration;

use agent_task_client::AgentTaskError;
use browser_session_client::BrowserSessionError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScoutError>;

#[derive(Debug, Error)]
pub enum ScoutError {
    /// Remote quota exhausted. Back off at the fleet level.
    #[error("Session limit reached: {0}")]
    SessionLimit(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Session {session_id} not active after {waited:?}")]
    ReadinessTimeout { session_id: String, waited: Duration },

    #[error("Execution context destroyed: {0}")]
    NavigationRace(String),

    #[error("Classification timed out after {polls} polls")]
    ClassificationTimeout { polls: u32 },

    #[error("Classification failed: {0}")]
    ClassificationFailed(String),

    #[error("Store I/O error: {0}")]
    StoreIo(String),

    #[error("No active session")]
    NoSession,
}

impl ScoutError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ScoutError::Connection(_))
    }

    pub fn is_navigation_race(&self) -> bool {
        matches!(self, ScoutError::NavigationRace(_))
    }

    pub fn is_session_limit(&self) -> bool {
        matches!(self, ScoutError::SessionLimit(_))
    }

    /// Classify a rendering-channel failure message.
    pub fn from_render_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.contains("Execution context was destroyed")
            || message.contains("Cannot find context with specified id")
        {
            ScoutError::NavigationRace(message)
        } else if message.contains("connection closed")
            || message.contains("Connection reset")
            || message.contains("timed out")
        {
            ScoutError::Connection(message)
        } else {
            ScoutError::Protocol(message)
        }
    }
}

impl From<BrowserSessionError> for ScoutError {
    fn from(err: BrowserSessionError) -> Self {
        match err {
            BrowserSessionError::SessionLimit(msg) => ScoutError::SessionLimit(msg),
            e if e.is_transient() => ScoutError::Connection(e.to_string()),
            e => ScoutError::Protocol(e.to_string()),
        }
    }
}

impl From<AgentTaskError> for ScoutError {
    fn from(err: AgentTaskError) -> Self {
        if err.is_transient() {
            ScoutError::Connection(err.to_string())
        } else {
            ScoutError::Protocol(err.to_string())
        }
    }
}

impl From<std::io::Error> for ScoutError {
    fn from(err: std::io::Error) -> Self {
        ScoutError::StoreIo(err.to_string())
    }
}
