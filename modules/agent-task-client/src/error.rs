use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgentTaskError>;

#[derive(Debug, Error)]
pub enum AgentTaskError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl AgentTaskError {
    pub fn is_transient(&self) -> bool {
        match self {
            AgentTaskError::Network(_) => true,
            AgentTaskError::Api { status, .. } => *status >= 500 || *status == 429,
            AgentTaskError::Parse(_) => false,
        }
    }
}

impl From<reqwest::Error> for AgentTaskError {
    fn from(err: reqwest::Error) -> Self {
        AgentTaskError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for AgentTaskError {
    fn from(err: serde_json::Error) -> Self {
        AgentTaskError::Parse(err.to_string())
    }
}
