use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrowserSessionError>;

#[derive(Debug, Error)]
pub enum BrowserSessionError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Session limit reached: {0}")]
    SessionLimit(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl BrowserSessionError {
    /// Connection resets, timeouts and 5xx responses are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            BrowserSessionError::Network(_) => true,
            BrowserSessionError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for BrowserSessionError {
    fn from(err: reqwest::Error) -> Self {
        BrowserSessionError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for BrowserSessionError {
    fn from(err: serde_json::Error) -> Self {
        BrowserSessionError::Parse(err.to_string())
    }
}
