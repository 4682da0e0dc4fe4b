pub mod error;
pub mod types;

pub use error::{BrowserSessionError, Result};
pub use types::{BrowserVersion, CreateSessionResponse, SessionInfo};

use std::time::Duration;

/// Loopback prefix the remote browser reports in its DevTools endpoint.
const LOCAL_DEVTOOLS_PREFIX: &str = "ws://127.0.0.1";

pub struct BrowserSessionClient {
    client: reqwest::Client,
    base_url: String,
    cdp_base_url: String,
    api_key: String,
}

impl BrowserSessionClient {
    /// `base_url` is the session API root (e.g. `https://.../v1/consumer`);
    /// `cdp_base_url` is the host that proxies DevTools traffic per session.
    pub fn new(base_url: &str, cdp_base_url: &str, api_key: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            cdp_base_url: cdp_base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// Create a new remote browser session. Returns the session id.
    ///
    /// A 403 whose body mentions a limit or quota is reported as
    /// [`BrowserSessionError::SessionLimit`] so callers can back off instead
    /// of retrying.
    pub async fn create_session(&self) -> Result<String> {
        let url = format!("{}/session", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({}))
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() == 403 {
            let message = resp.text().await.unwrap_or_default();
            let lowered = message.to_lowercase();
            if lowered.contains("limit") || lowered.contains("quota") {
                return Err(BrowserSessionError::SessionLimit(message));
            }
            return Err(BrowserSessionError::Api {
                status: 403,
                message,
            });
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(BrowserSessionError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body = resp.text().await?;
        let created: CreateSessionResponse = serde_json::from_str(&body)?;
        let id = created.session_id().ok_or_else(|| {
            BrowserSessionError::Parse(format!("No session id in create response: {body}"))
        })?;

        tracing::info!(session_id = id, "Browser session created");
        Ok(id.to_string())
    }

    /// Fetch the current status document for a session.
    pub async fn get_session(&self, session_id: &str) -> Result<SessionInfo> {
        let url = format!("{}/session", self.base_url);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .query(&[("sessionId", session_id)])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(BrowserSessionError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.json().await?)
    }

    /// Release a session. 200 and 204 both count as success.
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        let url = format!("{}/session", self.base_url);
        let resp = self
            .client
            .delete(&url)
            .bearer_auth(&self.api_key)
            .query(&[("sessionId", session_id)])
            .timeout(Duration::from_secs(5))
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() == 200 || status.as_u16() == 204 {
            tracing::info!(session_id, "Browser session released");
            return Ok(());
        }

        let message = resp.text().await.unwrap_or_default();
        Err(BrowserSessionError::Api {
            status: status.as_u16(),
            message,
        })
    }

    /// Resolve the externally reachable DevTools websocket URL for a session.
    pub async fn devtools_url(&self, session_id: &str) -> Result<String> {
        let url = format!("{}/v1/consumer/{}/json/version", self.cdp_base_url, session_id);
        let resp = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(10))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(BrowserSessionError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let version: BrowserVersion = resp.json().await?;
        let local = version.web_socket_debugger_url.ok_or_else(|| {
            BrowserSessionError::Parse("No webSocketDebuggerUrl in browser info".to_string())
        })?;

        Ok(external_devtools_url(&local, &self.cdp_base_url, session_id))
    }
}

/// Rewrite the browser's loopback DevTools URL into the proxied one:
/// `ws://127.0.0.1/devtools/...` → `wss://<host>/v1/consumer/<id>/devtools/...`.
pub fn external_devtools_url(local: &str, cdp_base_url: &str, session_id: &str) -> String {
    let host = cdp_base_url
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    local.replacen(
        LOCAL_DEVTOOLS_PREFIX,
        &format!("wss://{host}/v1/consumer/{session_id}"),
        1,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_loopback_devtools_url() {
        let out = external_devtools_url(
            "ws://127.0.0.1/devtools/browser/abc-123",
            "https://cdp.example.net",
            "sess-9",
        );
        assert_eq!(
            out,
            "wss://cdp.example.net/v1/consumer/sess-9/devtools/browser/abc-123"
        );
    }

    #[test]
    fn leaves_non_loopback_url_untouched() {
        let out = external_devtools_url("wss://elsewhere/devtools", "https://cdp.example.net", "s");
        assert_eq!(out, "wss://elsewhere/devtools");
    }
}
