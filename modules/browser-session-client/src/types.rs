use serde::Deserialize;

/// Response body of `POST /session`. The backend has been observed to return
/// the id under several names, so every known location is captured and
/// resolved by [`CreateSessionResponse::session_id`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateSessionResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default, rename = "sessionId")]
    pub session_id_camel: Option<String>,
    #[serde(default)]
    pub data: Option<CreateSessionData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateSessionData {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl CreateSessionResponse {
    /// First non-empty id in fallback order: `id`, `session_id`, `sessionId`,
    /// `data.id`, `data.session_id`.
    pub fn session_id(&self) -> Option<&str> {
        let nested = self.data.as_ref();
        [
            self.id.as_deref(),
            self.session_id.as_deref(),
            self.session_id_camel.as_deref(),
            nested.and_then(|d| d.id.as_deref()),
            nested.and_then(|d| d.session_id.as_deref()),
        ]
        .into_iter()
        .flatten()
        .find(|id| !id.is_empty())
    }
}

/// Response body of `GET /session?sessionId=...`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionInfo {
    #[serde(default)]
    pub session: SessionDetail,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionDetail {
    #[serde(default)]
    pub status: Option<String>,
}

impl SessionInfo {
    pub fn status(&self) -> Option<&str> {
        self.session.status.as_deref()
    }

    pub fn is_active(&self) -> bool {
        self.status() == Some("active")
    }
}

/// Subset of the DevTools `/json/version` document.
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserVersion {
    #[serde(rename = "webSocketDebuggerUrl")]
    pub web_socket_debugger_url: Option<String>,
}
