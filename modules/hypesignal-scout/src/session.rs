use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Result, ScoutError};
use crate::retry::{with_retry, RetryPolicy};
use crate::traits::{RenderChannel, RenderConnector, SessionBackend};

/// Lifecycle of the remote session owned by one [`SessionHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Active,
    Stopping,
    Stopped,
    Failed,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Backoff for transient create failures.
    pub start_retry: RetryPolicy,
    /// How long to wait for the backend to report the session active.
    pub readiness_timeout: Duration,
    pub readiness_poll: Duration,
    /// Upper bound on the release call during teardown.
    pub release_timeout: Duration,
    /// Pause after each navigation to let client-side rendering settle.
    pub navigation_settle: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            start_retry: RetryPolicy::new(3),
            readiness_timeout: Duration::from_secs(20),
            readiness_poll: Duration::from_secs(1),
            release_timeout: Duration::from_secs(5),
            navigation_settle: Duration::from_secs(2),
        }
    }
}

struct SessionSlot {
    id: Option<String>,
    state: SessionState,
}

/// One remote browser session, exclusively owned by one worker.
///
/// All methods take `&self`: `stop` must be callable from the cleanup path
/// while another borrow of the handle has just been dropped mid-operation.
pub struct SessionHandle {
    backend: Arc<dyn SessionBackend>,
    connector: Arc<dyn RenderConnector>,
    config: SessionConfig,
    slot: Mutex<SessionSlot>,
    channel: tokio::sync::Mutex<Option<Arc<dyn RenderChannel>>>,
}

impl SessionHandle {
    pub fn new(
        backend: Arc<dyn SessionBackend>,
        connector: Arc<dyn RenderConnector>,
        config: SessionConfig,
    ) -> Self {
        Self {
            backend,
            connector,
            config,
            slot: Mutex::new(SessionSlot {
                id: None,
                state: SessionState::Stopped,
            }),
            channel: tokio::sync::Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        self.lock_slot().state
    }

    pub fn session_id(&self) -> Option<String> {
        self.lock_slot().id.clone()
    }

    /// Create a session and wait until the backend reports it active.
    ///
    /// Transient failures are retried with backoff; a session-limit error is
    /// returned immediately. A session that never becomes active is released
    /// and reported as [`ScoutError::ReadinessTimeout`].
    pub async fn start(&self) -> Result<String> {
        {
            let mut slot = self.lock_slot();
            if let (SessionState::Active, Some(id)) = (slot.state, slot.id.as_ref()) {
                return Ok(id.clone());
            }
            slot.state = SessionState::Starting;
        }

        let created = with_retry(&self.config.start_retry, ScoutError::is_transient, |_| {
            self.backend.create()
        })
        .await;

        let session_id = match created {
            Ok(id) => id,
            Err(e) => {
                self.set_state(SessionState::Failed);
                return Err(e);
            }
        };

        {
            let mut slot = self.lock_slot();
            slot.id = Some(session_id.clone());
        }
        info!(session_id = session_id.as_str(), "Session created, waiting for readiness");

        if let Err(e) = self.wait_until_active(&session_id).await {
            // Abandon the session but never leak it.
            self.stop().await;
            self.set_state(SessionState::Failed);
            return Err(e);
        }

        self.set_state(SessionState::Active);
        info!(session_id = session_id.as_str(), "Session active");
        Ok(session_id)
    }

    async fn wait_until_active(&self, session_id: &str) -> Result<()> {
        let started = Instant::now();
        loop {
            match self.backend.status(session_id).await {
                Ok(Some(status)) if status == "active" => return Ok(()),
                Ok(status) => debug!(session_id, ?status, "Session not active yet"),
                Err(e) => debug!(session_id, error = %e, "Session status check failed"),
            }

            let waited = started.elapsed();
            if waited >= self.config.readiness_timeout {
                return Err(ScoutError::ReadinessTimeout {
                    session_id: session_id.to_string(),
                    waited,
                });
            }
            tokio::time::sleep(self.config.readiness_poll).await;
        }
    }

    /// Release the session. Idempotent: a no-op when nothing is held.
    ///
    /// Local state is cleared before the remote call, and the remote call is
    /// bounded by `release_timeout`; its failure is logged, never returned.
    pub async fn stop(&self) {
        let session_id = {
            let mut slot = self.lock_slot();
            match slot.id.take() {
                Some(id) => {
                    slot.state = SessionState::Stopping;
                    id
                }
                None => {
                    if slot.state != SessionState::Failed {
                        slot.state = SessionState::Stopped;
                    }
                    return;
                }
            }
        };

        let channel = self.channel.lock().await.take();
        if let Some(channel) = channel {
            channel.close().await;
        }

        match tokio::time::timeout(self.config.release_timeout, self.backend.release(&session_id)).await {
            Ok(Ok(())) => info!(session_id = session_id.as_str(), "Session released"),
            Ok(Err(e)) => warn!(session_id = session_id.as_str(), error = %e, "Session release failed"),
            Err(_) => warn!(session_id = session_id.as_str(), "Session release timed out"),
        }

        self.set_state(SessionState::Stopped);
    }

    /// Navigate the session's page. Retries once after reconnecting when a
    /// concurrent navigation destroyed the execution context.
    pub async fn navigate(&self, url: &str) -> Result<()> {
        with_retry(&RetryPolicy::immediate(2), ScoutError::is_navigation_race, |attempt| async move {
            let channel = self.channel_for(attempt).await?;
            channel.navigate(url).await
        })
        .await?;

        if !self.config.navigation_settle.is_zero() {
            tokio::time::sleep(self.config.navigation_settle).await;
        }
        Ok(())
    }

    /// Run a script on the session's page, with the same retry-once rule as
    /// [`navigate`](Self::navigate).
    pub async fn evaluate(&self, script: &str) -> Result<Value> {
        with_retry(&RetryPolicy::immediate(2), ScoutError::is_navigation_race, |attempt| async move {
            let channel = self.channel_for(attempt).await?;
            channel.evaluate(script).await
        })
        .await
    }

    pub async fn screenshot(&self) -> Result<Vec<u8>> {
        let channel = self.channel_for(0).await?;
        channel.screenshot().await
    }

    /// The attached channel, connecting lazily. A retry attempt drops the
    /// current channel first so the next call re-attaches.
    async fn channel_for(&self, attempt: u32) -> Result<Arc<dyn RenderChannel>> {
        let session_id = {
            let slot = self.lock_slot();
            match (slot.state, slot.id.as_ref()) {
                (SessionState::Active, Some(id)) => id.clone(),
                _ => return Err(ScoutError::NoSession),
            }
        };

        let mut guard = self.channel.lock().await;
        if attempt > 0 {
            if let Some(stale) = guard.take() {
                debug!(session_id = session_id.as_str(), "Re-attaching render channel");
                stale.close().await;
            }
        }
        if let Some(channel) = guard.as_ref() {
            return Ok(channel.clone());
        }

        let endpoint = self.backend.devtools_url(&session_id).await?;
        let channel = self.connector.connect(&endpoint).await?;
        *guard = Some(channel.clone());
        Ok(channel)
    }

    fn set_state(&self, state: SessionState) {
        self.lock_slot().state = state;
    }

    fn lock_slot(&self) -> std::sync::MutexGuard<'_, SessionSlot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockConnector, MockSessionBackend};

    fn fast_config() -> SessionConfig {
        SessionConfig {
            start_retry: RetryPolicy::immediate(3),
            readiness_timeout: Duration::from_secs(3),
            readiness_poll: Duration::from_millis(500),
            release_timeout: Duration::from_secs(1),
            navigation_settle: Duration::ZERO,
        }
    }

    fn handle(backend: Arc<MockSessionBackend>, connector: Arc<MockConnector>) -> SessionHandle {
        SessionHandle::new(backend, connector, fast_config())
    }

    #[tokio::test(start_paused = true)]
    async fn start_waits_for_active_status() {
        let backend = Arc::new(MockSessionBackend::new().with_statuses(&["starting", "starting", "active"]));
        let session = handle(backend.clone(), Arc::new(MockConnector::new()));

        let id = session.start().await.unwrap();
        assert_eq!(id, "session-1");
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(backend.status_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_create_failures_are_retried() {
        let backend = Arc::new(MockSessionBackend::new().fail_creates_transiently(2));
        let session = handle(backend.clone(), Arc::new(MockConnector::new()));

        session.start().await.unwrap();
        assert_eq!(backend.create_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn session_limit_is_not_retried() {
        let backend = Arc::new(MockSessionBackend::new().with_session_limit());
        let session = handle(backend.clone(), Arc::new(MockConnector::new()));

        let err = session.start().await.unwrap_err();
        assert!(err.is_session_limit());
        assert_eq!(backend.create_calls(), 1);
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_timeout_releases_session() {
        let backend = Arc::new(MockSessionBackend::new().with_statuses(&["starting"]));
        let session = handle(backend.clone(), Arc::new(MockConnector::new()));

        let err = session.start().await.unwrap_err();
        assert!(matches!(err, ScoutError::ReadinessTimeout { .. }));
        assert_eq!(backend.release_calls(), 1);
        assert_eq!(session.state(), SessionState::Failed);
        assert!(session.session_id().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_clears_state_on_release_failure() {
        let backend = Arc::new(MockSessionBackend::new().fail_releases());
        let session = handle(backend.clone(), Arc::new(MockConnector::new()));
        session.start().await.unwrap();

        session.stop().await;
        session.stop().await;

        assert_eq!(backend.release_calls(), 1);
        assert_eq!(session.state(), SessionState::Stopped);
        assert!(session.session_id().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn operations_require_active_session() {
        let session = handle(Arc::new(MockSessionBackend::new()), Arc::new(MockConnector::new()));
        let err = session.evaluate("1 + 1").await.unwrap_err();
        assert!(matches!(err, ScoutError::NoSession));
    }

    #[tokio::test(start_paused = true)]
    async fn channel_connects_lazily_once() {
        let connector = Arc::new(MockConnector::new());
        let session = handle(Arc::new(MockSessionBackend::new()), connector.clone());
        session.start().await.unwrap();
        assert_eq!(connector.connect_calls(), 0);

        session.navigate("https://example.com").await.unwrap();
        session.evaluate("document.title").await.unwrap();
        assert_eq!(connector.connect_calls(), 1);
        assert_eq!(connector.channel().navigations(), vec!["https://example.com".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn navigation_race_retries_once_after_reconnect() {
        let connector = Arc::new(MockConnector::new());
        connector.channel().fail_next_evaluations_with_race(1);
        let session = handle(Arc::new(MockSessionBackend::new()), connector.clone());
        session.start().await.unwrap();

        session.evaluate("document.title").await.unwrap();
        assert_eq!(connector.connect_calls(), 2);
        assert_eq!(connector.channel().evaluate_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_navigation_race_surfaces_error() {
        let connector = Arc::new(MockConnector::new());
        connector.channel().fail_next_evaluations_with_race(5);
        let session = handle(Arc::new(MockSessionBackend::new()), connector.clone());
        session.start().await.unwrap();

        let err = session.evaluate("document.title").await.unwrap_err();
        assert!(err.is_navigation_race());
        assert_eq!(connector.channel().evaluate_calls(), 2);
    }
}
