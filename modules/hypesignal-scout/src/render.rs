use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Result, ScoutError};
use crate::traits::{RenderChannel, RenderConnector};

/// Attaches to a remote browser over the Chrome DevTools Protocol.
pub struct CdpConnector {
    navigation_timeout: Duration,
}

impl CdpConnector {
    pub fn new(navigation_timeout: Duration) -> Self {
        Self { navigation_timeout }
    }
}

impl Default for CdpConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl RenderConnector for CdpConnector {
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn RenderChannel>> {
        let (browser, mut handler) = Browser::connect(endpoint)
            .await
            .map_err(|e| ScoutError::Connection(format!("CDP connect failed: {e}")))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "CDP handler stopped");
                    break;
                }
            }
        });

        // Reuse the session's existing tab when there is one.
        let existing = browser.pages().await.unwrap_or_default();
        let page = match existing.into_iter().next() {
            Some(page) => page,
            None => match browser.new_page("about:blank").await {
                Ok(page) => page,
                Err(e) => {
                    handler_task.abort();
                    return Err(ScoutError::from_render_message(e.to_string()));
                }
            },
        };

        debug!(endpoint, "Render channel attached");
        Ok(Arc::new(CdpChannel {
            _browser: browser,
            page,
            handler_task,
            navigation_timeout: self.navigation_timeout,
        }))
    }
}

pub struct CdpChannel {
    _browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
    navigation_timeout: Duration,
}

#[async_trait]
impl RenderChannel for CdpChannel {
    async fn navigate(&self, url: &str) -> Result<()> {
        match tokio::time::timeout(self.navigation_timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(ScoutError::from_render_message(e.to_string())),
            Err(_) => Err(ScoutError::Connection(format!(
                "Navigation to {url} timed out after {:?}",
                self.navigation_timeout
            ))),
        }
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| ScoutError::from_render_message(e.to_string()))?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        self.page
            .screenshot(ScreenshotParams::builder().build())
            .await
            .map_err(|e| ScoutError::from_render_message(e.to_string()))
    }

    async fn close(&self) {
        if self.handler_task.is_finished() {
            warn!("CDP handler exited before close");
        }
        self.handler_task.abort();
    }
}
