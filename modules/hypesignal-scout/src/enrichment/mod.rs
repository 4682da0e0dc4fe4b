pub mod label;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agent_task_client::TaskPhase;
use hypesignal_common::Record;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::error::{Result, ScoutError};
use crate::retry::{with_retry, RetryPolicy};
use crate::store::Store;
use crate::traits::ClassificationBackend;

pub use label::{build_prompt, extract_label, quick_label};

#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
    /// Concurrent remote classifications across all workers.
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub max_polls: u32,
    pub step_limit: u32,
    pub create_retry: RetryPolicy,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            poll_interval: Duration::from_secs(2),
            max_polls: 10,
            step_limit: 3,
            create_retry: RetryPolicy::new(2),
        }
    }
}

/// What `enqueue` did with a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enqueued {
    /// Labelled synchronously by the title heuristic.
    Quick(String),
    /// Handed to a background classification task.
    Spawned,
    /// Already labelled, or nothing to classify.
    Skipped,
}

/// Counters for the run summary.
#[derive(Debug, Default)]
pub struct EnrichmentStats {
    quick: AtomicU64,
    remote: AtomicU64,
    unlabelled: AtomicU64,
}

impl EnrichmentStats {
    pub fn quick(&self) -> u64 {
        self.quick.load(Ordering::Relaxed)
    }

    pub fn remote(&self) -> u64 {
        self.remote.load(Ordering::Relaxed)
    }

    pub fn unlabelled(&self) -> u64 {
        self.unlabelled.load(Ordering::Relaxed)
    }
}

/// Background labelling with bounded concurrency.
///
/// The semaphore is admission control only: overlapping classification of
/// the same record is harmless because label write-back is a merge.
pub struct EnrichmentScheduler {
    backend: Arc<dyn ClassificationBackend>,
    store: Arc<Store>,
    config: EnrichmentConfig,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    stats: Arc<EnrichmentStats>,
}

impl EnrichmentScheduler {
    pub fn new(backend: Arc<dyn ClassificationBackend>, store: Arc<Store>, config: EnrichmentConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Self {
            backend,
            store,
            config,
            permits,
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
            stats: Arc::new(EnrichmentStats::default()),
        }
    }

    pub fn stats(&self) -> &EnrichmentStats {
        &self.stats
    }

    /// Tasks spawned and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Label a stored record: heuristic first, otherwise a background task.
    /// `record.id` must be the id the store assigned.
    pub fn enqueue(&self, record: &Record) -> Enqueued {
        if record.token_name.is_some() {
            return Enqueued::Skipped;
        }

        if let Some(label) = record.title.as_deref().and_then(quick_label) {
            debug!(id = record.id, label = label.as_str(), "Labelled from title");
            self.store.upsert(label_patch(record, label.clone()));
            self.stats.quick.fetch_add(1, Ordering::Relaxed);
            return Enqueued::Quick(label);
        }

        let has_text = [record.title.as_deref(), record.content.as_deref()]
            .into_iter()
            .flatten()
            .any(|s| !s.trim().is_empty());
        if !has_text || self.cancel.is_cancelled() {
            return Enqueued::Skipped;
        }

        let job = ClassifyJob {
            backend: self.backend.clone(),
            config: self.config.clone(),
            cancel: self.cancel.clone(),
        };
        let permits = self.permits.clone();
        let store = self.store.clone();
        let stats = self.stats.clone();
        let prompt = build_prompt(record);
        let patch_base = label_patch(record, String::new());

        let cancel = self.cancel.clone();

        self.tracker.spawn(async move {
            let _permit = tokio::select! {
                _ = cancel.cancelled() => {
                    stats.unlabelled.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                permit = permits.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };
            match job.run(&prompt, patch_base.id).await {
                Some(label) => {
                    info!(id = patch_base.id, label = label.as_str(), "Record labelled");
                    store.upsert(Record {
                        token_name: Some(label),
                        ..patch_base
                    });
                    stats.remote.fetch_add(1, Ordering::Relaxed);
                }
                None => {
                    stats.unlabelled.fetch_add(1, Ordering::Relaxed);
                }
            }
        });
        Enqueued::Spawned
    }

    /// Wait for every spawned task, up to `timeout`. On timeout, in-flight
    /// tasks are cancelled and given `grace` to stop their remote tasks.
    /// Returns whether everything finished inside `timeout`.
    pub async fn drain(&self, timeout: Duration, grace: Duration) -> bool {
        self.tracker.close();
        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_ok() {
            return true;
        }

        warn!(in_flight = self.tracker.len(), "Enrichment drain timed out, cancelling");
        self.cancel.cancel();
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            warn!(in_flight = self.tracker.len(), "Enrichment tasks still running after cancel");
        }
        false
    }
}

/// Minimal record that merges only a label into the stored entry.
fn label_patch(record: &Record, label: String) -> Record {
    Record {
        id: record.id,
        source: record.source.clone(),
        link: record.link.clone(),
        token_name: (!label.is_empty()).then_some(label),
        ..Default::default()
    }
}

struct ClassifyJob {
    backend: Arc<dyn ClassificationBackend>,
    config: EnrichmentConfig,
    cancel: CancellationToken,
}

impl ClassifyJob {
    /// Create, poll, extract. The remote task is stopped exactly once on
    /// every path after a successful create.
    async fn run(&self, prompt: &str, record_id: u64) -> Option<String> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let created = with_retry(&self.config.create_retry, ScoutError::is_transient, |_| {
            self.backend.create_task(prompt, self.config.step_limit)
        })
        .await;
        let task_id = match created {
            Ok(id) => id,
            Err(e) => {
                warn!(id = record_id, error = %e, "Classification task not created");
                return None;
            }
        };

        let outcome = self.poll(&task_id).await;

        match self.backend.stop_task(&task_id).await {
            Ok(acknowledged) => debug!(task_id = task_id.as_str(), acknowledged, "Classification task stopped"),
            Err(e) => debug!(task_id = task_id.as_str(), error = %e, "Classification task stop failed"),
        }

        match outcome {
            Ok(label) => label,
            Err(e) => {
                debug!(id = record_id, task_id = task_id.as_str(), error = %e, "No label");
                None
            }
        }
    }

    async fn poll(&self, task_id: &str) -> Result<Option<String>> {
        let max_polls = self.config.max_polls.max(1);
        for poll in 0..max_polls {
            match self.backend.get_task(task_id).await {
                Ok(status) => match status.phase() {
                    TaskPhase::Completed => return Ok(status.result_value().and_then(extract_label)),
                    TaskPhase::Failed => {
                        return Err(ScoutError::ClassificationFailed(status.failure_reason()))
                    }
                    TaskPhase::Pending => {}
                },
                Err(e) => debug!(task_id, poll, error = %e, "Task status check failed"),
            }

            if poll + 1 < max_polls {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        return Err(ScoutError::ClassificationTimeout { polls: poll + 1 });
                    }
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }
        Err(ScoutError::ClassificationTimeout { polls: max_polls })
    }
}
