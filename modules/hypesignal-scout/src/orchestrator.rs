use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use hypesignal_common::{parse_count, ItemKind, Platform, Record, Source};
use rand::Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::budget::TimeBudget;
use crate::enrichment::{EnrichmentConfig, EnrichmentScheduler};
use crate::error::{Result, ScoutError};
use crate::fetcher::{Continuation, FeedFetcher, PageRequest, RawRecord};
use crate::recency::{source_exhausted, within_horizon};
use crate::retry::RetryPolicy;
use crate::session::{SessionConfig, SessionHandle};
use crate::store::Store;
use crate::traits::{ClassificationBackend, RenderConnector, SessionBackend};

/// Time given to cancelled classification tasks to stop their remote task.
const ENRICHMENT_GRACE: Duration = Duration::from_secs(5);

/// Run-level tunables.
#[derive(Debug, Clone)]
pub struct ScoutConfig {
    pub horizon_days: u32,
    pub page_size: usize,
    /// Wall-clock budget for scraping, shared by every source.
    pub global_timeout: Duration,
    /// Workers (and sessions) running at once.
    pub max_parallel: usize,
    pub enrichment_concurrency: usize,
    pub poll_interval: Duration,
    pub max_polls: u32,
    /// Consecutive skipped or out-of-horizon items that end a source.
    pub skip_threshold: u32,
    pub max_records_per_source: Option<usize>,
    pub min_slice: Duration,
    pub max_slice: Duration,
    pub scrape_comments: bool,
    pub comment_limit: usize,
    pub screenshot_dir: Option<PathBuf>,
    /// Pause before the next batch after a session-quota failure.
    pub fleet_backoff: Duration,
    /// Random delay before each worker creates its session.
    pub stagger: (Duration, Duration),
    /// How long to wait for background labelling once scraping is done.
    pub enrichment_drain_timeout: Duration,
    pub session: SessionConfig,
}

impl Default for ScoutConfig {
    fn default() -> Self {
        Self {
            horizon_days: 7,
            page_size: 25,
            global_timeout: Duration::from_secs(180),
            max_parallel: 3,
            enrichment_concurrency: 1,
            poll_interval: Duration::from_secs(2),
            max_polls: 10,
            skip_threshold: 10,
            max_records_per_source: None,
            min_slice: Duration::from_secs(10),
            max_slice: Duration::from_secs(60),
            scrape_comments: true,
            comment_limit: 50,
            screenshot_dir: None,
            fleet_backoff: Duration::from_secs(30),
            stagger: (Duration::from_millis(500), Duration::from_secs(2)),
            enrichment_drain_timeout: Duration::from_secs(60),
            session: SessionConfig::default(),
        }
    }
}

impl ScoutConfig {
    pub fn enrichment(&self) -> EnrichmentConfig {
        EnrichmentConfig {
            concurrency: self.enrichment_concurrency.max(1),
            poll_interval: self.poll_interval,
            max_polls: self.max_polls,
            step_limit: 3,
            create_retry: RetryPolicy::new(2),
        }
    }

    fn stagger_delay(&self) -> Duration {
        let (low, high) = self.stagger;
        if high <= low {
            return low;
        }
        let ms = rand::rng().random_range(low.as_millis() as u64..=high.as_millis() as u64);
        Duration::from_millis(ms)
    }
}

// ---------------------------------------------------------------------------
// Run summary
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct RunSummary {
    pub run_id: Uuid,
    /// Records accepted by workers this run (new or merged).
    pub records_collected: usize,
    pub store_entries: usize,
    pub sources_completed: usize,
    pub sources_failed: Vec<(String, String)>,
    pub sources_skipped: usize,
    pub missing_labels: usize,
    pub labels_quick: u64,
    pub labels_remote: u64,
    pub enrichment_drained: bool,
    pub elapsed: Duration,
}

impl RunSummary {
    fn record(&mut self, report: SourceReport) {
        self.records_collected += report.accepted;
        match report.outcome {
            SourceOutcome::Completed(_) | SourceOutcome::SliceElapsed => self.sources_completed += 1,
            SourceOutcome::Cancelled => self.sources_skipped += 1,
            SourceOutcome::Failed(e) => self.sources_failed.push((report.label, e.to_string())),
        }
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Scout Run Complete ===")?;
        writeln!(f, "Run:                {}", self.run_id)?;
        writeln!(f, "Elapsed:            {:.1}s", self.elapsed.as_secs_f64())?;
        writeln!(f, "Records collected:  {}", self.records_collected)?;
        writeln!(f, "Store entries:      {}", self.store_entries)?;
        writeln!(f, "Sources completed:  {}", self.sources_completed)?;
        writeln!(f, "Sources skipped:    {}", self.sources_skipped)?;
        writeln!(f, "Sources failed:     {}", self.sources_failed.len())?;
        for (label, reason) in &self.sources_failed {
            writeln!(f, "  {label}: {reason}")?;
        }
        writeln!(f, "\nLabels:")?;
        writeln!(f, "  From title:       {}", self.labels_quick)?;
        writeln!(f, "  Classified:       {}", self.labels_remote)?;
        writeln!(f, "  Missing:          {}", self.missing_labels)?;
        if !self.enrichment_drained {
            writeln!(f, "  (classification cut short)")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Per-source outcome
// ---------------------------------------------------------------------------

/// Why a worker stopped paginating on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    FeedExhausted,
    OutOfHorizon,
    RateLimited,
    RecordCap,
    PageFailed,
}

#[derive(Debug)]
pub enum SourceOutcome {
    Completed(StopReason),
    SliceElapsed,
    Cancelled,
    Failed(ScoutError),
}

#[derive(Debug)]
pub struct SourceReport {
    pub label: String,
    pub accepted: usize,
    pub pages: u32,
    pub outcome: SourceOutcome,
}

impl SourceReport {
    fn hit_session_limit(&self) -> bool {
        matches!(&self.outcome, SourceOutcome::Failed(e) if e.is_session_limit())
    }
}

#[derive(Default)]
struct Progress {
    accepted: usize,
    pages: u32,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Runs one worker per source, `max_parallel` at a time, each inside its
/// own slice of the global time budget and owning exactly one session.
pub struct Orchestrator {
    config: ScoutConfig,
    sessions: Arc<dyn SessionBackend>,
    connector: Arc<dyn RenderConnector>,
    fetcher: Arc<dyn FeedFetcher>,
    store: Arc<Store>,
    enrichment: EnrichmentScheduler,
}

impl Orchestrator {
    pub fn new(
        config: ScoutConfig,
        sessions: Arc<dyn SessionBackend>,
        connector: Arc<dyn RenderConnector>,
        fetcher: Arc<dyn FeedFetcher>,
        store: Arc<Store>,
        classifier: Arc<dyn ClassificationBackend>,
    ) -> Self {
        let enrichment = EnrichmentScheduler::new(classifier, store.clone(), config.enrichment());
        Self {
            config,
            sessions,
            connector,
            fetcher,
            store,
            enrichment,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn enrichment(&self) -> &EnrichmentScheduler {
        &self.enrichment
    }

    /// Scrape every source, then wait for background labelling and write
    /// the final snapshot. Never fails: per-source errors end up in the
    /// summary. Cancelling `cancel` tears down live sessions and skips
    /// whatever has not started.
    pub async fn run(&self, sources: &[Source], cancel: &CancellationToken) -> RunSummary {
        let started = Instant::now();
        let run_id = Uuid::new_v4();
        let mut summary = RunSummary {
            run_id,
            ..Default::default()
        };
        let budget = TimeBudget::new(
            self.config.global_timeout,
            self.config.min_slice,
            self.config.max_slice,
        );
        let batch_size = self.config.max_parallel.max(1);
        let batches: Vec<&[Source]> = sources.chunks(batch_size).collect();

        info!(
            %run_id,
            sources = sources.len(),
            batches = batches.len(),
            timeout_secs = self.config.global_timeout.as_secs(),
            horizon_days = self.config.horizon_days,
            "Scout run starting"
        );

        let mut attempted = 0;
        for (i, batch) in batches.iter().enumerate() {
            if cancel.is_cancelled() {
                info!("Run cancelled, skipping remaining sources");
                break;
            }
            let Some(slice) = budget.slice_for(batches.len() - i) else {
                warn!(
                    remaining = sources.len() - attempted,
                    "Time budget exhausted, skipping remaining sources"
                );
                break;
            };

            budget.log_status();
            let labels: Vec<String> = batch.iter().map(Source::label).collect();
            info!(
                batch = i + 1,
                of = batches.len(),
                sources = ?labels,
                slice_secs = slice.as_secs(),
                "Starting batch"
            );

            let reports: Vec<SourceReport> = stream::iter(batch.iter())
                .map(|source| self.run_source(source, slice, cancel))
                .buffer_unordered(batch_size)
                .collect()
                .await;
            attempted += batch.len();

            let quota_hit = reports.iter().any(SourceReport::hit_session_limit);
            for report in reports {
                summary.record(report);
            }
            self.persist_snapshot();

            if quota_hit && i + 1 < batches.len() {
                self.fleet_backoff(&budget, cancel).await;
            }
        }
        summary.sources_skipped += sources.len() - attempted;

        summary.enrichment_drained = self.drain_enrichment(cancel).await;
        self.persist_snapshot();

        let stats = self.enrichment.stats();
        summary.labels_quick = stats.quick();
        summary.labels_remote = stats.remote();
        summary.store_entries = self.store.len();
        summary.missing_labels = self.store.missing_labels();
        summary.elapsed = started.elapsed();

        info!(
            %run_id,
            records = summary.records_collected,
            completed = summary.sources_completed,
            failed = summary.sources_failed.len(),
            skipped = summary.sources_skipped,
            missing_labels = summary.missing_labels,
            elapsed_secs = summary.elapsed.as_secs(),
            "Scout run finished"
        );
        summary
    }

    async fn drain_enrichment(&self, cancel: &CancellationToken) -> bool {
        if self.enrichment.in_flight() > 0 {
            info!(in_flight = self.enrichment.in_flight(), "Waiting for classification tasks");
        }
        tokio::select! {
            drained = self.enrichment.drain(self.config.enrichment_drain_timeout, ENRICHMENT_GRACE) => drained,
            _ = cancel.cancelled() => self.enrichment.drain(Duration::ZERO, ENRICHMENT_GRACE).await,
        }
    }

    async fn fleet_backoff(&self, budget: &TimeBudget, cancel: &CancellationToken) {
        let wait = self.config.fleet_backoff.min(budget.remaining());
        warn!(wait_secs = wait.as_secs(), "Session quota exhausted, backing off before next batch");
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(wait) => {}
        }
    }

    /// One worker. The session is stopped on every path, including slice
    /// expiry and cancellation in the middle of a page.
    async fn run_source(&self, source: &Source, slice: Duration, cancel: &CancellationToken) -> SourceReport {
        let label = source.label();
        let mut progress = Progress::default();

        let stagger = self.config.stagger_delay();
        if !stagger.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return SourceReport { label, accepted: 0, pages: 0, outcome: SourceOutcome::Cancelled };
                }
                _ = tokio::time::sleep(stagger) => {}
            }
        }

        let session = SessionHandle::new(
            self.sessions.clone(),
            self.connector.clone(),
            self.config.session.clone(),
        );

        let outcome = tokio::select! {
            _ = cancel.cancelled() => SourceOutcome::Cancelled,
            _ = tokio::time::sleep(slice) => SourceOutcome::SliceElapsed,
            result = self.paginate(&session, source, &mut progress) => match result {
                Ok(reason) => SourceOutcome::Completed(reason),
                Err(e) => SourceOutcome::Failed(e),
            },
        };

        session.stop().await;

        match &outcome {
            SourceOutcome::Completed(reason) => {
                info!(source = label.as_str(), accepted = progress.accepted, pages = progress.pages, ?reason, "Source done")
            }
            SourceOutcome::SliceElapsed => {
                info!(source = label.as_str(), accepted = progress.accepted, pages = progress.pages, "Source slice elapsed")
            }
            SourceOutcome::Cancelled => {
                info!(source = label.as_str(), accepted = progress.accepted, "Source cancelled")
            }
            SourceOutcome::Failed(e) => {
                error!(source = label.as_str(), accepted = progress.accepted, error = %e, "Source failed")
            }
        }

        SourceReport {
            label,
            accepted: progress.accepted,
            pages: progress.pages,
            outcome,
        }
    }

    async fn paginate(
        &self,
        session: &SessionHandle,
        source: &Source,
        progress: &mut Progress,
    ) -> Result<StopReason> {
        session.start().await?;

        let mut seen: HashSet<String> = HashSet::new();
        let mut consecutive_skips = 0u32;
        let mut page_index = 0u32;

        loop {
            let request = PageRequest {
                page_index,
                page_size: self.config.page_size,
                refresh: page_index == 0,
            };
            let page = match self.fetcher.fetch_page(session, source, request).await {
                Ok(page) => page,
                Err(e) if page_index == 0 || e.is_session_limit() => return Err(e),
                Err(e) => {
                    warn!(source = %source, page = page_index + 1, error = %e, "Page failed, ending source");
                    return Ok(StopReason::PageFailed);
                }
            };
            progress.pages += 1;
            let screenshot_path = self.capture_screenshot(session, source, page_index + 1).await;

            let mut accepted = 0;
            for raw in page.records {
                let permalink = raw.permalink.clone().filter(|l| !l.trim().is_empty());
                let unseen = permalink.as_ref().is_none_or(|link| seen.insert(link.clone()));
                let age = raw.age.as_deref().unwrap_or_default();

                if !unseen || !within_horizon(age, self.config.horizon_days) {
                    consecutive_skips += 1;
                    debug!(source = %source, age, unseen, consecutive_skips, "Item skipped");
                    if source_exhausted(consecutive_skips, self.config.skip_threshold) {
                        info!(source = %source, consecutive_skips, "Past the recency horizon");
                        self.persist_snapshot();
                        return Ok(StopReason::OutOfHorizon);
                    }
                    continue;
                }
                consecutive_skips = 0;

                let mut record = build_record(source, raw);
                record.screenshot_path = screenshot_path.clone();
                if self.config.scrape_comments {
                    if let Some(link) = permalink.as_deref() {
                        let comments = self
                            .fetcher
                            .fetch_comments(session, source, link, self.config.comment_limit)
                            .await;
                        if !comments.is_empty() {
                            record.comment_count = comments.len() as u64;
                            record.comments = comments;
                        }
                    }
                }

                let outcome = self.store.upsert(record);
                if let Some(stored) = self.store.get(outcome.id()) {
                    self.enrichment.enqueue(&stored);
                }
                accepted += 1;
                progress.accepted += 1;

                if self
                    .config
                    .max_records_per_source
                    .is_some_and(|cap| progress.accepted >= cap)
                {
                    info!(source = %source, accepted = progress.accepted, "Record cap reached");
                    self.persist_snapshot();
                    return Ok(StopReason::RecordCap);
                }
            }

            info!(source = %source, page = page_index + 1, accepted, continuation = ?page.continuation, "Page processed");
            self.persist_snapshot();

            match page.continuation {
                Continuation::More => page_index += 1,
                Continuation::Exhausted => return Ok(StopReason::FeedExhausted),
                Continuation::RateLimited => {
                    warn!(source = %source, "Rate limited, ending source");
                    return Ok(StopReason::RateLimited);
                }
            }
        }
    }

    /// Persistence failures are logged; the next snapshot catches up.
    fn persist_snapshot(&self) {
        if let Err(e) = self.store.persist() {
            warn!(error = %e, "Snapshot not persisted");
        }
    }

    async fn capture_screenshot(&self, session: &SessionHandle, source: &Source, page: u32) -> Option<String> {
        let dir = self.config.screenshot_dir.as_ref()?;
        let path = dir.join(format!("{}-page{page}.png", source.slug()));

        let bytes = match session.screenshot().await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(source = %source, page, error = %e, "Screenshot failed");
                return None;
            }
        };
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!(dir = %dir.display(), error = %e, "Screenshot directory unavailable");
            return None;
        }
        match tokio::fs::write(&path, bytes).await {
            Ok(()) => Some(path.display().to_string()),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Screenshot not written");
                None
            }
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Parse a raw extracted item into a record. The id is left for the store.
pub fn build_record(source: &Source, raw: RawRecord) -> Record {
    let secondary = parse_count(&raw.secondary);
    let (share_count, award_count) = match source.platform {
        Platform::Twitter => (secondary, 0),
        Platform::Reddit => (0, secondary),
    };
    Record {
        source: source.label(),
        platform: source.platform,
        title: non_empty(raw.title),
        content: non_empty(raw.content),
        author: non_empty(raw.author),
        timestamp: non_empty(raw.timestamp),
        post_age: non_empty(raw.age),
        upvotes_likes: parse_count(&raw.score),
        comment_count: parse_count(&raw.comments),
        share_count,
        award_count,
        link: non_empty(raw.permalink),
        post_type: raw.kind.as_deref().map(ItemKind::from_raw),
        ..Default::default()
    }
}
