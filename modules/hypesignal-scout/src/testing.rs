// Test mocks for the scout.
//
// One mock per trait boundary:
// - MockSessionBackend (SessionBackend): scripted statuses, failure switches, call counters
// - MockConnector / MockChannel (RenderConnector / RenderChannel): one shared page,
//   substring-matched script results
// - MockClassifier (ClassificationBackend): one poll script for every task
// - ScriptedFetcher (FeedFetcher): per-source page lists
//
// Plus `raw_record` for building extracted items.

use std::collections::HashMap;
use std::future;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use agent_task_client::TaskStatus;
use async_trait::async_trait;
use hypesignal_common::Source;
use serde_json::Value;

use crate::error::{Result, ScoutError};
use crate::fetcher::{Continuation, FeedFetcher, FeedPage, PageRequest, RawRecord};
use crate::session::SessionHandle;
use crate::traits::{ClassificationBackend, RenderChannel, RenderConnector, SessionBackend};

// ---------------------------------------------------------------------------
// MockSessionBackend
// ---------------------------------------------------------------------------

/// Session API double. Successful creates hand out `session-1`,
/// `session-2`, ... Statuses are served in order and the last one repeats;
/// by default every session is immediately `active`.
pub struct MockSessionBackend {
    statuses: Vec<String>,
    transient_create_failures: AtomicU32,
    session_limit: bool,
    fail_releases: bool,
    create_calls: AtomicU32,
    created: AtomicU32,
    status_calls: AtomicUsize,
    release_calls: AtomicUsize,
}

impl MockSessionBackend {
    pub fn new() -> Self {
        Self {
            statuses: vec!["active".to_string()],
            transient_create_failures: AtomicU32::new(0),
            session_limit: false,
            fail_releases: false,
            create_calls: AtomicU32::new(0),
            created: AtomicU32::new(0),
            status_calls: AtomicUsize::new(0),
            release_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_statuses(mut self, statuses: &[&str]) -> Self {
        if !statuses.is_empty() {
            self.statuses = statuses.iter().map(|s| s.to_string()).collect();
        }
        self
    }

    /// The first `n` creates fail with a connection error.
    pub fn fail_creates_transiently(self, n: u32) -> Self {
        self.transient_create_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Every create fails with a quota error.
    pub fn with_session_limit(mut self) -> Self {
        self.session_limit = true;
        self
    }

    pub fn fail_releases(mut self) -> Self {
        self.fail_releases = true;
        self
    }

    pub fn create_calls(&self) -> u32 {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn release_calls(&self) -> usize {
        self.release_calls.load(Ordering::SeqCst)
    }

    /// Sessions created but never released.
    pub fn sessions_outstanding(&self) -> usize {
        (self.created.load(Ordering::SeqCst) as usize).saturating_sub(self.release_calls())
    }
}

impl Default for MockSessionBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionBackend for MockSessionBackend {
    async fn create(&self) -> Result<String> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.session_limit {
            return Err(ScoutError::SessionLimit("concurrent session limit".into()));
        }
        let consumed = self
            .transient_create_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if consumed.is_ok() {
            return Err(ScoutError::Connection("connection reset by peer".into()));
        }
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("session-{n}"))
    }

    async fn status(&self, _session_id: &str) -> Result<Option<String>> {
        let call = self.status_calls.fetch_add(1, Ordering::SeqCst);
        let status = self
            .statuses
            .get(call)
            .or_else(|| self.statuses.last())
            .cloned();
        Ok(status)
    }

    async fn release(&self, session_id: &str) -> Result<()> {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_releases {
            return Err(ScoutError::Protocol(format!("release of {session_id} rejected")));
        }
        Ok(())
    }

    async fn devtools_url(&self, session_id: &str) -> Result<String> {
        Ok(format!("ws://render.test/{session_id}"))
    }
}

// ---------------------------------------------------------------------------
// MockConnector / MockChannel
// ---------------------------------------------------------------------------

/// Every connect attaches to the same [`MockChannel`], so tests can script
/// and inspect the page through `channel()` regardless of reconnects.
pub struct MockConnector {
    channel: Arc<MockChannel>,
    connect_calls: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            channel: Arc::new(MockChannel::new()),
            connect_calls: AtomicUsize::new(0),
        }
    }

    pub fn channel(&self) -> Arc<MockChannel> {
        self.channel.clone()
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RenderConnector for MockConnector {
    async fn connect(&self, _endpoint: &str) -> Result<Arc<dyn RenderChannel>> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.channel.clone())
    }
}

/// Scripted page. `on_script` rules are matched by substring in
/// registration order; unmatched scripts evaluate to `null`.
pub struct MockChannel {
    scripts: Mutex<Vec<(String, Value)>>,
    navigations: Mutex<Vec<String>>,
    evaluate_calls: AtomicUsize,
    screenshot_calls: AtomicUsize,
    race_failures: AtomicU32,
}

impl MockChannel {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(Vec::new()),
            navigations: Mutex::new(Vec::new()),
            evaluate_calls: AtomicUsize::new(0),
            screenshot_calls: AtomicUsize::new(0),
            race_failures: AtomicU32::new(0),
        }
    }

    pub fn on_script(&self, contains: &str, result: Value) {
        self.scripts
            .lock()
            .unwrap()
            .push((contains.to_string(), result));
    }

    /// The next `n` evaluations fail as if a navigation destroyed the
    /// execution context.
    pub fn fail_next_evaluations_with_race(&self, n: u32) {
        self.race_failures.store(n, Ordering::SeqCst);
    }

    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().unwrap().clone()
    }

    pub fn evaluate_calls(&self) -> usize {
        self.evaluate_calls.load(Ordering::SeqCst)
    }

    pub fn screenshot_calls(&self) -> usize {
        self.screenshot_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RenderChannel for MockChannel {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.navigations.lock().unwrap().push(url.to_string());
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        self.evaluate_calls.fetch_add(1, Ordering::SeqCst);
        let raced = self
            .race_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if raced.is_ok() {
            return Err(ScoutError::from_render_message(
                "Execution context was destroyed, most likely because of a navigation",
            ));
        }
        let scripts = self.scripts.lock().unwrap();
        Ok(scripts
            .iter()
            .find(|(needle, _)| script.contains(needle.as_str()))
            .map(|(_, value)| value.clone())
            .unwrap_or(Value::Null))
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        self.screenshot_calls.fetch_add(1, Ordering::SeqCst);
        Ok(b"\x89PNG\r\n\x1a\n".to_vec())
    }

    async fn close(&self) {}
}

// ---------------------------------------------------------------------------
// MockClassifier
// ---------------------------------------------------------------------------

/// How every task created on a [`MockClassifier`] behaves when polled.
#[derive(Debug, Clone)]
pub enum TaskScript {
    CompletesAfter { pending_polls: u32, result: Value },
    FailsAfter { pending_polls: u32, reason: String },
    NeverFinishes,
}

pub struct MockClassifier {
    script: TaskScript,
    fail_creates: bool,
    polls: Mutex<HashMap<String, u32>>,
    create_calls: AtomicUsize,
    get_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    stopped: Mutex<Vec<String>>,
}

impl MockClassifier {
    pub fn new() -> Self {
        Self {
            script: TaskScript::NeverFinishes,
            fail_creates: false,
            polls: Mutex::new(HashMap::new()),
            create_calls: AtomicUsize::new(0),
            get_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            stopped: Mutex::new(Vec::new()),
        }
    }

    pub fn script(mut self, script: TaskScript) -> Self {
        self.script = script;
        self
    }

    /// Every create fails with a transient connection error.
    pub fn fail_creates(mut self) -> Self {
        self.fail_creates = true;
        self
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn stopped_tasks(&self) -> Vec<String> {
        self.stopped.lock().unwrap().clone()
    }

    fn pending() -> TaskStatus {
        TaskStatus {
            state: Some("running".into()),
            ..Default::default()
        }
    }
}

impl Default for MockClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClassificationBackend for MockClassifier {
    async fn create_task(&self, _prompt: &str, _step_limit: u32) -> Result<String> {
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_creates {
            return Err(ScoutError::Connection("task service unavailable".into()));
        }
        let task_id = format!("task-{n}");
        self.polls.lock().unwrap().insert(task_id.clone(), 0);
        Ok(task_id)
    }

    async fn get_task(&self, task_id: &str) -> Result<TaskStatus> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let polled = {
            let mut polls = self.polls.lock().unwrap();
            let count = polls.entry(task_id.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        let status = match &self.script {
            TaskScript::NeverFinishes => Self::pending(),
            TaskScript::CompletesAfter { pending_polls, .. }
            | TaskScript::FailsAfter { pending_polls, .. }
                if polled <= *pending_polls =>
            {
                Self::pending()
            }
            TaskScript::CompletesAfter { result, .. } => TaskStatus {
                state: Some("completed".into()),
                result: Some(result.clone()),
                ..Default::default()
            },
            TaskScript::FailsAfter { reason, .. } => TaskStatus {
                state: Some("failed".into()),
                failed_reason: Some(reason.clone()),
                ..Default::default()
            },
        };
        Ok(status)
    }

    async fn stop_task(&self, task_id: &str) -> Result<bool> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.stopped.lock().unwrap().push(task_id.to_string());
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// ScriptedFetcher
// ---------------------------------------------------------------------------

enum SourceScript {
    Pages(Vec<FeedPage>),
    Fail(fn() -> ScoutError),
    Hang,
}

/// Feed double. Each source serves its registered pages by `page_index`;
/// past the end (or for unknown sources) the feed is exhausted. The session
/// is not touched.
pub struct ScriptedFetcher {
    sources: HashMap<String, SourceScript>,
    comments: HashMap<String, Vec<String>>,
    page_calls: Mutex<HashMap<String, usize>>,
    comment_calls: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self {
            sources: HashMap::new(),
            comments: HashMap::new(),
            page_calls: Mutex::new(HashMap::new()),
            comment_calls: AtomicUsize::new(0),
        }
    }

    /// Pages of records; every page but the last continues with `More`.
    pub fn on_source(mut self, source: &Source, pages: Vec<Vec<RawRecord>>) -> Self {
        let count = pages.len();
        let pages = pages
            .into_iter()
            .enumerate()
            .map(|(i, records)| FeedPage {
                records,
                continuation: if i + 1 < count {
                    Continuation::More
                } else {
                    Continuation::Exhausted
                },
            })
            .collect();
        self.sources.insert(source.label(), SourceScript::Pages(pages));
        self
    }

    /// Explicit pages, continuation included.
    pub fn on_pages(mut self, source: &Source, pages: Vec<FeedPage>) -> Self {
        self.sources.insert(source.label(), SourceScript::Pages(pages));
        self
    }

    /// Every page fetch for the source fails.
    pub fn failing(mut self, source: &Source, error: fn() -> ScoutError) -> Self {
        self.sources.insert(source.label(), SourceScript::Fail(error));
        self
    }

    /// Page fetches for the source never complete.
    pub fn hanging(mut self, source: &Source) -> Self {
        self.sources.insert(source.label(), SourceScript::Hang);
        self
    }

    pub fn with_comments(mut self, permalink: &str, comments: &[&str]) -> Self {
        self.comments.insert(
            permalink.to_string(),
            comments.iter().map(|c| c.to_string()).collect(),
        );
        self
    }

    pub fn page_calls(&self, source: &Source) -> usize {
        self.page_calls
            .lock()
            .unwrap()
            .get(&source.label())
            .copied()
            .unwrap_or(0)
    }

    pub fn total_page_calls(&self) -> usize {
        self.page_calls.lock().unwrap().values().sum()
    }

    pub fn comment_calls(&self) -> usize {
        self.comment_calls.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeedFetcher for ScriptedFetcher {
    async fn fetch_page(
        &self,
        _session: &SessionHandle,
        source: &Source,
        request: PageRequest,
    ) -> Result<FeedPage> {
        *self
            .page_calls
            .lock()
            .unwrap()
            .entry(source.label())
            .or_insert(0) += 1;

        match self.sources.get(&source.label()) {
            Some(SourceScript::Pages(pages)) => Ok(pages
                .get(request.page_index as usize)
                .cloned()
                .unwrap_or_else(FeedPage::exhausted)),
            Some(SourceScript::Fail(error)) => Err(error()),
            Some(SourceScript::Hang) => future::pending().await,
            None => Ok(FeedPage::exhausted()),
        }
    }

    async fn fetch_comments(
        &self,
        _session: &SessionHandle,
        _source: &Source,
        permalink: &str,
        limit: usize,
    ) -> Vec<String> {
        self.comment_calls.fetch_add(1, Ordering::SeqCst);
        self.comments
            .get(permalink)
            .map(|c| c.iter().take(limit).cloned().collect())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Record helpers
// ---------------------------------------------------------------------------

/// An extracted item with a title, an age string, and a permalink.
pub fn raw_record(title: &str, age: &str, permalink: &str) -> RawRecord {
    RawRecord {
        title: Some(title.to_string()),
        age: Some(age.to_string()),
        author: Some("u/tester".to_string()),
        score: "1.2k".to_string(),
        comments: "34".to_string(),
        permalink: Some(permalink.to_string()),
        kind: Some("text".to_string()),
        ..Default::default()
    }
}
