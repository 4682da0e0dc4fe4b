pub mod reddit;
pub mod twitter;

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use hypesignal_common::{Platform, Source};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;
use crate::session::SessionHandle;

pub use reddit::RedditFetcher;
pub use twitter::TwitterFetcher;

/// One extracted item, fields unparsed. Counts and ages are handed to the
/// orchestrator as raw strings so parsing lives in one place.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RawRecord {
    pub title: Option<String>,
    pub content: Option<String>,
    pub author: Option<String>,
    pub timestamp: Option<String>,
    pub age: Option<String>,
    pub score: String,
    pub comments: String,
    pub secondary: String,
    pub permalink: Option<String>,
    pub kind: Option<String>,
}

/// Whether a feed has more to give after this page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    More,
    Exhausted,
    RateLimited,
}

#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    /// 0 for the first page of a source; later pages scroll for more.
    pub page_index: u32,
    pub page_size: usize,
    /// Reload the listing once after the first navigation.
    pub refresh: bool,
}

#[derive(Debug, Clone)]
pub struct FeedPage {
    pub records: Vec<RawRecord>,
    pub continuation: Continuation,
}

impl FeedPage {
    pub fn exhausted() -> Self {
        Self {
            records: Vec::new(),
            continuation: Continuation::Exhausted,
        }
    }
}

#[async_trait]
pub trait FeedFetcher: Send + Sync {
    /// Extract one page of raw records from a source's listing.
    async fn fetch_page(
        &self,
        session: &SessionHandle,
        source: &Source,
        request: PageRequest,
    ) -> Result<FeedPage>;

    /// Comment texts for one item, then return to the source listing.
    /// Failures degrade to an empty list.
    async fn fetch_comments(
        &self,
        session: &SessionHandle,
        source: &Source,
        permalink: &str,
        limit: usize,
    ) -> Vec<String>;
}

// ---------------------------------------------------------------------------
// FeedRouter
// ---------------------------------------------------------------------------

/// Dispatches to the fetcher for a source's platform.
pub struct FeedRouter {
    reddit: RedditFetcher,
    twitter: TwitterFetcher,
}

impl FeedRouter {
    pub fn new() -> Self {
        Self {
            reddit: RedditFetcher::new(),
            twitter: TwitterFetcher::new(),
        }
    }

    fn for_platform(&self, platform: Platform) -> &dyn FeedFetcher {
        match platform {
            Platform::Reddit => &self.reddit,
            Platform::Twitter => &self.twitter,
        }
    }
}

impl Default for FeedRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeedFetcher for FeedRouter {
    async fn fetch_page(
        &self,
        session: &SessionHandle,
        source: &Source,
        request: PageRequest,
    ) -> Result<FeedPage> {
        self.for_platform(source.platform)
            .fetch_page(session, source, request)
            .await
    }

    async fn fetch_comments(
        &self,
        session: &SessionHandle,
        source: &Source,
        permalink: &str,
        limit: usize,
    ) -> Vec<String> {
        self.for_platform(source.platform)
            .fetch_comments(session, source, permalink, limit)
            .await
    }
}

// ---------------------------------------------------------------------------
// Shared extraction helpers
// ---------------------------------------------------------------------------

const SCROLL_TO_BOTTOM: &str = "window.scrollTo(0, document.body.scrollHeight); true";
const SCROLL_BY_SCREEN: &str = "window.scrollBy(0, 1000); true";
const BODY_TEXT: &str =
    "document.body ? document.body.innerText.slice(0, 4000).toLowerCase() : ''";

const RATE_LIMIT_MARKERS: &[&str] = &["too many requests", "rate limit", "rate-limit"];

const COMMENT_WAIT: Duration = Duration::from_secs(10);
const COMMENT_POLL: Duration = Duration::from_secs(1);
const COMMENT_SCROLLS: usize = 6;
const COMMENT_SCROLL_PAUSE: Duration = Duration::from_millis(700);
const LISTING_SCROLLS: usize = 3;
const LISTING_SCROLL_PAUSE: Duration = Duration::from_secs(1);

/// Script results arrive either raw or wrapped as `{ "result": ... }`.
pub fn unwrap_script_result(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("result") => {
            map.remove("result").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn parse_records(value: Value, limit: usize) -> Vec<RawRecord> {
    match unwrap_script_result(value) {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<RawRecord>(item) {
                Ok(record) => Some(record),
                Err(e) => {
                    debug!(error = %e, "Skipping malformed extracted item");
                    None
                }
            })
            .take(limit)
            .collect(),
        _ => Vec::new(),
    }
}

pub fn is_rate_limited(body_text: &str) -> bool {
    let lower = body_text.to_lowercase();
    RATE_LIMIT_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Shared page-extraction flow: navigate (or scroll for later pages), run
/// the extraction script, and classify an empty result.
pub(crate) async fn extract_page(
    session: &SessionHandle,
    source: &Source,
    request: PageRequest,
    script: &str,
) -> Result<FeedPage> {
    if request.page_index == 0 {
        let url = source.feed_url();
        session.navigate(&url).await?;
        if request.refresh {
            debug!(source = %source, "Refreshing listing once");
            session.navigate(&url).await?;
        }
    } else {
        scroll(session, SCROLL_TO_BOTTOM, LISTING_SCROLLS, LISTING_SCROLL_PAUSE).await?;
    }

    let records = parse_records(session.evaluate(script).await?, request.page_size);
    if !records.is_empty() {
        return Ok(FeedPage {
            records,
            continuation: Continuation::More,
        });
    }

    let body = session.evaluate(BODY_TEXT).await.unwrap_or(Value::Null);
    let continuation = match unwrap_script_result(body) {
        Value::String(text) if is_rate_limited(&text) => Continuation::RateLimited,
        _ => Continuation::Exhausted,
    };
    Ok(FeedPage {
        records,
        continuation,
    })
}

async fn scroll(session: &SessionHandle, script: &str, times: usize, pause: Duration) -> Result<()> {
    for _ in 0..times {
        session.evaluate(script).await?;
        tokio::time::sleep(pause).await;
    }
    Ok(())
}

/// Scripts used by [`collect_comments`]. `probe` must evaluate to a boolean
/// (any comment present), `extract` to an array of strings.
pub(crate) struct CommentScripts<'a> {
    pub probe: &'a str,
    pub extract: String,
}

/// Shared comment flow: open the item, wait for the first comment, scroll
/// to load more, extract, then return to the listing.
pub(crate) async fn collect_comments(
    session: &SessionHandle,
    source: &Source,
    permalink: &str,
    limit: usize,
    scripts: CommentScripts<'_>,
) -> Vec<String> {
    let comments = match load_comments(session, permalink, limit, &scripts).await {
        Ok(comments) => comments,
        Err(e) => {
            warn!(permalink, error = %e, "Comment extraction failed");
            Vec::new()
        }
    };

    if let Err(e) = session.navigate(&source.feed_url()).await {
        warn!(source = %source, error = %e, "Failed to return to listing");
    }
    comments
}

async fn load_comments(
    session: &SessionHandle,
    permalink: &str,
    limit: usize,
    scripts: &CommentScripts<'_>,
) -> Result<Vec<String>> {
    session.navigate(permalink).await?;

    let mut waited = Duration::ZERO;
    let mut found = false;
    while waited < COMMENT_WAIT {
        tokio::time::sleep(COMMENT_POLL).await;
        waited += COMMENT_POLL;
        if let Ok(value) = session.evaluate(scripts.probe).await {
            if unwrap_script_result(value).as_bool() == Some(true) {
                found = true;
                break;
            }
        }
    }
    if !found {
        debug!(permalink, waited_secs = waited.as_secs(), "No comments appeared");
    }

    scroll(session, SCROLL_BY_SCREEN, COMMENT_SCROLLS, COMMENT_SCROLL_PAUSE).await?;

    let value = unwrap_script_result(session.evaluate(&scripts.extract).await?);
    let comments = match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|v| v.as_str().and_then(clean_comment))
            .take(limit)
            .collect(),
        _ => Vec::new(),
    };
    Ok(comments)
}

static UI_CHROME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(reply|share|report|give award|permalink|embed|save|parent|context|level \d+)\b")
        .expect("valid regex")
});
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Strip UI words and collapse whitespace; drop anything 10 chars or shorter.
pub fn clean_comment(raw: &str) -> Option<String> {
    let stripped = UI_CHROME.replace_all(raw, " ");
    let collapsed = WHITESPACE.replace_all(&stripped, " ");
    let text = collapsed.trim();
    if text.chars().count() > 10 {
        Some(text.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unwraps_wrapped_results() {
        assert_eq!(unwrap_script_result(json!({"result": [1, 2]})), json!([1, 2]));
        assert_eq!(unwrap_script_result(json!([1, 2])), json!([1, 2]));
        assert_eq!(unwrap_script_result(json!({"other": 1})), json!({"other": 1}));
    }

    #[test]
    fn parses_records_and_skips_malformed() {
        let value = json!({"result": [
            {"title": "Moon soon", "score": "1.2k", "age": "2 hours ago", "permalink": "https://r/1"},
            "not an object",
            {"title": "Second", "score": "4"}
        ]});
        let records = parse_records(value, 25);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].score, "1.2k");
        assert_eq!(records[0].age.as_deref(), Some("2 hours ago"));
        assert_eq!(records[1].comments, "");
    }

    #[test]
    fn page_size_caps_records() {
        let items: Vec<Value> = (0..10).map(|i| json!({"title": format!("t{i}")})).collect();
        assert_eq!(parse_records(Value::Array(items), 4).len(), 4);
    }

    #[test]
    fn rate_limit_markers() {
        assert!(is_rate_limited("Whoa there, pardner! Too Many Requests"));
        assert!(is_rate_limited("you've hit a rate limit"));
        assert!(!is_rate_limited("no posts yet"));
    }

    #[test]
    fn comment_cleanup() {
        assert_eq!(
            clean_comment("  This token is going   to the moon  Reply Share "),
            Some("This token is going to the moon".to_string())
        );
        assert_eq!(clean_comment("Reply"), None);
        assert_eq!(clean_comment("too short"), None);
    }
}
