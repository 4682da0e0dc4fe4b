use async_trait::async_trait;
use hypesignal_common::Source;

use super::{collect_comments, extract_page, CommentScripts, FeedFetcher, FeedPage, PageRequest};
use crate::error::Result;
use crate::session::SessionHandle;

const COMMENT_PROBE: &str = "document.querySelectorAll('shreddit-comment').length > 0";

/// Reddit `/new/` listings rendered as `shreddit-post` elements.
pub struct RedditFetcher;

impl RedditFetcher {
    pub fn new() -> Self {
        Self
    }

    fn listing_script(limit: usize) -> String {
        format!(
            r#"(function() {{
    const out = [];
    const els = document.querySelectorAll('shreddit-post');
    for (let i = 0; i < Math.min({limit}, els.length); i++) {{
        const p = els[i];
        let title = p.getAttribute('post-title') || '';
        if (!title) {{
            const t = p.querySelector('a[slot="title"]');
            title = t ? t.textContent.trim() : '';
        }}
        if (!title || title.length <= 3) continue;
        let body = '';
        const tb = p.querySelector('shreddit-post-text-body');
        if (tb) {{
            const d = tb.querySelector('.md, [class*="feed-card-text-preview"], p');
            if (d) body = d.textContent.trim();
        }}
        const permalink = p.getAttribute('permalink') || '';
        const author = p.getAttribute('author') || '';
        const age = p.querySelector('faceplate-timeago time');
        out.push({{
            title: title,
            content: body,
            author: author ? ('u/' + author) : '',
            timestamp: p.getAttribute('created-timestamp') || '',
            age: age ? age.textContent.trim() : '',
            score: String(p.getAttribute('score') || '0'),
            comments: String(p.getAttribute('comment-count') || '0'),
            secondary: String(p.getAttribute('award-count') || '0'),
            permalink: permalink ? (permalink.startsWith('http') ? permalink : 'https://www.reddit.com' + permalink) : '',
            kind: p.getAttribute('post-type') || 'text'
        }});
    }}
    return out;
}})()"#
        )
    }

    fn comment_script(limit: usize) -> String {
        format!(
            r#"(function() {{
    const out = [];
    const els = document.querySelectorAll('shreddit-comment');
    const selectors = ['shreddit-comment-body', '[slot="comment-body"]', '[slot="comment"]',
        '[id*="-comment-rtjson-content"]', '.md', 'p'];
    for (let i = 0; i < Math.min({limit}, els.length); i++) {{
        const c = els[i];
        let text = '';
        for (const s of selectors) {{
            const n = c.querySelector(s);
            if (n && n.textContent.trim().length > 10) {{ text = n.textContent.trim(); break; }}
        }}
        if (!text) text = c.textContent.trim();
        if (text) out.push(text);
    }}
    return out;
}})()"#
        )
    }
}

impl Default for RedditFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeedFetcher for RedditFetcher {
    async fn fetch_page(
        &self,
        session: &SessionHandle,
        source: &Source,
        request: PageRequest,
    ) -> Result<FeedPage> {
        let script = Self::listing_script(request.page_size);
        extract_page(session, source, request, &script).await
    }

    async fn fetch_comments(
        &self,
        session: &SessionHandle,
        source: &Source,
        permalink: &str,
        limit: usize,
    ) -> Vec<String> {
        let scripts = CommentScripts {
            probe: COMMENT_PROBE,
            extract: Self::comment_script(limit),
        };
        collect_comments(session, source, permalink, limit, scripts).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::fetcher::Continuation;
    use crate::session::SessionConfig;
    use crate::testing::{MockConnector, MockSessionBackend};

    async fn active_session(connector: Arc<MockConnector>) -> SessionHandle {
        let config = SessionConfig {
            navigation_settle: std::time::Duration::ZERO,
            ..SessionConfig::default()
        };
        let session = SessionHandle::new(Arc::new(MockSessionBackend::new()), connector, config);
        session.start().await.unwrap();
        session
    }

    #[test]
    fn listing_script_embeds_limit() {
        let script = RedditFetcher::listing_script(25);
        assert!(script.contains("Math.min(25, els.length)"));
        assert!(script.contains("shreddit-post"));
    }

    #[tokio::test(start_paused = true)]
    async fn first_page_navigates_with_refresh() {
        let connector = Arc::new(MockConnector::new());
        connector.channel().on_script(
            "shreddit-post",
            json!({"result": [{"title": "New $PEPE launch", "score": "12", "age": "1 hr. ago"}]}),
        );
        let session = active_session(connector.clone()).await;
        let source = Source::reddit("pumpfun");

        let page = RedditFetcher::new()
            .fetch_page(&session, &source, PageRequest { page_index: 0, page_size: 25, refresh: true })
            .await
            .unwrap();

        assert_eq!(page.continuation, Continuation::More);
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].title.as_deref(), Some("New $PEPE launch"));
        assert_eq!(
            connector.channel().navigations(),
            vec![source.feed_url(), source.feed_url()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn empty_page_is_exhausted_or_rate_limited() {
        let connector = Arc::new(MockConnector::new());
        connector.channel().on_script("shreddit-post", json!([]));
        connector.channel().on_script("innerText", json!("too many requests"));
        let session = active_session(connector.clone()).await;

        let page = RedditFetcher::new()
            .fetch_page(
                &session,
                &Source::reddit("altcoin"),
                PageRequest { page_index: 1, page_size: 25, refresh: false },
            )
            .await
            .unwrap();

        assert_eq!(page.continuation, Continuation::RateLimited);
        // later pages scroll instead of navigating
        assert!(connector.channel().navigations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn comments_are_cleaned_and_listing_restored() {
        let connector = Arc::new(MockConnector::new());
        connector.channel().on_script("length > 0", json!(true));
        connector.channel().on_script(
            "shreddit-comment-body",
            json!(["This one is going to run hard Reply", "ok", "Another long enough comment"]),
        );
        let session = active_session(connector.clone()).await;
        let source = Source::reddit("pumpfun");

        let comments = RedditFetcher::new()
            .fetch_comments(&session, &source, "https://www.reddit.com/r/pumpfun/comments/x", 50)
            .await;

        assert_eq!(
            comments,
            vec![
                "This one is going to run hard".to_string(),
                "Another long enough comment".to_string()
            ]
        );
        assert_eq!(
            connector.channel().navigations().last().cloned(),
            Some(source.feed_url())
        );
    }
}
