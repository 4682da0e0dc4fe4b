use async_trait::async_trait;
use hypesignal_common::Source;

use super::{collect_comments, extract_page, CommentScripts, FeedFetcher, FeedPage, PageRequest};
use crate::error::Result;
use crate::session::SessionHandle;

// The first article on a status page is the tweet itself.
const REPLY_PROBE: &str = "document.querySelectorAll('article[data-testid=\"tweet\"]').length > 1";

/// Live hashtag search results rendered as tweet articles.
pub struct TwitterFetcher;

impl TwitterFetcher {
    pub fn new() -> Self {
        Self
    }

    fn listing_script(limit: usize) -> String {
        format!(
            r#"(function() {{
    const out = [];
    const count = (el) => {{
        if (!el) return '0';
        const m = (el.getAttribute('aria-label') || '').match(/([\d.,]+\s*[KkMm]?)/);
        return m ? m[1] : '0';
    }};
    const els = document.querySelectorAll('article[data-testid="tweet"]');
    for (let i = 0; i < Math.min({limit}, els.length); i++) {{
        const t = els[i];
        const text = t.querySelector('[data-testid="tweetText"]');
        const content = text ? text.textContent.trim() : '';
        const authorLink = t.querySelector('[data-testid="User-Name"] a[href^="/"]');
        const author = authorLink ? authorLink.getAttribute('href').replace('/', '@') : '';
        if (!content && !author) continue;
        const time = t.querySelector('time');
        const link = t.querySelector('a[href*="/status/"]');
        let permalink = '';
        if (link) {{
            const href = link.getAttribute('href');
            permalink = href.startsWith('http') ? href : 'https://twitter.com' + href;
        }}
        let kind = 'text';
        if (t.querySelector('[data-testid="tweetPhoto"] img')) kind = 'image';
        if (t.querySelector('video')) kind = 'video';
        out.push({{
            content: content,
            author: author,
            timestamp: time ? (time.getAttribute('datetime') || '') : '',
            age: time ? (time.getAttribute('title') || time.textContent.trim()) : '',
            score: count(t.querySelector('[data-testid="like"]')),
            comments: count(t.querySelector('[data-testid="reply"]')),
            secondary: count(t.querySelector('[data-testid="retweet"]')),
            permalink: permalink,
            kind: kind
        }});
    }}
    return out;
}})()"#
        )
    }

    fn reply_script(limit: usize) -> String {
        format!(
            r#"(function() {{
    const out = [];
    const els = Array.from(document.querySelectorAll('article[data-testid="tweet"]')).slice(1);
    for (let i = 0; i < Math.min({limit}, els.length); i++) {{
        const text = els[i].querySelector('[data-testid="tweetText"]');
        if (text) out.push(text.textContent.trim());
    }}
    return out;
}})()"#
        )
    }
}

impl Default for TwitterFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeedFetcher for TwitterFetcher {
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
            probe: REPLY_PROBE,
            extract: Self::reply_script(limit),
        };
        collect_comments(session, source, permalink, limit, scripts).await
    }
}
