use serde::{Deserialize, Serialize};

// --- Platforms & Sources ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Reddit,
    Twitter,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Reddit => write!(f, "reddit"),
            Platform::Twitter => write!(f, "twitter"),
        }
    }
}

/// Communities scraped when no sources are given, in priority order.
pub const DEFAULT_SOURCES: &[&str] = &[
    "pumpfun",
    "CryptoMoonShots",
    "altcoin",
    "SolanaMemeCoins",
    "memecoin",
    "SatoshiStreetBets",
    "solana",
];

/// One feed to scrape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Source {
    pub platform: Platform,
    pub name: String,
}

impl Source {
    /// `r/<name>` and bare names are Reddit communities, `#<tag>` is a
    /// Twitter hashtag. Returns `None` for an empty identifier.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (platform, name) = if let Some(tag) = raw.strip_prefix('#') {
            (Platform::Twitter, tag)
        } else if let Some(sub) = raw.strip_prefix("r/").or_else(|| raw.strip_prefix("/r/")) {
            (Platform::Reddit, sub)
        } else {
            (Platform::Reddit, raw)
        };
        let name = name.trim_matches('/').trim();
        if name.is_empty() {
            return None;
        }
        Some(Self {
            platform,
            name: name.to_string(),
        })
    }

    pub fn reddit(name: &str) -> Self {
        Self {
            platform: Platform::Reddit,
            name: name.to_string(),
        }
    }

    pub fn hashtag(tag: &str) -> Self {
        Self {
            platform: Platform::Twitter,
            name: tag.to_string(),
        }
    }

    pub fn defaults() -> Vec<Self> {
        DEFAULT_SOURCES.iter().map(|name| Self::reddit(name)).collect()
    }

    /// The `source` field of records from this feed.
    pub fn label(&self) -> String {
        match self.platform {
            Platform::Reddit => format!("r/{}", self.name),
            Platform::Twitter => format!("#{}", self.name),
        }
    }

    /// Newest-first listing URL.
    pub fn feed_url(&self) -> String {
        match self.platform {
            Platform::Reddit => format!("https://www.reddit.com/r/{}/new/", self.name),
            Platform::Twitter => format!(
                "https://twitter.com/search?q=%23{}&src=hashtag_click&f=live",
                self.name
            ),
        }
    }

    /// Filesystem-safe name, e.g. for screenshot files.
    pub fn slug(&self) -> String {
        let prefix = match self.platform {
            Platform::Reddit => "r",
            Platform::Twitter => "tag",
        };
        let name: String = self
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
            .collect();
        format!("{prefix}-{name}")
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label())
    }
}

// --- Records ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Text,
    Image,
    Link,
    Video,
}

impl ItemKind {
    /// Lenient mapping from extraction output; unknown kinds become `Text`.
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "image" | "gallery" => ItemKind::Image,
            "link" => ItemKind::Link,
            "video" => ItemKind::Video,
            _ => ItemKind::Text,
        }
    }
}

/// One scraped item with its engagement metadata and comments. Also the
/// persisted shape (see [`StoreEntry`]).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Record {
    /// Discovery id, assigned by the store's id allocator.
    pub id: u64,
    pub source: String,
    pub platform: Platform,
    pub title: Option<String>,
    pub content: Option<String>,
    pub author: Option<String>,
    pub timestamp: Option<String>,
    pub post_age: Option<String>,

    pub upvotes_likes: u64,
    pub comment_count: u64,
    pub share_count: u64,
    pub award_count: u64,

    pub comments: Vec<String>,
    pub link: Option<String>,
    pub post_type: Option<ItemKind>,
    pub screenshot_path: Option<String>,

    /// Classification label; `None` until enrichment produces one.
    pub token_name: Option<String>,
}

/// Persisted, merged representation of a [`Record`].
pub type StoreEntry = Record;

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|s| !s.trim().is_empty())
}

impl Record {
    /// Non-empty permalink, if any.
    pub fn permalink(&self) -> Option<&str> {
        self.link.as_deref().filter(|l| !l.trim().is_empty())
    }

    /// Merge a newer observation of the same item into this one.
    ///
    /// Last non-empty value wins per field: empty strings, zero counters, an
    /// empty comment list and a missing label never overwrite existing data.
    /// An existing label is only replaced by one at least as long, so a
    /// truncated answer never downgrades it. The discovery id is kept.
    pub fn merge_from(&mut self, newer: Record) {
        fn take(current: &mut Option<String>, newer: Option<String>) {
            if non_empty(&newer) {
                *current = newer;
            }
        }
        fn take_label(current: &mut Option<String>, newer: Option<String>) {
            let Some(newer) = newer.filter(|l| !l.trim().is_empty()) else {
                return;
            };
            match current.as_deref() {
                Some(existing) if newer.len() < existing.len() => {}
                _ => *current = Some(newer),
            }
        }
        fn take_count(current: &mut u64, newer: u64) {
            if newer > 0 {
                *current = newer;
            }
        }

        if !newer.source.is_empty() {
            self.source = newer.source;
        }
        take(&mut self.title, newer.title);
        take(&mut self.content, newer.content);
        take(&mut self.author, newer.author);
        take(&mut self.timestamp, newer.timestamp);
        take(&mut self.post_age, newer.post_age);
        take(&mut self.link, newer.link);
        take(&mut self.screenshot_path, newer.screenshot_path);
        take_label(&mut self.token_name, newer.token_name);

        take_count(&mut self.upvotes_likes, newer.upvotes_likes);
        take_count(&mut self.comment_count, newer.comment_count);
        take_count(&mut self.share_count, newer.share_count);
        take_count(&mut self.award_count, newer.award_count);

        if !newer.comments.is_empty() {
            self.comments = newer.comments;
        }
        if newer.post_type.is_some() {
            self.post_type = newer.post_type;
        }
    }

    /// Text handed to the classifier: title, body and a few comments.
    pub fn classification_text(&self, max_comments: usize) -> String {
        let mut parts = Vec::new();
        if let Some(title) = self.title.as_deref().filter(|s| !s.is_empty()) {
            parts.push(format!("Title: {title}"));
        }
        if let Some(content) = self.content.as_deref().filter(|s| !s.is_empty()) {
            parts.push(format!("Content: {content}"));
        }
        let comments: Vec<&str> = self
            .comments
            .iter()
            .take(max_comments)
            .map(String::as_str)
            .collect();
        if !comments.is_empty() {
            parts.push(format!("Comments: {}", comments.join(" | ")));
        }
        parts.join("\n")
    }
}
