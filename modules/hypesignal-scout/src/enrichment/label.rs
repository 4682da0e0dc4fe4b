use std::sync::LazyLock;

use hypesignal_common::{truncate_to_char_boundary, Record};
use regex::Regex;
use serde_json::Value;

/// Maximum prompt payload, in bytes, before truncation.
pub const MAX_PROMPT_TEXT: usize = 2000;
/// Comments included in the prompt.
pub const PROMPT_COMMENTS: usize = 5;

const TICKER_STOPLIST: &[&str] = &["THE", "THIS", "THAT", "WITH", "FROM", "HAVE", "HERE", "THERE"];
const ANSWER_STOPLIST: &[&str] = &[
    "HAVE", "THE", "THIS", "THAT", "WITH", "FROM", "WHEN", "WHAT", "WHERE", "WHICH", "UNKNOWN",
];
const EMPTY_ANSWERS: &[&str] = &["unknown", "none", "n/a"];

static TICKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([A-Z0-9]{2,5})\b").expect("valid regex"));
static ANSWER_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$?\b([A-Z]{2,10})\b").expect("valid regex"));
static LABEL_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{2,10}$").expect("valid regex"));
static ANSWER_WRAPPER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\{.*?['"]answer['"]\s*:\s*['"]"#).expect("valid regex"));
static TRAILING_QUOTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"['"].*"#).expect("valid regex"));

/// Zero-network label: an explicit `$TICKER` in the title.
pub fn quick_label(title: &str) -> Option<String> {
    TICKER
        .captures_iter(title)
        .map(|caps| caps[1].to_string())
        // "$100" is a price, not a ticker
        .filter(|t| !t.chars().all(|c| c.is_ascii_digit()))
        .find(|t| !TICKER_STOPLIST.contains(&t.as_str()))
}

/// Prompt asking the classifier for the token name only.
pub fn build_prompt(record: &Record) -> String {
    let text = record.classification_text(PROMPT_COMMENTS);
    let body = if text.len() > MAX_PROMPT_TEXT {
        format!("{}...", truncate_to_char_boundary(&text, MAX_PROMPT_TEXT))
    } else {
        text
    };
    format!(
        "Analyze this crypto post text and identify the main token/coin name mentioned: {body}\n\n\
         IMPORTANT: Return ONLY the token name in uppercase letters (e.g., EMPI, HEGE, DOGE, SOL, BTC, ETH). \
         Do NOT navigate to any website. Do NOT include any explanation. \
         If no token is found, return exactly: UNKNOWN\n\nToken name:"
    )
}

fn is_label(candidate: &str) -> bool {
    LABEL_SHAPE.is_match(candidate) && !ANSWER_STOPLIST.contains(&candidate)
}

fn last_token(text: &str) -> Option<String> {
    ANSWER_TOKEN
        .captures_iter(text)
        .last()
        .map(|caps| caps[1].to_string())
        .filter(|t| is_label(t))
}

/// Best-effort label from free-form classifier output.
///
/// Cascade: structured `answer` field, then the last uppercase token in the
/// text (stoplisted), then the whole string, then its first word.
pub fn extract_label(result: &Value) -> Option<String> {
    if let Some(answer) = result.get("answer").filter(|a| !a.is_null()) {
        let answer = match answer {
            Value::String(s) => s.trim().to_string(),
            other => other.to_string(),
        };
        if is_label(&answer) {
            return Some(answer);
        }
        if let Some(token) = last_token(&answer) {
            return Some(token);
        }
    }

    let raw = match result {
        Value::String(s) => s.clone(),
        Value::Object(map) => {
            return map
                .values()
                .filter(|v| v.is_string())
                .find_map(extract_label);
        }
        Value::Null => return None,
        other => other.to_string(),
    };
    let unwrapped = ANSWER_WRAPPER.replace(&raw, "");
    let text = TRAILING_QUOTE.replace(&unwrapped, "");
    let text = text.trim();

    if text.is_empty() || EMPTY_ANSWERS.contains(&text.to_lowercase().as_str()) {
        return None;
    }
    if let Some(token) = last_token(text) {
        return Some(token);
    }
    if is_label(text) {
        return Some(text.to_string());
    }
    text.split_whitespace()
        .next()
        .filter(|w| is_label(w))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn quick_label_finds_dollar_ticker() {
        assert_eq!(quick_label("Huge pump incoming $ABCD").as_deref(), Some("ABCD"));
        assert_eq!(quick_label("$WIF and $BONK").as_deref(), Some("WIF"));
    }

    #[test]
    fn quick_label_rejects_stoplist_prices_and_lowercase() {
        assert_eq!(quick_label("$THE moon"), None);
        assert_eq!(quick_label("Turned $100 into $5000"), None);
        assert_eq!(quick_label("$pepe is back"), None);
        assert_eq!(quick_label("no ticker here"), None);
        assert_eq!(quick_label("$TOOLONG"), None);
    }

    #[test]
    fn structured_answer_field() {
        assert_eq!(extract_label(&json!({"answer": "HEGE"})).as_deref(), Some("HEGE"));
        assert_eq!(
            extract_label(&json!({"answer": "The token is $EMPI"})).as_deref(),
            Some("EMPI")
        );
    }

    #[test]
    fn plain_string_answers() {
        assert_eq!(extract_label(&json!("DOGE")).as_deref(), Some("DOGE"));
        assert_eq!(
            extract_label(&json!("The main token mentioned is SOL")).as_deref(),
            Some("SOL")
        );
        assert_eq!(extract_label(&json!("{'answer': 'PEPE'}")).as_deref(), Some("PEPE"));
    }

    #[test]
    fn object_without_answer_searches_string_fields() {
        assert_eq!(extract_label(&json!({"text": "BONK", "steps": 2})).as_deref(), Some("BONK"));
        assert_eq!(extract_label(&json!({"steps": 2})), None);
    }

    #[test]
    fn unknown_and_stoplisted_answers_yield_nothing() {
        assert_eq!(extract_label(&json!("UNKNOWN")), None);
        assert_eq!(extract_label(&json!("unknown")), None);
        assert_eq!(extract_label(&json!("n/a")), None);
        assert_eq!(extract_label(&json!("WHAT")), None);
        assert_eq!(extract_label(&json!("i could not find anything")), None);
        assert_eq!(extract_label(&Value::Null), None);
    }

    #[test]
    fn prompt_is_truncated_at_char_boundary() {
        let record = Record {
            title: Some("🚀".repeat(1200)),
            ..Default::default()
        };
        let prompt = build_prompt(&record);
        assert!(prompt.contains("..."));
        assert!(prompt.ends_with("Token name:"));
        assert!(prompt.len() < MAX_PROMPT_TEXT + 600);
    }

    #[test]
    fn prompt_includes_up_to_five_comments() {
        let record = Record {
            title: Some("New launch".into()),
            comments: (0..7).map(|i| format!("comment number {i}")).collect(),
            ..Default::default()
        };
        let prompt = build_prompt(&record);
        assert!(prompt.contains("comment number 4"));
        assert!(!prompt.contains("comment number 5"));
    }
}
