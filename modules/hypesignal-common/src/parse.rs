use std::sync::LazyLock;

use regex::Regex;

static LEADING_COUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]+(?:\.[0-9]+)?)\s*([kmb])?").expect("valid regex"));

/// Parse an abbreviated engagement count: `"1.2k"` → 1200, `"3M"` → 3_000_000,
/// `"12 comments"` → 12. Anything without a leading number is 0.
pub fn parse_count(raw: &str) -> u64 {
    let cleaned = raw.trim().to_lowercase().replace(',', "");
    let Some(caps) = LEADING_COUNT.captures(&cleaned) else {
        return 0;
    };
    let Ok(value) = caps[1].parse::<f64>() else {
        return 0;
    };
    let multiplier = match caps.get(2).map(|m| m.as_str()) {
        Some("k") => 1_000.0,
        Some("m") => 1_000_000.0,
        Some("b") => 1_000_000_000.0,
        _ => 1.0,
    };
    (value * multiplier).round() as u64
}

/// Longest prefix of `s` that is at most `max_bytes` long and ends on a
/// char boundary.
pub fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abbreviated_counts() {
        assert_eq!(parse_count("1.2k"), 1200);
        assert_eq!(parse_count("3M"), 3_000_000);
        assert_eq!(parse_count("87"), 87);
        assert_eq!(parse_count("12 comments"), 12);
        assert_eq!(parse_count("1,204"), 1204);
        assert_eq!(parse_count(" 4.5K "), 4500);
    }

    #[test]
    fn unparseable_counts_are_zero() {
        assert_eq!(parse_count(""), 0);
        assert_eq!(parse_count("Vote"), 0);
        assert_eq!(parse_count("•"), 0);
    }

    #[test]
    fn truncation_respects_multibyte_chars() {
        let s = "ab🚀cd";
        assert_eq!(truncate_to_char_boundary(s, 3), "ab");
        assert_eq!(truncate_to_char_boundary(s, 6), "ab🚀");
        assert_eq!(truncate_to_char_boundary(s, 100), s);
    }
}
