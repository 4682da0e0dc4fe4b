//! Recency window over informal age strings ("3 days ago", "2 hr. ago",
//! "1 mo. ago"). Unparsable ages count as recent: dropping a fresh item is
//! worse than keeping a stale one.

use std::sync::LazyLock;

use regex::Regex;

static MONTHS_OR_YEARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\d+\s*(months?|mos?\.?|years?|yrs?\.?|y\.?)\s*ago").expect("valid regex")
});
static WEEKS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*(weeks?|wks?\.?|w\.?)\s*ago").expect("valid regex"));
static DAYS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*(days?|d\.?)\s*ago").expect("valid regex"));

/// Whether an item of the given age falls inside a `horizon_days` window.
///
/// Month/year ages are always outside; week ages are inside only for
/// "0 weeks"; day ages are inside when strictly below the horizon. Anything
/// else (hours, minutes, "just now", absolute dates, empty) is inside.
pub fn within_horizon(age: &str, horizon_days: u32) -> bool {
    let age = age.trim();
    if age.is_empty() {
        return true;
    }
    if MONTHS_OR_YEARS.is_match(age) {
        return false;
    }
    if let Some(caps) = WEEKS.captures(age) {
        return caps[1].parse::<u64>().map(|weeks| weeks == 0).unwrap_or(true);
    }
    if let Some(caps) = DAYS.captures(age) {
        return caps[1]
            .parse::<u64>()
            .map(|days| days < u64::from(horizon_days))
            .unwrap_or(true);
    }
    true
}

/// Feeds are newest-first, so a run of `threshold` consecutive rejected items
/// means the rest of the feed is older still.
pub fn source_exhausted(consecutive_out_of_horizon: u32, threshold: u32) -> bool {
    threshold > 0 && consecutive_out_of_horizon >= threshold
}
