//! Parsers for human-formatted values scraped off platform pages
//!
//! Scrape targets render viewer counts as "1.2k" / "3M" / "1,234" and last
//! broadcast times as relative phrases like "5 minutes ago". Both parsers
//! degrade to a harmless default instead of failing the record.

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use std::sync::LazyLock;

/// Converts viewer text like "1.2k", "3m" or "1,234" into a count.
///
/// Any unparseable input yields 0.
pub fn parse_viewer_count(text: &str) -> u32 {
    let cleaned = text.replace(',', "").trim().to_ascii_lowercase();
    if cleaned.is_empty() {
        return 0;
    }

    let (digits, multiplier) = if let Some(stripped) = cleaned.strip_suffix('k') {
        (stripped, 1_000.0)
    } else if let Some(stripped) = cleaned.strip_suffix('m') {
        (stripped, 1_000_000.0)
    } else {
        (cleaned.as_str(), 1.0)
    };

    match digits.trim().parse::<f64>() {
        Ok(value) if value >= 0.0 => (value * multiplier) as u32,
        _ => 0,
    }
}

static RELATIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+)\s+(second|minute|hour|day|week|month|year)s?\s+ago").expect("valid regex")
});

/// Converts a relative phrase like "5 minutes ago" or "2 weeks ago" into an
/// absolute timestamp relative to `now`.
///
/// Returns `None` for text that carries no broadcast time ("Not Available",
/// empty, unrecognized). Months are approximated at 30 days, matching how the
/// phrases are produced.
pub fn parse_relative_time(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() || text.eq_ignore_ascii_case("not available") {
        return None;
    }
    if text.eq_ignore_ascii_case("just now") || text.eq_ignore_ascii_case("now") {
        return Some(now);
    }

    let caps = RELATIVE_RE.captures(text)?;
    let value: i64 = caps[1].parse().ok()?;
    let seconds = match caps[2].to_ascii_lowercase().as_str() {
        "second" => 1,
        "minute" => 60,
        "hour" => 3_600,
        "day" => 86_400,
        "week" => 604_800,
        "month" => 2_592_000,
        "year" => 31_536_000,
        _ => return None,
    };
    now.checked_sub_signed(Duration::seconds(value.checked_mul(seconds)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_viewer_count_plain() {
        assert_eq!(parse_viewer_count("1,234"), 1234);
        assert_eq!(parse_viewer_count("42"), 42);
        assert_eq!(parse_viewer_count(" 7 "), 7);
    }

    #[test]
    fn test_parse_viewer_count_suffixed() {
        assert_eq!(parse_viewer_count("1.2k"), 1200);
        assert_eq!(parse_viewer_count("1.2K"), 1200);
        assert_eq!(parse_viewer_count("3m"), 3_000_000);
        assert_eq!(parse_viewer_count("3M"), 3_000_000);
        assert_eq!(parse_viewer_count("0.5k"), 500);
    }

    #[test]
    fn test_parse_viewer_count_garbage() {
        assert_eq!(parse_viewer_count(""), 0);
        assert_eq!(parse_viewer_count("abc"), 0);
        assert_eq!(parse_viewer_count("k"), 0);
        assert_eq!(parse_viewer_count("-12"), 0);
    }

    #[test]
    fn test_parse_relative_time() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(
            parse_relative_time("5 minutes ago", now),
            Some(now - Duration::minutes(5))
        );
        assert_eq!(
            parse_relative_time("1 hour ago", now),
            Some(now - Duration::hours(1))
        );
        assert_eq!(
            parse_relative_time("2 weeks ago", now),
            Some(now - Duration::weeks(2))
        );
        assert_eq!(
            parse_relative_time("3 months ago", now),
            Some(now - Duration::days(90))
        );
        assert_eq!(parse_relative_time("just now", now), Some(now));
    }

    #[test]
    fn test_parse_relative_time_unavailable() {
        let now = Utc::now();
        assert_eq!(parse_relative_time("", now), None);
        assert_eq!(parse_relative_time("Not Available", now), None);
        assert_eq!(parse_relative_time("yesterday-ish", now), None);
    }
}
