//! Relative- and absolute-reference resolution against an anchor instant.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalResolution {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub confidence: f64,
    pub ambiguous: bool,
    pub reasoning: String,
}

impl TemporalResolution {
    fn instant(at: DateTime<Utc>, confidence: f64, ambiguous: bool, reasoning: impl Into<String>) -> Self {
        Self { start: at, end: at, confidence, ambiguous, reasoning: reasoning.into() }
    }

    fn range(start: DateTime<Utc>, end: DateTime<Utc>, confidence: f64, ambiguous: bool, reasoning: impl Into<String>) -> Self {
        Self { start, end, confidence, ambiguous, reasoning: reasoning.into() }
    }
}

struct DayPattern {
    regex_source: &'static str,
    offset_days: i64,
}

/// Relative-day patterns, ordered longest-pattern-first so e.g. "day before
/// yesterday" is matched before the shorter "yesterday" pattern would
/// otherwise swallow a substring of it.
fn day_patterns() -> &'static [DayPattern] {
    static PATTERNS: OnceLock<Vec<DayPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let mut patterns = vec![
            DayPattern { regex_source: r"\bday before yesterday\b", offset_days: -2 },
            DayPattern { regex_source: r"\bday after tomorrow\b", offset_days: 2 },
            DayPattern { regex_source: r"\byesterday\b", offset_days: -1 },
            DayPattern { regex_source: r"\btomorrow\b", offset_days: 1 },
            DayPattern { regex_source: r"\btoday\b", offset_days: 0 },
        ];
        patterns.sort_by_key(|p| std::cmp::Reverse(p.regex_source.len()));
        patterns
    })
}

fn word_re(source: &'static str) -> Regex {
    static CACHE: OnceLock<std::sync::Mutex<std::collections::HashMap<&'static str, Regex>>> =
        OnceLock::new();
    let cache = CACHE.get_or_init(|| std::sync::Mutex::new(std::collections::HashMap::new()));
    let mut guard = cache.lock().expect("regex cache poisoned");
    guard
        .entry(source)
        .or_insert_with(|| Regex::new(&format!("(?i){source}")).expect("valid static regex"))
        .clone()
}

/// Resolves a relative/absolute reference fragment against an anchor
/// instant, per spec.md §4.1 "Reference resolution".
pub fn resolve_reference(
    fragment: &str,
    anchor_instant: DateTime<Utc>,
    timezone: &str,
    session_start: Option<DateTime<Utc>>,
) -> TemporalResolution {
    let tz: Tz = timezone.parse().unwrap_or(chrono_tz::UTC);

    if let Some(res) = try_relative_day(fragment, anchor_instant, tz) {
        return res;
    }
    if let Some(res) = try_relative_time(fragment, anchor_instant, session_start) {
        return res;
    }
    if let Some(res) = try_absolute(fragment, anchor_instant, tz) {
        return res;
    }

    TemporalResolution::instant(
        anchor_instant,
        0.2,
        true,
        "No recognizable temporal pattern; defaulting to the current instant.",
    )
}

fn try_relative_day(
    fragment: &str,
    anchor_instant: DateTime<Utc>,
    tz: Tz,
) -> Option<TemporalResolution> {
    for pattern in day_patterns() {
        if word_re(pattern.regex_source).is_match(fragment) {
            let anchor_local = anchor_instant.with_timezone(&tz);
            let target_date = anchor_local.date_naive() + Duration::days(pattern.offset_days);
            let (start, end) = day_bounds_utc(target_date, tz);
            return Some(TemporalResolution::range(
                start,
                end,
                0.95,
                false,
                format!("Matched relative-day pattern '{}' (offset {}d).", pattern.regex_source, pattern.offset_days),
            ));
        }
    }
    None
}

fn day_bounds_utc(date: NaiveDate, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let start_local = tz
        .from_local_datetime(&date.and_hms_opt(0, 0, 0).expect("valid time"))
        .single()
        .unwrap_or_else(|| tz.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap()));
    let end_local = tz
        .from_local_datetime(&date.and_hms_opt(23, 59, 59).expect("valid time"))
        .single()
        .unwrap_or_else(|| tz.from_utc_datetime(&date.and_hms_opt(23, 59, 59).unwrap()));
    (start_local.with_timezone(&Utc), end_local.with_timezone(&Utc))
}

fn try_relative_time(
    fragment: &str,
    anchor_instant: DateTime<Utc>,
    session_start: Option<DateTime<Utc>>,
) -> Option<TemporalResolution> {
    let lower = fragment.to_ascii_lowercase();

    if word_re(r"\b(right now|now)\b").is_match(&lower) {
        return Some(TemporalResolution::instant(anchor_instant, 0.97, false, "Matched 'now'."));
    }
    if word_re(r"\b(just now|recently|a moment ago)\b").is_match(&lower) {
        return Some(TemporalResolution::range(
            anchor_instant - Duration::minutes(15),
            anchor_instant,
            0.75,
            true,
            "Matched a recent-past phrase; window is the last 15 minutes.",
        ));
    }
    if word_re(r"\bearlier\b").is_match(&lower) {
        return Some(match session_start {
            Some(start) => TemporalResolution::range(
                start,
                anchor_instant - Duration::minutes(5),
                0.70,
                false,
                "Matched 'earlier' with a known session start.",
            ),
            None => {
                let start_of_day = anchor_instant
                    .date_naive()
                    .and_hms_opt(0, 0, 0)
                    .expect("valid time")
                    .and_utc();
                TemporalResolution::range(
                    start_of_day,
                    anchor_instant,
                    0.50,
                    true,
                    "Matched 'earlier' without a session start; using start-of-day as the window.",
                )
            }
        });
    }
    if word_re(r"\b(soon|shortly)\b").is_match(&lower) {
        return Some(TemporalResolution::range(
            anchor_instant,
            anchor_instant + Duration::minutes(30),
            0.80,
            false,
            "Matched a near-future phrase; window is the next 30 minutes.",
        ));
    }
    if word_re(r"\blater\b").is_match(&lower) {
        return Some(TemporalResolution::range(
            anchor_instant,
            anchor_instant + Duration::minutes(60),
            0.75,
            false,
            "Matched 'later'; window is the next 60 minutes.",
        ));
    }

    None
}

fn try_absolute(fragment: &str, anchor_instant: DateTime<Utc>, tz: Tz) -> Option<TemporalResolution> {
    let trimmed = fragment.trim();
    let year_hint = anchor_instant.with_timezone(&tz).date_naive().format("%Y").to_string();

    let candidates = [
        ("%Y-%m-%d", trimmed.to_string()),
        ("%m/%d/%Y", trimmed.to_string()),
        ("%d/%m/%Y", trimmed.to_string()),
        ("%B %d, %Y", trimmed.to_string()),
        ("%B %d", format!("{trimmed}, {year_hint}")),
        ("%b %d, %Y", trimmed.to_string()),
        ("%b %d", format!("{trimmed}, {year_hint}")),
    ];

    for (fmt, text) in candidates {
        let parse_fmt = if fmt.ends_with(", %Y") || fmt == "%B %d" || fmt == "%b %d" {
            format!("{fmt}, %Y")
        } else {
            fmt.to_string()
        };
        if let Ok(date) = NaiveDate::parse_from_str(&text, &parse_fmt) {
            let (start, end) = day_bounds_utc(date, tz);
            return Some(TemporalResolution::range(
                start,
                end,
                0.9,
                false,
                format!("Parsed absolute date with format '{fmt}'."),
            ));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn anchor() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn day_before_yesterday_not_swallowed_by_yesterday() {
        let res = resolve_reference("day before yesterday", anchor(), "UTC", None);
        assert_eq!(res.confidence, 0.95);
        assert_eq!(res.start.date_naive(), anchor().date_naive() - Duration::days(2));
    }

    #[test]
    fn yesterday_resolves_one_day_back() {
        let res = resolve_reference("what did I do yesterday", anchor(), "UTC", None);
        assert_eq!(res.start.date_naive(), anchor().date_naive() - Duration::days(1));
    }

    #[test]
    fn now_resolves_to_exact_instant() {
        let res = resolve_reference("right now", anchor(), "UTC", None);
        assert_eq!(res.start, anchor());
        assert_eq!(res.start, res.end);
        assert!(res.confidence >= 0.95);
    }

    #[test]
    fn earlier_without_session_is_ambiguous() {
        let res = resolve_reference("earlier", anchor(), "UTC", None);
        assert!(res.ambiguous);
        assert_eq!(res.confidence, 0.50);
    }

    #[test]
    fn earlier_with_session_uses_session_start() {
        let session_start = anchor() - Duration::hours(3);
        let res = resolve_reference("earlier", anchor(), "UTC", Some(session_start));
        assert!(!res.ambiguous);
        assert_eq!(res.start, session_start);
    }

    #[test]
    fn absolute_iso_date_parses() {
        let res = resolve_reference("2026-01-15", anchor(), "UTC", None);
        assert_eq!(res.confidence, 0.9);
        assert_eq!(res.start.date_naive(), NaiveDate::from_ymd_opt(2026, 1, 15).unwrap());
    }

    #[test]
    fn unrecognized_fragment_falls_back() {
        let res = resolve_reference("the quarter before last", anchor(), "UTC", None);
        assert_eq!(res.confidence, 0.2);
        assert!(res.ambiguous);
        assert_eq!(res.start, anchor());
    }
}
