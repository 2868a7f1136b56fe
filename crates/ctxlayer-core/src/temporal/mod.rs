//! Timezone-correct interpretation and relative-reference resolution.

mod reference;

pub use reference::{resolve_reference, TemporalResolution};

use chrono::{DateTime, Datelike, Duration, Offset, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TimeOfDay {
    LateNight,
    EarlyMorning,
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeOfDay {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            0..=4 => TimeOfDay::LateNight,
            5..=7 => TimeOfDay::EarlyMorning,
            8..=11 => TimeOfDay::Morning,
            12..=16 => TimeOfDay::Afternoon,
            17..=20 => TimeOfDay::Evening,
            _ => TimeOfDay::Night,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayType {
    Weekday,
    Weekend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Season {
    Winter,
    Spring,
    Summer,
    Autumn,
}

impl Season {
    /// Northern-hemisphere mapping (default). A southern variant is left as
    /// a flag for future use per spec.
    pub fn from_month_northern(month: u32) -> Self {
        match month {
            12 | 1 | 2 => Season::Winter,
            3..=5 => Season::Spring,
            6..=8 => Season::Summer,
            _ => Season::Autumn,
        }
    }
}

/// Calendar-and-zone-resolved view of an instant, per spec.md §4.1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalContext {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    /// Monday = 0.
    pub weekday_index: u32,
    pub utc_offset_hours: f64,
    pub utc_instant: DateTime<Utc>,
    pub time_of_day: TimeOfDay,
    pub day_type: DayType,
    pub season: Season,
    pub session_duration_minutes: Option<f64>,
    pub timezone: String,
}

/// Derived advisory layer on top of a [`TemporalContext`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalInterpretation {
    pub is_business_hours: bool,
    pub default_urgency: Urgency,
    pub days_until_weekend: u32,
    pub likely_availability: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Moderate,
    High,
}

/// Interprets a UTC instant in the given IANA timezone.
///
/// Unknown timezone strings fall back to UTC; the caller is expected to
/// surface the returned warning rather than fail the request (spec.md
/// "edge policies": never fail silently on an unknown zone).
pub fn interpret(
    instant: DateTime<Utc>,
    timezone: &str,
    session_start: Option<DateTime<Utc>>,
) -> (TemporalContext, Vec<String>) {
    let mut warnings = Vec::new();
    let (tz, zone_label): (Tz, String) = match timezone.parse::<Tz>() {
        Ok(tz) => (tz, timezone.to_string()),
        Err(_) => {
            warnings.push(format!(
                "Unknown timezone '{timezone}', using UTC"
            ));
            (chrono_tz::UTC, "UTC".to_string())
        }
    };

    let local = instant.with_timezone(&tz);
    let weekday_index = local.weekday().num_days_from_monday();
    let day_type = if weekday_index < 5 {
        DayType::Weekday
    } else {
        DayType::Weekend
    };

    let utc_offset_seconds = local.offset().fix().local_minus_utc();
    let utc_offset_hours = utc_offset_seconds as f64 / 3600.0;

    let session_duration_minutes = session_start.map(|start| {
        (instant - start).num_seconds() as f64 / 60.0
    });

    let ctx = TemporalContext {
        year: local.year(),
        month: local.month(),
        day: local.day(),
        hour: local.hour(),
        minute: local.minute(),
        weekday_index,
        utc_offset_hours,
        utc_instant: instant,
        time_of_day: TimeOfDay::from_hour(local.hour()),
        day_type,
        season: Season::from_month_northern(local.month()),
        session_duration_minutes,
        timezone: zone_label,
    };

    (ctx, warnings)
}

/// Derived interpretation layer: business hours, urgency, weekend
/// countdown, and a categorical availability string.
pub fn interpretation_layer(ctx: &TemporalContext) -> TemporalInterpretation {
    let is_business_hours =
        ctx.day_type == DayType::Weekday && (9..17).contains(&ctx.hour);

    let default_urgency = match ctx.time_of_day {
        TimeOfDay::LateNight | TimeOfDay::Night => Urgency::Low,
        TimeOfDay::EarlyMorning | TimeOfDay::Evening => Urgency::Moderate,
        TimeOfDay::Morning | TimeOfDay::Afternoon => {
            if is_business_hours {
                Urgency::High
            } else {
                Urgency::Moderate
            }
        }
    };

    // weekday_index: Monday=0 .. Sunday=6. Saturday=5.
    let days_until_weekend = if ctx.weekday_index >= 5 {
        0
    } else {
        5 - ctx.weekday_index
    };

    let likely_availability = match (ctx.day_type, is_business_hours, ctx.time_of_day) {
        (DayType::Weekday, true, _) => "likely at work".to_string(),
        (DayType::Weekday, false, TimeOfDay::LateNight | TimeOfDay::Night) => {
            "likely asleep".to_string()
        }
        (DayType::Weekday, false, _) => "likely free".to_string(),
        (DayType::Weekend, _, TimeOfDay::LateNight | TimeOfDay::Night) => {
            "likely asleep".to_string()
        }
        (DayType::Weekend, _, _) => "likely free".to_string(),
    };

    TemporalInterpretation {
        is_business_hours,
        default_urgency,
        days_until_weekend,
        likely_availability,
    }
}

/// Interpretation of whether a session has crossed local midnight, and what
/// "today"/"yesterday" should mean given that (spec.md §4.1, "Midnight
/// crossover").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MidnightCrossoverContext {
    pub has_crossed_midnight: bool,
    pub session_started_date: chrono::NaiveDate,
    pub current_date: chrono::NaiveDate,
    /// The date "today" should resolve to.
    pub today_resolves_to: chrono::NaiveDate,
    pub confidence: f64,
    pub reasoning: String,
}

pub fn resolve_midnight_crossover(
    session_start: DateTime<Utc>,
    now: DateTime<Utc>,
    timezone: &str,
) -> MidnightCrossoverContext {
    let tz: Tz = timezone.parse().unwrap_or(chrono_tz::UTC);
    let session_local = session_start.with_timezone(&tz);
    let now_local = now.with_timezone(&tz);

    let d_s = session_local.date_naive();
    let d_t = now_local.date_naive();

    if d_s == d_t {
        return MidnightCrossoverContext {
            has_crossed_midnight: false,
            session_started_date: d_s,
            current_date: d_t,
            today_resolves_to: d_t,
            confidence: 0.95,
            reasoning: "Session start and current instant share a calendar date; no crossover."
                .to_string(),
        };
    }

    let elapsed = now - session_start;
    let current_hour = now_local.hour();

    if current_hour < 4 && elapsed < Duration::hours(6) {
        MidnightCrossoverContext {
            has_crossed_midnight: true,
            session_started_date: d_s,
            current_date: d_t,
            today_resolves_to: d_s,
            confidence: 0.70,
            reasoning: format!(
                "Current local hour {current_hour} is before 4am and only {}m elapsed since session start; treating 'today' as the session's start date {d_s}.",
                elapsed.num_minutes()
            ),
        }
    } else {
        MidnightCrossoverContext {
            has_crossed_midnight: true,
            session_started_date: d_s,
            current_date: d_t,
            today_resolves_to: d_t,
            confidence: 0.85,
            reasoning: format!(
                "Session crossed midnight but current local hour {current_hour} or elapsed time {}m is outside the carry-over window; treating 'today' as the current calendar date {d_t}.",
                elapsed.num_minutes()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn unknown_timezone_falls_back_to_utc_with_warning() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let (ctx, warnings) = interpret(now, "Not/AZone", None);
        assert_eq!(ctx.timezone, "UTC");
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn time_of_day_buckets() {
        assert_eq!(TimeOfDay::from_hour(0), TimeOfDay::LateNight);
        assert_eq!(TimeOfDay::from_hour(6), TimeOfDay::EarlyMorning);
        assert_eq!(TimeOfDay::from_hour(9), TimeOfDay::Morning);
        assert_eq!(TimeOfDay::from_hour(14), TimeOfDay::Afternoon);
        assert_eq!(TimeOfDay::from_hour(18), TimeOfDay::Evening);
        assert_eq!(TimeOfDay::from_hour(23), TimeOfDay::Night);
    }

    #[test]
    fn midnight_crossover_within_window_uses_session_date() {
        let session_start = Utc.with_ymd_and_hms(2026, 1, 3, 23, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 1, 4, 0, 30, 0).unwrap();
        // UTC-5 offset, so local session_start = 2026-01-03T18:00-05:00,
        // local now = 2026-01-03T19:30-05:00 -- same date, no crossover in
        // that zone. Use a zone where the UTC instant actually crosses.
        let crossover = resolve_midnight_crossover(session_start, now, "UTC");
        assert!(crossover.has_crossed_midnight);
        assert_eq!(crossover.today_resolves_to, crossover.session_started_date);
        assert!((0.6..=0.8).contains(&crossover.confidence));
    }

    #[test]
    fn midnight_crossover_outside_window_uses_current_date() {
        let session_start = Utc.with_ymd_and_hms(2026, 1, 3, 10, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 1, 4, 9, 0, 0).unwrap();
        let crossover = resolve_midnight_crossover(session_start, now, "UTC");
        assert!(crossover.has_crossed_midnight);
        assert_eq!(crossover.today_resolves_to, crossover.current_date);
        assert!((0.8..=0.9).contains(&crossover.confidence));
    }
}
