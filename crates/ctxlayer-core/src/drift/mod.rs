//! Drift detection over a user's active context records (spec.md §4.4).
//!
//! `detect` is read-only and idempotent. [`next_drift_status`] derives the
//! status a record should transition to from a signal set but persists
//! nothing; `ContextMemory::update_drift_status` (memory module) is the
//! only function in the crate that writes `driftStatus`, and `confirm`,
//! `record_correction`, and `apply_decay` each route their own transition
//! through it by constructing the signal that represents their event.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ContextRecord, ContextType, DriftStatus};

const DEFAULT_STALE_WINDOW_HOURS: f64 = 24.0;
const LONG_TERM_STALE_WINDOW_HOURS: f64 = 168.0;
pub(crate) const CORRECTION_SIGNAL_THRESHOLD: u32 = 3;
const LOW_CONFIDENCE_THRESHOLD: f64 = 0.4;
const CRITICAL_CONFIDENCE_THRESHOLD: f64 = 0.2;
const STALE_SEVERITY_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriftSignalKind {
    Staleness,
    CorrectionPattern,
    BehavioralMismatch,
    Conflict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftSignal {
    pub kind: DriftSignalKind,
    pub context_id: Uuid,
    pub key: String,
    pub severity: f64,
    pub description: String,
    pub detected_at: DateTime<Utc>,
    pub recommended_action: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriftReport {
    pub health: f64,
    pub counts: HashMap<String, usize>,
    pub recommendations: Vec<String>,
    pub signals: Vec<DriftSignal>,
}

fn severity_clamped(value: f64) -> f64 {
    value.max(0.0).min(1.0)
}

/// Computes all signals for a set of one user's active records. Pure and
/// idempotent -- calling this twice with the same input yields the same
/// report and mutates nothing.
pub fn detect(records: &[ContextRecord], now: DateTime<Utc>) -> DriftReport {
    let mut signals = Vec::new();

    for record in records {
        let stale_window_hours = if matches!(record.tier, crate::types::Tier::LongTerm) {
            LONG_TERM_STALE_WINDOW_HOURS
        } else {
            DEFAULT_STALE_WINDOW_HOURS
        };
        let age_hours = record.age(now).num_seconds() as f64 / 3600.0;
        if age_hours > stale_window_hours {
            let overshoot = (age_hours - stale_window_hours) / stale_window_hours;
            signals.push(DriftSignal {
                kind: DriftSignalKind::Staleness,
                context_id: record.id,
                key: record.key.clone(),
                severity: severity_clamped(overshoot),
                description: format!(
                    "{} has not been refreshed in {:.1}h (window {:.0}h)",
                    record.key, age_hours, stale_window_hours
                ),
                detected_at: now,
                recommended_action: "refresh".to_string(),
            });
        }

        if record.correction_count >= CORRECTION_SIGNAL_THRESHOLD {
            signals.push(DriftSignal {
                kind: DriftSignalKind::CorrectionPattern,
                context_id: record.id,
                key: record.key.clone(),
                severity: severity_clamped(record.correction_count as f64 / 10.0),
                description: format!("{} corrected {} times", record.key, record.correction_count),
                detected_at: now,
                recommended_action: "review".to_string(),
            });
        }

        if record.confidence < LOW_CONFIDENCE_THRESHOLD {
            let recommended_action = if record.confidence < CRITICAL_CONFIDENCE_THRESHOLD {
                "refresh"
            } else {
                "monitor"
            };
            signals.push(DriftSignal {
                kind: DriftSignalKind::BehavioralMismatch,
                context_id: record.id,
                key: record.key.clone(),
                severity: severity_clamped(1.0 - record.confidence),
                description: format!("{} confidence {:.2} below threshold", record.key, record.confidence),
                detected_at: now,
                recommended_action: recommended_action.to_string(),
            });
        }
    }

    signals.extend(conflict_signals(records, ContextType::Temporal, "timezone", now));
    signals.extend(conflict_signals(records, ContextType::Spatial, "country", now));

    let counts = count_by_kind(&signals);
    let health = health_score(&signals, records);
    let recommendations = recommendations_for(&signals);

    DriftReport { health, counts, recommendations, signals }
}

/// Multiple active records of the same type disagreeing on the same key
/// (e.g. two temporal records with different timezones) is a CONFLICT
/// signal, one per record involved.
fn conflict_signals(
    records: &[ContextRecord],
    context_type: ContextType,
    disagreement_key: &str,
    now: DateTime<Utc>,
) -> Vec<DriftSignal> {
    let matching: Vec<&ContextRecord> = records.iter().filter(|r| r.context_type == context_type).collect();
    if matching.len() < 2 {
        return Vec::new();
    }

    let mut distinct_values: Vec<&serde_json::Value> = Vec::new();
    for record in &matching {
        if let Some(value) = record.value.get(disagreement_key) {
            if !distinct_values.contains(&value) {
                distinct_values.push(value);
            }
        }
    }

    if distinct_values.len() < 2 {
        return Vec::new();
    }

    matching
        .into_iter()
        .map(|record| DriftSignal {
            kind: DriftSignalKind::Conflict,
            context_id: record.id,
            key: record.key.clone(),
            severity: 1.0,
            description: format!("multiple active {:?} records disagree on {disagreement_key}", context_type),
            detected_at: now,
            recommended_action: "resolve".to_string(),
        })
        .collect()
}

fn count_by_kind(signals: &[DriftSignal]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for signal in signals {
        let key = match signal.kind {
            DriftSignalKind::Staleness => "staleness",
            DriftSignalKind::CorrectionPattern => "correction_pattern",
            DriftSignalKind::BehavioralMismatch => "behavioral_mismatch",
            DriftSignalKind::Conflict => "conflict",
        };
        *counts.entry(key.to_string()).or_insert(0) += 1;
    }
    counts
}

fn health_score(signals: &[DriftSignal], records: &[ContextRecord]) -> f64 {
    let mut health = 1.0;
    for signal in signals {
        let weight = match signal.kind {
            DriftSignalKind::Conflict => 0.30,
            DriftSignalKind::CorrectionPattern => 0.20,
            DriftSignalKind::Staleness => 0.15,
            DriftSignalKind::BehavioralMismatch => 0.10,
        };
        health -= weight * signal.severity;
    }

    let mean_confidence = if records.is_empty() {
        1.0
    } else {
        records.iter().map(|r| r.confidence).sum::<f64>() / records.len() as f64
    };
    health *= 0.5 + 0.5 * mean_confidence;

    health.max(0.0).min(1.0)
}

fn recommendations_for(signals: &[DriftSignal]) -> Vec<String> {
    let mut recommendations: Vec<String> = signals
        .iter()
        .filter(|s| s.recommended_action == "refresh")
        .map(|s| format!("refresh '{}'", s.key))
        .collect();
    recommendations.sort();
    recommendations.dedup();
    recommendations
}

/// Applies the fixed status-update rule to a set of signals belonging to
/// one record. Pure: returns the status a record should transition to
/// without writing anything; see `ContextMemory::update_drift_status` for
/// the persisting counterpart.
pub fn next_drift_status(signals: &[DriftSignal]) -> DriftStatus {
    let has_conflict_or_correction = signals
        .iter()
        .any(|s| matches!(s.kind, DriftSignalKind::Conflict | DriftSignalKind::CorrectionPattern));
    if has_conflict_or_correction {
        return DriftStatus::Conflicting;
    }

    let max_staleness_severity = signals
        .iter()
        .filter(|s| matches!(s.kind, DriftSignalKind::Staleness))
        .map(|s| s.severity)
        .fold(0.0_f64, f64::max);
    if max_staleness_severity > STALE_SEVERITY_THRESHOLD {
        return DriftStatus::Stale;
    }

    if !signals.is_empty() {
        return DriftStatus::Drifting;
    }

    DriftStatus::Stable
}

/// `ShouldRefresh` advice per spec.md §4.4.
pub fn should_refresh(record: &ContextRecord, now: DateTime<Utc>, critical_stale_hours: f64) -> bool {
    if record.is_expired(now) {
        return true;
    }
    let age_hours = record.age(now).num_seconds() as f64 / 3600.0;
    if age_hours > critical_stale_hours {
        return true;
    }
    if record.drift_status == DriftStatus::Conflicting {
        return true;
    }
    if record.confidence < CRITICAL_CONFIDENCE_THRESHOLD {
        return true;
    }
    record.drift_status == DriftStatus::Stale && record.confidence < 0.7
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Source, Tier};
    use chrono::Duration;
    use serde_json::json;

    fn base_record(context_type: ContextType, key: &str, confidence: f64, now: DateTime<Utc>) -> ContextRecord {
        ContextRecord {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            context_type,
            tier: Tier::ShortTerm,
            key: key.to_string(),
            value: json!({}),
            interpretation: None,
            confidence,
            source: Source::Inference,
            source_details: None,
            drift_status: DriftStatus::Stable,
            expires_at: None,
            last_confirmed_at: None,
            correction_count: 0,
            session_id: None,
            is_active: true,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn staleness_signal_scales_with_overshoot() {
        let now = Utc::now();
        let mut record = base_record(ContextType::Temporal, "tz", 0.9, now - Duration::hours(30));
        record.value = json!({"timezone": "UTC"});
        let report = detect(&[record], now);
        assert_eq!(report.counts.get("staleness"), Some(&1));
    }

    #[test]
    fn three_corrections_triggers_correction_pattern_and_conflicting_status() {
        let now = Utc::now();
        let mut record = base_record(ContextType::Spatial, "location", 0.9, now);
        record.correction_count = 3;
        let report = detect(&[record], now);
        assert_eq!(report.counts.get("correction_pattern"), Some(&1));
        assert_eq!(next_drift_status(&report.signals), DriftStatus::Conflicting);
    }

    #[test]
    fn disagreeing_timezones_produce_conflict_signals() {
        let now = Utc::now();
        let mut a = base_record(ContextType::Temporal, "tz-a", 0.9, now);
        a.value = json!({"timezone": "America/New_York"});
        let mut b = base_record(ContextType::Temporal, "tz-b", 0.9, now);
        b.value = json!({"timezone": "Europe/London"});
        let report = detect(&[a, b], now);
        assert_eq!(report.counts.get("conflict"), Some(&2));
    }

    #[test]
    fn low_confidence_below_critical_recommends_refresh() {
        let now = Utc::now();
        let record = base_record(ContextType::Meta, "scratch", 0.1, now);
        let report = detect(&[record], now);
        let signal = report.signals.iter().find(|s| s.kind == DriftSignalKind::BehavioralMismatch).unwrap();
        assert_eq!(signal.recommended_action, "refresh");
    }

    #[test]
    fn empty_input_is_stable_with_full_health() {
        let report = detect(&[], Utc::now());
        assert_eq!(report.health, 1.0);
        assert_eq!(next_drift_status(&report.signals), DriftStatus::Stable);
    }
}
