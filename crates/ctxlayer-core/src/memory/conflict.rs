//! Conflict resolution between two candidate values for the same
//! `(userId, type, key)` (spec.md §4.3 "Conflict resolution").

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::types::Source;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictStrategy {
    UserWins,
    SensorWins,
    NewerWins,
    ConfidenceWins,
    Merge,
}

impl Default for ConflictStrategy {
    fn default() -> Self {
        ConflictStrategy::UserWins
    }
}

pub struct Candidate<'a> {
    pub value: &'a Value,
    pub source: Source,
    pub confidence: f64,
    pub updated_at: DateTime<Utc>,
}

pub struct Resolution {
    pub value: Value,
    pub source: Source,
    pub confidence: f64,
    pub reason: String,
}

/// Resolves a conflict between an existing record's candidate and an
/// incoming candidate under the configured strategy, falling back to the
/// fixed source-priority table when the strategy itself can't decide (e.g.
/// `Merge` on two scalars).
pub fn resolve(strategy: ConflictStrategy, existing: Candidate<'_>, incoming: Candidate<'_>) -> Resolution {
    match strategy {
        ConflictStrategy::UserWins => {
            let user_sources = [Source::UserExplicit, Source::UserImplicit, Source::UserCorrection];
            if user_sources.contains(&incoming.source) && !user_sources.contains(&existing.source) {
                take_incoming(incoming, "incoming value is user-sourced under USER_WINS")
            } else if user_sources.contains(&existing.source) && !user_sources.contains(&incoming.source) {
                take_existing(existing, "existing value is user-sourced under USER_WINS")
            } else {
                priority_tiebreak(existing, incoming, "USER_WINS: both or neither side is user-sourced")
            }
        }
        ConflictStrategy::SensorWins => {
            if incoming.source == Source::Sensor && existing.source != Source::Sensor {
                take_incoming(incoming, "incoming value is sensor-sourced under SENSOR_WINS")
            } else if existing.source == Source::Sensor && incoming.source != Source::Sensor {
                take_existing(existing, "existing value is sensor-sourced under SENSOR_WINS")
            } else {
                priority_tiebreak(existing, incoming, "SENSOR_WINS: neither side is sensor-sourced")
            }
        }
        ConflictStrategy::NewerWins => {
            if incoming.updated_at >= existing.updated_at {
                take_incoming(incoming, "incoming value has a newer or equal timestamp under NEWER_WINS")
            } else {
                take_existing(existing, "existing value has a newer timestamp under NEWER_WINS")
            }
        }
        ConflictStrategy::ConfidenceWins => {
            if incoming.confidence > existing.confidence {
                take_incoming(incoming, "incoming value has higher confidence under CONFIDENCE_WINS")
            } else if existing.confidence > incoming.confidence {
                take_existing(existing, "existing value has higher confidence under CONFIDENCE_WINS")
            } else {
                priority_tiebreak(existing, incoming, "CONFIDENCE_WINS: confidences are equal")
            }
        }
        ConflictStrategy::Merge => merge(existing, incoming),
    }
}

fn take_incoming(incoming: Candidate<'_>, reason: &str) -> Resolution {
    Resolution {
        value: incoming.value.clone(),
        source: incoming.source,
        confidence: incoming.confidence,
        reason: reason.to_string(),
    }
}

fn take_existing(existing: Candidate<'_>, reason: &str) -> Resolution {
    Resolution {
        value: existing.value.clone(),
        source: existing.source,
        confidence: existing.confidence,
        reason: reason.to_string(),
    }
}

fn priority_tiebreak(existing: Candidate<'_>, incoming: Candidate<'_>, context: &str) -> Resolution {
    if incoming.source.priority() >= existing.source.priority() {
        Resolution {
            value: incoming.value.clone(),
            source: incoming.source,
            confidence: incoming.confidence,
            reason: format!("{context}; fell back to source-priority table, incoming source '{:?}' wins", incoming.source),
        }
    } else {
        Resolution {
            value: existing.value.clone(),
            source: existing.source,
            confidence: existing.confidence,
            reason: format!("{context}; fell back to source-priority table, existing source '{:?}' wins", existing.source),
        }
    }
}

/// Deep-merge for maps, list-union for lists, incoming wins for scalars.
fn merge(existing: Candidate<'_>, incoming: Candidate<'_>) -> Resolution {
    let merged = merge_values(existing.value, incoming.value);
    Resolution {
        value: merged,
        source: incoming.source,
        confidence: incoming.confidence,
        reason: "MERGE: deep-merged maps, unioned lists, incoming scalar wins on conflicting keys".to_string(),
    }
}

fn merge_values(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Object(map_a), Value::Object(map_b)) => {
            let mut merged = map_a.clone();
            for (k, v_b) in map_b {
                match merged.get(k) {
                    Some(v_a) => {
                        merged.insert(k.clone(), merge_values(v_a, v_b));
                    }
                    None => {
                        merged.insert(k.clone(), v_b.clone());
                    }
                }
            }
            Value::Object(merged)
        }
        (Value::Array(arr_a), Value::Array(arr_b)) => {
            let mut union = arr_a.clone();
            for item in arr_b {
                if !union.contains(item) {
                    union.push(item.clone());
                }
            }
            Value::Array(union)
        }
        (_, b) => b.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn user_wins_prefers_user_source() {
        let now = Utc::now();
        let existing_val = json!({"city": "San Francisco"});
        let incoming_val = json!({"city": "New York"});
        let existing = Candidate { value: &existing_val, source: Source::Inference, confidence: 0.7, updated_at: now };
        let incoming = Candidate { value: &incoming_val, source: Source::UserExplicit, confidence: 0.9, updated_at: now };
        let res = resolve(ConflictStrategy::UserWins, existing, incoming);
        assert_eq!(res.value, json!({"city": "New York"}));
        assert_eq!(res.source, Source::UserExplicit);
    }

    #[test]
    fn merge_deep_merges_objects_and_unions_lists() {
        let existing_val = json!({"tags": ["a", "b"], "nested": {"x": 1}});
        let incoming_val = json!({"tags": ["b", "c"], "nested": {"y": 2}});
        let existing = Candidate { value: &existing_val, source: Source::Api, confidence: 0.5, updated_at: Utc::now() };
        let incoming = Candidate { value: &incoming_val, source: Source::Sensor, confidence: 0.5, updated_at: Utc::now() };
        let res = resolve(ConflictStrategy::Merge, existing, incoming);
        assert_eq!(res.value["tags"], json!(["a", "b", "c"]));
        assert_eq!(res.value["nested"], json!({"x": 1, "y": 2}));
    }

    #[test]
    fn priority_table_breaks_ties_when_strategy_cannot_decide() {
        let now = Utc::now();
        let existing_val = json!("a");
        let incoming_val = json!("b");
        let existing = Candidate { value: &existing_val, source: Source::Historical, confidence: 0.5, updated_at: now };
        let incoming = Candidate { value: &incoming_val, source: Source::Api, confidence: 0.5, updated_at: now };
        let res = resolve(ConflictStrategy::ConfidenceWins, existing, incoming);
        assert_eq!(res.source, Source::Api);
    }
}
