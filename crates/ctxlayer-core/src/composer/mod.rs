//! Prompt Composer: turns available context interpretations into a bounded
//! `systemContext` fragment without ever rewriting the user's message
//! (spec.md §4.6).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use ctxlayer_registry::ProviderId;

const TEMPORAL_LEXICON: &[&str] = &["today", "now", "tomorrow", "yesterday", "time", "schedule", "when", "date", "later", "soon"];
const SPATIAL_LEXICON: &[&str] = &["here", "nearby", "location", "where", "distance", "address", "place", "directions"];
const SITUATIONAL_LEXICON: &[&str] = &["doing", "busy", "working", "meeting", "activity", "mood", "available", "status"];

const LEXICON_NORMALIZER: f64 = 4.0;

const FORBIDDEN_KEY_FRAGMENTS: &[&str] = &["password", "api_key", "token", "credentials", "ssn", "card_number"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relevance {
    Irrelevant,
    Low,
    Medium,
    High,
    Critical,
}

impl Relevance {
    fn weight(self) -> f64 {
        match self {
            Relevance::Critical => 1.0,
            Relevance::High => 0.8,
            Relevance::Medium => 0.5,
            Relevance::Low => 0.2,
            Relevance::Irrelevant => 0.0,
        }
    }

    fn from_score(score: f64) -> Self {
        if score >= 0.75 {
            Relevance::Critical
        } else if score >= 0.5 {
            Relevance::High
        } else if score >= 0.25 {
            Relevance::Medium
        } else if score > 0.0 {
            Relevance::Low
        } else {
            Relevance::Irrelevant
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Temporal,
    Spatial,
    Situational,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextElement {
    pub key: String,
    pub value: Value,
    #[serde(rename = "type")]
    pub domain: String,
    pub relevance: Relevance,
    pub confidence: f64,
    pub token_estimate: usize,
    pub interpretation: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InclusionDecision {
    pub key: String,
    pub included: bool,
    pub reason: String,
    pub relevance: Relevance,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposedPrompt {
    pub system_context: String,
    pub user_message: String,
    pub included_elements: Vec<String>,
    pub excluded_elements: Vec<String>,
    pub total_tokens: usize,
    pub metadata: Vec<InclusionDecision>,
}

fn token_estimate(text: &str) -> usize {
    (text.chars().count() + 3) / 4
}

/// Step 1: domain relevance of the raw message, normalised by a small
/// constant so a handful of keyword hits already saturates toward 1.0.
pub fn analyse_message(message: &str) -> std::collections::HashMap<Domain, f64> {
    let lower = message.to_lowercase();
    let score = |lexicon: &[&str]| -> f64 {
        let hits = lexicon.iter().filter(|word| lower.contains(*word)).count() as f64;
        (hits / LEXICON_NORMALIZER).min(1.0)
    };

    let mut scores = std::collections::HashMap::new();
    scores.insert(Domain::Temporal, score(TEMPORAL_LEXICON));
    scores.insert(Domain::Spatial, score(SPATIAL_LEXICON));
    scores.insert(Domain::Situational, score(SITUATIONAL_LEXICON));
    scores
}

/// Interpretation available for a single domain, already distilled from
/// whatever reasoning layer produced it (temporal/spatial/resolver output).
#[derive(Debug, Clone)]
pub struct DomainInterpretation {
    pub domain: Domain,
    pub key: String,
    pub value: Value,
    pub confidence: f64,
    pub base_weight: f64,
    pub interpretation: Option<Value>,
}

fn is_forbidden_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    FORBIDDEN_KEY_FRAGMENTS.iter().any(|f| lower.contains(f))
}

/// Step 2: build one candidate element per available interpretation.
/// Elements whose key looks like a credential are never admitted,
/// regardless of relevance (PII safety contract).
pub fn build_candidates(
    interpretations: &[DomainInterpretation],
    signal_scores: &std::collections::HashMap<Domain, f64>,
) -> Vec<ContextElement> {
    interpretations
        .iter()
        .filter(|i| !is_forbidden_key(&i.key))
        .map(|i| {
            let signal = signal_scores.get(&i.domain).copied().unwrap_or(0.0);
            let relevance_score = (i.base_weight + signal * i.base_weight).min(1.0);
            let relevance = Relevance::from_score(relevance_score);
            let value_text = i.value.to_string();
            ContextElement {
                key: i.key.clone(),
                value: i.value.clone(),
                domain: domain_label(i.domain).to_string(),
                relevance,
                confidence: i.confidence,
                token_estimate: token_estimate(&value_text),
                interpretation: i.interpretation.clone(),
            }
        })
        .collect()
}

fn domain_label(domain: Domain) -> &'static str {
    match domain {
        Domain::Temporal => "temporal",
        Domain::Spatial => "spatial",
        Domain::Situational => "situational",
    }
}

/// Step 3: `inclusionScore = relevanceWeight * confidence`, sorted
/// descending.
fn sort_by_inclusion_score(elements: &mut [ContextElement]) {
    elements.sort_by(|a, b| {
        let score_a = a.relevance.weight() * a.confidence;
        let score_b = b.relevance.weight() * b.confidence;
        score_b.partial_cmp(&score_a).unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Step 5: full budget below 50 tokens of user message, ~10% at >=500
/// tokens of user message, linear in between.
pub fn sliding_budget(user_message_tokens: usize, total_budget: usize, response_reserve: usize) -> usize {
    let usable = total_budget.saturating_sub(response_reserve);
    let fraction = if user_message_tokens <= 50 {
        1.0
    } else if user_message_tokens >= 500 {
        0.10
    } else {
        1.0 - 0.90 * (user_message_tokens - 50) as f64 / 450.0
    };
    ((usable as f64) * fraction).round() as usize
}

pub struct SelectionOutcome {
    pub included: Vec<ContextElement>,
    pub decisions: Vec<InclusionDecision>,
    pub total_tokens: usize,
}

/// Steps 3-4: score, sort, then greedily admit within budget. A critical
/// element may exceed the remaining budget; others may not.
pub fn select_within_budget(mut elements: Vec<ContextElement>, max_tokens: usize, min_relevance_confidence: f64) -> SelectionOutcome {
    sort_by_inclusion_score(&mut elements);

    let mut included = Vec::new();
    let mut decisions = Vec::new();
    let mut current_tokens = 0usize;

    for element in elements {
        if element.relevance == Relevance::Irrelevant {
            decisions.push(InclusionDecision {
                key: element.key.clone(),
                included: false,
                reason: "not relevant".to_string(),
                relevance: element.relevance,
                confidence: element.confidence,
            });
            continue;
        }

        if element.confidence < min_relevance_confidence {
            decisions.push(InclusionDecision {
                key: element.key.clone(),
                included: false,
                reason: format!("confidence too low ({:.2} < {:.2})", element.confidence, min_relevance_confidence),
                relevance: element.relevance,
                confidence: element.confidence,
            });
            continue;
        }

        let fits = current_tokens + element.token_estimate <= max_tokens;
        let is_critical = element.relevance == Relevance::Critical;

        if fits || is_critical {
            current_tokens += element.token_estimate;
            decisions.push(InclusionDecision {
                key: element.key.clone(),
                included: true,
                reason: "high relevance".to_string(),
                relevance: element.relevance,
                confidence: element.confidence,
            });
            included.push(element);
        } else {
            decisions.push(InclusionDecision {
                key: element.key.clone(),
                included: false,
                reason: "token budget exceeded".to_string(),
                relevance: element.relevance,
                confidence: element.confidence,
            });
        }
    }

    SelectionOutcome { included, decisions, total_tokens: current_tokens }
}

/// Step 6: collapses the selected elements into a two-sentence brief when
/// they still exceed the allocation after ranked selection.
pub fn distill_situation_brief(included: &[ContextElement]) -> String {
    let strongest = |domain: &str| -> Option<&ContextElement> {
        included.iter().filter(|e| e.domain == domain).max_by(|a, b| a.confidence.partial_cmp(&b.confidence).unwrap())
    };

    let activity = strongest("situational")
        .and_then(|e| e.value.get("activity").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| "active".to_string());
    let location = strongest("spatial")
        .and_then(|e| e.value.get("city").or_else(|| e.value.get("country")).and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| "an unspecified location".to_string());
    let time = strongest("temporal")
        .and_then(|e| e.value.get("timeOfDay").or_else(|| e.value.get("time_of_day")).and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| "an unspecified time".to_string());
    let constraint = included
        .iter()
        .find(|e| e.interpretation.is_some())
        .and_then(|e| e.interpretation.as_ref())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "no special constraints".to_string());

    format!(
        "User is currently {activity} in {location} at {time}. Previous context indicates {constraint}."
    )
}

/// Steps 7-8: frame for the target provider and assemble the final
/// `ComposedPrompt`, recording a decision for every candidate.
pub fn compose(
    user_message: &str,
    interpretations: &[DomainInterpretation],
    provider: ProviderId,
    max_tokens: usize,
    min_relevance_confidence: f64,
    response_reserve: usize,
) -> ComposedPrompt {
    let signal_scores = analyse_message(user_message);
    let candidates = build_candidates(interpretations, &signal_scores);

    let allocation = sliding_budget(token_estimate(user_message), max_tokens, response_reserve);
    let outcome = select_within_budget(candidates, allocation, min_relevance_confidence);

    let (system_context, total_tokens) = if outcome.total_tokens > allocation {
        let brief = distill_situation_brief(&outcome.included);
        (brief.clone(), token_estimate(&brief))
    } else {
        let lines: Vec<String> = outcome.included.iter().map(|e| format!("{}: {}", e.key, e.value)).collect();
        let framed = provider.framing().frame(&lines);
        (framed, outcome.total_tokens)
    };

    let included_elements = outcome.decisions.iter().filter(|d| d.included).map(|d| d.key.clone()).collect();
    let excluded_elements = outcome.decisions.iter().filter(|d| !d.included).map(|d| d.key.clone()).collect();

    ComposedPrompt {
        system_context,
        user_message: user_message.to_string(),
        included_elements,
        excluded_elements,
        total_tokens,
        metadata: outcome.decisions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_interpretation(domain: Domain, key: &str, value: Value, confidence: f64) -> DomainInterpretation {
        DomainInterpretation { domain, key: key.to_string(), value, confidence, base_weight: 0.6, interpretation: None }
    }

    #[test]
    fn forbidden_keys_never_become_candidates() {
        let interpretations = vec![sample_interpretation(Domain::Situational, "api_key", json!("sk-live-abc"), 0.9)];
        let scores = analyse_message("what's my status");
        let candidates = build_candidates(&interpretations, &scores);
        assert!(candidates.is_empty());
    }

    #[test]
    fn critical_element_may_exceed_budget() {
        let mut element = ContextElement {
            key: "urgent".to_string(),
            value: json!("a very long value that does not fit inside the tiny token budget we configured for this test case"),
            domain: "situational".to_string(),
            relevance: Relevance::Critical,
            confidence: 0.9,
            token_estimate: 50,
            interpretation: None,
        };
        element.token_estimate = token_estimate(&element.value.to_string());
        let outcome = select_within_budget(vec![element], 1, 0.1);
        assert_eq!(outcome.included.len(), 1);
    }

    #[test]
    fn low_confidence_excluded_with_reason() {
        let element = ContextElement {
            key: "guess".to_string(),
            value: json!("maybe"),
            domain: "spatial".to_string(),
            relevance: Relevance::Medium,
            confidence: 0.1,
            token_estimate: 2,
            interpretation: None,
        };
        let outcome = select_within_budget(vec![element], 100, 0.3);
        assert_eq!(outcome.included.len(), 0);
        assert!(outcome.decisions[0].reason.starts_with("confidence too low"));
    }

    #[test]
    fn sliding_budget_shrinks_for_long_messages() {
        let full = sliding_budget(10, 1000, 100);
        let shrunk = sliding_budget(600, 1000, 100);
        assert!(shrunk < full);
    }

    #[test]
    fn anthropic_framing_wraps_system_context() {
        let interpretations = vec![sample_interpretation(Domain::Temporal, "time_of_day", json!("morning"), 0.9)];
        let composed = compose("what time is it", &interpretations, ProviderId::Anthropic, 500, 0.1, 50);
        assert!(composed.system_context.starts_with("<context>"));
        assert_eq!(composed.user_message, "what time is it");
    }
}
