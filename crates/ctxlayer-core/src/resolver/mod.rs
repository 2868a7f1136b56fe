//! Assumption Resolver: detects ambiguous references in an utterance and
//! dispatches each to the matching reasoner (spec.md §4.5).

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use ctxlayer_registry::ReferenceKind;
use regex::Regex;

use crate::error::Result;
use crate::spatial;
use crate::temporal;

const ENTITY_HISTORY_WINDOW: usize = 10;

struct TriggerPattern {
    regex_source: &'static str,
    kind: ReferenceKind,
}

/// Fixed, ordered trigger list. Longer patterns are registered first so
/// e.g. "day before yesterday" isn't shadowed by "yesterday" when scanning.
fn trigger_patterns() -> &'static [TriggerPattern] {
    static PATTERNS: OnceLock<Vec<TriggerPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let mut patterns = vec![
            TriggerPattern { regex_source: r"\bday before yesterday\b", kind: ReferenceKind::Temporal },
            TriggerPattern { regex_source: r"\bday after tomorrow\b", kind: ReferenceKind::Temporal },
            TriggerPattern { regex_source: r"\byesterday\b", kind: ReferenceKind::Temporal },
            TriggerPattern { regex_source: r"\btomorrow\b", kind: ReferenceKind::Temporal },
            TriggerPattern { regex_source: r"\btoday\b", kind: ReferenceKind::Temporal },
            TriggerPattern { regex_source: r"\bright now\b", kind: ReferenceKind::Temporal },
            TriggerPattern { regex_source: r"\bnow\b", kind: ReferenceKind::Temporal },
            TriggerPattern { regex_source: r"\bearlier\b", kind: ReferenceKind::Temporal },
            TriggerPattern { regex_source: r"\blater\b", kind: ReferenceKind::Temporal },
            TriggerPattern { regex_source: r"\bsoon\b", kind: ReferenceKind::Temporal },
            TriggerPattern { regex_source: r"\brecently\b", kind: ReferenceKind::Temporal },
            TriggerPattern { regex_source: r"\bthis place\b", kind: ReferenceKind::Spatial },
            TriggerPattern { regex_source: r"\baround here\b", kind: ReferenceKind::Spatial },
            TriggerPattern { regex_source: r"\bnearby\b", kind: ReferenceKind::Spatial },
            TriggerPattern { regex_source: r"\bhere\b", kind: ReferenceKind::Spatial },
            TriggerPattern { regex_source: r"\bthey\b", kind: ReferenceKind::Entity },
            TriggerPattern { regex_source: r"\bthem\b", kind: ReferenceKind::Entity },
            TriggerPattern { regex_source: r"\bthat\b", kind: ReferenceKind::Entity },
            TriggerPattern { regex_source: r"\bthis\b", kind: ReferenceKind::Entity },
            TriggerPattern { regex_source: r"\bit\b", kind: ReferenceKind::Entity },
        ];
        patterns.sort_by_key(|p| std::cmp::Reverse(p.regex_source.len()));
        patterns
    })
}

fn trigger_regex(source: &'static str) -> Regex {
    Regex::new(&format!("(?i){source}")).expect("trigger pattern is a valid regex")
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceSpan {
    pub text: String,
    pub kind: ReferenceKind,
    pub start: usize,
    pub end: usize,
}

/// Scans `utterance` against the fixed, ordered trigger list, returning
/// non-overlapping spans in source order. A region already claimed by a
/// longer match is never reconsidered by a shorter one.
pub fn detect_references(utterance: &str) -> Vec<ReferenceSpan> {
    let mut claimed: Vec<(usize, usize)> = Vec::new();
    let mut spans = Vec::new();

    for pattern in trigger_patterns() {
        let re = trigger_regex(pattern.regex_source);
        for m in re.find_iter(utterance) {
            let (start, end) = (m.start(), m.end());
            if claimed.iter().any(|&(cs, ce)| start < ce && end > cs) {
                continue;
            }
            claimed.push((start, end));
            spans.push(ReferenceSpan { text: m.as_str().to_string(), kind: pattern.kind, start, end });
        }
    }

    spans.sort_by_key(|s| s.start);
    spans
}

#[derive(Debug, Clone)]
pub struct ResolvedReference {
    pub span: ReferenceSpan,
    pub confidence: f64,
    pub needs_clarification: bool,
    pub alternatives: Vec<String>,
    pub formatted: String,
}

#[derive(Debug, Clone, Default)]
pub struct ResolverContext {
    pub anchor_instant: Option<DateTime<Utc>>,
    pub timezone: Option<String>,
    pub session_start: Option<DateTime<Utc>>,
    pub location_consent: bool,
    pub conversation_history: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct UtteranceResolution {
    pub references: Vec<ResolvedReference>,
    pub overall_confidence: f64,
}

const CLARIFICATION_THRESHOLD: f64 = 0.5;

pub struct AssumptionResolver {
    clarification_threshold: f64,
    high_confidence_threshold: f64,
}

impl Default for AssumptionResolver {
    fn default() -> Self {
        Self { clarification_threshold: CLARIFICATION_THRESHOLD, high_confidence_threshold: 0.8 }
    }
}

impl AssumptionResolver {
    pub fn new(clarification_threshold: f64, high_confidence_threshold: f64) -> Self {
        Self { clarification_threshold, high_confidence_threshold }
    }

    /// Resolves every detected reference in `utterance`, then reduces to
    /// an overall confidence via the weakest per-reference link.
    pub fn resolve_utterance(&self, utterance: &str, ctx: &ResolverContext) -> Result<UtteranceResolution> {
        let spans = detect_references(utterance);
        let mut references = Vec::with_capacity(spans.len());

        for span in spans {
            let resolved = match span.kind {
                ReferenceKind::Temporal => self.resolve_temporal(span, ctx),
                ReferenceKind::Spatial => self.resolve_spatial(span, ctx),
                ReferenceKind::Entity => self.resolve_entity(span, ctx),
            };
            references.push(resolved);
        }

        let overall_confidence = references
            .iter()
            .map(|r| r.confidence)
            .fold(1.0_f64, f64::min);

        Ok(UtteranceResolution { references, overall_confidence })
    }

    fn resolve_temporal(&self, span: ReferenceSpan, ctx: &ResolverContext) -> ResolvedReference {
        let anchor = ctx.anchor_instant.unwrap_or_else(Utc::now);
        let timezone = ctx.timezone.as_deref().unwrap_or("UTC");
        let resolution = temporal::resolve_reference(&span.text, anchor, timezone, ctx.session_start);

        let needs_clarification = resolution.confidence < self.clarification_threshold || resolution.ambiguous;
        let formatted = self.format_resolution(&span.text, resolution.confidence, &resolution.reasoning);

        ResolvedReference {
            span,
            confidence: resolution.confidence,
            needs_clarification,
            alternatives: Vec::new(),
            formatted,
        }
    }

    fn resolve_spatial(&self, span: ReferenceSpan, ctx: &ResolverContext) -> ResolvedReference {
        let resolution = spatial::resolve_here(ctx.location_consent);
        let needs_clarification = resolution.confidence < self.clarification_threshold || !resolution.resolved;
        let formatted = self.format_resolution(&span.text, resolution.confidence, &resolution.reason);

        ResolvedReference {
            span,
            confidence: resolution.confidence,
            needs_clarification,
            alternatives: Vec::new(),
            formatted,
        }
    }

    fn resolve_entity(&self, span: ReferenceSpan, ctx: &ResolverContext) -> ResolvedReference {
        let candidates = entity_candidates(&ctx.conversation_history, ENTITY_HISTORY_WINDOW);

        if candidates.is_empty() {
            let formatted = self.format_resolution(&span.text, 0.3, "no conversation history available");
            return ResolvedReference { span, confidence: 0.3, needs_clarification: true, alternatives: Vec::new(), formatted };
        }

        let confidence = if candidates.len() == 1 { 0.6 } else { 0.4 };
        let primary = candidates[0].clone();
        let alternatives = candidates.into_iter().skip(1).collect::<Vec<_>>();
        let needs_clarification = confidence < self.clarification_threshold || !alternatives.is_empty();
        let formatted = self.format_resolution(&span.text, confidence, &format!("most recent candidate '{primary}'"));

        ResolvedReference { span, confidence, needs_clarification, alternatives, formatted }
    }

    fn format_resolution(&self, text: &str, confidence: f64, reasoning: &str) -> String {
        if confidence >= self.high_confidence_threshold {
            format!("'{text}' refers to {reasoning}")
        } else {
            format!("'{text}' likely refers to {reasoning}")
        }
    }
}

/// Quoted strings and capitalised noun phrases from the last `window`
/// messages, most recent first. A capitalised match already covered by a
/// quoted span in the same message is skipped, and sentence-initial words
/// (the first token of the message) are never treated as a noun phrase on
/// their own -- only a capitalised word following another word counts.
fn entity_candidates(history: &[String], window: usize) -> Vec<String> {
    static QUOTED: OnceLock<Regex> = OnceLock::new();
    static CAPITALIZED: OnceLock<Regex> = OnceLock::new();
    let quoted = QUOTED.get_or_init(|| Regex::new(r#""([^"]+)""#).unwrap());
    let capitalized = CAPITALIZED.get_or_init(|| Regex::new(r"(?:^|\S)\s+([A-Z][a-z]+(?:\s[A-Z][a-z]+)*)\b").unwrap());

    let mut candidates = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for message in history.iter().rev().take(window) {
        let mut claimed: Vec<(usize, usize)> = Vec::new();
        for m in quoted.captures_iter(message) {
            let whole = m.get(0).unwrap();
            claimed.push((whole.start(), whole.end()));
            let text = m[1].to_string();
            if seen.insert(text.clone()) {
                candidates.push(text);
            }
        }
        for m in capitalized.captures_iter(message) {
            let group = m.get(1).unwrap();
            if claimed.iter().any(|&(cs, ce)| group.start() < ce && group.end() > cs) {
                continue;
            }
            let text = group.as_str().to_string();
            if seen.insert(text.clone()) {
                candidates.push(text);
            }
        }
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_before_yesterday_not_split_into_yesterday() {
        let spans = detect_references("what happened the day before yesterday");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].kind, ReferenceKind::Temporal);
        assert_eq!(spans[0].text.to_lowercase(), "day before yesterday");
    }

    #[test]
    fn detects_mixed_temporal_spatial_entity_spans() {
        let spans = detect_references("is it open here today");
        let kinds: Vec<ReferenceKind> = spans.iter().map(|s| s.kind).collect();
        assert!(kinds.contains(&ReferenceKind::Entity));
        assert!(kinds.contains(&ReferenceKind::Spatial));
        assert!(kinds.contains(&ReferenceKind::Temporal));
    }

    #[test]
    fn overall_confidence_is_the_weakest_link() {
        let resolver = AssumptionResolver::default();
        let ctx = ResolverContext {
            anchor_instant: Some(Utc::now()),
            timezone: Some("UTC".to_string()),
            session_start: None,
            location_consent: false,
            conversation_history: Vec::new(),
        };
        let resolution = resolver.resolve_utterance("is it here now", &ctx).unwrap();
        let min_confidence = resolution.references.iter().map(|r| r.confidence).fold(1.0_f64, f64::min);
        assert_eq!(resolution.overall_confidence, min_confidence);
    }

    #[test]
    fn spatial_reference_without_consent_is_low_confidence() {
        let resolver = AssumptionResolver::default();
        let ctx = ResolverContext { location_consent: false, ..Default::default() };
        let resolution = resolver.resolve_utterance("what's near here", &ctx).unwrap();
        let spatial_ref = resolution.references.iter().find(|r| r.span.kind == ReferenceKind::Spatial).unwrap();
        assert!(spatial_ref.confidence < 0.5);
        assert!(spatial_ref.needs_clarification);
    }

    #[test]
    fn entity_reference_picks_most_recent_quoted_candidate() {
        let resolver = AssumptionResolver::default();
        let ctx = ResolverContext {
            conversation_history: vec!["I bought a \"Widget\"".to_string(), "Then I returned it".to_string()],
            ..Default::default()
        };
        let resolution = resolver.resolve_utterance("is it broken", &ctx).unwrap();
        let entity_ref = resolution.references.iter().find(|r| r.span.kind == ReferenceKind::Entity).unwrap();
        assert_eq!(entity_ref.confidence, 0.6);
    }

    #[test]
    fn entity_reference_without_history_is_unresolved() {
        let resolver = AssumptionResolver::default();
        let ctx = ResolverContext::default();
        let resolution = resolver.resolve_utterance("fix it", &ctx).unwrap();
        let entity_ref = resolution.references.iter().find(|r| r.span.kind == ReferenceKind::Entity).unwrap();
        assert_eq!(entity_ref.confidence, 0.3);
    }
}
