//! Route handlers for the stable v0 HTTP surface (spec.md §6).

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use ctxlayer_core::composer::{self, Domain, DomainInterpretation};
use ctxlayer_core::drift;
use ctxlayer_core::error::Error;
use ctxlayer_core::resolver::{AssumptionResolver, ResolverContext};
use ctxlayer_core::snapshot::{LocationPoint, ShiftInputs};
use ctxlayer_core::traits::ListFilters;
use ctxlayer_core::types::{ContextRecord, ContextType, DriftStatus, Source, Tier};
use ctxlayer_registry::ProviderId;

use super::AppState;

const USER_HEADER: &str = "x-ral-user";

fn error_response(err: Error) -> Response {
    let status = match err.kind() {
        "invalid_input" => StatusCode::BAD_REQUEST,
        "not_found" => StatusCode::NOT_FOUND,
        "unauthenticated" => StatusCode::UNAUTHORIZED,
        "unauthorized" => StatusCode::FORBIDDEN,
        "conflict" => StatusCode::CONFLICT,
        "deadline_exceeded" => StatusCode::OK,
        "transient" => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
}

fn ok<T: Serialize>(value: T) -> Response {
    (StatusCode::OK, Json(value)).into_response()
}

fn resolve_user_id(headers: &HeaderMap, body_user_id: Option<&str>) -> Result<Uuid, Error> {
    let raw = headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .or(body_user_id)
        .ok_or_else(|| Error::InvalidInput("userId is required (body field or X-RAL-User header)".to_string()))?;
    Uuid::parse_str(raw).map_err(|_| Error::InvalidInput(format!("invalid userId '{raw}'")))
}

fn domain_for(context_type: ContextType) -> Option<Domain> {
    match context_type {
        ContextType::Temporal => Some(Domain::Temporal),
        ContextType::Spatial => Some(Domain::Spatial),
        ContextType::Situational => Some(Domain::Situational),
        ContextType::Meta => None,
    }
}

async fn interpretations_for_user(
    state: &AppState,
    user_id: Uuid,
    include_types: Option<&[ContextType]>,
) -> Result<Vec<DomainInterpretation>, Error> {
    let records = state.runtime.memory.list_for_user(user_id, ListFilters::default()).await?;
    Ok(records
        .into_iter()
        .filter(|r| include_types.map(|types| types.contains(&r.context_type)).unwrap_or(true))
        .filter_map(|r| {
            domain_for(r.context_type).map(|domain| DomainInterpretation {
                domain,
                key: r.key,
                value: r.value,
                confidence: r.confidence,
                base_weight: 0.5,
                interpretation: r.interpretation,
            })
        })
        .collect())
}

#[derive(Debug, Deserialize)]
pub struct UniversalAugmentRequest {
    pub prompt: String,
    pub user_id: Option<String>,
    pub provider: Option<String>,
    #[serde(default)]
    pub include_types: Vec<String>,
    pub max_tokens: Option<usize>,
    pub format: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UniversalAugmentResponse {
    pub system_context: String,
    pub user_prompt: String,
    pub augmented_prompt: Option<String>,
    pub request_id: Uuid,
    pub timestamp: chrono::DateTime<Utc>,
    pub provider: String,
    pub context_tokens: usize,
    pub context: Vec<String>,
}

pub async fn universal_augment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<UniversalAugmentRequest>,
) -> Response {
    let user_id = match resolve_user_id(&headers, body.user_id.as_deref()) {
        Ok(id) => id,
        Err(e) => return error_response(e),
    };

    let include_types: Vec<ContextType> = body
        .include_types
        .iter()
        .filter_map(|s| s.parse::<ContextType>().ok())
        .collect();
    let include_filter = if include_types.is_empty() { None } else { Some(include_types.as_slice()) };

    let interpretations = match interpretations_for_user(&state, user_id, include_filter).await {
        Ok(i) => i,
        Err(e) => return error_response(e),
    };

    let provider = ProviderId::from_str_or_generic(body.provider.as_deref().unwrap_or("generic"));
    let max_tokens = body.max_tokens.unwrap_or(state.runtime.config.max_context_tokens);
    let composed = composer::compose(
        &body.prompt,
        &interpretations,
        provider,
        max_tokens,
        state.runtime.config.min_relevance_score,
        50,
    );

    let augmented_prompt = match body.format.as_deref() {
        Some("prefix") => Some(format!("{}\n\n{}", composed.system_context, composed.user_message)),
        Some("suffix") => Some(format!("{}\n\n{}", composed.user_message, composed.system_context)),
        Some("system") => Some(composed.system_context.clone()),
        _ => None,
    };

    ok(UniversalAugmentResponse {
        system_context: composed.system_context,
        user_prompt: composed.user_message,
        augmented_prompt,
        request_id: Uuid::new_v4(),
        timestamp: Utc::now(),
        provider: format!("{:?}", provider).to_lowercase(),
        context_tokens: composed.total_tokens,
        context: composed.included_elements,
    })
}

#[derive(Debug, Deserialize)]
pub struct ContextResolveRequest {
    pub user_id: String,
    pub message: String,
    #[serde(default)]
    pub signals: Value,
}

#[derive(Debug, Serialize)]
pub struct ResolvedToken {
    pub value: String,
    pub display: String,
    pub confidence: f64,
    pub source: String,
}

#[derive(Debug, Serialize)]
pub struct ContextResolveResponse {
    pub resolve_id: Uuid,
    pub resolved: std::collections::HashMap<String, ResolvedToken>,
    pub context_snapshot: Vec<String>,
    pub warnings: Vec<String>,
}

pub async fn context_resolve(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ContextResolveRequest>,
) -> Response {
    let user_id = match resolve_user_id(&headers, Some(&body.user_id)) {
        Ok(id) => id,
        Err(e) => return error_response(e),
    };

    let records = match state.runtime.memory.list_for_user(user_id, ListFilters::default()).await {
        Ok(r) => r,
        Err(e) => return error_response(e),
    };

    let location_consent = body.signals.get("allowLocation").and_then(Value::as_bool).unwrap_or(false);
    let timezone = body
        .signals
        .get("timezone")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| "UTC".to_string());

    let ctx = ResolverContext {
        anchor_instant: Some(Utc::now()),
        timezone: Some(timezone),
        session_start: None,
        location_consent,
        conversation_history: Vec::new(),
    };

    let resolver = AssumptionResolver::default();
    let resolution = match resolver.resolve_utterance(&body.message, &ctx) {
        Ok(r) => r,
        Err(e) => return error_response(e),
    };

    let mut resolved = std::collections::HashMap::new();
    let mut warnings = Vec::new();
    for reference in &resolution.references {
        resolved.insert(
            reference.span.text.clone(),
            ResolvedToken {
                value: reference.span.text.clone(),
                display: reference.formatted.clone(),
                confidence: reference.confidence,
                source: format!("{:?}", reference.span.kind).to_lowercase(),
            },
        );
        if reference.needs_clarification {
            warnings.push(format!("'{}' needs clarification", reference.span.text));
        }
    }

    ok(ContextResolveResponse {
        resolve_id: Uuid::new_v4(),
        resolved,
        context_snapshot: records.into_iter().map(|r| r.key).collect(),
        warnings,
    })
}

#[derive(Debug, Deserialize)]
pub struct SnapshotQuery {
    pub user_id: String,
    pub timezone: Option<String>,
    pub locale: Option<String>,
}

pub async fn context_snapshot(State(state): State<AppState>, headers: HeaderMap, Query(query): Query<SnapshotQuery>) -> Response {
    if let Err(e) = resolve_user_id(&headers, Some(&query.user_id)) {
        return error_response(e);
    }

    let timezone = query.timezone.unwrap_or_else(|| "UTC".to_string());
    let (atomic, warnings) = ctxlayer_core::bus::compute_atomic_context(
        Utc::now(),
        &timezone,
        query.locale.as_deref(),
        state.runtime.fast_path_target(),
    );

    ok(serde_json::json!({ "atomic": atomic, "warnings": warnings }))
}

/// Folds a user's active records into the `{type: {key: value}}` shape the
/// Snapshot Manager checksums and diffs, keyed the same way `ContextType`
/// values round-trip through `as_str`.
fn context_maps(records: &[ContextRecord]) -> Value {
    let mut map = serde_json::Map::new();
    for record in records {
        let entry = map
            .entry(record.context_type.as_str().to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if let Value::Object(type_map) = entry {
            type_map.insert(record.key.clone(), record.value.clone());
        }
    }
    Value::Object(map)
}

fn location_point_from_maps(maps: &Value) -> Option<LocationPoint> {
    let location = maps.get("spatial")?.get("location")?;
    Some(LocationPoint {
        latitude: location.get("latitude").and_then(Value::as_f64).unwrap_or(0.0),
        longitude: location.get("longitude").and_then(Value::as_f64).unwrap_or(0.0),
        city: location.get("city").and_then(Value::as_str).map(str::to_string),
        region: location.get("region").and_then(Value::as_str).map(str::to_string),
    })
}

fn time_of_day_from_maps(maps: &Value) -> Option<String> {
    maps.get("temporal")?.get("time_of_day")?.as_str().map(str::to_string)
}

fn activity_from_maps(maps: &Value) -> Option<String> {
    maps.get("situational")?.get("activity")?.as_str().map(str::to_string)
}

/// Captures a new snapshot for `user_id` from its current active records,
/// diffed against the latest persisted snapshot for shift classification.
/// Snapshot capture is supplementary to the write it follows: a failure
/// here is logged and swallowed rather than failing the caller's request.
async fn capture_snapshot(state: &AppState, user_id: Uuid, trigger: &str) {
    let records = match state.runtime.memory.list_for_user(user_id, ListFilters::default()).await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(%user_id, error = %e, "could not load records for snapshot capture");
            return;
        }
    };
    let maps = context_maps(&records);

    match state.runtime.snapshots.diff_against_latest(user_id, &maps).await {
        Ok(Some(changes)) if !(changes.added.is_empty() && changes.removed.is_empty() && changes.modified.is_empty()) => {
            tracing::debug!(%user_id, added = changes.added.len(), removed = changes.removed.len(), modified = changes.modified.len(), "context changed since last snapshot");
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(%user_id, error = %e, "could not diff against latest snapshot"),
    }

    let latest = state.runtime.snapshots.latest_for_user(user_id).await.ok().flatten();
    let previous_maps = latest.as_ref().map(|s| &s.per_type_context_maps);

    let previous_location = previous_maps.and_then(|m| location_point_from_maps(m));
    let current_location = location_point_from_maps(&maps);
    let previous_time_of_day = previous_maps.and_then(|m| time_of_day_from_maps(m));
    let current_time_of_day = time_of_day_from_maps(&maps);
    let previous_activity = previous_maps.and_then(|m| activity_from_maps(m));
    let current_activity = activity_from_maps(&maps);
    let previous_weekday = latest.as_ref().map(|s| s.timestamp.weekday().num_days_from_monday());
    let current_weekday = Some(Utc::now().weekday().num_days_from_monday());

    let shift_inputs = ShiftInputs {
        previous_location: previous_location.as_ref(),
        current_location: current_location.as_ref(),
        previous_time_of_day: previous_time_of_day.as_deref(),
        current_time_of_day: current_time_of_day.as_deref(),
        previous_weekday,
        current_weekday,
        previous_activity: previous_activity.as_deref(),
        current_activity: current_activity.as_deref(),
    };

    match state.runtime.snapshots.capture(user_id, maps, &shift_inputs, trigger).await {
        Ok(snapshot) => {
            tracing::info!(%user_id, semver = %snapshot.semver, trigger, "captured context snapshot");
        }
        Err(e) => {
            tracing::warn!(%user_id, error = %e, "snapshot capture failed");
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ContextUpdateItem {
    #[serde(rename = "type")]
    pub context_type: String,
    pub key: String,
    pub value: Value,
    pub source: Option<String>,
}

pub async fn context_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(items): Json<Vec<ContextUpdateItem>>,
) -> Response {
    let user_id = match resolve_user_id(&headers, None) {
        Ok(id) => id,
        Err(e) => return error_response(e),
    };

    let mut updated = Vec::new();
    for item in items {
        let context_type = match item.context_type.parse::<ContextType>() {
            Ok(t) => t,
            Err(e) => return error_response(e),
        };
        let source = item
            .source
            .as_deref()
            .and_then(|s| s.parse::<Source>().ok())
            .unwrap_or(Source::UserExplicit);

        let record = match state
            .runtime
            .memory
            .store_value(user_id, context_type, &item.key, item.value, Tier::ShortTerm, 0.9, source, None)
            .await
        {
            Ok(r) => r,
            Err(e) => return error_response(e),
        };
        updated.push(record.id);
    }

    capture_snapshot(&state, user_id, "context_update").await;

    ok(serde_json::json!({ "updated": updated }))
}

#[derive(Debug, Deserialize)]
pub struct PromptAugmentRequest {
    pub user_id: Option<String>,
    pub prompt: String,
    pub provider: Option<String>,
    #[serde(default)]
    pub include_types: Vec<String>,
    pub max_context_tokens: Option<usize>,
    pub injection_style: Option<String>,
}

pub async fn prompt_augment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<PromptAugmentRequest>,
) -> Response {
    let user_id = match resolve_user_id(&headers, body.user_id.as_deref()) {
        Ok(id) => id,
        Err(e) => return error_response(e),
    };

    let include_types: Vec<ContextType> = body.include_types.iter().filter_map(|s| s.parse::<ContextType>().ok()).collect();
    let include_filter = if include_types.is_empty() { None } else { Some(include_types.as_slice()) };

    let interpretations = match interpretations_for_user(&state, user_id, include_filter).await {
        Ok(i) => i,
        Err(e) => return error_response(e),
    };

    let provider = ProviderId::from_str_or_generic(body.provider.as_deref().unwrap_or("generic"));
    let max_tokens = body.max_context_tokens.unwrap_or(state.runtime.config.max_context_tokens);
    let composed = composer::compose(&body.prompt, &interpretations, provider, max_tokens, state.runtime.config.min_relevance_score, 50);

    let injected = match body.injection_style.as_deref() {
        Some("prefix") => format!("{}\n\n{}", composed.system_context, composed.user_message),
        Some("suffix") => format!("{}\n\n{}", composed.user_message, composed.system_context),
        _ => composed.system_context.clone(),
    };

    ok(serde_json::json!({
        "injected": injected,
        "includedElements": composed.included_elements,
        "excludedElements": composed.excluded_elements,
        "totalTokens": composed.total_tokens,
    }))
}

#[derive(Debug, Deserialize)]
pub struct DriftQuery {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct DriftTypeStatus {
    pub status: DriftStatus,
    pub health: f64,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DriftStatusResponse {
    pub health: f64,
    pub counts: std::collections::HashMap<String, usize>,
    pub recommendations: Vec<String>,
    pub signals: Vec<drift::DriftSignal>,
    pub by_type: std::collections::HashMap<String, DriftTypeStatus>,
}

const DRIFT_TRACKED_TYPES: [ContextType; 4] =
    [ContextType::Temporal, ContextType::Spatial, ContextType::Situational, ContextType::Meta];

pub async fn drift_status(State(state): State<AppState>, headers: HeaderMap, Query(query): Query<DriftQuery>) -> Response {
    let user_id = match resolve_user_id(&headers, Some(&query.user_id)) {
        Ok(id) => id,
        Err(e) => return error_response(e),
    };

    let records = match state.runtime.memory.list_for_user(user_id, ListFilters::default()).await {
        Ok(r) => r,
        Err(e) => return error_response(e),
    };

    let now = Utc::now();
    let report = drift::detect(&records, now);

    let mut by_type = std::collections::HashMap::new();
    for context_type in DRIFT_TRACKED_TYPES {
        let subset: Vec<_> = records.iter().filter(|r| r.context_type == context_type).cloned().collect();
        if subset.is_empty() {
            continue;
        }
        let subset_report = drift::detect(&subset, now);
        let status = drift::next_drift_status(&subset_report.signals);
        by_type.insert(
            format!("{context_type:?}").to_lowercase(),
            DriftTypeStatus { status, health: subset_report.health, recommendations: subset_report.recommendations },
        );
    }

    ok(DriftStatusResponse {
        health: report.health,
        counts: report.counts,
        recommendations: report.recommendations,
        signals: report.signals,
        by_type,
    })
}
