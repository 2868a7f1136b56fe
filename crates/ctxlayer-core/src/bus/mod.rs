//! Dual-path Resolution Bus: a synchronous fast path computed inline, and
//! an optional asynchronous slow path bounded by a per-request deadline
//! (spec.md §4.7).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::temporal::{self, TemporalContext};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtomicContext {
    pub instant: DateTime<Utc>,
    pub day_of_week: u32,
    pub time_of_day: String,
    pub hour: u32,
    pub minute: u32,
    pub timezone: String,
    pub utc_offset_hours: f64,
    pub locale: Option<String>,
    pub language: Option<String>,
    pub currency: Option<String>,
    pub date_format: Option<String>,
}

/// Fast path: computed directly from inputs, target p99 < 10ms, no
/// external calls. If the target is exceeded a warning is pushed but the
/// result is still returned -- this function never fails.
pub fn compute_atomic_context(
    now: DateTime<Utc>,
    timezone: &str,
    locale: Option<&str>,
    fast_path_target: Duration,
) -> (AtomicContext, Vec<String>) {
    let started = std::time::Instant::now();
    let (ctx, mut warnings): (TemporalContext, Vec<String>) = temporal::interpret(now, timezone, None);

    let parsed_locale = locale.map(crate::spatial::parse_locale);
    let country = parsed_locale.as_ref().and_then(|l| l.country.clone());
    let spatial = crate::spatial::build_spatial_context(locale, country.as_deref(), true);

    let atomic = AtomicContext {
        instant: ctx.utc_instant,
        day_of_week: ctx.weekday_index,
        time_of_day: format!("{:?}", ctx.time_of_day).to_lowercase(),
        hour: ctx.hour,
        minute: ctx.minute,
        timezone: ctx.timezone.clone(),
        utc_offset_hours: ctx.utc_offset_hours,
        locale: locale.map(str::to_string),
        language: parsed_locale.map(|l| l.language),
        currency: spatial.currency.map(str::to_string),
        date_format: Some(format!("{:?}", spatial.date_format).to_uppercase()),
    };

    if started.elapsed() > fast_path_target {
        let elapsed_ms = started.elapsed().as_millis();
        tracing::warn!(elapsed_ms, target_ms = fast_path_target.as_millis() as u64, "fast path exceeded its target");
        warnings.push(format!(
            "fast path exceeded its {}ms target",
            fast_path_target.as_millis()
        ));
    }

    (atomic, warnings)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextResolutionRequest {
    pub request_id: Uuid,
    pub user_id: Uuid,
    pub query: String,
    pub priority: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HighEntropyContext {
    pub request_id: Uuid,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlowPathOutcome {
    Completed,
    TimedOut,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextResolutionResult {
    pub atomic: AtomicContext,
    pub slow_path: Option<HighEntropyContext>,
    pub outcome: SlowPathOutcome,
    pub warnings: Vec<String>,
}

/// Dual-path bus. `publish` is called by the slow-path producer (whatever
/// resolves a `ContextResolutionRequest` into a `HighEntropyContext`); the
/// pending-request table ties each in-flight request's `requestId` to a
/// oneshot completion, so a late response after the deadline is dropped
/// rather than buffered.
pub struct ResolutionBus {
    request_tx: mpsc::Sender<ContextResolutionRequest>,
    pending: Arc<DashMap<Uuid, oneshot::Sender<HighEntropyContext>>>,
}

impl ResolutionBus {
    /// Spawns the single listener task that drains `response_rx` and
    /// delivers each response to its pending completion, if still present.
    pub fn new(request_tx: mpsc::Sender<ContextResolutionRequest>, mut response_rx: mpsc::Receiver<HighEntropyContext>) -> Self {
        let pending: Arc<DashMap<Uuid, oneshot::Sender<HighEntropyContext>>> = Arc::new(DashMap::new());
        let pending_for_listener = pending.clone();

        tokio::spawn(async move {
            while let Some(response) = response_rx.recv().await {
                if let Some((_, sender)) = pending_for_listener.remove(&response.request_id) {
                    let _ = sender.send(response);
                }
            }
        });

        Self { request_tx, pending }
    }

    /// Runs the fast path inline and, if requested, races the slow path
    /// against `deadline`. Under timeout, returns the atomic context
    /// alone and removes the pending entry so a later response is dropped.
    pub async fn resolve(
        &self,
        now: DateTime<Utc>,
        timezone: &str,
        locale: Option<&str>,
        fast_path_target: Duration,
        slow_path_query: Option<(Uuid, Uuid, String, u8)>,
        deadline: Duration,
    ) -> ContextResolutionResult {
        let (atomic, mut warnings) = compute_atomic_context(now, timezone, locale, fast_path_target);

        let Some((request_id, user_id, query, priority)) = slow_path_query else {
            return ContextResolutionResult { atomic, slow_path: None, outcome: SlowPathOutcome::Skipped, warnings };
        };

        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id, tx);

        if self
            .request_tx
            .send(ContextResolutionRequest { request_id, user_id, query, priority })
            .await
            .is_err()
        {
            self.pending.remove(&request_id);
            warnings.push("slow path request channel closed".to_string());
            return ContextResolutionResult { atomic, slow_path: None, outcome: SlowPathOutcome::Skipped, warnings };
        }

        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(response)) => ContextResolutionResult { atomic, slow_path: Some(response), outcome: SlowPathOutcome::Completed, warnings },
            Ok(Err(_)) => {
                self.pending.remove(&request_id);
                tracing::warn!(%request_id, "slow path producer dropped the response channel, degrading to atomic context");
                ContextResolutionResult { atomic, slow_path: None, outcome: SlowPathOutcome::TimedOut, warnings }
            }
            Err(_) => {
                self.pending.remove(&request_id);
                tracing::warn!(%request_id, deadline_ms = deadline.as_millis() as u64, "slow path deadline exceeded, degrading to atomic context");
                ContextResolutionResult { atomic, slow_path: None, outcome: SlowPathOutcome::TimedOut, warnings }
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fast_path_alone_is_skipped_outcome() {
        let (request_tx, _request_rx) = mpsc::channel(16);
        let (_response_tx, response_rx) = mpsc::channel(16);
        let bus = ResolutionBus::new(request_tx, response_rx);

        let result = bus
            .resolve(Utc::now(), "UTC", Some("en-US"), Duration::from_millis(10), None, Duration::from_millis(150))
            .await;
        assert_eq!(result.outcome, SlowPathOutcome::Skipped);
        assert!(result.slow_path.is_none());
    }

    #[tokio::test]
    async fn slow_path_completes_when_producer_responds_in_time() {
        let (request_tx, mut request_rx) = mpsc::channel(16);
        let (response_tx, response_rx) = mpsc::channel(16);
        let bus = ResolutionBus::new(request_tx, response_rx);

        tokio::spawn(async move {
            if let Some(req) = request_rx.recv().await {
                let _ = response_tx
                    .send(HighEntropyContext { request_id: req.request_id, payload: serde_json::json!({"ok": true}) })
                    .await;
            }
        });

        let request_id = Uuid::new_v4();
        let result = bus
            .resolve(
                Utc::now(),
                "UTC",
                None,
                Duration::from_millis(10),
                Some((request_id, Uuid::new_v4(), "where am I".to_string(), 5)),
                Duration::from_millis(150),
            )
            .await;
        assert_eq!(result.outcome, SlowPathOutcome::Completed);
        assert!(result.slow_path.is_some());
    }

    #[tokio::test]
    async fn slow_path_times_out_and_clears_pending_entry() {
        let (request_tx, mut request_rx) = mpsc::channel(16);
        let (_response_tx, response_rx) = mpsc::channel(16);
        let bus = ResolutionBus::new(request_tx, response_rx);
        tokio::spawn(async move { while request_rx.recv().await.is_some() {} });

        let request_id = Uuid::new_v4();
        let result = bus
            .resolve(
                Utc::now(),
                "UTC",
                None,
                Duration::from_millis(10),
                Some((request_id, Uuid::new_v4(), "slow query".to_string(), 1)),
                Duration::from_millis(20),
            )
            .await;
        assert_eq!(result.outcome, SlowPathOutcome::TimedOut);
        assert_eq!(bus.pending_count(), 0);
    }
}
