//! Snapshot/Version Manager: detects major/minor/patch shifts between the
//! latest snapshot and an incoming context, stores immutable checksummed
//! snapshots, and supports restoration and diffing (spec.md §4.8).
//!
//! The pure functions below (`detect_shift`, `bump`, `checksum`, `diff`,
//! `enforce_history_cap`) are orchestrated by [`SnapshotManager`], which
//! persists snapshots through [`store::SnapshotStore`] the way
//! `memory::ContextMemory` orchestrates `memory::store::Store`.

pub mod store;

use geo::{HaversineDistance, Point};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{ContextSnapshot, SemVer};

const MAJOR_DISTANCE_METERS: f64 = 5000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftKind {
    Major,
    Minor,
    Patch,
}

#[derive(Debug, Clone)]
pub struct LocationPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub city: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ShiftInputs<'a> {
    pub previous_location: Option<&'a LocationPoint>,
    pub current_location: Option<&'a LocationPoint>,
    pub previous_time_of_day: Option<&'a str>,
    pub current_time_of_day: Option<&'a str>,
    pub previous_weekday: Option<u32>,
    pub current_weekday: Option<u32>,
    pub previous_activity: Option<&'a str>,
    pub current_activity: Option<&'a str>,
}

/// Location change (city/region differ, or haversine distance exceeds the
/// major threshold) is major; time-period or day-of-week transition, or
/// activity change, is minor; anything else is patch.
pub fn detect_shift(inputs: &ShiftInputs<'_>) -> ShiftKind {
    if let (Some(prev), Some(curr)) = (inputs.previous_location, inputs.current_location) {
        if prev.city.is_some() && prev.city != curr.city {
            return ShiftKind::Major;
        }
        if prev.region.is_some() && prev.region != curr.region {
            return ShiftKind::Major;
        }
        let a = Point::new(prev.longitude, prev.latitude);
        let b = Point::new(curr.longitude, curr.latitude);
        if a.haversine_distance(&b) > MAJOR_DISTANCE_METERS {
            return ShiftKind::Major;
        }
    }

    let time_period_changed = matches!(
        (inputs.previous_time_of_day, inputs.current_time_of_day),
        (Some(p), Some(c)) if p != c
    );
    let weekday_changed = matches!(
        (inputs.previous_weekday, inputs.current_weekday),
        (Some(p), Some(c)) if p != c
    );
    let activity_changed = matches!(
        (inputs.previous_activity, inputs.current_activity),
        (Some(p), Some(c)) if p != c
    );

    if time_period_changed || weekday_changed || activity_changed {
        return ShiftKind::Minor;
    }

    ShiftKind::Patch
}

pub fn bump(current: SemVer, shift: ShiftKind) -> SemVer {
    match shift {
        ShiftKind::Major => current.bump_major(),
        ShiftKind::Minor => current.bump_minor(),
        ShiftKind::Patch => current.bump_patch(),
    }
}

/// Stable checksum over a canonically-ordered JSON serialization of the
/// per-type context maps, so two snapshots with identical content always
/// hash identically regardless of map insertion order.
pub fn checksum(per_type_context_maps: &Value) -> String {
    let canonical = canonicalize(per_type_context_maps);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

fn canonicalize(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys.iter().map(|k| format!("\"{k}\":{}", canonicalize(&map[*k]))).collect();
            format!("{{{}}}", parts.join(","))
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", parts.join(","))
        }
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SnapshotDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
}

/// Flat diff between two snapshot content maps, keyed by dotted paths.
pub fn diff(before: &Value, after: &Value) -> SnapshotDiff {
    let mut before_paths = std::collections::BTreeMap::new();
    let mut after_paths = std::collections::BTreeMap::new();
    flatten("", before, &mut before_paths);
    flatten("", after, &mut after_paths);

    let mut added = Vec::new();
    let mut removed = Vec::new();
    let mut modified = Vec::new();

    for (path, after_value) in &after_paths {
        match before_paths.get(path) {
            None => added.push(path.clone()),
            Some(before_value) if before_value != after_value => modified.push(path.clone()),
            _ => {}
        }
    }
    for path in before_paths.keys() {
        if !after_paths.contains_key(path) {
            removed.push(path.clone());
        }
    }

    SnapshotDiff { added, removed, modified }
}

fn flatten(prefix: &str, value: &Value, out: &mut std::collections::BTreeMap<String, Value>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                let path = if prefix.is_empty() { k.clone() } else { format!("{prefix}.{k}") };
                flatten(&path, v, out);
            }
        }
        other => {
            out.insert(prefix.to_string(), other.clone());
        }
    }
}

/// Caps per-user snapshot history to `cap` entries, dropping the oldest.
pub fn enforce_history_cap<T>(history: &mut Vec<T>, cap: usize) {
    while history.len() > cap {
        history.remove(0);
    }
}

/// Orchestrates the pure shift/bump/checksum/diff functions above against
/// persisted snapshots: retrieves the latest snapshot for a user to diff
/// an incoming context against, captures a new snapshot when one is
/// warranted, restores a prior version, and enforces the history cap
/// against real rows rather than an in-memory `Vec`.
#[derive(Clone)]
pub struct SnapshotManager {
    store: store::SnapshotStore,
    history_cap: usize,
}

impl SnapshotManager {
    pub fn new(store: store::SnapshotStore, history_cap: usize) -> Self {
        Self { store, history_cap }
    }

    pub async fn latest_for_user(&self, user_id: Uuid) -> Result<Option<ContextSnapshot>> {
        self.store.latest_for_user(user_id).await
    }

    /// Diffs `per_type_context_maps` against the latest persisted snapshot
    /// for `user_id`, if one exists.
    pub async fn diff_against_latest(&self, user_id: Uuid, per_type_context_maps: &Value) -> Result<Option<SnapshotDiff>> {
        let latest = self.store.latest_for_user(user_id).await?;
        Ok(latest.map(|prev| diff(&prev.per_type_context_maps, per_type_context_maps)))
    }

    /// Classifies the shift from the latest snapshot via `shift_inputs`,
    /// bumps semver accordingly (or starts at `SemVer::INITIAL` when there
    /// is no prior snapshot), and persists the new immutable snapshot as
    /// the child of the one it supersedes.
    pub async fn capture(
        &self,
        user_id: Uuid,
        per_type_context_maps: Value,
        shift_inputs: &ShiftInputs<'_>,
        trigger: &str,
    ) -> Result<ContextSnapshot> {
        let latest = self.store.latest_for_user(user_id).await?;
        let (semver, parent_id) = match &latest {
            Some(prev) => (bump(prev.semver, detect_shift(shift_inputs)), Some(prev.id)),
            None => (SemVer::INITIAL, None),
        };

        let snapshot = ContextSnapshot {
            id: Uuid::new_v4(),
            user_id,
            semver,
            trigger: trigger.to_string(),
            parent_id,
            checksum: checksum(&per_type_context_maps),
            per_type_context_maps,
            timestamp: chrono::Utc::now(),
            description: None,
            tags: Vec::new(),
        };
        self.store.insert(&snapshot).await?;
        self.store.enforce_history_cap(user_id, self.history_cap).await?;
        Ok(snapshot)
    }

    /// Restores `target_id` by creating a new major snapshot whose content
    /// matches the target and whose parent points at it, per spec.md
    /// §4.8 ("restoring creates a new snapshot whose parent is the source
    /// of truth").
    pub async fn restore(&self, user_id: Uuid, target_id: Uuid) -> Result<ContextSnapshot> {
        let target = self
            .store
            .get_by_id(target_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("snapshot {target_id} not found")))?;
        if target.user_id != user_id {
            return Err(Error::NotFound(format!("snapshot {target_id} not found")));
        }

        let latest = self.store.latest_for_user(user_id).await?;
        let base = latest.map(|s| s.semver).unwrap_or(SemVer::INITIAL);

        let restored = ContextSnapshot {
            id: Uuid::new_v4(),
            user_id,
            semver: base.bump_major(),
            trigger: "restore".to_string(),
            parent_id: Some(target.id),
            checksum: target.checksum.clone(),
            per_type_context_maps: target.per_type_context_maps.clone(),
            timestamp: chrono::Utc::now(),
            description: Some(format!("restored from snapshot {}", target.semver)),
            tags: target.tags.clone(),
        };
        self.store.insert(&restored).await?;
        self.store.enforce_history_cap(user_id, self.history_cap).await?;
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn city_change_is_major() {
        let prev = LocationPoint { latitude: 37.7749, longitude: -122.4194, city: Some("San Francisco".into()), region: Some("CA".into()) };
        let curr = LocationPoint { latitude: 40.7128, longitude: -74.0060, city: Some("New York".into()), region: Some("NY".into()) };
        let inputs = ShiftInputs {
            previous_location: Some(&prev),
            current_location: Some(&curr),
            previous_time_of_day: None,
            current_time_of_day: None,
            previous_weekday: None,
            current_weekday: None,
            previous_activity: None,
            current_activity: None,
        };
        assert_eq!(detect_shift(&inputs), ShiftKind::Major);
    }

    #[test]
    fn small_move_within_same_city_is_not_major() {
        let prev = LocationPoint { latitude: 37.7749, longitude: -122.4194, city: Some("San Francisco".into()), region: Some("CA".into()) };
        let curr = LocationPoint { latitude: 37.7755, longitude: -122.4189, city: Some("San Francisco".into()), region: Some("CA".into()) };
        let inputs = ShiftInputs {
            previous_location: Some(&prev),
            current_location: Some(&curr),
            previous_time_of_day: Some("morning"),
            current_time_of_day: Some("morning"),
            previous_weekday: Some(1),
            current_weekday: Some(1),
            previous_activity: None,
            current_activity: None,
        };
        assert_eq!(detect_shift(&inputs), ShiftKind::Patch);
    }

    #[test]
    fn time_period_transition_is_minor() {
        let inputs = ShiftInputs {
            previous_location: None,
            current_location: None,
            previous_time_of_day: Some("morning"),
            current_time_of_day: Some("afternoon"),
            previous_weekday: None,
            current_weekday: None,
            previous_activity: None,
            current_activity: None,
        };
        assert_eq!(detect_shift(&inputs), ShiftKind::Minor);
    }

    #[test]
    fn checksum_is_stable_under_key_reordering() {
        let a = json!({"temporal": {"tz": "UTC"}, "spatial": {"country": "US"}});
        let b = json!({"spatial": {"country": "US"}, "temporal": {"tz": "UTC"}});
        assert_eq!(checksum(&a), checksum(&b));
    }

    #[test]
    fn diff_reports_added_removed_modified_paths() {
        let before = json!({"temporal": {"tz": "UTC"}, "spatial": {"country": "US"}});
        let after = json!({"temporal": {"tz": "America/New_York"}, "situational": {"busy": true}});
        let d = diff(&before, &after);
        assert!(d.modified.contains(&"temporal.tz".to_string()));
        assert!(d.removed.contains(&"spatial.country".to_string()));
        assert!(d.added.contains(&"situational.busy".to_string()));
    }

    #[test]
    fn history_cap_drops_oldest_entries() {
        let mut history: Vec<u32> = (0..5).collect();
        enforce_history_cap(&mut history, 3);
        assert_eq!(history, vec![2, 3, 4]);
    }

    async fn test_manager() -> SnapshotManager {
        use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
        use std::str::FromStr;
        let opts = SqliteConnectOptions::from_str("sqlite::memory:").unwrap().foreign_keys(false);
        let pool = SqlitePoolOptions::new().max_connections(1).connect_with(opts).await.expect("in-memory sqlite");
        sqlx::migrate!("../../migrations").run(&pool).await.expect("migrations");
        SnapshotManager::new(store::SnapshotStore::from_pool(pool), 100)
    }

    fn no_shift_inputs() -> ShiftInputs<'static> {
        ShiftInputs {
            previous_location: None,
            current_location: None,
            previous_time_of_day: None,
            current_time_of_day: None,
            previous_weekday: None,
            current_weekday: None,
            previous_activity: None,
            current_activity: None,
        }
    }

    #[tokio::test]
    async fn first_capture_for_a_user_starts_at_initial_semver_with_no_parent() {
        let manager = test_manager().await;
        let user_id = Uuid::new_v4();
        let snapshot = manager
            .capture(user_id, json!({"temporal": {"tz": "UTC"}}), &no_shift_inputs(), "initial")
            .await
            .expect("capture");

        assert_eq!(snapshot.semver, SemVer::INITIAL);
        assert!(snapshot.parent_id.is_none());
    }

    #[tokio::test]
    async fn city_change_between_captures_bumps_major_and_chains_parent() {
        let manager = test_manager().await;
        let user_id = Uuid::new_v4();
        let first = manager
            .capture(user_id, json!({"spatial": {"city": "San Francisco"}}), &no_shift_inputs(), "initial")
            .await
            .expect("capture 1");

        let prev = LocationPoint { latitude: 37.7749, longitude: -122.4194, city: Some("San Francisco".into()), region: Some("CA".into()) };
        let curr = LocationPoint { latitude: 40.7128, longitude: -74.0060, city: Some("New York".into()), region: Some("NY".into()) };
        let inputs = ShiftInputs {
            previous_location: Some(&prev),
            current_location: Some(&curr),
            previous_time_of_day: None,
            current_time_of_day: None,
            previous_weekday: None,
            current_weekday: None,
            previous_activity: None,
            current_activity: None,
        };

        let second = manager
            .capture(user_id, json!({"spatial": {"city": "New York"}}), &inputs, "location change")
            .await
            .expect("capture 2");

        assert_eq!(second.semver, SemVer { major: 1, minor: 0, patch: 0 });
        assert_eq!(second.parent_id, Some(first.id));
    }

    #[tokio::test]
    async fn restore_creates_new_major_snapshot_pointing_at_the_restored_version() {
        let manager = test_manager().await;
        let user_id = Uuid::new_v4();
        let first = manager
            .capture(user_id, json!({"temporal": {"tz": "UTC"}}), &no_shift_inputs(), "initial")
            .await
            .expect("capture 1");
        manager
            .capture(user_id, json!({"temporal": {"tz": "America/New_York"}}), &no_shift_inputs(), "update")
            .await
            .expect("capture 2");

        let restored = manager.restore(user_id, first.id).await.expect("restore");

        assert_eq!(restored.parent_id, Some(first.id));
        assert_eq!(restored.per_type_context_maps, first.per_type_context_maps);
        assert_eq!(restored.semver, SemVer { major: 1, minor: 0, patch: 0 });

        let latest = manager.latest_for_user(user_id).await.expect("latest").expect("present");
        assert_eq!(latest.id, restored.id);
    }

    #[tokio::test]
    async fn diff_against_latest_reports_changed_paths() {
        let manager = test_manager().await;
        let user_id = Uuid::new_v4();
        manager
            .capture(user_id, json!({"temporal": {"tz": "UTC"}}), &no_shift_inputs(), "initial")
            .await
            .expect("capture 1");

        let incoming = json!({"temporal": {"tz": "America/New_York"}, "situational": {"busy": true}});
        let changes = manager.diff_against_latest(user_id, &incoming).await.expect("diff").expect("has latest");

        assert!(changes.modified.contains(&"temporal.tz".to_string()));
        assert!(changes.added.contains(&"situational.busy".to_string()));
    }

    #[tokio::test]
    async fn diff_against_latest_is_none_without_a_prior_snapshot() {
        let manager = test_manager().await;
        let user_id = Uuid::new_v4();
        let changes = manager.diff_against_latest(user_id, &json!({"temporal": {"tz": "UTC"}})).await.expect("diff");
        assert!(changes.is_none());
    }

    #[tokio::test]
    async fn restoring_another_users_snapshot_is_not_found() {
        let manager = test_manager().await;
        let owner = Uuid::new_v4();
        let intruder = Uuid::new_v4();
        let snapshot = manager
            .capture(owner, json!({"temporal": {"tz": "UTC"}}), &no_shift_inputs(), "initial")
            .await
            .expect("capture");

        let result = manager.restore(intruder, snapshot.id).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
