//! Core data model entities (spec.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub slug: String,
    pub api_key: String,
    pub secondary_api_key: Option<String>,
    pub is_active: bool,
    pub settings: Value,
    pub limits: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDefaults {
    pub timezone: String,
    pub locale: String,
    pub country: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPrivacy {
    pub allow_location: bool,
    pub allow_situational: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub external_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub defaults: UserDefaults,
    pub privacy: UserPrivacy,
    pub preferences: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextType {
    Temporal,
    Spatial,
    Situational,
    Meta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Tier {
    LongTerm,
    ShortTerm,
    Ephemeral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftStatus {
    Stable,
    Drifting,
    Conflicting,
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    UserExplicit,
    UserImplicit,
    Api,
    Sensor,
    Inference,
    Historical,
    UserCorrection,
    Rollback,
}

impl Source {
    /// Fixed source-priority table used as a conflict-resolution tiebreaker.
    /// Higher is more authoritative.
    pub fn priority(self) -> u8 {
        match self {
            Source::UserExplicit => 6,
            Source::UserCorrection => 6,
            Source::UserImplicit => 5,
            Source::Api => 4,
            Source::Sensor => 3,
            Source::Inference => 2,
            Source::Historical => 1,
            Source::Rollback => 5,
        }
    }
}

impl ContextType {
    pub fn as_str(self) -> &'static str {
        match self {
            ContextType::Temporal => "temporal",
            ContextType::Spatial => "spatial",
            ContextType::Situational => "situational",
            ContextType::Meta => "meta",
        }
    }
}

impl std::str::FromStr for ContextType {
    type Err = crate::error::Error;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "temporal" => Ok(ContextType::Temporal),
            "spatial" => Ok(ContextType::Spatial),
            "situational" => Ok(ContextType::Situational),
            "meta" => Ok(ContextType::Meta),
            other => Err(crate::error::Error::Internal(format!("unknown context type '{other}'"))),
        }
    }
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::LongTerm => "long_term",
            Tier::ShortTerm => "short_term",
            Tier::Ephemeral => "ephemeral",
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = crate::error::Error;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "long_term" => Ok(Tier::LongTerm),
            "short_term" => Ok(Tier::ShortTerm),
            "ephemeral" => Ok(Tier::Ephemeral),
            other => Err(crate::error::Error::Internal(format!("unknown tier '{other}'"))),
        }
    }
}

impl DriftStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DriftStatus::Stable => "stable",
            DriftStatus::Drifting => "drifting",
            DriftStatus::Conflicting => "conflicting",
            DriftStatus::Stale => "stale",
        }
    }
}

impl std::str::FromStr for DriftStatus {
    type Err = crate::error::Error;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "stable" => Ok(DriftStatus::Stable),
            "drifting" => Ok(DriftStatus::Drifting),
            "conflicting" => Ok(DriftStatus::Conflicting),
            "stale" => Ok(DriftStatus::Stale),
            other => Err(crate::error::Error::Internal(format!("unknown drift status '{other}'"))),
        }
    }
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Source::UserExplicit => "user_explicit",
            Source::UserImplicit => "user_implicit",
            Source::Api => "api",
            Source::Sensor => "sensor",
            Source::Inference => "inference",
            Source::Historical => "historical",
            Source::UserCorrection => "user_correction",
            Source::Rollback => "rollback",
        }
    }
}

impl std::str::FromStr for Source {
    type Err = crate::error::Error;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user_explicit" => Ok(Source::UserExplicit),
            "user_implicit" => Ok(Source::UserImplicit),
            "api" => Ok(Source::Api),
            "sensor" => Ok(Source::Sensor),
            "inference" => Ok(Source::Inference),
            "historical" => Ok(Source::Historical),
            "user_correction" => Ok(Source::UserCorrection),
            "rollback" => Ok(Source::Rollback),
            other => Err(crate::error::Error::Internal(format!("unknown source '{other}'"))),
        }
    }
}

/// Confidence floor enforced after any decay.
pub const CONFIDENCE_FLOOR: f64 = 0.1;

pub fn clamp_confidence(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub context_type: ContextType,
    pub tier: Tier,
    pub key: String,
    pub value: Value,
    pub interpretation: Option<Value>,
    pub confidence: f64,
    pub source: Source,
    pub source_details: Option<Value>,
    pub drift_status: DriftStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_confirmed_at: Option<DateTime<Utc>>,
    pub correction_count: u32,
    pub session_id: Option<String>,
    pub is_active: bool,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContextRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(exp) if now > exp)
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.updated_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextVersion {
    pub context_id: Uuid,
    pub version: u32,
    pub value: Value,
    pub interpretation: Option<Value>,
    pub confidence: f64,
    pub previous_value: Option<Value>,
    pub changed_by: Source,
    pub change_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSession {
    pub user_id: Uuid,
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub client_info: Option<Value>,
    pub context_snapshot: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SemVer {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl SemVer {
    pub const INITIAL: SemVer = SemVer { major: 0, minor: 1, patch: 0 };

    pub fn bump_major(self) -> Self {
        SemVer { major: self.major + 1, minor: 0, patch: 0 }
    }
    pub fn bump_minor(self) -> Self {
        SemVer { major: self.major, minor: self.minor + 1, patch: 0 }
    }
    pub fn bump_patch(self) -> Self {
        SemVer { major: self.major, minor: self.minor, patch: self.patch + 1 }
    }
}

impl std::fmt::Display for SemVer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub id: Uuid,
    pub user_id: Uuid,
    pub semver: SemVer,
    pub trigger: String,
    pub parent_id: Option<Uuid>,
    pub per_type_context_maps: Value,
    pub checksum: String,
    pub timestamp: DateTime<Utc>,
    pub description: Option<String>,
    pub tags: Vec<String>,
}
