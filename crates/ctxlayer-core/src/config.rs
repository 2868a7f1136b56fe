//! Runtime configuration, populated from environment variables.
//!
//! Named fields with documented defaults, passed into each component's
//! factory — kept out of keyword-argument soup per the constructor
//! redesign note.

use std::env;
use std::time::Duration;

/// Confidence/decay/budget thresholds and the database/bus endpoints the
/// core needs. Mirrors the environment variables named in the external
/// interfaces section.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub bus_url: Option<String>,
    pub cors_origins: Vec<String>,

    pub default_confidence_threshold: f64,
    pub high_confidence_threshold: f64,
    pub context_decay_hours: f64,
    pub ephemeral_context_ttl_seconds: i64,
    pub max_context_tokens: usize,
    pub min_relevance_score: f64,

    pub slow_path_deadline_ms: u64,
    pub fast_path_target_ms: u64,
    pub cache_ttl: Duration,
    pub snapshot_history_cap: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            database_max_connections: 10,
            bus_url: None,
            cors_origins: vec!["*".to_string()],

            default_confidence_threshold: 0.5,
            high_confidence_threshold: 0.8,
            context_decay_hours: 24.0,
            ephemeral_context_ttl_seconds: 3600,
            max_context_tokens: 500,
            min_relevance_score: 0.3,

            slow_path_deadline_ms: 150,
            fast_path_target_ms: 10,
            cache_ttl: Duration::from_secs(300),
            snapshot_history_cap: 100,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// [`Config::default`] for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            database_max_connections: env_parse("DATABASE_MAX_CONNECTIONS")
                .unwrap_or(defaults.database_max_connections),
            bus_url: env::var("RAL_BUS_URL").ok(),
            cors_origins: env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|o| o.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),

            default_confidence_threshold: env_parse("DEFAULT_CONFIDENCE_THRESHOLD")
                .unwrap_or(defaults.default_confidence_threshold),
            high_confidence_threshold: env_parse("HIGH_CONFIDENCE_THRESHOLD")
                .unwrap_or(defaults.high_confidence_threshold),
            context_decay_hours: env_parse("CONTEXT_DECAY_HOURS")
                .unwrap_or(defaults.context_decay_hours),
            ephemeral_context_ttl_seconds: env_parse("EPHEMERAL_CONTEXT_TTL_SECONDS")
                .unwrap_or(defaults.ephemeral_context_ttl_seconds),
            max_context_tokens: env_parse("MAX_CONTEXT_TOKENS")
                .unwrap_or(defaults.max_context_tokens),
            min_relevance_score: env_parse("MIN_RELEVANCE_SCORE")
                .unwrap_or(defaults.min_relevance_score),

            slow_path_deadline_ms: defaults.slow_path_deadline_ms,
            fast_path_target_ms: defaults.fast_path_target_ms,
            cache_ttl: defaults.cache_ttl,
            snapshot_history_cap: defaults.snapshot_history_cap,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse::<T>().ok())
}
