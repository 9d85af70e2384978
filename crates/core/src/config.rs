use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_usize(profile: &str, key: &str, default: usize) -> usize {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

/// Tunables for the matching engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Active profile name (empty = default).
    pub profile: String,
    pub rate_limit: RateLimitConfig,
    /// Maximum number of memoized (rule, object) outcomes.
    pub match_cache_capacity: usize,
    /// Period of the full-snapshot resync pass.
    pub resync_interval: Duration,
    /// Delay before a failed delta is handed to the coordinator again.
    pub retry_backoff: Duration,
}

impl EngineConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    ///
    /// Profile is read from `METERDEF_PROFILE`. When set (e.g. `STAGING`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("METERDEF_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            rate_limit: RateLimitConfig::from_env_profiled(p),
            match_cache_capacity: profiled_env_usize(p, "METERDEF_MATCH_CACHE_CAPACITY", 65_536),
            resync_interval: Duration::from_secs(profiled_env_u64(
                p,
                "METERDEF_RESYNC_INTERVAL_SECS",
                300,
            )),
            retry_backoff: Duration::from_millis(profiled_env_u64(p, "METERDEF_RETRY_BACKOFF_MS", 500)),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Reject settings that would stall the engine.
    pub fn validate(&self) -> Result<(), CoreError> {
        self.rate_limit.validate()?;
        if self.match_cache_capacity == 0 {
            return Err(CoreError::Config(
                "match cache capacity must be greater than zero".to_string(),
            ));
        }
        if self.resync_interval.is_zero() {
            return Err(CoreError::Config(
                "resync interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Engine config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  rate limit:  capacity={}, refill={:?}, idle_ttl={:?}",
            self.rate_limit.capacity,
            self.rate_limit.refill_interval,
            self.rate_limit.idle_ttl
        );
        tracing::info!("  match cache: capacity={}", self.match_cache_capacity);
        tracing::info!(
            "  resync:      interval={:?}, retry_backoff={:?}",
            self.resync_interval,
            self.retry_backoff
        );
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            profile: String::new(),
            rate_limit: RateLimitConfig::default(),
            match_cache_capacity: 65_536,
            resync_interval: Duration::from_secs(300),
            retry_backoff: Duration::from_millis(500),
        }
    }
}

// ── Rate limiting ─────────────────────────────────────────────

/// Per-rule token bucket settings for ingest admission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Bucket size; a fresh bucket starts full.
    pub capacity: u32,
    /// One token is added back per interval.
    pub refill_interval: Duration,
    /// Buckets untouched for this long are evicted.
    pub idle_ttl: Duration,
}

impl RateLimitConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            capacity: profiled_env_u32(p, "METERDEF_RATE_LIMIT_CAPACITY", 10),
            refill_interval: Duration::from_secs(profiled_env_u64(
                p,
                "METERDEF_RATE_LIMIT_REFILL_SECS",
                5,
            )),
            idle_ttl: Duration::from_secs(profiled_env_u64(
                p,
                "METERDEF_RATE_LIMIT_IDLE_TTL_SECS",
                3_600,
            )),
        }
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.capacity == 0 {
            return Err(CoreError::Config(
                "rate limit capacity must be greater than zero".to_string(),
            ));
        }
        if self.refill_interval.is_zero() {
            return Err(CoreError::Config(
                "rate limit refill interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            refill_interval: Duration::from_secs(5),
            idle_ttl: Duration::from_secs(3_600),
        }
    }
}
