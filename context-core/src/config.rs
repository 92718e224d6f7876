//! Engine configuration.
//!
//! Every field has a default. Configuration can be built in code, parsed
//! from JSON, or read from `CONTEXT_ENGINE_*` environment variables.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::memory::Tier;

/// Default maximum payload size (1 MiB).
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Default interval for the GC sweep and snapshot timers.
pub const DEFAULT_INTERVAL_SECS: u64 = 300;

/// Maximum age before a tier member goes stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierAge {
    /// Stale once a newer session has started
    Session,
    /// Stale after the given number of days
    Days(u32),
    /// Never stale by age
    Unbounded,
}

/// Retention policy for a single tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPolicy {
    pub max_age: TierAge,
    /// Maximum number of members; `None` means unbounded
    pub capacity: Option<usize>,
}

impl TierPolicy {
    pub fn new(max_age: TierAge, capacity: Option<usize>) -> Self {
        Self { max_age, capacity }
    }

    /// Max age as a duration, for day-bounded tiers.
    pub fn max_age_duration(&self) -> Option<Duration> {
        match self.max_age {
            TierAge::Days(days) => Some(Duration::days(i64::from(days))),
            TierAge::Session | TierAge::Unbounded => None,
        }
    }
}

/// Retention policies for all four tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierPolicies {
    pub immediate: TierPolicy,
    pub short_term: TierPolicy,
    pub long_term: TierPolicy,
    pub institutional: TierPolicy,
}

impl Default for TierPolicies {
    fn default() -> Self {
        Self {
            immediate: TierPolicy::new(TierAge::Session, Some(1_000)),
            short_term: TierPolicy::new(TierAge::Days(7), Some(5_000)),
            long_term: TierPolicy::new(TierAge::Unbounded, Some(10_000)),
            institutional: TierPolicy::new(TierAge::Unbounded, None),
        }
    }
}

impl TierPolicies {
    pub fn get(&self, tier: Tier) -> &TierPolicy {
        match tier {
            Tier::Immediate => &self.immediate,
            Tier::ShortTerm => &self.short_term,
            Tier::LongTerm => &self.long_term,
            Tier::Institutional => &self.institutional,
        }
    }

    pub fn get_mut(&mut self, tier: Tier) -> &mut TierPolicy {
        match tier {
            Tier::Immediate => &mut self.immediate,
            Tier::ShortTerm => &mut self.short_term,
            Tier::LongTerm => &mut self.long_term,
            Tier::Institutional => &mut self.institutional,
        }
    }
}

/// Weights of the relevance score components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingWeights {
    pub recency: f64,
    pub significance: f64,
    pub connectivity: f64,
    pub content: f64,
    /// Time constant of the recency decay, in days
    pub decay_days: f64,
    /// Degree at which the connectivity term saturates
    pub degree_cap: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            recency: 0.3,
            significance: 0.4,
            connectivity: 0.2,
            content: 0.1,
            decay_days: 7.0,
            degree_cap: 10.0,
        }
    }
}

/// Configuration for a snapshot backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Single JSON file, replaced atomically
    File { path: PathBuf },
    /// SQLite database keeping the most recent snapshots
    Sqlite {
        path: PathBuf,
        #[serde(default = "default_sqlite_retain")]
        retain: usize,
    },
    /// Object store reachable over HTTP PUT/GET
    Http {
        url: String,
        #[serde(default)]
        bearer_token: Option<String>,
        #[serde(default = "default_http_timeout_ms")]
        timeout_ms: u64,
    },
}

fn default_sqlite_retain() -> usize {
    5
}

fn default_http_timeout_ms() -> u64 {
    30_000
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Captures with larger payloads are rejected
    pub max_payload_bytes: usize,
    pub tiers: TierPolicies,
    /// ShortTerm members with at least this many graph neighbours are
    /// promoted to LongTerm during a sweep
    pub promotion_min_degree: usize,
    pub ranking: RankingWeights,
    /// Strength given to co-mentioned entities by the default extractor
    pub co_mention_strength: f64,
    pub gc_interval_secs: u64,
    pub persist_interval_secs: u64,
    /// Snapshot backends in restore priority order
    pub backends: Vec<BackendConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            tiers: TierPolicies::default(),
            promotion_min_degree: 5,
            ranking: RankingWeights::default(),
            co_mention_strength: crate::graph::extract::DEFAULT_CO_MENTION_STRENGTH,
            gc_interval_secs: DEFAULT_INTERVAL_SECS,
            persist_interval_secs: DEFAULT_INTERVAL_SECS,
            backends: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Create configuration from environment variables.
    ///
    /// `CONTEXT_ENGINE_SNAPSHOT_FILE` and `CONTEXT_ENGINE_SNAPSHOT_URL` add a
    /// file and an HTTP backend, in that priority order.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let mut backends = Vec::new();
        if let Ok(path) = std::env::var("CONTEXT_ENGINE_SNAPSHOT_FILE") {
            backends.push(BackendConfig::File {
                path: PathBuf::from(path),
            });
        }
        if let Ok(url) = std::env::var("CONTEXT_ENGINE_SNAPSHOT_URL") {
            backends.push(BackendConfig::Http {
                url,
                bearer_token: std::env::var("CONTEXT_ENGINE_SNAPSHOT_TOKEN").ok(),
                timeout_ms: default_http_timeout_ms(),
            });
        }

        Self {
            max_payload_bytes: env_parse("CONTEXT_ENGINE_MAX_PAYLOAD_BYTES")
                .unwrap_or(defaults.max_payload_bytes),
            promotion_min_degree: env_parse("CONTEXT_ENGINE_PROMOTION_MIN_DEGREE")
                .unwrap_or(defaults.promotion_min_degree),
            gc_interval_secs: env_parse("CONTEXT_ENGINE_GC_INTERVAL_SECS")
                .unwrap_or(defaults.gc_interval_secs),
            persist_interval_secs: env_parse("CONTEXT_ENGINE_PERSIST_INTERVAL_SECS")
                .unwrap_or(defaults.persist_interval_secs),
            backends,
            ..defaults
        }
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.max_payload_bytes == 0 {
            return Err(Error::Config("max_payload_bytes must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.co_mention_strength) {
            return Err(Error::Config(
                "co_mention_strength must be within [0, 1]".to_string(),
            ));
        }
        if self.ranking.decay_days <= 0.0 || self.ranking.degree_cap <= 0.0 {
            return Err(Error::Config(
                "ranking decay_days and degree_cap must be positive".to_string(),
            ));
        }
        if self.gc_interval_secs == 0 || self.persist_interval_secs == 0 {
            return Err(Error::Config("intervals must be positive".to_string()));
        }
        Ok(())
    }

    pub fn gc_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.gc_interval_secs)
    }

    pub fn persist_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.persist_interval_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
