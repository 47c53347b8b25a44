//! Cache configuration
//!
//! Loaded from environment variables, falling back to defaults for anything
//! missing or unparsable.

use std::time::Duration;

use crate::ttl;
use crate::{CacheError, CacheResult};

/// TTL tiers for cached reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlTier {
    /// Volatile lists (pipeline boards, dashboards)
    Short,
    /// Entity reads and filtered lists
    Standard,
    /// Reference data (pipeline stages, lookups)
    Long,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl_short: Duration,
    pub ttl_standard: Duration,
    pub ttl_long: Duration,
    /// Collapse concurrent misses on the same key into one fetch
    pub single_flight: bool,
    /// Optional schema version prepended to keys built through [`CacheConfig::key`]
    pub key_version: Option<u32>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_short: ttl::SHORT,
            ttl_standard: ttl::STANDARD,
            ttl_long: ttl::LONG,
            single_flight: true,
            key_version: None,
        }
    }
}

impl CacheConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `QUERY_CACHE_TTL_SHORT_MS`
    /// - `QUERY_CACHE_TTL_STANDARD_MS`
    /// - `QUERY_CACHE_TTL_LONG_MS`
    /// - `QUERY_CACHE_SINGLE_FLIGHT`: true/false
    /// - `QUERY_CACHE_KEY_VERSION`: schema version for keys
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            ttl_short: env_millis("QUERY_CACHE_TTL_SHORT_MS").unwrap_or(defaults.ttl_short),
            ttl_standard: env_millis("QUERY_CACHE_TTL_STANDARD_MS")
                .unwrap_or(defaults.ttl_standard),
            ttl_long: env_millis("QUERY_CACHE_TTL_LONG_MS").unwrap_or(defaults.ttl_long),
            single_flight: std::env::var("QUERY_CACHE_SINGLE_FLIGHT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.single_flight),
            key_version: std::env::var("QUERY_CACHE_KEY_VERSION")
                .ok()
                .and_then(|v| v.parse().ok()),
        }
    }

    /// Reject configurations where a zero TTL would disable caching silently
    pub fn validate(&self) -> CacheResult<()> {
        for (name, value) in [
            ("ttl_short", self.ttl_short),
            ("ttl_standard", self.ttl_standard),
            ("ttl_long", self.ttl_long),
        ] {
            if value.is_zero() {
                return Err(CacheError::Configuration(format!("{} must be non-zero", name)));
            }
        }
        Ok(())
    }

    pub fn ttl(&self, tier: TtlTier) -> Duration {
        match tier {
            TtlTier::Short => self.ttl_short,
            TtlTier::Standard => self.ttl_standard,
            TtlTier::Long => self.ttl_long,
        }
    }

    /// Start a key in `resource`, versioned when the config says so
    pub fn key(&self, resource: &str) -> crate::QueryKey {
        let key = crate::QueryKey::new(resource);
        match self.key_version {
            Some(version) => key.versioned(version),
            None => key,
        }
    }

    /// Empty mutation record whose prefixes match keys built by [`CacheConfig::key`]
    pub fn mutation_record(&self) -> crate::MutationRecord {
        let record = crate::MutationRecord::new();
        match self.key_version {
            Some(version) => record.versioned(version),
            None => record,
        }
    }
}

fn env_millis(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
}
