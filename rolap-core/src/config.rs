//! Configuration types

use crate::{ConfigError, RolapError, RolapResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Segment cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Total database connections available to segment loads.
    pub pool_capacity: usize,
    /// Connections held back for queries issued on behalf of an in-flight
    /// load (cardinality checks). Clamped to `pool_capacity - 1`.
    pub reserved_nested_connections: usize,
    /// How long a load may wait for a connection before failing.
    pub acquire_timeout: Duration,
    /// How long a query may wait for its segments before giving up its wait.
    pub query_timeout: Duration,
    /// How many times a resolution is retried after its loads were flushed.
    pub max_stale_retries: u32,
    /// Whether loads check column cardinality before querying.
    pub check_cardinality: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            pool_capacity: 20,
            reserved_nested_connections: 2,
            acquire_timeout: Duration::from_secs(30),
            query_timeout: Duration::from_secs(120),
            max_stale_retries: 3,
            check_cardinality: true,
        }
    }
}

impl CacheConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection pool capacity.
    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    /// Set the number of connections reserved for nested queries.
    pub fn with_reserved_nested(mut self, reserved: usize) -> Self {
        self.reserved_nested_connections = reserved;
        self
    }

    /// Set the connection acquisition timeout.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the query wait timeout.
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Set the stale retry budget.
    pub fn with_max_stale_retries(mut self, retries: u32) -> Self {
        self.max_stale_retries = retries;
        self
    }

    /// Enable or disable cardinality checks.
    pub fn with_cardinality_check(mut self, enabled: bool) -> Self {
        self.check_cardinality = enabled;
        self
    }

    /// Reserved connections actually applied: at least one connection always
    /// remains for primary loads.
    pub fn effective_reserved(&self) -> usize {
        self.reserved_nested_connections
            .min(self.pool_capacity.saturating_sub(1))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> RolapResult<()> {
        if self.pool_capacity == 0 {
            return Err(RolapError::Config(ConfigError::InvalidValue {
                field: "pool_capacity".to_string(),
                value: self.pool_capacity.to_string(),
                reason: "pool_capacity must be greater than 0".to_string(),
            }));
        }

        if self.acquire_timeout.is_zero() {
            return Err(RolapError::Config(ConfigError::InvalidValue {
                field: "acquire_timeout".to_string(),
                value: format!("{:?}", self.acquire_timeout),
                reason: "acquire_timeout must be positive".to_string(),
            }));
        }

        if self.query_timeout.is_zero() {
            return Err(RolapError::Config(ConfigError::InvalidValue {
                field: "query_timeout".to_string(),
                value: format!("{:?}", self.query_timeout),
                reason: "query_timeout must be positive".to_string(),
            }));
        }

        Ok(())
    }

    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `ROLAP_POOL_CAPACITY` (default: 20)
    /// - `ROLAP_RESERVED_NESTED_CONNECTIONS` (default: 2)
    /// - `ROLAP_ACQUIRE_TIMEOUT_MS` (default: 30000)
    /// - `ROLAP_QUERY_TIMEOUT_MS` (default: 120000)
    /// - `ROLAP_MAX_STALE_RETRIES` (default: 3)
    /// - `ROLAP_CHECK_CARDINALITY` (default: true)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            pool_capacity: env_parse("ROLAP_POOL_CAPACITY").unwrap_or(defaults.pool_capacity),
            reserved_nested_connections: env_parse("ROLAP_RESERVED_NESTED_CONNECTIONS")
                .unwrap_or(defaults.reserved_nested_connections),
            acquire_timeout: env_parse("ROLAP_ACQUIRE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.acquire_timeout),
            query_timeout: env_parse("ROLAP_QUERY_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.query_timeout),
            max_stale_retries: env_parse("ROLAP_MAX_STALE_RETRIES")
                .unwrap_or(defaults.max_stale_retries),
            check_cardinality: env_parse("ROLAP_CHECK_CARDINALITY")
                .unwrap_or(defaults.check_cardinality),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(CacheConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = CacheConfig::new().with_pool_capacity(0);
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            RolapError::Config(ConfigError::InvalidValue { ref field, .. })
                if field == "pool_capacity"
        ));
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        assert!(CacheConfig::new()
            .with_acquire_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(CacheConfig::new()
            .with_query_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_effective_reserved_leaves_one_primary() {
        assert_eq!(CacheConfig::new().with_pool_capacity(1).effective_reserved(), 0);
        assert_eq!(
            CacheConfig::new()
                .with_pool_capacity(3)
                .with_reserved_nested(5)
                .effective_reserved(),
            2
        );
        assert_eq!(CacheConfig::default().effective_reserved(), 2);
    }

    #[test]
    fn test_builder() {
        let config = CacheConfig::new()
            .with_pool_capacity(4)
            .with_reserved_nested(1)
            .with_acquire_timeout(Duration::from_millis(250))
            .with_query_timeout(Duration::from_secs(5))
            .with_max_stale_retries(7)
            .with_cardinality_check(false);
        assert_eq!(config.pool_capacity, 4);
        assert_eq!(config.reserved_nested_connections, 1);
        assert_eq!(config.acquire_timeout, Duration::from_millis(250));
        assert_eq!(config.query_timeout, Duration::from_secs(5));
        assert_eq!(config.max_stale_retries, 7);
        assert!(!config.check_cardinality);
    }

    #[test]
    fn test_serde_shape() {
        let json = serde_json::to_value(CacheConfig::default()).unwrap();
        assert_eq!(json["pool_capacity"], 20);
        assert_eq!(json["check_cardinality"], true);
    }
}
