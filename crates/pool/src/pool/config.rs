//! Pool configuration types

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Order in which idle resources are handed out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Strategy {
    /// Oldest returned resource first; spreads use evenly.
    Fifo,
    /// Most recently returned resource first; lets cold ones age out.
    #[default]
    Lifo,
}

/// Configuration for a resource pool. Immutable once the pool is built.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfig {
    /// Resources created eagerly and kept warm by the reaper
    pub min_size: usize,
    /// Hard ceiling on idle + in-use + in-creation resources
    pub max_size: usize,
    /// Idle time after which a resource is eligible for eviction
    pub max_idle_time: Duration,
    /// Maximum time a caller waits when the pool is exhausted
    pub acquire_timeout: Duration,
    /// Health-check idle resources before handing them out
    pub validate_on_acquire: bool,
    /// Health-check resources when they are released
    pub validate_on_release: bool,
    /// Run release validation on a background task instead of inline
    pub validate_in_background: bool,
    /// Create/validate attempts per acquire before giving up
    pub max_acquire_attempts: u32,
    /// Period of the background reaper; `None` disables it
    pub reap_interval: Option<Duration>,
    /// Order in which idle resources are handed out
    pub strategy: Strategy,
    /// Upper bound on how long shutdown waits for in-use resources
    pub drain_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 0,
            max_size: 10,
            max_idle_time: Duration::from_secs(600),
            acquire_timeout: Duration::from_secs(30),
            validate_on_acquire: true,
            validate_on_release: false,
            validate_in_background: false,
            max_acquire_attempts: 3,
            reap_interval: Some(Duration::from_secs(30)),
            strategy: Strategy::Lifo,
            drain_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl PoolConfig {
    /// Validate pool configuration, returning an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(Error::configuration("max_size must be greater than 0"));
        }
        if self.min_size > self.max_size {
            return Err(Error::configuration(format!(
                "min_size ({}) must not exceed max_size ({})",
                self.min_size, self.max_size
            )));
        }
        if self.acquire_timeout.is_zero() {
            return Err(Error::configuration(
                "acquire_timeout must be greater than zero",
            ));
        }
        if self.max_acquire_attempts == 0 {
            return Err(Error::configuration(
                "max_acquire_attempts must be at least 1",
            ));
        }
        if self.reap_interval.is_some_and(|interval| interval.is_zero()) {
            return Err(Error::configuration("reap_interval must be greater than zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_pool_config_default() {
        let config = PoolConfig::default();
        assert_eq!(config.min_size, 0);
        assert_eq!(config.max_size, 10);
        assert_eq!(config.acquire_timeout, Duration::from_secs(30));
        assert_eq!(config.strategy, Strategy::Lifo);
        assert!(config.validate().is_ok());
    }

    #[rstest]
    #[case::zero_max(PoolConfig { max_size: 0, ..Default::default() })]
    #[case::min_above_max(PoolConfig { min_size: 11, max_size: 10, ..Default::default() })]
    #[case::zero_timeout(PoolConfig { acquire_timeout: Duration::ZERO, ..Default::default() })]
    #[case::zero_attempts(PoolConfig { max_acquire_attempts: 0, ..Default::default() })]
    #[case::zero_reap(PoolConfig { reap_interval: Some(Duration::ZERO), ..Default::default() })]
    fn invalid_configs_are_rejected(#[case] config: PoolConfig) {
        assert!(matches!(config.validate(), Err(Error::Configuration { .. })));
    }

    #[test]
    fn min_equal_to_max_is_valid() {
        let config = PoolConfig {
            min_size: 4,
            max_size: 4,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn partial_config_deserializes_with_defaults() {
        let config: PoolConfig =
            serde_json::from_str(r#"{ "max_size": 3, "strategy": "fifo" }"#).unwrap();
        assert_eq!(config.max_size, 3);
        assert_eq!(config.strategy, Strategy::Fifo);
        assert_eq!(config.max_acquire_attempts, 3);
    }
}
