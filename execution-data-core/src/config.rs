//! Runtime configuration for the execution-data services.

use crate::retry::RetryPolicy;
use anyhow::{bail, Context, Result};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

fn default_ttl_days() -> i64 {
    180
}

/// Upper bound for `ttl_days` (100 years).
pub const MAX_TTL_DAYS: i64 = 36_500;

fn default_max_connections() -> u32 {
    10
}

/// Configuration shared by the outcome and sweeping-output services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionDataConfig {
    /// Lifetime of a new instance before it becomes eligible for cleanup.
    #[serde(default = "default_ttl_days")]
    pub ttl_days: i64,
    /// Retry policy applied at the storage boundary.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Postgres connection string (only used with the `postgres` feature).
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for ExecutionDataConfig {
    fn default() -> Self {
        Self {
            ttl_days: default_ttl_days(),
            retry: RetryPolicy::default(),
            database_url: None,
            max_connections: default_max_connections(),
        }
    }
}

impl ExecutionDataConfig {
    /// Instance lifetime, or `None` when `ttl_days` is outside
    /// `1..=MAX_TTL_DAYS`.
    pub fn ttl(&self) -> Option<TimeDelta> {
        if !(1..=MAX_TTL_DAYS).contains(&self.ttl_days) {
            return None;
        }
        TimeDelta::try_days(self.ttl_days)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(yaml).context("Failed to parse execution data config")?;
        config.validated("ttl_days")
    }

    /// Defaults overridden by `EXECUTION_DATA_*` variables and `DATABASE_URL`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = lookup("EXECUTION_DATA_TTL_DAYS") {
            config.ttl_days = v
                .parse()
                .with_context(|| format!("EXECUTION_DATA_TTL_DAYS: invalid value '{v}'"))?;
        }
        if let Some(v) = lookup("EXECUTION_DATA_MAX_ATTEMPTS") {
            config.retry.max_attempts = v
                .parse()
                .with_context(|| format!("EXECUTION_DATA_MAX_ATTEMPTS: invalid value '{v}'"))?;
        }
        if let Some(v) = lookup("EXECUTION_DATA_INITIAL_BACKOFF_MS") {
            config.retry.initial_backoff_ms = v.parse().with_context(|| {
                format!("EXECUTION_DATA_INITIAL_BACKOFF_MS: invalid value '{v}'")
            })?;
        }
        if let Some(v) = lookup("EXECUTION_DATA_MAX_BACKOFF_MS") {
            config.retry.max_backoff_ms = v
                .parse()
                .with_context(|| format!("EXECUTION_DATA_MAX_BACKOFF_MS: invalid value '{v}'"))?;
        }
        if let Some(v) = lookup("EXECUTION_DATA_MAX_CONNECTIONS") {
            config.max_connections = v.parse().with_context(|| {
                format!("EXECUTION_DATA_MAX_CONNECTIONS: invalid value '{v}'")
            })?;
        }
        config.database_url = lookup("DATABASE_URL");
        config.validated("EXECUTION_DATA_TTL_DAYS")
    }

    fn validated(self, ttl_source: &str) -> Result<Self> {
        if self.ttl().is_none() {
            bail!(
                "{ttl_source}: ttl must be between 1 and {MAX_TTL_DAYS} days, got {}",
                self.ttl_days
            );
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let config = ExecutionDataConfig::default();
        assert_eq!(config.ttl_days, 180);
        assert_eq!(config.ttl(), Some(TimeDelta::days(180)));
        assert_eq!(config.retry, RetryPolicy::default());
        assert!(config.database_url.is_none());
    }

    #[test]
    fn yaml_partial_override() {
        let config = ExecutionDataConfig::from_yaml_str(
            "ttl_days: 7\nretry:\n  max_attempts: 1\n",
        )
        .unwrap();
        assert_eq!(config.ttl_days, 7);
        assert_eq!(config.retry.max_attempts, 1);
        assert_eq!(config.retry.initial_backoff_ms, 100);
        assert_eq!(config.max_connections, 10);
    }

    #[test]
    fn yaml_rejects_garbage() {
        assert!(ExecutionDataConfig::from_yaml_str("ttl_days: [").is_err());
    }

    #[test]
    fn env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("EXECUTION_DATA_TTL_DAYS", "30"),
            ("EXECUTION_DATA_MAX_ATTEMPTS", "5"),
            ("DATABASE_URL", "postgresql:///pipeline"),
        ]);
        let config =
            ExecutionDataConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.ttl_days, 30);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.database_url.as_deref(), Some("postgresql:///pipeline"));
    }

    #[test]
    fn env_invalid_number_names_the_variable() {
        let err = ExecutionDataConfig::from_lookup(|k| {
            (k == "EXECUTION_DATA_TTL_DAYS").then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("EXECUTION_DATA_TTL_DAYS"));
    }

    #[test]
    fn ttl_out_of_range_is_rejected() {
        for bad in ["0", "-5", "100000000"] {
            let err = ExecutionDataConfig::from_lookup(|k| {
                (k == "EXECUTION_DATA_TTL_DAYS").then(|| bad.to_string())
            })
            .unwrap_err();
            assert!(err.to_string().contains("EXECUTION_DATA_TTL_DAYS"), "{bad}: {err}");
        }

        let err = ExecutionDataConfig::from_yaml_str("ttl_days: 100000000\n").unwrap_err();
        assert!(err.to_string().contains("ttl_days"));
        assert!(ExecutionDataConfig::from_yaml_str("ttl_days: -5\n").is_err());
        assert!(ExecutionDataConfig::from_yaml_str("ttl_days: 36500\n").is_ok());
    }

    #[test]
    fn ttl_is_none_outside_range() {
        let mut config = ExecutionDataConfig::default();
        config.ttl_days = -1;
        assert!(config.ttl().is_none());
        config.ttl_days = i64::MAX;
        assert!(config.ttl().is_none());
    }
}
