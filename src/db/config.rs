use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::config::{env_bool, env_non_empty};

/// Pool and health-check settings for the PostgreSQL proxy.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub primary_url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub run_migrations: bool,
    pub health_check: HealthCheckConfig,
}

impl DbConfig {
    pub fn from_env() -> Result<Self, DbConfigError> {
        let primary_url = env_non_empty("DATABASE_URL").ok_or(DbConfigError::Missing {
            key: "DATABASE_URL",
        })?;

        Ok(Self {
            primary_url,
            max_connections: parsed_or("DB_MAX_CONNECTIONS", 10u32).max(1),
            acquire_timeout: Duration::from_millis(parsed_or("DB_ACQUIRE_TIMEOUT_MS", 5000)),
            run_migrations: env_bool("DB_RUN_MIGRATIONS").unwrap_or(true),
            health_check: HealthCheckConfig::from_env(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    pub interval: Duration,
    pub timeout: Duration,
    pub failure_threshold: u32,
}

impl HealthCheckConfig {
    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            interval: millis_or("DB_HEALTH_CHECK_INTERVAL_MS", defaults.interval),
            timeout: millis_or("DB_HEALTH_CHECK_TIMEOUT_MS", defaults.timeout),
            failure_threshold: parsed_or("DB_FAILURE_THRESHOLD", defaults.failure_threshold).max(1),
        }
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(3),
            failure_threshold: 3,
        }
    }
}

#[derive(Debug, Error)]
pub enum DbConfigError {
    #[error("Missing required env var: {key}")]
    Missing { key: &'static str },
}

fn parsed_or<T: FromStr>(key: &str, default: T) -> T {
    env_non_empty(key)
        .and_then(|value| value.parse::<T>().ok())
        .unwrap_or(default)
}

fn millis_or(key: &str, default: Duration) -> Duration {
    env_non_empty(key)
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}
