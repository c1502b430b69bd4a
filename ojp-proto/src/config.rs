//! Typed configuration surface for every environment key named in §6.

use crate::error::OjpError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// `connection.pool.*` — caps for the ordinary pool (component G).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub maximum_pool_size: u32,
    pub minimum_idle: u32,
    pub idle_timeout_ms: u64,
    pub max_lifetime_ms: u64,
    pub connection_timeout_ms: u64,
    pub leak_detection_threshold_ms: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            maximum_pool_size: 10,
            minimum_idle: 2,
            idle_timeout_ms: 600_000,
            max_lifetime_ms: 1_800_000,
            connection_timeout_ms: 30_000,
            leak_detection_threshold_ms: None,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), OjpError> {
        if self.maximum_pool_size == 0 {
            return Err(OjpError::Configuration {
                details: "connection.pool.maximumPoolSize must be > 0".to_string(),
            });
        }
        if self.minimum_idle > self.maximum_pool_size {
            return Err(OjpError::Configuration {
                details: "connection.pool.minimumIdle must not exceed maximumPoolSize".to_string(),
            });
        }
        Ok(())
    }
}

/// `xa.connection.pool.*` — caps for the XA-capable pool (component H).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XaPoolConfig {
    pub max_total: u32,
    pub min_idle: u32,
    pub max_lifetime_ms: u64,
    pub idle_before_recycle_ms: u64,
    pub leak_detection_enabled: bool,
    pub leak_detection_threshold_ms: u64,
}

impl Default for XaPoolConfig {
    fn default() -> Self {
        Self {
            max_total: 10,
            min_idle: 2,
            max_lifetime_ms: 1_800_000,
            idle_before_recycle_ms: 600_000,
            leak_detection_enabled: false,
            leak_detection_threshold_ms: 60_000,
        }
    }
}

impl XaPoolConfig {
    pub fn validate(&self) -> Result<(), OjpError> {
        if self.max_total == 0 {
            return Err(OjpError::Configuration {
                details: "xa.connection.pool.maxTotal must be > 0".to_string(),
            });
        }
        if self.min_idle > self.max_total {
            return Err(OjpError::Configuration {
                details: "xa.connection.pool.minIdle must not exceed maxTotal".to_string(),
            });
        }
        Ok(())
    }
}

/// `multinode.retryAttempts` / `multinode.retryDelayMs`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// -1 means unbounded; the RPC deadline is then the only stop condition
    /// (§9, preserved Open Question).
    pub retry_attempts: i32,
    pub retry_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_delay_ms: 100,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryConfig {
    pub fn is_unbounded(&self) -> bool {
        self.retry_attempts < 0
    }

    pub fn validate(&self) -> Result<(), OjpError> {
        if self.retry_delay_ms == 0 {
            return Err(OjpError::Configuration {
                details: "multinode.retryDelayMs must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

/// `slowQuery.*` — slot partitioning (component K).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlowQueryConfig {
    pub enabled: bool,
    pub slot_percentage: f64,
    pub idle_timeout_ms: u64,
    pub slow_slot_timeout_ms: u64,
    pub fast_slot_timeout_ms: u64,
    pub update_global_avg_interval_ms: u64,
    pub slow_factor: f64,
    pub fallback_allowed: bool,
}

impl Default for SlowQueryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            slot_percentage: 0.2,
            idle_timeout_ms: 60_000,
            slow_slot_timeout_ms: 30_000,
            fast_slot_timeout_ms: 5_000,
            update_global_avg_interval_ms: 10_000,
            slow_factor: 2.0,
            fallback_allowed: true,
        }
    }
}

impl SlowQueryConfig {
    pub fn validate(&self) -> Result<(), OjpError> {
        if !(0.0..1.0).contains(&self.slot_percentage) {
            return Err(OjpError::Configuration {
                details: "slowQuery.slotPercentage must be in [0, 1)".to_string(),
            });
        }
        Ok(())
    }
}

/// `session.{timeoutMinutes, cleanupIntervalMinutes}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub timeout_minutes: u64,
    pub cleanup_interval_minutes: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: 30,
            cleanup_interval_minutes: 5,
        }
    }
}

/// `circuitBreaker.{timeout, threshold}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub threshold: u32,
    pub timeout_ms: u64,
    pub window_size: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            timeout_ms: 30_000,
            window_size: 20,
        }
    }
}

/// Structured-logging output format, named the way the donor crate's
/// `tracing-subscriber` dependency supports (json/env-filter features).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Json,
        }
    }
}

/// `maxXaTransactions`, `xaStartTimeoutMillis`, and the top-level grouping
/// of every config surface named in §6, plus `${name}` placeholder
/// resolution against the process environment at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OjpConfig {
    pub pool: PoolConfig,
    pub xa_pool: XaPoolConfig,
    pub retry: RetryConfig,
    pub load_aware_selection_enabled: bool,
    pub slow_query: SlowQueryConfig,
    pub max_xa_transactions: u32,
    pub xa_start_timeout_ms: u64,
    pub session: SessionConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub log: LogConfig,
}

impl Default for OjpConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            xa_pool: XaPoolConfig::default(),
            retry: RetryConfig::default(),
            load_aware_selection_enabled: true,
            slow_query: SlowQueryConfig::default(),
            max_xa_transactions: 1000,
            xa_start_timeout_ms: 60_000,
            session: SessionConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl OjpConfig {
    /// Fatal at startup on failure, per §6's exit-code policy: a
    /// configuration validation failure is a non-zero exit.
    pub fn validate(&self) -> Result<(), OjpError> {
        self.pool.validate()?;
        self.xa_pool.validate()?;
        self.retry.validate()?;
        self.slow_query.validate()?;
        if self.max_xa_transactions == 0 {
            return Err(OjpError::Configuration {
                details: "maxXaTransactions must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Resolves `${name}` placeholders in a raw upstream URL against the
/// process environment. Fails fast if any placeholder is unresolved,
/// per §9's design note.
pub fn resolve_placeholders(raw: &str, env: &HashMap<String, String>) -> Result<String, OjpError> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| OjpError::Configuration {
            details: format!("unterminated placeholder in '{raw}'"),
        })?;
        let name = &after[..end];
        let value = env.get(name).cloned().or_else(|| std::env::var(name).ok());
        match value {
            Some(v) => out.push_str(&v),
            None => {
                return Err(OjpError::Configuration {
                    details: format!("unresolved placeholder '${{{name}}}' in '{raw}'"),
                })
            }
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(OjpConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_max_pool_size_is_rejected() {
        let mut cfg = PoolConfig::default();
        cfg.maximum_pool_size = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn resolves_placeholder_from_supplied_map() {
        let mut env = HashMap::new();
        env.insert("DB_HOST".to_string(), "db1".to_string());
        let resolved = resolve_placeholders("jdbc:pg://${DB_HOST}:5432/app", &env).unwrap();
        assert_eq!(resolved, "jdbc:pg://db1:5432/app");
    }

    #[test]
    fn unresolved_placeholder_is_fatal() {
        let env = HashMap::new();
        assert!(resolve_placeholders("jdbc:pg://${MISSING}/app", &env).is_err());
    }
}
