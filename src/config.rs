//! Configuration module
//!
//! `Config` is loaded from environment variables by the binaries only.
//! Library code receives an explicit `LedgerConfig` at construction.

use std::env;
use std::time::Duration;

/// Default treasury subtype for fee legs
pub const DEFAULT_FEES_SUBTYPE: &str = "FEES";

/// Default treasury subtype for tax legs
pub const DEFAULT_TAX_SUBTYPE: &str = "TAX";

/// Settings the settlement engine is constructed with
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Expiry of every balance/order lock
    pub lock_ttl: Duration,

    /// Namespace prepended to every lock key
    pub lock_prefix: String,

    /// SYSTEM account subtype receiving fee legs
    pub fees_subtype: String,

    /// SYSTEM account subtype receiving tax legs
    pub tax_subtype: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(10),
            lock_prefix: "ledger".to_string(),
            fees_subtype: DEFAULT_FEES_SUBTYPE.to_string(),
            tax_subtype: DEFAULT_TAX_SUBTYPE.to_string(),
        }
    }
}

/// Process configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Redis URL for distributed locks; in-process locks when absent
    pub redis_url: Option<String>,

    /// Environment (development, production)
    pub environment: String,

    /// Interval of the reconciliation job
    pub reconcile_interval: Duration,

    /// `json` or `text`
    pub log_format: String,

    pub ledger: LedgerConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))?;

        let database_max_connections = parse_or("DATABASE_MAX_CONNECTIONS", 10u32)?;

        let redis_url = env::var("REDIS_URL").ok().filter(|s| !s.is_empty());

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let reconcile_interval = Duration::from_secs(parse_or("RECONCILE_INTERVAL_SECS", 60u64)?);

        let log_format = env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

        let lock_ttl_ms = parse_or("LOCK_TTL_MS", 10_000u64)?;
        if lock_ttl_ms == 0 {
            return Err(ConfigError::InvalidValue("LOCK_TTL_MS"));
        }

        let ledger = LedgerConfig {
            lock_ttl: Duration::from_millis(lock_ttl_ms),
            lock_prefix: env::var("LOCK_PREFIX").unwrap_or_else(|_| "ledger".to_string()),
            fees_subtype: env::var("FEES_ACCOUNT_SUBTYPE")
                .unwrap_or_else(|_| DEFAULT_FEES_SUBTYPE.to_string()),
            tax_subtype: env::var("TAX_ACCOUNT_SUBTYPE")
                .unwrap_or_else(|_| DEFAULT_TAX_SUBTYPE.to_string()),
        };

        Ok(Self {
            database_url,
            database_max_connections,
            redis_url,
            environment,
            reconcile_interval,
            log_format,
            ledger,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ledger_config() {
        let config = LedgerConfig::default();
        assert_eq!(config.fees_subtype, "FEES");
        assert_eq!(config.tax_subtype, "TAX");
        assert_eq!(config.lock_ttl, Duration::from_secs(10));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::MissingEnv("DATABASE_URL");
        assert!(err.to_string().contains("DATABASE_URL"));
    }
}
