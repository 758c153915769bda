//! Ledger configuration loaded from the environment.
//!
//! | variable | default |
//! |----------|---------|
//! | `USE_PERSISTENT_STORES` | `false` |
//! | `DATABASE_URL` | none, required when persistent |
//! | `LEDGER_DEFAULT_MINIMUM_STOCK` | `10` |
//! | `LEDGER_HISTORY_LIMIT` | `500` |
//! | `LEDGER_LOCK_TIMEOUT_MS` | `5000` |
//!
//! Unparseable values fall back to their default with a warning.

use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use stockledger_core::LedgerError;

pub const DEFAULT_MINIMUM_STOCK: i64 = 10;
pub const DEFAULT_HISTORY_LIMIT: usize = 500;
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("DATABASE_URL must be set when USE_PERSISTENT_STORES=true")]
    MissingDatabaseUrl,

    #[error("{var} is out of range: {value}")]
    OutOfRange { var: &'static str, value: String },
}

impl From<ConfigError> for LedgerError {
    fn from(value: ConfigError) -> Self {
        LedgerError::invalid_argument(value.to_string())
    }
}

/// Knobs the engines read at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerSettings {
    /// Minimum stock for balances created by purchase receiving and direct transfers.
    pub default_minimum_stock: i64,
    pub history_limit: usize,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            default_minimum_stock: DEFAULT_MINIMUM_STOCK,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    pub settings: LedgerSettings,
    pub lock_timeout: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            use_persistent_stores: false,
            database_url: None,
            settings: LedgerSettings::default(),
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let use_persistent_stores = parse_or("USE_PERSISTENT_STORES", &lookup, false);
        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());
        if use_persistent_stores && database_url.is_none() {
            return Err(ConfigError::MissingDatabaseUrl);
        }

        let default_minimum_stock =
            parse_or("LEDGER_DEFAULT_MINIMUM_STOCK", &lookup, DEFAULT_MINIMUM_STOCK);
        if default_minimum_stock < 0 {
            return Err(ConfigError::OutOfRange {
                var: "LEDGER_DEFAULT_MINIMUM_STOCK",
                value: default_minimum_stock.to_string(),
            });
        }

        let history_limit = parse_or("LEDGER_HISTORY_LIMIT", &lookup, DEFAULT_HISTORY_LIMIT);
        if history_limit == 0 {
            return Err(ConfigError::OutOfRange {
                var: "LEDGER_HISTORY_LIMIT",
                value: "0".to_string(),
            });
        }

        let lock_timeout_ms = parse_or("LEDGER_LOCK_TIMEOUT_MS", &lookup, DEFAULT_LOCK_TIMEOUT_MS);

        Ok(Self {
            use_persistent_stores,
            database_url,
            settings: LedgerSettings {
                default_minimum_stock,
                history_limit,
            },
            lock_timeout: Duration::from_millis(lock_timeout_ms),
        })
    }
}

fn parse_or<T, F>(var: &'static str, lookup: &F, default: T) -> T
where
    T: core::str::FromStr + Copy + core::fmt::Debug,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(var, value = %raw, ?default, "invalid value, using default");
            default
        }),
    }
}
