use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::query::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::stats::DEFAULT_STATS_WINDOW_DAYS;

/// Largest batch accepted by `store_batch`
pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{name} must be a valid {expected}, got '{value}'")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("AUDIT_DEFAULT_PAGE_SIZE ({default}) exceeds AUDIT_MAX_PAGE_SIZE ({max})")]
    PageSizeBounds { default: u32, max: u32 },
}

fn parse_or<T: FromStr>(name: &'static str, expected: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            name,
            expected,
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}

/// Ledger limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub max_batch_size: usize,
    pub default_page_size: u32,
    pub max_page_size: u32,
    /// Window used by `get_statistics` when no range is given
    pub stats_window_days: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
            stats_window_days: DEFAULT_STATS_WINDOW_DAYS,
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = Self {
            max_batch_size: parse_or("AUDIT_MAX_BATCH_SIZE", "usize", DEFAULT_MAX_BATCH_SIZE)?,
            default_page_size: parse_or("AUDIT_DEFAULT_PAGE_SIZE", "u32", DEFAULT_PAGE_SIZE)?,
            max_page_size: parse_or("AUDIT_MAX_PAGE_SIZE", "u32", MAX_PAGE_SIZE)?,
            stats_window_days: parse_or("AUDIT_STATS_WINDOW_DAYS", "u32", DEFAULT_STATS_WINDOW_DAYS)?,
        };

        if config.default_page_size > config.max_page_size {
            return Err(ConfigError::PageSizeBounds {
                default: config.default_page_size,
                max: config.max_page_size,
            });
        }
        Ok(config)
    }
}

/// Connection settings for [`crate::db::init_pool`]
///
/// # Connection Limits
/// - Production default: 10 connections
/// - Test runs should cap `DB_MAX_CONNECTIONS` at 1-2
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
}

impl DbConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: 10,
            min_connections: 0,
            acquire_timeout: Duration::from_secs(3),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;
        let defaults = Self::new(database_url);

        Ok(Self {
            max_connections: parse_or("DB_MAX_CONNECTIONS", "u32", defaults.max_connections)?,
            min_connections: parse_or("DB_MIN_CONNECTIONS", "u32", defaults.min_connections)?,
            acquire_timeout: Duration::from_secs(parse_or(
                "DB_ACQUIRE_TIMEOUT_SECS",
                "u64",
                defaults.acquire_timeout.as_secs(),
            )?),
            ..defaults
        })
    }
}
