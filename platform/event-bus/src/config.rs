use std::env;
use std::time::Duration;

use crate::dispatcher::{DEFAULT_HANDLER_TIMEOUT_MS, DEFAULT_PRIORITY};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be a valid {expected}, got '{value}'")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Dispatcher configuration parsed from environment variables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Per-handler budget used when a publish call does not override it
    pub handler_timeout: Duration,
    /// Priority given to subscriptions that do not specify one
    pub default_priority: i32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            handler_timeout: Duration::from_millis(DEFAULT_HANDLER_TIMEOUT_MS),
            default_priority: DEFAULT_PRIORITY,
        }
    }
}

impl DispatcherConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let timeout_ms: u64 = match env::var("EVENT_HANDLER_TIMEOUT_MS") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                name: "EVENT_HANDLER_TIMEOUT_MS",
                expected: "u64",
                value: raw,
            })?,
            Err(_) => DEFAULT_HANDLER_TIMEOUT_MS,
        };

        let default_priority: i32 = match env::var("EVENT_DEFAULT_PRIORITY") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                name: "EVENT_DEFAULT_PRIORITY",
                expected: "i32",
                value: raw,
            })?,
            Err(_) => DEFAULT_PRIORITY,
        };

        Ok(Self {
            handler_timeout: Duration::from_millis(timeout_ms),
            default_priority,
        })
    }
}
