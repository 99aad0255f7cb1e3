//! Store configuration.
//!
//! [`StoreConfig`] can be built in code with the `with_*` setters, deserialized from
//! JSON, or read from `STOREX_*` environment variables. Every field has a default, so
//! partial sources are fine.
//!
//! # Example
//!
//! ```
//! use storex_core::logger::LogLevel;
//! use storex_runtime::config::StoreConfig;
//!
//! let config = StoreConfig::default()
//!     .with_name("checkout")
//!     .with_log_level(LogLevel::Debug)
//!     .with_signals(false);
//!
//! assert!(config.validate().is_ok());
//! ```

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use storex_core::logger::LogLevel;

/// Default capacity of the action and state broadcast channels.
pub const DEFAULT_BUFFER: usize = 256;

/// Configuration for Store instances
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Name used as the logger scope
    pub name: String,
    /// Minimum level for store diagnostics
    pub log_level: LogLevel,
    /// Whether `select` may create pull cells at all
    pub enable_signals: bool,
    /// Capacity of the action broadcast channel
    pub action_buffer: usize,
    /// Capacity of the state broadcast channel
    pub state_buffer: usize,
}

impl StoreConfig {
    /// Set the store name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the log level
    #[must_use]
    pub const fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    /// Enable or disable pull-cell projections
    #[must_use]
    pub const fn with_signals(mut self, enabled: bool) -> Self {
        self.enable_signals = enabled;
        self
    }

    /// Set the action broadcast capacity
    #[must_use]
    pub const fn with_action_buffer(mut self, capacity: usize) -> Self {
        self.action_buffer = capacity;
        self
    }

    /// Set the state broadcast capacity
    #[must_use]
    pub const fn with_state_buffer(mut self, capacity: usize) -> Self {
        self.state_buffer = capacity;
        self
    }

    /// Check the configuration for values the store cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] for an empty name or a zero buffer.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.name.trim().is_empty() {
            return Err(StoreError::Config("name must not be empty".to_string()));
        }
        if self.action_buffer == 0 {
            return Err(StoreError::Config("action_buffer must be greater than zero".to_string()));
        }
        if self.state_buffer == 0 {
            return Err(StoreError::Config("state_buffer must be greater than zero".to_string()));
        }
        Ok(())
    }

    /// Parse a JSON document; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if the document is malformed or invalid.
    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| StoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read `STOREX_NAME`, `STOREX_LOG_LEVEL`, `STOREX_ENABLE_SIGNALS`,
    /// `STOREX_ACTION_BUFFER` and `STOREX_STATE_BUFFER`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if a variable cannot be parsed.
    pub fn from_env() -> Result<Self, StoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with an injected variable source.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if a variable cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, StoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(name) = lookup("STOREX_NAME") {
            config.name = name;
        }
        if let Some(level) = lookup("STOREX_LOG_LEVEL") {
            config.log_level = level
                .parse()
                .map_err(|e: storex_core::logger::ParseLogLevelError| StoreError::Config(e.to_string()))?;
        }
        if let Some(flag) = lookup("STOREX_ENABLE_SIGNALS") {
            config.enable_signals = parse_flag(&flag)?;
        }
        if let Some(capacity) = lookup("STOREX_ACTION_BUFFER") {
            config.action_buffer = parse_capacity("STOREX_ACTION_BUFFER", &capacity)?;
        }
        if let Some(capacity) = lookup("STOREX_STATE_BUFFER") {
            config.state_buffer = parse_capacity("STOREX_STATE_BUFFER", &capacity)?;
        }
        config.validate()?;
        Ok(config)
    }
}

fn parse_flag(value: &str) -> Result<bool, StoreError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(StoreError::Config(format!(
            "STOREX_ENABLE_SIGNALS: expected a boolean, got {other:?}"
        ))),
    }
}

fn parse_capacity(key: &str, value: &str) -> Result<usize, StoreError> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|e| StoreError::Config(format!("{key}: {e}")))
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: "storex".to_string(),
            log_level: LogLevel::Info,
            enable_signals: true,
            action_buffer: DEFAULT_BUFFER,
            state_buffer: DEFAULT_BUFFER,
        }
    }
}
