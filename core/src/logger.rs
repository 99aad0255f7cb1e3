//! Leveled, scoped logger handed to every store component.
//!
//! The logger is a thin filter in front of `tracing`: it drops messages below its
//! configured [`LogLevel`] and tags the rest with a `scope` field, so one subscriber
//! can tell apart several stores (or the projector and orchestrator of one store).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Minimum severity a [`Logger`] lets through.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Everything, including per-dispatch traces.
    Debug,
    /// Lifecycle events.
    #[default]
    Info,
    /// Degradations and isolated failures.
    Warn,
    /// Failures that reach the caller.
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Unrecognised log level name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown log level {0:?} (expected debug, info, warn or error)")]
pub struct ParseLogLevelError(pub String);

impl FromStr for LogLevel {
    type Err = ParseLogLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(ParseLogLevelError(s.to_string())),
        }
    }
}

/// Scoped logger.
#[derive(Clone, Debug)]
pub struct Logger {
    level: LogLevel,
    scope: Arc<str>,
}

impl Logger {
    /// A logger for `scope` at `level`.
    pub fn new(scope: impl Into<Arc<str>>, level: LogLevel) -> Self {
        Self {
            level,
            scope: scope.into(),
        }
    }

    /// A child logger with `name` appended to the scope.
    #[must_use]
    pub fn scoped(&self, name: &str) -> Self {
        Self {
            level: self.level,
            scope: format!("{}.{name}", self.scope).into(),
        }
    }

    /// The configured minimum level.
    #[must_use]
    pub const fn level(&self) -> LogLevel {
        self.level
    }

    /// The scope tag.
    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Whether messages at `level` are emitted.
    #[must_use]
    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.level
    }

    /// Emit a message at `level`.
    pub fn log(&self, level: LogLevel, message: fmt::Arguments<'_>) {
        if !self.enabled(level) {
            return;
        }
        let scope = &*self.scope;
        match level {
            LogLevel::Debug => tracing::debug!(scope, "{message}"),
            LogLevel::Info => tracing::info!(scope, "{message}"),
            LogLevel::Warn => tracing::warn!(scope, "{message}"),
            LogLevel::Error => tracing::error!(scope, "{message}"),
        }
    }

    /// Emit at debug level.
    pub fn debug(&self, message: impl fmt::Display) {
        self.log(LogLevel::Debug, format_args!("{message}"));
    }

    /// Emit at info level.
    pub fn info(&self, message: impl fmt::Display) {
        self.log(LogLevel::Info, format_args!("{message}"));
    }

    /// Emit at warn level.
    pub fn warn(&self, message: impl fmt::Display) {
        self.log(LogLevel::Warn, format_args!("{message}"));
    }

    /// Emit at error level.
    pub fn error(&self, message: impl fmt::Display) {
        self.log(LogLevel::Error, format_args!("{message}"));
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new("storex", LogLevel::default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        let logger = Logger::new("test", LogLevel::Warn);
        assert!(!logger.enabled(LogLevel::Info));
        assert!(logger.enabled(LogLevel::Warn));
        assert!(logger.enabled(LogLevel::Error));
    }

    #[test]
    fn test_parse_levels() {
        assert_eq!("DEBUG".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("verbose".parse::<LogLevel>().is_err());
        assert_eq!(LogLevel::Error.to_string(), "error");
    }

    #[test]
    fn test_scoped_logger_appends_name() {
        let logger = Logger::new("store", LogLevel::Debug).scoped("effects");
        assert_eq!(logger.scope(), "store.effects");
        assert_eq!(logger.level(), LogLevel::Debug);
    }
}
