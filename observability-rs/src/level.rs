//! # Log Levels
//!
//! Ordered severity scale for the logger and the rules for picking the
//! default level from the environment.

use std::fmt;
use std::str::FromStr;
use serde::{Serialize, Deserialize};
use config_rs::RuntimeEnv;

/// Ordered log level; an entry is emitted when `entry.level >= logger.level`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum LogLevel {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Inverse of `level as u8`; unknown values clamp to `Error`
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => LogLevel::Debug,
            1 => LogLevel::Info,
            2 => LogLevel::Warn,
            _ => LogLevel::Error,
        }
    }

    /// Level used when `LOG_LEVEL` is unset or invalid
    pub fn environment_default(env: &RuntimeEnv) -> Self {
        if env.is_development() {
            LogLevel::Debug
        } else {
            LogLevel::Info
        }
    }

    /// Resolve the active level from `LOG_LEVEL`, falling back to the
    /// environment default for missing or unrecognized values
    pub fn from_runtime_env(env: &RuntimeEnv) -> Self {
        env.log_level()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or_else(|| Self::environment_default(env))
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names no known level
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log level: {0}")]
pub struct ParseLevelError(pub String);

impl FromStr for LogLevel {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}
