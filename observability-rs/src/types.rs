//! # Shared Types
//!
//! Crate error type and the severity scale handed to error trackers.

use std::fmt;
use serde::{Serialize, Deserialize};

/// A type alias for Result with the error type defaulting to our Error
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by setup helpers.
///
/// Logging and error-handling calls never return these; they recover locally.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An external collaborator (session store, header source) failed
    #[error("Collaborator failure: {0}")]
    Collaborator(String),

    /// A value could not be converted to or from JSON
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Global subscriber or handler setup failed
    #[error("Initialization error: {0}")]
    Initialization(String),
}

/// The severity level reported alongside a tracked error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Debug => write!(f, "debug"),
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
            Severity::Fatal => write!(f, "fatal"),
        }
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Error
    }
}
