//! config-rs/lib.rs
//! Shared environment configuration for the logging and error handling core.
//! Reads the process environment once into an immutable snapshot so that
//! loggers and handlers can be built against injected values in tests.

use std::env;
use std::fmt;

/// Deployment environment variable
pub const NODE_ENV: &str = "NODE_ENV";
/// Minimum log level override
pub const LOG_LEVEL: &str = "LOG_LEVEL";
/// Explicit PII redaction override
pub const LOG_SANITIZE_PII: &str = "LOG_SANITIZE_PII";
/// Whether health reports include process memory figures
pub const HEALTH_INCLUDE_MEMORY: &str = "HEALTH_INCLUDE_MEMORY";

/// Deployment environment the process runs in
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Environment {
    Development,
    Production,
    Test,
    /// Variable unset or empty
    #[default]
    Unspecified,
    /// Any other value, kept lowercased
    Custom(String),
}

impl Environment {
    /// Parse an environment name, case-insensitively
    pub fn parse(value: Option<&str>) -> Self {
        let value = match value.map(str::trim) {
            Some(v) if !v.is_empty() => v.to_lowercase(),
            _ => return Environment::Unspecified,
        };

        match value.as_str() {
            "development" => Environment::Development,
            "production" => Environment::Production,
            "test" => Environment::Test,
            _ => Environment::Custom(value),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
            Environment::Test => write!(f, "test"),
            Environment::Unspecified => write!(f, "unspecified"),
            Environment::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// Immutable snapshot of the environment variables the core reads
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeEnv {
    environment: Environment,
    log_level: Option<String>,
    sanitize_pii: Option<String>,
    health_include_memory: Option<String>,
}

impl RuntimeEnv {
    /// Load `.env` (if present) and read the process environment
    pub fn from_env() -> Self {
        // A missing .env file is the normal case outside local development
        dotenv::dotenv().ok();

        Self {
            environment: Environment::parse(env::var(NODE_ENV).ok().as_deref()),
            log_level: env::var(LOG_LEVEL).ok(),
            sanitize_pii: env::var(LOG_SANITIZE_PII).ok(),
            health_include_memory: env::var(HEALTH_INCLUDE_MEMORY).ok(),
        }
    }

    /// Snapshot for a given environment with every override unset
    pub fn for_environment(environment: Environment) -> Self {
        Self {
            environment,
            ..Self::default()
        }
    }

    pub fn development() -> Self {
        Self::for_environment(Environment::Development)
    }

    pub fn production() -> Self {
        Self::for_environment(Environment::Production)
    }

    /// Set the raw `LOG_LEVEL` value
    pub fn with_log_level<S: Into<String>>(mut self, level: S) -> Self {
        self.log_level = Some(level.into());
        self
    }

    /// Set the raw `LOG_SANITIZE_PII` value
    pub fn with_sanitize_pii<S: Into<String>>(mut self, value: S) -> Self {
        self.sanitize_pii = Some(value.into());
        self
    }

    /// Set the raw `HEALTH_INCLUDE_MEMORY` value
    pub fn with_health_include_memory<S: Into<String>>(mut self, value: S) -> Self {
        self.health_include_memory = Some(value.into());
        self
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }

    /// Raw `LOG_LEVEL` value; validation belongs to the logger
    pub fn log_level(&self) -> Option<&str> {
        self.log_level.as_deref()
    }

    /// Explicit PII redaction override.
    ///
    /// Only case-insensitive `"true"` or `"false"` count as set; anything
    /// else is ignored so the environment default applies.
    pub fn sanitize_pii_override(&self) -> Option<bool> {
        parse_flag(LOG_SANITIZE_PII, self.sanitize_pii.as_deref())
    }

    /// Whether health reports should include memory usage
    pub fn health_include_memory(&self) -> bool {
        parse_flag(HEALTH_INCLUDE_MEMORY, self.health_include_memory.as_deref()).unwrap_or(false)
    }
}

/// Parse a boolean environment flag
///
/// # Arguments
/// * `name` - The variable name, used for the warning on unrecognized values
/// * `value` - The raw value, if the variable is set
///
/// # Returns
/// `Some(bool)` for `true`/`false` in any case, `None` otherwise
pub fn parse_flag(name: &str, value: Option<&str>) -> Option<bool> {
    let value = value?.trim();
    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        if !value.is_empty() {
            log::warn!("Ignoring unrecognized value for {}: expected true or false", name);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parse() {
        assert_eq!(Environment::parse(Some("production")), Environment::Production);
        assert_eq!(Environment::parse(Some(" Development ")), Environment::Development);
        assert_eq!(Environment::parse(Some("TEST")), Environment::Test);
        assert_eq!(Environment::parse(Some("")), Environment::Unspecified);
        assert_eq!(Environment::parse(None), Environment::Unspecified);
        assert_eq!(
            Environment::parse(Some("Staging")),
            Environment::Custom("staging".to_string())
        );
    }

    #[test]
    fn test_sanitize_pii_override() {
        let env = RuntimeEnv::development();
        assert_eq!(env.sanitize_pii_override(), None);

        assert_eq!(env.clone().with_sanitize_pii("TRUE").sanitize_pii_override(), Some(true));
        assert_eq!(env.clone().with_sanitize_pii("false").sanitize_pii_override(), Some(false));
        assert_eq!(env.clone().with_sanitize_pii("yes").sanitize_pii_override(), None);
        assert_eq!(env.with_sanitize_pii("").sanitize_pii_override(), None);
    }

    #[test]
    fn test_health_include_memory() {
        assert!(!RuntimeEnv::production().health_include_memory());
        assert!(RuntimeEnv::production()
            .with_health_include_memory("True")
            .health_include_memory());
        assert!(!RuntimeEnv::production()
            .with_health_include_memory("1")
            .health_include_memory());
    }

    #[test]
    fn test_environment_predicates() {
        assert!(RuntimeEnv::production().is_production());
        assert!(!RuntimeEnv::production().is_development());
        assert!(RuntimeEnv::development().is_development());
        assert!(!RuntimeEnv::default().is_production());
        assert_eq!(RuntimeEnv::default().log_level(), None);
        assert_eq!(
            RuntimeEnv::production().with_log_level("warn").log_level(),
            Some("warn")
        );
    }
}
