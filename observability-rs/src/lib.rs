//! # Observability Core
//!
//! Structured logging and client-side error handling shared by the web
//! front end and its server runtime.
//!
//! ## Features
//!
//! - Leveled JSON/pretty logging with bound context and child loggers
//! - Secret and PII redaction of log payloads
//! - Normalization of arbitrary thrown values into error objects
//! - Request and user context derived from headers and sessions
//! - Deduplicated reporting of uncaught client errors to a tracker
//! - Installable global handlers for uncaught errors and rejections
//!

pub mod types;
pub mod level;
pub mod sanitization;
pub mod normalize;
pub mod sink;
pub mod format;
pub mod logger;
pub mod context;
pub mod reporting;
pub mod lifecycle;
pub mod runtime;
pub mod logging;

// Re-export commonly used types
pub use types::{Error, Result, Severity};
pub use level::LogLevel;
pub use logger::{Logger, LoggerBuilder, LoggerContext, LogEntry};
pub use normalize::{normalize_error, ErrorObject, NormalizedError, Thrown};
pub use sanitization::{sanitize, SanitizeOptions, PII_REDACTED, REDACTED};
pub use sink::{ConsoleSink, LogBuffer, LogSink, MemorySink};
pub use context::{ContextProvider, RequestContext, UserContext};
pub use reporting::{ClientErrorHandler, ErrorTracker, TrackOptions};
pub use lifecycle::{EventRegistry, EventTarget, GlobalEvent, GlobalHandlerGuard};
pub use runtime::{create_logger, handle_client_error, init_global_error_handler, logger, Runtime};
pub use logging::{init_tracing, TracingConfig};
pub use config_rs::RuntimeEnv;

/// Installs diagnostics tracing configured from the global runtime's environment
pub fn init() -> Result<()> {
    init_tracing(Some(TracingConfig::for_env(Runtime::global().env())))
}
