//! # Leveled Logger
//!
//! Structured logger with per-environment formatting, payload sanitization,
//! an optional shared in-memory buffer and copy-on-child context.
//!
//! Every call builds one [`LogEntry`], sanitizes its context, meta and error
//! fields, writes it to the sink when the level passes the filter, and pushes
//! the sanitized entry into the buffer regardless of the filter.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use chrono::{SecondsFormat, Utc};
use metrics::counter;
use serde::{Serialize, Deserialize};
use serde_json::{Map, Value};
use config_rs::RuntimeEnv;
use crate::format::{format_entry, LogFormat};
use crate::level::LogLevel;
use crate::normalize::{normalize_error, Thrown};
use crate::sanitization::{sanitize, sanitize_map, SanitizeOptions};
use crate::sink::{ConsoleSink, LogBuffer, LogSink, Stream};

/// Key/value context attached to a logger
pub type LoggerContext = Map<String, Value>;

/// Converts a JSON object into a logger context; other values give an empty context
pub fn to_context(value: Value) -> LoggerContext {
    match value {
        Value::Object(map) => map,
        _ => LoggerContext::new(),
    }
}

/// Error details carried by a log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedError {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Value>,
    /// Remaining own properties of the error
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One log record. Built once per call and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// RFC 3339 UTC timestamp with millisecond precision
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SerializedError>,
}

// Settings shared by a logger and every child derived from it
struct Shared {
    format: LogFormat,
    sanitize: SanitizeOptions,
    sink: Arc<dyn LogSink>,
    buffer: Option<Arc<LogBuffer>>,
}

/// Leveled structured logger
pub struct Logger {
    level: AtomicU8,
    context: Arc<LoggerContext>,
    shared: Arc<Shared>,
}

impl Logger {
    /// Creates a console logger configured from the process environment.
    ///
    /// Without an explicit level, `LOG_LEVEL` is used when valid and the
    /// environment default otherwise.
    pub fn new(level: Option<LogLevel>, context: LoggerContext) -> Self {
        let mut builder = Self::builder().context(context);
        if let Some(level) = level {
            builder = builder.level(level);
        }
        builder.build()
    }

    pub fn builder() -> LoggerBuilder {
        LoggerBuilder::default()
    }

    pub fn level(&self) -> LogLevel {
        LogLevel::from_u8(self.level.load(Ordering::Acquire))
    }

    /// Changes the minimum level; later calls observe it immediately
    pub fn set_level(&self, level: LogLevel) {
        self.level.store(level as u8, Ordering::Release);
    }

    /// This logger's own context
    pub fn context(&self) -> &LoggerContext {
        &self.context
    }

    pub fn buffer(&self) -> Option<&Arc<LogBuffer>> {
        self.shared.buffer.as_ref()
    }

    pub fn is_enabled(&self, level: LogLevel) -> bool {
        level >= self.level()
    }

    /// Derives a logger whose context is this context merged with `extra`
    /// (keys in `extra` win). This logger is left untouched.
    pub fn child(&self, extra: LoggerContext) -> Logger {
        let mut merged = (*self.context).clone();
        merged.extend(extra);

        Logger {
            level: AtomicU8::new(self.level() as u8),
            context: Arc::new(merged),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Alias for [`Logger::child`]
    pub fn with_context(&self, extra: LoggerContext) -> Logger {
        self.child(extra)
    }

    pub fn debug(&self, message: &str, meta: Option<Value>) {
        self.write_entry(LogLevel::Debug, message, meta, None);
    }

    pub fn info(&self, message: &str, meta: Option<Value>) {
        self.write_entry(LogLevel::Info, message, meta, None);
    }

    pub fn warn(&self, message: &str, meta: Option<Value>) {
        self.write_entry(LogLevel::Warn, message, meta, None);
    }

    /// Logs at error level. Values that are not errors are wrapped into one.
    pub fn error(&self, message: &str, error: Option<Thrown>, meta: Option<Value>) {
        self.write_entry(LogLevel::Error, message, meta, error.as_ref());
    }

    /// Logs at an arbitrary level
    pub fn log(&self, level: LogLevel, message: &str, meta: Option<Value>) {
        self.write_entry(level, message, meta, None);
    }

    fn write_entry(&self, level: LogLevel, message: &str, meta: Option<Value>, error: Option<&Thrown>) {
        let entry = self.build_entry(level, message, meta, error);

        if self.is_enabled(level) {
            let stream = match level {
                LogLevel::Error => Stream::Stderr,
                _ => Stream::Stdout,
            };
            self.shared.sink.write(stream, &format_entry(&entry, self.shared.format));
            counter!("log_entries_total", 1, "level" => level.as_str());
        }

        if let Some(buffer) = &self.shared.buffer {
            buffer.push(entry);
        }
    }

    fn build_entry(
        &self,
        level: LogLevel,
        message: &str,
        meta: Option<Value>,
        error: Option<&Thrown>,
    ) -> LogEntry {
        let options = self.shared.sanitize;

        let context = if self.context.is_empty() {
            None
        } else {
            Some(sanitize_map(&self.context, options))
        };

        let meta = match meta {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) if map.is_empty() => None,
            Some(Value::Object(map)) => Some(sanitize_map(&map, options)),
            Some(other) => {
                let mut wrapped = Map::new();
                wrapped.insert("value".to_string(), sanitize(&other, options));
                Some(wrapped)
            }
        };

        LogEntry {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            level,
            message: message.to_string(),
            context,
            meta,
            error: error.map(|thrown| serialize_error(thrown, options)),
        }
    }
}

/// Serializes a thrown value for a log entry, wrapping non-errors
fn serialize_error(thrown: &Thrown, options: SanitizeOptions) -> SerializedError {
    let normalized = normalize_error(thrown);
    let error = &normalized.error;

    let mut extra = match thrown {
        Thrown::Error(_) => error.properties.clone(),
        _ => normalized.metadata.clone(),
    };
    for reserved in ["name", "message", "stack"] {
        extra.remove(reserved);
    }
    let code = extra.remove("code").map(|code| sanitize(&code, options));

    SerializedError {
        name: error.name.clone(),
        message: error.message.clone(),
        stack: error.stack.clone(),
        code,
        extra: sanitize_map(&extra, options),
    }
}

impl Clone for Logger {
    /// Clones share sink and buffer and start at the current level
    fn clone(&self) -> Self {
        Logger {
            level: AtomicU8::new(self.level() as u8),
            context: Arc::clone(&self.context),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("level", &self.level())
            .field("context", &self.context)
            .field("format", &self.shared.format)
            .field("redact_pii", &self.shared.sanitize.redact_pii)
            .finish()
    }
}

/// Builder for [`Logger`]
#[derive(Default)]
pub struct LoggerBuilder {
    level: Option<LogLevel>,
    context: LoggerContext,
    env: Option<RuntimeEnv>,
    sink: Option<Arc<dyn LogSink>>,
    buffer: Option<Arc<LogBuffer>>,
}

impl LoggerBuilder {
    /// Explicit minimum level, bypassing `LOG_LEVEL`
    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn context(mut self, context: LoggerContext) -> Self {
        self.context = context;
        self
    }

    /// Environment snapshot; defaults to [`RuntimeEnv::from_env`]
    pub fn env(mut self, env: RuntimeEnv) -> Self {
        self.env = Some(env);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn buffer(mut self, buffer: Arc<LogBuffer>) -> Self {
        self.buffer = Some(buffer);
        self
    }

    pub fn build(self) -> Logger {
        let env = self.env.unwrap_or_else(RuntimeEnv::from_env);
        let level = self
            .level
            .unwrap_or_else(|| LogLevel::from_runtime_env(&env));

        Logger {
            level: AtomicU8::new(level as u8),
            context: Arc::new(self.context),
            shared: Arc::new(Shared {
                format: LogFormat::for_env(&env),
                sanitize: SanitizeOptions::for_env(&env),
                sink: self.sink.unwrap_or_else(|| Arc::new(ConsoleSink)),
                buffer: self.buffer,
            }),
        }
    }
}
