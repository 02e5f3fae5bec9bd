//! # Error Normalization
//!
//! Maps any thrown or rejected value onto the canonical
//! `{message, error, metadata}` triple. The mapping is total: every input
//! shape produces a normalized error and nothing here can fail.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error as StdError;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;
use serde::Serialize;
use serde_json::{Map, Value};

/// Message used when a value carries no usable text
pub const UNKNOWN_ERROR_MESSAGE: &str = "Unknown error occurred";

const RESERVED_KEYS: [&str; 3] = ["name", "message", "stack"];

/// An error value with a name, message, optional stack and arbitrary
/// extra properties (`code`, `status`, ...)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorObject {
    pub name: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// Extra own properties; never contains `name`, `message` or `stack`
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl ErrorObject {
    /// Creates an `Error`-named error whose stack records the call site
    /// followed by the frames of the current call chain
    #[track_caller]
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self::named("Error", message)
    }

    /// Creates an error with a specific name (`TypeError`, `FetchError`, ...)
    #[track_caller]
    pub fn named<N: Into<String>, S: Into<String>>(name: N, message: S) -> Self {
        let name = name.into();
        let message = message.into();
        let mut stack = format!("{}: {}\n    at {}", name, message, Location::caller());
        for frame in captured_frames() {
            stack.push_str("\n    at ");
            stack.push_str(&frame);
        }

        Self {
            name,
            message,
            stack: Some(stack),
            properties: Map::new(),
        }
    }

    /// Builds an error from any standard error, recording its source chain
    /// under the `cause` property
    #[track_caller]
    pub fn from_std<E: StdError + 'static>(err: &E) -> Self {
        let type_name = std::any::type_name::<E>();
        let short_name = type_name.rsplit("::").next().unwrap_or(type_name);
        let mut error = Self::named(short_name, err.to_string());

        let mut causes = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(Value::String(cause.to_string()));
            source = cause.source();
        }
        if !causes.is_empty() {
            error.properties.insert("cause".to_string(), Value::Array(causes));
        }

        error
    }

    /// Adds an extra property; reserved keys are ignored
    pub fn with_property<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Serialize,
    {
        let key = key.into();
        if RESERVED_KEYS.contains(&key.as_str()) {
            return self;
        }
        if let Ok(value) = serde_json::to_value(value) {
            self.properties.insert(key, value);
        }
        self
    }

    /// Replaces the captured stack
    pub fn with_stack<S: Into<String>>(mut self, stack: Option<S>) -> Self {
        self.stack = stack.map(Into::into);
        self
    }
}

/// Frames of the current call chain as `symbol (file:line:col)`, without
/// the frames of the capture itself. Empty where backtraces are unsupported.
fn captured_frames() -> Vec<String> {
    let trace = Backtrace::force_capture();
    if trace.status() != BacktraceStatus::Captured {
        return Vec::new();
    }
    let trace = trace.to_string();
    let mut frames: Vec<String> = Vec::new();
    let mut skipping = false;

    for line in trace.lines().map(str::trim) {
        if let Some(location) = line.strip_prefix("at ") {
            if !skipping {
                if let Some(frame) = frames.last_mut() {
                    frame.push_str(&format!(" ({})", location));
                }
            }
            continue;
        }

        // Inlined frames repeat without the index prefix
        let symbol = match line.split_once(": ") {
            Some((index, symbol)) if !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()) => symbol,
            _ => line,
        };
        if symbol.is_empty() {
            continue;
        }
        skipping = symbol.starts_with("std::backtrace")
            || symbol.contains("captured_frames")
            || symbol.contains("ErrorObject::named")
            || symbol.contains("ErrorObject::new")
            || symbol.contains("ErrorObject::from_std");
        if !skipping {
            frames.push(symbol.to_string());
        }
    }

    frames
}

impl fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}: {}", self.name, self.message)
        }
    }
}

impl StdError for ErrorObject {}

/// Any value that can be thrown or used as a rejection reason
#[derive(Debug, Clone)]
pub enum Thrown {
    Error(Arc<ErrorObject>),
    Value(Value),
    Undefined,
}

impl From<ErrorObject> for Thrown {
    fn from(error: ErrorObject) -> Self {
        Thrown::Error(Arc::new(error))
    }
}

impl From<Arc<ErrorObject>> for Thrown {
    fn from(error: Arc<ErrorObject>) -> Self {
        Thrown::Error(error)
    }
}

impl From<Value> for Thrown {
    fn from(value: Value) -> Self {
        Thrown::Value(value)
    }
}

impl From<&str> for Thrown {
    fn from(message: &str) -> Self {
        Thrown::Value(Value::String(message.to_string()))
    }
}

impl From<String> for Thrown {
    fn from(message: String) -> Self {
        Thrown::Value(Value::String(message))
    }
}

impl From<Option<Value>> for Thrown {
    fn from(value: Option<Value>) -> Self {
        value.map_or(Thrown::Undefined, Thrown::Value)
    }
}

impl Thrown {
    /// JSON form of the raw value; `Undefined` becomes `null`
    pub fn to_json(&self) -> Value {
        match self {
            Thrown::Error(error) => serde_json::to_value(error.as_ref()).unwrap_or(Value::Null),
            Thrown::Value(value) => value.clone(),
            Thrown::Undefined => Value::Null,
        }
    }
}

impl fmt::Display for Thrown {
    /// String coercion: arrays join their elements with commas,
    /// objects print as `[object Object]`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Thrown::Error(error) => write!(f, "{}", error),
            Thrown::Value(value) => f.write_str(&coerce_to_string(value)),
            Thrown::Undefined => f.write_str("undefined"),
        }
    }
}

fn coerce_to_string(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                // Holes and nulls render as empty inside a join
                Value::Null => String::new(),
                other => coerce_to_string(other),
            })
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

/// Shape of a thrown value, in dispatch priority order
#[derive(Debug)]
pub enum ErrorShape<'a> {
    IsError(&'a Arc<ErrorObject>),
    IsString(&'a str),
    HasStringMessage {
        object: &'a Map<String, Value>,
        message: &'a str,
    },
    IsPlainObject(&'a Map<String, Value>),
    /// null, undefined, booleans, numbers and arrays
    IsPrimitiveOrArray,
}

/// Classifies a thrown value. Arrays are never treated as objects.
pub fn classify(input: &Thrown) -> ErrorShape<'_> {
    match input {
        Thrown::Error(error) => ErrorShape::IsError(error),
        Thrown::Value(Value::String(s)) => ErrorShape::IsString(s),
        Thrown::Value(Value::Object(object)) => match object.get("message") {
            Some(Value::String(message)) => ErrorShape::HasStringMessage { object, message },
            _ => ErrorShape::IsPlainObject(object),
        },
        Thrown::Value(_) | Thrown::Undefined => ErrorShape::IsPrimitiveOrArray,
    }
}

/// Canonical form of any thrown value
#[derive(Debug, Clone)]
pub struct NormalizedError {
    pub message: String,
    /// The original error when one was thrown, otherwise a new one
    pub error: Arc<ErrorObject>,
    pub metadata: Map<String, Value>,
}

impl NormalizedError {
    /// Dedup key: message plus stack
    pub fn fingerprint(&self) -> String {
        format!("{}\n{}", self.message, self.error.stack.as_deref().unwrap_or(""))
    }
}

/// Normalizes any thrown value. Never fails.
#[track_caller]
pub fn normalize_error(input: &Thrown) -> NormalizedError {
    match classify(input) {
        ErrorShape::IsError(error) => {
            let mut metadata = Map::new();
            metadata.insert("name".to_string(), Value::String(error.name.clone()));
            if let Some(stack) = &error.stack {
                metadata.insert("stack".to_string(), Value::String(stack.clone()));
            }
            for (key, value) in &error.properties {
                if !RESERVED_KEYS.contains(&key.as_str()) {
                    metadata.insert(key.clone(), value.clone());
                }
            }

            NormalizedError {
                message: error.message.clone(),
                error: Arc::clone(error),
                metadata,
            }
        }
        ErrorShape::IsString(message) => NormalizedError {
            message: message.to_string(),
            error: Arc::new(ErrorObject::new(message)),
            metadata: Map::new(),
        },
        ErrorShape::HasStringMessage { object, message } => NormalizedError {
            message: message.to_string(),
            error: Arc::new(ErrorObject::new(message)),
            metadata: object.clone(),
        },
        ErrorShape::IsPlainObject(object) => NormalizedError {
            message: UNKNOWN_ERROR_MESSAGE.to_string(),
            error: Arc::new(ErrorObject::new(UNKNOWN_ERROR_MESSAGE)),
            metadata: object.clone(),
        },
        ErrorShape::IsPrimitiveOrArray => {
            let message = input.to_string();
            let mut metadata = Map::new();
            metadata.insert("originalValue".to_string(), input.to_json());

            NormalizedError {
                error: Arc::new(ErrorObject::new(message.clone())),
                message,
                metadata,
            }
        }
    }
}
