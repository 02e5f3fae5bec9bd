//! # Client Error Reporting
//!
//! Pipeline for uncaught client-side failures: normalize the thrown value,
//! drop repeats of an already reported failure, attach browser context,
//! scrub secrets, log, and hand the error to an external tracker.

use std::collections::{HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use metrics::counter;
use serde::{Serialize, Deserialize};
use serde_json::{Map, Value};
use crate::logger::Logger;
use crate::normalize::{normalize_error, ErrorObject, Thrown};
use crate::sanitization::{redact_secrets, sanitize_map, SanitizeOptions};
use crate::types::Severity;

/// Capacity of the processed-error fingerprint set
pub const MAX_PROCESSED_ERRORS: usize = 100;

/// Message logged for every reported client error
pub const UNHANDLED_CLIENT_ERROR: &str = "Unhandled client error";

/// Tags and extra data sent with a tracked error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackOptions {
    pub tags: Map<String, Value>,
    pub extra: Map<String, Value>,
    pub level: Severity,
}

/// External error tracking service. Calls are fire-and-forget.
#[cfg_attr(test, mockall::automock)]
pub trait ErrorTracker: Send + Sync {
    fn track_error(&self, error: &ErrorObject, options: TrackOptions);
}

/// Tracker that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracker;

impl ErrorTracker for NoopTracker {
    fn track_error(&self, _error: &ErrorObject, _options: TrackOptions) {}
}

/// Browser globals; absent on the server
#[cfg_attr(test, mockall::automock)]
pub trait BrowserContext: Send + Sync {
    fn user_agent(&self) -> Option<String>;
    fn location_href(&self) -> Option<String>;
}

/// Insertion-ordered set of error fingerprints with FIFO eviction
#[derive(Debug)]
pub struct ProcessedErrors {
    order: VecDeque<String>,
    members: HashSet<String>,
    capacity: usize,
}

impl ProcessedErrors {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            order: VecDeque::with_capacity(capacity + 1),
            members: HashSet::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.members.contains(fingerprint)
    }

    /// Records a fingerprint; returns false if it was already present.
    /// Evicts the oldest entry once capacity is exceeded.
    pub fn insert(&mut self, fingerprint: String) -> bool {
        if self.members.contains(&fingerprint) {
            return false;
        }

        self.members.insert(fingerprint.clone());
        self.order.push_back(fingerprint);

        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }
}

impl Default for ProcessedErrors {
    fn default() -> Self {
        Self::new(MAX_PROCESSED_ERRORS)
    }
}

/// Logs and tracks uncaught client errors, once per distinct failure
pub struct ClientErrorHandler {
    logger: Logger,
    tracker: Arc<dyn ErrorTracker>,
    browser: Option<Arc<dyn BrowserContext>>,
    processed: Mutex<ProcessedErrors>,
}

impl ClientErrorHandler {
    pub fn new(logger: Logger, tracker: Arc<dyn ErrorTracker>) -> Self {
        Self {
            logger,
            tracker,
            browser: None,
            processed: Mutex::new(ProcessedErrors::default()),
        }
    }

    pub fn with_browser(mut self, browser: Arc<dyn BrowserContext>) -> Self {
        self.browser = Some(browser);
        self
    }

    /// Number of fingerprints currently remembered
    pub fn processed_count(&self) -> usize {
        self.processed.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Forget every fingerprint
    pub fn reset(&self) {
        if let Ok(mut processed) = self.processed.lock() {
            processed.clear();
        }
    }

    /// Reports an uncaught error. Never panics and never fails.
    #[track_caller]
    pub fn handle(&self, raw: &Thrown, context: Option<Map<String, Value>>) {
        let normalized = normalize_error(raw);

        // Check and insert under one lock so concurrent repeats report once
        let first_occurrence = match self.processed.lock() {
            Ok(mut processed) => processed.insert(normalized.fingerprint()),
            Err(poisoned) => poisoned.into_inner().insert(normalized.fingerprint()),
        };
        if !first_occurrence {
            counter!("client_errors_deduplicated_total", 1);
            tracing::trace!(error_message = %normalized.message, "Suppressed duplicate client error");
            return;
        }
        counter!("client_errors_total", 1);

        let mut enriched = context.unwrap_or_default();
        enriched.insert("errorType".to_string(), Value::String("unhandled".to_string()));
        // Missing browser globals stay as present-but-null keys
        let (user_agent, url) = match &self.browser {
            Some(browser) => (browser.user_agent(), browser.location_href()),
            None => (None, None),
        };
        enriched.insert("userAgent".to_string(), user_agent.map_or(Value::Null, Value::String));
        enriched.insert("url".to_string(), url.map_or(Value::Null, Value::String));

        let scrubbed = match redact_secrets(&Value::Object(enriched)) {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let metadata = sanitize_map(&normalized.metadata, SanitizeOptions::secrets_only());

        let mut meta = scrubbed.clone();
        if !metadata.is_empty() {
            meta.insert("metadata".to_string(), Value::Object(metadata));
        }
        self.logger.error(
            UNHANDLED_CLIENT_ERROR,
            Some(Thrown::Error(Arc::clone(&normalized.error))),
            Some(Value::Object(meta)),
        );

        let mut tags = Map::new();
        tags.insert("errorType".to_string(), Value::String("unhandled".to_string()));
        tags.insert("source".to_string(), Value::String("globalHandler".to_string()));
        let options = TrackOptions {
            tags,
            extra: scrubbed,
            level: Severity::Error,
        };

        let tracked = panic::catch_unwind(AssertUnwindSafe(|| {
            self.tracker.track_error(&normalized.error, options)
        }));
        if tracked.is_err() {
            tracing::warn!(error_message = %normalized.message, "Error tracker panicked while reporting");
        }
    }
}
