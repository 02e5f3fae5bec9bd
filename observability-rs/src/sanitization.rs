//! # Payload Sanitization
//!
//! Recursive redaction of secrets and personally identifiable information
//! from arbitrary JSON payloads before they reach any log sink or tracker.
//!
//! Secrets are redacted in every environment. PII redaction is on in
//! production by default and can be forced either way with
//! `LOG_SANITIZE_PII`; that override never applies to secrets.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use config_rs::RuntimeEnv;

/// Replacement for values under secret keys
pub const REDACTED: &str = "[REDACTED]";
/// Replacement for values under PII keys
pub const PII_REDACTED: &str = "[PII REDACTED]";

// Secret keys match anywhere inside the normalized key
static SECRET_KEY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^(ssn|pin|cvv|socialsecuritynumber)$|",
        r"password|passwd|passphrase|secret|token|apikey|credential|bearer|",
        r"privatekey|authorization|sessiontoken|refreshtoken|accesstoken|",
        r"clientsecret|creditcard|cardnumber",
    ))
    .unwrap()
});

// PII keys match exactly or as a suffix (`userEmail`, `billing_address`)
static PII_KEY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^(ip|zip|dob)$|",
        r"(email|phone|phonenumber|mobile|telephone|firstname|lastname|fullname|",
        r"surname|givenname|familyname|ipaddress|clientip|address|street|",
        r"postcode|postalcode|zipcode|dateofbirth)$",
    ))
    .unwrap()
});

/// What a key's value should be replaced with, if anything
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redaction {
    Secret,
    Pii,
}

impl Redaction {
    pub fn placeholder(&self) -> &'static str {
        match self {
            Redaction::Secret => REDACTED,
            Redaction::Pii => PII_REDACTED,
        }
    }
}

/// Options for a single sanitization pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SanitizeOptions {
    /// Whether PII keys are redacted in addition to secrets
    pub redact_pii: bool,
}

impl SanitizeOptions {
    /// Secrets only, regardless of environment
    pub fn secrets_only() -> Self {
        Self { redact_pii: false }
    }

    /// Options derived from the environment rules
    pub fn for_env(env: &RuntimeEnv) -> Self {
        Self {
            redact_pii: pii_redaction_enabled(env),
        }
    }
}

/// Whether PII should be redacted for the given environment.
///
/// An explicit `LOG_SANITIZE_PII=true|false` wins; otherwise only
/// production redacts.
pub fn pii_redaction_enabled(env: &RuntimeEnv) -> bool {
    env.sanitize_pii_override()
        .unwrap_or_else(|| env.is_production())
}

// `api_key`, `api-key` and `apiKey` all normalize to `apikey`
fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| !matches!(c, '_' | '-' | '.' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Determines if a key names a secret
pub fn is_secret_key(key: &str) -> bool {
    SECRET_KEY_PATTERN.is_match(&normalize_key(key))
}

/// Determines if a key names personally identifiable information
pub fn is_pii_key(key: &str) -> bool {
    PII_KEY_PATTERN.is_match(&normalize_key(key))
}

/// Classifies a key; secrets take precedence over PII
pub fn classify_key(key: &str, options: SanitizeOptions) -> Option<Redaction> {
    if is_secret_key(key) {
        Some(Redaction::Secret)
    } else if options.redact_pii && is_pii_key(key) {
        Some(Redaction::Pii)
    } else {
        None
    }
}

/// Returns a sanitized copy of `value`.
///
/// Objects and arrays are walked without a depth limit. Values are owned
/// trees, so the walk cannot revisit a node. The input is never modified.
pub fn sanitize(value: &Value, options: SanitizeOptions) -> Value {
    match value {
        Value::Object(map) => Value::Object(sanitize_map(map, options)),
        Value::Array(items) => Value::Array(
            items.iter().map(|item| sanitize(item, options)).collect(),
        ),
        other => other.clone(),
    }
}

/// Sanitizes the entries of an object
pub fn sanitize_map(map: &Map<String, Value>, options: SanitizeOptions) -> Map<String, Value> {
    map.iter()
        .map(|(key, value)| {
            let sanitized = match classify_key(key, options) {
                Some(redaction) => Value::String(redaction.placeholder().to_string()),
                None => sanitize(value, options),
            };
            (key.clone(), sanitized)
        })
        .collect()
}

/// Secret-only pass used for client error context
pub fn redact_secrets(value: &Value) -> Value {
    sanitize(value, SanitizeOptions::secrets_only())
}

/// Serializes any value and sanitizes the result.
///
/// Values that cannot be represented as JSON become `null`.
pub fn sanitize_serializable<T: Serialize + ?Sized>(value: &T, options: SanitizeOptions) -> Value {
    match serde_json::to_value(value) {
        Ok(json) => sanitize(&json, options),
        Err(e) => {
            tracing::debug!(error = %e, "Dropping unserializable log payload");
            Value::Null
        }
    }
}
