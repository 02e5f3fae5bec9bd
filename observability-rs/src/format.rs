//! Line formatting for log entries.
//!
//! Production gets one JSON object per line for log shippers; every other
//! environment gets one colorized, human-readable line.

use colored::Colorize;
use serde_json::{Map, Value};
use config_rs::RuntimeEnv;
use crate::level::LogLevel;
use crate::logger::LogEntry;

/// Output format of a logger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Colorized, multi-section text for local development
    Pretty,
    /// Single-line JSON matching the `LogEntry` shape
    Json,
}

impl LogFormat {
    pub fn for_env(env: &RuntimeEnv) -> Self {
        if env.is_production() {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Formats an entry as one string, ready for a single sink write
pub fn format_entry(entry: &LogEntry, format: LogFormat) -> String {
    match format {
        LogFormat::Json => format_json(entry),
        LogFormat::Pretty => format_pretty(entry),
    }
}

fn format_json(entry: &LogEntry) -> String {
    serde_json::to_string(entry).unwrap_or_else(|e| {
        serde_json::json!({
            "timestamp": entry.timestamp,
            "level": entry.level,
            "message": entry.message,
            "formatError": e.to_string(),
        })
        .to_string()
    })
}

fn format_pretty(entry: &LogEntry) -> String {
    let label = format!("{:<5}", entry.level.as_str().to_uppercase());
    let label = match entry.level {
        LogLevel::Debug => label.cyan(),
        LogLevel::Info => label.green(),
        LogLevel::Warn => label.yellow(),
        LogLevel::Error => label.red().bold(),
    };

    let mut out = format!("{} {} {}", entry.timestamp.dimmed(), label, entry.message);

    push_field(&mut out, "context", entry.context.as_ref());
    push_field(&mut out, "meta", entry.meta.as_ref());

    if let Some(error) = &entry.error {
        out.push_str(&format!(" {}={}: {}", "error".red(), error.name, error.message));
        if let Some(code) = &error.code {
            out.push_str(&format!(" (code: {})", code));
        }
        if !error.extra.is_empty() {
            push_field(&mut out, "details", Some(&error.extra));
        }
        // Only the construction site; the full stack stays in JSON output
        if let Some(origin) = error.stack.as_deref().and_then(|s| s.lines().nth(1)) {
            out.push(' ');
            out.push_str(&origin.trim().dimmed().to_string());
        }
    }

    out
}

fn push_field(out: &mut String, title: &str, data: Option<&Map<String, Value>>) {
    let Some(data) = data else { return };
    let compact = serde_json::to_string(data).unwrap_or_default();
    out.push_str(&format!(" {}={}", title.bold(), compact));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::SerializedError;
    use serde_json::json;

    fn sample() -> LogEntry {
        LogEntry {
            timestamp: "2024-05-01T10:00:00.000Z".to_string(),
            level: LogLevel::Error,
            message: "payment failed".to_string(),
            context: Some(json!({"requestId": "r1"}).as_object().unwrap().clone()),
            meta: None,
            error: Some(SerializedError {
                name: "Error".to_string(),
                message: "declined".to_string(),
                stack: Some("Error: declined\n    at src/pay.rs:10:5".to_string()),
                code: Some(json!("CARD_DECLINED")),
                extra: Map::new(),
            }),
        }
    }

    #[test]
    fn test_json_format_round_trips() {
        let line = format_entry(&sample(), LogFormat::Json);
        assert!(!line.contains('\n'));

        let parsed: LogEntry = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, sample());
    }

    #[test]
    fn test_pretty_format_contents() {
        let text = format_entry(&sample(), LogFormat::Pretty);
        assert!(!text.contains('\n'));
        assert!(text.contains("ERROR"));
        assert!(text.contains("payment failed"));
        assert!(text.contains("{\"requestId\":\"r1\"}"));
        assert!(text.contains("declined"));
        assert!(text.contains("CARD_DECLINED"));
        assert!(text.contains("src/pay.rs:10:5"));
        assert!(!text.contains("meta"));
    }

    #[test]
    fn test_pretty_format_is_one_line() {
        let mut entry = sample();
        entry.level = LogLevel::Info;
        entry.error = None;
        entry.meta = Some(json!({"a": 1, "b": {"c": 2}}).as_object().unwrap().clone());

        let text = format_entry(&entry, LogFormat::Pretty);
        assert_eq!(text.lines().count(), 1);
        assert!(text.contains("{\"a\":1,\"b\":{\"c\":2}}"));
    }

    #[test]
    fn test_format_for_env() {
        assert_eq!(LogFormat::for_env(&RuntimeEnv::production()), LogFormat::Json);
        assert_eq!(LogFormat::for_env(&RuntimeEnv::development()), LogFormat::Pretty);
        assert_eq!(LogFormat::for_env(&RuntimeEnv::default()), LogFormat::Pretty);
    }
}
