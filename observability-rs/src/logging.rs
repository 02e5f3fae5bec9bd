//! # Internal Diagnostics
//!
//! `tracing` subscriber setup for the crate's own diagnostics (suppressed
//! duplicates, collaborator failures, tracker panics). Application log
//! lines go through [`crate::logger::Logger`] and never depend on this.

use std::sync::atomic::{AtomicBool, Ordering};
use serde::{Serialize, Deserialize};
use tracing_subscriber::{fmt, EnvFilter, layer::SubscriberExt, Registry};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_appender::non_blocking::NonBlocking;
use config_rs::RuntimeEnv;
use crate::level::LogLevel;
use crate::types::{Error, Result};

static TRACING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Configuration for the diagnostics subscriber
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    /// Default directive when `RUST_LOG` is unset
    pub level: String,
    /// Used as the log file name prefix
    pub service_name: String,
    pub json_format: bool,
    /// Writes a daily-rotated file in addition to stdout
    pub file_output: bool,
    pub log_dir: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            service_name: "observability".to_string(),
            json_format: false,
            file_output: false,
            log_dir: None,
        }
    }
}

impl TracingConfig {
    /// JSON in production, text elsewhere, at the environment's log level
    pub fn for_env(env: &RuntimeEnv) -> Self {
        Self {
            level: LogLevel::from_runtime_env(env).as_str().to_string(),
            json_format: env.is_production(),
            ..Self::default()
        }
    }
}

/// Installs the global `tracing` subscriber. Later calls are no-ops.
pub fn init_tracing(config: Option<TracingConfig>) -> Result<()> {
    // The first caller claims installation; concurrent and later callers are no-ops
    if TRACING_INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Ok(());
    }

    let config = config.unwrap_or_default();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let json_layer = config.json_format.then(|| {
        fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_target(true)
    });
    let text_layer = (!config.json_format).then(|| fmt::layer().with_target(true));

    let file_layer = match (&config.log_dir, config.file_output) {
        (Some(log_dir), true) => {
            let appender = RollingFileAppender::new(
                Rotation::DAILY,
                log_dir,
                format!("{}.log", config.service_name),
            );
            let (writer, guard) = NonBlocking::new(appender);
            // Flushes on drop; must live as long as the process
            Box::leak(Box::new(guard));
            Some(fmt::layer().with_writer(writer).with_ansi(false))
        }
        _ => None,
    };

    let subscriber = Registry::default()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .with(file_layer);

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        TRACING_INITIALIZED.store(false, Ordering::SeqCst);
        return Err(Error::Initialization(format!("Failed to set global subscriber: {}", e)));
    }

    tracing::debug!(
        service = %config.service_name,
        level = %config.level,
        json = config.json_format,
        "Diagnostics tracing initialized"
    );

    Ok(())
}
