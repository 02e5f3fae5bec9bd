//! # Runtime Handle
//!
//! Bundles the state that would otherwise be process-wide: the environment
//! snapshot, the default logger and its buffer, the client error handler
//! with its dedup memory, and the global handler's installed flag.
//! Independent runtimes never share any of it.

use std::fmt;
use std::sync::Arc;
use once_cell::sync::Lazy;
use serde_json::{Map, Value};
use config_rs::RuntimeEnv;
use crate::level::LogLevel;
use crate::lifecycle::{EventTarget, GlobalErrorHandler, GlobalHandlerGuard};
use crate::logger::{Logger, LoggerContext};
use crate::normalize::Thrown;
use crate::reporting::{BrowserContext, ClientErrorHandler, ErrorTracker, NoopTracker};
use crate::sink::{ConsoleSink, LogBuffer, LogSink, DEFAULT_BUFFER_CAPACITY};

static GLOBAL: Lazy<Runtime> = Lazy::new(|| Runtime::builder().build());

pub struct Runtime {
    env: RuntimeEnv,
    logger: Logger,
    buffer: Arc<LogBuffer>,
    errors: Arc<ClientErrorHandler>,
    global_handler: GlobalErrorHandler,
}

impl Runtime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    /// Process-wide runtime built from the process environment on first use.
    /// It has no window, so global handler installation is a no-op.
    pub fn global() -> &'static Runtime {
        &GLOBAL
    }

    pub fn env(&self) -> &RuntimeEnv {
        &self.env
    }

    /// The default logger
    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn buffer(&self) -> &Arc<LogBuffer> {
        &self.buffer
    }

    pub fn error_handler(&self) -> &Arc<ClientErrorHandler> {
        &self.errors
    }

    /// New logger carrying `context`, at the environment's default level
    pub fn create_logger(&self, context: LoggerContext) -> Logger {
        let logger = self.logger.child(context);
        logger.set_level(LogLevel::from_runtime_env(&self.env));
        logger
    }

    #[track_caller]
    pub fn handle_client_error(&self, raw: &Thrown, context: Option<Map<String, Value>>) {
        self.errors.handle(raw, context);
    }

    pub fn init_global_error_handler(&self) -> Option<GlobalHandlerGuard> {
        self.global_handler.init()
    }

    pub fn global_handler_installed(&self) -> bool {
        self.global_handler.is_installed()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("env", &self.env)
            .field("logger", &self.logger)
            .field("buffered", &self.buffer.len())
            .field("global_handler_installed", &self.global_handler.is_installed())
            .finish()
    }
}

/// Builder for [`Runtime`]; every collaborator is optional
#[derive(Default)]
pub struct RuntimeBuilder {
    env: Option<RuntimeEnv>,
    sink: Option<Arc<dyn LogSink>>,
    tracker: Option<Arc<dyn ErrorTracker>>,
    browser: Option<Arc<dyn BrowserContext>>,
    window: Option<Arc<dyn EventTarget>>,
    buffer_capacity: Option<usize>,
}

impl RuntimeBuilder {
    /// Defaults to [`RuntimeEnv::from_env`]
    pub fn env(mut self, env: RuntimeEnv) -> Self {
        self.env = Some(env);
        self
    }

    /// Defaults to [`ConsoleSink`]
    pub fn sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Defaults to [`NoopTracker`]
    pub fn tracker(mut self, tracker: Arc<dyn ErrorTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn browser(mut self, browser: Arc<dyn BrowserContext>) -> Self {
        self.browser = Some(browser);
        self
    }

    /// Target for the global handler; without one, installation is skipped
    pub fn window(mut self, window: Arc<dyn EventTarget>) -> Self {
        self.window = Some(window);
        self
    }

    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = Some(capacity);
        self
    }

    pub fn build(self) -> Runtime {
        let env = self.env.unwrap_or_else(RuntimeEnv::from_env);
        let buffer = Arc::new(LogBuffer::new(
            self.buffer_capacity.unwrap_or(DEFAULT_BUFFER_CAPACITY),
        ));

        let logger = Logger::builder()
            .env(env.clone())
            .sink(self.sink.unwrap_or_else(|| Arc::new(ConsoleSink)))
            .buffer(Arc::clone(&buffer))
            .build();

        let mut errors = ClientErrorHandler::new(
            logger.clone(),
            self.tracker.unwrap_or_else(|| Arc::new(NoopTracker)),
        );
        if let Some(browser) = self.browser {
            errors = errors.with_browser(browser);
        }
        let errors = Arc::new(errors);

        let global_handler = GlobalErrorHandler::new(self.window, Arc::clone(&errors), logger.clone());

        Runtime {
            env,
            logger,
            buffer,
            errors,
            global_handler,
        }
    }
}

/// Default logger of the global runtime
pub fn logger() -> &'static Logger {
    Runtime::global().logger()
}

pub fn create_logger(context: LoggerContext) -> Logger {
    Runtime::global().create_logger(context)
}

#[track_caller]
pub fn handle_client_error(raw: &Thrown, context: Option<Map<String, Value>>) {
    Runtime::global().handle_client_error(raw, context);
}

pub fn init_global_error_handler() -> Option<GlobalHandlerGuard> {
    Runtime::global().init_global_error_handler()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{EventKind, EventRegistry};
    use crate::reporting::MockErrorTracker;
    use crate::sink::MemorySink;
    use serde_json::json;

    fn quiet_runtime(env: RuntimeEnv) -> (Runtime, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let runtime = Runtime::builder().env(env).sink(sink.clone()).build();
        (runtime, sink)
    }

    #[test]
    fn test_default_logger_level_follows_env() {
        let (dev, _) = quiet_runtime(RuntimeEnv::development());
        assert_eq!(dev.logger().level(), LogLevel::Debug);

        let (prod, _) = quiet_runtime(RuntimeEnv::production());
        assert_eq!(prod.logger().level(), LogLevel::Info);
    }

    #[test]
    fn test_create_logger_binds_context_and_default_level() {
        let (runtime, sink) = quiet_runtime(RuntimeEnv::production());
        runtime.logger().set_level(LogLevel::Error);

        let scoped = runtime.create_logger(crate::logger::to_context(json!({"module": "billing"})));
        assert_eq!(scoped.level(), LogLevel::Info);
        assert_eq!(scoped.context()["module"], "billing");
        assert!(runtime.logger().context().is_empty());

        scoped.info("charged", None);
        assert_eq!(sink.len(), 1);
        assert_eq!(runtime.buffer().len(), 1);
    }

    #[test]
    fn test_handle_client_error_uses_tracker() {
        let mut tracker = MockErrorTracker::new();
        tracker
            .expect_track_error()
            .withf(|error, _| error.message == "boom")
            .times(1)
            .return_const(());

        let runtime = Runtime::builder()
            .env(RuntimeEnv::production())
            .sink(Arc::new(MemorySink::new()))
            .tracker(Arc::new(tracker))
            .build();

        let thrown = Thrown::from("boom");
        for _ in 0..2 {
            runtime.handle_client_error(&thrown, None);
        }
        assert_eq!(runtime.error_handler().processed_count(), 1);
    }

    #[test]
    fn test_runtimes_are_independent() {
        let first_window = Arc::new(EventRegistry::new());
        let second_window = Arc::new(EventRegistry::new());
        let first = Runtime::builder()
            .env(RuntimeEnv::development())
            .sink(Arc::new(MemorySink::new()))
            .window(first_window.clone())
            .build();
        let second = Runtime::builder()
            .env(RuntimeEnv::development())
            .sink(Arc::new(MemorySink::new()))
            .window(second_window.clone())
            .build();

        let a = first.init_global_error_handler().expect("first installs");
        let b = second.init_global_error_handler().expect("second installs");
        assert!(first.init_global_error_handler().is_none());
        assert_eq!(first_window.listener_count(EventKind::Error), 1);
        assert_eq!(second_window.listener_count(EventKind::Error), 1);

        a.cleanup();
        assert!(!first.global_handler_installed());
        assert!(second.global_handler_installed());
        b.cleanup();
    }

    #[test]
    fn test_runtime_without_window_skips_install() {
        let (runtime, sink) = quiet_runtime(RuntimeEnv::development());
        assert!(runtime.init_global_error_handler().is_none());
        assert!(sink.is_empty());
    }
}
