//! # Global Error Handler Lifecycle
//!
//! Installs one listener for unhandled rejections and one for uncaught
//! errors on a window-like event target, forwarding both to the client
//! error handler. Installation is idempotent and reversible: a second
//! install without cleanup is refused, and cleanup removes exactly the
//! listeners that were added.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use serde_json::{Map, Value};
use crate::logger::Logger;
use crate::normalize::{ErrorObject, Thrown};
use crate::reporting::ClientErrorHandler;

/// The two global failure events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    UnhandledRejection,
    Error,
}

/// A promise or future rejected with nobody awaiting it
#[derive(Debug, Clone)]
pub struct RejectionEvent {
    pub reason: Thrown,
}

/// A synchronous uncaught error
#[derive(Debug, Clone, Default)]
pub struct ErrorEvent {
    pub message: String,
    pub filename: Option<String>,
    pub lineno: Option<u32>,
    pub colno: Option<u32>,
    pub error: Option<Thrown>,
}

#[derive(Debug, Clone)]
pub enum GlobalEvent {
    UnhandledRejection(RejectionEvent),
    Error(ErrorEvent),
}

impl GlobalEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            GlobalEvent::UnhandledRejection(_) => EventKind::UnhandledRejection,
            GlobalEvent::Error(_) => EventKind::Error,
        }
    }
}

/// Listener identity is the identity of the `Arc`
pub type EventListener = Arc<dyn Fn(&GlobalEvent) + Send + Sync>;

/// Window-like target that accepts global event listeners
pub trait EventTarget: Send + Sync {
    fn add_event_listener(&self, kind: EventKind, listener: EventListener);
    fn remove_event_listener(&self, kind: EventKind, listener: &EventListener);
}

/// In-process event target
#[derive(Default)]
pub struct EventRegistry {
    listeners: RwLock<Vec<(EventKind, EventListener)>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers an event to every listener registered for its kind
    pub fn dispatch(&self, event: &GlobalEvent) {
        let kind = event.kind();
        // Listeners run without the lock held so they may (un)register
        let targets: Vec<EventListener> = match self.listeners.read() {
            Ok(listeners) => listeners
                .iter()
                .filter(|(k, _)| *k == kind)
                .map(|(_, l)| Arc::clone(l))
                .collect(),
            Err(_) => return,
        };

        for listener in targets {
            listener(event);
        }
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners
            .read()
            .map(|l| l.iter().filter(|(k, _)| *k == kind).count())
            .unwrap_or(0)
    }
}

impl EventTarget for EventRegistry {
    /// Adding the same listener twice for a kind is a no-op
    fn add_event_listener(&self, kind: EventKind, listener: EventListener) {
        if let Ok(mut listeners) = self.listeners.write() {
            let present = listeners
                .iter()
                .any(|(k, l)| *k == kind && Arc::ptr_eq(l, &listener));
            if !present {
                listeners.push((kind, listener));
            }
        }
    }

    fn remove_event_listener(&self, kind: EventKind, listener: &EventListener) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.retain(|(k, l)| !(*k == kind && Arc::ptr_eq(l, listener)));
        }
    }
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRegistry")
            .field("rejection_listeners", &self.listener_count(EventKind::UnhandledRejection))
            .field("error_listeners", &self.listener_count(EventKind::Error))
            .finish()
    }
}

/// Owns the installed flag and installs the global listeners
pub struct GlobalErrorHandler {
    window: Option<Arc<dyn EventTarget>>,
    handler: Arc<ClientErrorHandler>,
    logger: Logger,
    installed: Arc<AtomicBool>,
}

impl GlobalErrorHandler {
    /// `window` is `None` on the server, where installation is skipped
    pub fn new(
        window: Option<Arc<dyn EventTarget>>,
        handler: Arc<ClientErrorHandler>,
        logger: Logger,
    ) -> Self {
        Self {
            window,
            handler,
            logger,
            installed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_installed(&self) -> bool {
        self.installed.load(Ordering::Acquire)
    }

    /// Installs both listeners.
    ///
    /// Returns `None` without side effects when there is no window or when
    /// a handler is already installed.
    pub fn init(&self) -> Option<GlobalHandlerGuard> {
        let window = self.window.as_ref()?;

        if self
            .installed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }

        let handler = Arc::clone(&self.handler);
        let rejection: EventListener = Arc::new(move |event: &GlobalEvent| {
            if let GlobalEvent::UnhandledRejection(rejection) = event {
                handler.handle(&rejection.reason, None);
            }
        });

        let handler = Arc::clone(&self.handler);
        let error: EventListener = Arc::new(move |event: &GlobalEvent| {
            if let GlobalEvent::Error(error_event) = event {
                let thrown = error_event
                    .error
                    .clone()
                    .unwrap_or_else(|| ErrorObject::new(error_event.message.clone()).into());
                handler.handle(&thrown, Some(location_context(error_event)));
            }
        });

        window.add_event_listener(EventKind::UnhandledRejection, Arc::clone(&rejection));
        window.add_event_listener(EventKind::Error, Arc::clone(&error));

        self.logger.debug("Global error handler initialized", None);

        Some(GlobalHandlerGuard {
            window: Arc::clone(window),
            rejection,
            error,
            installed: Arc::clone(&self.installed),
        })
    }
}

fn location_context(event: &ErrorEvent) -> Map<String, Value> {
    let mut context = Map::new();
    context.insert(
        "filename".to_string(),
        event.filename.clone().map_or(Value::Null, Value::String),
    );
    context.insert("lineno".to_string(), event.lineno.map_or(Value::Null, Value::from));
    context.insert("colno".to_string(), event.colno.map_or(Value::Null, Value::from));
    context
}

/// Handle to installed listeners. They are removed by
/// [`GlobalHandlerGuard::cleanup`] or when the guard is dropped.
#[must_use = "dropping the guard removes the listeners immediately"]
pub struct GlobalHandlerGuard {
    window: Arc<dyn EventTarget>,
    rejection: EventListener,
    error: EventListener,
    installed: Arc<AtomicBool>,
}

impl GlobalHandlerGuard {
    /// Removes both listeners and allows a later re-install
    pub fn cleanup(self) {
        drop(self);
    }
}

impl Drop for GlobalHandlerGuard {
    fn drop(&mut self) {
        self.window
            .remove_event_listener(EventKind::UnhandledRejection, &self.rejection);
        self.window.remove_event_listener(EventKind::Error, &self.error);
        self.installed.store(false, Ordering::Release);
    }
}

impl fmt::Debug for GlobalHandlerGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalHandlerGuard").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporting::{ErrorTracker, TrackOptions};
    use crate::sink::{MemorySink, Stream};
    use config_rs::RuntimeEnv;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTracker {
        calls: Mutex<Vec<(String, TrackOptions)>>,
    }

    impl ErrorTracker for RecordingTracker {
        fn track_error(&self, error: &ErrorObject, options: TrackOptions) {
            self.calls.lock().unwrap().push((error.message.clone(), options));
        }
    }

    struct Fixture {
        registry: Arc<EventRegistry>,
        tracker: Arc<RecordingTracker>,
        sink: Arc<MemorySink>,
        global: GlobalErrorHandler,
    }

    fn fixture(with_window: bool) -> Fixture {
        let registry = Arc::new(EventRegistry::new());
        let tracker = Arc::new(RecordingTracker::default());
        let sink = Arc::new(MemorySink::new());
        let logger = Logger::builder()
            .env(RuntimeEnv::production())
            .level(crate::level::LogLevel::Debug)
            .sink(sink.clone())
            .build();
        let handler = Arc::new(ClientErrorHandler::new(logger.clone(), tracker.clone()));
        let window: Option<Arc<dyn EventTarget>> = if with_window {
            Some(registry.clone())
        } else {
            None
        };

        Fixture {
            global: GlobalErrorHandler::new(window, handler, logger),
            registry,
            tracker,
            sink,
        }
    }

    #[test]
    fn test_no_window_is_noop() {
        let f = fixture(false);
        assert!(f.global.init().is_none());
        assert!(!f.global.is_installed());
        assert!(f.sink.is_empty());
    }

    #[test]
    fn test_init_registers_both_listeners() {
        let f = fixture(true);
        let guard = f.global.init().expect("installs with a window");

        assert!(f.global.is_installed());
        assert_eq!(f.registry.listener_count(EventKind::UnhandledRejection), 1);
        assert_eq!(f.registry.listener_count(EventKind::Error), 1);

        let debug_line = &f.sink.lines_for(Stream::Stdout)[0];
        assert!(debug_line.contains("Global error handler initialized"));

        guard.cleanup();
    }

    #[test]
    fn test_double_init_refused() {
        let f = fixture(true);
        let guard = f.global.init().unwrap();

        assert!(f.global.init().is_none());
        assert_eq!(f.registry.listener_count(EventKind::Error), 1);
        assert!(f.global.is_installed());

        guard.cleanup();
        assert!(!f.global.is_installed());
        assert_eq!(f.registry.listener_count(EventKind::Error), 0);
        assert_eq!(f.registry.listener_count(EventKind::UnhandledRejection), 0);

        let again = f.global.init().expect("re-installs after cleanup");
        assert_eq!(f.registry.listener_count(EventKind::Error), 1);
        again.cleanup();
    }

    #[test]
    fn test_rejection_forwarded() {
        let f = fixture(true);
        let guard = f.global.init().unwrap();

        f.registry.dispatch(&GlobalEvent::UnhandledRejection(RejectionEvent {
            reason: Thrown::from(json!({"message": "fetch failed", "status": 502})),
        }));

        let calls = f.tracker.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "fetch failed");
        drop(calls);
        guard.cleanup();
    }

    #[test]
    fn test_error_event_without_error_uses_message() {
        let f = fixture(true);
        let guard = f.global.init().unwrap();

        f.registry.dispatch(&GlobalEvent::Error(ErrorEvent {
            message: "Script error.".to_string(),
            filename: Some("app.js".to_string()),
            lineno: Some(12),
            colno: None,
            error: None,
        }));

        let calls = f.tracker.calls.lock().unwrap();
        assert_eq!(calls[0].0, "Script error.");
        assert_eq!(calls[0].1.extra["filename"], "app.js");
        assert_eq!(calls[0].1.extra["lineno"], 12);
        assert_eq!(calls[0].1.extra["colno"], Value::Null);
        drop(calls);
        guard.cleanup();
    }

    #[test]
    fn test_no_forwarding_after_cleanup() {
        let f = fixture(true);
        f.global.init().unwrap().cleanup();

        f.registry.dispatch(&GlobalEvent::UnhandledRejection(RejectionEvent {
            reason: Thrown::from("late"),
        }));
        assert!(f.tracker.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_dropped_guard_uninstalls() {
        let f = fixture(true);
        {
            let _guard = f.global.init().unwrap();
            assert_eq!(f.registry.listener_count(EventKind::Error), 1);
        }

        assert!(!f.global.is_installed());
        assert_eq!(f.registry.listener_count(EventKind::Error), 0);
        assert_eq!(f.registry.listener_count(EventKind::UnhandledRejection), 0);

        let again = f.global.init().expect("re-installs after drop");
        assert_eq!(f.registry.listener_count(EventKind::Error), 1);
        again.cleanup();
    }

    #[test]
    fn test_registry_listener_identity() {
        let registry = EventRegistry::new();
        let listener: EventListener = Arc::new(|_| {});
        let other: EventListener = Arc::new(|_| {});

        registry.add_event_listener(EventKind::Error, listener.clone());
        registry.add_event_listener(EventKind::Error, listener.clone());
        assert_eq!(registry.listener_count(EventKind::Error), 1);

        registry.remove_event_listener(EventKind::Error, &other);
        assert_eq!(registry.listener_count(EventKind::Error), 1);

        registry.remove_event_listener(EventKind::Error, &listener);
        assert_eq!(registry.listener_count(EventKind::Error), 0);
    }
}
