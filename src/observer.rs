//! `onLog`/`onConnection` subscription registries. Handlers are invoked
//! synchronously; a panicking handler is caught and logged without
//! affecting the others.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::error::ObserverError;
use crate::log_entry::LogEntry;

pub type LogHandler = dyn Fn(&LogEntry) + Send + Sync;
pub type ConnectionHandler = dyn Fn(&str, bool) + Send + Sync;

/// A registry of subscribed handlers, keyed by a monotonic registration id.
pub struct Registry<H: ?Sized + 'static> {
    next_id: AtomicU64,
    handlers: Arc<Mutex<HashMap<u64, Arc<H>>>>,
}

impl<H: ?Sized + 'static> Default for Registry<H> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            handlers: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<H: ?Sized + 'static> Registry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler`, returning an unsubscribe handle.
    pub fn register(&self, handler: Arc<H>) -> Unsubscribe<H> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.handlers.lock().unwrap().insert(id, handler);
        Unsubscribe {
            id,
            handlers: Arc::downgrade(&self.handlers),
        }
    }

    fn snapshot(&self) -> Vec<Arc<H>> {
        self.handlers.lock().unwrap().values().cloned().collect()
    }

    pub fn clear(&self) {
        self.handlers.lock().unwrap().clear();
    }
}

/// Unregisters its handler on [`Unsubscribe::unsubscribe`], or does nothing
/// if the owning registry has already been dropped.
pub struct Unsubscribe<H: ?Sized + 'static> {
    id: u64,
    handlers: Weak<Mutex<HashMap<u64, Arc<H>>>>,
}

impl<H: ?Sized + 'static> Unsubscribe<H> {
    pub fn unsubscribe(self) {
        if let Some(handlers) = self.handlers.upgrade() {
            handlers.lock().unwrap().remove(&self.id);
        }
    }
}

pub type LogObserverRegistry = Registry<LogHandler>;
pub type ConnectionObserverRegistry = Registry<ConnectionHandler>;
pub type LogUnsubscribe = Unsubscribe<LogHandler>;
pub type ConnectionUnsubscribe = Unsubscribe<ConnectionHandler>;

/// Invokes every registered log handler with `entry`, synchronously.
pub fn notify_log(registry: &LogObserverRegistry, entry: &LogEntry) {
    for handler in registry.snapshot() {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| handler(entry))) {
            log_observer_panic("log", payload);
        }
    }
}

/// Invokes every registered connection handler with `(peerId, connected)`,
/// synchronously.
pub fn notify_connection(registry: &ConnectionObserverRegistry, peer_id: &str, connected: bool) {
    for handler in registry.snapshot() {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| handler(peer_id, connected))) {
            log_observer_panic("connection", payload);
        }
    }
}

fn log_observer_panic(kind: &str, payload: Box<dyn Any + Send>) {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    let err = ObserverError(message);
    tracing::error!(target = "observer", kind, %err, "observer handler failed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use std::sync::atomic::AtomicUsize;

    fn sample_entry() -> LogEntry {
        LogEntry {
            severity: crate::log_entry::Severity::Info,
            message: "hi".into(),
            timestamp: "2024-01-01T00:00:00Z".into(),
            extra: Map::new(),
        }
    }

    #[test]
    fn unsubscribe_removes_handler() {
        let registry = LogObserverRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let handle = registry.register(Arc::new(move |_: &LogEntry| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        }));

        notify_log(&registry, &sample_entry());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        handle.unsubscribe();
        notify_log(&registry, &sample_entry());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_handler_does_not_affect_others() {
        let registry = ConnectionObserverRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        registry.register(Arc::new(|_: &str, _: bool| panic!("boom")));
        registry.register(Arc::new(move |_: &str, _: bool| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        }));

        notify_connection(&registry, "peer-1", true);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
