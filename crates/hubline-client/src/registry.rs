//! Channel handlers that outlive a single session.

use crate::transport::{Handler, Session};
use std::collections::HashMap;

/// One active handler per channel.
#[derive(Default)]
pub struct SubscriptionRegistry {
    handlers: HashMap<String, Handler>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the handler for `channel`.
    pub fn register(&mut self, channel: impl Into<String>, handler: Handler) {
        self.handlers.insert(channel.into(), handler);
    }

    /// Bind every registered handler onto `session`, dropping whatever was
    /// bound to those channels before.
    pub fn attach_all<S: Session>(&self, session: &S) {
        for (channel, handler) in &self.handlers {
            session.off(channel);
            session.on(channel, handler.clone());
        }
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.handlers.contains_key(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::transport::CloseCallback;
    use parking_lot::Mutex;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Session that only tracks bindings.
    #[derive(Clone, Default)]
    struct Bindings(Arc<Mutex<HashMap<String, Vec<Handler>>>>);

    impl Bindings {
        fn deliver(&self, channel: &str, payload: Value) {
            let handlers = self.0.lock().get(channel).cloned().unwrap_or_default();
            for handler in handlers {
                handler(payload.clone());
            }
        }
    }

    impl Session for Bindings {
        fn on(&self, channel: &str, handler: Handler) {
            self.0.lock().entry(channel.to_string()).or_default().push(handler);
        }

        fn off(&self, channel: &str) {
            self.0.lock().remove(channel);
        }

        fn start_dispatch(&self) {}

        async fn invoke(&self, _target: &str, _args: Vec<Value>) -> Result<Value, TransportError> {
            Ok(Value::Null)
        }

        fn on_close(&self, _callback: CloseCallback) {}

        async fn close(&self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn counter() -> (Arc<AtomicUsize>, Handler) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let handler: Handler = Arc::new(move |_: Value| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (count, handler)
    }

    #[test]
    fn last_registration_wins() {
        let (first, h1) = counter();
        let (second, h2) = counter();
        let mut registry = SubscriptionRegistry::new();
        registry.register("state", h1);
        registry.register("state", h2);
        assert_eq!(registry.len(), 1);

        let session = Bindings::default();
        registry.attach_all(&session);
        session.deliver("state", json!("started"));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn attach_twice_does_not_duplicate() {
        let (count, handler) = counter();
        let mut registry = SubscriptionRegistry::new();
        registry.register("iterations", handler);

        let session = Bindings::default();
        registry.attach_all(&session);
        registry.attach_all(&session);
        session.deliver("iterations", json!(3));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn attach_replaces_foreign_binding() {
        let (stale, stale_handler) = counter();
        let (count, handler) = counter();
        let session = Bindings::default();
        session.on("error", stale_handler);

        let mut registry = SubscriptionRegistry::new();
        registry.register("error", handler);
        registry.attach_all(&session);
        session.deliver("error", json!("boom"));
        assert_eq!(stale.load(Ordering::SeqCst), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clear_empties() {
        let (_, handler) = counter();
        let mut registry = SubscriptionRegistry::new();
        registry.register("state", handler);
        registry.clear();
        assert!(registry.is_empty());
        assert!(!registry.contains("state"));
    }
}
