//! Application callback slots.
//!
//! Handlers are swappable at any time, including from inside a callback. An
//! empty slot is a valid state: deliveries to it are silently skipped.

use linkcore::ClientError;
use std::sync::{Arc, PoisonError, RwLock};

pub type ResponseHandler = Arc<dyn Fn(String) + Send + Sync>;
pub type ConnectionHandler = Arc<dyn Fn(bool) + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(&ClientError) + Send + Sync>;

struct Slot<T: ?Sized>(RwLock<Option<Arc<T>>>);

impl<T: ?Sized> Slot<T> {
    fn empty() -> Self {
        Self(RwLock::new(None))
    }

    fn set(&self, handler: Option<Arc<T>>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = handler;
    }

    // Cloned out so the lock is not held while user code runs.
    fn get(&self) -> Option<Arc<T>> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

pub(crate) struct Handlers {
    response: Slot<dyn Fn(String) + Send + Sync>,
    connection: Slot<dyn Fn(bool) + Send + Sync>,
    error: Slot<dyn Fn(&ClientError) + Send + Sync>,
}

impl Handlers {
    pub(crate) fn new() -> Self {
        Self {
            response: Slot::empty(),
            connection: Slot::empty(),
            error: Slot::empty(),
        }
    }

    pub(crate) fn set_response(&self, handler: Option<ResponseHandler>) {
        self.response.set(handler);
    }

    pub(crate) fn set_connection(&self, handler: Option<ConnectionHandler>) {
        self.connection.set(handler);
    }

    pub(crate) fn set_error(&self, handler: Option<ErrorHandler>) {
        self.error.set(handler);
    }

    pub(crate) fn response(&self, text: String) {
        if let Some(handler) = self.response.get() {
            handler(text);
        }
    }

    pub(crate) fn connection(&self, success: bool) {
        if let Some(handler) = self.connection.get() {
            handler(success);
        }
    }

    pub(crate) fn error(&self, err: &ClientError) {
        if let Some(handler) = self.error.get() {
            handler(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn empty_slots_are_no_ops() {
        let handlers = Handlers::new();
        handlers.response("ignored".into());
        handlers.connection(true);
        handlers.error(&ClientError::NotConnected);
    }

    #[test]
    fn handler_can_replace_itself() {
        let handlers = Arc::new(Handlers::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let inner = handlers.clone();
        let log = seen.clone();
        handlers.set_response(Some(Arc::new(move |text: String| {
            log.lock().unwrap().push(format!("first:{text}"));
            let log = log.clone();
            inner.set_response(Some(Arc::new(move |text: String| {
                log.lock().unwrap().push(format!("second:{text}"));
            })));
        })));

        handlers.response("a".into());
        handlers.response("b".into());
        handlers.set_response(None);
        handlers.response("c".into());

        assert_eq!(*seen.lock().unwrap(), vec!["first:a", "second:b"]);
    }
}
