//! Synchronous observer lists.
//!
//! Handlers run on the thread that calls [`Observers::notify`], in
//! subscription order, with no lock held. A handler may subscribe,
//! unsubscribe or notify re-entrantly.

use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct HandlerList<E> {
    next_id: u64,
    handlers: Vec<(u64, Handler<E>)>,
}

/// A list of handlers for events of type `E`
pub struct Observers<E> {
    inner: Arc<Mutex<HandlerList<E>>>,
}

impl<E: 'static> Observers<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HandlerList {
                next_id: 0,
                handlers: Vec::new(),
            })),
        }
    }

    /// Register `handler`; it stays registered until the returned
    /// [`Subscription`] is dropped.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = {
            let mut list = self.inner.lock();
            let id = list.next_id;
            list.next_id += 1;
            list.handlers.push((id, Arc::new(handler)));
            id
        };
        let weak: Weak<Mutex<HandlerList<E>>> = Arc::downgrade(&self.inner);
        Subscription {
            unsubscribe: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.lock().handlers.retain(|(h, _)| *h != id);
                }
            })),
        }
    }

    /// Invoke every handler registered at the time of the call
    pub fn notify(&self, event: &E) {
        let snapshot: Vec<Handler<E>> = self
            .inner
            .lock()
            .handlers
            .iter()
            .map(|(_, h)| h.clone())
            .collect();
        for handler in snapshot {
            handler(event);
        }
    }

    pub fn handler_count(&self) -> usize {
        self.inner.lock().handlers.len()
    }
}

impl<E: 'static> Default for Observers<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Observers<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Observers({})", self.inner.lock().handlers.len())
    }
}

/// Registration token; unsubscribes on drop
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Subscription")
    }
}

/// A mutation reported by a trackable instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// A member changed; `None` means any or all of them
    Member(Option<&'static str>),
    Add { index: usize },
    Remove { index: usize },
    Replace { index: usize },
    Move { from: usize, to: usize },
    /// The collection was rebuilt wholesale
    Reset,
}

/// Change notifications of one instance
pub type Notifier = Observers<Change>;
