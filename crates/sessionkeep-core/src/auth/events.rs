//! Publish/subscribe channel for session notifications.
//!
//! The bus is an explicit, cloneable handle injected into whoever needs it.
//! Delivery is synchronous on the publishing task, in subscription order.
//! A handler that returns an error or panics is logged and skipped; the
//! remaining handlers still run.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::{debug, error};

use crate::models::TokenPair;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    TokenRefreshed,
    AuthError,
    AuthLogout,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A refresh succeeded; carries the new pair.
    TokenRefreshed(TokenPair),
    /// A gated request was still rejected after refreshing.
    AuthError,
    /// The session was cleared.
    AuthLogout,
}

impl SessionEvent {
    pub fn topic(&self) -> Topic {
        match self {
            SessionEvent::TokenRefreshed(_) => Topic::TokenRefreshed,
            SessionEvent::AuthError => Topic::AuthError,
            SessionEvent::AuthLogout => Topic::AuthLogout,
        }
    }
}

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

type Handler = Arc<dyn Fn(&SessionEvent) -> Result<(), HandlerError> + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    // Ids increase monotonically, so map order is subscription order.
    handlers: BTreeMap<u64, (Topic, Handler)>,
}

#[derive(Clone, Default)]
pub struct SessionEventBus {
    registry: Arc<Mutex<Registry>>,
}

impl SessionEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `topic`.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> Subscription
    where
        F: Fn(&SessionEvent) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.handlers.insert(id, (topic, Arc::new(handler)));
        debug!(id, ?topic, "Subscribed to session events");

        Subscription {
            registry: Arc::downgrade(&self.registry),
            id,
        }
    }

    /// Deliver `event` to every handler subscribed to its topic.
    ///
    /// Returns the number of handlers that completed successfully.
    pub fn publish(&self, event: SessionEvent) -> usize {
        let topic = event.topic();
        // Snapshot under the lock, call outside it, so handlers may
        // subscribe or unsubscribe without deadlocking.
        let handlers: Vec<(u64, Handler)> = {
            let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
            registry
                .handlers
                .iter()
                .filter(|(_, (t, _))| *t == topic)
                .map(|(id, (_, h))| (*id, Arc::clone(h)))
                .collect()
        };

        debug!(?topic, subscribers = handlers.len(), "Publishing session event");

        let mut delivered = 0;
        for (id, handler) in handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => error!(id, ?topic, error = %e, "Session event handler failed"),
                Err(_) => error!(id, ?topic, "Session event handler panicked"),
            }
        }
        delivered
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        registry.handlers.values().filter(|(t, _)| *t == topic).count()
    }
}

/// Handle returned by [`SessionEventBus::subscribe`].
///
/// The handler stays registered until [`Subscription::unsubscribe`] is called.
#[must_use = "dropping a Subscription keeps the handler registered; call unsubscribe() to remove it"]
pub struct Subscription {
    registry: Weak<Mutex<Registry>>,
    id: u64,
}

impl Subscription {
    /// Remove the handler. Returns false if the bus no longer exists.
    pub fn unsubscribe(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
        registry.handlers.remove(&self.id).is_some()
    }
}
