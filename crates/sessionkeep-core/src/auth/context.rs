use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{info, warn};

use super::events::{SessionEvent, SessionEventBus};
use super::state::SessionState;
use crate::storage::TokenStore;

/// The pieces of session state every component shares.
///
/// Constructed once per session and handed out behind an `Arc`; there is no
/// process-wide singleton, so tests build a fresh context each time.
pub struct SessionContext {
    pub store: TokenStore,
    pub state: SessionState,
    pub events: SessionEventBus,
    // Held across a state transition and the storage write that mirrors it,
    // so memory and storage always change together.
    commit: Mutex<()>,
}

impl SessionContext {
    pub fn new(store: TokenStore, events: SessionEventBus) -> Self {
        Self {
            store,
            state: SessionState::new(),
            events,
            commit: Mutex::new(()),
        }
    }

    /// Serialize a transition with its persistence.
    ///
    /// Only synchronous work may happen under the guard, and events must be
    /// published after it is dropped.
    pub(crate) fn commit(&self) -> MutexGuard<'_, ()> {
        self.commit.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clear every persisted key, reset the state and announce the logout.
    ///
    /// Storage failures are logged; the in-memory session is cleared regardless.
    pub fn end_session(&self) -> u64 {
        let generation = {
            let _commit = self.commit();
            self.clear_all_keys();
            self.state.logout()
        };
        self.events.publish(SessionEvent::AuthLogout);
        info!(generation, "Session ended");
        generation
    }

    /// `end_session`, but only if nothing changed the session since `generation`.
    ///
    /// Returns `None` when a login or logout got there first.
    pub(crate) fn end_session_if_current(&self, generation: u64) -> Option<u64> {
        let ended = {
            let _commit = self.commit();
            let ended = self.state.logout_if_current(generation)?;
            self.clear_all_keys();
            ended
        };
        self.events.publish(SessionEvent::AuthLogout);
        info!(generation = ended, "Session ended");
        Some(ended)
    }

    /// Drop the persisted credentials and cached user after a refresh failure.
    ///
    /// Callers hold the commit guard.
    pub(crate) fn discard_credentials(&self) {
        if let Err(e) = self.store.clear_session() {
            warn!(error = %e, "Failed to clear persisted credentials");
        }
    }

    fn clear_all_keys(&self) {
        if let Err(e) = self.store.clear_all() {
            warn!(error = %e, "Failed to clear persisted session during logout");
        }
    }
}
