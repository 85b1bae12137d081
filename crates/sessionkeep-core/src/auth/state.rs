//! In-memory authentication state with generation-stamped transitions.
//!
//! All mutation goes through the transition methods. Each state-changing
//! transition bumps the generation counter; asynchronous callers capture the
//! generation when they start and use the `*_if_current` variants so a stale
//! result can never overwrite a newer session.

use std::sync::{PoisonError, RwLock, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ErrorKind;
use crate::models::{TokenPair, UserRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Unauthenticated,
    Authenticated,
    Refreshing,
}

/// Owned copy of the session at one generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub user: Option<UserRecord>,
    #[serde(skip_serializing)]
    pub tokens: Option<TokenPair>,
    pub last_error: Option<ErrorKind>,
    pub generation: u64,
}

impl SessionSnapshot {
    fn initial() -> Self {
        Self {
            status: SessionStatus::Unauthenticated,
            user: None,
            tokens: None,
            last_error: None,
            generation: 0,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.status == SessionStatus::Authenticated
    }
}

pub struct SessionState {
    inner: RwLock<SessionSnapshot>,
}

impl SessionState {
    /// A fresh, unauthenticated session at generation 0.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(SessionSnapshot::initial()),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn generation(&self) -> u64 {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .generation
    }

    pub fn status(&self) -> SessionStatus {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .status
    }

    pub fn tokens(&self) -> Option<TokenPair> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .tokens
            .clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.tokens().map(|t| t.access)
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation() == generation
    }

    // ===== Transitions =====

    /// Adopt a persisted session. Authenticated only if an access token is present.
    pub fn restore(&self, user: Option<UserRecord>, tokens: Option<TokenPair>) -> u64 {
        let mut inner = self.write();
        apply_restore(&mut inner, user, tokens)
    }

    pub fn login(&self, user: UserRecord, tokens: TokenPair) -> u64 {
        let mut inner = self.write();
        inner.status = SessionStatus::Authenticated;
        inner.user = Some(user);
        inner.tokens = Some(tokens);
        inner.last_error = None;
        bump(&mut inner, "login")
    }

    /// Enter `Refreshing`. Re-entering while already refreshing is a no-op
    /// that returns the current generation.
    pub fn begin_refresh(&self) -> u64 {
        let mut inner = self.write();
        if inner.status == SessionStatus::Refreshing {
            return inner.generation;
        }
        inner.status = SessionStatus::Refreshing;
        bump(&mut inner, "begin_refresh")
    }

    pub fn complete_refresh(&self, tokens: TokenPair) -> u64 {
        let mut inner = self.write();
        apply_complete_refresh(&mut inner, tokens)
    }

    pub fn fail_refresh(&self, error: ErrorKind) -> u64 {
        let mut inner = self.write();
        apply_fail_refresh(&mut inner, error)
    }

    pub fn logout(&self) -> u64 {
        let mut inner = self.write();
        apply_logout(&mut inner)
    }

    // ===== Generation-guarded transitions =====

    /// `restore`, applied only if no transition happened since `expected`.
    pub fn restore_if_current(
        &self,
        expected: u64,
        user: Option<UserRecord>,
        tokens: Option<TokenPair>,
    ) -> Option<u64> {
        let mut inner = self.write();
        if inner.generation != expected {
            debug!(expected, current = inner.generation, "Discarding stale restore");
            return None;
        }
        Some(apply_restore(&mut inner, user, tokens))
    }

    /// `complete_refresh`, applied only if no transition happened since `expected`.
    pub fn complete_refresh_if_current(&self, expected: u64, tokens: TokenPair) -> Option<u64> {
        let mut inner = self.write();
        if inner.generation != expected {
            debug!(expected, current = inner.generation, "Discarding stale refresh result");
            return None;
        }
        Some(apply_complete_refresh(&mut inner, tokens))
    }

    /// `fail_refresh`, applied only if no transition happened since `expected`.
    pub fn fail_refresh_if_current(&self, expected: u64, error: ErrorKind) -> Option<u64> {
        let mut inner = self.write();
        if inner.generation != expected {
            debug!(expected, current = inner.generation, "Discarding stale refresh failure");
            return None;
        }
        Some(apply_fail_refresh(&mut inner, error))
    }

    /// `logout`, applied only if no transition happened since `expected`.
    pub fn logout_if_current(&self, expected: u64) -> Option<u64> {
        let mut inner = self.write();
        if inner.generation != expected {
            debug!(expected, current = inner.generation, "Discarding stale logout");
            return None;
        }
        Some(apply_logout(&mut inner))
    }

    /// `fail_refresh`, applied only while a refresh is still pending.
    ///
    /// Used when a caller gives up waiting on a refresh it does not own; a
    /// login or logout that already settled the session is left alone.
    pub fn fail_refresh_if_pending(&self, error: ErrorKind) -> Option<u64> {
        let mut inner = self.write();
        if inner.status != SessionStatus::Refreshing {
            return None;
        }
        Some(apply_fail_refresh(&mut inner, error))
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionSnapshot> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_restore(
    inner: &mut SessionSnapshot,
    user: Option<UserRecord>,
    tokens: Option<TokenPair>,
) -> u64 {
    let has_access = tokens.as_ref().is_some_and(|t| !t.access.is_empty());
    if has_access {
        inner.status = SessionStatus::Authenticated;
        inner.user = user;
        inner.tokens = tokens;
    } else {
        inner.status = SessionStatus::Unauthenticated;
        inner.user = None;
        inner.tokens = None;
    }
    bump(inner, "restore")
}

fn apply_complete_refresh(inner: &mut SessionSnapshot, tokens: TokenPair) -> u64 {
    inner.status = SessionStatus::Authenticated;
    inner.tokens = Some(tokens);
    inner.last_error = None;
    bump(inner, "complete_refresh")
}

fn apply_fail_refresh(inner: &mut SessionSnapshot, error: ErrorKind) -> u64 {
    inner.status = SessionStatus::Unauthenticated;
    inner.user = None;
    inner.tokens = None;
    inner.last_error = Some(error);
    bump(inner, "fail_refresh")
}

fn apply_logout(inner: &mut SessionSnapshot) -> u64 {
    inner.status = SessionStatus::Unauthenticated;
    inner.user = None;
    inner.tokens = None;
    inner.last_error = None;
    bump(inner, "logout")
}

fn bump(inner: &mut SessionSnapshot, transition: &'static str) -> u64 {
    inner.generation += 1;
    debug!(
        transition,
        generation = inner.generation,
        status = ?inner.status,
        "Session transition"
    );
    inner.generation
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pair(access: &str, refresh: &str) -> TokenPair {
        TokenPair::new(access, refresh).unwrap()
    }

    fn user() -> UserRecord {
        UserRecord::new(json!({"id": "u-1"}))
    }

    #[test]
    fn test_initial_state() {
        let state = SessionState::new();
        let snap = state.snapshot();
        assert_eq!(snap.status, SessionStatus::Unauthenticated);
        assert_eq!(snap.generation, 0);
        assert!(snap.tokens.is_none());
        assert!(snap.user.is_none());
    }

    #[test]
    fn test_every_transition_bumps_generation() {
        let state = SessionState::new();
        assert_eq!(state.restore(None, None), 1);
        assert_eq!(state.login(user(), pair("a1", "r1")), 2);
        assert_eq!(state.begin_refresh(), 3);
        assert_eq!(state.complete_refresh(pair("a2", "r2")), 4);
        assert_eq!(state.begin_refresh(), 5);
        assert_eq!(state.fail_refresh(ErrorKind::RefreshFailed), 6);
        assert_eq!(state.logout(), 7);
    }

    #[test]
    fn test_restore_requires_access_token() {
        let state = SessionState::new();
        state.restore(Some(user()), Some(pair("a1", "r1")));
        assert_eq!(state.status(), SessionStatus::Authenticated);

        let empty_access = TokenPair {
            access: String::new(),
            refresh: "r1".to_string(),
        };
        state.restore(Some(user()), Some(empty_access));
        let snap = state.snapshot();
        assert_eq!(snap.status, SessionStatus::Unauthenticated);
        assert!(snap.tokens.is_none());
    }

    #[test]
    fn test_begin_refresh_does_not_double_enter() {
        let state = SessionState::new();
        state.login(user(), pair("a1", "r1"));
        let first = state.begin_refresh();
        let second = state.begin_refresh();
        assert_eq!(first, second);
        assert_eq!(state.status(), SessionStatus::Refreshing);
    }

    #[test]
    fn test_login_clears_last_error() {
        let state = SessionState::new();
        state.fail_refresh(ErrorKind::RefreshFailed);
        assert_eq!(state.snapshot().last_error, Some(ErrorKind::RefreshFailed));

        state.login(user(), pair("a1", "r1"));
        assert_eq!(state.snapshot().last_error, None);
    }

    #[test]
    fn test_fail_refresh_clears_session() {
        let state = SessionState::new();
        state.login(user(), pair("a1", "r1"));
        state.begin_refresh();
        state.fail_refresh(ErrorKind::RefreshFailed);

        let snap = state.snapshot();
        assert_eq!(snap.status, SessionStatus::Unauthenticated);
        assert!(snap.user.is_none());
        assert!(snap.tokens.is_none());
        assert_eq!(snap.last_error, Some(ErrorKind::RefreshFailed));
    }

    #[test]
    fn test_logout_clears_everything() {
        let state = SessionState::new();
        state.fail_refresh(ErrorKind::Network);
        state.login(user(), pair("a1", "r1"));
        state.logout();

        let snap = state.snapshot();
        assert_eq!(snap.status, SessionStatus::Unauthenticated);
        assert!(snap.user.is_none());
        assert!(snap.tokens.is_none());
        assert!(snap.last_error.is_none());
    }

    #[test]
    fn test_stale_restore_is_discarded() {
        let state = SessionState::new();
        let started_at = state.generation();

        state.login(user(), pair("login-a", "login-r"));

        let applied = state.restore_if_current(started_at, None, Some(pair("boot-a", "boot-r")));
        assert_eq!(applied, None);
        assert_eq!(state.tokens(), Some(pair("login-a", "login-r")));
    }

    #[test]
    fn test_guarded_refresh_transitions() {
        let state = SessionState::new();
        state.login(user(), pair("a1", "r1"));
        let generation = state.begin_refresh();

        assert_eq!(
            state.complete_refresh_if_current(generation, pair("a2", "r2")),
            Some(generation + 1)
        );
        // Generation moved on; a late failure for the same refresh is ignored
        assert_eq!(
            state.fail_refresh_if_current(generation, ErrorKind::RefreshFailed),
            None
        );
        assert_eq!(state.status(), SessionStatus::Authenticated);
    }

    #[test]
    fn test_fail_refresh_if_pending() {
        let state = SessionState::new();
        state.login(user(), pair("a1", "r1"));
        assert_eq!(state.fail_refresh_if_pending(ErrorKind::Network), None);

        state.begin_refresh();
        assert!(state.fail_refresh_if_pending(ErrorKind::Network).is_some());
        assert_eq!(state.status(), SessionStatus::Unauthenticated);
    }

    #[test]
    fn test_logout_if_current() {
        let state = SessionState::new();
        let generation = state.login(user(), pair("a1", "r1"));
        let relogin = state.login(user(), pair("a2", "r2"));

        assert_eq!(state.logout_if_current(generation), None);
        assert_eq!(state.access_token().as_deref(), Some("a2"));

        assert_eq!(state.logout_if_current(relogin), Some(relogin + 1));
        assert!(state.tokens().is_none());
    }
}
