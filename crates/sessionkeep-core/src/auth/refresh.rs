//! Coalesced access-token refresh.
//!
//! At most one refresh is in flight per session. Callers that ask for a
//! refresh while one is running join it and observe the same outcome.
//! A refresh whose result arrives after a login or logout is discarded.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};

use super::context::SessionContext;
use super::events::SessionEvent;
use crate::api::AuthApi;
use crate::error::{ErrorKind, SessionError, SessionResult};
use crate::models::TokenPair;

/// Retry and timeout behavior for a refresh.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Attempts made for transient failures before giving up.
    pub max_retries: u32,
    /// Initial delay between retries in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    pub max_delay_ms: u64,
    /// Upper bound on the whole refresh, retries included.
    pub timeout: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 5000,
            timeout: Duration::from_secs(15),
        }
    }
}

impl RefreshConfig {
    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_ms = self
            .initial_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }
}

/// A refresh that was applied to the session.
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub tokens: TokenPair,
    /// Generation of the session after the new pair was adopted.
    pub generation: u64,
}

/// Cloneable failure shared by every waiter on a flight.
#[derive(Debug, Clone)]
enum RefreshFailure {
    Rejected(String),
    Superseded,
}

impl From<RefreshFailure> for SessionError {
    fn from(failure: RefreshFailure) -> Self {
        match failure {
            RefreshFailure::Rejected(reason) => SessionError::RefreshFailed(reason),
            RefreshFailure::Superseded => SessionError::Superseded,
        }
    }
}

type RefreshFlight = Shared<BoxFuture<'static, Result<RefreshOutcome, RefreshFailure>>>;

struct Inner {
    context: Arc<SessionContext>,
    api: Arc<dyn AuthApi>,
    config: RefreshConfig,
    in_flight: Mutex<Option<RefreshFlight>>,
}

/// Cheap to clone; clones share the same in-flight slot.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(context: Arc<SessionContext>, api: Arc<dyn AuthApi>, config: RefreshConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                context,
                api,
                config,
                in_flight: Mutex::new(None),
            }),
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.slot().is_some()
    }

    /// Refresh the access token, joining a refresh already in flight.
    ///
    /// On success the new pair is in the session state, persisted, and
    /// announced on `token-refreshed`. On failure the session is cleared,
    /// `auth-logout` is published once, and every waiter receives
    /// [`SessionError::RefreshFailed`]. If the session changed while the
    /// refresh was running, waiters receive [`SessionError::Superseded`] and
    /// nothing is applied.
    pub async fn request_refresh(&self) -> SessionResult<RefreshOutcome> {
        let flight = self.join_or_start();
        flight.await.map_err(SessionError::from)
    }

    fn join_or_start(&self) -> RefreshFlight {
        let mut slot = self.inner.slot();
        if let Some(flight) = slot.as_ref() {
            debug!("Joining in-flight token refresh");
            return flight.clone();
        }

        let inner = Arc::clone(&self.inner);
        let flight = async move {
            let result = inner.run().await;
            inner.slot().take();
            result
        }
        .boxed()
        .shared();
        *slot = Some(flight.clone());
        drop(slot);

        // Drive the flight to completion even if every waiter goes away.
        tokio::spawn(flight.clone());
        flight
    }
}

impl Inner {
    fn slot(&self) -> MutexGuard<'_, Option<RefreshFlight>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run(&self) -> Result<RefreshOutcome, RefreshFailure> {
        let generation = self.context.state.begin_refresh();

        let Some(refresh_token) = self.current_refresh_token() else {
            return Err(self.fail(generation, "no refresh token available".to_string()));
        };

        info!(generation, "Refreshing access token");
        let attempt = tokio::time::timeout(
            self.config.timeout,
            self.refresh_with_backoff(&refresh_token),
        )
        .await;

        match attempt {
            Ok(Ok(tokens)) => match tokens.validate() {
                Ok(()) => self.succeed(generation, tokens),
                Err(e) => Err(self.fail(generation, e.to_string())),
            },
            Ok(Err(e)) => Err(self.fail(generation, e.to_string())),
            Err(_) => {
                warn!(timeout_secs = self.config.timeout.as_secs(), "Token refresh timed out");
                Err(self.fail(generation, SessionError::Timeout.to_string()))
            }
        }
    }

    /// The refresh token in memory, falling back to the persisted pair
    /// before the session has been restored.
    fn current_refresh_token(&self) -> Option<String> {
        if let Some(tokens) = self.context.state.tokens() {
            return Some(tokens.refresh);
        }
        match self.context.store.load() {
            Ok(tokens) => tokens.map(|t| t.refresh),
            Err(e) => {
                warn!(error = %e, "Could not read persisted refresh token");
                None
            }
        }
    }

    async fn refresh_with_backoff(&self, refresh_token: &str) -> SessionResult<TokenPair> {
        let mut attempt = 0;
        loop {
            match self.api.refresh(refresh_token).await {
                Ok(tokens) => return Ok(tokens),
                Err(e) if e.is_transient() && attempt + 1 < self.config.max_retries => {
                    let delay = self.config.delay_for_attempt(attempt);
                    debug!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Refresh failed with transient error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_transient() {
                        warn!(attempts = attempt + 1, "Refresh retries exhausted");
                    }
                    return Err(e);
                }
            }
        }
    }

    fn succeed(&self, generation: u64, tokens: TokenPair) -> Result<RefreshOutcome, RefreshFailure> {
        let ctx = &self.context;
        let applied = {
            let _commit = ctx.commit();
            let Some(applied) = ctx.state.complete_refresh_if_current(generation, tokens.clone())
            else {
                info!("Session changed during refresh, discarding new tokens");
                return Err(RefreshFailure::Superseded);
            };
            if let Err(e) = ctx.store.save(&tokens) {
                warn!(error = %e, "Failed to persist refreshed tokens");
            }
            applied
        };

        ctx.events.publish(SessionEvent::TokenRefreshed(tokens.clone()));
        info!(generation = applied, access = %tokens.preview(), "Access token refreshed");

        Ok(RefreshOutcome {
            tokens,
            generation: applied,
        })
    }

    fn fail(&self, generation: u64, reason: String) -> RefreshFailure {
        let ctx = &self.context;
        {
            let _commit = ctx.commit();
            if ctx
                .state
                .fail_refresh_if_current(generation, ErrorKind::RefreshFailed)
                .is_none()
            {
                debug!(reason = %reason, "Session changed during refresh, ignoring failure");
                return RefreshFailure::Superseded;
            }
            ctx.discard_credentials();
        }

        warn!(reason = %reason, "Token refresh failed, session cleared");
        ctx.events.publish(SessionEvent::AuthLogout);
        RefreshFailure::Rejected(reason)
    }
}
