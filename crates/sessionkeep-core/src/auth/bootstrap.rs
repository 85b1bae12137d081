//! Restoring a persisted session at startup.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::context::SessionContext;
use super::refresh::RefreshCoordinator;
use super::state::{SessionSnapshot, SessionStatus};
use super::validity::TokenValidator;
use crate::error::{ErrorKind, SessionError, SessionResult};

/// Runs once per process and never fails: anything that goes wrong settles
/// the session as unauthenticated with persisted credentials cleared.
pub struct BootstrapLoader {
    context: Arc<SessionContext>,
    coordinator: RefreshCoordinator,
    validator: Arc<dyn TokenValidator>,
    timeout: Duration,
    settled: OnceCell<SessionSnapshot>,
}

impl BootstrapLoader {
    pub fn new(
        context: Arc<SessionContext>,
        coordinator: RefreshCoordinator,
        validator: Arc<dyn TokenValidator>,
        timeout: Duration,
    ) -> Self {
        Self {
            context,
            coordinator,
            validator,
            timeout,
            settled: OnceCell::new(),
        }
    }

    /// Reconcile persisted tokens with the in-memory session.
    ///
    /// A login or logout that happens while this is running wins; the
    /// loader's own result is dropped. Only the first call does any work;
    /// later calls, including overlapping ones, wait for it and return the
    /// same settled snapshot.
    pub async fn run(&self) -> SessionSnapshot {
        self.settled.get_or_init(|| self.settle()).await.clone()
    }

    async fn settle(&self) -> SessionSnapshot {
        let generation = self.context.state.generation();
        if let Err(e) = self.reconcile(generation).await {
            warn!(error = %e, "Could not restore session, starting signed out");
            self.fall_back(generation);
        }

        let snapshot = self.context.state.snapshot();
        info!(
            status = ?snapshot.status,
            generation = snapshot.generation,
            "Session bootstrap settled"
        );
        snapshot
    }

    async fn reconcile(&self, generation: u64) -> SessionResult<()> {
        let ctx = &self.context;
        let tokens = ctx.store.load()?;
        let user = ctx.store.load_user()?;

        let Some(tokens) = tokens else {
            debug!("No persisted session");
            return Ok(());
        };

        if self.validator.is_valid(&tokens) {
            if ctx.state.restore_if_current(generation, user, Some(tokens)).is_some() {
                info!("Restored persisted session");
            }
            return Ok(());
        }

        if !ctx.state.is_current(generation) {
            debug!("Session changed before refresh, skipping");
            return Ok(());
        }

        info!("Persisted access token is no longer valid, refreshing");
        match tokio::time::timeout(self.timeout, self.coordinator.request_refresh()).await {
            Ok(Ok(outcome)) => {
                // The refresh adopted the tokens; bring the cached user along.
                ctx.state
                    .restore_if_current(outcome.generation, user, Some(outcome.tokens));
                Ok(())
            }
            Ok(Err(SessionError::Superseded)) => {
                debug!("Session changed during bootstrap refresh");
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SessionError::Timeout),
        }
    }

    fn fall_back(&self, generation: u64) {
        let ctx = &self.context;
        let _commit = ctx.commit();
        let settled = if ctx.state.status() == SessionStatus::Refreshing {
            // The refresh keeps running; its result will be discarded.
            ctx.state.fail_refresh_if_pending(ErrorKind::Network)
        } else {
            ctx.state.restore_if_current(generation, None, None)
        };

        if settled.is_some() {
            ctx.discard_credentials();
        }
    }
}
