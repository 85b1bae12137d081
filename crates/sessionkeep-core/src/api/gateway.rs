//! Authenticated request dispatch.

use std::sync::Arc;

use tracing::{debug, warn};

use super::transport::{ApiRequest, ApiResponse, Transport};
use crate::auth::{RefreshCoordinator, SessionContext, SessionEvent, SessionStatus};
use crate::error::{SessionError, SessionResult};

/// Attaches the current access token to gated requests and recovers from
/// an expired one.
///
/// A 401 triggers a coordinated refresh and exactly one retry with the new
/// token. If the retry is also rejected, `auth-error` is published and the
/// session is ended.
#[derive(Clone)]
pub struct RequestGateway {
    transport: Arc<dyn Transport>,
    context: Arc<SessionContext>,
    coordinator: RefreshCoordinator,
}

impl RequestGateway {
    pub fn new(
        transport: Arc<dyn Transport>,
        context: Arc<SessionContext>,
        coordinator: RefreshCoordinator,
    ) -> Self {
        Self {
            transport,
            context,
            coordinator,
        }
    }

    pub async fn send(&self, request: ApiRequest) -> SessionResult<ApiResponse> {
        if !request.authenticated {
            return self.dispatch(&request).await;
        }

        let sent = self.context.state.access_token();
        let response = self.dispatch(&request.with_bearer(sent.clone())).await?;
        if !response.is_unauthorized() {
            return Ok(response);
        }

        debug!(path = %request.path, "Request unauthorized, refreshing token");
        let fresh = self.fresh_token(sent.as_deref()).await?;
        let generation = self.context.state.generation();

        let retried = self.dispatch(&request.with_bearer(Some(fresh))).await?;
        if !retried.is_unauthorized() {
            return Ok(retried);
        }

        warn!(path = %request.path, "Request still unauthorized after token refresh");
        self.context.events.publish(SessionEvent::AuthError);
        if self.context.end_session_if_current(generation).is_none() {
            debug!("Session changed during retry, leaving it in place");
        }
        Err(SessionError::Unauthorized)
    }

    /// Convenience wrapper: send, reject non-success statuses, decode JSON.
    pub async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        request: ApiRequest,
    ) -> SessionResult<T> {
        self.send(request).await?.error_for_status()?.json()
    }

    /// Token to retry with after `sent` was rejected.
    async fn fresh_token(&self, sent: Option<&str>) -> SessionResult<String> {
        // Another request may already have rotated the token.
        if self.context.state.status() == SessionStatus::Authenticated {
            if let Some(current) = self.context.state.access_token() {
                if sent != Some(current.as_str()) {
                    debug!("Token already rotated, retrying without refresh");
                    return Ok(current);
                }
            }
        }

        match self.coordinator.request_refresh().await {
            Ok(outcome) => Ok(outcome.tokens.access),
            Err(SessionError::Superseded) => self
                .context
                .state
                .access_token()
                .ok_or(SessionError::Unauthorized),
            Err(e) => Err(e),
        }
    }

    /// Send once, retrying a single time on a connection failure.
    /// Rate limiting is already handled by the transport.
    async fn dispatch(&self, request: &ApiRequest) -> SessionResult<ApiResponse> {
        match self.transport.send(request).await {
            Err(e @ (SessionError::Network(_) | SessionError::Timeout)) => {
                debug!(path = %request.path, error = %e, "Transient failure, retrying once");
                self.transport.send(request).await
            }
            other => other,
        }
    }
}
