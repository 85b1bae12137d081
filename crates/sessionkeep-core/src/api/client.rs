//! Client for the login and refresh endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::ApiError;
use crate::error::{SessionError, SessionResult};
use crate::models::{TokenPair, UserRecord};

/// Path of the credential login endpoint, relative to the base URL
const LOGIN_PATH: &str = "/auth/login";

/// Path of the token refresh endpoint, relative to the base URL
const REFRESH_PATH: &str = "/auth/refresh";

/// Result of a successful login.
#[derive(Debug, Clone)]
pub struct LoginResponse {
    pub user: UserRecord,
    pub tokens: TokenPair,
}

/// The remote authentication service.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Exchange credentials for a session.
    ///
    /// Rejected credentials surface as [`SessionError::InvalidCredentials`].
    async fn login(&self, login: &str, password: &str) -> SessionResult<LoginResponse>;

    /// Exchange a refresh token for a new pair.
    ///
    /// A rejected or expired refresh token surfaces as
    /// [`SessionError::RefreshFailed`]; the returned pair replaces the old
    /// one wholesale.
    async fn refresh(&self, refresh_token: &str) -> SessionResult<TokenPair>;
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    login: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginBody {
    user: UserRecord,
    access: String,
    refresh: String,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefreshBody {
    access: String,
    refresh: String,
}

/// `AuthApi` over HTTP.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpAuthApi {
    client: Client,
    base_url: String,
}

impl HttpAuthApi {
    pub fn new(base_url: &str, timeout: Duration) -> SessionResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Share an existing connection pool.
    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn is_rejection(status: StatusCode) -> bool {
        matches!(status.as_u16(), 400 | 401 | 403)
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn login(&self, login: &str, password: &str) -> SessionResult<LoginResponse> {
        let url = self.url(LOGIN_PATH);
        debug!(url = %url, login = login, "Sending login request");

        let response = self
            .client
            .post(&url)
            .json(&LoginRequest { login, password })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "Login rejected");
            if Self::is_rejection(status) {
                return Err(SessionError::InvalidCredentials(ApiError::truncate_body(&body)));
            }
            return Err(ApiError::from_status(status, &body).into());
        }

        let body: LoginBody = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("login response: {}", e)))?;

        Ok(LoginResponse {
            user: body.user,
            tokens: TokenPair::new(body.access, body.refresh)?,
        })
    }

    async fn refresh(&self, refresh_token: &str) -> SessionResult<TokenPair> {
        let url = self.url(REFRESH_PATH);
        debug!(url = %url, "Sending refresh request");

        let response = self
            .client
            .post(&url)
            .json(&RefreshRequest {
                refresh: refresh_token,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "Refresh rejected");
            if Self::is_rejection(status) {
                return Err(SessionError::RefreshFailed(format!(
                    "refresh token rejected (HTTP {})",
                    status.as_u16()
                )));
            }
            return Err(ApiError::from_status(status, &body).into());
        }

        let body: RefreshBody = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("refresh response: {}", e)))?;

        TokenPair::new(body.access, body.refresh)
    }
}
