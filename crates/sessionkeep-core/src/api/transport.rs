//! Raw request dispatch.
//!
//! A [`Transport`] sends one [`ApiRequest`] and hands back whatever the
//! server answered, including authorization failures. Deciding what to do
//! about a 401 is the gateway's job, not the transport's.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::ApiError;
use crate::error::SessionResult;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the API base URL, e.g. `/me`.
    pub path: String,
    pub body: Option<Value>,
    /// Whether the gateway attaches the session's access token.
    pub authenticated: bool,
    /// Bearer token to send. Filled in by the gateway.
    pub bearer: Option<String>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            authenticated: true,
            bearer: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Mark the request as not requiring a session.
    pub fn public(mut self) -> Self {
        self.authenticated = false;
        self
    }

    pub(crate) fn with_bearer(&self, token: Option<String>) -> Self {
        Self {
            bearer: token,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED
    }

    /// Convert a non-success status into an [`ApiError`].
    pub fn error_for_status(self) -> SessionResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ApiError::from_status(self.status, &self.body).into())
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> SessionResult<T> {
        serde_json::from_str(&self.body).map_err(|e| {
            ApiError::InvalidResponse(format!(
                "{}: {}",
                e,
                ApiError::truncate_body(&self.body)
            ))
            .into()
        })
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> SessionResult<ApiResponse>;
}

#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> SessionResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn build(&self, request: &ApiRequest) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(request.method.clone(), self.url(&request.path))
            .header(header::ACCEPT, "application/json");
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        builder
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ApiRequest) -> SessionResult<ApiResponse> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            debug!(method = %request.method, path = %request.path, "Sending request");
            let response = self.build(request).send().await?;
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                retries += 1;
                if retries > MAX_RATE_LIMIT_RETRIES {
                    return Err(ApiError::RateLimited.into());
                }
                warn!(path = %request.path, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms *= 2; // Exponential backoff
                continue;
            }

            let body = response.text().await?;
            return Ok(ApiResponse::new(status, body));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_builders() {
        let request = ApiRequest::get("/me");
        assert_eq!(request.method, Method::GET);
        assert!(request.authenticated);
        assert!(request.bearer.is_none());

        let request = ApiRequest::post("/auth/login", json!({"login": "a"})).public();
        assert_eq!(request.method, Method::POST);
        assert!(!request.authenticated);
        assert_eq!(request.body, Some(json!({"login": "a"})));

        let bearer = request.with_bearer(Some("tok".to_string()));
        assert_eq!(bearer.bearer.as_deref(), Some("tok"));
        assert_eq!(bearer.path, "/auth/login");
    }

    #[test]
    fn test_response_helpers() {
        let ok = ApiResponse::new(StatusCode::OK, r#"{"id": 7}"#);
        assert!(ok.is_success());
        let value: Value = ok.json().unwrap();
        assert_eq!(value["id"], 7);

        let denied = ApiResponse::new(StatusCode::UNAUTHORIZED, "");
        assert!(denied.is_unauthorized());
        assert!(denied.error_for_status().is_err());

        let garbage = ApiResponse::new(StatusCode::OK, "not json");
        assert!(garbage.json::<Value>().is_err());
    }

    #[test]
    fn test_url() {
        let transport = HttpTransport::with_client(Client::new(), "https://api.example.com/");
        assert_eq!(transport.url("/me"), "https://api.example.com/me");
        assert_eq!(transport.url("me"), "https://api.example.com/me");
    }
}
