//! REST plumbing for the remote authentication service.
//!
//! This module provides:
//! - `AuthApi` / `HttpAuthApi`: the login and refresh endpoints
//! - `Transport` / `HttpTransport`: raw request dispatch with bearer tokens
//! - `RequestGateway`: authenticated dispatch with coordinated refresh and
//!   a single retry on authorization failure

pub mod client;
pub mod error;
pub mod gateway;
pub mod transport;

pub use client::{AuthApi, HttpAuthApi, LoginResponse};
pub use error::ApiError;
pub use gateway::RequestGateway;
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
