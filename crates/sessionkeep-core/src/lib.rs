//! Token lifecycle and session coordination.
//!
//! `sessionkeep-core` keeps an authenticated client session alive: it
//! persists an access/refresh token pair, restores it at startup, attaches
//! the access token to outgoing requests, refreshes it exactly once when
//! concurrent requests find it expired, and broadcasts session changes.
//!
//! The usual entry point is [`SessionManager`]:
//!
//! ```no_run
//! # async fn run() -> Result<(), sessionkeep_core::SessionError> {
//! use sessionkeep_core::{ApiRequest, Config, SessionManager, Topic};
//!
//! let manager = SessionManager::from_config(&Config::load()?)?;
//! let _logout = manager.events().subscribe(Topic::AuthLogout, |_| {
//!     println!("signed out");
//!     Ok(())
//! });
//!
//! if !manager.bootstrap().await.is_authenticated() {
//!     manager.login("user@example.com", "secret", true).await?;
//! }
//! let me = manager.gateway().send(ApiRequest::get("/me")).await?;
//! println!("{}", me.body);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod storage;

pub use api::{ApiError, ApiRequest, ApiResponse, AuthApi, LoginResponse, RequestGateway, Transport};
pub use auth::{
    BootstrapLoader, ExpiryValidator, PresenceValidator, RefreshConfig, RefreshCoordinator,
    RefreshOutcome, SessionContext, SessionEvent, SessionEventBus, SessionManager,
    SessionSettings, SessionSnapshot, SessionState, SessionStatus, Subscription, Topic,
    TokenValidator,
};
pub use config::Config;
pub use error::{ErrorKind, SessionError, SessionResult};
pub use models::{TokenPair, UserRecord};
pub use storage::{KeyValueStore, MemoryStore, TokenStore};
