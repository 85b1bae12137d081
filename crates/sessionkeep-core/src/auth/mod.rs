//! Session lifecycle: state, refresh coordination, bootstrap and events.
//!
//! All components share one [`SessionContext`] behind an `Arc`. The
//! [`SessionManager`] wires them together for embedders.

pub mod bootstrap;
pub mod context;
pub mod events;
pub mod manager;
pub mod refresh;
pub mod state;
pub mod validity;

pub use bootstrap::BootstrapLoader;
pub use context::SessionContext;
pub use events::{HandlerError, SessionEvent, SessionEventBus, Subscription, Topic};
pub use manager::{SessionManager, SessionSettings};
pub use refresh::{RefreshConfig, RefreshCoordinator, RefreshOutcome};
pub use state::{SessionSnapshot, SessionState, SessionStatus};
pub use validity::{ExpiryValidator, PresenceValidator, TokenValidator};
