//! Durable key-value persistence for credentials and the cached user.
//!
//! This module provides:
//! - `KeyValueStore`: the host persistence service, one value per key
//! - `FileStore`, `KeyringStore`, `MemoryStore`: the available backends
//! - `TokenStore`: typed access to the session keys, no policy
//!
//! Every backend operation is atomic per key, so the token pair (stored as a
//! single JSON document) is never observed half-written.

pub mod backend;
pub mod error;
pub mod file;
pub mod keychain;
pub mod token_store;

pub use backend::{KeyValueStore, MemoryStore};
pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use keychain::KeyringStore;
pub use token_store::{
    TokenStore, REMEMBERED_EMAIL_KEY, SELECTED_WORKSPACE_KEY, TOKENS_KEY, USER_KEY,
};
