//! Credential and profile types carried through the session.
//!
//! - `TokenPair`: the access/refresh bearer strings, always set together
//! - `UserRecord`: the opaque profile the server returns at login

pub mod tokens;
pub mod user;

pub use tokens::TokenPair;
pub use user::UserRecord;
