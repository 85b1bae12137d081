//! Rules deciding whether persisted tokens can be used without a refresh.

use chrono::{DateTime, Duration, Utc};

use crate::models::TokenPair;

pub trait TokenValidator: Send + Sync {
    fn is_valid(&self, tokens: &TokenPair) -> bool;
}

impl<F> TokenValidator for F
where
    F: Fn(&TokenPair) -> bool + Send + Sync,
{
    fn is_valid(&self, tokens: &TokenPair) -> bool {
        self(tokens)
    }
}

/// Any non-empty access token is usable; expiry is discovered by the
/// server rejecting it.
#[derive(Debug, Clone, Copy, Default)]
pub struct PresenceValidator;

impl TokenValidator for PresenceValidator {
    fn is_valid(&self, tokens: &TokenPair) -> bool {
        !tokens.access.is_empty()
    }
}

/// Reads the `exp` claim of JWT access tokens and treats a token as expired
/// `skew` before its actual expiry. Opaque tokens fall back to presence.
/// A skew that pushes the clock past the representable range makes every
/// JWT count as expired.
#[derive(Debug, Clone, Copy)]
pub struct ExpiryValidator {
    pub skew: Duration,
}

impl ExpiryValidator {
    pub fn new(skew: Duration) -> Self {
        Self { skew }
    }

    pub fn is_valid_at(&self, tokens: &TokenPair, now: DateTime<Utc>) -> bool {
        if tokens.access.is_empty() {
            return false;
        }
        match tokens.expires_at() {
            Some(expires_at) => now
                .checked_add_signed(self.skew)
                .is_some_and(|deadline| deadline < expires_at),
            None => true,
        }
    }
}

impl Default for ExpiryValidator {
    fn default() -> Self {
        Self::new(Duration::seconds(60))
    }
}

impl TokenValidator for ExpiryValidator {
    fn is_valid(&self, tokens: &TokenPair) -> bool {
        self.is_valid_at(tokens, Utc::now())
    }
}
