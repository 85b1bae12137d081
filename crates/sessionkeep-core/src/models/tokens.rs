use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SessionError, SessionResult};

/// Number of characters shown when a token is logged or printed.
const PREVIEW_CHARS: usize = 6;

/// Access and refresh bearer credentials.
///
/// Both halves are opaque to the client. A pair is only ever stored or held
/// with both halves present; use [`TokenPair::new`] or [`TokenPair::validate`]
/// at any boundary where a pair enters the session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

impl TokenPair {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> SessionResult<Self> {
        let pair = Self {
            access: access.into(),
            refresh: refresh.into(),
        };
        pair.validate()?;
        Ok(pair)
    }

    /// Reject pairs with a missing half.
    pub fn validate(&self) -> SessionResult<()> {
        match (self.access.is_empty(), self.refresh.is_empty()) {
            (false, false) => Ok(()),
            (true, true) => Err(SessionError::InvalidTokenPair(
                "access and refresh tokens are both empty".to_string(),
            )),
            (true, false) => Err(SessionError::InvalidTokenPair(
                "access token is empty".to_string(),
            )),
            (false, true) => Err(SessionError::InvalidTokenPair(
                "refresh token is empty".to_string(),
            )),
        }
    }

    /// Expiry of the access token, if it is a JWT carrying an `exp` claim.
    ///
    /// Opaque (non-JWT) tokens return `None`.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let payload = self.access.split('.').nth(1)?;
        let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
        let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
        let exp = claims.get("exp")?.as_i64()?;
        DateTime::from_timestamp(exp, 0)
    }

    /// Short prefix of the access token, safe for logs.
    pub fn preview(&self) -> String {
        preview(&self.access)
    }
}

// Never print full credentials, even in debug output.
impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access", &preview(&self.access))
            .field("refresh", &preview(&self.refresh))
            .finish()
    }
}

fn preview(token: &str) -> String {
    if token.chars().count() <= PREVIEW_CHARS {
        token.to_string()
    } else {
        let head: String = token.chars().take(PREVIEW_CHARS).collect();
        format!("{}…", head)
    }
}
