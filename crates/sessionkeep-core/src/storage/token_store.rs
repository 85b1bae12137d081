use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::{KeyValueStore, StorageError};
use crate::error::{SessionError, SessionResult};
use crate::models::{TokenPair, UserRecord};

/// Key holding the `{ access, refresh }` JSON document
pub const TOKENS_KEY: &str = "tokens";

/// Key holding the cached user record
pub const USER_KEY: &str = "user";

/// Key holding the login remembered for the next sign-in (plain string)
pub const REMEMBERED_EMAIL_KEY: &str = "rememberedEmail";

/// Key owned by the workspace-selection collaborator; cleared on logout
pub const SELECTED_WORKSPACE_KEY: &str = "selectedWorkspace";

/// Lenient view of the persisted pair so a half-written record is reported
/// as `InvalidTokenPair` instead of a parse failure.
#[derive(Debug, Deserialize)]
struct StoredTokens {
    #[serde(default)]
    access: Option<String>,
    #[serde(default)]
    refresh: Option<String>,
}

/// Typed persistence for the session keys.
///
/// Pure storage: no network access and no session policy. Clone is cheap.
#[derive(Clone)]
pub struct TokenStore {
    backend: Arc<dyn KeyValueStore>,
}

impl TokenStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    // ===== Tokens =====

    /// Persist a complete pair, replacing any previous one.
    pub fn save(&self, pair: &TokenPair) -> SessionResult<()> {
        pair.validate()?;
        let contents = serde_json::to_string(pair).map_err(StorageError::from)?;
        self.backend.set(TOKENS_KEY, &contents)?;
        debug!(access = %pair.preview(), "Token pair saved");
        Ok(())
    }

    /// Load the persisted pair.
    ///
    /// Returns `Ok(None)` when nothing (or an empty record) is stored and
    /// `InvalidTokenPair` when only one half is present.
    pub fn load(&self) -> SessionResult<Option<TokenPair>> {
        let Some(contents) = self.backend.get(TOKENS_KEY)? else {
            return Ok(None);
        };

        let stored: StoredTokens = serde_json::from_str(&contents).map_err(StorageError::from)?;
        let access = stored.access.filter(|s| !s.is_empty());
        let refresh = stored.refresh.filter(|s| !s.is_empty());

        match (access, refresh) {
            (Some(access), Some(refresh)) => Ok(Some(TokenPair { access, refresh })),
            (None, None) => Ok(None),
            (access, refresh) => {
                warn!(
                    has_access = access.is_some(),
                    has_refresh = refresh.is_some(),
                    "Persisted token pair is half-populated"
                );
                Err(SessionError::InvalidTokenPair(
                    "persisted token pair is missing a half".to_string(),
                ))
            }
        }
    }

    pub fn clear(&self) -> SessionResult<()> {
        self.backend.remove(TOKENS_KEY)?;
        Ok(())
    }

    // ===== User =====

    pub fn save_user(&self, user: &UserRecord) -> SessionResult<()> {
        let contents = serde_json::to_string(user).map_err(StorageError::from)?;
        self.backend.set(USER_KEY, &contents)?;
        Ok(())
    }

    pub fn load_user(&self) -> SessionResult<Option<UserRecord>> {
        match self.backend.get(USER_KEY)? {
            Some(contents) => {
                let user = serde_json::from_str(&contents).map_err(StorageError::from)?;
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    pub fn clear_user(&self) -> SessionResult<()> {
        self.backend.remove(USER_KEY)?;
        Ok(())
    }

    // ===== Remembered email =====

    pub fn save_remembered_email(&self, email: &str) -> SessionResult<()> {
        self.backend.set(REMEMBERED_EMAIL_KEY, email)?;
        Ok(())
    }

    pub fn load_remembered_email(&self) -> SessionResult<Option<String>> {
        Ok(self.backend.get(REMEMBERED_EMAIL_KEY)?)
    }

    pub fn clear_remembered_email(&self) -> SessionResult<()> {
        self.backend.remove(REMEMBERED_EMAIL_KEY)?;
        Ok(())
    }

    // ===== Selected workspace =====

    pub fn save_selected_workspace(&self, workspace: &Value) -> SessionResult<()> {
        let contents = serde_json::to_string(workspace).map_err(StorageError::from)?;
        self.backend.set(SELECTED_WORKSPACE_KEY, &contents)?;
        Ok(())
    }

    pub fn load_selected_workspace(&self) -> SessionResult<Option<Value>> {
        match self.backend.get(SELECTED_WORKSPACE_KEY)? {
            Some(contents) => {
                let value = serde_json::from_str(&contents).map_err(StorageError::from)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub fn clear_selected_workspace(&self) -> SessionResult<()> {
        self.backend.remove(SELECTED_WORKSPACE_KEY)?;
        Ok(())
    }

    /// Remove the credential pair and cached user.
    pub fn clear_session(&self) -> SessionResult<()> {
        self.clear()?;
        self.clear_user()
    }

    /// Remove every key the session owns or is responsible for clearing.
    ///
    /// Attempts every key even if one fails, returning the first error.
    pub fn clear_all(&self) -> SessionResult<()> {
        let mut first_error = None;
        for key in [TOKENS_KEY, USER_KEY, REMEMBERED_EMAIL_KEY, SELECTED_WORKSPACE_KEY] {
            if let Err(e) = self.backend.remove(key) {
                warn!(key = key, error = %e, "Failed to clear persisted key");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}
