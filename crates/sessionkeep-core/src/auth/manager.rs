//! One-stop facade wiring every session component together.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use super::bootstrap::BootstrapLoader;
use super::context::SessionContext;
use super::events::SessionEventBus;
use super::refresh::{RefreshConfig, RefreshCoordinator};
use super::state::SessionSnapshot;
use super::validity::{ExpiryValidator, TokenValidator};
use crate::api::{AuthApi, HttpAuthApi, HttpTransport, LoginResponse, RequestGateway, Transport};
use crate::config::{Config, StorageKind};
use crate::error::{SessionError, SessionResult};
use crate::models::TokenPair;
use crate::storage::{FileStore, KeyValueStore, KeyringStore, TokenStore};

/// Tunables for a [`SessionManager`].
#[derive(Clone)]
pub struct SessionSettings {
    pub refresh: RefreshConfig,
    pub bootstrap_timeout: Duration,
    pub validator: Arc<dyn TokenValidator>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            refresh: RefreshConfig::default(),
            bootstrap_timeout: Duration::from_secs(20),
            validator: Arc::new(ExpiryValidator::default()),
        }
    }
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            refresh: RefreshConfig {
                timeout: config.refresh_timeout(),
                ..RefreshConfig::default()
            },
            bootstrap_timeout: config.bootstrap_timeout(),
            validator: Arc::new(ExpiryValidator::new(config.expiry_skew())),
        }
    }
}

pub struct SessionManager {
    context: Arc<SessionContext>,
    api: Arc<dyn AuthApi>,
    coordinator: RefreshCoordinator,
    bootstrap: BootstrapLoader,
    gateway: RequestGateway,
}

impl SessionManager {
    pub fn new(
        backend: Arc<dyn KeyValueStore>,
        api: Arc<dyn AuthApi>,
        transport: Arc<dyn Transport>,
        settings: SessionSettings,
    ) -> Self {
        let context = Arc::new(SessionContext::new(
            TokenStore::new(backend),
            SessionEventBus::new(),
        ));
        let coordinator =
            RefreshCoordinator::new(Arc::clone(&context), Arc::clone(&api), settings.refresh);
        let bootstrap = BootstrapLoader::new(
            Arc::clone(&context),
            coordinator.clone(),
            settings.validator,
            settings.bootstrap_timeout,
        );
        let gateway = RequestGateway::new(transport, Arc::clone(&context), coordinator.clone());

        Self {
            context,
            api,
            coordinator,
            bootstrap,
            gateway,
        }
    }

    /// Build a manager talking HTTP to `config.api_base_url`, persisting to
    /// the configured backend.
    pub fn from_config(config: &Config) -> SessionResult<Self> {
        let backend: Arc<dyn KeyValueStore> = match config.storage {
            StorageKind::File => Arc::new(FileStore::new(config.data_dir()?.join("session"))?),
            StorageKind::Keyring => Arc::new(KeyringStore::new()),
        };
        let api = HttpAuthApi::new(&config.api_base_url, config.request_timeout())?;
        let transport = HttpTransport::new(&config.api_base_url, config.request_timeout())?;
        info!(
            api = %config.api_base_url,
            storage = ?config.storage,
            "Session manager configured"
        );

        Ok(Self::new(
            backend,
            Arc::new(api),
            Arc::new(transport),
            SessionSettings::from_config(config),
        ))
    }

    /// Restore any persisted session.
    ///
    /// Every call, including ones made while the first is still running,
    /// resolves with the settled result of that first run.
    pub async fn bootstrap(&self) -> SessionSnapshot {
        self.bootstrap.run().await
    }

    /// Authenticate with credentials and adopt the resulting session.
    ///
    /// On failure the session and storage are left as they were.
    pub async fn login(
        &self,
        login: &str,
        password: &str,
        remember: bool,
    ) -> SessionResult<SessionSnapshot> {
        if login.trim().is_empty() || password.is_empty() {
            return Err(SessionError::InvalidCredentials(
                "login and password required".to_string(),
            ));
        }

        let LoginResponse { user, tokens } = match self.api.login(login, password).await {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "Login failed");
                return Err(e);
            }
        };
        tokens.validate()?;

        let _commit = self.context.commit();
        let store = &self.context.store;
        if let Err(e) = store.save(&tokens) {
            warn!(error = %e, "Failed to persist tokens");
        }
        if let Err(e) = store.save_user(&user) {
            warn!(error = %e, "Failed to persist user");
        }
        let remembered = if remember {
            store.save_remembered_email(login)
        } else {
            store.clear_remembered_email()
        };
        if let Err(e) = remembered {
            warn!(error = %e, "Failed to update remembered email");
        }

        let generation = self.context.state.login(user, tokens);
        info!(generation, "Login successful");
        Ok(self.context.state.snapshot())
    }

    /// Clear every persisted key and announce `auth-logout`.
    pub fn logout(&self) -> SessionSnapshot {
        self.context.end_session();
        self.context.state.snapshot()
    }

    /// Force a refresh, joining one already in flight.
    pub async fn refresh(&self) -> SessionResult<TokenPair> {
        self.coordinator
            .request_refresh()
            .await
            .map(|outcome| outcome.tokens)
    }

    pub fn gateway(&self) -> &RequestGateway {
        &self.gateway
    }

    pub fn events(&self) -> &SessionEventBus {
        &self.context.events
    }

    pub fn store(&self) -> &TokenStore {
        &self.context.store
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.context.state.snapshot()
    }

    pub fn is_authenticated(&self) -> bool {
        self.context.state.snapshot().is_authenticated()
    }

    pub fn remembered_email(&self) -> Option<String> {
        match self.context.store.load_remembered_email() {
            Ok(email) => email,
            Err(e) => {
                warn!(error = %e, "Failed to read remembered email");
                None
            }
        }
    }

    pub fn has_selected_workspace(&self) -> bool {
        match self.context.store.load_selected_workspace() {
            Ok(workspace) => workspace.is_some(),
            Err(e) => {
                warn!(error = %e, "Failed to read selected workspace");
                false
            }
        }
    }
}
