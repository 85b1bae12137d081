#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use sessionkeep_core::storage::{StorageResult, TOKENS_KEY};
use sessionkeep_core::{
    ApiRequest, ApiResponse, AuthApi, KeyValueStore, LoginResponse, MemoryStore, RefreshConfig,
    SessionError, SessionEvent, SessionManager, SessionResult, SessionSettings, Subscription,
    TokenPair, Topic, Transport, UserRecord,
};
use tokio::sync::Notify;

pub const PASSWORD: &str = "correct horse";

pub fn pair(access: &str, refresh: &str) -> TokenPair {
    TokenPair::new(access, refresh).expect("valid pair")
}

pub fn user(email: &str) -> UserRecord {
    UserRecord::new(json!({"id": "u-1", "email": email, "name": "Test User"}))
}

/// What the fake server answers to a refresh.
#[derive(Clone)]
pub enum RefreshReply {
    Issue(TokenPair),
    Reject,
    NetworkDown,
}

/// Scripted authentication service that counts calls.
///
/// With `hold_refresh` set, a refresh blocks until `release_refresh` is
/// called, so tests can interleave other operations with it.
pub struct FakeAuthApi {
    pub login_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub login_tokens: Mutex<TokenPair>,
    refresh_reply: Mutex<RefreshReply>,
    hold: AtomicBool,
    gate: Notify,
    started: Notify,
}

impl FakeAuthApi {
    pub fn new() -> Self {
        Self {
            login_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            login_tokens: Mutex::new(pair("login-access", "login-refresh")),
            refresh_reply: Mutex::new(RefreshReply::Issue(pair("a2", "r2"))),
            hold: AtomicBool::new(false),
            gate: Notify::new(),
            started: Notify::new(),
        }
    }

    pub fn reply_with(&self, reply: RefreshReply) {
        *self.refresh_reply.lock().unwrap() = reply;
    }

    pub fn hold_refresh(&self) {
        self.hold.store(true, Ordering::SeqCst);
    }

    pub fn release_refresh(&self) {
        self.gate.notify_one();
    }

    /// Resolves once a refresh call has reached the server.
    pub async fn refresh_started(&self) {
        self.started.notified().await;
    }

    pub fn refreshes(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn logins(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthApi for FakeAuthApi {
    async fn login(&self, login: &str, password: &str) -> SessionResult<LoginResponse> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        if password != PASSWORD {
            return Err(SessionError::InvalidCredentials("bad password".to_string()));
        }
        Ok(LoginResponse {
            user: user(login),
            tokens: self.login_tokens.lock().unwrap().clone(),
        })
    }

    async fn refresh(&self, _refresh_token: &str) -> SessionResult<TokenPair> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        if self.hold.load(Ordering::SeqCst) {
            self.gate.notified().await;
        }
        let reply = self.refresh_reply.lock().unwrap().clone();
        match reply {
            RefreshReply::Issue(tokens) => Ok(tokens),
            RefreshReply::Reject => Err(SessionError::RefreshFailed(
                "refresh token rejected (HTTP 401)".to_string(),
            )),
            RefreshReply::NetworkDown => Err(SessionError::Network("connection refused".to_string())),
        }
    }
}

/// Resource server that accepts a fixed set of bearer tokens and answers
/// 401 to everything else.
pub struct FakeTransport {
    accepted: Mutex<HashSet<String>>,
    pub requests: Mutex<Vec<ApiRequest>>,
    network_failures: AtomicUsize,
}

impl FakeTransport {
    pub fn accepting(tokens: &[&str]) -> Self {
        Self {
            accepted: Mutex::new(tokens.iter().map(|t| t.to_string()).collect()),
            requests: Mutex::new(Vec::new()),
            network_failures: AtomicUsize::new(0),
        }
    }

    pub fn accept(&self, token: &str) {
        self.accepted.lock().unwrap().insert(token.to_string());
    }

    pub fn fail_next(&self, count: usize) {
        self.network_failures.store(count, Ordering::SeqCst);
    }

    pub fn sent(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn bearers(&self) -> Vec<Option<String>> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.bearer.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: &ApiRequest) -> SessionResult<ApiResponse> {
        self.requests.lock().unwrap().push(request.clone());

        let failures = self.network_failures.load(Ordering::SeqCst);
        if failures > 0 {
            self.network_failures.store(failures - 1, Ordering::SeqCst);
            return Err(SessionError::Network("connection reset".to_string()));
        }

        let accepted = request
            .bearer
            .as_ref()
            .is_some_and(|token| self.accepted.lock().unwrap().contains(token));
        if accepted {
            Ok(ApiResponse::new(StatusCode::OK, r#"{"ok":true}"#))
        } else {
            Ok(ApiResponse::new(StatusCode::UNAUTHORIZED, ""))
        }
    }
}

/// Records every published session event.
pub struct EventLog {
    events: Arc<Mutex<Vec<SessionEvent>>>,
    _subscriptions: Vec<Subscription>,
}

impl EventLog {
    pub fn attach(manager: &SessionManager) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let subscriptions: Vec<Subscription> = [Topic::TokenRefreshed, Topic::AuthError, Topic::AuthLogout]
            .into_iter()
            .map(|topic| {
                let events = Arc::clone(&events);
                manager.events().subscribe(topic, move |event| {
                    events.lock().unwrap().push(event.clone());
                    Ok(())
                })
            })
            .collect();
        Self {
            events,
            _subscriptions: subscriptions,
        }
    }

    pub fn count(&self, topic: Topic) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.topic() == topic)
            .count()
    }

    pub fn all(&self) -> Vec<SessionEvent> {
        self.events.lock().unwrap().clone()
    }
}

/// Access tokens starting with `expired` are judged invalid.
pub fn settings() -> SessionSettings {
    SessionSettings {
        refresh: RefreshConfig {
            initial_delay_ms: 1,
            max_delay_ms: 2,
            timeout: Duration::from_secs(5),
            ..RefreshConfig::default()
        },
        bootstrap_timeout: Duration::from_secs(5),
        validator: Arc::new(|tokens: &TokenPair| !tokens.access.starts_with("expired")),
    }
}

pub struct Harness {
    pub manager: Arc<SessionManager>,
    pub api: Arc<FakeAuthApi>,
    pub transport: Arc<FakeTransport>,
    pub backend: Arc<MemoryStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(settings())
    }

    pub fn with_settings(settings: SessionSettings) -> Self {
        Self::with_backend(Arc::new(MemoryStore::new()), settings)
    }

    pub fn with_backend(backend: Arc<MemoryStore>, settings: SessionSettings) -> Self {
        let api = Arc::new(FakeAuthApi::new());
        let transport = Arc::new(FakeTransport::accepting(&["a1", "a2", "login-access"]));
        let manager = Arc::new(SessionManager::new(
            backend.clone(),
            api.clone(),
            transport.clone(),
            settings,
        ));
        Self {
            manager,
            api,
            transport,
            backend,
        }
    }

    /// Persist a session as a previous run would have left it.
    pub fn seed(&self, tokens: &TokenPair, email: &str) {
        self.manager.store().save(tokens).unwrap();
        self.manager.store().save_user(&user(email)).unwrap();
    }

    pub fn stored_tokens(&self) -> Option<TokenPair> {
        self.manager.store().load().unwrap()
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.backend.get(key).unwrap()
    }
}

/// Memory store whose next token write can be held mid-flight.
///
/// After `arm`, the next write of the token key parks the writing thread
/// until `release`. `wait_parked` blocks until that write has started.
pub struct GatedStore {
    inner: MemoryStore,
    armed: AtomicBool,
    parked_tx: Mutex<Sender<()>>,
    parked_rx: Mutex<Receiver<()>>,
    released: Mutex<bool>,
    wake: Condvar,
}

impl GatedStore {
    pub fn new() -> Self {
        let (parked_tx, parked_rx) = mpsc::channel();
        Self {
            inner: MemoryStore::new(),
            armed: AtomicBool::new(false),
            parked_tx: Mutex::new(parked_tx),
            parked_rx: Mutex::new(parked_rx),
            released: Mutex::new(false),
            wake: Condvar::new(),
        }
    }

    pub fn arm(&self) {
        *self.released.lock().unwrap() = false;
        self.armed.store(true, Ordering::SeqCst);
    }

    pub fn wait_parked(&self) {
        self.parked_rx
            .lock()
            .unwrap()
            .recv_timeout(Duration::from_secs(5))
            .expect("token write never started");
    }

    pub fn release(&self) {
        *self.released.lock().unwrap() = true;
        self.wake.notify_all();
    }

    pub fn stored_tokens(&self) -> Option<TokenPair> {
        self.inner
            .get(TOKENS_KEY)
            .unwrap()
            .map(|raw| serde_json::from_str(&raw).expect("stored pair parses"))
    }
}

impl KeyValueStore for GatedStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        if key == TOKENS_KEY && self.armed.swap(false, Ordering::SeqCst) {
            self.parked_tx.lock().unwrap().send(()).unwrap();
            let mut released = self.released.lock().unwrap();
            while !*released {
                released = self.wake.wait(released).unwrap();
            }
        }
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.inner.remove(key)
    }
}
