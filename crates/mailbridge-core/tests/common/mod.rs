//! Fakes for the API, credential and store collaborators.
//!
//! Every fake records what it was asked to do so tests can assert on the
//! side effects of the session manager.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mailbridge_api::{
    Address, ApiClient, ApiUser, Auth, AuthEvent, AuthInfo, ClientManager, Error as ApiError,
    Label, MessagesCount, Result as ApiResult,
};
use mailbridge_core::{
    Config, CredentialError, CredentialResult, CredentialStore, Credentials, EventListener,
    MailStore, MailboxSnapshot, MemoryCredentialStore, Services, SessionManager, StoreError,
    StoreFactory, StoreResult, UpdateSender,
};
use tempfile::TempDir;
use tokio::sync::{Notify, broadcast};

/// Installs a test log subscriber honouring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Waits until `condition` holds, failing the test after two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

/// Receives the next payload on a topic, failing the test after two seconds.
pub async fn next_event(rx: &mut broadcast::Receiver<String>) -> String {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("no event in time")
        .expect("event channel closed")
}

pub fn emails(list: &[&str]) -> Vec<String> {
    list.iter().map(ToString::to_string).collect()
}

/// A stored record with a live token and passphrase.
pub fn connected_record(id: &str, name: &str, addresses: &[&str]) -> Credentials {
    Credentials::new(id, name, "uid:stored", "hash", &emails(addresses))
}

/// A stored record of a logged-out account.
pub fn logged_out_record(id: &str, name: &str, addresses: &[&str]) -> Credentials {
    let mut record = connected_record(id, name, addresses);
    record.logout();
    record
}

/// Scripted API client for one remote account.
pub struct FakeClient {
    user: ApiUser,
    addresses: Vec<Address>,
    failures: Mutex<HashMap<&'static str, ApiError>>,
    calls: Mutex<Vec<String>>,
    refreshes: AtomicU32,
    gates: Mutex<HashMap<&'static str, Arc<Notify>>>,
    yielding: AtomicBool,
}

impl FakeClient {
    pub fn new(id: &str, name: &str, addresses: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            user: ApiUser {
                id: id.to_string(),
                name: name.to_string(),
                display_name: name.to_string(),
            },
            addresses: addresses
                .iter()
                .enumerate()
                .map(|(i, email)| Address::new(format!("addr-{i}"), *email))
                .collect(),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            refreshes: AtomicU32::new(0),
            gates: Mutex::new(HashMap::new()),
            yielding: AtomicBool::new(false),
        })
    }

    /// Makes every later call to `method` fail with `error`.
    pub fn fail(&self, method: &'static str, error: ApiError) {
        self.failures.lock().unwrap().insert(method, error);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == method).count()
    }

    pub fn called(&self, method: &str) -> bool {
        self.call_count(method) > 0
    }

    /// Makes every call yield to the scheduler once, so concurrent logins
    /// interleave at each remote call.
    pub fn yield_on_calls(&self) {
        self.yielding.store(true, Ordering::SeqCst);
    }

    /// Holds the next call to `method` until the returned gate is notified.
    ///
    /// The call is recorded before it blocks. Later calls pass freely.
    pub fn gate(&self, method: &'static str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates.lock().unwrap().insert(method, Arc::clone(&gate));
        gate
    }

    async fn enter(&self, method: &'static str) -> ApiResult<()> {
        self.calls.lock().unwrap().push(method.to_string());

        let gate = self.gates.lock().unwrap().remove(method);
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.yielding.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }

        match self.failures.lock().unwrap().get(method) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ApiClient for FakeClient {
    async fn auth_info(&self, _username: &str) -> ApiResult<AuthInfo> {
        self.enter("auth_info").await?;
        Ok(AuthInfo::default())
    }

    async fn auth(&self, _username: &str, _password: &str, _info: &AuthInfo) -> ApiResult<Auth> {
        self.enter("auth").await?;
        Ok(Auth::new("uid", "handshake"))
    }

    async fn auth_2fa(&self, _code: &str, _auth: &Auth) -> ApiResult<()> {
        self.enter("auth_2fa").await
    }

    async fn auth_refresh(&self, token: &str) -> ApiResult<Auth> {
        self.enter("auth_refresh").await?;
        let uid = token.split(':').next().unwrap_or_default();
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Auth::new(uid, format!("refreshed-{n}")))
    }

    async fn auth_salt(&self) -> ApiResult<String> {
        self.enter("auth_salt").await?;
        Ok(String::new())
    }

    async fn unlock(&self, _passphrase: &[u8]) -> ApiResult<()> {
        self.enter("unlock").await
    }

    async fn unlock_addresses(&self, _passphrase: &[u8]) -> ApiResult<()> {
        self.enter("unlock_addresses").await
    }

    async fn current_user(&self) -> ApiResult<ApiUser> {
        self.enter("current_user").await?;
        Ok(self.user.clone())
    }

    async fn addresses(&self) -> ApiResult<Vec<Address>> {
        self.enter("addresses").await?;
        Ok(self.addresses.clone())
    }

    async fn list_labels(&self) -> ApiResult<Vec<Label>> {
        self.enter("list_labels").await?;
        Ok(vec![Label {
            id: "0".into(),
            name: "INBOX".into(),
            exclusive: true,
        }])
    }

    async fn count_messages(&self, _address_id: &str) -> ApiResult<Vec<MessagesCount>> {
        self.enter("count_messages").await?;
        Ok(Vec::new())
    }

    async fn delete_auth(&self) -> ApiResult<()> {
        self.enter("delete_auth").await
    }

    async fn logout(&self) {
        let _ = self.enter("logout").await;
    }

    async fn send_simple_metric(&self, category: &str, action: &str, _label: &str) -> ApiResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("metric:{category}/{action}"));
        Ok(())
    }
}

/// Hands out scripted clients and publishes auth events on demand.
pub struct FakeClientManager {
    clients: Mutex<HashMap<String, Arc<FakeClient>>>,
    handshake: Mutex<Arc<FakeClient>>,
    auth_tx: broadcast::Sender<AuthEvent>,
    proxy: AtomicBool,
}

impl FakeClientManager {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            handshake: Mutex::new(FakeClient::new("", "", &[])),
            auth_tx: broadcast::channel(16).0,
            proxy: AtomicBool::new(false),
        }
    }

    /// Registers the client bound to an account.
    pub fn set_client(&self, client: &Arc<FakeClient>) {
        self.clients
            .lock()
            .unwrap()
            .insert(client.user.id.clone(), Arc::clone(client));
    }

    /// Sets the client returned for anonymous requests.
    pub fn set_handshake(&self, client: &Arc<FakeClient>) {
        *self.handshake.lock().unwrap() = Arc::clone(client);
    }

    pub fn bound(&self, user_id: &str) -> Option<Arc<FakeClient>> {
        self.clients.lock().unwrap().get(user_id).cloned()
    }

    pub fn publish(&self, event: AuthEvent) {
        self.auth_tx.send(event).unwrap();
    }

    pub fn proxy_allowed(&self) -> bool {
        self.proxy.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClientManager for FakeClientManager {
    fn client(&self, user_id: &str) -> Arc<dyn ApiClient> {
        let mut clients = self.clients.lock().unwrap();
        let client = clients
            .entry(user_id.to_string())
            .or_insert_with(|| FakeClient::new(user_id, user_id, &[]));
        Arc::clone(client) as Arc<dyn ApiClient>
    }

    fn anonymous_client(&self) -> Arc<dyn ApiClient> {
        Arc::clone(&*self.handshake.lock().unwrap()) as Arc<dyn ApiClient>
    }

    fn auth_updates(&self) -> broadcast::Receiver<AuthEvent> {
        self.auth_tx.subscribe()
    }

    fn allow_proxy(&self) {
        self.proxy.store(true, Ordering::SeqCst);
    }

    fn disallow_proxy(&self) {
        self.proxy.store(false, Ordering::SeqCst);
    }

    async fn check_connection(&self) -> ApiResult<()> {
        Ok(())
    }
}

/// Memory credential store whose deletes can be made to fail.
#[derive(Default)]
pub struct FlakyCredentialStore {
    inner: MemoryCredentialStore,
    fail_delete: AtomicBool,
}

impl FlakyCredentialStore {
    pub fn with_records(records: Vec<Credentials>) -> Self {
        Self {
            inner: MemoryCredentialStore::with_records(records),
            fail_delete: AtomicBool::new(false),
        }
    }

    pub fn fail_delete(&self) {
        self.fail_delete.store(true, Ordering::SeqCst);
    }
}

impl CredentialStore for FlakyCredentialStore {
    fn list(&self) -> CredentialResult<Vec<String>> {
        self.inner.list()
    }

    fn get(&self, user_id: &str) -> CredentialResult<Credentials> {
        self.inner.get(user_id)
    }

    fn save(&self, credentials: &Credentials) -> CredentialResult<()> {
        self.inner.save(credentials)
    }

    fn delete(&self, user_id: &str) -> CredentialResult<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(CredentialError::Backend("delete failed".into()));
        }
        self.inner.delete(user_id)
    }
}

#[derive(Default)]
struct StoreLog {
    opened: Vec<String>,
    closed: Vec<String>,
    removed: Vec<String>,
    fail_open: HashSet<String>,
    fail_close: HashSet<String>,
}

/// Store factory recording the lifecycle of every store.
#[derive(Default)]
pub struct FakeStoreFactory {
    log: Arc<Mutex<StoreLog>>,
}

impl FakeStoreFactory {
    pub fn opened(&self) -> Vec<String> {
        self.log.lock().unwrap().opened.clone()
    }

    pub fn closed(&self) -> Vec<String> {
        self.log.lock().unwrap().closed.clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.log.lock().unwrap().removed.clone()
    }

    pub fn fail_open(&self, user_id: &str) {
        self.log.lock().unwrap().fail_open.insert(user_id.to_string());
    }

    pub fn fail_close(&self, user_id: &str) {
        self.log.lock().unwrap().fail_close.insert(user_id.to_string());
    }
}

struct FakeStore {
    user_id: String,
    log: Arc<Mutex<StoreLog>>,
}

#[async_trait]
impl MailStore for FakeStore {
    async fn close(&self) -> StoreResult<()> {
        let mut log = self.log.lock().unwrap();
        log.closed.push(self.user_id.clone());
        if log.fail_close.contains(&self.user_id) {
            return Err(StoreError::Other(format!("cannot close {}", self.user_id)));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreFactory for FakeStoreFactory {
    async fn open(
        &self,
        user_id: &str,
        _client: Arc<dyn ApiClient>,
        _snapshot: MailboxSnapshot,
        _updates: UpdateSender,
    ) -> StoreResult<Box<dyn MailStore>> {
        let mut log = self.log.lock().unwrap();
        if log.fail_open.contains(user_id) {
            return Err(StoreError::Other(format!("cannot open {user_id}")));
        }
        log.opened.push(user_id.to_string());
        Ok(Box::new(FakeStore {
            user_id: user_id.to_string(),
            log: Arc::clone(&self.log),
        }))
    }

    fn remove(&self, user_id: &str) -> StoreResult<()> {
        self.log.lock().unwrap().removed.push(user_id.to_string());
        Ok(())
    }
}

/// Everything a session manager needs, wired to fakes.
pub struct Harness {
    pub dir: TempDir,
    pub config: Arc<Config>,
    pub events: Arc<EventListener>,
    pub credentials: Arc<FlakyCredentialStore>,
    pub clients: Arc<FakeClientManager>,
    pub stores: Arc<FakeStoreFactory>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_records(Vec::new())
    }

    pub fn with_records(records: Vec<Credentials>) -> Self {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let config = Arc::new(Config::new(
            dir.path().join("config"),
            dir.path().join("cache"),
        ));
        Self {
            dir,
            config,
            events: Arc::new(EventListener::new()),
            credentials: Arc::new(FlakyCredentialStore::with_records(records)),
            clients: Arc::new(FakeClientManager::new()),
            stores: Arc::new(FakeStoreFactory::default()),
        }
    }

    pub fn services(&self) -> Services {
        Services::new(
            self.events.clone(),
            self.credentials.clone(),
            self.clients.clone(),
            self.stores.clone(),
        )
    }

    pub async fn manager(&self) -> Arc<SessionManager> {
        SessionManager::new(Arc::clone(&self.config), self.services()).await
    }

    /// Registers both the handshake and the bound client for an account.
    pub fn remote_account(&self, id: &str, name: &str, addresses: &[&str]) -> (Arc<FakeClient>, Arc<FakeClient>) {
        let handshake = FakeClient::new(id, name, addresses);
        let bound = FakeClient::new(id, name, addresses);
        self.clients.set_handshake(&handshake);
        self.clients.set_client(&bound);
        (handshake, bound)
    }

    pub fn record(&self, id: &str) -> Credentials {
        self.credentials.get(id).unwrap()
    }
}
