//! Account model and session lifecycle.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use mailbridge_api::{ApiClient, Auth, active_emails};
use tracing::{debug, error, info, warn};

use super::credentials::Credentials;
use crate::events::Event;
use crate::services::Services;
use crate::store::{MailStore, MailboxSnapshot, UpdateSender};
use crate::{Result, ResultExt};

/// Whether an account holds a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// Known from a previous login, no live session.
    #[default]
    Disconnected,
    /// A login is establishing the session.
    Connecting,
    /// Session initialised and mail store open.
    Connected,
}

/// One known account, connected or not.
///
/// All mutable state (credentials snapshot, status, store handle) is only
/// changed through the methods below.
pub struct Account {
    id: String,
    services: Services,
    credentials: RwLock<Credentials>,
    status: Mutex<ConnectionStatus>,
    store: tokio::sync::Mutex<Option<Box<dyn MailStore>>>,
}

impl Account {
    /// Loads an account from its credential record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be read.
    pub(crate) fn new(id: impl Into<String>, services: Services) -> Result<Self> {
        let id = id.into();
        let credentials = services
            .credentials
            .get(&id)
            .context("failed to load user credentials")?;

        Ok(Self {
            id,
            services,
            credentials: RwLock::new(credentials),
            status: Mutex::new(ConnectionStatus::Disconnected),
            store: tokio::sync::Mutex::new(None),
        })
    }

    /// Returns the account identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the login name.
    #[must_use]
    pub fn username(&self) -> String {
        self.read_credentials().name.clone()
    }

    /// Returns the known addresses, primary first.
    #[must_use]
    pub fn addresses(&self) -> Vec<String> {
        self.read_credentials().emails.clone()
    }

    /// Returns the primary address, if any.
    #[must_use]
    pub fn primary_address(&self) -> Option<String> {
        self.read_credentials().primary_email().map(ToString::to_string)
    }

    /// Returns the connection status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns true if the account has a live session.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Returns true if `query` equals the ID, the username or an address, ignoring case.
    ///
    /// Case is folded for all of Unicode, not only ASCII.
    #[must_use]
    pub fn matches(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        let same = |value: &str| value.to_lowercase() == query;

        let credentials = self.read_credentials();
        same(&self.id)
            || same(&credentials.name)
            || credentials.emails.iter().any(|address| same(address))
    }

    /// Claims the account for a login. Fails if a session is live or being set up.
    pub(crate) fn try_begin_connect(&self) -> bool {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        if *status == ConnectionStatus::Disconnected {
            *status = ConnectionStatus::Connecting;
            true
        } else {
            false
        }
    }

    /// Releases a claim taken by [`Account::try_begin_connect`] after a failed login.
    pub(crate) fn abort_connect(&self) {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        if *status == ConnectionStatus::Connecting {
            *status = ConnectionStatus::Disconnected;
        }
    }

    /// Establishes the session and opens the mail store.
    ///
    /// Accounts without a stored token stay disconnected and are not an error.
    /// A token rejected by the server logs the account out before the error
    /// is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if any remote call or the store fails to open.
    pub async fn init(&self, updates: UpdateSender) -> Result<()> {
        let result = self.init_session(updates).await;
        match &result {
            Ok(true) => self.set_status(ConnectionStatus::Connected),
            Ok(false) | Err(_) => self.set_status(ConnectionStatus::Disconnected),
        }
        result.map(|_| ())
    }

    async fn init_session(&self, updates: UpdateSender) -> Result<bool> {
        let credentials = self
            .services
            .credentials
            .get(&self.id)
            .context("failed to reload user credentials")?;
        *self.write_credentials() = credentials.clone();

        self.close_store()
            .await
            .context("failed to close previous store")?;

        if !credentials.is_connected() {
            info!(user = %self.id, "User is not connected, skipping session initialisation");
            return Ok(false);
        }

        let client = self.client();
        if let Err(err) = self.authorise(client.as_ref(), &credentials).await {
            if err.is_invalid_token() {
                warn!(user = %self.id, "Stored token is no longer valid, logging out");
                if let Err(e) = self.logout().await {
                    error!(user = %self.id, error = %e, "Failed to log out user with invalid token");
                }
            }
            return Err(err);
        }

        let snapshot = Self::snapshot(client.as_ref()).await?;
        self.sync_addresses(&snapshot);

        let store = self
            .services
            .stores
            .open(&self.id, client, snapshot, updates)
            .await
            .context("failed to open user store")?;
        *self.store.lock().await = Some(store);

        info!(user = %self.id, "User initialised");
        Ok(true)
    }

    async fn authorise(&self, client: &dyn ApiClient, credentials: &Credentials) -> Result<()> {
        let auth = client
            .auth_refresh(&credentials.api_token)
            .await
            .context("failed to refresh auth token")?;
        self.update_auth_token(&auth);

        let passphrase = credentials.mailbox_password.as_bytes();
        client
            .unlock(passphrase)
            .await
            .context("failed to unlock user keys")?;
        client
            .unlock_addresses(passphrase)
            .await
            .context("failed to unlock address keys")?;
        Ok(())
    }

    async fn snapshot(client: &dyn ApiClient) -> Result<MailboxSnapshot> {
        let labels = client
            .list_labels()
            .await
            .context("failed to list labels")?;
        let counts = client
            .count_messages("")
            .await
            .context("failed to count messages")?;
        let addresses = client
            .addresses()
            .await
            .context("failed to list addresses")?;

        Ok(MailboxSnapshot {
            labels,
            counts,
            addresses,
        })
    }

    /// Persists the active addresses if they changed remotely.
    fn sync_addresses(&self, snapshot: &MailboxSnapshot) {
        let emails = active_emails(&snapshot.addresses);
        if emails.is_empty() || self.read_credentials().emails == emails {
            return;
        }

        match self.services.credentials.update_emails(&self.id, &emails) {
            Ok(()) => {
                debug!(user = %self.id, count = emails.len(), "Updated user addresses");
                self.write_credentials().emails = emails;
            }
            Err(e) => warn!(user = %self.id, error = %e, "Failed to update user addresses"),
        }
    }

    /// Persists a refreshed session token. Failures are logged, not returned.
    pub fn update_auth_token(&self, auth: &Auth) {
        let token = auth.gen_token();
        if self.read_credentials().api_token == token {
            debug!(user = %self.id, "Auth token unchanged");
            return;
        }

        if let Err(e) = self.services.credentials.update_token(&self.id, &token) {
            error!(user = %self.id, error = %e, "Failed to persist refreshed auth token");
            return;
        }

        self.write_credentials().api_token = token;
        debug!(user = %self.id, "Auth token updated");
    }

    /// Ends the session: revokes it remotely, forgets the token and
    /// passphrase, and drops protocol connections. The store stays open.
    ///
    /// An account claimed by a login in progress stays `Connecting`.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential store cannot be updated.
    pub async fn logout(&self) -> Result<()> {
        if !self.read_credentials().is_connected() {
            debug!(user = %self.id, "User already logged out");
            self.mark_disconnected();
            return Ok(());
        }

        info!(user = %self.id, "Logging out user");

        let client = self.client();
        if let Err(e) = client.delete_auth().await {
            warn!(user = %self.id, error = %e, "Failed to delete auth session");
        }
        client.logout().await;

        self.services
            .credentials
            .logout(&self.id)
            .context("failed to log out user in credentials store")?;
        self.write_credentials().logout();
        self.mark_disconnected();

        self.close_all_connections();
        self.services.events.emit(Event::Logout, &self.id);
        self.services.events.emit(Event::UserRefresh, &self.id);
        Ok(())
    }

    /// Closes the mail store, if open.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails to close.
    pub async fn close_store(&self) -> Result<()> {
        let store = self.store.lock().await.take();
        let Some(store) = store else {
            return Ok(());
        };

        self.mark_disconnected();

        store.close().await?;
        debug!(user = %self.id, "Closed user store");
        Ok(())
    }

    /// Closes the mail store and deletes its cached data.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails to close or its data cannot be removed.
    pub async fn clear_store(&self) -> Result<()> {
        self.close_store().await?;
        self.services.stores.remove(&self.id)?;
        info!(user = %self.id, "Cleared user store");
        Ok(())
    }

    /// Asks the protocol server to drop every session of this account.
    pub fn close_all_connections(&self) {
        for address in self.addresses() {
            self.services.events.emit(Event::CloseConnection, &address);
        }
    }

    /// Returns true if the mail store is open.
    pub async fn has_store(&self) -> bool {
        self.store.lock().await.is_some()
    }

    fn client(&self) -> Arc<dyn ApiClient> {
        self.services.clients.client(&self.id)
    }

    /// Drops a live session's status. A login in progress keeps its claim
    /// and settles the status itself.
    fn mark_disconnected(&self) {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        if *status == ConnectionStatus::Connected {
            *status = ConnectionStatus::Disconnected;
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    fn read_credentials(&self) -> RwLockReadGuard<'_, Credentials> {
        self.credentials.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_credentials(&self) -> RwLockWriteGuard<'_, Credentials> {
        self.credentials.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("username", &self.username())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
