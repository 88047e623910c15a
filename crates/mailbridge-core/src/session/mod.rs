//! Multi-account session manager.
//!
//! [`SessionManager`] owns the ordered list of known accounts, drives the
//! login state machine, keeps sessions fresh from API events and exposes
//! the single update channel drained by the protocol server.
//!
//! # Example
//!
//! ```ignore
//! use mailbridge_core::{Config, SessionManager, Services};
//!
//! let manager = SessionManager::new(config, services).await;
//! let updates = manager.take_updates().expect("first call");
//!
//! let (client, auth) = manager.login("user@example.com", "password").await?;
//! // Submit a second factor on `client` here if `auth.has_two_factor()`.
//! let account = manager.finish_login(client, &auth, "mailbox passphrase").await?;
//! ```

mod list;
mod login;
mod watchers;

use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::account::Account;
use crate::config::Config;
use crate::events::Event;
use crate::metrics::Metric;
use crate::services::Services;
use crate::store::{UpdateReceiver, UpdateSender};
use crate::{Error, Result};
use list::AccountList;

/// Username that deliberately crashes the process, for fault-injection testing.
const CRASH_USERNAME: &str = "crash@bandicoot";

/// Owns every known account and their sessions.
pub struct SessionManager {
    config: Arc<Config>,
    services: Services,
    /// Accounts in chronological order of first login.
    users: RwLock<AccountList>,
    updates_tx: UpdateSender,
    updates_rx: Mutex<Option<UpdateReceiver>>,
    stop: watch::Sender<bool>,
    watchers: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionManager {
    /// Creates the manager, loads every known account and starts the watchers.
    ///
    /// Accounts that fail to load or initialise are logged and skipped;
    /// construction itself never fails. Must be called within a Tokio runtime.
    pub async fn new(config: Arc<Config>, services: Services) -> Arc<Self> {
        trace!("Creating session manager");

        let capacity = config.preferences().update_channel_capacity.max(1);
        let (updates_tx, updates_rx) = mpsc::channel(capacity);
        let (stop, _) = watch::channel(false);

        if config.preferences().allow_proxy {
            services.clients.allow_proxy();
        } else {
            services.clients.disallow_proxy();
        }

        // Subscribe before loading so no event emitted meanwhile is missed.
        let outdated_rx = services.events.subscribe(Event::UpgradeApplication);
        let auths_rx = services.clients.auth_updates();

        let manager = Arc::new(Self {
            config,
            services,
            users: RwLock::new(AccountList::default()),
            updates_tx,
            updates_rx: Mutex::new(Some(updates_rx)),
            stop,
            watchers: Mutex::new(Vec::new()),
        });

        manager.load_users().await;

        let handles = vec![
            tokio::spawn(watchers::watch_app_outdated(
                Arc::downgrade(&manager),
                outdated_rx,
                manager.stop.subscribe(),
            )),
            tokio::spawn(watchers::watch_api_auths(
                Arc::downgrade(&manager),
                auths_rx,
                manager.stop.subscribe(),
            )),
        ];
        *manager.watchers.lock().unwrap_or_else(PoisonError::into_inner) = handles;

        manager
    }

    async fn load_users(&self) {
        let ids = match self.services.credentials.list() {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "Could not load users from credentials store");
                return;
            }
        };

        for id in ids {
            let account = match Account::new(id.clone(), self.services.clone()) {
                Ok(account) => Arc::new(account),
                Err(e) => {
                    warn!(user = %id, error = %e, "Could not load user, skipping");
                    continue;
                }
            };

            self.write_users().push(Arc::clone(&account));

            if let Err(e) = account.init(self.updates_tx.clone()).await {
                warn!(user = %id, error = %e, "Could not initialise user");
            }
        }

        info!(count = self.read_users().len(), "Loaded users");
    }

    /// Returns every known account, connected or not, in chronological order.
    #[must_use]
    pub fn get_users(&self) -> Vec<Arc<Account>> {
        self.read_users().to_vec()
    }

    /// Finds an account by ID, username or address, ignoring case.
    ///
    /// The first match in list order wins.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UserNotFound`] if nothing matches.
    pub fn get_user(&self, query: &str) -> Result<Arc<Account>> {
        crash_on_request(query);

        self.read_users()
            .find(query)
            .ok_or_else(|| Error::UserNotFound(query.to_string()))
    }

    /// Deletes an account: logs it out, closes (and optionally clears) its
    /// store, then removes its credentials. The account leaves the list only
    /// once its credentials are gone.
    ///
    /// # Errors
    ///
    /// Returns an error if the account is unknown or its credentials cannot
    /// be deleted; logout and store failures are only logged.
    pub async fn delete_user(&self, user_id: &str, clear_store: bool) -> Result<()> {
        let account = self
            .find_by_id(user_id)
            .ok_or_else(|| Error::UserNotFound(user_id.to_string()))?;

        if let Err(e) = account.logout().await {
            // Token stays valid remotely but will expire eventually.
            error!(user = %user_id, error = %e, "Cannot logout user");
        }

        if let Err(e) = account.close_store().await {
            error!(user = %user_id, error = %e, "Failed to close user store");
        }

        if clear_store && let Err(e) = account.clear_store().await {
            error!(user = %user_id, error = %e, "Failed to clear user store");
        }

        if let Err(e) = self.services.credentials.delete(user_id) {
            error!(user = %user_id, error = %e, "Cannot remove user");
            return Err(e.into());
        }

        self.write_users().remove(&account);
        info!(user = %user_id, "User deleted");
        Ok(())
    }

    /// Logs out every account, closes every store and clears cached data.
    ///
    /// Keeps going after failures.
    ///
    /// # Errors
    ///
    /// Returns every failure collected along the way.
    pub async fn clear_data(&self) -> Result<()> {
        let mut errors = Vec::new();

        for account in self.get_users() {
            if let Err(e) = account.logout().await {
                errors.push(e);
            }
            if let Err(e) = account.close_store().await {
                errors.push(e);
            }
        }

        if let Err(e) = self.config.clear_data().await {
            errors.push(e);
        }

        Error::from_many(errors)
    }

    /// Sends a usage metric through a throwaway anonymous client.
    ///
    /// Failures are logged only.
    pub async fn send_metric(&self, metric: Metric) {
        let client = self.services.clients.anonymous_client();
        let (category, action, label) = metric.get();

        match client.send_simple_metric(category, action, label).await {
            Ok(()) => debug!(category, action, label, "Metric successfully sent"),
            Err(e) => error!(error = %e, "Sending metric failed"),
        }

        client.logout().await;
    }

    /// Hands the receiving end of the update channel to the protocol server.
    ///
    /// Only the first call returns it.
    pub fn take_updates(&self) -> Option<UpdateReceiver> {
        let receiver = self
            .updates_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if receiver.is_none() {
            warn!("Update channel receiver was already taken");
        }
        receiver
    }

    /// Returns a sender on the update channel.
    #[must_use]
    pub fn update_sender(&self) -> UpdateSender {
        self.updates_tx.clone()
    }

    /// Returns true once the API reported that this build is too old.
    #[must_use]
    pub fn is_application_outdated(&self) -> bool {
        self.config.is_application_outdated()
    }

    /// Allows reaching the API through an alternative proxy and remembers
    /// the choice for the next start.
    ///
    /// # Errors
    ///
    /// Returns an error if the preferences cannot be saved.
    pub async fn allow_proxy(&self) -> Result<()> {
        self.services.clients.allow_proxy();
        self.save_allow_proxy(true).await
    }

    /// Forbids reaching the API through an alternative proxy and remembers
    /// the choice for the next start.
    ///
    /// # Errors
    ///
    /// Returns an error if the preferences cannot be saved.
    pub async fn disallow_proxy(&self) -> Result<()> {
        self.services.clients.disallow_proxy();
        self.save_allow_proxy(false).await
    }

    async fn save_allow_proxy(&self, allow: bool) -> Result<()> {
        let mut preferences = self.config.preferences();
        if preferences.allow_proxy == allow {
            return Ok(());
        }
        preferences.allow_proxy = allow;
        self.config.save_preferences(preferences).await
    }

    /// Checks whether the API is reachable.
    ///
    /// # Errors
    ///
    /// Returns the client manager's connectivity error.
    pub async fn check_connection(&self) -> Result<()> {
        self.services
            .clients
            .check_connection()
            .await
            .map_err(Error::from)
    }

    /// Signals both watchers to stop. Calling it again has no effect.
    pub fn stop_watchers(&self) {
        if !self.stop.send_replace(true) {
            debug!("Stopping watchers");
        }
    }

    /// Waits until both watchers have exited.
    pub async fn join_watchers(&self) {
        let handles = std::mem::take(
            &mut *self.watchers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Watcher task failed");
            }
        }
    }

    fn close_all_connections(&self) {
        for account in self.get_users() {
            account.close_all_connections();
        }
    }

    fn find_by_id(&self, user_id: &str) -> Option<Arc<Account>> {
        self.read_users().find_by_id(user_id)
    }

    fn read_users(&self) -> RwLockReadGuard<'_, AccountList> {
        self.users.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_users(&self) -> RwLockWriteGuard<'_, AccountList> {
        self.users.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn crash_on_request(username: &str) {
    assert!(username != CRASH_USERNAME, "Your wish is my command… I crash!");
}
