//! Login state machine.

use std::sync::Arc;

use mailbridge_api::{ApiClient, ApiUser, Auth, active_emails, hash_mailbox_password};
use tracing::{debug, error, info, warn};

use super::{SessionManager, crash_on_request};
use crate::account::Account;
use crate::events::{Event, Listener};
use crate::metrics::Metric;
use crate::{Error, Result, ResultExt};

impl SessionManager {
    /// Authenticates a username/password pair.
    ///
    /// Returns the handshake client and the session; both must be passed to
    /// [`SessionManager::finish_login`]. The session may still require a
    /// second factor. Nothing is stored yet.
    ///
    /// # Errors
    ///
    /// Returns the API error of the failing handshake step.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<(Arc<dyn ApiClient>, Auth)> {
        crash_on_request(username);

        // There is no account ID yet to bind tokens to.
        let client = self.services.clients.anonymous_client();

        let info = client.auth_info(username).await.inspect_err(|e| {
            error!(username, error = %e, "Could not get auth info for user");
        })?;

        let auth = client
            .auth(username, password, &info)
            .await
            .inspect_err(|e| error!(username, error = %e, "Could not get auth for user"))?;

        Ok((client, auth))
    }

    /// Finishes a login: proves the mailbox passphrase, then reconnects the
    /// known account or adds a new one.
    ///
    /// The handshake client is always logged out afterwards. On failure its
    /// session is also deleted remotely, and an upgrade-required failure is
    /// broadcast.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyConnected`] if the account already has a live
    /// session, or the error of the failing step.
    pub async fn finish_login(
        &self,
        client: Arc<dyn ApiClient>,
        auth: &Auth,
        mailbox_passphrase: &str,
    ) -> Result<Arc<Account>> {
        let cleanup = LoginCleanup::new(Arc::clone(&client), Arc::clone(&self.services.events));
        let result = self
            .finish_login_steps(client.as_ref(), auth, mailbox_passphrase)
            .await;
        cleanup.finish(result.as_ref().err()).await;
        result
    }

    async fn finish_login_steps(
        &self,
        client: &dyn ApiClient,
        auth: &Auth,
        mailbox_passphrase: &str,
    ) -> Result<Arc<Account>> {
        let (api_user, hashed_passphrase) = get_api_user(client, mailbox_passphrase)
            .await
            .inspect_err(|e| error!(error = %e, "Failed to get API user"))?;

        info!(user = %api_user.id, "Got API user");

        let account = match self.claim(&api_user.id)? {
            Claim::Existing(account) => {
                self.connect_existing_user(&account, auth, &hashed_passphrase)
                    .await
                    .inspect_err(|e| error!(error = %e, "Failed to connect existing user"))?;
                account
            }
            Claim::New(_reservation) => self
                .add_new_user(&api_user, auth, &hashed_passphrase)
                .await
                .inspect_err(|e| error!(error = %e, "Failed to add new user"))?,
        };

        self.services.events.emit(Event::UserRefresh, account.id());
        Ok(account)
    }

    /// Claims an account for this login before anything is stored.
    ///
    /// A known account moves to `Connecting`; an unknown ID is reserved
    /// until the login ends. Either way a concurrent login for the same
    /// account is rejected here.
    fn claim(&self, user_id: &str) -> Result<Claim<'_>> {
        let mut users = self.write_users();

        if let Some(account) = users.find_by_id(user_id) {
            if !account.try_begin_connect() {
                return Err(Error::AlreadyConnected);
            }
            return Ok(Claim::Existing(account));
        }

        if !users.reserve(user_id) {
            return Err(Error::AlreadyConnected);
        }
        Ok(Claim::New(Reservation {
            manager: self,
            user_id: user_id.to_string(),
        }))
    }

    async fn connect_existing_user(
        &self,
        account: &Arc<Account>,
        auth: &Auth,
        hashed_passphrase: &str,
    ) -> Result<()> {
        info!(user = %account.id(), "Connecting existing user");

        let result = self.reconnect(account, auth, hashed_passphrase).await;
        if result.is_err() {
            account.abort_connect();
        }
        result
    }

    async fn reconnect(&self, account: &Account, auth: &Auth, hashed_passphrase: &str) -> Result<()> {
        let id = account.id();

        // The passphrase may have changed since the last login.
        self.services
            .credentials
            .update_password(id, hashed_passphrase)
            .context("failed to update password of user in credentials store")?;

        let client = self.services.clients.client(id);
        let auth = client
            .auth_refresh(&auth.gen_token())
            .await
            .context("failed to refresh auth token of new client")?;

        self.services
            .credentials
            .update_token(id, &auth.gen_token())
            .context("failed to update token of user in credentials store")?;

        account
            .init(self.updates_tx.clone())
            .await
            .context("failed to initialise user")
    }

    async fn add_new_user(
        &self,
        api_user: &ApiUser,
        auth: &Auth,
        hashed_passphrase: &str,
    ) -> Result<Arc<Account>> {
        let client = self.services.clients.client(&api_user.id);

        let auth = client
            .auth_refresh(&auth.gen_token())
            .await
            .context("failed to refresh token in new client")?;

        // Refreshing may change identity-adjacent fields.
        let api_user = client
            .current_user()
            .await
            .context("failed to update API user")?;

        let addresses = client
            .addresses()
            .await
            .context("failed to list addresses")?;
        let emails = active_emails(&addresses);

        self.services
            .credentials
            .add(
                &api_user.id,
                &api_user.name,
                &auth.gen_token(),
                hashed_passphrase,
                &emails,
            )
            .context("failed to add user to credentials store")?;

        let account = Arc::new(
            Account::new(api_user.id.clone(), self.services.clone())
                .context("failed to create user")?,
        );

        // Listed before init so that auth events during init reach it.
        {
            let mut users = self.write_users();
            account.try_begin_connect();
            users.push(Arc::clone(&account));
        }

        if let Err(e) = account.init(self.updates_tx.clone()).await {
            self.write_users().remove(&account);
            return Err(e.context("failed to initialise user"));
        }

        info!(user = %account.id(), "Added new user");
        self.send_metric(Metric::new_user()).await;

        Ok(account)
    }
}

/// Outcome of [`SessionManager::claim`].
enum Claim<'a> {
    Existing(Arc<Account>),
    New(Reservation<'a>),
}

/// Reserved ID of a first-time login, released when dropped.
struct Reservation<'a> {
    manager: &'a SessionManager,
    user_id: String,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.manager.write_users().release(&self.user_id);
    }
}

/// Unlocks the account with the mailbox passphrase and fetches its identity.
///
/// Returns the user record and the hashed passphrase.
async fn get_api_user(client: &dyn ApiClient, mailbox_passphrase: &str) -> Result<(ApiUser, String)> {
    let salt = client
        .auth_salt()
        .await
        .inspect_err(|e| error!(error = %e, "Could not get salt"))?;

    let hashed_passphrase = hash_mailbox_password(mailbox_passphrase, &salt)
        .inspect_err(|e| error!(error = %e, "Could not hash mailbox password"))?;

    // A wrong mailbox passphrase is detected by failing to unlock the keys.
    client
        .unlock(hashed_passphrase.as_bytes())
        .await
        .inspect_err(|e| error!(error = %e, "Wrong mailbox password"))?;

    let user = client
        .current_user()
        .await
        .inspect_err(|e| error!(error = %e, "Could not load user data"))?;

    Ok((user, hashed_passphrase))
}

/// Cleanup of the handshake client, run on every exit path of a login.
///
/// [`LoginCleanup::finish`] runs it inline; if the login future is dropped
/// before that completes, `Drop` spawns whatever is left.
struct LoginCleanup {
    client: Option<Arc<dyn ApiClient>>,
    events: Arc<dyn Listener>,
    /// Whether the remote session still has to be deleted.
    delete_on_drop: bool,
}

impl LoginCleanup {
    fn new(client: Arc<dyn ApiClient>, events: Arc<dyn Listener>) -> Self {
        Self {
            client: Some(client),
            events,
            delete_on_drop: true,
        }
    }

    async fn finish(mut self, error: Option<&Error>) {
        let Some(client) = self.client.clone() else {
            return;
        };
        self.delete_on_drop = error.is_some();

        if let Some(err) = error {
            if err.is_upgrade_required() {
                self.events.emit(Event::UpgradeApplication, "");
            }

            debug!(error = %err, "Login not finished; removing auth session");
            if let Err(e) = client.delete_auth().await {
                error!(error = %e, "Failed to clear login session after unlock");
            }
            self.delete_on_drop = false;
        }

        // Only the local handshake state goes away; a successful session
        // lives on in the account's own client.
        client.logout().await;
        self.client = None;
    }
}

impl Drop for LoginCleanup {
    fn drop(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };
        let delete = self.delete_on_drop;

        warn!(delete, "Login interrupted; cleaning up auth session");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if delete {
                    if let Err(e) = client.delete_auth().await {
                        error!(error = %e, "Failed to clear interrupted login session");
                    }
                }
                client.logout().await;
            });
        }
    }
}
