//! Credential records and their persistent storage.
//!
//! A [`Credentials`] record is the single source of truth for which
//! accounts exist across restarts. Two stores are provided:
//! - [`KeyringCredentialStore`] persists records in the platform's native
//!   credential storage (Secret Service, Keychain, Credential Manager)
//! - [`MemoryCredentialStore`] keeps records in memory, for tests and
//!   ephemeral sessions

use std::fmt;
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use keyring::Entry;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Service name used for keyring entries.
const SERVICE_NAME: &str = "mailbridge";

/// Keyring entry holding the ordered list of known account IDs.
const INDEX_CREDENTIAL: &str = "users";

/// Credential type identifier for account records.
const ACCOUNT_CREDENTIAL: &str = "account";

/// Error type for credential operations.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// Failed to access keyring.
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    /// Stored record could not be encoded or decoded.
    #[error("Malformed credentials: {0}")]
    Serde(#[from] serde_json::Error),

    /// No record exists for the account.
    #[error("No credentials for user {0}")]
    NotFound(String),

    /// Backend-specific failure.
    #[error("Credential backend error: {0}")]
    Backend(String),
}

/// Result type for credential operations.
pub type CredentialResult<T> = std::result::Result<T, CredentialError>;

/// Persisted identity, session token and hashed passphrase of one account.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Stable account identifier assigned by the remote service.
    pub user_id: String,
    /// Login name.
    pub name: String,
    /// Known addresses, primary first.
    pub emails: Vec<String>,
    /// Persisted session token (`<uid>:<refresh>`), empty when logged out.
    pub api_token: String,
    /// Hashed mailbox passphrase, empty when logged out.
    pub mailbox_password: String,
    /// Hidden accounts are kept but not shown to the user.
    #[serde(default)]
    pub is_hidden: bool,
    /// Unix timestamp of the last change.
    #[serde(default)]
    pub timestamp: i64,
}

impl Credentials {
    /// Creates a record for a freshly logged-in account.
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        name: impl Into<String>,
        api_token: impl Into<String>,
        mailbox_password: impl Into<String>,
        emails: &[String],
    ) -> Self {
        Self {
            user_id: user_id.into(),
            name: name.into(),
            emails: emails.to_vec(),
            api_token: api_token.into(),
            mailbox_password: mailbox_password.into(),
            is_hidden: false,
            timestamp: Utc::now().timestamp(),
        }
    }

    /// Returns true if the record holds both a token and a passphrase.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.api_token.is_empty() && !self.mailbox_password.is_empty()
    }

    /// Splits the token into its UID and refresh parts.
    #[must_use]
    pub fn split_api_token(&self) -> Option<(&str, &str)> {
        self.api_token.split_once(':')
    }

    /// Returns the primary address, if any.
    #[must_use]
    pub fn primary_email(&self) -> Option<&str> {
        self.emails.first().map(String::as_str)
    }

    /// Forgets the session token and the passphrase.
    pub fn logout(&mut self) {
        self.api_token.clear();
        self.mailbox_password.clear();
        self.touch();
    }

    fn touch(&mut self) {
        self.timestamp = Utc::now().timestamp();
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |s: &String| if s.is_empty() { "" } else { "[REDACTED]" };
        f.debug_struct("Credentials")
            .field("user_id", &self.user_id)
            .field("name", &self.name)
            .field("emails", &self.emails)
            .field("api_token", &redact(&self.api_token))
            .field("mailbox_password", &redact(&self.mailbox_password))
            .field("is_hidden", &self.is_hidden)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

/// Persistent storage of credential records, keyed by account ID.
///
/// Implementations only need to provide `list`, `get`, `save` and `delete`;
/// `list` must return IDs in the order they were first saved.
/// All operations are synchronous.
pub trait CredentialStore: Send + Sync {
    /// Lists known account IDs in chronological order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn list(&self) -> CredentialResult<Vec<String>>;

    /// Loads the record of an account.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::NotFound`] if no record exists.
    fn get(&self, user_id: &str) -> CredentialResult<Credentials>;

    /// Inserts or replaces a record. New IDs are appended to the order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    fn save(&self, credentials: &Credentials) -> CredentialResult<()>;

    /// Removes a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    fn delete(&self, user_id: &str) -> CredentialResult<()>;

    /// Creates and saves a new record, returning it.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    fn add(
        &self,
        user_id: &str,
        name: &str,
        api_token: &str,
        mailbox_password: &str,
        emails: &[String],
    ) -> CredentialResult<Credentials> {
        let credentials = Credentials::new(user_id, name, api_token, mailbox_password, emails);
        self.save(&credentials)?;
        debug!(user = %user_id, "Added credentials");
        Ok(credentials)
    }

    /// Replaces the session token of an account.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is missing or cannot be written.
    fn update_token(&self, user_id: &str, api_token: &str) -> CredentialResult<()> {
        let mut credentials = self.get(user_id)?;
        credentials.api_token = api_token.to_string();
        credentials.touch();
        self.save(&credentials)
    }

    /// Replaces the hashed mailbox passphrase of an account.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is missing or cannot be written.
    fn update_password(&self, user_id: &str, mailbox_password: &str) -> CredentialResult<()> {
        let mut credentials = self.get(user_id)?;
        credentials.mailbox_password = mailbox_password.to_string();
        credentials.touch();
        self.save(&credentials)
    }

    /// Replaces the known addresses of an account.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is missing or cannot be written.
    fn update_emails(&self, user_id: &str, emails: &[String]) -> CredentialResult<()> {
        let mut credentials = self.get(user_id)?;
        credentials.emails = emails.to_vec();
        credentials.touch();
        self.save(&credentials)
    }

    /// Clears the token and passphrase of an account, keeping the record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is missing or cannot be written.
    fn logout(&self, user_id: &str) -> CredentialResult<()> {
        let mut credentials = self.get(user_id)?;
        credentials.logout();
        self.save(&credentials)
    }
}

/// Credential store backed by the system keyring.
///
/// Each record is stored as JSON in its own entry; a separate entry keeps
/// the ordered list of IDs because keyrings cannot enumerate entries.
pub struct KeyringCredentialStore {
    service: String,
    /// Serializes read-modify-write cycles on the index entry.
    index_lock: Mutex<()>,
}

impl KeyringCredentialStore {
    /// Creates a store under the default service name.
    #[must_use]
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    /// Creates a store under a custom service name.
    #[must_use]
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            index_lock: Mutex::new(()),
        }
    }

    /// Generates the keyring entry key for a credential.
    fn credential_key(&self, credential_type: &str, user_id: &str) -> String {
        format!("{}_{credential_type}_{user_id}", self.service)
    }

    fn index_entry(&self) -> CredentialResult<Entry> {
        let key = format!("{}_{INDEX_CREDENTIAL}", self.service);
        Ok(Entry::new(&self.service, &key)?)
    }

    fn account_entry(&self, user_id: &str) -> CredentialResult<Entry> {
        let key = self.credential_key(ACCOUNT_CREDENTIAL, user_id);
        Ok(Entry::new(&self.service, &key)?)
    }

    fn read_index(&self) -> CredentialResult<Vec<String>> {
        match self.index_entry()?.get_password() {
            Ok(json) => Ok(serde_json::from_str(&json)?),
            Err(keyring::Error::NoEntry) => {
                debug!("No credentials index found");
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn write_index(&self, ids: &[String]) -> CredentialResult<()> {
        let json = serde_json::to_string(ids)?;
        self.index_entry()?.set_password(&json)?;
        Ok(())
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn list(&self) -> CredentialResult<Vec<String>> {
        let _guard = self.index_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.read_index()
    }

    fn get(&self, user_id: &str) -> CredentialResult<Credentials> {
        match self.account_entry(user_id)?.get_password() {
            Ok(json) => Ok(serde_json::from_str(&json)?),
            Err(keyring::Error::NoEntry) => Err(CredentialError::NotFound(user_id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, credentials: &Credentials) -> CredentialResult<()> {
        let json = serde_json::to_string(credentials)?;
        self.account_entry(&credentials.user_id)?.set_password(&json)?;

        let _guard = self.index_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut ids = self.read_index()?;
        if !ids.contains(&credentials.user_id) {
            ids.push(credentials.user_id.clone());
            self.write_index(&ids)?;
        }
        debug!(user = %credentials.user_id, "Stored credentials in keyring");
        Ok(())
    }

    fn delete(&self, user_id: &str) -> CredentialResult<()> {
        match self.account_entry(user_id)?.delete_credential() {
            Ok(()) => debug!(user = %user_id, "Deleted credentials"),
            Err(keyring::Error::NoEntry) => {
                debug!(user = %user_id, "No credentials to delete");
            }
            Err(e) => {
                warn!("Failed to delete credentials: {e}");
                return Err(e.into());
            }
        }

        let _guard = self.index_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut ids = self.read_index()?;
        let before = ids.len();
        ids.retain(|id| id != user_id);
        if ids.len() != before {
            self.write_index(&ids)?;
        }
        Ok(())
    }
}

/// Credential store kept in memory, preserving insertion order.
#[derive(Default)]
pub struct MemoryCredentialStore {
    records: Mutex<Vec<Credentials>>,
}

impl MemoryCredentialStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with records, in order.
    #[must_use]
    pub fn with_records(records: Vec<Credentials>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn list(&self) -> CredentialResult<Vec<String>> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.iter().map(|c| c.user_id.clone()).collect())
    }

    fn get(&self, user_id: &str) -> CredentialResult<Credentials> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records
            .iter()
            .find(|c| c.user_id == user_id)
            .cloned()
            .ok_or_else(|| CredentialError::NotFound(user_id.to_string()))
    }

    fn save(&self, credentials: &Credentials) -> CredentialResult<()> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        match records.iter_mut().find(|c| c.user_id == credentials.user_id) {
            Some(existing) => *existing = credentials.clone(),
            None => records.push(credentials.clone()),
        }
        Ok(())
    }

    fn delete(&self, user_id: &str) -> CredentialResult<()> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.retain(|c| c.user_id != user_id);
        Ok(())
    }
}
