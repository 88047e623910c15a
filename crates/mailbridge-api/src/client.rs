//! Remote API client contracts.
//!
//! The session layer never talks to the network directly; it drives
//! implementations of [`ApiClient`] handed out by a [`ClientManager`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::auth::{Auth, AuthEvent, AuthInfo};
use crate::error::Result;

/// Remote user record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiUser {
    /// Stable account identifier.
    pub id: String,
    /// Login name.
    pub name: String,
    /// Display name.
    #[serde(default)]
    pub display_name: String,
}

/// Status of an address on the remote account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AddressStatus {
    /// Address receives and sends mail.
    #[default]
    Enabled,
    /// Address was disabled by the user or an administrator.
    Disabled,
}

/// An address attached to a remote account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Address identifier.
    pub id: String,
    /// Email address.
    pub email: String,
    /// Address status.
    pub status: AddressStatus,
    /// Whether the address accepts incoming mail.
    pub receive: bool,
}

impl Address {
    /// Creates an enabled, receiving address.
    #[must_use]
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            status: AddressStatus::Enabled,
            receive: true,
        }
    }

    /// Returns true if the address is enabled and receives mail.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == AddressStatus::Enabled && self.receive
    }
}

/// Returns the emails of all active addresses, in order.
#[must_use]
pub fn active_emails(addresses: &[Address]) -> Vec<String> {
    addresses
        .iter()
        .filter(|a| a.is_active())
        .map(|a| a.email.clone())
        .collect()
}

/// A label (folder) on the remote account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    /// Label identifier.
    pub id: String,
    /// Label name.
    pub name: String,
    /// Exclusive labels behave like folders.
    pub exclusive: bool,
}

/// Message counters for a label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagesCount {
    /// Label identifier.
    pub label_id: String,
    /// Total number of messages.
    pub total: u32,
    /// Number of unread messages.
    pub unread: u32,
}

/// Client bound to one API session.
///
/// Every call may block on network I/O.
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Requests handshake parameters for a username.
    async fn auth_info(&self, username: &str) -> Result<AuthInfo>;

    /// Exchanges credentials for a session.
    ///
    /// The returned session may still require a second factor.
    async fn auth(&self, username: &str, password: &str, info: &AuthInfo) -> Result<Auth>;

    /// Submits a second factor for a pending session.
    async fn auth_2fa(&self, code: &str, auth: &Auth) -> Result<()>;

    /// Refreshes a session from its persisted token.
    async fn auth_refresh(&self, token: &str) -> Result<Auth>;

    /// Returns the salt of the account's primary key.
    async fn auth_salt(&self) -> Result<String>;

    /// Unlocks the account's private keys with a hashed passphrase.
    async fn unlock(&self, passphrase: &[u8]) -> Result<()>;

    /// Unlocks the keys of every address with a hashed passphrase.
    async fn unlock_addresses(&self, passphrase: &[u8]) -> Result<()>;

    /// Fetches the current user record.
    async fn current_user(&self) -> Result<ApiUser>;

    /// Lists the account's addresses.
    async fn addresses(&self) -> Result<Vec<Address>>;

    /// Lists the account's labels.
    async fn list_labels(&self) -> Result<Vec<Label>>;

    /// Counts messages per label, optionally restricted to one address.
    async fn count_messages(&self, address_id: &str) -> Result<Vec<MessagesCount>>;

    /// Deletes the session on the server side.
    async fn delete_auth(&self) -> Result<()>;

    /// Drops the client's local session state.
    async fn logout(&self);

    /// Submits an anonymous usage metric.
    async fn send_simple_metric(&self, category: &str, action: &str, label: &str) -> Result<()>;
}

/// Hands out API clients and publishes session changes.
#[async_trait]
pub trait ClientManager: Send + Sync {
    /// Returns the client bound to an account's session.
    fn client(&self, user_id: &str) -> Arc<dyn ApiClient>;

    /// Returns a fresh client with no bound identity.
    fn anonymous_client(&self) -> Arc<dyn ApiClient>;

    /// Subscribes to session refresh/invalidation events.
    fn auth_updates(&self) -> broadcast::Receiver<AuthEvent>;

    /// Allows routing through an alternative API proxy.
    fn allow_proxy(&self);

    /// Forbids routing through an alternative API proxy.
    fn disallow_proxy(&self);

    /// Checks whether the API is reachable.
    async fn check_connection(&self) -> Result<()>;
}
