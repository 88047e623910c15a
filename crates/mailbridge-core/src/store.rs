//! Mail store lifecycle contract.
//!
//! The local store and its synchronization are provided by the embedding
//! application; the session layer only opens, closes and clears stores
//! and hands them the shared update channel.

use std::sync::Arc;

use async_trait::async_trait;
use mailbridge_api::{Address, ApiClient, Label, MessagesCount};
use tokio::sync::mpsc;

/// Error type for store lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// I/O error (database file, cache directory, ...).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Remote call made by the store failed.
    #[error("API error: {0}")]
    Api(#[from] mailbridge_api::Error),

    /// The store was already closed.
    #[error("Store is closed")]
    Closed,

    /// Backend-specific failure.
    #[error("{0}")]
    Other(String),
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Kind of change pushed to the protocol server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateKind {
    /// Mailbox now holds `count` messages.
    Exists {
        /// Message count.
        count: u32,
    },
    /// Message with the given sequence number was removed.
    Expunge {
        /// Sequence number.
        seq: u32,
    },
    /// Message flags changed.
    Flags {
        /// Message UID.
        uid: u32,
        /// New flag set.
        flags: Vec<String>,
    },
    /// Mailbox was created, renamed or deleted.
    Mailbox,
}

/// An update published by a store. Opaque to the session layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    /// Account username.
    pub username: String,
    /// Mailbox the update refers to.
    pub mailbox: String,
    /// What changed.
    pub kind: UpdateKind,
}

/// Sending half of the shared update channel.
pub type UpdateSender = mpsc::Sender<Update>;

/// Receiving half of the shared update channel, drained by the protocol server.
pub type UpdateReceiver = mpsc::Receiver<Update>;

/// Remote state gathered while initialising an account, used to seed its store.
#[derive(Debug, Clone, Default)]
pub struct MailboxSnapshot {
    /// Labels of the account.
    pub labels: Vec<Label>,
    /// Message counters per label.
    pub counts: Vec<MessagesCount>,
    /// Addresses of the account.
    pub addresses: Vec<Address>,
}

/// An open mail store owned by one account.
#[async_trait]
pub trait MailStore: Send + Sync {
    /// Stops synchronization and releases files.
    async fn close(&self) -> StoreResult<()>;
}

/// Creates and removes per-account stores.
#[async_trait]
pub trait StoreFactory: Send + Sync {
    /// Opens the store of an account.
    async fn open(
        &self,
        user_id: &str,
        client: Arc<dyn ApiClient>,
        snapshot: MailboxSnapshot,
        updates: UpdateSender,
    ) -> StoreResult<Box<dyn MailStore>>;

    /// Deletes the cached data of an account. The store must be closed.
    fn remove(&self, user_id: &str) -> StoreResult<()>;
}
