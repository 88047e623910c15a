//! # mailbridge-core
//!
//! Session layer of the `MailBridge` local mail bridge.
//!
//! This crate provides:
//! - **Session manager**: the ordered list of known accounts, login and
//!   reconnection, deletion and bulk cleanup ([`SessionManager`])
//! - **Accounts**: per-account session lifecycle ([`Account`])
//! - **Credential storage**: system keyring and in-memory stores
//! - **Event bus**: topic-based notifications to the UI and protocol server
//! - **Configuration**: paths, persisted preferences and the
//!   application-outdated flag
//!
//! The remote API, the mail store and the protocol server are provided by
//! the embedding application through the traits in [`mailbridge_api`] and
//! [`store`].

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod account;
pub mod config;
mod error;
pub mod events;
pub mod metrics;
mod services;
pub mod session;
pub mod store;

pub use account::credentials;
pub use account::{
    Account, ConnectionStatus, CredentialError, CredentialResult, CredentialStore, Credentials,
    KeyringCredentialStore, MemoryCredentialStore,
};
pub use config::{Config, Preferences};
pub use error::{Error, Result, ResultExt};
pub use events::{Event, EventListener, Listener};
pub use metrics::Metric;
pub use services::Services;
pub use session::SessionManager;
pub use store::{
    MailStore, MailboxSnapshot, StoreError, StoreFactory, StoreResult, Update, UpdateKind,
    UpdateReceiver, UpdateSender,
};
