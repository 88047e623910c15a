//! # mailbridge-api
//!
//! Vocabulary of the remote mail API as seen by the `MailBridge` session layer.
//!
//! ## Features
//!
//! - **Sessions**: [`Auth`] with persisted token form, expiry and two-factor state
//! - **Client contracts**: [`ApiClient`] for bound/anonymous sessions and
//!   [`ClientManager`] for handing them out and publishing [`AuthEvent`]s
//! - **Error taxonomy**: [`Error`] with the distinguished
//!   [`Error::UpgradeApplication`] sentinel
//! - **Passphrase hashing**: [`hash_mailbox_password`]
//!
//! ## Login handshake
//!
//! ```ignore
//! use mailbridge_api::{ClientManager, hash_mailbox_password};
//!
//! let client = manager.anonymous_client();
//! let info = client.auth_info("user@example.com").await?;
//! let auth = client.auth("user@example.com", "password", &info).await?;
//!
//! let salt = client.auth_salt().await?;
//! let hashed = hash_mailbox_password("mailbox passphrase", &salt)?;
//! client.unlock(hashed.as_bytes()).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod auth;
pub mod client;
mod error;
mod password;

pub use auth::{Auth, AuthEvent, AuthInfo, PasswordMode, TwoFactor};
pub use client::{
    Address, AddressStatus, ApiClient, ApiUser, ClientManager, Label, MessagesCount,
    active_emails,
};
pub use error::{Error, Result};
pub use password::hash_mailbox_password;
