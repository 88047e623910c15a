//! Account management module.
//!
//! Provides the per-account session lifecycle and credential storage.

pub mod credentials;
mod model;

pub use credentials::{
    CredentialError, CredentialResult, CredentialStore, Credentials, KeyringCredentialStore,
    MemoryCredentialStore,
};
pub use model::{Account, ConnectionStatus};
