//! Error types for remote API operations.

/// Result type alias for remote API operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Remote API error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The client software is too old to keep talking to the API.
    ///
    /// Callers must not retry; a global upgrade notification is expected instead.
    #[error("Application must be upgraded")]
    UpgradeApplication,

    /// Access or refresh token was rejected.
    #[error("Invalid or expired token")]
    InvalidToken,

    /// Username/password rejected by the server.
    #[error("Authentication rejected: {0}")]
    Unauthorized(String),

    /// Mailbox passphrase does not unlock the account keys.
    #[error("Incorrect mailbox passphrase")]
    BadPassphrase,

    /// Key unlocking failed for a reason other than a wrong passphrase.
    #[error("Failed to unlock keys: {0}")]
    Unlock(String),

    /// Key salt returned by the server could not be decoded.
    #[error("Invalid key salt: {0}")]
    InvalidSalt(String),

    /// The mailbox passphrase could not be hashed.
    #[error("Failed to hash mailbox passphrase: {0}")]
    PassphraseHash(String),

    /// Transport-level failure (connection refused, timeout, ...).
    #[error("Network error: {0}")]
    Network(String),

    /// Any other error reported by the API.
    #[error("API error {code}: {message}")]
    Api {
        /// Numeric API error code.
        code: u32,
        /// Human-readable message.
        message: String,
    },
}

impl Error {
    /// Creates an API error from a code and message.
    #[must_use]
    pub fn api(code: u32, message: impl Into<String>) -> Self {
        Self::Api {
            code,
            message: message.into(),
        }
    }

    /// Returns true if this error means the application must be upgraded.
    #[must_use]
    pub const fn is_upgrade_required(&self) -> bool {
        matches!(self, Self::UpgradeApplication)
    }
}
