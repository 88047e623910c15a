//! Error types for the core library.

use thiserror::Error;

use crate::account::CredentialError;
use crate::store::StoreError;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Remote API operation failed.
    #[error("API error: {0}")]
    Api(#[from] mailbridge_api::Error),

    /// Credential storage error.
    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    /// Mail store lifecycle error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The account already has a live session.
    #[error("user is already connected")]
    AlreadyConnected,

    /// No account matches the query.
    #[error("user {0} not found")]
    UserNotFound(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// An error with additional context.
    #[error("{context}: {source}")]
    Context {
        /// What was being attempted.
        context: String,
        /// Underlying error.
        source: Box<Error>,
    },

    /// Several independent operations failed.
    #[error("{} errors occurred: {}", .0.len(), join_errors(.0))]
    Multiple(Vec<Error>),
}

fn join_errors(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Wraps the error with context.
    #[must_use]
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Turns a list of errors into a single result.
    ///
    /// # Errors
    ///
    /// Returns the only error as is, or [`Error::Multiple`] if there are several.
    pub fn from_many(mut errors: Vec<Self>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Self::Multiple(errors)),
        }
    }

    /// Returns the innermost error, skipping context wrappers.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Context { source, .. } => source.root(),
            _ => self,
        }
    }

    /// Returns true if the application must be upgraded to continue.
    #[must_use]
    pub fn is_upgrade_required(&self) -> bool {
        matches!(self.root(), Self::Api(e) if e.is_upgrade_required())
    }

    /// Returns true if the account already had a live session.
    #[must_use]
    pub fn is_already_connected(&self) -> bool {
        matches!(self.root(), Self::AlreadyConnected)
    }

    /// Returns true if no account matched.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Self::UserNotFound(_))
    }

    /// Returns true if the remote side rejected the session token.
    #[must_use]
    pub fn is_invalid_token(&self) -> bool {
        matches!(self.root(), Self::Api(mailbridge_api::Error::InvalidToken))
    }
}

/// Adds context to fallible results.
pub trait ResultExt<T> {
    /// Wraps the error, if any, with context.
    ///
    /// # Errors
    ///
    /// Returns the original error wrapped in [`Error::Context`].
    fn context(self, context: &str) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: &str) -> Result<T> {
        self.map_err(|e| e.into().context(context))
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[test]
    fn test_context_display() {
        let err = Error::AlreadyConnected.context("failed to connect");
        assert_eq!(err.to_string(), "failed to connect: user is already connected");
    }

    #[test]
    fn test_classification_through_context() {
        let err = Error::from(mailbridge_api::Error::UpgradeApplication)
            .context("inner")
            .context("outer");
        assert!(err.is_upgrade_required());
        assert!(!err.is_already_connected());

        let err = Error::UserNotFound("u1".into()).context("lookup");
        assert!(err.is_not_found());

        let err: Result<()> = Err(mailbridge_api::Error::InvalidToken).context("refresh");
        assert!(err.unwrap_err().is_invalid_token());
    }

    #[test]
    fn test_from_many() {
        assert!(Error::from_many(Vec::new()).is_ok());

        let single = Error::from_many(vec![Error::AlreadyConnected]).unwrap_err();
        assert!(matches!(single, Error::AlreadyConnected));

        let multiple =
            Error::from_many(vec![Error::AlreadyConnected, Error::Config("bad".into())])
                .unwrap_err();
        assert_eq!(
            multiple.to_string(),
            "2 errors occurred: user is already connected; Configuration error: bad"
        );
    }
}
