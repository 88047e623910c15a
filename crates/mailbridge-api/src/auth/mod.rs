//! Session authentication types.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Two-factor state of an authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TwoFactor {
    /// Account has no second factor configured.
    #[default]
    Disabled,
    /// A second factor must be submitted before the session has full scope.
    Pending,
    /// Second factor was accepted.
    Passed,
}

/// Password mode of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PasswordMode {
    /// Login password also unlocks the mailbox.
    #[default]
    Single,
    /// A separate mailbox passphrase is required.
    Two,
}

/// An authenticated API session.
///
/// The persisted form of a session is the token returned by [`Auth::gen_token`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auth {
    /// Session UID assigned by the server.
    pub uid: String,
    /// Short-lived access token.
    #[serde(default)]
    pub access_token: String,
    /// Refresh token used to obtain a new session.
    pub refresh_token: String,
    /// Expiration time of the access token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Scope granted by the server.
    #[serde(default)]
    pub scope: String,
    /// Two-factor state.
    #[serde(default)]
    pub two_factor: TwoFactor,
    /// Password mode.
    #[serde(default)]
    pub password_mode: PasswordMode,
    /// Salt for the mailbox passphrase, if the server sent one with the session.
    #[serde(default)]
    pub key_salt: String,
}

impl Auth {
    /// Creates a new session from its UID and refresh token.
    #[must_use]
    pub fn new(uid: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            access_token: String::new(),
            refresh_token: refresh_token.into(),
            expires_at: None,
            scope: String::new(),
            two_factor: TwoFactor::Disabled,
            password_mode: PasswordMode::Single,
            key_salt: String::new(),
        }
    }

    /// Rebuilds a session from a token produced by [`Auth::gen_token`].
    ///
    /// Returns `None` for an empty token or a token without a separator.
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        let (uid, refresh) = token.split_once(':')?;
        if refresh.is_empty() {
            return None;
        }
        Some(Self::new(uid, refresh))
    }

    /// Sets the access token and its lifetime in seconds.
    #[must_use]
    pub fn with_access_token(mut self, access_token: impl Into<String>, expires_in: u32) -> Self {
        self.access_token = access_token.into();
        self.expires_at = Some(Utc::now() + Duration::seconds(i64::from(expires_in)));
        self
    }

    /// Sets the expiration time.
    #[must_use]
    pub const fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Sets the two-factor state.
    #[must_use]
    pub const fn with_two_factor(mut self, two_factor: TwoFactor) -> Self {
        self.two_factor = two_factor;
        self
    }

    /// Sets the password mode.
    #[must_use]
    pub const fn with_password_mode(mut self, password_mode: PasswordMode) -> Self {
        self.password_mode = password_mode;
        self
    }

    /// Generates the persisted token: `<uid>:<refresh_token>`.
    #[must_use]
    pub fn gen_token(&self) -> String {
        format!("{}:{}", self.uid, self.refresh_token)
    }

    /// Checks if the access token is expired (with 60 second buffer).
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|exp| Utc::now() + Duration::seconds(60) >= exp)
    }

    /// Returns true if a second factor still has to be submitted.
    #[must_use]
    pub fn has_two_factor(&self) -> bool {
        self.two_factor == TwoFactor::Pending
    }

    /// Returns true if the account needs a separate mailbox passphrase.
    #[must_use]
    pub fn has_mailbox_password(&self) -> bool {
        self.password_mode == PasswordMode::Two
    }
}

/// Pre-authentication parameters returned for a username.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthInfo {
    /// Authentication protocol version.
    pub version: u32,
    /// Salt for the login password.
    pub salt: String,
    /// Server ephemeral value for the handshake.
    pub server_ephemeral: String,
    /// Handshake session identifier.
    pub session: String,
    /// Whether the account has two-factor authentication enabled.
    pub two_factor_enabled: bool,
}

/// Inbound notification that an account's session changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEvent {
    /// Account the event refers to.
    pub user_id: String,
    /// Fresh session, or `None` if the session became invalid.
    pub auth: Option<Auth>,
}

impl AuthEvent {
    /// Creates a refresh event.
    #[must_use]
    pub fn refreshed(user_id: impl Into<String>, auth: Auth) -> Self {
        Self {
            user_id: user_id.into(),
            auth: Some(auth),
        }
    }

    /// Creates an invalidation event.
    #[must_use]
    pub fn invalidated(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            auth: None,
        }
    }

    /// Returns true if the session was invalidated.
    #[must_use]
    pub const fn is_logout(&self) -> bool {
        self.auth.is_none()
    }
}
