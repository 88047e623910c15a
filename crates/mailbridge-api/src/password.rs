//! Mailbox passphrase hashing.
//!
//! The hashed passphrase is what unlocks the account keys and what the
//! credential store persists; the plain passphrase is never stored.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bcrypt::Version;

use crate::error::{Error, Result};

/// bcrypt cost used by the server when it derived the key passphrase.
const BCRYPT_COST: u32 = 10;

/// Length of the checksum part of a bcrypt hash.
const HASH_LEN: usize = 31;

/// Hashes a mailbox passphrase with the key salt returned by the server.
///
/// An empty salt means the account keys are not salted and the passphrase
/// is used as is. Otherwise the salt is decoded to 16 bytes, the
/// passphrase is hashed as `$2y$10$<salt><hash>` and only the trailing
/// 31-character hash is kept.
///
/// # Errors
///
/// Returns [`Error::InvalidSalt`] if the salt is not base64 for exactly
/// 16 bytes, or [`Error::PassphraseHash`] if bcrypt rejects the input.
pub fn hash_mailbox_password(passphrase: &str, salt: &str) -> Result<String> {
    if salt.is_empty() {
        return Ok(passphrase.to_string());
    }

    let decoded = STANDARD
        .decode(salt)
        .map_err(|e| Error::InvalidSalt(e.to_string()))?;
    let salt: [u8; 16] = decoded.try_into().map_err(|bytes: Vec<u8>| {
        Error::InvalidSalt(format!("expected 16 bytes, got {}", bytes.len()))
    })?;

    let parts = bcrypt::hash_with_salt(passphrase, BCRYPT_COST, salt)
        .map_err(|e| Error::PassphraseHash(e.to_string()))?;

    let mut hashed = parts.format_for_version(Version::TwoY);
    Ok(hashed.split_off(hashed.len() - HASH_LEN))
}
