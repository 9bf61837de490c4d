//! Persisted wallet records and password verification

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::types::{ExtPubKey, Fingerprint};

/// One persisted wallet entry.
///
/// Invariant: at most one record carries a given non-null fingerprint.
/// Enforced by the resolver's lookup-before-create step, not by storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletRecord {
    /// Unique wallet name (doubles as the record file stem)
    pub wallet_name: String,

    /// Account-level extended public key, if known
    pub ext_pub_key: Option<ExtPubKey>,

    /// Master key fingerprint of the originating device
    pub master_fingerprint: Option<Fingerprint>,

    /// Watch-only wallets hold no signing material
    pub is_watch_only: bool,

    /// Whether the stored password has been verified this install
    pub password_verified: bool,

    /// Hex sha256 digest of the wallet password (absent for watch-only)
    pub password_digest: Option<String>,

    /// Last time this wallet was opened
    pub last_access_time: DateTime<Utc>,
}

impl WalletRecord {
    /// Create a watch-only record for a hardware device
    pub fn watch_only(name: &str, fingerprint: Fingerprint, ext_pub_key: ExtPubKey) -> Self {
        Self {
            wallet_name: name.to_string(),
            ext_pub_key: Some(ext_pub_key),
            master_fingerprint: Some(fingerprint),
            is_watch_only: true,
            password_verified: false,
            password_digest: None,
            last_access_time: Utc::now(),
        }
    }

    /// Create a password-protected record (non-hardware wallet)
    pub fn with_password(name: &str, password: &str) -> Self {
        Self {
            wallet_name: name.to_string(),
            ext_pub_key: None,
            master_fingerprint: None,
            is_watch_only: false,
            password_verified: false,
            password_digest: Some(primary_digest(password.trim())),
            last_access_time: Utc::now(),
        }
    }

    /// Check a supplied password against the stored digest.
    ///
    /// Leading/trailing whitespace is not significant; internal whitespace
    /// is. One legacy derivation is accepted for records written by old
    /// releases that mangled non-ASCII passwords, so the caller can warn
    /// that a deprecated format matched.
    pub fn check_password(&self, supplied: &str) -> PasswordOutcome {
        let Some(stored) = &self.password_digest else {
            return PasswordOutcome::Mismatch;
        };

        let trimmed = supplied.trim();

        if primary_digest(trimmed) == *stored {
            return PasswordOutcome::Primary;
        }

        if legacy_digest(trimmed) == *stored {
            return PasswordOutcome::Legacy;
        }

        PasswordOutcome::Mismatch
    }

    /// Bump the access timestamp
    pub fn touch(&mut self) {
        self.last_access_time = Utc::now();
    }
}

/// Which derivation a supplied password matched, if any.
///
/// A mismatch is a value, not an error: wrong passwords are an expected
/// user outcome, surfaced as a rejection rather than a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordOutcome {
    /// Matched the current derivation
    Primary,
    /// Matched the legacy derivation; caller should warn about the
    /// deprecated format
    Legacy,
    /// Matched neither derivation
    Mismatch,
}

/// Current derivation: sha256 over the trimmed UTF-8 bytes
fn primary_digest(trimmed: &str) -> String {
    hex::encode(Sha256::digest(trimmed.as_bytes()))
}

/// Legacy derivation: old releases pushed each scalar through a lossy
/// Latin-1 conversion, truncating every character to its low byte before
/// hashing. ASCII passwords are unaffected (their legacy digest equals the
/// primary one); non-ASCII passwords stored by those releases only match
/// through this path.
fn legacy_digest(trimmed: &str) -> String {
    let mangled: Vec<u8> = trimmed.chars().map(|c| (c as u32 & 0xFF) as u8).collect();
    hex::encode(Sha256::digest(&mangled))
}
