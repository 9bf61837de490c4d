//! Error types for the wallet loader

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the wallet loader
#[derive(Error, Debug)]
pub enum Error {
    // Device errors
    #[error("No hardware wallet detected")]
    NoDeviceDetected,

    #[error("Could not find the hardware wallet. Did you disconnect it?")]
    DeviceDisconnected,

    #[error("Hardware wallet is not initialized")]
    DeviceNotInitialized,

    #[error("Hardware wallet needs a PIN to be sent")]
    DevicePinRequired,

    #[error("Hardware wallet did not provide a fingerprint")]
    MissingFingerprint,

    #[error("Device transport error: {0}")]
    Transport(String),

    // Time-boxing / cancellation
    #[error("{operation} timed out after {limit_secs}s")]
    Timeout {
        operation: &'static str,
        limit_secs: u64,
    },

    #[error("Operation cancelled")]
    Cancelled,

    // Load sequencing errors
    #[error("A wallet load is already in progress")]
    LoadInProgress,

    #[error("Device retry limit reached after {0} attempts")]
    RetryLimitReached(u32),

    // Wallet record errors
    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    #[error("Wallet '{0}' is watch-only and has no password")]
    WatchOnlyWallet(String),

    #[error("Wrong password")]
    WrongPassword,

    #[error("Password of wallet '{0}' has not been verified yet")]
    PasswordVerificationRequired(String),

    #[error("Storage error: {0}")]
    Storage(String),

    // Key material errors
    #[error("Invalid extended public key: {0}")]
    InvalidExtPubKey(String),

    #[error("Invalid derivation path: {0}")]
    InvalidDerivationPath(String),

    #[error("Invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error is recoverable by the operator (retry, reconnect,
    /// correct the password). These are surfaced as warnings, not faults.
    pub fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            Error::NoDeviceDetected
                | Error::DeviceDisconnected
                | Error::DeviceNotInitialized
                | Error::DevicePinRequired
                | Error::WatchOnlyWallet(_)
                | Error::WrongPassword
                | Error::PasswordVerificationRequired(_)
                | Error::Cancelled
                | Error::RetryLimitReached(_)
                | Error::Timeout { .. }
        )
    }

    /// Check if this error is a time-boxed operation exceeding its bound
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// Check if this error indicates a broken internal invariant.
    /// Fatal to the current load attempt, logged at error severity.
    pub fn is_internal_consistency(&self) -> bool {
        matches!(self, Error::MissingFingerprint | Error::Internal(_))
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_classification() {
        let err = Error::Timeout {
            operation: "enumerate",
            limit_secs: 180,
        };
        assert!(err.is_timeout());
        assert!(err.is_user_recoverable());
        assert!(!err.is_internal_consistency());
    }

    #[test]
    fn test_missing_fingerprint_is_internal() {
        assert!(Error::MissingFingerprint.is_internal_consistency());
        assert!(!Error::MissingFingerprint.is_user_recoverable());
    }

    #[test]
    fn test_wrong_password_is_recoverable() {
        assert!(Error::WrongPassword.is_user_recoverable());
        assert!(!Error::Storage("disk full".into()).is_user_recoverable());
    }

    #[test]
    fn test_watch_only_password_check_is_recoverable() {
        let err = Error::WatchOnlyWallet("Coldcard".into());
        assert!(err.is_user_recoverable());
        assert!(!err.is_internal_consistency());
    }
}
