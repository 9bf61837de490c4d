//! Load session state and progress reporting

use uuid::Uuid;

use crate::device::{DeviceDescriptor, DevicePath};
use crate::keys::{PasswordOutcome, WalletRecord};

/// Where the key material for one load comes from
#[derive(Debug, Clone)]
pub enum LoadSource {
    /// Load an already-registered wallet file by name
    File { wallet_name: String },

    /// Verify a password against a wallet record, then load it
    PasswordCheck {
        wallet_name: String,
        password: String,
    },

    /// Acquire key material from an attached hardware device.
    /// `device_path` pins a specific device; otherwise the first
    /// enumerated one is used.
    Hardware { device_path: Option<DevicePath> },
}

/// Progress of the in-flight load, published for presentation.
///
/// Presentation is a consumer of these transitions; the orchestrator holds
/// no display state of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    Idle,
    Enumerating,
    SettingUp,
    AwaitingPin,
    FetchingKey,
    Resolving,
    Loading,
}

impl LoadPhase {
    /// Operator-facing status line for this phase
    pub fn describe(&self) -> &'static str {
        match self {
            LoadPhase::Idle => "Idle",
            LoadPhase::Enumerating => "Searching for hardware wallets...",
            LoadPhase::SettingUp => "Setting up hardware wallet...",
            LoadPhase::AwaitingPin => "Waiting for PIN...",
            LoadPhase::FetchingKey => "Acquiring extended public key from hardware wallet...",
            LoadPhase::Resolving => "Reconciling wallet records...",
            LoadPhase::Loading => "Loading wallet...",
        }
    }
}

/// Transient state of one load invocation. Created at entry, discarded at
/// exit, never shared across concurrent loads.
#[derive(Debug)]
pub struct LoadSession {
    pub id: Uuid,
    pub source: LoadSource,
    /// Device currently targeted by the hardware flow, if any
    pub selected: Option<DeviceDescriptor>,
    /// Completed setup/unlock re-entries of the hardware flow
    pub attempts: u32,
}

impl LoadSession {
    pub fn new(source: LoadSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            selected: None,
            attempts: 0,
        }
    }
}

/// The result handed off to wallet startup. This subsystem's
/// responsibility ends here.
#[derive(Debug, Clone)]
pub struct LoadedWallet {
    pub session_id: Uuid,
    pub record: WalletRecord,
    /// Which password derivation matched, for password-check loads.
    /// `Some(Legacy)` means the caller should warn about the deprecated
    /// format.
    pub password_outcome: Option<PasswordOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sessions_are_distinct() {
        let a = LoadSession::new(LoadSource::Hardware { device_path: None });
        let b = LoadSession::new(LoadSource::Hardware { device_path: None });
        assert_ne!(a.id, b.id);
        assert_eq!(a.attempts, 0);
    }

    #[test]
    fn test_phase_descriptions_are_distinct() {
        let phases = [
            LoadPhase::Idle,
            LoadPhase::Enumerating,
            LoadPhase::SettingUp,
            LoadPhase::AwaitingPin,
            LoadPhase::FetchingKey,
            LoadPhase::Resolving,
            LoadPhase::Loading,
        ];
        for (i, a) in phases.iter().enumerate() {
            for b in &phases[i + 1..] {
                assert_ne!(a.describe(), b.describe());
            }
        }
    }
}
