//! Hardware device descriptors

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::keys::Fingerprint;

/// Supported hardware wallet families
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceModel {
    TrezorOne,
    TrezorT,
    TrezorTSimulator,
    LedgerNanoS,
    LedgerNanoX,
    Coldcard,
    KeepKey,
    /// Device types this build does not know about yet; carried through
    /// so enumeration never drops an attached device
    Unknown(String),
}

impl DeviceModel {
    /// Map an HWI device type string to a model
    pub fn from_hwi_type(device_type: &str, model: &str) -> Self {
        match (device_type, model) {
            ("trezor", m) if m.contains("trezor_t") && m.contains("simulator") => {
                DeviceModel::TrezorTSimulator
            }
            ("trezor", m) if m.contains("trezor_t") => DeviceModel::TrezorT,
            ("trezor", _) => DeviceModel::TrezorOne,
            ("ledger", m) if m.contains("nano_x") => DeviceModel::LedgerNanoX,
            ("ledger", _) => DeviceModel::LedgerNanoS,
            ("coldcard", _) => DeviceModel::Coldcard,
            ("keepkey", _) => DeviceModel::KeepKey,
            (other, _) => DeviceModel::Unknown(other.to_string()),
        }
    }

    /// HWI device type argument for this model
    pub fn hwi_type(&self) -> &str {
        match self {
            DeviceModel::TrezorOne | DeviceModel::TrezorT | DeviceModel::TrezorTSimulator => {
                "trezor"
            }
            DeviceModel::LedgerNanoS | DeviceModel::LedgerNanoX => "ledger",
            DeviceModel::Coldcard => "coldcard",
            DeviceModel::KeepKey => "keepkey",
            DeviceModel::Unknown(raw) => raw,
        }
    }

    /// Whether first-time setup needs operator confirmation on the host.
    /// The Trezor T family confirms on its own touchscreen.
    pub fn requires_interactive_setup(&self) -> bool {
        !matches!(self, DeviceModel::TrezorT | DeviceModel::TrezorTSimulator)
    }

    /// Prefix for naming watch-only wallet records created for this model
    pub fn wallet_name_prefix(&self) -> &str {
        match self {
            DeviceModel::TrezorOne => "TrezorOne",
            DeviceModel::TrezorT => "TrezorT",
            DeviceModel::TrezorTSimulator => "TrezorTSimulator",
            DeviceModel::LedgerNanoS => "LedgerNanoS",
            DeviceModel::LedgerNanoX => "LedgerNanoX",
            DeviceModel::Coldcard => "Coldcard",
            DeviceModel::KeepKey => "KeepKey",
            DeviceModel::Unknown(_) => "HardwareWallet",
        }
    }
}

impl fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceModel::Unknown(raw) => write!(f, "unknown ({})", raw),
            other => write!(f, "{}", other.wallet_name_prefix()),
        }
    }
}

/// Opaque transport handle for one attached device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DevicePath(pub String);

impl fmt::Display for DevicePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One attached hardware device as reported by a single enumeration.
///
/// Descriptors are only fresh immediately after enumeration: setup and
/// unlock invalidate them, and a new enumeration replaces the entire set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub model: DeviceModel,
    pub path: DevicePath,
    pub initialized: bool,
    pub needs_pin: bool,
    pub fingerprint: Option<Fingerprint>,
}

impl DeviceDescriptor {
    /// Classify what this device needs before a key can be fetched
    pub fn readiness(&self) -> DeviceReadiness {
        if !self.initialized {
            DeviceReadiness::NeedsSetup
        } else if self.needs_pin {
            DeviceReadiness::NeedsPin
        } else {
            DeviceReadiness::Ready
        }
    }

    /// Whether another descriptor refers to the same physical device.
    /// Identity across re-enumerations is model + transport path.
    pub fn same_device(&self, other: &DeviceDescriptor) -> bool {
        self.model == other.model && self.path == other.path
    }
}

/// Per-device readiness within one load attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceReadiness {
    /// First-time initialization has not run
    NeedsSetup,
    /// Initialized but locked behind a PIN
    NeedsPin,
    /// A key can be fetched
    Ready,
}
