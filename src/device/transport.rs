//! Transport boundary to physical hardware wallets
//!
//! The manager and orchestrator only see this trait; the concrete wire
//! protocol lives behind it (see [`crate::device::hwi`]).

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::keys::{DerivationPath, ExtPubKey};

use super::types::{DeviceDescriptor, DeviceModel, DevicePath};

/// Sends enumerate/setup/unlock/key requests to attached devices.
///
/// All calls are cancel-sensitive: when the token fires mid-operation the
/// implementation must abort promptly and release its transport handle.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// List every attached device. No device attached is an empty Vec,
    /// never an error.
    async fn enumerate(&self, cancel: &CancellationToken) -> Result<Vec<DeviceDescriptor>>;

    /// Run first-time device initialization. `interactive` selects the
    /// confirmation style for families that need operator input on the host.
    async fn setup(
        &self,
        model: &DeviceModel,
        path: &DevicePath,
        interactive: bool,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Drive an interactive PIN exchange. Suspends until the operator
    /// supplies a PIN or cancels.
    async fn unlock(&self, path: &DevicePath, cancel: &CancellationToken) -> Result<()>;

    /// Retrieve the extended public key at a derivation path
    async fn get_ext_pub_key(
        &self,
        model: &DeviceModel,
        path: &DevicePath,
        derivation: &DerivationPath,
        cancel: &CancellationToken,
    ) -> Result<ExtPubKey>;
}

/// Operator-facing PIN entry, injected into transports that need it
#[async_trait]
pub trait PinPrompt: Send + Sync {
    /// Ask the operator for a PIN. `None` means they cancelled the entry.
    async fn request_pin(&self, device: &DevicePath) -> Result<Option<String>>;
}
