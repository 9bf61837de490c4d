//! Hardware device manager - time-boxed, cancellable device operations
//!
//! Wraps the raw transport with per-operation deadlines and the readiness
//! checks callers must not skip. Raw transport errors never leave this
//! module unclassified.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::DeviceConfig;
use crate::error::{Error, Result};
use crate::keys::{DerivationPath, ExtPubKey};

use super::transport::DeviceTransport;
use super::types::{DeviceDescriptor, DeviceReadiness};

/// Manages attached hardware devices across one load attempt
pub struct HardwareDeviceManager {
    transport: Arc<dyn DeviceTransport>,
    config: DeviceConfig,
}

impl HardwareDeviceManager {
    pub fn new(transport: Arc<dyn DeviceTransport>, config: DeviceConfig) -> Self {
        Self { transport, config }
    }

    /// Query all attached devices.
    ///
    /// Completes or fails within the enumerate time box. Nothing attached
    /// is an empty Vec, never an error.
    pub async fn enumerate(&self, cancel: &CancellationToken) -> Result<Vec<DeviceDescriptor>> {
        let devices = self
            .time_boxed(
                "Device enumeration",
                self.config.enumerate_timeout(),
                cancel,
                |op_cancel| async move { self.transport.enumerate(&op_cancel).await },
            )
            .await?;

        debug!("Enumerated {} hardware device(s)", devices.len());
        Ok(devices)
    }

    /// Run first-time initialization on a device.
    ///
    /// Time-boxed generously: the operator may be transcribing a recovery
    /// phrase by hand. On success the descriptor is stale; the caller must
    /// re-enumerate before trusting any capability flag.
    pub async fn setup_device(
        &self,
        descriptor: &DeviceDescriptor,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let interactive = descriptor.model.requires_interactive_setup();
        info!(
            model = %descriptor.model,
            path = %descriptor.path,
            interactive,
            "Setting up hardware wallet"
        );

        self.time_boxed(
            "Device setup",
            self.config.setup_timeout(),
            cancel,
            |op_cancel| async move {
                self.transport
                    .setup(&descriptor.model, &descriptor.path, interactive, &op_cancel)
                    .await
            },
        )
        .await
    }

    /// Drive the interactive PIN unlock.
    ///
    /// Operator-paced, so no deadline of its own; still aborts when the
    /// session is cancelled. Success stales the descriptor.
    pub async fn unlock_with_pin(
        &self,
        descriptor: &DeviceDescriptor,
        cancel: &CancellationToken,
    ) -> Result<()> {
        info!(model = %descriptor.model, path = %descriptor.path, "Unlocking hardware wallet");

        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = self.transport.unlock(&descriptor.path, cancel) => result,
        }
    }

    /// Retrieve the extended public key at a derivation path.
    ///
    /// Refuses immediately when the descriptor is not ready; callers must
    /// run setup or unlock first.
    pub async fn fetch_ext_pub_key(
        &self,
        descriptor: &DeviceDescriptor,
        derivation: &DerivationPath,
        cancel: &CancellationToken,
    ) -> Result<ExtPubKey> {
        match descriptor.readiness() {
            DeviceReadiness::NeedsSetup => return Err(Error::DeviceNotInitialized),
            DeviceReadiness::NeedsPin => return Err(Error::DevicePinRequired),
            DeviceReadiness::Ready => {}
        }

        info!(
            model = %descriptor.model,
            path = %descriptor.path,
            derivation = %derivation,
            "Acquiring extended public key"
        );

        self.time_boxed(
            "Extended public key fetch",
            self.config.xpub_timeout(),
            cancel,
            |op_cancel| async move {
                self.transport
                    .get_ext_pub_key(&descriptor.model, &descriptor.path, derivation, &op_cancel)
                    .await
            },
        )
        .await
    }

    /// Run one transport operation under its own deadline, propagating
    /// session cancellation into the operation's scoped token.
    async fn time_boxed<T, F, Fut>(
        &self,
        operation: &'static str,
        limit: Duration,
        cancel: &CancellationToken,
        run: F,
    ) -> Result<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        // Scope cancellation to this one operation; dropping the guard on
        // any exit path cancels the child token and with it the transport
        // call's resources.
        let op_cancel = cancel.child_token();
        let guard = op_cancel.clone().drop_guard();

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            outcome = tokio::time::timeout(limit, run(op_cancel.clone())) => match outcome {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout {
                    operation,
                    limit_secs: limit.as_secs(),
                }),
            },
        };

        drop(guard);
        result
    }
}
