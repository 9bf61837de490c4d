//! HWI subprocess transport
//!
//! Drives the `hwi` binary and parses its JSON output. Every invocation
//! is a short-lived child process killed on drop, so cancelling the
//! enclosing operation releases the transport handle immediately.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::HwiConfig;
use crate::error::{Error, Result};
use crate::keys::{DerivationPath, ExtPubKey};

use super::transport::{DeviceTransport, PinPrompt};
use super::types::{DeviceDescriptor, DeviceModel, DevicePath};

/// HWI error code for an uninitialized device (hwilib
/// DEVICE_NOT_INITIALIZED; -14 is ACTION_CANCELED, a different condition)
const DEVICE_NOT_INITIALIZED: i64 = -18;

/// Transport backed by the HWI command-line tool
pub struct HwiTransport {
    binary: String,
    chain: String,
    pin_prompt: Arc<dyn PinPrompt>,
}

/// One entry of `hwi enumerate` output
#[derive(Debug, Deserialize)]
struct EnumerateEntry {
    #[serde(rename = "type")]
    device_type: String,
    #[serde(default)]
    model: String,
    path: String,
    #[serde(default)]
    needs_pin_sent: bool,
    #[serde(default)]
    fingerprint: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    code: Option<i64>,
}

/// Result object for setup/sendpin style commands
#[derive(Debug, Deserialize)]
struct SuccessReply {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct XpubReply {
    xpub: String,
}

impl HwiTransport {
    pub fn new(config: &HwiConfig, pin_prompt: Arc<dyn PinPrompt>) -> Self {
        Self {
            binary: config.binary.clone(),
            chain: config.chain.clone(),
            pin_prompt,
        }
    }

    /// Run one hwi invocation and return its parsed stdout
    async fn run(&self, args: &[&str], cancel: &CancellationToken) -> Result<serde_json::Value> {
        debug!(binary = %self.binary, ?args, "Invoking hwi");

        let mut command = Command::new(&self.binary);
        command
            .arg("--chain")
            .arg(&self.chain)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command
            .spawn()
            .map_err(|e| Error::Transport(format!("Failed to spawn {}: {}", self.binary, e)))?;

        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            output = child.wait_with_output() => {
                output.map_err(|e| Error::Transport(e.to_string()))?
            }
        };

        if !output.status.success() && output.stdout.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Transport(format!(
                "hwi exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let value: serde_json::Value = serde_json::from_str(stdout.trim())
            .map_err(|e| Error::Transport(format!("Unparsable hwi output: {}", e)))?;

        // hwi reports command failures as {"error": ..., "code": ...}
        if let Some(message) = value.get("error").and_then(|e| e.as_str()) {
            return Err(Error::Transport(message.to_string()));
        }

        Ok(value)
    }

    fn device_args<'a>(model: &'a DeviceModel, path: &'a DevicePath) -> [&'a str; 4] {
        ["--device-type", model.hwi_type(), "--device-path", &path.0]
    }

    fn descriptor_from(entry: EnumerateEntry) -> DeviceDescriptor {
        let fingerprint = match &entry.fingerprint {
            Some(hex) => match hex.parse() {
                Ok(fp) => Some(fp),
                Err(e) => {
                    warn!(path = %entry.path, "Ignoring bad fingerprint: {}", e);
                    None
                }
            },
            None => None,
        };

        // Older hwi releases omit the numeric code, so the error text is
        // the fallback signal for an uninitialized device.
        let initialized = entry.code != Some(DEVICE_NOT_INITIALIZED)
            && !entry
                .error
                .as_deref()
                .is_some_and(|e| e.to_lowercase().contains("not initialized"));

        DeviceDescriptor {
            model: DeviceModel::from_hwi_type(&entry.device_type, &entry.model),
            path: DevicePath(entry.path),
            initialized,
            needs_pin: entry.needs_pin_sent,
            fingerprint,
        }
    }
}

#[async_trait]
impl DeviceTransport for HwiTransport {
    async fn enumerate(&self, cancel: &CancellationToken) -> Result<Vec<DeviceDescriptor>> {
        let value = self.run(&["enumerate"], cancel).await?;
        let entries: Vec<EnumerateEntry> = serde_json::from_value(value)?;

        Ok(entries.into_iter().map(Self::descriptor_from).collect())
    }

    async fn setup(
        &self,
        model: &DeviceModel,
        path: &DevicePath,
        interactive: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let device = Self::device_args(model, path);
        let mut args: Vec<&str> = device.to_vec();
        args.push("setup");
        if interactive {
            args.push("--interactive");
        }

        let value = self.run(&args, cancel).await?;
        let reply: SuccessReply = serde_json::from_value(value)?;
        if !reply.success {
            return Err(Error::Transport(
                reply.error.unwrap_or_else(|| "setup failed".into()),
            ));
        }
        Ok(())
    }

    async fn unlock(&self, path: &DevicePath, cancel: &CancellationToken) -> Result<()> {
        // Ask the device to show its scrambled keypad
        self.run(&["--device-path", &path.0, "promptpin"], cancel)
            .await?;

        let pin = match self.pin_prompt.request_pin(path).await? {
            Some(pin) => pin,
            None => return Err(Error::Cancelled),
        };

        let value = self
            .run(&["--device-path", &path.0, "sendpin", &pin], cancel)
            .await?;
        let reply: SuccessReply = serde_json::from_value(value)?;
        if !reply.success {
            return Err(Error::Transport(
                reply.error.unwrap_or_else(|| "PIN rejected".into()),
            ));
        }
        Ok(())
    }

    async fn get_ext_pub_key(
        &self,
        model: &DeviceModel,
        path: &DevicePath,
        derivation: &DerivationPath,
        cancel: &CancellationToken,
    ) -> Result<ExtPubKey> {
        let device = Self::device_args(model, path);
        let derivation = derivation.to_string();
        let mut args: Vec<&str> = device.to_vec();
        args.push("getxpub");
        args.push(&derivation);

        let value = self.run(&args, cancel).await?;
        let reply: XpubReply = serde_json::from_value(value)?;
        ExtPubKey::parse(&reply.xpub)
    }
}
