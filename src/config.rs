//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub wallets: WalletStoreConfig,
    #[serde(default)]
    pub hwi: HwiConfig,
    #[serde(default)]
    pub device: DeviceConfig,
}

/// Wallet record storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WalletStoreConfig {
    /// Directory holding wallet record files
    #[serde(default = "default_wallets_dir")]
    pub wallets_dir: String,

    /// Subdirectory (under wallets_dir) scanned for backup records
    #[serde(default = "default_backups_dir")]
    pub backups_dir: String,
}

impl Default for WalletStoreConfig {
    fn default() -> Self {
        Self {
            wallets_dir: default_wallets_dir(),
            backups_dir: default_backups_dir(),
        }
    }
}

/// HWI bridge configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HwiConfig {
    /// Path to the hwi binary
    #[serde(default = "default_hwi_binary")]
    pub binary: String,

    /// Chain argument passed to hwi (main, test, signet, regtest)
    #[serde(default = "default_chain")]
    pub chain: String,
}

impl Default for HwiConfig {
    fn default() -> Self {
        Self {
            binary: default_hwi_binary(),
            chain: default_chain(),
        }
    }
}

/// Hardware device flow configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Enumeration time box in seconds
    #[serde(default = "default_enumerate_timeout_secs")]
    pub enumerate_timeout_secs: u64,

    /// Setup time box in seconds. Generous: the operator may be
    /// transcribing a recovery phrase by hand.
    #[serde(default = "default_setup_timeout_secs")]
    pub setup_timeout_secs: u64,

    /// Extended-public-key fetch time box in seconds
    #[serde(default = "default_xpub_timeout_secs")]
    pub xpub_timeout_secs: u64,

    /// Maximum setup/unlock re-entries of the hardware flow before
    /// giving up on a device that never reports ready
    #[serde(default = "default_max_device_retries")]
    pub max_device_retries: u32,

    /// Account-level derivation path for watch-only wallets
    #[serde(default = "default_account_path")]
    pub account_derivation_path: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            enumerate_timeout_secs: default_enumerate_timeout_secs(),
            setup_timeout_secs: default_setup_timeout_secs(),
            xpub_timeout_secs: default_xpub_timeout_secs(),
            max_device_retries: default_max_device_retries(),
            account_derivation_path: default_account_path(),
        }
    }
}

impl DeviceConfig {
    pub fn enumerate_timeout(&self) -> Duration {
        Duration::from_secs(self.enumerate_timeout_secs)
    }

    pub fn setup_timeout(&self) -> Duration {
        Duration::from_secs(self.setup_timeout_secs)
    }

    pub fn xpub_timeout(&self) -> Duration {
        Duration::from_secs(self.xpub_timeout_secs)
    }
}

// Default value functions
fn default_wallets_dir() -> String {
    std::env::var("WALLETS_DIR").unwrap_or_else(|_| "wallets".into())
}

fn default_backups_dir() -> String {
    "backups".into()
}

fn default_hwi_binary() -> String {
    std::env::var("HWI_BINARY").unwrap_or_else(|_| "hwi".into())
}

fn default_chain() -> String {
    "main".into()
}

fn default_enumerate_timeout_secs() -> u64 {
    180
}

fn default_setup_timeout_secs() -> u64 {
    21 * 60
}

fn default_xpub_timeout_secs() -> u64 {
    180
}

fn default_max_device_retries() -> u32 {
    3
}

fn default_account_path() -> String {
    "m/84'/0'/0'".into()
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix WLOAD_)
            .add_source(
                config::Environment::with_prefix("WLOAD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.device.enumerate_timeout_secs == 0 {
            anyhow::bail!("enumerate_timeout_secs must be positive");
        }

        if self.device.setup_timeout_secs == 0 {
            anyhow::bail!("setup_timeout_secs must be positive");
        }

        if self.device.xpub_timeout_secs == 0 {
            anyhow::bail!("xpub_timeout_secs must be positive");
        }

        if self.device.max_device_retries == 0 {
            anyhow::bail!("max_device_retries must be at least 1");
        }

        match self.hwi.chain.as_str() {
            "main" | "test" | "signet" | "regtest" => {}
            other => anyhow::bail!("Unknown chain: {}", other),
        }

        // Validate the derivation path up front so a typo fails at startup,
        // not mid-flow with a device attached.
        crate::keys::DerivationPath::parse(&self.device.account_derivation_path)
            .map_err(|e| anyhow::anyhow!("Invalid account_derivation_path: {}", e))?;

        Ok(())
    }

    /// Get configuration for display
    pub fn display(&self) -> String {
        format!(
            r#"Configuration:
  Wallets:
    dir: {}
    backups: {}
  HWI:
    binary: {}
    chain: {}
  Device:
    enumerate_timeout: {}s
    setup_timeout: {}s
    xpub_timeout: {}s
    max_retries: {}
    account_path: {}
"#,
            self.wallets.wallets_dir,
            self.wallets.backups_dir,
            self.hwi.binary,
            self.hwi.chain,
            self.device.enumerate_timeout_secs,
            self.device.setup_timeout_secs,
            self.device.xpub_timeout_secs,
            self.device.max_device_retries,
            self.device.account_derivation_path,
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            wallets: WalletStoreConfig::default(),
            hwi: HwiConfig::default(),
            device: DeviceConfig::default(),
        }
    }
}
