//! CLI command implementations

use std::sync::Arc;

use dialoguer::{Password, theme::ColorfulTheme};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::device::{HardwareDeviceManager, HwiTransport};
use crate::error::{Error, Result};
use crate::keys::{JsonWalletStore, KeyManagerResolver, PasswordOutcome};
use crate::load::{LoadOrchestrator, LoadPhase, LoadSource, LoadedWallet};

use super::TerminalPinPrompt;

/// List attached hardware wallets
pub async fn devices(config: &Config) -> Result<()> {
    let orchestrator = build_orchestrator(config)?;
    let cancel = cancel_on_ctrl_c();

    info!("Searching for hardware wallets...");
    let devices = orchestrator.refresh_devices(&cancel).await?;

    if devices.is_empty() {
        println!("No hardware wallet detected.");
        return Ok(());
    }

    println!("{:<20} {:<24} {:<12} {}", "MODEL", "PATH", "STATE", "FINGERPRINT");
    for device in devices {
        let state = match (device.initialized, device.needs_pin) {
            (false, _) => "needs setup",
            (true, true) => "needs PIN",
            (true, false) => "ready",
        };
        let fingerprint = device
            .fingerprint
            .map(|f| f.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<20} {:<24} {:<12} {}",
            device.model.to_string(),
            device.path.to_string(),
            state,
            fingerprint
        );
    }

    Ok(())
}

/// List registered wallets, most recently used first
pub async fn wallets(config: &Config) -> Result<()> {
    let store = Arc::new(JsonWalletStore::open(&config.wallets)?);
    let resolver = KeyManagerResolver::new(store);

    let records = resolver.list_recent().await?;
    if records.is_empty() {
        println!("No wallets registered yet.");
        return Ok(());
    }

    println!("{:<24} {:<12} {:<12} {}", "NAME", "TYPE", "FINGERPRINT", "LAST ACCESS");
    for record in records {
        let kind = if record.is_watch_only { "hardware" } else { "software" };
        let fingerprint = record
            .master_fingerprint
            .map(|f| f.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<24} {:<12} {:<12} {}",
            record.wallet_name,
            kind,
            fingerprint,
            record.last_access_time.format("%Y-%m-%d %H:%M")
        );
    }

    Ok(())
}

/// Load a registered wallet by name
pub async fn load(config: &Config, wallet_name: &str) -> Result<()> {
    let orchestrator = build_orchestrator(config)?;
    let cancel = cancel_on_ctrl_c();

    let loaded = match orchestrator
        .load(
            LoadSource::File {
                wallet_name: wallet_name.to_string(),
            },
            &cancel,
        )
        .await
    {
        Ok(loaded) => loaded,
        Err(Error::PasswordVerificationRequired(name)) => {
            // First load of this wallet on this machine; the credential
            // has to be checked once before the record is trusted.
            println!("The password of '{}' has not been verified yet.", name);
            let password = prompt_password("Password").await?;
            orchestrator
                .load(
                    LoadSource::PasswordCheck {
                        wallet_name: name,
                        password,
                    },
                    &cancel,
                )
                .await?
        }
        Err(err) => return Err(err),
    };

    report_loaded(&loaded);
    Ok(())
}

/// Verify a wallet's password without loading it for use
pub async fn check_password(config: &Config, wallet_name: &str) -> Result<()> {
    let orchestrator = build_orchestrator(config)?;
    let cancel = cancel_on_ctrl_c();

    let password = prompt_password("Password").await?;
    let loaded = orchestrator
        .load(
            LoadSource::PasswordCheck {
                wallet_name: wallet_name.to_string(),
                password,
            },
            &cancel,
        )
        .await?;

    match loaded.password_outcome {
        Some(PasswordOutcome::Primary) => println!("Password is correct."),
        Some(PasswordOutcome::Legacy) => {
            println!("Password is correct, but only under the legacy derivation.");
            println!("Consider re-creating this wallet with the same password to migrate it.");
        }
        _ => {}
    }

    Ok(())
}

/// Acquire a wallet from an attached hardware device
pub async fn hardware(config: &Config, device_path: Option<String>) -> Result<()> {
    let orchestrator = build_orchestrator(config)?;
    let cancel = cancel_on_ctrl_c();

    // Mirror phase transitions onto the terminal while the flow runs
    let mut phases = orchestrator.subscribe_phase();
    let printer = tokio::spawn(async move {
        while phases.changed().await.is_ok() {
            let phase = *phases.borrow_and_update();
            if phase != LoadPhase::Idle {
                info!("{}", phase.describe());
            }
        }
    });

    let result = orchestrator
        .load(
            LoadSource::Hardware {
                device_path: device_path.map(crate::device::DevicePath),
            },
            &cancel,
        )
        .await;
    printer.abort();

    match result {
        Ok(loaded) => {
            report_loaded(&loaded);
            Ok(())
        }
        Err(err) if err.is_user_recoverable() => {
            warn!("{}", err);
            Err(err)
        }
        Err(err) => Err(err),
    }
}

/// Show the effective configuration
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.display());
    Ok(())
}

fn report_loaded(loaded: &LoadedWallet) {
    println!("Loaded wallet '{}'.", loaded.record.wallet_name);
    if let Some(fingerprint) = loaded.record.master_fingerprint {
        println!("Master fingerprint: {}", fingerprint);
    }
    if loaded.record.is_watch_only {
        println!("This is a watch-only wallet; signing stays on the device.");
    }
}

fn build_orchestrator(config: &Config) -> Result<LoadOrchestrator> {
    let store = Arc::new(JsonWalletStore::open(&config.wallets)?);
    let resolver = KeyManagerResolver::new(store);

    let transport = Arc::new(HwiTransport::new(&config.hwi, Arc::new(TerminalPinPrompt)));
    let manager = HardwareDeviceManager::new(transport, config.device.clone());

    LoadOrchestrator::new(manager, resolver, &config.device)
}

/// Cancellation token wired to Ctrl-C
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling...");
            trigger.cancel();
        }
    });
    cancel
}

async fn prompt_password(prompt: &str) -> Result<String> {
    let prompt = prompt.to_string();
    tokio::task::spawn_blocking(move || {
        Password::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .allow_empty_password(true)
            .interact()
    })
    .await
    .map_err(|e| Error::Internal(format!("password prompt task failed: {}", e)))?
    .map_err(|e| Error::Internal(format!("password prompt failed: {}", e)))
}
