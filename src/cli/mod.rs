//! Terminal front end

pub mod commands;

use async_trait::async_trait;
use dialoguer::{Password, theme::ColorfulTheme};

use crate::device::{DevicePath, PinPrompt};
use crate::error::{Error, Result};

/// PIN entry over the terminal. The device scrambles its keypad; the
/// digits typed here are keypad positions, not the PIN itself.
pub struct TerminalPinPrompt;

#[async_trait]
impl PinPrompt for TerminalPinPrompt {
    async fn request_pin(&self, device: &DevicePath) -> Result<Option<String>> {
        let prompt = format!("PIN for device {} (blank to cancel)", device);

        // dialoguer blocks on the tty, so keep it off the async runtime
        let entered = tokio::task::spawn_blocking(move || {
            Password::with_theme(&ColorfulTheme::default())
                .with_prompt(prompt)
                .allow_empty_password(true)
                .interact()
        })
        .await
        .map_err(|e| Error::Internal(format!("PIN prompt task failed: {}", e)))?
        .map_err(|e| Error::Internal(format!("PIN prompt failed: {}", e)))?;

        if entered.is_empty() {
            return Ok(None);
        }
        Ok(Some(entered))
    }
}
