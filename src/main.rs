//! wload - hardware wallet loader
//!
//! Discovers attached hardware wallets, walks them through setup and PIN
//! unlock, fetches a watch-only extended public key, and reconciles it
//! against the wallet records on disk.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

use wallet_loader::cli::commands;
use wallet_loader::config::Config;

/// Hardware wallet loader
#[derive(Parser)]
#[command(name = "wload")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List attached hardware wallets
    Devices,

    /// List registered wallets
    Wallets,

    /// Load a registered wallet by name
    Load {
        /// Wallet name
        name: String,
    },

    /// Verify a wallet's password
    CheckPassword {
        /// Wallet name
        name: String,
    },

    /// Acquire a wallet from an attached hardware device
    Hardware {
        /// Transport path of a specific device (default: first found)
        #[arg(long)]
        device_path: Option<String>,
    },

    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("wallet_loader=info".parse()?),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Devices => commands::devices(&config).await,
        Commands::Wallets => commands::wallets(&config).await,
        Commands::Load { name } => commands::load(&config, &name).await,
        Commands::CheckPassword { name } => commands::check_password(&config, &name).await,
        Commands::Hardware { device_path } => commands::hardware(&config, device_path).await,
        Commands::Config => commands::show_config(&config),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
