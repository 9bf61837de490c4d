//! Key material, wallet records, and their reconciliation
//!
//! # Architecture
//!
//! ```text
//! WalletFileStore (JSON directory) → KeyManagerResolver
//!                                          ↑
//!                                   LoadOrchestrator
//! ```
//!
//! The resolver owns the one-wallet-file-per-device-fingerprint invariant:
//! every create is preceded by a lookup across all records, backups included.

pub mod record;
pub mod resolver;
pub mod store;
pub mod types;

pub use record::{PasswordOutcome, WalletRecord};
pub use resolver::KeyManagerResolver;
pub use store::{JsonWalletStore, WalletFileStore};
pub use types::{DerivationPath, ExtPubKey, Fingerprint};
