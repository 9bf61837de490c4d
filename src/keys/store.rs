//! Wallet record persistence
//!
//! One pretty-printed JSON file per record in the wallets directory, with a
//! backups subdirectory that reconciliation scans can include.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::WalletStoreConfig;
use crate::error::{Error, Result};

use super::record::WalletRecord;

/// Storage boundary for wallet records
#[async_trait]
pub trait WalletFileStore: Send + Sync {
    /// List all records, optionally including the backups directory
    async fn list_records(&self, include_backups: bool) -> Result<Vec<WalletRecord>>;

    /// Load one record by wallet name
    async fn load(&self, name: &str) -> Result<WalletRecord>;

    /// Persist a record (create or overwrite)
    async fn save(&self, record: &WalletRecord) -> Result<()>;

    /// Allocate the next free wallet name for a prefix.
    ///
    /// Must not collide with any existing record, backups included.
    async fn next_available_name(&self, prefix: &str) -> Result<String>;
}

/// Directory-backed JSON store
pub struct JsonWalletStore {
    wallets_dir: PathBuf,
    backups_dir: PathBuf,
}

impl JsonWalletStore {
    /// Open (and create if needed) the wallets directory
    pub fn open(config: &WalletStoreConfig) -> Result<Self> {
        let wallets_dir = PathBuf::from(&config.wallets_dir);
        let backups_dir = wallets_dir.join(&config.backups_dir);

        std::fs::create_dir_all(&backups_dir)
            .map_err(|e| Error::Storage(format!("Failed to create wallets dir: {}", e)))?;

        info!("Wallet store at {:?}", wallets_dir);

        Ok(Self {
            wallets_dir,
            backups_dir,
        })
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.wallets_dir.join(format!("{}.json", name))
    }

    async fn read_dir_records(&self, dir: &Path) -> Result<Vec<WalletRecord>> {
        let mut records = Vec::new();

        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(Error::Storage(format!("Failed to read {:?}: {}", dir, e))),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::Storage(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            match Self::read_record(&path).await {
                Ok(record) => records.push(record),
                Err(e) => {
                    // A corrupt file must not block loading the other wallets
                    warn!("Skipping unreadable wallet file {:?}: {}", path, e);
                }
            }
        }

        Ok(records)
    }

    async fn read_record(path: &Path) -> Result<WalletRecord> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Storage(format!("Failed to read {:?}: {}", path, e)))?;
        Ok(serde_json::from_str(&content)?)
    }

    async fn existing_names(&self) -> Result<HashSet<String>> {
        let mut names = HashSet::new();
        for dir in [&self.wallets_dir, &self.backups_dir] {
            for record in self.read_dir_records(dir).await? {
                names.insert(record.wallet_name);
            }
        }
        Ok(names)
    }
}

#[async_trait]
impl WalletFileStore for JsonWalletStore {
    async fn list_records(&self, include_backups: bool) -> Result<Vec<WalletRecord>> {
        let mut records = self.read_dir_records(&self.wallets_dir).await?;

        if include_backups {
            records.extend(self.read_dir_records(&self.backups_dir).await?);
        }

        Ok(records)
    }

    async fn load(&self, name: &str) -> Result<WalletRecord> {
        let path = self.record_path(name);

        if !path.exists() {
            return Err(Error::WalletNotFound(name.to_string()));
        }

        Self::read_record(&path).await
    }

    async fn save(&self, record: &WalletRecord) -> Result<()> {
        let json = serde_json::to_string_pretty(record)?;
        let path = self.record_path(&record.wallet_name);

        tokio::fs::write(&path, json)
            .await
            .map_err(|e| Error::Storage(format!("Failed to write {:?}: {}", path, e)))?;

        debug!("Saved wallet record {}", record.wallet_name);
        Ok(())
    }

    async fn next_available_name(&self, prefix: &str) -> Result<String> {
        let taken = self.existing_names().await?;

        // Monotonic scheme: Prefix, Prefix2, Prefix3, ...
        let mut index = 1u32;
        loop {
            let candidate = if index == 1 {
                prefix.to_string()
            } else {
                format!("{}{}", prefix, index)
            };

            if !taken.contains(&candidate) && !self.record_path(&candidate).exists() {
                return Ok(candidate);
            }

            index += 1;
        }
    }
}
