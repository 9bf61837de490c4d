//! Reconciliation of retrieved keys against on-disk wallet records
//!
//! The resolver guarantees one wallet file per device fingerprint: every
//! create goes through a lookup over all records (backups included) first.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{Error, Result};

use super::record::{PasswordOutcome, WalletRecord};
use super::store::WalletFileStore;
use super::types::{ExtPubKey, Fingerprint};

/// Matches retrieved key material to existing wallet records, or mints new
/// watch-only ones; verifies passwords for non-hardware loads.
pub struct KeyManagerResolver {
    store: Arc<dyn WalletFileStore>,
}

impl KeyManagerResolver {
    pub fn new(store: Arc<dyn WalletFileStore>) -> Self {
        Self { store }
    }

    /// Find a record for a device already seen on this machine.
    ///
    /// Scans every persisted record, backups included, and matches on the
    /// stored fingerprint, the stored extended public key, or the
    /// fingerprint derivable from that key.
    pub async fn find_existing(
        &self,
        fingerprint: Fingerprint,
        ext_pub_key: &ExtPubKey,
    ) -> Result<Option<WalletRecord>> {
        let records = self.store.list_records(true).await?;

        Ok(records.into_iter().find(|record| {
            if record.master_fingerprint == Some(fingerprint) {
                return true;
            }
            match &record.ext_pub_key {
                Some(stored) => stored == ext_pub_key || stored.fingerprint() == fingerprint,
                None => false,
            }
        }))
    }

    /// Reuse the record matching this device, or create a fresh watch-only
    /// one under the next free name for the model prefix.
    ///
    /// Calling this twice with the same fingerprint never produces two
    /// records; the second call returns the first record's name.
    pub async fn resolve_or_create(
        &self,
        prefix: &str,
        fingerprint: Fingerprint,
        ext_pub_key: &ExtPubKey,
    ) -> Result<WalletRecord> {
        if let Some(existing) = self.find_existing(fingerprint, ext_pub_key).await? {
            debug!(
                wallet = %existing.wallet_name,
                fingerprint = %fingerprint,
                "Device already known, reusing wallet record"
            );
            return Ok(existing);
        }

        let name = self.store.next_available_name(prefix).await?;
        let record = WalletRecord::watch_only(&name, fingerprint, ext_pub_key.clone());
        self.store.save(&record).await?;

        info!(
            wallet = %name,
            fingerprint = %fingerprint,
            "Hardware wallet was not used previously on this computer. Created a new wallet file"
        );

        Ok(record)
    }

    /// Load a record by name and bump its access timestamp
    pub async fn load_by_name(&self, name: &str) -> Result<WalletRecord> {
        let mut record = self.store.load(name).await?;
        record.touch();
        self.store.save(&record).await?;
        Ok(record)
    }

    /// List records for display, most recently accessed first
    pub async fn list_recent(&self) -> Result<Vec<WalletRecord>> {
        let mut records = self.store.list_records(false).await?;
        records.sort_by(|a, b| b.last_access_time.cmp(&a.last_access_time));
        Ok(records)
    }

    /// Verify a supplied password against a record's stored credential.
    ///
    /// On a Primary or Legacy match the record is marked verified and
    /// persisted. A mismatch is returned as a value; it is not a fault.
    pub async fn verify_password(
        &self,
        name: &str,
        supplied: &str,
    ) -> Result<(WalletRecord, PasswordOutcome)> {
        let mut record = self.store.load(name).await?;

        if record.is_watch_only {
            // Operator picked the wrong wallet, not a fault
            return Err(Error::WatchOnlyWallet(name.to_string()));
        }

        let outcome = record.check_password(supplied);

        match outcome {
            PasswordOutcome::Primary | PasswordOutcome::Legacy => {
                record.password_verified = true;
                record.touch();
                self.store.save(&record).await?;
            }
            PasswordOutcome::Mismatch => {}
        }

        Ok((record, outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WalletStoreConfig;
    use crate::keys::store::JsonWalletStore;
    use tempfile::tempdir;

    const VECTOR_XPUB: &str = "xpub661MyMwAqRbcFtXgS5sYJABqqG9YLmC4Q1Rdap9gSE8NqtwybGhePY2gZ29ESFjqJoCu1Rupje8YtGqsefD265TMg7usUDFdp6W1EGMcet8";

    fn resolver_in(dir: &std::path::Path) -> KeyManagerResolver {
        let config = WalletStoreConfig {
            wallets_dir: dir.join("wallets").to_string_lossy().into_owned(),
            backups_dir: "backups".into(),
        };
        KeyManagerResolver::new(Arc::new(JsonWalletStore::open(&config).unwrap()))
    }

    fn vector_key() -> (Fingerprint, ExtPubKey) {
        let key = ExtPubKey::parse(VECTOR_XPUB).unwrap();
        (key.fingerprint(), key)
    }

    #[tokio::test]
    async fn test_create_then_find_roundtrip() {
        let dir = tempdir().unwrap();
        let resolver = resolver_in(dir.path());
        let (fp, xpub) = vector_key();

        assert!(resolver.find_existing(fp, &xpub).await.unwrap().is_none());

        let created = resolver.resolve_or_create("Trezor", fp, &xpub).await.unwrap();
        assert_eq!(created.wallet_name, "Trezor");
        assert!(created.is_watch_only);

        let found = resolver.find_existing(fp, &xpub).await.unwrap().unwrap();
        assert_eq!(found.wallet_name, "Trezor");
    }

    #[tokio::test]
    async fn test_resolve_or_create_is_idempotent() {
        let dir = tempdir().unwrap();
        let resolver = resolver_in(dir.path());
        let (fp, xpub) = vector_key();

        let first = resolver.resolve_or_create("Coldcard", fp, &xpub).await.unwrap();
        let second = resolver.resolve_or_create("Coldcard", fp, &xpub).await.unwrap();

        assert_eq!(first.wallet_name, second.wallet_name);
        assert_eq!(resolver.list_recent().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_find_matches_by_derived_fingerprint() {
        let dir = tempdir().unwrap();
        let resolver = resolver_in(dir.path());
        let (fp, xpub) = vector_key();

        // Record stores the xpub but no explicit fingerprint
        let mut record = WalletRecord::watch_only("legacy-import", fp, xpub.clone());
        record.master_fingerprint = None;
        resolver.store.save(&record).await.unwrap();

        let found = resolver.find_existing(fp, &xpub).await.unwrap().unwrap();
        assert_eq!(found.wallet_name, "legacy-import");
    }

    #[tokio::test]
    async fn test_verify_password_marks_and_persists() {
        let dir = tempdir().unwrap();
        let resolver = resolver_in(dir.path());

        let record = WalletRecord::with_password("desk", "open sesame");
        resolver.store.save(&record).await.unwrap();

        let (verified, outcome) = resolver.verify_password("desk", " open sesame ").await.unwrap();
        assert_eq!(outcome, PasswordOutcome::Primary);
        assert!(verified.password_verified);

        // Persisted, not just in memory
        let reloaded = resolver.store.load("desk").await.unwrap();
        assert!(reloaded.password_verified);
    }

    #[tokio::test]
    async fn test_verify_wrong_password_is_a_value() {
        let dir = tempdir().unwrap();
        let resolver = resolver_in(dir.path());

        resolver
            .store
            .save(&WalletRecord::with_password("desk", "right"))
            .await
            .unwrap();

        let (record, outcome) = resolver.verify_password("desk", "wrong").await.unwrap();
        assert_eq!(outcome, PasswordOutcome::Mismatch);
        assert!(!record.password_verified);
    }

    #[tokio::test]
    async fn test_verify_password_on_watch_only_is_operator_error() {
        let dir = tempdir().unwrap();
        let resolver = resolver_in(dir.path());
        let (fp, xpub) = vector_key();

        resolver
            .store
            .save(&WalletRecord::watch_only("Coldcard", fp, xpub))
            .await
            .unwrap();

        match resolver.verify_password("Coldcard", "anything").await {
            Err(Error::WatchOnlyWallet(name)) => {
                assert_eq!(name, "Coldcard");
                assert!(Error::WatchOnlyWallet(name).is_user_recoverable());
            }
            other => panic!("expected WatchOnlyWallet, got {:?}", other),
        }
    }
}
