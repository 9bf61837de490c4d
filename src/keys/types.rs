//! Key material primitives: fingerprints, extended public keys, derivation paths

use std::fmt;
use std::str::FromStr;

use ripemd::Ripemd160;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Version prefix for mainnet extended public keys ("xpub...")
const XPUB_VERSION: [u8; 4] = [0x04, 0x88, 0xB2, 0x1E];
/// Version prefix for testnet extended public keys ("tpub...")
const TPUB_VERSION: [u8; 4] = [0x04, 0x35, 0x87, 0xCF];

/// Hardened child marker bit
const HARDENED: u32 = 0x8000_0000;

/// Short identifier derived from a device's master key.
///
/// Used to recognize a physical device across sessions without holding
/// any key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub [u8; 4]);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for Fingerprint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| Error::InvalidFingerprint(e.to_string()))?;
        let arr: [u8; 4] = bytes
            .try_into()
            .map_err(|_| Error::InvalidFingerprint(format!("expected 4 bytes, got '{}'", s)))?;
        Ok(Fingerprint(arr))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A BIP32 extended public key.
///
/// Public key plus chain code, enough to derive an entire public subtree
/// for a watch-only wallet without exposing private material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtPubKey {
    version: [u8; 4],
    pub depth: u8,
    pub parent_fingerprint: Fingerprint,
    pub child_number: u32,
    pub chain_code: [u8; 32],
    pub public_key: [u8; 33],
}

impl ExtPubKey {
    /// Parse the base58check text form (xpub/tpub)
    pub fn parse(s: &str) -> Result<Self> {
        let raw = bs58::decode(s)
            .into_vec()
            .map_err(|e| Error::InvalidExtPubKey(e.to_string()))?;

        if raw.len() != 82 {
            return Err(Error::InvalidExtPubKey(format!(
                "expected 82 bytes, got {}",
                raw.len()
            )));
        }

        let (payload, checksum) = raw.split_at(78);
        if double_sha256(payload)[..4] != *checksum {
            return Err(Error::InvalidExtPubKey("checksum mismatch".into()));
        }

        let version: [u8; 4] = payload[0..4].try_into().unwrap();
        if version != XPUB_VERSION && version != TPUB_VERSION {
            return Err(Error::InvalidExtPubKey(format!(
                "unknown version prefix {}",
                hex::encode(version)
            )));
        }

        let public_key: [u8; 33] = payload[45..78].try_into().unwrap();
        if public_key[0] != 0x02 && public_key[0] != 0x03 {
            return Err(Error::InvalidExtPubKey(
                "public key is not in compressed form".into(),
            ));
        }

        Ok(Self {
            version,
            depth: payload[4],
            parent_fingerprint: Fingerprint(payload[5..9].try_into().unwrap()),
            child_number: u32::from_be_bytes(payload[9..13].try_into().unwrap()),
            chain_code: payload[13..45].try_into().unwrap(),
            public_key,
        })
    }

    /// Serialize to the 78-byte BIP32 payload
    fn payload(&self) -> [u8; 78] {
        let mut out = [0u8; 78];
        out[0..4].copy_from_slice(&self.version);
        out[4] = self.depth;
        out[5..9].copy_from_slice(&self.parent_fingerprint.0);
        out[9..13].copy_from_slice(&self.child_number.to_be_bytes());
        out[13..45].copy_from_slice(&self.chain_code);
        out[45..78].copy_from_slice(&self.public_key);
        out
    }

    /// Fingerprint of this key: first four bytes of hash160 of the public key
    pub fn fingerprint(&self) -> Fingerprint {
        let sha = Sha256::digest(self.public_key);
        let rip = Ripemd160::digest(sha);
        Fingerprint(rip[..4].try_into().unwrap())
    }
}

impl fmt::Display for ExtPubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let payload = self.payload();
        let mut raw = Vec::with_capacity(82);
        raw.extend_from_slice(&payload);
        raw.extend_from_slice(&double_sha256(&payload)[..4]);
        write!(f, "{}", bs58::encode(raw).into_string())
    }
}

impl FromStr for ExtPubKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for ExtPubKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ExtPubKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

fn double_sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(Sha256::digest(data)).into()
}

/// A BIP32 derivation path: sequence of (possibly hardened) child indices
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivationPath(Vec<u32>);

impl DerivationPath {
    /// The standard account-level path for watch-only wallets
    pub fn default_account_path() -> Self {
        DerivationPath(vec![84 | HARDENED, HARDENED, HARDENED])
    }

    /// Parse a path like `m/84'/0'/0'` or `m/84h/0h/0h`
    pub fn parse(s: &str) -> Result<Self> {
        let mut components = Vec::new();
        let mut parts = s.split('/').peekable();

        // Leading master marker is optional
        if matches!(parts.peek(), Some(&"m") | Some(&"M")) {
            parts.next();
        }

        for part in parts {
            if part.is_empty() {
                return Err(Error::InvalidDerivationPath(format!(
                    "empty component in '{}'",
                    s
                )));
            }

            let (digits, hardened) =
                if let Some(stripped) = part.strip_suffix(['\'', 'h', 'H']) {
                    (stripped, true)
                } else {
                    (part, false)
                };

            let index: u32 = digits.parse().map_err(|_| {
                Error::InvalidDerivationPath(format!("bad component '{}' in '{}'", part, s))
            })?;

            if index >= HARDENED {
                return Err(Error::InvalidDerivationPath(format!(
                    "index {} out of range",
                    index
                )));
            }

            components.push(if hardened { index | HARDENED } else { index });
        }

        Ok(DerivationPath(components))
    }

    /// Raw child numbers (hardened bit included)
    pub fn components(&self) -> &[u32] {
        &self.0
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m")?;
        for component in &self.0 {
            if component & HARDENED != 0 {
                write!(f, "/{}'", component & !HARDENED)?;
            } else {
                write!(f, "/{}", component)?;
            }
        }
        Ok(())
    }
}

impl FromStr for DerivationPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
