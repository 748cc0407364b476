//! Encrypted record format.
//!
//! [`SecretStorage`] is the passphrase-protected unit persisted for every key.
//! Field names and nesting follow the version 3 keystore JSON layout so that
//! records exported elsewhere can be imported unchanged.

use serde::{Deserialize, Serialize};

use crate::crypto::ed25519::AccountId;
use crate::error::{KeyStashError, Result};

/// Cipher identifier written into records.
pub const CIPHER: &str = "aes-128-ctr";

/// KDF identifier written into records.
pub const KDF: &str = "pbkdf2";

/// PRF identifier written into `kdfparams`.
pub const PRF: &str = "hmac-sha256";

/// Record format version.
pub const VERSION: u32 = 3;

/// Meta value used when the caller supplies none.
pub const DEFAULT_META: &str = "{}";

fn default_meta() -> String {
    DEFAULT_META.to_string()
}

/// An encrypted, MAC-authenticated private key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretStorage {
    pub crypto: CryptoParams,

    /// Random record identifier. Not security relevant.
    pub id: String,

    pub version: u32,

    /// Caller-supplied string. Neither encrypted nor authenticated.
    #[serde(default = "default_meta")]
    pub meta: String,

    /// Account id of the stored key. Foreign records may omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<AccountId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoParams {
    /// Hex-encoded encrypted key material.
    pub ciphertext: String,
    pub cipherparams: CipherParams,
    pub cipher: String,
    pub kdf: String,
    pub kdfparams: KdfParams,
    /// Hex-encoded BLAKE2b-256 over `derived_key[16..32] || ciphertext`.
    pub mac: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherParams {
    /// Hex-encoded 16-byte IV.
    pub iv: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub dklen: u32,
    /// Hex-encoded salt.
    pub salt: String,
    /// Iteration count.
    pub c: u32,
    pub prf: String,
}

impl SecretStorage {
    /// Parse a record from JSON.
    ///
    /// Missing or mistyped fields are reported as
    /// [`KeyStashError::MalformedRecord`].
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| KeyStashError::MalformedRecord(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// True if this record is stored under `key`.
    pub fn matches(&self, key: &AccountId) -> bool {
        self.address.as_ref() == Some(key)
    }
}

/// Whole-store backup envelope.
///
/// `meta` is the store-level scalar, not any record's `meta`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backup {
    pub meta: String,
    pub keystore: Vec<SecretStorage>,
}
