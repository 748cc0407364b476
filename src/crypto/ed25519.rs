//! Ed25519 key primitives.
//!
//! Key generation, public key derivation, account id derivation and message
//! signing. Private keys travel as [`RawKeyMaterial`], the 64-byte
//! `seed || public` layout used by the stored records.

use std::fmt;
use std::str::FromStr;

use blake2::digest::consts::U20;
use blake2::{Blake2b, Digest};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::crypto::sensitive::RawKeyMaterial;
use crate::error::{KeyStashError, Result};

/// Length of an [`AccountId`] in bytes.
pub const ACCOUNT_ID_LENGTH: usize = 20;

type Blake2b160 = Blake2b<U20>;

/// Short identifier derived from a public key, used to look records up.
///
/// Rendered as 40 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccountId([u8; ACCOUNT_ID_LENGTH]);

impl AccountId {
    pub fn from_bytes(bytes: [u8; ACCOUNT_ID_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ACCOUNT_ID_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountId({})", self.to_hex())
    }
}

impl FromStr for AccountId {
    type Err = KeyStashError;

    fn from_str(s: &str) -> Result<Self> {
        let mut bytes = [0u8; ACCOUNT_ID_LENGTH];
        hex::decode_to_slice(s.trim(), &mut bytes)
            .map_err(|e| KeyStashError::Parse(format!("Invalid account id '{}': {}", s, e)))?;
        Ok(Self(bytes))
    }
}

impl Serialize for AccountId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for AccountId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Generate fresh key material from the operating system RNG.
///
/// # Example
///
/// ```
/// use keystash::crypto::ed25519::{derive_public_key, generate_key_material};
///
/// let raw = generate_key_material();
/// let public = derive_public_key(&raw).unwrap();
/// assert_eq!(public.as_bytes(), &raw.as_bytes()[32..]);
/// ```
pub fn generate_key_material() -> RawKeyMaterial {
    let secret = SigningKey::generate(&mut OsRng);
    RawKeyMaterial::new(secret.to_keypair_bytes())
}

/// Build a signing key, checking that the stored public half matches the seed.
fn signing_key(raw: &RawKeyMaterial) -> Result<SigningKey> {
    SigningKey::from_keypair_bytes(raw.as_bytes())
        .map_err(|e| KeyStashError::InvalidKey(format!("Inconsistent Ed25519 keypair: {}", e)))
}

/// Derive the public key for the given key material.
///
/// Fails with [`KeyStashError::InvalidKey`] when the public half of the key
/// material does not belong to its seed.
pub fn derive_public_key(raw: &RawKeyMaterial) -> Result<VerifyingKey> {
    Ok(signing_key(raw)?.verifying_key())
}

/// Derive the account id of a public key (BLAKE2b, 20-byte digest).
///
/// # Example
///
/// ```
/// use keystash::crypto::ed25519::{derive_account_id, derive_public_key, generate_key_material};
///
/// let raw = generate_key_material();
/// let account = derive_account_id(&derive_public_key(&raw).unwrap());
/// assert_eq!(account.to_string().len(), 40);
/// ```
pub fn derive_account_id(public: &VerifyingKey) -> AccountId {
    let digest = Blake2b160::digest(public.as_bytes());
    let mut bytes = [0u8; ACCOUNT_ID_LENGTH];
    bytes.copy_from_slice(&digest);
    AccountId(bytes)
}

/// Sign a message with the given key material.
pub fn sign(message: &[u8], raw: &RawKeyMaterial) -> Result<Signature> {
    Ok(signing_key(raw)?.sign(message))
}

/// Verify a signature against a public key.
pub fn verify(public: &VerifyingKey, message: &[u8], signature: &Signature) -> Result<()> {
    public
        .verify(message, signature)
        .map_err(|e| KeyStashError::Crypto(format!("Signature verification failed: {}", e)))
}

/// Parse a public key from its 64-character hex form.
pub fn public_key_from_hex(hex_string: &str) -> Result<VerifyingKey> {
    let mut bytes = [0u8; 32];
    hex::decode_to_slice(hex_string.trim(), &mut bytes)
        .map_err(|e| KeyStashError::Parse(format!("Invalid hex string: {}", e)))?;
    VerifyingKey::from_bytes(&bytes)
        .map_err(|e| KeyStashError::InvalidKey(format!("Invalid Ed25519 public key: {}", e)))
}
