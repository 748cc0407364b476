//! Wrappers for secret bytes that are zeroized on drop.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{KeyStashError, Result};

/// Length of [`RawKeyMaterial`]: a 32-byte seed followed by its public key.
pub const RAW_KEY_LENGTH: usize = 64;

/// Length of the seed half of [`RawKeyMaterial`].
pub const SEED_LENGTH: usize = 32;

/// Plaintext private key bytes in `seed || public` layout.
///
/// Only ever lives for the duration of a single operation; the buffer is wiped
/// when the value is dropped.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct RawKeyMaterial([u8; RAW_KEY_LENGTH]);

impl RawKeyMaterial {
    pub fn new(bytes: [u8; RAW_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Copy key material out of a slice, rejecting any length other than 64.
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        if slice.len() != RAW_KEY_LENGTH {
            return Err(KeyStashError::InvalidKey(format!(
                "Expected {} bytes of key material, got {}",
                RAW_KEY_LENGTH,
                slice.len()
            )));
        }
        let mut bytes = [0u8; RAW_KEY_LENGTH];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    /// Parse key material from a 128-character hex string.
    pub fn from_hex(hex_string: &str) -> Result<Self> {
        let bytes = zeroize::Zeroizing::new(
            hex::decode(hex_string.trim())
                .map_err(|e| KeyStashError::Parse(format!("Invalid hex string: {}", e)))?,
        );
        Self::from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; RAW_KEY_LENGTH] {
        &self.0
    }

    pub fn seed(&self) -> &[u8] {
        &self.0[..SEED_LENGTH]
    }

    /// The public key half as stored, not re-derived.
    pub fn public_half(&self) -> &[u8] {
        &self.0[SEED_LENGTH..]
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl AsRef<[u8]> for RawKeyMaterial {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for RawKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RawKeyMaterial([REDACTED])")
    }
}

/// Output of the passphrase KDF.
///
/// The first 16 bytes key the cipher, bytes 16..32 feed the MAC.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey(Vec<u8>);

impl DerivedKey {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub(crate) fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Cipher key half.
    pub fn encryption_key(&self) -> &[u8] {
        &self.0[..16]
    }

    /// MAC half.
    pub fn mac_key(&self) -> &[u8] {
        &self.0[16..32]
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DerivedKey([REDACTED {} bytes])", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_key_from_slice() {
        assert!(RawKeyMaterial::from_slice(&[7u8; 64]).is_ok());

        match RawKeyMaterial::from_slice(&[7u8; 32]) {
            Err(KeyStashError::InvalidKey(msg)) => assert!(msg.contains("Expected 64 bytes")),
            _ => panic!("Expected InvalidKey"),
        }
    }

    #[test]
    fn test_raw_key_hex_roundtrip() {
        let raw = RawKeyMaterial::new([0xAB; 64]);
        let parsed = RawKeyMaterial::from_hex(&raw.to_hex()).unwrap();
        assert_eq!(raw, parsed);
        assert_eq!(parsed.seed(), &[0xAB; 32]);
        assert_eq!(parsed.public_half().len(), 32);
    }

    #[test]
    fn test_raw_key_from_invalid_hex() {
        match RawKeyMaterial::from_hex("zz") {
            Err(KeyStashError::Parse(_)) => {}
            _ => panic!("Expected Parse"),
        }
    }

    #[test]
    fn test_debug_output_is_redacted() {
        let raw = RawKeyMaterial::new([0x11; 64]);
        assert!(!format!("{:?}", raw).contains("11"));

        let derived = DerivedKey::new(vec![0x22; 32]);
        assert_eq!(format!("{:?}", derived), "DerivedKey([REDACTED 32 bytes])");
    }

    #[test]
    fn test_derived_key_halves() {
        let mut bytes = vec![1u8; 16];
        bytes.extend_from_slice(&[2u8; 16]);
        let key = DerivedKey::new(bytes);

        assert_eq!(key.encryption_key(), &[1u8; 16]);
        assert_eq!(key.mac_key(), &[2u8; 16]);
        assert_eq!(key.len(), 32);
    }
}
