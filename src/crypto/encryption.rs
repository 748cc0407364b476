//! Secret storage codec.
//!
//! Turns raw key material plus a passphrase into a [`SecretStorage`] record and
//! back:
//!
//! 1. PBKDF2-HMAC-SHA256 stretches the passphrase into a 32-byte derived key.
//! 2. AES-128-CTR encrypts the key material under `derived_key[0..16]`.
//! 3. The MAC is BLAKE2b-256 over `derived_key[16..32] || ciphertext`.
//!
//! Decoding verifies the MAC in constant time before anything is decrypted,
//! and reports a wrong passphrase and tampered data with the same error.

use aes::Aes128;
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use ctr::cipher::{KeyIvInit, StreamCipher};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::crypto::ed25519::{derive_account_id, derive_public_key};
use crate::crypto::password::{
    derive_key, generate_iv, generate_salt, IV_LENGTH, ITERATIONS, KEY_LENGTH, MAX_ITERATIONS,
    MAX_KEY_LENGTH,
};
use crate::crypto::sensitive::{DerivedKey, RawKeyMaterial};
use crate::error::{KeyStashError, Result};
use crate::storage::record::{
    CipherParams, CryptoParams, KdfParams, SecretStorage, CIPHER, KDF, PRF, VERSION,
};

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type Blake2b256 = Blake2b<U32>;

/// Apply the AES-128-CTR keystream in place. Encryption and decryption are
/// the same operation.
fn apply_keystream(derived: &DerivedKey, iv: &[u8], buffer: &mut [u8]) -> Result<()> {
    let mut cipher = Aes128Ctr::new_from_slices(derived.encryption_key(), iv)
        .map_err(|e| KeyStashError::Crypto(format!("Invalid cipher parameters: {}", e)))?;
    cipher.apply_keystream(buffer);
    Ok(())
}

fn compute_mac(derived: &DerivedKey, ciphertext: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(derived.mac_key());
    hasher.update(ciphertext);
    hasher.finalize().into()
}

fn decode_hex(field: &str, value: &str) -> Result<Vec<u8>> {
    hex::decode(value)
        .map_err(|e| KeyStashError::MalformedRecord(format!("Invalid hex in {}: {}", field, e)))
}

/// Encrypt key material under a passphrase.
///
/// A fresh salt, IV and record id are generated on every call, so encoding
/// the same key twice yields two different records. The record's `address`
/// is the account id of the key's public half.
///
/// # Example
///
/// ```
/// use keystash::crypto::ed25519::generate_key_material;
/// use keystash::crypto::encryption::{decode, encode};
///
/// let raw = generate_key_material();
/// let record = encode(&raw, "secure-passphrase", "{}").unwrap();
/// let decoded = decode(&record, "secure-passphrase").unwrap();
///
/// assert_eq!(raw.as_bytes(), decoded.as_bytes());
/// ```
pub fn encode(raw: &RawKeyMaterial, passphrase: &str, meta: &str) -> Result<SecretStorage> {
    let address = derive_account_id(&derive_public_key(raw)?);

    let salt = generate_salt();
    let iv = generate_iv();
    let derived = derive_key(passphrase, &salt, ITERATIONS, KEY_LENGTH)?;

    let mut ciphertext = Zeroizing::new(raw.as_bytes().to_vec());
    apply_keystream(&derived, &iv, &mut ciphertext)?;
    let mac = compute_mac(&derived, &ciphertext);

    Ok(SecretStorage {
        crypto: CryptoParams {
            ciphertext: hex::encode(ciphertext.as_slice()),
            cipherparams: CipherParams {
                iv: hex::encode(iv),
            },
            cipher: CIPHER.to_string(),
            kdf: KDF.to_string(),
            kdfparams: KdfParams {
                dklen: KEY_LENGTH as u32,
                salt: hex::encode(salt),
                c: ITERATIONS,
                prf: PRF.to_string(),
            },
            mac: hex::encode(mac),
        },
        id: uuid::Uuid::new_v4().to_string(),
        version: VERSION,
        meta: meta.to_string(),
        address: Some(address),
    })
}

/// Decrypt a record with a passphrase.
///
/// Fails with [`KeyStashError::MalformedRecord`] if the record uses an
/// unsupported algorithm or carries unparsable parameters, and with
/// [`KeyStashError::InvalidPassphraseOrCorruptData`] if the MAC does not
/// verify. The caller owns the returned key material; it is wiped on drop.
pub fn decode(record: &SecretStorage, passphrase: &str) -> Result<RawKeyMaterial> {
    let crypto = &record.crypto;

    if record.version != VERSION {
        return Err(KeyStashError::MalformedRecord(format!(
            "Unsupported version: {}",
            record.version
        )));
    }
    if crypto.cipher != CIPHER {
        return Err(KeyStashError::MalformedRecord(format!(
            "Unsupported cipher: '{}'",
            crypto.cipher
        )));
    }
    if crypto.kdf != KDF || crypto.kdfparams.prf != PRF {
        return Err(KeyStashError::MalformedRecord(format!(
            "Unsupported kdf: '{}' with prf '{}'",
            crypto.kdf, crypto.kdfparams.prf
        )));
    }

    let dklen = crypto.kdfparams.dklen as usize;
    let rounds = crypto.kdfparams.c;
    if !(KEY_LENGTH..=MAX_KEY_LENGTH).contains(&dklen) || rounds == 0 || rounds > MAX_ITERATIONS {
        return Err(KeyStashError::MalformedRecord(format!(
            "Invalid kdf parameters: dklen {}, c {}",
            crypto.kdfparams.dklen, crypto.kdfparams.c
        )));
    }

    let iv = decode_hex("cipherparams.iv", &crypto.cipherparams.iv)?;
    if iv.len() != IV_LENGTH {
        return Err(KeyStashError::MalformedRecord(format!(
            "IV must be {} bytes, got {}",
            IV_LENGTH,
            iv.len()
        )));
    }
    let salt = decode_hex("kdfparams.salt", &crypto.kdfparams.salt)?;
    let ciphertext = decode_hex("ciphertext", &crypto.ciphertext)?;
    let expected_mac = decode_hex("mac", &crypto.mac)?;

    let derived = derive_key(passphrase, &salt, rounds, dklen)?;
    let mac = compute_mac(&derived, &ciphertext);

    if !bool::from(mac.as_slice().ct_eq(&expected_mac)) {
        return Err(KeyStashError::InvalidPassphraseOrCorruptData);
    }

    let mut plaintext = Zeroizing::new(ciphertext);
    apply_keystream(&derived, &iv, &mut plaintext)?;

    RawKeyMaterial::from_slice(&plaintext)
        .map_err(|_| KeyStashError::MalformedRecord("Unexpected key material length".to_string()))
}
