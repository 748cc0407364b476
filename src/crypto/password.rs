//! Passphrase-based key derivation.
//!
//! This module stretches a passphrase into a [`DerivedKey`] with
//! PBKDF2-HMAC-SHA256 and generates the random salt and IV each record needs.

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;

use crate::crypto::sensitive::DerivedKey;
use crate::error::{KeyStashError, Result};

/// The length of the salt used for key derivation.
pub const SALT_LENGTH: usize = 32;

/// The length of the cipher IV.
pub const IV_LENGTH: usize = 16;

/// The length of the derived key. Half keys the cipher, half feeds the MAC.
pub const KEY_LENGTH: usize = 32;

/// PBKDF2 iteration count written into new records.
pub const ITERATIONS: u32 = 10240;

/// Largest derived key length accepted from a record.
pub const MAX_KEY_LENGTH: usize = 64;

/// Largest iteration count accepted from a record.
pub const MAX_ITERATIONS: u32 = 1 << 20;

/// Generate a random salt for key derivation.
///
/// # Example
///
/// ```
/// use keystash::crypto::password::{generate_salt, SALT_LENGTH};
///
/// let salt = generate_salt();
/// assert_eq!(salt.len(), SALT_LENGTH);
/// ```
pub fn generate_salt() -> [u8; SALT_LENGTH] {
    let mut salt = [0u8; SALT_LENGTH];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Generate a random IV for the stream cipher.
pub fn generate_iv() -> [u8; IV_LENGTH] {
    let mut iv = [0u8; IV_LENGTH];
    rand::thread_rng().fill_bytes(&mut iv);
    iv
}

/// Derive a key of `dklen` bytes from a passphrase with PBKDF2-HMAC-SHA256.
///
/// `dklen` must lie between [`KEY_LENGTH`] and [`MAX_KEY_LENGTH`], and
/// `rounds` between 1 and [`MAX_ITERATIONS`]. An empty passphrase is valid.
///
/// # Example
///
/// ```
/// use keystash::crypto::password::{derive_key, generate_salt, ITERATIONS, KEY_LENGTH};
///
/// let salt = generate_salt();
/// let key = derive_key("secure-passphrase", &salt, ITERATIONS, KEY_LENGTH).unwrap();
/// assert_eq!(key.len(), KEY_LENGTH);
/// ```
pub fn derive_key(passphrase: &str, salt: &[u8], rounds: u32, dklen: usize) -> Result<DerivedKey> {
    if !(KEY_LENGTH..=MAX_KEY_LENGTH).contains(&dklen) {
        return Err(KeyStashError::KeyDerivation(format!(
            "Derived key must be {} to {} bytes, got {}",
            KEY_LENGTH, MAX_KEY_LENGTH, dklen
        )));
    }
    if rounds == 0 || rounds > MAX_ITERATIONS {
        return Err(KeyStashError::KeyDerivation(format!(
            "Iteration count must be 1 to {}, got {}",
            MAX_ITERATIONS, rounds
        )));
    }

    let mut output = DerivedKey::new(vec![0u8; dklen]);
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, rounds, output.as_mut_bytes());

    Ok(output)
}
