//! Cryptographic operations module.
//!
//! This module provides the cryptographic side of keystash:
//!
//! - Ed25519 key generation, account ids and signing
//! - PBKDF2 passphrase stretching
//! - The secret storage codec (AES-128-CTR with a BLAKE2b MAC)
//! - Zeroize-on-drop wrappers for key material
//!
//! # Example
//!
//! ```rust
//! use keystash::crypto::ed25519::generate_key_material;
//! use keystash::crypto::encryption::{decode, encode};
//!
//! # fn example() -> keystash::error::Result<()> {
//! let raw = generate_key_material();
//!
//! let record = encode(&raw, "secure-passphrase", "{}")?;
//!
//! let decoded = decode(&record, "secure-passphrase")?;
//! assert_eq!(raw.as_bytes(), decoded.as_bytes());
//! # Ok(())
//! # }
//! ```

pub mod ed25519;
pub mod encryption;
pub mod password;
pub mod sensitive;
