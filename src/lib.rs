//! keystash: passphrase-protected Ed25519 key storage
//!
//! This library stores Ed25519 private keys encrypted under caller-supplied
//! passphrases and uses them for signing. It provides:
//!
//! - A versioned JSON record format (PBKDF2-HMAC-SHA256, AES-128-CTR, BLAKE2b MAC)
//!   compatible with externally produced records
//! - A key repository indexed by account id (BLAKE2b-160 of the public key)
//! - Durable, in-memory and volatile persistence with write-through updates
//! - Whole-store JSON backup and restore
//!
//! Decoded key material is zeroized on drop and never persisted.
//!
//! # Example
//!
//! ```rust,no_run
//! use keystash::{KeyStash, Result, StoreConfig};
//!
//! fn example() -> Result<()> {
//!     let mut stash = KeyStash::open(&StoreConfig::durable("keystore.db"))?;
//!     let mut keystore = stash.keystore();
//!
//!     let account = keystore.create_key(Some("passphrase"), None)?;
//!     let signature = keystore.sign(&account, b"hello", "passphrase")?;
//!     println!("{} signed: {}", account, hex::encode(signature.to_bytes()));
//!
//!     stash.close()
//! }
//! ```

pub mod crypto;
pub mod error;
pub mod stash;
pub mod storage;

// Re-export commonly used types
pub use crypto::ed25519::AccountId;
pub use crypto::sensitive::RawKeyMaterial;
pub use error::{KeyStashError, Result};
pub use stash::KeyStash;
pub use storage::context::{Context, StoreConfig, StoreKind};
pub use storage::keystore::KeyStore;
pub use storage::record::{Backup, SecretStorage};
