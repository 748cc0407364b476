//! Error types for the keystash library.
//!
//! Every fallible operation in the crate returns [`KeyStashError`]. Lookup
//! misses, passphrase failures and backend failures are distinct variants so
//! callers can decide what is retryable.

use thiserror::Error;

/// The main error type for keystash operations.
#[derive(Error, Debug)]
pub enum KeyStashError {
    /// No record is stored under the requested account id
    #[error("No such key")]
    NoSuchKey,

    /// MAC verification failed.
    ///
    /// Raised both for a wrong passphrase and for tampered ciphertext or
    /// parameters. The two cases are intentionally indistinguishable.
    #[error("Invalid passphrase or corrupted data")]
    InvalidPassphraseOrCorruptData,

    /// The encrypted record is structurally invalid
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    /// The persistence backend failed to open, read or write
    #[error("Storage backend unavailable: {0}")]
    BackendUnavailable(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid key format or content
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Key derivation failed
    #[error("Key derivation error: {0}")]
    KeyDerivation(String),

    /// Cipher or signature operation failed
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Invalid input data
    #[error("Parse error: {0}")]
    Parse(String),
}

/// A specialized Result type for keystash operations.
pub type Result<T> = std::result::Result<T, KeyStashError>;
