//! Key storage module.
//!
//! Encrypted record format, the persistence context that holds records, and
//! the key repository operating on it.

pub mod context;
pub mod keystore;
pub mod record;
