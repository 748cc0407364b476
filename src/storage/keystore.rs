//! Key repository.
//!
//! Repository operations over an open [`Context`]: create, import, export,
//! delete and sign with passphrase-protected keys indexed by [`AccountId`].
//!
//! Records are never deduplicated. Importing the same key twice stores two
//! records under the same account id, and every lookup resolves to the first
//! one in insertion order. Decoded key material never outlives the call that
//! decoded it.

use ed25519_dalek::{Signature, VerifyingKey};
use tracing::{debug, info};

use crate::crypto::ed25519::{self, AccountId};
use crate::crypto::encryption::{decode, encode};
use crate::crypto::sensitive::RawKeyMaterial;
use crate::error::{KeyStashError, Result};
use crate::storage::context::Context;
use crate::storage::record::{SecretStorage, DEFAULT_META};

/// First record stored under `key`.
fn find_record<'a>(context: &'a Context, key: &AccountId) -> Option<&'a SecretStorage> {
    context.find(|record| record.matches(key))
}

fn require_record<'a>(context: &'a Context, key: &AccountId) -> Result<&'a SecretStorage> {
    find_record(context, key).ok_or(KeyStashError::NoSuchKey)
}

/// Encode `raw` and append it. Returns the account id of the key.
fn store_key(
    context: &mut Context,
    raw: &RawKeyMaterial,
    passphrase: Option<&str>,
    meta: Option<&str>,
) -> Result<AccountId> {
    let passphrase = passphrase.unwrap_or("");
    let meta = meta.filter(|m| !m.is_empty()).unwrap_or(DEFAULT_META);

    let record = encode(raw, passphrase, meta)?;
    let key = record
        .address
        .ok_or_else(|| KeyStashError::Crypto("Encoded record has no address".to_string()))?;

    context.append(record)?;
    info!(account = %key, "Stored key");

    Ok(key)
}

/// List the account ids of all stored records, in insertion order.
///
/// Duplicates are preserved. Records without an address are skipped.
pub fn get_keys(context: &Context) -> Vec<AccountId> {
    context
        .records()
        .iter()
        .filter_map(|record| record.address)
        .collect()
}

/// Generate a new key and store it.
///
/// The passphrase defaults to the empty string and `meta` to `"{}"`.
///
/// # Example
///
/// ```rust,no_run
/// use keystash::storage::context::{Context, StoreConfig};
/// use keystash::storage::keystore::{create_key, get_keys};
///
/// # fn example() -> keystash::error::Result<()> {
/// let mut context = Context::open(&StoreConfig::in_memory())?;
/// let key = create_key(&mut context, Some("passphrase"), None)?;
/// assert_eq!(get_keys(&context), vec![key]);
/// # Ok(())
/// # }
/// ```
pub fn create_key(
    context: &mut Context,
    passphrase: Option<&str>,
    meta: Option<&str>,
) -> Result<AccountId> {
    let raw = ed25519::generate_key_material();
    store_key(context, &raw, passphrase, meta)
}

/// Store existing key material.
pub fn import_raw(
    context: &mut Context,
    private_key: &RawKeyMaterial,
    passphrase: Option<&str>,
    meta: Option<&str>,
) -> Result<AccountId> {
    store_key(context, private_key, passphrase, meta)
}

/// Import a record produced elsewhere.
///
/// The record is decoded with `passphrase` and re-encoded under the same
/// passphrase with a fresh salt, IV and id, keeping its `meta`. The account id
/// is the same as the one the key had in its original store.
pub fn import_key(
    context: &mut Context,
    secret: &SecretStorage,
    passphrase: &str,
) -> Result<AccountId> {
    let raw = decode(secret, passphrase)?;
    store_key(context, &raw, Some(passphrase), Some(secret.meta.as_str()))
}

/// Return the stored record for `key` after checking the passphrase.
///
/// The record is returned exactly as stored.
pub fn export_key(context: &Context, key: &AccountId, passphrase: &str) -> Result<SecretStorage> {
    let record = require_record(context, key)?;
    decode(record, passphrase)?;
    debug!(account = %key, "Exported key record");
    Ok(record.clone())
}

/// Decrypt and return the key material stored under `key`.
pub fn export_raw_key(
    context: &Context,
    key: &AccountId,
    passphrase: &str,
) -> Result<RawKeyMaterial> {
    let record = require_record(context, key)?;
    let raw = decode(record, passphrase)?;
    info!(account = %key, "Exported raw key material");
    Ok(raw)
}

/// Public key stored under `key`, or `None` if there is no such record.
pub fn get_public_key(
    context: &Context,
    key: &AccountId,
    passphrase: &str,
) -> Result<Option<VerifyingKey>> {
    let Some(record) = find_record(context, key) else {
        return Ok(None);
    };
    let raw = decode(record, passphrase)?;
    ed25519::derive_public_key(&raw).map(Some)
}

/// The `meta` string of the record stored under `key`.
pub fn get_meta(context: &Context, key: &AccountId) -> Result<String> {
    Ok(require_record(context, key)?.meta.clone())
}

/// Delete the first record stored under `key`.
///
/// Returns `false` if there was nothing to delete.
pub fn delete_key(context: &mut Context, key: &AccountId) -> Result<bool> {
    let removed = context.remove_first(|record| record.matches(key))?;
    if removed.is_some() {
        info!(account = %key, "Deleted key");
    }
    Ok(removed.is_some())
}

/// Sign `message` with the key stored under `key`.
pub fn sign(
    context: &Context,
    key: &AccountId,
    message: &[u8],
    passphrase: &str,
) -> Result<Signature> {
    let record = require_record(context, key)?;
    let raw = decode(record, passphrase)?;
    let signature = ed25519::sign(message, &raw)?;
    debug!(account = %key, message_len = message.len(), "Signed message");
    Ok(signature)
}

/// Every stored record, verbatim.
pub fn save(context: &Context) -> Vec<SecretStorage> {
    context.records().to_vec()
}

/// Replace all records with `records`, verbatim.
pub fn load(context: &mut Context, records: Vec<SecretStorage>) -> Result<()> {
    let count = records.len();
    context.set_records(records)?;
    info!(records = count, "Loaded key records");
    Ok(())
}

/// Remove every record.
pub fn clear(context: &mut Context) -> Result<()> {
    context.unset_records()?;
    info!("Cleared key records");
    Ok(())
}

/// Repository handle borrowing an open [`Context`].
///
/// Each method forwards to the free function of the same name.
#[derive(Debug)]
pub struct KeyStore<'a> {
    context: &'a mut Context,
}

impl<'a> KeyStore<'a> {
    pub fn new(context: &'a mut Context) -> Self {
        Self { context }
    }

    pub fn get_keys(&self) -> Vec<AccountId> {
        get_keys(self.context)
    }

    pub fn create_key(&mut self, passphrase: Option<&str>, meta: Option<&str>) -> Result<AccountId> {
        create_key(self.context, passphrase, meta)
    }

    pub fn import_raw(
        &mut self,
        private_key: &RawKeyMaterial,
        passphrase: Option<&str>,
        meta: Option<&str>,
    ) -> Result<AccountId> {
        import_raw(self.context, private_key, passphrase, meta)
    }

    pub fn import_key(&mut self, secret: &SecretStorage, passphrase: &str) -> Result<AccountId> {
        import_key(self.context, secret, passphrase)
    }

    pub fn export_key(&self, key: &AccountId, passphrase: &str) -> Result<SecretStorage> {
        export_key(self.context, key, passphrase)
    }

    pub fn export_raw_key(&self, key: &AccountId, passphrase: &str) -> Result<RawKeyMaterial> {
        export_raw_key(self.context, key, passphrase)
    }

    pub fn get_public_key(&self, key: &AccountId, passphrase: &str) -> Result<Option<VerifyingKey>> {
        get_public_key(self.context, key, passphrase)
    }

    pub fn get_meta(&self, key: &AccountId) -> Result<String> {
        get_meta(self.context, key)
    }

    pub fn delete_key(&mut self, key: &AccountId) -> Result<bool> {
        delete_key(self.context, key)
    }

    pub fn sign(&self, key: &AccountId, message: &[u8], passphrase: &str) -> Result<Signature> {
        sign(self.context, key, message, passphrase)
    }

    pub fn save(&self) -> Vec<SecretStorage> {
        save(self.context)
    }

    pub fn load(&mut self, records: Vec<SecretStorage>) -> Result<()> {
        load(self.context, records)
    }

    pub fn clear(&mut self) -> Result<()> {
        clear(self.context)
    }
}
