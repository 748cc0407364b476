//! Whole-store handle.
//!
//! [`KeyStash`] pairs an open [`Context`] with the store-level `meta` scalar
//! and adds the operations that span both: JSON backup and restore, and
//! clearing everything.

use tracing::info;

use crate::error::Result;
use crate::storage::context::{Context, Document, StoreConfig};
use crate::storage::keystore::{self, KeyStore};
use crate::storage::record::Backup;

/// An open key store.
///
/// # Example
///
/// ```rust,no_run
/// use keystash::{KeyStash, StoreConfig};
///
/// # fn example() -> keystash::Result<()> {
/// let mut stash = KeyStash::open(&StoreConfig::durable("keystore.db"))?;
/// let key = stash.keystore().create_key(Some("passphrase"), None)?;
/// println!("created {}", key);
/// stash.close()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct KeyStash {
    context: Context,
}

impl KeyStash {
    pub fn open(config: &StoreConfig) -> Result<Self> {
        Ok(Self {
            context: Context::open(config)?,
        })
    }

    /// True if the store described by `config` holds any keys or meta.
    pub fn exists(config: &StoreConfig) -> Result<bool> {
        Context::exists(config)
    }

    pub fn close(self) -> Result<()> {
        self.context.close()
    }

    /// Repository operations on this store.
    pub fn keystore(&mut self) -> KeyStore<'_> {
        KeyStore::new(&mut self.context)
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Store-level meta. Unrelated to any record's `meta`.
    pub fn meta(&self) -> &str {
        self.context.meta()
    }

    pub fn set_meta(&mut self, meta: impl Into<String>) -> Result<()> {
        self.context.set_meta(meta)
    }

    /// Serialize meta and every record into a JSON backup envelope.
    pub fn save(&self) -> Result<String> {
        let backup = Backup {
            meta: self.meta().to_string(),
            keystore: keystore::save(&self.context),
        };
        Ok(serde_json::to_string(&backup)?)
    }

    /// Restore a backup produced by [`KeyStash::save`], replacing the current
    /// meta and records. Nothing changes if `value` does not parse.
    pub fn load(&mut self, value: &str) -> Result<()> {
        let backup: Backup = serde_json::from_str(value)?;
        let count = backup.keystore.len();
        self.context.replace(Document {
            meta: backup.meta,
            records: backup.keystore,
        })?;
        info!(records = count, "Restored key store backup");
        Ok(())
    }

    /// Drop all records and reset meta.
    pub fn clear(&mut self) -> Result<()> {
        self.context.reset()?;
        info!(path = %self.context.config().path.display(), "Cleared key store");
        Ok(())
    }
}
