//! Persistence context.
//!
//! A [`Context`] owns one small [`Document`]: a scalar `meta` string and an
//! ordered list of [`SecretStorage`] records. Every mutation is written
//! through to the backing [`DocumentStore`] before it returns, and is only
//! committed in memory once that write succeeded.
//!
//! Three lifecycles are supported, selected by [`StoreKind`]:
//!
//! - `durable`: a JSON file that outlives the process.
//! - `in-memory`: nothing touches disk.
//! - `volatile`: a JSON file while open, deleted on close and on reset.

use std::fmt;
use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{KeyStashError, Result};
use crate::storage::record::SecretStorage;

/// Default backing file name.
pub const DEFAULT_PATH: &str = "keystore.db";

/// Paths of volatile stores currently open in this process.
static OPEN_VOLATILE: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());

/// Registry form of `path`: the canonical parent directory joined with the
/// file name, so `dir/v.db`, `dir/./v.db` and the absolute form agree.
/// Falls back to the path as written when the parent cannot be resolved.
fn registry_path(path: &Path) -> PathBuf {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    match (fs::canonicalize(parent), path.file_name()) {
        (Ok(parent), Some(name)) => parent.join(name),
        _ => path.to_path_buf(),
    }
}

fn is_volatile_open(path: &Path) -> bool {
    let path = registry_path(path);
    OPEN_VOLATILE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .any(|p| *p == path)
}

fn register_volatile(path: &Path) {
    OPEN_VOLATILE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(registry_path(path));
}

/// Unregister one handle; returns true if it was the last one for `path`.
fn unregister_volatile(path: &Path) -> bool {
    let path = registry_path(path);
    let mut open = OPEN_VOLATILE.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(index) = open.iter().position(|p| *p == path) {
        open.swap_remove(index);
    }
    !open.iter().any(|p| *p == path)
}

/// Lifecycle of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreKind {
    #[default]
    #[serde(alias = "persistent")]
    Durable,
    InMemory,
    Volatile,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StoreKind::Durable => "durable",
            StoreKind::InMemory => "in-memory",
            StoreKind::Volatile => "volatile",
        };
        f.write_str(name)
    }
}

impl FromStr for StoreKind {
    type Err = KeyStashError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "durable" | "persistent" => Ok(StoreKind::Durable),
            "in-memory" | "memory" => Ok(StoreKind::InMemory),
            "volatile" => Ok(StoreKind::Volatile),
            _ => Err(KeyStashError::Parse(format!(
                "Unsupported store kind: '{}'. Use 'durable', 'in-memory', or 'volatile'",
                s
            ))),
        }
    }
}

/// Where and how a store is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub kind: StoreKind,

    #[serde(default = "default_path")]
    pub path: PathBuf,
}

fn default_path() -> PathBuf {
    PathBuf::from(DEFAULT_PATH)
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::default(),
            path: default_path(),
        }
    }
}

impl StoreConfig {
    pub fn durable(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: StoreKind::Durable,
            path: path.into(),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            kind: StoreKind::InMemory,
            path: default_path(),
        }
    }

    pub fn volatile(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: StoreKind::Volatile,
            path: path.into(),
        }
    }
}

/// The persisted document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub meta: String,

    #[serde(default)]
    pub records: Vec<SecretStorage>,
}

impl Document {
    /// True if the document holds nothing beyond the defaults.
    pub fn is_default(&self) -> bool {
        self.meta.is_empty() && self.records.is_empty()
    }
}

/// Backing storage for a [`Document`].
pub trait DocumentStore: Send {
    /// Read the stored document, `None` if nothing has been stored yet.
    fn load(&self) -> Result<Option<Document>>;

    /// Replace the stored document. Must be durable when it returns.
    fn persist(&self, document: &Document) -> Result<()>;

    /// Delete the stored document. Succeeds if there is nothing to delete.
    fn erase(&self) -> Result<()>;
}

/// A JSON file, replaced atomically on every write.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

impl DocumentStore for FileStore {
    fn load(&self) -> Result<Option<Document>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => serde_json::from_str(&contents)
                .map(Some)
                .map_err(|e| io::Error::new(ErrorKind::InvalidData, e).into()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn persist(&self, document: &Document) -> Result<()> {
        let json = serde_json::to_string_pretty(document)?;
        let temp_path = self.temp_path();

        let written = fs::File::create(&temp_path)
            .and_then(|mut file| {
                file.write_all(json.as_bytes())?;
                file.sync_all()
            })
            .and_then(|()| fs::rename(&temp_path, &self.path));

        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
        Ok(())
    }

    fn erase(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Keeps nothing. The document only lives in the owning [`Context`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryStore;

impl DocumentStore for MemoryStore {
    fn load(&self) -> Result<Option<Document>> {
        Ok(None)
    }

    fn persist(&self, _document: &Document) -> Result<()> {
        Ok(())
    }

    fn erase(&self) -> Result<()> {
        Ok(())
    }
}

/// An open store: the current document plus its backing storage.
pub struct Context {
    config: StoreConfig,
    store: Box<dyn DocumentStore>,
    document: Document,
    closed: bool,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .field("records", &self.document.records.len())
            .finish()
    }
}

impl Context {
    /// Open the store described by `config`, creating the default document if
    /// none exists yet.
    ///
    /// A volatile store that is not already open in this process starts from
    /// scratch; any file left behind by an earlier run is discarded.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let store: Box<dyn DocumentStore> = match config.kind {
            StoreKind::Durable | StoreKind::Volatile => Box::new(FileStore::new(&config.path)),
            StoreKind::InMemory => Box::new(MemoryStore),
        };

        if config.kind == StoreKind::Volatile && !is_volatile_open(&config.path) {
            store.erase()?;
        }

        let context = Self::with_store(config.clone(), store)?;

        if config.kind == StoreKind::Volatile {
            register_volatile(&config.path);
        }

        Ok(context)
    }

    /// Open a context over an arbitrary backing store.
    pub fn with_store(config: StoreConfig, store: Box<dyn DocumentStore>) -> Result<Self> {
        let document = match store.load()? {
            Some(document) => document,
            None => {
                let document = Document::default();
                store.persist(&document)?;
                document
            }
        };

        info!(
            kind = %config.kind,
            path = %config.path.display(),
            records = document.records.len(),
            "Opened key store"
        );

        Ok(Self {
            config,
            store,
            document,
            closed: false,
        })
    }

    /// True if the store described by `config` holds non-default content.
    ///
    /// In-memory stores never exist outside their context. Volatile stores
    /// only exist while open in this process.
    pub fn exists(config: &StoreConfig) -> Result<bool> {
        match config.kind {
            StoreKind::InMemory => Ok(false),
            StoreKind::Volatile if !is_volatile_open(&config.path) => Ok(false),
            StoreKind::Durable | StoreKind::Volatile => {
                let document = FileStore::new(&config.path).load()?;
                Ok(document.is_some_and(|d| !d.is_default()))
            }
        }
    }

    /// Close the store. Volatile stores delete their backing file.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if self.config.kind == StoreKind::Volatile && unregister_volatile(&self.config.path) {
            self.store.erase()?;
        }

        info!(kind = %self.config.kind, path = %self.config.path.display(), "Closed key store");
        Ok(())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn meta(&self) -> &str {
        &self.document.meta
    }

    pub fn records(&self) -> &[SecretStorage] {
        &self.document.records
    }

    /// First record matching `predicate`, in insertion order.
    pub fn find<P>(&self, predicate: P) -> Option<&SecretStorage>
    where
        P: FnMut(&&SecretStorage) -> bool,
    {
        self.document.records.iter().find(predicate)
    }

    /// Persist `next` and make it the current document.
    fn write(&mut self, next: Document) -> Result<()> {
        self.store.persist(&next)?;
        debug!(records = next.records.len(), "Wrote key store document");
        self.document = next;
        Ok(())
    }

    pub fn set_meta(&mut self, meta: impl Into<String>) -> Result<()> {
        let mut next = self.document.clone();
        next.meta = meta.into();
        self.write(next)
    }

    /// Reset `meta` to its default.
    pub fn unset_meta(&mut self) -> Result<()> {
        self.set_meta(String::new())
    }

    /// Replace all records.
    pub fn set_records(&mut self, records: Vec<SecretStorage>) -> Result<()> {
        let mut next = self.document.clone();
        next.records = records;
        self.write(next)
    }

    pub fn append(&mut self, record: SecretStorage) -> Result<()> {
        let mut next = self.document.clone();
        next.records.push(record);
        self.write(next)
    }

    /// Remove the first record matching `predicate` and return it.
    pub fn remove_first<P>(&mut self, mut predicate: P) -> Result<Option<SecretStorage>>
    where
        P: FnMut(&SecretStorage) -> bool,
    {
        let Some(index) = self.document.records.iter().position(|r| predicate(r)) else {
            return Ok(None);
        };

        let mut next = self.document.clone();
        let removed = next.records.remove(index);
        self.write(next)?;
        Ok(Some(removed))
    }

    /// Remove every record matching `predicate`; returns how many were removed.
    pub fn remove_where<P>(&mut self, mut predicate: P) -> Result<usize>
    where
        P: FnMut(&SecretStorage) -> bool,
    {
        let mut next = self.document.clone();
        next.records.retain(|r| !predicate(r));
        let removed = self.document.records.len() - next.records.len();

        if removed > 0 {
            self.write(next)?;
        }
        Ok(removed)
    }

    /// Replace meta and records in a single write.
    pub fn replace(&mut self, document: Document) -> Result<()> {
        self.write(document)
    }

    /// Remove all records.
    pub fn unset_records(&mut self) -> Result<()> {
        self.set_records(Vec::new())
    }

    /// Return to the default document.
    ///
    /// Volatile stores delete their backing file instead of writing the
    /// defaults; the next mutation recreates it.
    pub fn reset(&mut self) -> Result<()> {
        if self.config.kind == StoreKind::Volatile {
            self.store.erase()?;
            self.document = Document::default();
            debug!("Erased volatile key store");
            Ok(())
        } else {
            self.write(Document::default())
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, path = %self.config.path.display(), "Failed to close key store");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn sample_record(id: &str) -> SecretStorage {
        serde_json::from_value(serde_json::json!({
            "crypto": {
                "ciphertext": "00",
                "cipherparams": { "iv": "00" },
                "cipher": "aes-128-ctr",
                "kdf": "pbkdf2",
                "kdfparams": { "dklen": 32, "salt": "00", "c": 1, "prf": "hmac-sha256" },
                "mac": "00"
            },
            "id": id,
            "version": 3,
            "meta": "{}"
        }))
        .unwrap()
    }

    /// Store whose writes can be made to fail.
    struct FlakyStore {
        fail: Arc<AtomicBool>,
    }

    impl DocumentStore for FlakyStore {
        fn load(&self) -> Result<Option<Document>> {
            Ok(None)
        }

        fn persist(&self, _document: &Document) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(std::io::Error::new(ErrorKind::Other, "disk full").into());
            }
            Ok(())
        }

        fn erase(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_store_kind_parse() {
        assert_eq!("durable".parse::<StoreKind>().unwrap(), StoreKind::Durable);
        assert_eq!("persistent".parse::<StoreKind>().unwrap(), StoreKind::Durable);
        assert_eq!("in-memory".parse::<StoreKind>().unwrap(), StoreKind::InMemory);
        assert_eq!("Volatile".parse::<StoreKind>().unwrap(), StoreKind::Volatile);
        assert!("sqlite".parse::<StoreKind>().is_err());
    }

    #[test]
    fn test_store_config_deserialize() {
        let config: StoreConfig =
            serde_json::from_str(r#"{"kind": "in-memory", "path": "x.db"}"#).unwrap();
        assert_eq!(config.kind, StoreKind::InMemory);
        assert_eq!(config.path, PathBuf::from("x.db"));

        let config: StoreConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, StoreConfig::default());
    }

    #[test]
    fn test_durable_open_creates_default_document() {
        let temp_dir = TempDir::new().unwrap();
        let config = StoreConfig::durable(temp_dir.path().join("store.db"));

        let context = Context::open(&config).unwrap();

        assert!(config.path.exists());
        assert_eq!(context.meta(), "");
        assert!(context.records().is_empty());
        assert!(!Context::exists(&config).unwrap());
    }

    #[test]
    fn test_durable_write_through() {
        let temp_dir = TempDir::new().unwrap();
        let config = StoreConfig::durable(temp_dir.path().join("store.db"));

        {
            let mut context = Context::open(&config).unwrap();
            context.append(sample_record("a")).unwrap();
            context.append(sample_record("b")).unwrap();
            context.set_meta("note").unwrap();
        }

        assert!(Context::exists(&config).unwrap());

        let context = Context::open(&config).unwrap();
        let ids: Vec<&str> = context.records().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(context.meta(), "note");
        assert!(!temp_dir.path().join("store.db.tmp").exists());
    }

    #[test]
    fn test_remove_first_only_removes_one() {
        let mut context = Context::open(&StoreConfig::in_memory()).unwrap();
        context.append(sample_record("dup")).unwrap();
        context.append(sample_record("other")).unwrap();
        context.append(sample_record("dup")).unwrap();

        let removed = context.remove_first(|r| r.id == "dup").unwrap();
        assert_eq!(removed.unwrap().id, "dup");

        let ids: Vec<&str> = context.records().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["other", "dup"]);

        assert!(context.remove_first(|r| r.id == "missing").unwrap().is_none());
    }

    #[test]
    fn test_remove_where_removes_all_matches() {
        let mut context = Context::open(&StoreConfig::in_memory()).unwrap();
        context.append(sample_record("dup")).unwrap();
        context.append(sample_record("other")).unwrap();
        context.append(sample_record("dup")).unwrap();

        assert_eq!(context.remove_where(|r| r.id == "dup").unwrap(), 2);
        assert_eq!(context.records().len(), 1);
    }

    #[test]
    fn test_find_returns_first_match() {
        let mut context = Context::open(&StoreConfig::in_memory()).unwrap();
        let mut first = sample_record("dup");
        first.meta = "first".to_string();
        context.append(first).unwrap();
        context.append(sample_record("dup")).unwrap();

        assert_eq!(context.find(|r| r.id == "dup").unwrap().meta, "first");
    }

    #[test]
    fn test_failed_write_leaves_document_unchanged() {
        let fail = Arc::new(AtomicBool::new(false));
        let store = FlakyStore { fail: fail.clone() };
        let mut context = Context::with_store(StoreConfig::in_memory(), Box::new(store)).unwrap();
        context.append(sample_record("a")).unwrap();

        fail.store(true, Ordering::SeqCst);
        assert!(matches!(
            context.append(sample_record("b")),
            Err(KeyStashError::BackendUnavailable(_))
        ));
        assert!(context.remove_first(|r| r.id == "a").is_err());

        assert_eq!(context.records().len(), 1);
        assert_eq!(context.records()[0].id, "a");
    }

    #[test]
    fn test_in_memory_never_exists() {
        let mut context = Context::open(&StoreConfig::in_memory()).unwrap();
        context.append(sample_record("a")).unwrap();

        assert!(!Context::exists(&StoreConfig::in_memory()).unwrap());
    }

    #[test]
    fn test_volatile_lifecycle() {
        let temp_dir = TempDir::new().unwrap();
        let config = StoreConfig::volatile(temp_dir.path().join("volatile.db"));

        let mut context = Context::open(&config).unwrap();
        assert!(!Context::exists(&config).unwrap());

        context.append(sample_record("a")).unwrap();
        assert!(Context::exists(&config).unwrap());

        context.close().unwrap();
        assert!(!config.path.exists());
        assert!(!Context::exists(&config).unwrap());

        let context = Context::open(&config).unwrap();
        assert!(context.records().is_empty());
    }

    #[test]
    fn test_volatile_stale_file_is_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("stale.db");
        let stale = Document {
            meta: "left over".to_string(),
            records: vec![sample_record("a")],
        };
        FileStore::new(&path).persist(&stale).unwrap();

        let config = StoreConfig::volatile(&path);
        assert!(!Context::exists(&config).unwrap());

        let context = Context::open(&config).unwrap();
        assert!(context.records().is_empty());
        assert_eq!(context.meta(), "");
    }

    #[test]
    fn test_volatile_reset_erases_file() {
        let temp_dir = TempDir::new().unwrap();
        let config = StoreConfig::volatile(temp_dir.path().join("reset.db"));

        let mut context = Context::open(&config).unwrap();
        context.append(sample_record("a")).unwrap();
        context.reset().unwrap();

        assert!(!config.path.exists());
        assert!(!Context::exists(&config).unwrap());
        assert!(context.records().is_empty());

        context.set_meta("again").unwrap();
        assert!(Context::exists(&config).unwrap());
    }

    #[test]
    fn test_volatile_dropped_without_close_is_erased() {
        let temp_dir = TempDir::new().unwrap();
        let config = StoreConfig::volatile(temp_dir.path().join("dropped.db"));

        {
            let mut context = Context::open(&config).unwrap();
            context.append(sample_record("a")).unwrap();
        }

        assert!(!config.path.exists());
        assert!(!Context::exists(&config).unwrap());
    }

    #[test]
    fn test_durable_reset_writes_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = StoreConfig::durable(temp_dir.path().join("store.db"));

        let mut context = Context::open(&config).unwrap();
        context.append(sample_record("a")).unwrap();
        context.set_meta("meta").unwrap();
        context.reset().unwrap();

        assert!(config.path.exists());
        assert!(!Context::exists(&config).unwrap());
    }

    #[test]
    fn test_corrupt_durable_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("corrupt.db");
        fs::write(&path, "not json").unwrap();
        let config = StoreConfig::durable(&path);

        match Context::open(&config) {
            Err(KeyStashError::BackendUnavailable(e)) => {
                assert_eq!(e.kind(), ErrorKind::InvalidData)
            }
            other => panic!("Expected BackendUnavailable, got {:?}", other),
        }
        assert!(matches!(
            Context::exists(&config),
            Err(KeyStashError::BackendUnavailable(_))
        ));
    }

    #[test]
    fn test_failed_persist_removes_temp_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store.db");
        // A directory in place of the target makes the final rename fail.
        fs::create_dir(&path).unwrap();
        fs::write(path.join("occupied"), "x").unwrap();

        let store = FileStore::new(&path);
        assert!(matches!(
            store.persist(&Document::default()),
            Err(KeyStashError::BackendUnavailable(_))
        ));
        assert!(!temp_dir.path().join("store.db.tmp").exists());
    }

    #[test]
    fn test_volatile_registry_normalizes_paths() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("v.db");
        let dotted = temp_dir.path().join(".").join("v.db");

        let mut first = Context::open(&StoreConfig::volatile(&path)).unwrap();
        first.append(sample_record("a")).unwrap();

        assert!(Context::exists(&StoreConfig::volatile(&dotted)).unwrap());

        let second = Context::open(&StoreConfig::volatile(&dotted)).unwrap();
        assert_eq!(second.records().len(), 1);
        assert!(path.exists());

        second.close().unwrap();
        assert!(path.exists());

        first.close().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_missing_directory_is_backend_unavailable() {
        let temp_dir = TempDir::new().unwrap();
        let config = StoreConfig::durable(temp_dir.path().join("missing").join("store.db"));

        assert!(matches!(
            Context::open(&config),
            Err(KeyStashError::BackendUnavailable(_))
        ));
    }
}
