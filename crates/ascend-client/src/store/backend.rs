//! Key/value backends for the local store

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::{debug, info};

use crate::error::{Result, SyncError};

/// Byte-level persistence the local store is built on.
///
/// `apply_batch` must be atomic: after it returns an error, none of the
/// writes in the batch are visible.
pub trait KvBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn apply_batch(&self, writes: Vec<(String, Vec<u8>)>) -> Result<()>;

    /// Every entry whose key starts with `prefix`
    fn dump(&self, prefix: &str) -> Result<BTreeMap<String, Vec<u8>>>;
}

/// In-memory backend for tests and ephemeral clients
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| SyncError::Store(format!("Lock poisoned: {}", e)))?;
        Ok(entries.get(key).cloned())
    }

    fn apply_batch(&self, writes: Vec<(String, Vec<u8>)>) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| SyncError::Store(format!("Lock poisoned: {}", e)))?;
        for (key, value) in writes {
            entries.insert(key, value);
        }
        Ok(())
    }

    fn dump(&self, prefix: &str) -> Result<BTreeMap<String, Vec<u8>>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| SyncError::Store(format!("Lock poisoned: {}", e)))?;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// Configuration for the sled backend
#[derive(Debug, Clone)]
pub struct SledConfig {
    /// Path to sled database
    pub db_path: PathBuf,
    /// Cache size in bytes
    pub cache_size: u64,
}

impl SledConfig {
    pub fn at_path(path: impl AsRef<Path>) -> Self {
        Self {
            db_path: path.as_ref().to_path_buf(),
            cache_size: 8 * 1024 * 1024, // 8MB
        }
    }
}

/// Durable backend; all entries live in a single sled tree
pub struct SledBackend {
    db: sled::Db,
    tree: sled::Tree,
}

impl SledBackend {
    pub fn open(config: SledConfig) -> Result<Self> {
        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::Store(format!("Failed to create {}: {}", parent.display(), e)))?;
        }

        let db = sled::Config::new()
            .path(&config.db_path)
            .cache_capacity(config.cache_size)
            .open()?;
        let tree = db.open_tree("local")?;

        info!(path = %config.db_path.display(), "Local store opened");
        Ok(Self { db, tree })
    }

    /// Flush dirty pages to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl KvBackend for SledBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.tree.get(key.as_bytes())?.map(|v| v.to_vec()))
    }

    fn apply_batch(&self, writes: Vec<(String, Vec<u8>)>) -> Result<()> {
        let count = writes.len();
        let mut batch = sled::Batch::default();
        for (key, value) in writes {
            batch.insert(key.as_bytes(), value);
        }
        self.tree.apply_batch(batch)?;
        self.tree.flush()?;
        debug!(count, "Applied local batch");
        Ok(())
    }

    fn dump(&self, prefix: &str) -> Result<BTreeMap<String, Vec<u8>>> {
        let mut out = BTreeMap::new();
        for item in self.tree.scan_prefix(prefix.as_bytes()) {
            let (key, value) = item?;
            out.insert(String::from_utf8_lossy(&key).into_owned(), value.to_vec());
        }
        Ok(out)
    }
}
