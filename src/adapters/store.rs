//! Key-value store adapters.
//!
//! Both implement [`StoragePort`] over a `namespace::key` map.
//! [`MemoryStore`] keeps it in memory only; [`JsonFileStore`] rewrites a
//! JSON file after every mutation so bonded entries survive restarts.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::app::ports::{StorageError, StoragePort};

fn composite_key(namespace: &str, key: &str) -> String {
    format!("{}::{}", namespace, key)
}

fn read_into(map: &BTreeMap<String, Vec<u8>>, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
    match map.get(&composite_key(namespace, key)) {
        Some(data) => {
            let len = data.len().min(buf.len());
            buf[..len].copy_from_slice(&data[..len]);
            Ok(len)
        }
        None => Err(StorageError::NotFound),
    }
}

// ───────────────────────────────────────────────────────────────
// MemoryStore
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: BTreeMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl StoragePort for MemoryStore {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        read_into(&self.entries, namespace, key, buf)
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.entries.insert(composite_key(namespace, key), data.to_vec());
        Ok(())
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        self.entries.remove(&composite_key(namespace, key));
        Ok(())
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.entries.contains_key(&composite_key(namespace, key))
    }
}

// ───────────────────────────────────────────────────────────────
// JsonFileStore
// ───────────────────────────────────────────────────────────────

/// File-backed store. The whole map is rewritten on every mutation.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: BTreeMap<String, Vec<u8>>,
}

impl JsonFileStore {
    /// Open `path`, starting empty if the file does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|_| {
                warn!("Store: {} is not a valid store file", path.display());
                StorageError::Corrupted
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!("Store: cannot read {}: {}", path.display(), e);
                return Err(StorageError::IoError);
            }
        };
        info!("Store: {} opened ({} entries)", path.display(), entries.len());
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(&self.entries).map_err(|_| StorageError::Corrupted)?;
        // Write-then-rename keeps the previous file intact on failure.
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, &bytes)
            .and_then(|()| fs::rename(&tmp, &self.path))
            .map_err(|e| {
                warn!("Store: cannot write {}: {}", self.path.display(), e);
                if e.kind() == std::io::ErrorKind::StorageFull {
                    StorageError::Full
                } else {
                    StorageError::IoError
                }
            })
    }
}

impl StoragePort for JsonFileStore {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        read_into(&self.entries, namespace, key, buf)
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let composite = composite_key(namespace, key);
        let previous = self.entries.insert(composite.clone(), data.to_vec());
        self.flush().inspect_err(|_| {
            match previous {
                Some(p) => self.entries.insert(composite, p),
                None => self.entries.remove(&composite),
            };
        })
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        if self.entries.remove(&composite_key(namespace, key)).is_none() {
            return Ok(());
        }
        self.flush()
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.entries.contains_key(&composite_key(namespace, key))
    }
}
