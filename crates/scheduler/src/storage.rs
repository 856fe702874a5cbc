//! Durable key/value blobs.
//!
//! Keys in use: [`STATE_KEY`], [`VARIABLES_KEY`] and `csv_cache:<sheet>:<gid>`
//! entries written by sheet sources.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::fs;
use tracing::debug;

use crate::error::StorageError;

pub const STATE_KEY: &str = "bgState";
pub const VARIABLES_KEY: &str = "variables";

#[async_trait]
pub trait StateStorage: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    async fn save(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;

    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    async fn keys(&self) -> Result<Vec<String>, StorageError>;

    async fn bytes_in_use(&self) -> Result<u64, StorageError>;

    /// Capacity in bytes, `None` when unbounded
    fn quota(&self) -> Option<u64>;
}

#[async_trait]
impl<S> StateStorage for Arc<S>
where
    S: StateStorage + ?Sized,
{
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).load(key).await
    }

    async fn save(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        (**self).save(key, bytes).await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        (**self).remove(key).await
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        (**self).keys().await
    }

    async fn bytes_in_use(&self) -> Result<u64, StorageError> {
        (**self).bytes_in_use().await
    }

    fn quota(&self) -> Option<u64> {
        (**self).quota()
    }
}

/// Process-local storage with an optional hard quota.
#[derive(Default)]
pub struct MemoryStorage {
    entries: DashMap<String, Vec<u8>>,
    quota: Option<u64>,
    writes: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota: u64) -> Self {
        Self {
            quota: Some(quota),
            ..Self::default()
        }
    }

    /// Number of successful `save` calls
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    fn used(&self) -> u64 {
        self.entries
            .iter()
            .map(|entry| (entry.key().len() + entry.value().len()) as u64)
            .sum()
    }
}

#[async_trait]
impl StateStorage for MemoryStorage {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.get(key))
    }

    async fn save(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        if let Some(quota) = self.quota {
            let existing = self
                .entries
                .get(key)
                .map(|entry| (key.len() + entry.value().len()) as u64)
                .unwrap_or(0);
            let used = self.used() - existing;
            let needed = (key.len() + bytes.len()) as u64;
            if used + needed > quota {
                return Err(StorageError::QuotaExceeded {
                    needed,
                    available: quota.saturating_sub(used),
                });
            }
        }
        self.entries.insert(key.to_string(), bytes.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        Ok(keys)
    }

    async fn bytes_in_use(&self) -> Result<u64, StorageError> {
        Ok(self.used())
    }

    fn quota(&self) -> Option<u64> {
        self.quota
    }
}

/// One JSON file per key under a directory. Writes go through a temporary
/// file and a rename.
pub struct FileStorage {
    dir: PathBuf,
    quota: Option<u64>,
}

const FILE_EXTENSION: &str = "json";

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            quota: None,
        }
    }

    pub fn with_quota(mut self, quota: u64) -> Self {
        self.quota = Some(quota);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", encode_key(key), FILE_EXTENSION))
    }
}

#[async_trait]
impl StateStorage for FileStorage {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn save(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, &path).await?;
        debug!(key, bytes = bytes.len(), path = %path.display(), "blob written");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(FILE_EXTENSION) {
                continue;
            }
            if let Some(key) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(decode_key)
            {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn bytes_in_use(&self) -> Result<u64, StorageError> {
        let mut total = 0;
        for key in self.keys().await? {
            if let Ok(meta) = fs::metadata(self.path_for(&key)).await {
                total += meta.len();
            }
        }
        Ok(total)
    }

    fn quota(&self) -> Option<u64> {
        self.quota
    }
}

/// Percent-encodes everything outside `[A-Za-z0-9_-]` so any key maps to a
/// portable file name.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

fn decode_key(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
