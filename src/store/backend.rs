//! Key-value backends for the graph store.
//!
//! Entries are immutable: `put` on an occupied fingerprint fails. Removal is
//! explicit via `evict`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;

use super::StoredResult;
use crate::errors::{UeirError, UeirResult};
use crate::ueir::Fingerprint;

#[async_trait]
pub trait StoreBackend: Send + Sync {
    async fn get(&self, fingerprint: &Fingerprint) -> UeirResult<Option<StoredResult>>;
    async fn put(&self, result: StoredResult) -> UeirResult<()>;
    /// Returns whether an entry was removed.
    async fn evict(&self, fingerprint: &Fingerprint) -> UeirResult<bool>;
    async fn len(&self) -> UeirResult<usize>;
}

fn occupied(fingerprint: &Fingerprint) -> UeirError {
    UeirError::Store(format!("entry {} already stored", fingerprint.short()))
}

#[derive(Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<Fingerprint, StoredResult>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    async fn get(&self, fingerprint: &Fingerprint) -> UeirResult<Option<StoredResult>> {
        let entries = self.entries.read().await;
        Ok(entries.get(fingerprint).cloned())
    }

    async fn put(&self, result: StoredResult) -> UeirResult<()> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&result.graph_id) {
            return Err(occupied(&result.graph_id));
        }
        entries.insert(result.graph_id, result);
        Ok(())
    }

    async fn evict(&self, fingerprint: &Fingerprint) -> UeirResult<bool> {
        let mut entries = self.entries.write().await;
        Ok(entries.remove(fingerprint).is_some())
    }

    async fn len(&self) -> UeirResult<usize> {
        Ok(self.entries.read().await.len())
    }
}

/// One pretty-printed JSON document per fingerprint, named `<hex>.json`.
pub struct JsonFileBackend {
    dir: PathBuf,
}

impl JsonFileBackend {
    pub async fn new(dir: impl AsRef<Path>) -> UeirResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn entry_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.dir.join(format!("{}.json", fingerprint.to_hex()))
    }
}

#[async_trait]
impl StoreBackend for JsonFileBackend {
    async fn get(&self, fingerprint: &Fingerprint) -> UeirResult<Option<StoredResult>> {
        let path = self.entry_path(fingerprint);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).await?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    async fn put(&self, result: StoredResult) -> UeirResult<()> {
        let path = self.entry_path(&result.graph_id);
        if path.exists() {
            return Err(occupied(&result.graph_id));
        }
        let content = serde_json::to_string_pretty(&result)?;
        // write-then-rename so readers never see a partial document
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, content).await?;
        fs::rename(&staging, &path).await?;
        Ok(())
    }

    async fn evict(&self, fingerprint: &Fingerprint) -> UeirResult<bool> {
        let path = self.entry_path(fingerprint);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).await?;
        Ok(true)
    }

    async fn len(&self) -> UeirResult<usize> {
        let mut count = 0;
        let mut dir = fs::read_dir(&self.dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            if entry.path().extension().and_then(|e| e.to_str()) == Some("json") {
                count += 1;
            }
        }
        Ok(count)
    }
}
