//! Persisted cache index and its size accounting

use crate::error::Result;
use crate::store::tmp_path;
use crate::types::{CacheIndex, DataEntry, ImageEntry};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

impl CacheIndex {
    /// Insert or replace an image entry, keeping `total_size` in step
    pub fn record_image(&mut self, hash: &str, entry: ImageEntry) {
        let added = entry.size;
        if let Some(old) = self.images.insert(hash.to_string(), entry) {
            self.total_size = self.total_size.saturating_sub(old.size);
        }
        self.total_size = self.total_size.saturating_add(added);
    }

    /// Insert or replace a data entry, keeping `total_size` in step
    pub fn record_data(&mut self, hash: &str, entry: DataEntry) {
        let added = entry.size;
        if let Some(old) = self.data.insert(hash.to_string(), entry) {
            self.total_size = self.total_size.saturating_sub(old.size);
        }
        self.total_size = self.total_size.saturating_add(added);
    }

    pub fn remove_image(&mut self, hash: &str) -> Option<ImageEntry> {
        let entry = self.images.remove(hash)?;
        self.total_size = self.total_size.saturating_sub(entry.size);
        Some(entry)
    }

    pub fn remove_data(&mut self, hash: &str) -> Option<DataEntry> {
        let entry = self.data.remove(hash)?;
        self.total_size = self.total_size.saturating_sub(entry.size);
        Some(entry)
    }

    /// Sum of entry sizes across both partitions
    pub fn computed_size(&self) -> u64 {
        let images: u64 = self.images.values().map(|e| e.size).sum();
        let data: u64 = self.data.values().map(|e| e.size).sum();
        images.saturating_add(data)
    }

    /// Reset `total_size` to the sum of live entries; returns true if it drifted
    pub fn reconcile_size(&mut self) -> bool {
        let computed = self.computed_size();
        if computed == self.total_size {
            return false;
        }
        self.total_size = computed;
        true
    }
}

/// Reads and writes `index.json`
///
/// Saves are serialized; clones share the same save lock.
#[derive(Debug, Clone)]
pub struct IndexStore {
    path: PathBuf,
    save_lock: Arc<Mutex<()>>,
}

impl IndexStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            save_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the index, treating a missing or corrupt file as an empty cache
    pub async fn load(&self) -> CacheIndex {
        let raw = match fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = ?self.path, "No cache index found, starting empty");
                return CacheIndex::default();
            }
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Failed to read cache index, starting empty");
                return CacheIndex::default();
            }
        };

        let mut index: CacheIndex = match serde_json::from_slice(&raw) {
            Ok(index) => index,
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Corrupt cache index, starting empty");
                return CacheIndex::default();
            }
        };

        let recorded = index.total_size;
        if index.reconcile_size() {
            warn!(
                recorded,
                computed = index.total_size,
                "Cache index size drifted, using sum of entries"
            );
        }

        debug!(
            images = index.images.len(),
            data = index.data.len(),
            total_size = index.total_size,
            "Loaded cache index"
        );
        index
    }

    /// Persist the index via a temporary file and rename
    pub async fn save(&self, index: &CacheIndex) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let _guard = self.save_lock.lock().await;
        let json = serde_json::to_vec(index)?;
        let tmp = tmp_path(&self.path);

        if let Err(e) = fs::write(&tmp, &json).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&tmp, &self.path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!(path = ?self.path, bytes = json.len(), "Saved cache index");
        Ok(())
    }
}
