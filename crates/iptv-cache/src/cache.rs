//! Fetch-and-populate pipeline over the index and content store

use crate::clock::{Clock, SystemClock};
use crate::config::{CacheConfig, CLEANUP_INTERVAL};
use crate::error::Result;
use crate::eviction::{self, CleanupReport, Partition};
use crate::fetcher::Fetcher;
use crate::index::IndexStore;
use crate::key::{hash_key, infer_extension, resolve_mime};
use crate::store::{ContentStore, StoreRead};
use crate::types::{
    CacheIndex, CacheStats, CachedData, ClearScope, DataEntry, ImageEntry, PreloadResult,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How often the background task checks whether a cleanup pass is due
const SCHEDULE_CHECK_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Owns the cache index and content store for one cache root
///
/// All index mutations and their persistence happen under the index write
/// lock. Network fetches run outside it.
pub struct CacheManager {
    config: CacheConfig,
    index: RwLock<CacheIndex>,
    index_store: IndexStore,
    store: ContentStore,
    fetcher: Arc<dyn Fetcher>,
    clock: Arc<dyn Clock>,
}

impl CacheManager {
    /// Open the cache at `config.root`, running a cleanup pass if one is due
    pub async fn open(config: CacheConfig, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
        Self::open_with_clock(config, fetcher, Arc::new(SystemClock)).await
    }

    pub async fn open_with_clock(
        config: CacheConfig,
        fetcher: Arc<dyn Fetcher>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let store = ContentStore::new(config.images_dir(), config.data_dir());
        store.ensure_dirs().await?;

        let index_store = IndexStore::new(config.index_path());
        let index = index_store.load().await;

        info!(
            root = ?config.root,
            images = index.images.len(),
            data = index.data.len(),
            total_size = index.total_size,
            "Cache opened"
        );

        let manager = Self {
            config,
            index: RwLock::new(index),
            index_store,
            store,
            fetcher,
            clock,
        };

        manager.cleanup_if_due().await;
        Ok(manager)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Return an image as a data URI, fetching and caching it on a miss
    pub async fn get_image(&self, url: &str) -> Option<String> {
        let hash = hash_key(url);

        let cached = {
            let index = self.index.read().await;
            index.images.get(&hash).cloned()
        };

        if let Some(entry) = cached {
            match self.store.read_image(&entry.filename).await {
                StoreRead::Found(bytes) => {
                    let mut index = self.index.write().await;
                    if let Some(live) = index.images.get_mut(&hash) {
                        live.last_access = self.clock.now();
                        live.access_count += 1;
                    }
                    self.persist(&index).await;
                    debug!(key = %hash, "Image cache hit");
                    return Some(to_data_uri(&entry.mime_type, &bytes));
                }
                StoreRead::NotFound => {
                    warn!(key = %hash, "Cached image file missing, dropping entry");
                    let mut index = self.index.write().await;
                    let same = index
                        .images
                        .get(&hash)
                        .is_some_and(|live| live.filename == entry.filename);
                    if same {
                        index.remove_image(&hash);
                        self.persist(&index).await;
                    }
                }
                StoreRead::Io(e) => {
                    warn!(key = %hash, error = %e, "Failed to read cached image, refetching");
                }
            }
        }

        match self.fetch_and_store(url, &hash, true).await {
            Ok((mime, bytes)) => Some(to_data_uri(&mime, &bytes)),
            Err(e) => {
                warn!(url = %url, error = %e, "Failed to fetch image");
                None
            }
        }
    }

    /// Warm the image cache for many URLs, `preload_batch_size` at a time
    ///
    /// Repeated URLs are processed once. The index is saved once at the end.
    pub async fn preload_images(&self, urls: &[String]) -> PreloadResult {
        let mut seen = HashSet::new();
        let unique: Vec<&str> = urls
            .iter()
            .map(String::as_str)
            .filter(|url| seen.insert(*url))
            .collect();

        let mut result = PreloadResult::default();
        for batch in unique.chunks(self.config.preload_batch_size) {
            let outcomes = join_all(batch.iter().map(|url| self.preload_one(url))).await;
            for ok in outcomes {
                if ok {
                    result.success += 1;
                } else {
                    result.failed += 1;
                }
            }
        }

        {
            let index = self.index.read().await;
            self.persist(&index).await;
        }

        info!(
            success = result.success,
            failed = result.failed,
            "Image preload finished"
        );
        result
    }

    async fn preload_one(&self, url: &str) -> bool {
        let hash = hash_key(url);
        if self.index.read().await.images.contains_key(&hash) {
            return true;
        }

        match self.fetch_and_store(url, &hash, false).await {
            Ok(_) => true,
            Err(e) => {
                debug!(url = %url, error = %e, "Preload fetch failed");
                false
            }
        }
    }

    /// Download an image, write it, then commit its index record
    async fn fetch_and_store(
        &self,
        url: &str,
        hash: &str,
        persist: bool,
    ) -> Result<(String, Vec<u8>)> {
        let fetched = self.fetcher.fetch_bytes(url).await?;
        let content_type = fetched.content_type.as_deref();

        let ext = infer_extension(url, content_type);
        let mime = resolve_mime(content_type, ext);
        let filename = format!("{}.{}", hash, ext);

        self.store.write_image(&filename, &fetched.bytes).await?;

        let now = self.clock.now();
        let entry = ImageEntry {
            filename: filename.clone(),
            source_url: url.to_string(),
            size: fetched.bytes.len() as u64,
            mime_type: mime.clone(),
            cached_at: now,
            last_access: now,
            access_count: 1,
        };

        let mut index = self.index.write().await;
        let replaced = index.images.get(hash).map(|old| old.filename.clone());
        index.record_image(hash, entry);
        if persist {
            self.persist(&index).await;
        }
        drop(index);

        // Same URL with a new content type lands under a different extension
        if let Some(old) = replaced.filter(|old| *old != filename) {
            self.store.delete(&self.store.image_path(&old)).await;
        }

        debug!(key = %hash, size = fetched.bytes.len(), mime = %mime, "Cached image");
        Ok((mime, fetched.bytes))
    }

    /// Look up cached JSON for `key`, reporting whether it outlived its TTL
    pub async fn get_data<T: DeserializeOwned>(&self, key: &str) -> Option<CachedData<T>> {
        let hash = hash_key(key);

        let entry = {
            let index = self.index.read().await;
            index.data.get(&hash).cloned()
        }?;

        let bytes = match self.store.read_data(&entry.filename).await {
            StoreRead::Found(bytes) => bytes,
            StoreRead::NotFound => {
                warn!(key = %key, "Cached data file missing, dropping entry");
                self.drop_data(&hash, &entry.filename, false).await;
                return None;
            }
            StoreRead::Io(e) => {
                warn!(key = %key, error = %e, "Failed to read cached data");
                return None;
            }
        };

        let value: serde_json::Value = match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "Corrupt cached data, dropping entry");
                self.drop_data(&hash, &entry.filename, true).await;
                return None;
            }
        };

        let data: T = match serde_json::from_value(value) {
            Ok(data) => data,
            Err(e) => {
                warn!(key = %key, error = %e, "Cached data has unexpected shape");
                return None;
            }
        };

        let now = self.clock.now();
        let expired = eviction::data_expired(&entry, self.config.data_max_age, now);

        let mut index = self.index.write().await;
        if let Some(live) = index.data.get_mut(&hash) {
            live.last_access = now;
            live.access_count += 1;
        }
        self.persist(&index).await;

        debug!(key = %key, expired, "Data cache hit");
        Some(CachedData { data, expired })
    }

    /// Store `data` under `key`, replacing any previous payload
    ///
    /// Returns false if serialization or any write fails.
    pub async fn set_data<T: Serialize + ?Sized>(
        &self,
        key: &str,
        data: &T,
        max_age: Option<Duration>,
    ) -> bool {
        let json = match serde_json::to_string(data) {
            Ok(json) => json,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to serialize data for cache");
                return false;
            }
        };

        let hash = hash_key(key);
        let filename = format!("{}.json", hash);

        if let Err(e) = self.store.write_data(&filename, &json).await {
            warn!(key = %key, error = %e, "Failed to write cached data");
            return false;
        }

        let now = self.clock.now();
        let entry = DataEntry {
            filename,
            key: key.to_string(),
            size: json.len() as u64,
            max_age: max_age.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            cached_at: now,
            last_access: now,
            access_count: 0,
        };

        let mut index = self.index.write().await;
        index.record_data(&hash, entry);
        debug!(key = %key, size = json.len(), "Cached data");
        self.persist(&index).await
    }

    /// Serve fresh cached JSON, otherwise refresh from `url`
    ///
    /// If the refresh fails, stale cached JSON is returned when present.
    pub async fn get_or_fetch_json(
        &self,
        key: &str,
        url: &str,
        max_age: Option<Duration>,
    ) -> Option<serde_json::Value> {
        let stale = match self.get_data::<serde_json::Value>(key).await {
            Some(cached) if !cached.expired => return Some(cached.data),
            other => other.map(|cached| cached.data),
        };

        let fetched: Result<serde_json::Value> = match self.fetcher.fetch_text(url).await {
            Ok(text) => serde_json::from_str::<serde_json::Value>(&text).map_err(Into::into),
            Err(e) => Err(e),
        };

        match fetched {
            Ok(value) => {
                self.set_data(key, &value, max_age).await;
                Some(value)
            }
            Err(e) => {
                warn!(
                    key = %key,
                    error = %e,
                    serving_stale = stale.is_some(),
                    "Failed to refresh cached JSON"
                );
                stale
            }
        }
    }

    async fn drop_data(&self, hash: &str, filename: &str, delete_file: bool) {
        let mut index = self.index.write().await;
        let same = index
            .data
            .get(hash)
            .is_some_and(|live| live.filename == filename);
        if !same {
            return;
        }
        index.remove_data(hash);
        self.persist(&index).await;
        drop(index);

        if delete_file {
            self.store.delete(&self.store.data_path(filename)).await;
        }
    }

    pub async fn stats(&self) -> CacheStats {
        let index = self.index.read().await;
        let usage_percent = if self.config.max_size == 0 {
            0.0
        } else {
            index.total_size as f64 / self.config.max_size as f64 * 100.0
        };

        CacheStats {
            image_count: index.images.len(),
            data_count: index.data.len(),
            total_size_mb: round2(bytes_to_mb(index.total_size)),
            max_size_mb: round2(bytes_to_mb(self.config.max_size)),
            usage_percent: round2(usage_percent),
            last_cleanup: index.last_cleanup,
        }
    }

    /// Wipe one or both partitions, index first, then files
    pub async fn clear(&self, scope: ClearScope) -> Result<()> {
        let mut index = self.index.write().await;
        let mut files: Vec<PathBuf> = Vec::new();

        if scope.includes_images() {
            let drained: Vec<ImageEntry> = index.images.drain().map(|(_, e)| e).collect();
            for entry in drained {
                index.total_size = index.total_size.saturating_sub(entry.size);
                files.push(self.store.image_path(&entry.filename));
            }
        }
        if scope.includes_data() {
            let drained: Vec<DataEntry> = index.data.drain().map(|(_, e)| e).collect();
            for entry in drained {
                index.total_size = index.total_size.saturating_sub(entry.size);
                files.push(self.store.data_path(&entry.filename));
            }
        }
        if scope == ClearScope::All {
            index.total_size = 0;
        }

        for path in &files {
            self.store.delete(path).await;
        }

        let mut stray = 0;
        if scope.includes_images() {
            stray += self.store.delete_all_in(self.store.images_dir()).await;
        }
        if scope.includes_data() {
            stray += self.store.delete_all_in(self.store.data_dir()).await;
        }

        info!(scope = %scope, entries = files.len(), stray, "Cache cleared");
        self.index_store.save(&index).await
    }

    /// Run an eviction pass now
    pub async fn run_cleanup(&self) -> CleanupReport {
        let mut index = self.index.write().await;
        let report = eviction::plan_cleanup(&mut index, &self.config, self.clock.now());

        for removed in &report.removed {
            let path = match removed.partition {
                Partition::Images => self.store.image_path(&removed.filename),
                Partition::Data => self.store.data_path(&removed.filename),
            };
            self.store.delete(&path).await;
        }

        self.persist(&index).await;

        info!(
            expired_images = report.expired_images,
            expired_data = report.expired_data,
            evicted = report.evicted,
            freed_bytes = report.freed_bytes,
            total_size = index.total_size,
            "Cache cleanup finished"
        );
        report
    }

    /// Run an eviction pass if a full interval has passed since the last one
    pub async fn cleanup_if_due(&self) -> Option<CleanupReport> {
        let due = {
            let index = self.index.read().await;
            eviction::cleanup_due(&index, self.clock.now())
        };

        if due {
            Some(self.run_cleanup().await)
        } else {
            None
        }
    }

    /// Persist the index, for use at shutdown
    pub async fn flush(&self) -> Result<()> {
        let index = self.index.read().await;
        self.index_store.save(&index).await
    }

    async fn persist(&self, index: &CacheIndex) -> bool {
        match self.index_store.save(index).await {
            Ok(()) => true,
            Err(e) => {
                warn!(path = ?self.index_store.path(), error = %e, "Failed to save cache index");
                false
            }
        }
    }
}

/// Keep running daily cleanup passes for the lifetime of the process
pub fn spawn_scheduled_cleanup(manager: Arc<CacheManager>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SCHEDULE_CHECK_INTERVAL);
        loop {
            ticker.tick().await;
            if let Some(report) = manager.cleanup_if_due().await {
                debug!(
                    freed_bytes = report.freed_bytes,
                    interval_secs = CLEANUP_INTERVAL.as_secs(),
                    "Scheduled cleanup ran"
                );
            }
        }
    })
}

pub fn to_data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
