//! Flat on-disk storage for cached image bytes and JSON payloads

use crate::error::Result;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tracing::{debug, warn};

/// Result of reading a stored file
#[derive(Debug)]
pub enum StoreRead {
    Found(Vec<u8>),
    NotFound,
    Io(io::Error),
}

impl From<io::Result<Vec<u8>>> for StoreRead {
    fn from(result: io::Result<Vec<u8>>) -> Self {
        match result {
            Ok(bytes) => StoreRead::Found(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => StoreRead::NotFound,
            Err(e) => StoreRead::Io(e),
        }
    }
}

/// Content store with one directory per partition
#[derive(Debug, Clone)]
pub struct ContentStore {
    images_dir: PathBuf,
    data_dir: PathBuf,
}

impl ContentStore {
    pub fn new(images_dir: PathBuf, data_dir: PathBuf) -> Self {
        Self {
            images_dir,
            data_dir,
        }
    }

    pub async fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.images_dir).await?;
        fs::create_dir_all(&self.data_dir).await?;
        Ok(())
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn image_path(&self, filename: &str) -> PathBuf {
        self.images_dir.join(filename)
    }

    pub fn data_path(&self, filename: &str) -> PathBuf {
        self.data_dir.join(filename)
    }

    pub async fn write_image(&self, filename: &str, bytes: &[u8]) -> Result<()> {
        write_file(&self.images_dir, filename, bytes).await
    }

    pub async fn read_image(&self, filename: &str) -> StoreRead {
        fs::read(self.image_path(filename)).await.into()
    }

    pub async fn write_data(&self, filename: &str, json: &str) -> Result<()> {
        write_file(&self.data_dir, filename, json.as_bytes()).await
    }

    pub async fn read_data(&self, filename: &str) -> StoreRead {
        fs::read(self.data_path(filename)).await.into()
    }

    /// Remove a file, logging instead of failing
    pub async fn delete(&self, path: &Path) {
        match fs::remove_file(path).await {
            Ok(()) => debug!(path = ?path, "Deleted cached file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = ?path, error = %e, "Failed to delete cached file"),
        }
    }

    /// Delete every regular file in a partition directory
    pub async fn delete_all_in(&self, dir: &Path) -> usize {
        let mut reader = match fs::read_dir(dir).await {
            Ok(reader) => reader,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(dir = ?dir, error = %e, "Failed to list cache directory");
                }
                return 0;
            }
        };

        let mut deleted = 0;
        loop {
            match reader.next_entry().await {
                Ok(Some(entry)) => {
                    let is_file = entry
                        .file_type()
                        .await
                        .map(|t| t.is_file())
                        .unwrap_or(false);
                    if is_file {
                        self.delete(&entry.path()).await;
                        deleted += 1;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(dir = ?dir, error = %e, "Failed to read cache directory entry");
                    break;
                }
            }
        }
        deleted
    }
}

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique temporary sibling of `path`: `<name>.<pid>.<n>.tmp`
pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{}.{}.{}.tmp", name, std::process::id(), n))
}

/// Write through a temporary sibling so readers never observe partial content
async fn write_file(dir: &Path, filename: &str, bytes: &[u8]) -> Result<()> {
    fs::create_dir_all(dir).await?;

    let path = dir.join(filename);
    let tmp = tmp_path(&path);

    if let Err(e) = fs::write(&tmp, bytes).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&tmp, &path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_in(root: &Path) -> ContentStore {
        ContentStore::new(root.join("images"), root.join("data"))
    }

    #[tokio::test]
    async fn test_write_and_read_image() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());

        store.write_image("abc.png", b"\x89PNG").await.unwrap();
        match store.read_image("abc.png").await {
            StoreRead::Found(bytes) => assert_eq!(bytes, b"\x89PNG"),
            other => panic!("expected Found, got {:?}", other),
        }
        assert_eq!(std::fs::read_dir(store.images_dir()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store.ensure_dirs().await.unwrap();

        assert!(matches!(store.read_data("nope.json").await, StoreRead::NotFound));
        assert!(matches!(store.read_image("nope.jpg").await, StoreRead::NotFound));
    }

    #[tokio::test]
    async fn test_write_creates_missing_dirs() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());

        store.write_data("k.json", "{\"a\":1}").await.unwrap();
        assert!(dir.path().join("data").join("k.json").exists());
    }

    #[test]
    fn test_tmp_paths_are_unique() {
        let path = Path::new("/cache/images/abc.png");
        let a = tmp_path(path);
        let b = tmp_path(path);

        assert_ne!(a, b);
        assert_eq!(a.parent(), path.parent());
        let name = a.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("abc.png."));
        assert!(name.ends_with(".tmp"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_same_file() {
        let dir = tempdir().unwrap();
        let store = std::sync::Arc::new(store_in(dir.path()));
        store.ensure_dirs().await.unwrap();

        let writes: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.write_image("same.jpg", &[7u8; 64 * 1024]).await })
            })
            .collect();
        for write in writes {
            write.await.unwrap().unwrap();
        }

        match store.read_image("same.jpg").await {
            StoreRead::Found(bytes) => assert_eq!(bytes.len(), 64 * 1024),
            other => panic!("expected Found, got {:?}", other),
        }
        assert_eq!(std::fs::read_dir(store.images_dir()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_delete_missing_file_is_silent() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());

        store.delete(&dir.path().join("ghost.jpg")).await;
    }

    #[tokio::test]
    async fn test_delete_all_in() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store.write_image("a.jpg", b"a").await.unwrap();
        store.write_image("b.jpg", b"b").await.unwrap();
        store.write_data("c.json", "1").await.unwrap();

        let deleted = store.delete_all_in(store.images_dir()).await;
        assert_eq!(deleted, 2);
        assert!(!store.image_path("a.jpg").exists());
        assert!(store.data_path("c.json").exists());
    }
}
