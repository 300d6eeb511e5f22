use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{CacheError, Result};

pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Minimum spacing between scheduled cleanup passes
pub const CLEANUP_INTERVAL: Duration = DAY;

/// Size eviction stops once usage is at or below this fraction of the ceiling
pub const LOW_WATER_RATIO: f64 = 0.8;

pub const MAX_REDIRECTS: usize = 5;

/// Cache configuration, usually parsed from environment variables
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding `index.json`, `images/` and `data/`
    pub root: PathBuf,
    /// Ceiling for the aggregate size of all entries, in bytes
    pub max_size: u64,
    pub image_max_age: Duration,
    /// Default data TTL; entries may carry their own
    pub data_max_age: Duration,
    pub fetch_timeout: Duration,
    /// Number of images fetched concurrently by `preload_images`
    pub preload_batch_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./cache"),
            max_size: 500 * 1024 * 1024, // 500MB
            image_max_age: 7 * DAY,
            data_max_age: 30 * DAY,
            fetch_timeout: Duration::from_secs(15),
            preload_batch_size: 5,
        }
    }
}

impl CacheConfig {
    /// Parse configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let root = env::var("CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.root);

        let max_size = env_u64("CACHE_MAX_SIZE").unwrap_or(defaults.max_size);

        let image_max_age = env_u64("CACHE_IMAGE_TTL_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.image_max_age);

        let data_max_age = env_u64("CACHE_DATA_TTL_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.data_max_age);

        let fetch_timeout = env_u64("CACHE_FETCH_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.fetch_timeout);

        let preload_batch_size = env::var("CACHE_PRELOAD_BATCH")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.preload_batch_size);

        Self {
            root,
            max_size,
            image_max_age,
            data_max_age,
            fetch_timeout,
            preload_batch_size,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.preload_batch_size == 0 {
            return Err(CacheError::Config(
                "preload batch size must be > 0".to_string(),
            ));
        }
        if self.fetch_timeout.is_zero() {
            return Err(CacheError::Config("fetch timeout must be > 0".to_string()));
        }
        Ok(())
    }

    /// Set the size ceiling in megabytes, rejecting values that overflow bytes
    pub fn set_max_size_mb(&mut self, mb: u64) -> Result<()> {
        self.max_size = mb.checked_mul(1024 * 1024).ok_or_else(|| {
            CacheError::Config(format!("max size of {} MB is too large", mb))
        })?;
        Ok(())
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join("index.json")
    }

    pub fn images_dir(&self) -> PathBuf {
        self.root.join("images")
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    /// Size eviction target in bytes
    pub fn low_water_mark(&self) -> u64 {
        (self.max_size as f64 * LOW_WATER_RATIO) as u64
    }
}

fn env_u64(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|s| s.parse::<u64>().ok())
}
