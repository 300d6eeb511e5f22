//! On-disk cache for an IPTV client
//!
//! Stores downloaded channel artwork and Xtream/M3U API responses under a
//! single cache root, bounded by per-partition TTLs and an aggregate size
//! ceiling.
//!
//! # Example
//!
//! ```no_run
//! use iptv_cache::{CacheConfig, CacheManager, HttpFetcher};
//! use std::sync::Arc;
//!
//! # async fn example() -> iptv_cache::Result<()> {
//! let config = CacheConfig::from_env();
//! let fetcher = Arc::new(HttpFetcher::with_timeout(config.fetch_timeout)?);
//! let cache = CacheManager::open(config, fetcher).await?;
//!
//! if let Some(uri) = cache.get_image("http://example.com/logo.png").await {
//!     println!("{} chars", uri.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod eviction;
pub mod fetcher;
pub mod index;
pub mod key;
pub mod store;
pub mod types;

pub use cache::{spawn_scheduled_cleanup, CacheManager};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use eviction::CleanupReport;
pub use fetcher::{FetchedBytes, Fetcher, HttpFetcher};
pub use key::{data_key, hash_key};
pub use types::{
    CacheIndex, CacheStats, CachedData, ClearScope, DataEntry, ImageEntry, PreloadResult,
};
