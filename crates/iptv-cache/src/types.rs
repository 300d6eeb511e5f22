//! Core types for the IPTV cache

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::key::DEFAULT_IMAGE_MIME;

/// Root structure persisted as `index.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheIndex {
    #[serde(default)]
    pub images: HashMap<String, ImageEntry>,
    #[serde(default)]
    pub data: HashMap<String, DataEntry>,
    /// Sum of `size` over both partitions
    #[serde(default, rename = "totalSize")]
    pub total_size: u64,
    #[serde(
        default,
        rename = "lastCleanup",
        with = "chrono::serde::ts_milliseconds"
    )]
    pub last_cleanup: DateTime<Utc>,
}

/// Metadata for a cached image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageEntry {
    pub filename: String,
    #[serde(default, rename = "url")]
    pub source_url: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default = "default_mime")]
    pub mime_type: String,
    #[serde(default, with = "chrono::serde::ts_milliseconds")]
    pub cached_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds")]
    pub last_access: DateTime<Utc>,
    #[serde(default)]
    pub access_count: u64,
}

/// Metadata for a cached JSON payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataEntry {
    pub filename: String,
    /// Logical key the caller used, kept for diagnostics
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub size: u64,
    /// Per-entry TTL override in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<u64>,
    #[serde(default, with = "chrono::serde::ts_milliseconds")]
    pub cached_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds")]
    pub last_access: DateTime<Utc>,
    #[serde(default)]
    pub access_count: u64,
}

fn default_mime() -> String {
    DEFAULT_IMAGE_MIME.to_string()
}

/// Cached payload together with its freshness
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedData<T> {
    pub data: T,
    pub expired: bool,
}

/// Outcome of a bulk image preload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PreloadResult {
    pub success: usize,
    pub failed: usize,
}

/// Read-only snapshot of cache usage
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub image_count: usize,
    pub data_count: usize,
    #[serde(rename = "totalSizeMB")]
    pub total_size_mb: f64,
    #[serde(rename = "maxSizeMB")]
    pub max_size_mb: f64,
    pub usage_percent: f64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_cleanup: DateTime<Utc>,
}

/// Which partition(s) an explicit clear wipes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClearScope {
    Images,
    Data,
    All,
}

impl ClearScope {
    pub fn includes_images(self) -> bool {
        matches!(self, ClearScope::Images | ClearScope::All)
    }

    pub fn includes_data(self) -> bool {
        matches!(self, ClearScope::Data | ClearScope::All)
    }
}

impl fmt::Display for ClearScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClearScope::Images => write!(f, "images"),
            ClearScope::Data => write!(f, "data"),
            ClearScope::All => write!(f, "all"),
        }
    }
}

impl FromStr for ClearScope {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "images" => Ok(ClearScope::Images),
            "data" => Ok(ClearScope::Data),
            "all" => Ok(ClearScope::All),
            other => Err(format!(
                "unknown clear scope '{}', expected images, data or all",
                other
            )),
        }
    }
}
