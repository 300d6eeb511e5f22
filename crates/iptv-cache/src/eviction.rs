//! Age- and size-based eviction
//!
//! A pass first expires entries older than their TTL, then, if the cache is
//! still above its ceiling, drops entries in insertion order (`cached_at`)
//! until usage falls to the low-water mark. Planning only touches the index;
//! the caller deletes the returned files afterwards.

use crate::config::{CacheConfig, CLEANUP_INTERVAL};
use crate::types::{CacheIndex, DataEntry};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    Images,
    Data,
}

/// A file whose index record has already been removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedFile {
    pub partition: Partition,
    pub filename: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub expired_images: usize,
    pub expired_data: usize,
    /// Entries dropped for size pressure
    pub evicted: usize,
    pub freed_bytes: u64,
    pub removed: Vec<RemovedFile>,
}

fn age_millis(now: DateTime<Utc>, then: DateTime<Utc>) -> i64 {
    (now - then).num_milliseconds()
}

fn exceeds(age_ms: i64, max_age: Duration) -> bool {
    age_ms > 0 && age_ms as u128 > max_age.as_millis()
}

/// TTL of a data entry: its own override, or the configured default
pub fn effective_max_age(entry: &DataEntry, default_max_age: Duration) -> Duration {
    entry
        .max_age
        .map(Duration::from_millis)
        .unwrap_or(default_max_age)
}

pub fn data_expired(entry: &DataEntry, default_max_age: Duration, now: DateTime<Utc>) -> bool {
    exceeds(
        age_millis(now, entry.cached_at),
        effective_max_age(entry, default_max_age),
    )
}

/// Whether the scheduled pass should run now
pub fn cleanup_due(index: &CacheIndex, now: DateTime<Utc>) -> bool {
    let since = age_millis(now, index.last_cleanup);
    since < 0 || since as u128 >= CLEANUP_INTERVAL.as_millis()
}

/// Run one eviction pass against the index and report what to delete
pub fn plan_cleanup(
    index: &mut CacheIndex,
    config: &CacheConfig,
    now: DateTime<Utc>,
) -> CleanupReport {
    let mut report = CleanupReport::default();

    let expired_images: Vec<String> = index
        .images
        .iter()
        .filter(|(_, e)| exceeds(age_millis(now, e.cached_at), config.image_max_age))
        .map(|(hash, _)| hash.clone())
        .collect();

    for hash in expired_images {
        if let Some(entry) = index.remove_image(&hash) {
            debug!(key = %hash, size = entry.size, "Expired cached image");
            report.expired_images += 1;
            report.freed_bytes += entry.size;
            report.removed.push(RemovedFile {
                partition: Partition::Images,
                filename: entry.filename,
            });
        }
    }

    let expired_data: Vec<String> = index
        .data
        .iter()
        .filter(|(_, e)| data_expired(e, config.data_max_age, now))
        .map(|(hash, _)| hash.clone())
        .collect();

    for hash in expired_data {
        if let Some(entry) = index.remove_data(&hash) {
            debug!(key = %hash, size = entry.size, "Expired cached data");
            report.expired_data += 1;
            report.freed_bytes += entry.size;
            report.removed.push(RemovedFile {
                partition: Partition::Data,
                filename: entry.filename,
            });
        }
    }

    if index.total_size > config.max_size {
        evict_oldest(index, config.low_water_mark(), &mut report);
    }

    index.last_cleanup = now;
    report
}

/// Drop entries oldest-inserted first until `total_size <= target`
///
/// Ordering is by `cached_at` only; access recency is not considered.
fn evict_oldest(index: &mut CacheIndex, target: u64, report: &mut CleanupReport) {
    let mut candidates: Vec<(DateTime<Utc>, Partition, String)> = index
        .images
        .iter()
        .map(|(hash, e)| (e.cached_at, Partition::Images, hash.clone()))
        .chain(
            index
                .data
                .iter()
                .map(|(hash, e)| (e.cached_at, Partition::Data, hash.clone())),
        )
        .collect();
    candidates.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.2.cmp(&b.2)));

    for (_, partition, hash) in candidates {
        if index.total_size <= target {
            break;
        }

        let removed = match partition {
            Partition::Images => index.remove_image(&hash).map(|e| (e.size, e.filename)),
            Partition::Data => index.remove_data(&hash).map(|e| (e.size, e.filename)),
        };

        if let Some((size, filename)) = removed {
            debug!(key = %hash, size, "Evicted cache entry for size");
            report.evicted += 1;
            report.freed_bytes += size;
            report.removed.push(RemovedFile {
                partition,
                filename,
            });
        }
    }
}
