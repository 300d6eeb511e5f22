//! Command-line front end for the IPTV cache
//!
//! Each subcommand is one request/response call against the cache and prints
//! a single JSON document on stdout. Logs go to stderr.

use clap::{Parser, Subcommand};
use iptv_cache::{CacheConfig, CacheManager, ClearScope, HttpFetcher, Result};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "iptv-cache", version, about = "Inspect and populate the IPTV cache")]
struct Cli {
    /// Cache root (overrides CACHE_DIR)
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Size ceiling in megabytes (overrides CACHE_MAX_SIZE)
    #[arg(long)]
    max_size_mb: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show cache usage
    Stats,
    /// Run an eviction pass now
    Cleanup,
    /// Wipe images, data or all
    Clear { scope: ClearScope },
    /// Fetch an image through the cache and print it as a data URI
    Image { url: String },
    /// Warm the image cache
    Preload {
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Print cached JSON for a key
    Get { key: String },
    /// Cache a JSON document under a key
    Set {
        key: String,
        json: String,
        #[arg(long)]
        max_age_secs: Option<u64>,
    },
    /// Serve JSON from the cache, refreshing it from a URL when stale
    FetchJson {
        key: String,
        url: String,
        #[arg(long)]
        max_age_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::from_default_env().add_directive("iptv_cache=info".parse()?);

    // Use JSON format for Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    };

    let cli = Cli::parse();

    let mut config = CacheConfig::from_env();
    if let Some(dir) = cli.cache_dir {
        config.root = dir;
    }
    if let Some(mb) = cli.max_size_mb {
        config.set_max_size_mb(mb)?;
    }
    info!(
        root = ?config.root,
        max_size_mb = config.max_size / (1024 * 1024),
        image_ttl_secs = config.image_max_age.as_secs(),
        data_ttl_secs = config.data_max_age.as_secs(),
        "Opening cache"
    );

    let fetcher = Arc::new(HttpFetcher::with_timeout(config.fetch_timeout)?);
    let cache = CacheManager::open(config, fetcher).await?;

    let output = run(&cache, cli.command).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    cache.flush().await?;
    Ok(())
}

async fn run(cache: &CacheManager, command: Command) -> Result<Value> {
    let output = match command {
        Command::Stats => serde_json::to_value(cache.stats().await)?,
        Command::Cleanup => {
            let report = cache.run_cleanup().await;
            json!({
                "expiredImages": report.expired_images,
                "expiredData": report.expired_data,
                "evicted": report.evicted,
                "freedBytes": report.freed_bytes,
            })
        }
        Command::Clear { scope } => {
            cache.clear(scope).await?;
            serde_json::to_value(cache.stats().await)?
        }
        Command::Image { url } => json!({ "dataUri": cache.get_image(&url).await }),
        Command::Preload { urls } => serde_json::to_value(cache.preload_images(&urls).await)?,
        Command::Get { key } => match cache.get_data::<Value>(&key).await {
            Some(cached) => serde_json::to_value(cached)?,
            None => Value::Null,
        },
        Command::Set {
            key,
            json,
            max_age_secs,
        } => {
            let value: Value = serde_json::from_str(&json)?;
            let ok = cache
                .set_data(&key, &value, max_age_secs.map(Duration::from_secs))
                .await;
            json!({ "success": ok })
        }
        Command::FetchJson {
            key,
            url,
            max_age_secs,
        } => cache
            .get_or_fetch_json(&key, &url, max_age_secs.map(Duration::from_secs))
            .await
            .unwrap_or(Value::Null),
    };
    Ok(output)
}
