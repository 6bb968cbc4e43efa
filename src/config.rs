//! Engine configuration

use crate::error::Result;
use crate::models::Currency;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings shared by the knowledge base, engine and formatter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Currency for market values and monetary output
    pub currency: Currency,
    /// How long fetched card metadata counts as current
    pub metadata_ttl_secs: u64,
    /// Total time one query may wait on the enrichment service
    pub enrichment_timeout_ms: u64,
    /// Pause before the single retry of a failed fetch
    pub retry_backoff_ms: u64,
    /// Fetches allowed in flight at once (Scryfall asks for at most 10 requests/sec)
    pub max_concurrent_fetches: usize,
    /// Upper bound on cached metadata entries; oldest fetches are evicted first
    pub max_cache_entries: usize,
    /// Where the metadata cache is persisted between runs
    pub cache_path: Option<PathBuf>,
    /// Number of cards listed in collection summaries
    pub summary_top_n: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            currency: Currency::Usd,
            metadata_ttl_secs: 24 * 3600,
            enrichment_timeout_ms: 30_000,
            retry_backoff_ms: 500,
            max_concurrent_fetches: 5,
            max_cache_entries: 50_000,
            cache_path: None,
            summary_top_n: 10,
        }
    }
}

impl EngineConfig {
    /// Read a JSON config file; missing keys keep their defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn metadata_ttl(&self) -> chrono::Duration {
        // chrono caps durations at i64::MAX milliseconds
        let secs = i64::try_from(self.metadata_ttl_secs).unwrap_or(i64::MAX);
        chrono::Duration::seconds(secs.min(i64::MAX / 1000))
    }

    pub fn enrichment_timeout(&self) -> Duration {
        Duration::from_millis(self.enrichment_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Configured cache path, or ~/.cache/collection_query/metadata_cache.json
    pub fn resolved_cache_path(&self) -> PathBuf {
        self.cache_path.clone().unwrap_or_else(default_cache_path)
    }
}

/// Returns the default metadata cache path
pub fn default_cache_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("collection_query")
        .join("metadata_cache.json")
}
