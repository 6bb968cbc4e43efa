//! Card knowledge base: cached reference metadata keyed by card identity.
//!
//! Metadata comes from an injected [`CardFetcher`]. Entries count as current
//! for the configured time-to-live; afterwards they are refetched, and if the
//! fetch fails the old entry is still served as [`Lookup::Stale`].

mod scryfall;

pub use scryfall::{ScryfallCard, ScryfallFetcher, SCRYFALL_API_URL};

use crate::config::EngineConfig;
use crate::error::{FetchError, QueryError, Result};
use crate::models::{CardEntry, CardIdentity, CardMetadata};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// External source of card metadata (pricing / card database service)
#[async_trait]
pub trait CardFetcher: Send + Sync {
    async fn fetch(&self, identity: &CardIdentity) -> std::result::Result<CardMetadata, FetchError>;

    /// Fetch a card whose Scryfall id is known. Services without id lookup
    /// fall back to the identity.
    async fn fetch_with_id(
        &self,
        identity: &CardIdentity,
        scryfall_id: &str,
    ) -> std::result::Result<CardMetadata, FetchError> {
        let _ = scryfall_id;
        self.fetch(identity).await
    }
}

/// Outcome of a metadata lookup
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// Fetched within the time-to-live
    Fresh(Arc<CardMetadata>),
    /// Expired entry served because refreshing it failed
    Stale(Arc<CardMetadata>),
    Missing,
}

impl Lookup {
    pub fn metadata(&self) -> Option<&CardMetadata> {
        match self {
            Lookup::Fresh(meta) | Lookup::Stale(meta) => Some(meta),
            Lookup::Missing => None,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Lookup::Stale(_))
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Lookup::Missing)
    }
}

#[derive(Debug, Clone)]
struct CachedMetadata {
    metadata: Arc<CardMetadata>,
    fetched_at: DateTime<Utc>,
}

/// On-disk form of one cache entry
#[derive(Serialize, Deserialize)]
struct PersistedEntry {
    identity: CardIdentity,
    metadata: CardMetadata,
    fetched_at: DateTime<Utc>,
}

/// TTL cache in front of a [`CardFetcher`]
pub struct KnowledgeBase {
    fetcher: Arc<dyn CardFetcher>,
    cache: RwLock<HashMap<CardIdentity, CachedMetadata>>,
    ttl: chrono::Duration,
    timeout: Duration,
    retry_backoff: Duration,
    max_entries: usize,
    /// Limits fetches in flight across all batches
    fetch_permits: Arc<Semaphore>,
}

impl KnowledgeBase {
    pub fn new(fetcher: Arc<dyn CardFetcher>, config: &EngineConfig) -> Self {
        Self {
            fetcher,
            cache: RwLock::new(HashMap::new()),
            ttl: config.metadata_ttl(),
            timeout: config.enrichment_timeout(),
            retry_backoff: config.retry_backoff(),
            max_entries: config.max_cache_entries.max(1),
            fetch_permits: Arc::new(Semaphore::new(config.max_concurrent_fetches.max(1))),
        }
    }

    /// Look up one card, fetching it when the cache has no current entry.
    ///
    /// Never fails: service errors degrade to the cached entry or `Missing`.
    pub async fn lookup(&self, identity: &CardIdentity) -> Lookup {
        match self.batch_lookup(std::iter::once(identity)).await {
            Ok(mut found) => found.remove(identity).unwrap_or(Lookup::Missing),
            Err(e) => {
                log::warn!("Lookup of {} degraded to cache: {}", identity, e);
                self.cached(identity)
            }
        }
    }

    /// Look up many cards with at most one external fetch per distinct identity.
    ///
    /// Fetches run concurrently. If they do not all finish within the
    /// configured timeout the whole batch fails with `EnrichmentUnavailable`
    /// and nothing they returned is cached.
    pub async fn batch_lookup<'a, I>(&self, identities: I) -> Result<BTreeMap<CardIdentity, Lookup>>
    where
        I: IntoIterator<Item = &'a CardIdentity>,
    {
        self.lookup_batch(identities.into_iter().map(|identity| (identity, None)))
            .await
    }

    /// Like [`batch_lookup`](Self::batch_lookup), fetching by the entries'
    /// Scryfall ids where the import recorded one
    pub async fn lookup_entries<'a, I>(&self, entries: I) -> Result<BTreeMap<CardIdentity, Lookup>>
    where
        I: IntoIterator<Item = &'a CardEntry>,
    {
        self.lookup_batch(
            entries
                .into_iter()
                .map(|entry| (&entry.identity, entry.scryfall_id.as_deref())),
        )
        .await
    }

    async fn lookup_batch<'a, I>(&self, cards: I) -> Result<BTreeMap<CardIdentity, Lookup>>
    where
        I: IntoIterator<Item = (&'a CardIdentity, Option<&'a str>)>,
    {
        let mut distinct: BTreeMap<&CardIdentity, Option<&str>> = BTreeMap::new();
        for (identity, scryfall_id) in cards {
            let known = distinct.entry(identity).or_insert(None);
            if known.is_none() {
                *known = scryfall_id;
            }
        }
        let now = Utc::now();
        let mut found = BTreeMap::new();
        let mut to_fetch: Vec<(CardIdentity, Option<String>)> = Vec::new();

        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            for (identity, scryfall_id) in distinct {
                match cache.get(identity) {
                    Some(cached) if now - cached.fetched_at < self.ttl => {
                        found.insert(identity.clone(), Lookup::Fresh(Arc::clone(&cached.metadata)));
                    }
                    _ => to_fetch.push((identity.clone(), scryfall_id.map(str::to_string))),
                }
            }
        }

        if to_fetch.is_empty() {
            return Ok(found);
        }

        log::debug!(
            "Fetching metadata for {} cards ({} served from cache)",
            to_fetch.len(),
            found.len()
        );

        let mut tasks = JoinSet::new();
        for (identity, scryfall_id) in &to_fetch {
            let fetcher = Arc::clone(&self.fetcher);
            let identity = identity.clone();
            let scryfall_id = scryfall_id.clone();
            let backoff = self.retry_backoff;
            let permits = Arc::clone(&self.fetch_permits);
            tasks.spawn(async move {
                // the semaphore is never closed
                let _permit = permits.acquire_owned().await.ok();
                let result =
                    fetch_with_retry(fetcher.as_ref(), &identity, scryfall_id.as_deref(), backoff).await;
                (identity, result)
            });
        }

        let collected = tokio::time::timeout(self.timeout, async {
            let mut results = HashMap::new();
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((identity, result)) => {
                        results.insert(identity, result);
                    }
                    Err(e) => log::error!("Metadata fetch task failed: {}", e),
                }
            }
            results
        })
        .await;

        let mut results = match collected {
            Ok(results) => results,
            Err(_) => {
                log::warn!(
                    "Metadata fetch for {} cards exceeded {:?}, discarding results",
                    to_fetch.len(),
                    self.timeout
                );
                return Err(QueryError::EnrichmentUnavailable(format!(
                    "{} card lookups did not finish within {} ms",
                    to_fetch.len(),
                    self.timeout.as_millis()
                )));
            }
        };

        let fetched_at = Utc::now();
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        for (identity, _) in to_fetch {
            let lookup = match results.remove(&identity) {
                Some(Ok(metadata)) => {
                    let metadata = Arc::new(metadata);
                    cache.insert(
                        identity.clone(),
                        CachedMetadata {
                            metadata: Arc::clone(&metadata),
                            fetched_at,
                        },
                    );
                    Lookup::Fresh(metadata)
                }
                Some(Err(e)) => {
                    log::warn!("Failed to fetch metadata for {}: {}", identity, e);
                    stale_or_missing(cache.get(&identity))
                }
                None => stale_or_missing(cache.get(&identity)),
            };
            found.insert(identity, lookup);
        }
        evict_oldest(&mut cache, self.max_entries);

        Ok(found)
    }

    /// Cached entry without contacting the fetcher
    pub fn cached(&self, identity: &CardIdentity) -> Lookup {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        match cache.get(identity) {
            Some(cached) if Utc::now() - cached.fetched_at < self.ttl => {
                Lookup::Fresh(Arc::clone(&cached.metadata))
            }
            other => stale_or_missing(other),
        }
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.cache.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Put metadata into the cache as if it had just been fetched
    pub fn insert(&self, identity: CardIdentity, metadata: CardMetadata, fetched_at: DateTime<Utc>) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        cache.insert(
            identity,
            CachedMetadata {
                metadata: Arc::new(metadata),
                fetched_at,
            },
        );
        evict_oldest(&mut cache, self.max_entries);
    }

    /// Load a persisted cache, keeping original fetch times.
    ///
    /// A missing or unreadable file leaves the cache empty.
    pub fn load_cache<P: AsRef<Path>>(&self, path: P) -> usize {
        let path = path.as_ref();
        if !path.exists() {
            log::info!("Starting with empty metadata cache");
            return 0;
        }
        let entries: Vec<PersistedEntry> = match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(entries) => entries,
                Err(e) => {
                    log::warn!("Failed to parse metadata cache, starting fresh: {}", e);
                    return 0;
                }
            },
            Err(e) => {
                log::warn!("Failed to read metadata cache, starting fresh: {}", e);
                return 0;
            }
        };

        let count = entries.len();
        for entry in entries {
            self.insert(entry.identity, entry.metadata, entry.fetched_at);
        }
        log::info!("Loaded metadata cache with {} entries", count);
        count
    }

    /// Persist the cache as JSON
    pub fn save_cache<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut entries: Vec<PersistedEntry> = {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            cache
                .iter()
                .map(|(identity, cached)| PersistedEntry {
                    identity: identity.clone(),
                    metadata: cached.metadata.as_ref().clone(),
                    fetched_at: cached.fetched_at,
                })
                .collect()
        };
        entries.sort_by(|a, b| a.identity.cmp(&b.identity));

        std::fs::write(path, serde_json::to_string_pretty(&entries)?)?;
        log::debug!("Saved metadata cache with {} entries", entries.len());
        Ok(())
    }
}

async fn fetch_with_retry(
    fetcher: &dyn CardFetcher,
    identity: &CardIdentity,
    scryfall_id: Option<&str>,
    backoff: Duration,
) -> std::result::Result<CardMetadata, FetchError> {
    match fetch_once(fetcher, identity, scryfall_id).await {
        Err(e) if e.is_retryable() => {
            log::debug!("Retrying fetch for {} after error: {}", identity, e);
            tokio::time::sleep(backoff).await;
            fetch_once(fetcher, identity, scryfall_id).await
        }
        other => other,
    }
}

async fn fetch_once(
    fetcher: &dyn CardFetcher,
    identity: &CardIdentity,
    scryfall_id: Option<&str>,
) -> std::result::Result<CardMetadata, FetchError> {
    match scryfall_id {
        Some(id) => fetcher.fetch_with_id(identity, id).await,
        None => fetcher.fetch(identity).await,
    }
}

fn stale_or_missing(cached: Option<&CachedMetadata>) -> Lookup {
    match cached {
        Some(cached) => Lookup::Stale(Arc::clone(&cached.metadata)),
        None => Lookup::Missing,
    }
}

fn evict_oldest(cache: &mut HashMap<CardIdentity, CachedMetadata>, max_entries: usize) {
    if cache.len() <= max_entries {
        return;
    }
    let mut by_age: Vec<(DateTime<Utc>, CardIdentity)> = cache
        .iter()
        .map(|(identity, cached)| (cached.fetched_at, identity.clone()))
        .collect();
    by_age.sort();
    let excess = cache.len() - max_entries;
    for (_, identity) in by_age.into_iter().take(excess) {
        cache.remove(&identity);
    }
    log::debug!("Evicted {} metadata cache entries", excess);
}

#[cfg(test)]
#[path = "knowledge_tests.rs"]
mod tests;
