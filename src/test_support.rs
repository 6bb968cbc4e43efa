//! Shared fixtures for unit tests

use crate::config::EngineConfig;
use crate::error::FetchError;
use crate::import::RawCardRow;
use crate::knowledge::CardFetcher;
use crate::models::{CardIdentity, CardMetadata, Legality, PriceSnapshot};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Metadata with a type line, a USD price and commander legality
pub fn metadata(name: &str, type_line: &str, usd: Option<f64>) -> CardMetadata {
    let mut legalities = BTreeMap::new();
    legalities.insert("commander".to_string(), Legality::Legal);
    legalities.insert("modern".to_string(), Legality::NotLegal);
    CardMetadata {
        name: name.to_string(),
        type_line: type_line.to_string(),
        color_identity: vec![],
        oracle_text: None,
        mana_value: Some(1.0),
        rarity: Some("rare".to_string()),
        legalities,
        prices: PriceSnapshot {
            usd,
            usd_foil: usd.map(|p| p * 2.0),
            eur: None,
            eur_foil: None,
            taken_at: Utc::now(),
        },
    }
}

/// A collection row with a market value column
pub fn row(name: &str, set: &str, cn: &str, quantity: u32, value: Option<f64>) -> RawCardRow {
    let mut row = RawCardRow::new(name, set, cn, &quantity.to_string());
    if let Some(value) = value {
        row.market_value = format!("{value:.2}");
        row.market_currency = "USD".to_string();
    }
    row
}

/// Config with short timings for tests
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        enrichment_timeout_ms: 2_000,
        retry_backoff_ms: 1,
        ..EngineConfig::default()
    }
}

/// In-memory fetcher that records every call
#[derive(Default)]
pub struct StaticFetcher {
    cards: HashMap<CardIdentity, CardMetadata>,
    calls: Mutex<Vec<CardIdentity>>,
    ids: Mutex<Vec<String>>,
    failing: AtomicBool,
    fail_times: AtomicUsize,
    delay: Option<Duration>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_card(mut self, identity: CardIdentity, metadata: CardMetadata) -> Self {
        self.cards.insert(identity, metadata);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the next `times` calls with a retryable error
    pub fn failing_times(self, times: usize) -> Self {
        self.fail_times.store(times, Ordering::SeqCst);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Scryfall ids passed to `fetch_with_id`
    pub fn ids_used(&self) -> Vec<String> {
        self.ids.lock().unwrap().clone()
    }

    pub fn calls_for(&self, identity: &CardIdentity) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|called| *called == identity)
            .count()
    }
}

#[async_trait]
impl CardFetcher for StaticFetcher {
    async fn fetch(&self, identity: &CardIdentity) -> Result<CardMetadata, FetchError> {
        self.calls.lock().unwrap().push(identity.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(FetchError::HttpStatus(reqwest::StatusCode::SERVICE_UNAVAILABLE));
        }
        let remaining = self.fail_times.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_times.store(remaining - 1, Ordering::SeqCst);
            return Err(FetchError::HttpStatus(reqwest::StatusCode::SERVICE_UNAVAILABLE));
        }
        self.cards
            .get(identity)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(identity.to_string()))
    }

    async fn fetch_with_id(&self, identity: &CardIdentity, scryfall_id: &str) -> Result<CardMetadata, FetchError> {
        self.ids.lock().unwrap().push(scryfall_id.to_string());
        self.fetch(identity).await
    }
}
