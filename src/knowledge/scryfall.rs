//! Scryfall API client used as the default metadata fetcher
//!
//! Uses async reqwest for non-blocking HTTP requests.

use super::CardFetcher;
use crate::error::FetchError;
use crate::import::parse_amount;
use crate::models::{CardIdentity, CardMetadata, Legality, PriceSnapshot};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::collections::BTreeMap;

pub const SCRYFALL_API_URL: &str = "https://api.scryfall.com";

/// Scryfall card response (only the fields the knowledge base keeps)
#[derive(Debug, Deserialize)]
pub struct ScryfallCard {
    pub name: String,
    #[serde(default)]
    pub type_line: Option<String>,
    #[serde(default)]
    pub oracle_text: Option<String>,
    #[serde(default)]
    pub color_identity: Vec<String>,
    #[serde(default)]
    pub cmc: Option<f64>,
    #[serde(default)]
    pub rarity: Option<String>,
    #[serde(default)]
    pub legalities: BTreeMap<String, Legality>,
    #[serde(default)]
    pub prices: ScryfallPrices,
    /// For double-faced cards, type line and text are in card_faces
    #[serde(default)]
    pub card_faces: Option<Vec<CardFace>>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ScryfallPrices {
    pub usd: Option<String>,
    pub usd_foil: Option<String>,
    pub eur: Option<String>,
    pub eur_foil: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CardFace {
    pub name: String,
    #[serde(default)]
    pub type_line: Option<String>,
    #[serde(default)]
    pub oracle_text: Option<String>,
}

impl ScryfallCard {
    /// Type line, joining the faces of double-faced cards with " // "
    pub fn full_type_line(&self) -> String {
        if let Some(ref type_line) = self.type_line {
            return type_line.clone();
        }
        self.faces_joined(|face| face.type_line.as_deref())
            .unwrap_or_default()
    }

    /// Oracle text, joining the faces of double-faced cards
    pub fn full_oracle_text(&self) -> Option<String> {
        self.oracle_text
            .clone()
            .or_else(|| self.faces_joined(|face| face.oracle_text.as_deref()))
    }

    fn faces_joined<F>(&self, part: F) -> Option<String>
    where
        F: Fn(&CardFace) -> Option<&str>,
    {
        let faces = self.card_faces.as_ref()?;
        let parts: Vec<&str> = faces.iter().filter_map(part).collect();
        (!parts.is_empty()).then(|| parts.join(" // "))
    }

    pub fn into_metadata(self) -> CardMetadata {
        let prices = PriceSnapshot {
            usd: self.prices.usd.as_deref().and_then(parse_amount),
            usd_foil: self.prices.usd_foil.as_deref().and_then(parse_amount),
            eur: self.prices.eur.as_deref().and_then(parse_amount),
            eur_foil: self.prices.eur_foil.as_deref().and_then(parse_amount),
            taken_at: Utc::now(),
        };
        CardMetadata {
            type_line: self.full_type_line(),
            oracle_text: self.full_oracle_text(),
            name: self.name,
            color_identity: self.color_identity,
            mana_value: self.cmc,
            rarity: self.rarity,
            legalities: self.legalities,
            prices,
        }
    }
}

/// Fetches card metadata from Scryfall by set code and collector number
pub struct ScryfallFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl ScryfallFetcher {
    pub fn new() -> Self {
        Self::with_base_url(SCRYFALL_API_URL)
    }

    /// Point the fetcher at another host (used with mock servers)
    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn card_url(&self, identity: &CardIdentity) -> String {
        format!(
            "{}/cards/{}/{}",
            self.base_url,
            identity.set_code.to_lowercase(),
            urlencoding::encode(&identity.collector_number)
        )
    }
}

impl Default for ScryfallFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CardFetcher for ScryfallFetcher {
    async fn fetch(&self, identity: &CardIdentity) -> Result<CardMetadata, FetchError> {
        let url = self.card_url(identity);
        self.get_card(&url, &identity.to_string()).await
    }

    /// Look the card up by its Scryfall id, falling back to set code and
    /// collector number when Scryfall does not know the id
    async fn fetch_with_id(&self, identity: &CardIdentity, scryfall_id: &str) -> Result<CardMetadata, FetchError> {
        let url = format!("{}/cards/{}", self.base_url, urlencoding::encode(scryfall_id));
        match self.get_card(&url, scryfall_id).await {
            Err(FetchError::NotFound(_)) => {
                log::debug!("Scryfall id {} not found, looking up {} instead", scryfall_id, identity);
                self.fetch(identity).await
            }
            other => other,
        }
    }
}

impl ScryfallFetcher {
    async fn get_card(&self, url: &str, card: &str) -> Result<CardMetadata, FetchError> {
        log::debug!("Fetching card from Scryfall: {}", url);

        let response = self
            .client
            .get(url)
            .header("User-Agent", "collection_query/1.0")
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(card.to_string()));
        }
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status));
        }

        let body = response.text().await?;
        let card: ScryfallCard =
            serde_json::from_str(&body).map_err(|e| FetchError::Parse(e.to_string()))?;
        Ok(card.into_metadata())
    }
}

#[cfg(test)]
#[path = "scryfall_tests.rs"]
mod tests;
