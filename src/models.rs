use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Unique key for a card printing: name + set code + collector number.
///
/// All three parts are stored in canonical form, so two identities built
/// from differently spelled rows compare equal when they denote the same
/// printing. The derived ordering is the deterministic tie-break used by
/// sorting operations.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CardIdentity {
    pub name: String,
    pub set_code: String,
    pub collector_number: String,
}

impl CardIdentity {
    pub fn new(name: &str, set_code: &str, collector_number: &str) -> Self {
        Self {
            name: normalize_name(name),
            set_code: canonical_set_code(set_code),
            collector_number: canonical_collector_number(collector_number),
        }
    }

    /// Whether all three parts are non-empty after normalization
    pub fn is_resolvable(&self) -> bool {
        !self.name.is_empty() && !self.set_code.is_empty() && !self.collector_number.is_empty()
    }
}

impl fmt::Display for CardIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} #{})", self.name, self.set_code, self.collector_number)
    }
}

/// Lowercase, trim and collapse internal whitespace
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Set codes are compared upper-case without surrounding whitespace
pub fn canonical_set_code(set_code: &str) -> String {
    set_code.trim().to_uppercase()
}

/// Collector numbers drop leading zeros of their numeric part ("007a" -> "7a")
pub fn canonical_collector_number(number: &str) -> String {
    let number = number.trim().to_lowercase();
    let digits = number.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return number;
    }
    let (numeric, rest) = number.split_at(digits);
    let stripped = numeric.trim_start_matches('0');
    let numeric = if stripped.is_empty() { "0" } else { stripped };
    format!("{numeric}{rest}")
}

/// Supported currencies for valuation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Eur,
}

impl Currency {
    /// Returns the ISO 4217 code (e.g., "USD")
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
        }
    }

    /// Parse an ISO code or a currency symbol
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "USD" | "$" => Some(Currency::Usd),
            "EUR" | "€" => Some(Currency::Eur),
            _ => None,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// An amount in a specific currency
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Money {
    pub amount: f64,
    pub currency: Currency,
}

impl Money {
    pub fn new(amount: f64, currency: Currency) -> Self {
        Self { amount, currency }
    }

    /// The amount, if it is expressed in `currency`
    pub fn amount_in(&self, currency: Currency) -> Option<f64> {
        (self.currency == currency).then_some(self.amount)
    }
}

/// Card condition tags, accepting both ManaBox and Cardmarket spellings
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Mint,
    NearMint,
    Excellent,
    Good,
    LightlyPlayed,
    ModeratelyPlayed,
    HeavilyPlayed,
    Damaged,
}

impl Condition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::Mint => "mint",
            Condition::NearMint => "near_mint",
            Condition::Excellent => "excellent",
            Condition::Good => "good",
            Condition::LightlyPlayed => "lightly_played",
            Condition::ModeratelyPlayed => "moderately_played",
            Condition::HeavilyPlayed => "heavily_played",
            Condition::Damaged => "damaged",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let key = s.trim().to_lowercase().replace([' ', '-'], "_");
        match key.as_str() {
            "mint" | "mt" => Some(Condition::Mint),
            "near_mint" | "nm" => Some(Condition::NearMint),
            "excellent" | "ex" => Some(Condition::Excellent),
            "good" | "gd" => Some(Condition::Good),
            "light_played" | "lightly_played" | "lp" => Some(Condition::LightlyPlayed),
            "moderately_played" | "played" | "mp" | "pl" => Some(Condition::ModeratelyPlayed),
            "heavily_played" | "hp" | "poor" | "po" => Some(Condition::HeavilyPlayed),
            "damaged" | "dmg" => Some(Condition::Damaged),
            _ => None,
        }
    }
}

/// Card finish tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Finish {
    Nonfoil,
    Foil,
    Etched,
}

impl Finish {
    pub fn as_str(&self) -> &'static str {
        match self {
            Finish::Nonfoil => "nonfoil",
            Finish::Foil => "foil",
            Finish::Etched => "etched",
        }
    }

    /// Parse the ManaBox "Foil" column ("normal", "foil", "etched") and common variants
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "normal" | "nonfoil" | "non-foil" | "false" | "0" => Some(Finish::Nonfoil),
            "foil" | "true" | "1" => Some(Finish::Foil),
            "etched" => Some(Finish::Etched),
            _ => None,
        }
    }

    pub fn is_foil(&self) -> bool {
        !matches!(self, Finish::Nonfoil)
    }
}

/// One normalized row of the owned collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardEntry {
    pub identity: CardIdentity,
    /// Display name as first seen in the import
    pub name: String,
    pub set_name: String,
    pub quantity: u32,
    pub conditions: BTreeSet<Condition>,
    pub finishes: BTreeSet<Finish>,
    pub rarity: Option<String>,
    pub language: Option<String>,
    pub binder: Option<String>,
    pub scryfall_id: Option<String>,
    /// Acquisition price per copy
    pub purchase_price: Option<Money>,
    /// Current market value per copy, `None` until enriched
    pub market_value: Option<Money>,
}

impl CardEntry {
    pub fn is_foil(&self) -> bool {
        self.finishes.iter().any(Finish::is_foil)
    }
}

/// Legality status of a card in one format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Legality {
    Legal,
    NotLegal,
    Restricted,
    Banned,
}

impl Legality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Legality::Legal => "legal",
            Legality::NotLegal => "not_legal",
            Legality::Restricted => "restricted",
            Legality::Banned => "banned",
        }
    }
}

/// Formats with a legality entry on Scryfall
pub const KNOWN_FORMATS: &[&str] = &[
    "standard",
    "future",
    "historic",
    "timeless",
    "gladiator",
    "pioneer",
    "explorer",
    "modern",
    "legacy",
    "pauper",
    "vintage",
    "penny",
    "commander",
    "oathbreaker",
    "standardbrawl",
    "brawl",
    "alchemy",
    "paupercommander",
    "duel",
    "oldschool",
    "premodern",
    "predh",
];

/// Market price snapshot taken when the metadata was fetched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub usd: Option<f64>,
    pub usd_foil: Option<f64>,
    pub eur: Option<f64>,
    pub eur_foil: Option<f64>,
    pub taken_at: DateTime<Utc>,
}

impl PriceSnapshot {
    /// Price for a currency and finish; foil copies fall back to the regular price
    pub fn price(&self, currency: Currency, foil: bool) -> Option<f64> {
        let (regular, foil_price) = match currency {
            Currency::Usd => (self.usd, self.usd_foil),
            Currency::Eur => (self.eur, self.eur_foil),
        };
        if foil {
            foil_price.or(regular)
        } else {
            regular
        }
    }
}

/// Reference attributes for a card identity, owned by the knowledge base
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardMetadata {
    pub name: String,
    pub type_line: String,
    pub color_identity: Vec<String>,
    pub oracle_text: Option<String>,
    pub mana_value: Option<f64>,
    pub rarity: Option<String>,
    /// Format name -> legality, keyed by lowercase format name
    pub legalities: BTreeMap<String, Legality>,
    pub prices: PriceSnapshot,
}

impl CardMetadata {
    pub fn legality(&self, format: &str) -> Legality {
        self.legalities
            .get(format)
            .copied()
            .unwrap_or(Legality::NotLegal)
    }
}

/// One line of a deck template.
///
/// A card given by name only is satisfied by any owned printing of that
/// name; one with set code and collector number only by that printing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeckCard {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collector_number: Option<String>,
    pub quantity: u32,
}

impl DeckCard {
    pub fn named(name: &str, quantity: u32) -> Self {
        Self {
            name: name.to_string(),
            set_code: None,
            collector_number: None,
            quantity,
        }
    }

    /// The exact printing this line asks for, if it names one
    pub fn identity(&self) -> Option<CardIdentity> {
        match (&self.set_code, &self.collector_number) {
            (Some(set), Some(number)) => Some(CardIdentity::new(&self.name, set, number)),
            _ => None,
        }
    }
}

/// A named deck template used for ownership-overlap scoring
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeckArchetype {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    pub cards: Vec<DeckCard>,
}

impl DeckArchetype {
    pub fn total_required(&self) -> u64 {
        self.cards.iter().map(|c| u64::from(c.quantity)).sum()
    }
}
