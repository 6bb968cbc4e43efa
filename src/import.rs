//! ManaBox collection CSV import.
//!
//! Parsing only: rows come out as raw strings with their line number, and
//! identity resolution, validation and duplicate merging happen in
//! [`crate::store::CollectionStore::load`].

use crate::error::Result;
use serde::Deserialize;
use std::io;
use std::path::Path;

/// One unvalidated collection row as exported by ManaBox
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCardRow {
    /// 1-based line in the source file (header is line 1)
    #[serde(skip)]
    pub line: usize,
    #[serde(rename = "Name", alias = "name", default)]
    pub name: String,
    #[serde(rename = "Set code", alias = "setCode", alias = "set_code", default)]
    pub set_code: String,
    #[serde(rename = "Set name", alias = "set", default)]
    pub set_name: String,
    #[serde(rename = "Collector number", alias = "cn", default)]
    pub collector_number: String,
    #[serde(rename = "Quantity", alias = "quantity", default)]
    pub quantity: String,
    #[serde(rename = "Foil", alias = "isFoil", default)]
    pub foil: String,
    #[serde(rename = "Rarity", alias = "rarity", default)]
    pub rarity: String,
    #[serde(rename = "Condition", alias = "condition", default)]
    pub condition: String,
    #[serde(rename = "Language", alias = "language", default)]
    pub language: String,
    #[serde(rename = "Binder Name", default)]
    pub binder_name: String,
    #[serde(rename = "Scryfall ID", default)]
    pub scryfall_id: String,
    #[serde(rename = "Purchase price", alias = "price", default)]
    pub purchase_price: String,
    #[serde(rename = "Purchase price currency", default)]
    pub purchase_currency: String,
    #[serde(rename = "Market value", alias = "Market price", default)]
    pub market_value: String,
    #[serde(rename = "Market value currency", default)]
    pub market_currency: String,
}

impl RawCardRow {
    /// Minimal row for building collections in code
    pub fn new(name: &str, set_code: &str, collector_number: &str, quantity: &str) -> Self {
        Self {
            name: name.to_string(),
            set_code: set_code.to_string(),
            collector_number: collector_number.to_string(),
            quantity: quantity.to_string(),
            ..Self::default()
        }
    }
}

/// Read a ManaBox collection export from disk
pub fn read_collection_csv<P: AsRef<Path>>(path: P) -> Result<Vec<RawCardRow>> {
    let path = path.as_ref();
    log::info!("Reading collection from {}", path.display());
    let file = std::fs::File::open(path)?;
    read_collection(file)
}

/// Read a ManaBox collection export from any reader
pub fn read_collection<R: io::Read>(reader: R) -> Result<Vec<RawCardRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let mut rows = Vec::new();

    for result in rdr.records() {
        let record = result?;
        if record.iter().all(|field| field.is_empty()) {
            continue;
        }
        let line = record
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(rows.len() + 2);
        let mut row: RawCardRow = record.deserialize(Some(&headers))?;
        row.line = line;
        rows.push(row);
    }

    log::debug!("Read {} collection rows", rows.len());
    Ok(rows)
}

/// Parses a monetary or numeric amount.
///
/// Accepts comma or dot decimal separators and ignores surrounding currency
/// symbols and codes ("$10", "5,00 €", "12.50 USD").
pub fn parse_amount(s: &str) -> Option<f64> {
    let cleaned: String = s
        .trim()
        .trim_start_matches(['$', '€'])
        .trim_end_matches(['$', '€'])
        .trim()
        .trim_end_matches("USD")
        .trim_end_matches("EUR")
        .trim()
        .replace(',', ".");
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}
