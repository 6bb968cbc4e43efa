//! In-memory collection store.
//!
//! The store holds an immutable [`Snapshot`] behind an `Arc`. Loads build a
//! complete new snapshot off to the side and swap it in, so readers always
//! see either the previous or the next collection, never a mix. Readers only
//! hold the read lock long enough to clone the `Arc`.

use crate::error::{QueryError, Result};
use crate::import::{parse_amount, read_collection_csv, RawCardRow};
use crate::knowledge::KnowledgeBase;
use crate::models::{CardEntry, CardIdentity, Condition, Currency, Finish, Money};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// An immutable, indexed view of the collection at one point in time
#[derive(Debug)]
pub struct Snapshot {
    entries: Vec<CardEntry>,
    index: HashMap<CardIdentity, usize>,
    generation: u64,
    loaded_at: DateTime<Utc>,
}

impl Snapshot {
    fn empty() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            generation: 0,
            loaded_at: Utc::now(),
        }
    }

    /// Entries in import order
    pub fn entries(&self) -> &[CardEntry] {
        &self.entries
    }

    pub fn get(&self, identity: &CardIdentity) -> Option<&CardEntry> {
        self.index.get(identity).map(|&i| &self.entries[i])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Increases by one with every load or enrichment
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Overview of the collection: copies, values, rarities, most valuable cards
    pub fn summary(&self, currency: Currency, top_n: usize) -> CollectionSummary {
        let mut market_value = 0.0;
        let mut purchase_value: BTreeMap<Currency, f64> = BTreeMap::new();
        let mut unvalued_entries = 0;
        let mut rarity_breakdown: BTreeMap<String, u64> = BTreeMap::new();

        for entry in &self.entries {
            let quantity = f64::from(entry.quantity);
            match entry.market_value.and_then(|m| m.amount_in(currency)) {
                Some(value) => market_value += value * quantity,
                None => unvalued_entries += 1,
            }
            if let Some(price) = entry.purchase_price {
                *purchase_value.entry(price.currency).or_insert(0.0) += price.amount * quantity;
            }
            let rarity = entry.rarity.clone().unwrap_or_else(|| "unknown".to_string());
            *rarity_breakdown.entry(rarity).or_insert(0) += u64::from(entry.quantity);
        }

        let mut valued: Vec<(&CardEntry, f64)> = self
            .entries
            .iter()
            .filter_map(|e| e.market_value.and_then(|m| m.amount_in(currency)).map(|v| (e, v)))
            .collect();
        valued.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.identity.cmp(&b.0.identity)));

        CollectionSummary {
            total_copies: self.entries.iter().map(|e| u64::from(e.quantity)).sum(),
            unique_entries: self.entries.len(),
            currency,
            market_value,
            unvalued_entries,
            purchase_value,
            rarity_breakdown,
            top_valuable: valued.into_iter().take(top_n).map(|(e, _)| e.clone()).collect(),
        }
    }

    /// Sorted unique display names
    pub fn unique_names(&self) -> Vec<String> {
        let names: BTreeSet<&str> = self.entries.iter().map(|e| e.name.as_str()).collect();
        names.into_iter().map(str::to_string).collect()
    }
}

/// Collection overview
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionSummary {
    pub total_copies: u64,
    pub unique_entries: usize,
    pub currency: Currency,
    /// Sum of quantity x market value over entries with a known value
    pub market_value: f64,
    /// Entries without a market value in `currency`
    pub unvalued_entries: usize,
    pub purchase_value: BTreeMap<Currency, f64>,
    pub rarity_breakdown: BTreeMap<String, u64>,
    pub top_valuable: Vec<CardEntry>,
}

/// Result of a successful load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSummary {
    pub rows_read: usize,
    pub entries: usize,
    pub merged_duplicates: usize,
    pub generation: u64,
}

/// Result of a store enrichment pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichSummary {
    pub valued: usize,
    pub unvalued: usize,
    pub stale: usize,
    /// False when a reload replaced the snapshot while enrichment was running
    pub applied: bool,
}

/// Lazy, restartable, import-ordered view over one snapshot
pub struct CardView<P> {
    snapshot: Arc<Snapshot>,
    predicate: P,
}

impl<P> CardView<P>
where
    P: Fn(&CardEntry) -> bool,
{
    /// Iterate the matching entries; each call starts from the beginning
    pub fn iter(&self) -> impl Iterator<Item = &CardEntry> + '_ {
        self.snapshot
            .entries
            .iter()
            .filter(move |entry| (self.predicate)(*entry))
    }

    pub fn count(&self) -> usize {
        self.iter().count()
    }

    pub fn snapshot(&self) -> &Arc<Snapshot> {
        &self.snapshot
    }
}

/// Holds the current collection snapshot and serializes loads
#[derive(Debug)]
pub struct CollectionStore {
    current: RwLock<Arc<Snapshot>>,
    load_lock: Mutex<()>,
    default_currency: Currency,
}

impl CollectionStore {
    /// Create an empty store; rows without a currency are read as `default_currency`
    pub fn new(default_currency: Currency) -> Self {
        Self {
            current: RwLock::new(Arc::new(Snapshot::empty())),
            load_lock: Mutex::new(()),
            default_currency,
        }
    }

    /// Create a store and load `rows` into it
    pub fn from_rows<I>(rows: I, default_currency: Currency) -> Result<Self>
    where
        I: IntoIterator<Item = RawCardRow>,
    {
        let store = Self::new(default_currency);
        store.load(rows)?;
        Ok(store)
    }

    /// The current snapshot
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the collection with `rows`.
    ///
    /// On error the previous snapshot stays in place.
    pub fn load<I>(&self, rows: I) -> Result<LoadSummary>
    where
        I: IntoIterator<Item = RawCardRow>,
    {
        let _guard = self.load_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let generation = self.snapshot().generation + 1;

        let (snapshot, rows_read) = match build_snapshot(rows, self.default_currency, generation) {
            Ok(built) => built,
            Err(e) => {
                log::error!("Collection load failed, keeping previous snapshot: {}", e);
                return Err(e);
            }
        };

        let summary = LoadSummary {
            rows_read,
            entries: snapshot.len(),
            merged_duplicates: rows_read - snapshot.len(),
            generation,
        };
        self.swap(snapshot);

        log::info!(
            "Loaded {} rows into {} entries ({} duplicates merged)",
            summary.rows_read,
            summary.entries,
            summary.merged_duplicates
        );
        Ok(summary)
    }

    /// Load a ManaBox CSV export
    pub fn load_csv<P: AsRef<Path>>(&self, path: P) -> Result<LoadSummary> {
        let rows = read_collection_csv(path)?;
        self.load(rows)
    }

    /// All entries of the current snapshot
    pub fn all(&self) -> CardView<impl Fn(&CardEntry) -> bool> {
        self.query(|_: &CardEntry| true)
    }

    /// Entries of the current snapshot matching `predicate`
    pub fn query<P>(&self, predicate: P) -> CardView<P>
    where
        P: Fn(&CardEntry) -> bool,
    {
        CardView {
            snapshot: self.snapshot(),
            predicate,
        }
    }

    /// Fill market values from the knowledge base and swap in the result.
    ///
    /// Entries whose metadata is missing keep their imported value.
    pub async fn enrich(&self, kb: &KnowledgeBase, currency: Currency) -> Result<EnrichSummary> {
        let base = self.snapshot();
        let lookups = kb
            .lookup_entries(base.entries.iter())
            .await?;

        let mut entries = base.entries.clone();
        let mut summary = EnrichSummary {
            valued: 0,
            unvalued: 0,
            stale: 0,
            applied: false,
        };

        for entry in &mut entries {
            let lookup = lookups.get(&entry.identity);
            if lookup.is_some_and(|l| l.is_stale()) {
                summary.stale += 1;
            }
            let price = lookup
                .and_then(|l| l.metadata())
                .and_then(|meta| meta.prices.price(currency, entry.is_foil()));
            if let Some(amount) = price {
                entry.market_value = Some(Money::new(amount, currency));
            }
            if entry.market_value.is_some() {
                summary.valued += 1;
            } else {
                summary.unvalued += 1;
            }
        }

        let _guard = self.load_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.snapshot().generation != base.generation {
            log::warn!("Collection was reloaded during enrichment, discarding enriched values");
            return Ok(summary);
        }

        let snapshot = Snapshot {
            index: base.index.clone(),
            entries,
            generation: base.generation + 1,
            loaded_at: base.loaded_at,
        };
        self.swap(snapshot);
        summary.applied = true;

        log::info!(
            "Enriched collection: {} valued, {} without value, {} from stale metadata",
            summary.valued,
            summary.unvalued,
            summary.stale
        );
        Ok(summary)
    }

    fn swap(&self, snapshot: Snapshot) {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *current = Arc::new(snapshot);
    }
}

fn build_snapshot<I>(rows: I, default_currency: Currency, generation: u64) -> Result<(Snapshot, usize)>
where
    I: IntoIterator<Item = RawCardRow>,
{
    let mut entries: Vec<CardEntry> = Vec::new();
    let mut index: HashMap<CardIdentity, usize> = HashMap::new();
    // copies backing each entry's averaged purchase price
    let mut priced_copies: Vec<u32> = Vec::new();
    let mut rows_read = 0;

    for row in rows {
        rows_read += 1;
        let entry = resolve_row(&row, default_currency)?;

        match index.get(&entry.identity) {
            Some(&i) => {
                log::debug!("Merging duplicate row on line {} into {}", row.line, entry.identity);
                merge_into(&mut entries[i], &mut priced_copies[i], entry, row.line)?;
            }
            None => {
                index.insert(entry.identity.clone(), entries.len());
                priced_copies.push(if entry.purchase_price.is_some() { entry.quantity } else { 0 });
                entries.push(entry);
            }
        }
    }

    let snapshot = Snapshot {
        entries,
        index,
        generation,
        loaded_at: Utc::now(),
    };
    Ok((snapshot, rows_read))
}

fn resolve_row(row: &RawCardRow, default_currency: Currency) -> Result<CardEntry> {
    let identity = CardIdentity::new(&row.name, &row.set_code, &row.collector_number);
    if !identity.is_resolvable() {
        let field = if identity.name.is_empty() {
            "name"
        } else if identity.set_code.is_empty() {
            "set code"
        } else {
            "collector number"
        };
        return Err(QueryError::import(row.line, field, "is empty"));
    }

    let quantity = parse_quantity(&row.quantity, row.line)?;

    let mut conditions = BTreeSet::new();
    if !row.condition.trim().is_empty() {
        match Condition::parse(&row.condition) {
            Some(condition) => {
                conditions.insert(condition);
            }
            None => log::warn!("Line {}: unknown condition '{}'", row.line, row.condition),
        }
    }

    let mut finishes = BTreeSet::new();
    match Finish::parse(&row.foil) {
        Some(finish) => {
            finishes.insert(finish);
        }
        None => log::warn!("Line {}: unknown finish '{}'", row.line, row.foil),
    }

    Ok(CardEntry {
        name: row.name.split_whitespace().collect::<Vec<_>>().join(" "),
        set_name: row.set_name.trim().to_string(),
        quantity,
        conditions,
        finishes,
        rarity: non_empty(&row.rarity).map(|s| s.to_lowercase()),
        language: non_empty(&row.language),
        binder: non_empty(&row.binder_name),
        scryfall_id: non_empty(&row.scryfall_id),
        purchase_price: parse_money(
            &row.purchase_price,
            &row.purchase_currency,
            default_currency,
            row.line,
        ),
        market_value: parse_money(
            &row.market_value,
            &row.market_currency,
            default_currency,
            row.line,
        ),
        identity,
    })
}

fn parse_quantity(raw: &str, line: usize) -> Result<u32> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(QueryError::import(line, "quantity", "is missing"));
    }
    let value: i64 = raw
        .parse()
        .map_err(|_| QueryError::import(line, "quantity", format!("is not a number: '{raw}'")))?;
    if value < 0 {
        return Err(QueryError::import(
            line,
            "quantity",
            format!("must be non-negative, got {value}"),
        ));
    }
    u32::try_from(value)
        .map_err(|_| QueryError::import(line, "quantity", format!("is too large: {value}")))
}

fn parse_money(amount: &str, currency: &str, default_currency: Currency, line: usize) -> Option<Money> {
    if amount.trim().is_empty() {
        return None;
    }
    let Some(value) = parse_amount(amount) else {
        log::warn!("Line {}: ignoring unreadable price '{}'", line, amount);
        return None;
    };
    let currency = if currency.trim().is_empty() {
        default_currency
    } else {
        match Currency::parse(currency) {
            Some(c) => c,
            None => {
                log::warn!("Line {}: ignoring price in unsupported currency '{}'", line, currency);
                return None;
            }
        }
    };
    Some(Money::new(value, currency))
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn merge_into(target: &mut CardEntry, priced: &mut u32, other: CardEntry, line: usize) -> Result<()> {
    target.quantity = target
        .quantity
        .checked_add(other.quantity)
        .ok_or_else(|| QueryError::import(line, "quantity", "total overflows"))?;
    target.conditions.extend(other.conditions);
    target.finishes.extend(other.finishes);

    if let Some(price) = other.purchase_price {
        match target.purchase_price {
            None => {
                target.purchase_price = Some(price);
                *priced = other.quantity;
            }
            Some(current) if current.currency == price.currency => {
                let total = *priced + other.quantity;
                if total > 0 {
                    let weighted = current.amount * f64::from(*priced)
                        + price.amount * f64::from(other.quantity);
                    target.purchase_price = Some(Money::new(weighted / f64::from(total), price.currency));
                }
                *priced = total;
            }
            Some(_) => log::warn!(
                "Line {}: purchase price currency differs from earlier rows of {}, keeping the first",
                line,
                target.identity
            ),
        }
    }

    if target.market_value.is_none() {
        target.market_value = other.market_value;
    }
    if target.rarity.is_none() {
        target.rarity = other.rarity;
    }
    Ok(())
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
