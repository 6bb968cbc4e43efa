//! Analysis engine: runs a [`Plan`] against one collection snapshot and the
//! knowledge base, left to right, and reports how the result was derived.
//!
//! Unknown values are never treated as zero. Rows whose value for the field
//! in question is unknown fail every predicate, sort last, and are left out of
//! aggregates with their count reported in [`Provenance::excluded_unknown`].

use crate::error::{QueryError, Result};
use crate::knowledge::{KnowledgeBase, Lookup};
use crate::models::{normalize_name, CardEntry, CardIdentity, CardMetadata, Currency, DeckArchetype};
use crate::planner::{
    AggregateFn, CompareOp, Field, FieldKind, Operand, Operation, Plan, Predicate, SortOrder,
};
use crate::store::{CollectionStore, Snapshot};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// Tolerance for numeric equality
const EPSILON: f64 = 1e-9;

/// Result of an aggregate operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScalarResult {
    pub function: AggregateFn,
    pub field: Option<Field>,
    /// `None` when no row had a known value to aggregate
    pub value: Option<f64>,
    /// Rows that contributed a known value
    pub rows_counted: usize,
    /// Set when the value is an amount of money
    pub currency: Option<Currency>,
}

/// A card an archetype needs more copies of
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingCard {
    pub name: String,
    pub needed: u64,
}

/// Ownership overlap of the collection with one archetype
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchetypeScore {
    pub archetype: String,
    pub format: Option<String>,
    /// Owned share of the required cards, in [0, 1]
    pub score: f64,
    /// Required copies covered by the collection, capped per card
    pub owned: u64,
    pub required: u64,
    pub missing: Vec<MissingCard>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ResultValue {
    Scalar(ScalarResult),
    Entries(Vec<CardEntry>),
    ArchetypeScores(Vec<ArchetypeScore>),
}

/// How a result was derived
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Provenance {
    pub operations: Vec<String>,
    pub snapshot_generation: u64,
    pub rows_scanned: usize,
    /// Rows left after filtering
    pub rows_matched: usize,
    /// Rows left out of an aggregate because their value was unknown
    pub excluded_unknown: usize,
    pub metadata_stale: usize,
    pub metadata_missing: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultPayload {
    pub value: ResultValue,
    pub currency: Currency,
    pub provenance: Provenance,
}

/// Data flowing between operations
enum Stage<'s> {
    Rows(Vec<&'s CardEntry>),
    Scalar(ScalarResult),
    Scores(Vec<ArchetypeScore>),
}

impl Stage<'_> {
    fn name(&self) -> &'static str {
        match self {
            Stage::Rows(_) => "card entries",
            Stage::Scalar(_) => "a scalar",
            Stage::Scores(_) => "archetype scores",
        }
    }
}

/// Execute `plan` against the store's current snapshot
pub async fn execute(plan: &Plan, store: &CollectionStore, kb: &KnowledgeBase) -> Result<ResultPayload> {
    let snapshot = store.snapshot();
    execute_on(plan, &snapshot, kb).await
}

/// Execute `plan` against a specific snapshot.
///
/// Card metadata is fetched at most once per query, by the plan's join.
pub async fn execute_on(plan: &Plan, snapshot: &Snapshot, kb: &KnowledgeBase) -> Result<ResultPayload> {
    if let Err(reason) = plan.check() {
        log::error!("Planner/engine consistency bug: plan does not type-check: {}", reason);
        return Err(QueryError::Execution(reason));
    }

    let mut ctx = Context {
        currency: plan.currency,
        metadata: BTreeMap::new(),
    };
    let mut provenance = Provenance {
        operations: plan.describe(),
        snapshot_generation: snapshot.generation(),
        rows_scanned: snapshot.len(),
        rows_matched: snapshot.len(),
        ..Provenance::default()
    };
    let mut stage = Stage::Rows(snapshot.entries().iter().collect());

    for operation in &plan.operations {
        stage = match (operation, stage) {
            (Operation::Join { .. }, Stage::Rows(rows)) => {
                let lookups = kb.lookup_entries(rows.iter().copied()).await?;
                provenance.metadata_stale = lookups.values().filter(|l| l.is_stale()).count();
                provenance.metadata_missing = lookups.values().filter(|l| l.is_missing()).count();
                if plan.must_be_current && provenance.metadata_stale + provenance.metadata_missing > 0 {
                    return Err(QueryError::EnrichmentUnavailable(format!(
                        "{} of {} cards have no current metadata",
                        provenance.metadata_stale + provenance.metadata_missing,
                        lookups.len()
                    )));
                }
                ctx.metadata = lookups;
                Stage::Rows(rows)
            }
            (Operation::Filter { predicates }, Stage::Rows(rows)) => {
                let kept: Vec<&CardEntry> = rows
                    .into_iter()
                    .filter(|entry| predicates.iter().all(|p| ctx.matches(entry, p)))
                    .collect();
                provenance.rows_matched = kept.len();
                Stage::Rows(kept)
            }
            (Operation::ListBy { field, order, limit }, Stage::Rows(rows)) => {
                let mut sorted = ctx.sort(rows, field, *order);
                if let Some(limit) = limit {
                    sorted.truncate(*limit);
                }
                Stage::Rows(sorted)
            }
            (Operation::Aggregate { function, field }, Stage::Rows(rows)) => {
                let (result, excluded) = ctx.aggregate(&rows, *function, field.as_ref());
                provenance.excluded_unknown += excluded;
                Stage::Scalar(result)
            }
            (Operation::OverlapScore { archetypes, min_score }, Stage::Rows(rows)) => {
                Stage::Scores(overlap_scores(&rows, archetypes, *min_score))
            }
            (operation, other) => {
                let reason = format!("{} cannot take {} as input", operation.name(), other.name());
                log::error!("Planner/engine consistency bug: {}", reason);
                return Err(QueryError::Execution(reason));
            }
        };
    }

    let value = match stage {
        Stage::Rows(rows) => ResultValue::Entries(rows.into_iter().cloned().collect()),
        Stage::Scalar(result) => ResultValue::Scalar(result),
        Stage::Scores(scores) => ResultValue::ArchetypeScores(scores),
    };

    log::debug!(
        "Executed {} operations over {} rows ({} matched, {} excluded as unknown)",
        plan.operations.len(),
        provenance.rows_scanned,
        provenance.rows_matched,
        provenance.excluded_unknown
    );

    Ok(ResultPayload {
        value,
        currency: plan.currency,
        provenance,
    })
}

/// Per-query state: currency and the metadata fetched by the join
struct Context {
    currency: Currency,
    metadata: BTreeMap<CardIdentity, Lookup>,
}

impl Context {
    fn metadata(&self, entry: &CardEntry) -> Option<&CardMetadata> {
        self.metadata.get(&entry.identity).and_then(Lookup::metadata)
    }

    fn number(&self, entry: &CardEntry, field: &Field) -> Option<f64> {
        let market = || entry.market_value.and_then(|m| m.amount_in(self.currency));
        match field {
            Field::Quantity => Some(f64::from(entry.quantity)),
            Field::PurchasePrice => entry.purchase_price.and_then(|m| m.amount_in(self.currency)),
            Field::MarketValue => market(),
            Field::TotalValue => market().map(|value| value * f64::from(entry.quantity)),
            Field::ManaValue => self.metadata(entry)?.mana_value,
            _ => None,
        }
    }

    fn text(&self, entry: &CardEntry, field: &Field) -> Option<String> {
        match field {
            Field::Name => Some(entry.name.clone()),
            Field::SetCode => Some(entry.identity.set_code.clone()),
            Field::SetName => Some(entry.set_name.clone()).filter(|s| !s.is_empty()),
            Field::CollectorNumber => Some(entry.identity.collector_number.clone()),
            Field::Rarity => entry.rarity.clone(),
            Field::Language => entry.language.clone(),
            Field::Binder => entry.binder.clone(),
            Field::TypeLine => Some(self.metadata(entry)?.type_line.clone()).filter(|s| !s.is_empty()),
            Field::OracleText => self.metadata(entry)?.oracle_text.clone(),
            Field::Legality(format) => Some(self.metadata(entry)?.legality(format).as_str().to_string()),
            _ => None,
        }
    }

    fn list(&self, entry: &CardEntry, field: &Field) -> Option<Vec<String>> {
        match field {
            Field::Condition if entry.conditions.is_empty() => None,
            Field::Condition => Some(entry.conditions.iter().map(|c| c.as_str().to_string()).collect()),
            Field::Finish => Some(entry.finishes.iter().map(|f| f.as_str().to_string()).collect()),
            Field::ColorIdentity => Some(self.metadata(entry)?.color_identity.clone()),
            _ => None,
        }
    }

    fn has_value(&self, entry: &CardEntry, field: &Field) -> bool {
        match field.kind() {
            FieldKind::Number => self.number(entry, field).is_some(),
            FieldKind::Text => self.text(entry, field).is_some(),
            FieldKind::TextList => self.list(entry, field).is_some(),
        }
    }

    fn matches(&self, entry: &CardEntry, predicate: &Predicate) -> bool {
        let field = &predicate.field;
        match (&predicate.value, field.kind()) {
            (Operand::Number(target), FieldKind::Number) => self
                .number(entry, field)
                .is_some_and(|value| compare_numbers(value, predicate.op, *target)),
            (Operand::Text(target), FieldKind::Text) => self
                .text(entry, field)
                .is_some_and(|value| compare_text(&value, predicate.op, target)),
            (Operand::Text(target), FieldKind::TextList) => {
                self.list(entry, field).is_some_and(|values| match predicate.op {
                    CompareOp::Ne => !values.iter().any(|v| compare_text(v, CompareOp::Eq, target)),
                    op => values.iter().any(|v| compare_text(v, op, target)),
                })
            }
            _ => false,
        }
    }

    /// Stable sort with unknown values last and card identity as tie-break
    fn sort<'s>(&self, rows: Vec<&'s CardEntry>, field: &Field, order: SortOrder) -> Vec<&'s CardEntry> {
        if field.kind() == FieldKind::Number {
            let mut keyed: Vec<(Option<f64>, &CardEntry)> =
                rows.into_iter().map(|e| (self.number(e, field), e)).collect();
            keyed.sort_by(|a, b| {
                nulls_last(a.0.as_ref(), b.0.as_ref(), order, |x: &f64, y: &f64| x.total_cmp(y))
                    .then_with(|| a.1.identity.cmp(&b.1.identity))
            });
            keyed.into_iter().map(|(_, e)| e).collect()
        } else {
            let mut keyed: Vec<(Option<String>, &CardEntry)> = rows
                .into_iter()
                .map(|e| (self.text(e, field).map(|t| normalize_name(&t)), e))
                .collect();
            keyed.sort_by(|a, b| {
                nulls_last(a.0.as_ref(), b.0.as_ref(), order, |x: &String, y: &String| x.cmp(y))
                    .then_with(|| a.1.identity.cmp(&b.1.identity))
            });
            keyed.into_iter().map(|(_, e)| e).collect()
        }
    }

    /// Aggregate `rows`, returning the result and the number of rows excluded as unknown.
    ///
    /// Per-copy money is weighted by quantity: `sum` is the total holding value
    /// and `avg` the average per copy.
    fn aggregate(&self, rows: &[&CardEntry], function: AggregateFn, field: Option<&Field>) -> (ScalarResult, usize) {
        let Some(field) = field else {
            let result = ScalarResult {
                function,
                field: None,
                value: Some(rows.len() as f64),
                rows_counted: rows.len(),
                currency: None,
            };
            return (result, 0);
        };

        let mut counted = 0;
        let mut excluded = 0;
        let mut total = 0.0;
        let mut weight = 0.0;
        for entry in rows {
            if field.kind() != FieldKind::Number {
                if self.has_value(entry, field) {
                    counted += 1;
                } else {
                    excluded += 1;
                }
                continue;
            }
            match self.number(entry, field) {
                Some(value) => {
                    counted += 1;
                    let w = if field.is_per_copy() { f64::from(entry.quantity) } else { 1.0 };
                    total += value * w;
                    weight += w;
                }
                None => excluded += 1,
            }
        }

        let value = match function {
            AggregateFn::Count => Some(counted as f64),
            AggregateFn::Sum if counted == 0 && excluded > 0 => None,
            AggregateFn::Sum => Some(total),
            AggregateFn::Avg if weight > 0.0 => Some(total / weight),
            AggregateFn::Avg => None,
        };
        let currency = (field.is_monetary() && function != AggregateFn::Count).then_some(self.currency);

        if excluded > 0 {
            log::debug!("{} of {} rows have no known {}", excluded, rows.len(), field.label());
        }
        let result = ScalarResult {
            function,
            field: Some(field.clone()),
            value,
            rows_counted: counted,
            currency,
        };
        (result, excluded)
    }
}

fn compare_numbers(value: f64, op: CompareOp, target: f64) -> bool {
    match op {
        CompareOp::Eq => (value - target).abs() < EPSILON,
        CompareOp::Ne => (value - target).abs() >= EPSILON,
        CompareOp::Gt => value > target,
        CompareOp::Gte => value >= target,
        CompareOp::Lt => value < target,
        CompareOp::Lte => value <= target,
        CompareOp::Contains => false,
    }
}

fn compare_text(value: &str, op: CompareOp, target: &str) -> bool {
    let value = normalize_name(value);
    let target = normalize_name(target);
    match op {
        CompareOp::Eq => value == target,
        CompareOp::Ne => value != target,
        CompareOp::Contains => value.contains(&target),
        _ => false,
    }
}

fn nulls_last<T, F>(a: Option<&T>, b: Option<&T>, order: SortOrder, cmp: F) -> Ordering
where
    F: Fn(&T, &T) -> Ordering,
{
    match (a, b) {
        (Some(a), Some(b)) => match order {
            SortOrder::Ascending => cmp(a, b),
            SortOrder::Descending => cmp(b, a),
        },
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// How an archetype line is satisfied
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum DeckKey {
    Exact(CardIdentity),
    Name(String),
}

fn overlap_scores(rows: &[&CardEntry], archetypes: &[DeckArchetype], min_score: Option<f64>) -> Vec<ArchetypeScore> {
    let mut owned: BTreeMap<&CardIdentity, u64> = BTreeMap::new();
    for entry in rows {
        *owned.entry(&entry.identity).or_insert(0) += u64::from(entry.quantity);
    }
    // printings per normalized name, in identity order
    let mut printings: HashMap<&str, Vec<&CardIdentity>> = HashMap::new();
    for identity in owned.keys() {
        printings.entry(identity.name.as_str()).or_default().push(identity);
    }

    let mut scores: Vec<ArchetypeScore> = archetypes
        .iter()
        .map(|deck| score_archetype(deck, &owned, &printings))
        .filter(|score| min_score.map_or(true, |min| score.score >= min))
        .collect();
    scores.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.archetype.cmp(&b.archetype))
    });
    scores
}

/// Score one archetype against the owned copies.
///
/// Every owned copy covers at most one required copy. Exact-printing lines
/// draw on their printing first; name-only lines share what is left of all
/// printings of that name.
fn score_archetype(
    deck: &DeckArchetype,
    owned: &BTreeMap<&CardIdentity, u64>,
    printings: &HashMap<&str, Vec<&CardIdentity>>,
) -> ArchetypeScore {
    // repeated lines for the same card add up before capping
    let mut lines: Vec<(DeckKey, &str, u64)> = Vec::new();
    let mut positions: HashMap<DeckKey, usize> = HashMap::new();
    for card in &deck.cards {
        let key = match card.identity() {
            Some(identity) => DeckKey::Exact(identity),
            None => DeckKey::Name(normalize_name(&card.name)),
        };
        match positions.get(&key) {
            Some(&i) => lines[i].2 += u64::from(card.quantity),
            None => {
                positions.insert(key.clone(), lines.len());
                lines.push((key, card.name.as_str(), u64::from(card.quantity)));
            }
        }
    }

    let mut remaining: HashMap<&CardIdentity, u64> = owned.iter().map(|(id, qty)| (*id, *qty)).collect();
    let mut covered = vec![0u64; lines.len()];

    for (i, (key, _, required)) in lines.iter().enumerate() {
        if let DeckKey::Exact(identity) = key {
            if let Some(left) = remaining.get_mut(identity) {
                let take = (*left).min(*required);
                *left -= take;
                covered[i] = take;
            }
        }
    }
    for (i, (key, _, required)) in lines.iter().enumerate() {
        if let DeckKey::Name(normalized) = key {
            let mut needed = *required;
            for identity in printings.get(normalized.as_str()).into_iter().flatten() {
                if needed == 0 {
                    break;
                }
                if let Some(left) = remaining.get_mut(*identity) {
                    let take = (*left).min(needed);
                    *left -= take;
                    needed -= take;
                }
            }
            covered[i] = required - needed;
        }
    }

    let mut owned_total = 0;
    let mut required_total = 0;
    let mut missing = Vec::new();
    for ((_, name, required), have) in lines.into_iter().zip(covered) {
        owned_total += have;
        required_total += required;
        if have < required {
            missing.push(MissingCard {
                name: name.to_string(),
                needed: required - have,
            });
        }
    }

    let score = if required_total == 0 {
        0.0
    } else {
        (owned_total as f64 / required_total as f64).clamp(0.0, 1.0)
    };

    ArchetypeScore {
        archetype: deck.name.clone(),
        format: deck.format.clone(),
        score,
        owned: owned_total,
        required: required_total,
        missing,
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
