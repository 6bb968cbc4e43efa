//! Renders engine results as a human answer plus a structured payload.
//!
//! Money is always printed with two decimals followed by the currency code.

use crate::engine::{ArchetypeScore, Provenance, ResultPayload, ResultValue, ScalarResult};
use crate::models::{CardEntry, Currency};
use crate::planner::AggregateFn;
use crate::store::CollectionSummary;
use serde::Serialize;

/// Missing cards shown per archetype in text output
const MISSING_SHOWN: usize = 5;

/// Human-readable answer and the machine-checkable result behind it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormattedResponse {
    pub text: String,
    pub structured: serde_json::Value,
}

/// Fixed two-decimal money rendering, e.g. "15.00 USD"
pub fn format_money(amount: f64, currency: Currency) -> String {
    format!("{:.2} {}", amount, currency.code())
}

pub fn format(payload: &ResultPayload) -> FormattedResponse {
    let mut text = match &payload.value {
        ResultValue::Scalar(result) => format_scalar(result, &payload.provenance),
        ResultValue::Entries(entries) => format_entries(entries, payload.currency),
        ResultValue::ArchetypeScores(scores) => format_scores(scores),
    };
    text.push_str(&metadata_note(&payload.provenance));

    let structured = match serde_json::to_value(payload) {
        Ok(value) => value,
        Err(e) => {
            log::error!("Failed to serialize result payload: {}", e);
            serde_json::Value::Null
        }
    };
    FormattedResponse { text, structured }
}

fn format_scalar(result: &ScalarResult, provenance: &Provenance) -> String {
    let mut output = String::new();
    let subject = match (&result.function, &result.field) {
        (AggregateFn::Count, None) => "Number of cards".to_string(),
        (AggregateFn::Count, Some(field)) => format!("Cards with a known {}", field.label()),
        (AggregateFn::Sum, Some(field)) => format!("Total {}", field.label()),
        (AggregateFn::Avg, Some(field)) => format!("Average {}", field.label()),
        (function, None) => function.as_str().to_string(),
    };

    let value = match (result.value, result.currency) {
        (Some(value), Some(currency)) => format_money(value, currency),
        (Some(value), None) if result.function == AggregateFn::Count => format!("{value:.0}"),
        (Some(value), None) => format_number(value),
        (None, _) => "unknown".to_string(),
    };
    output.push_str(&format!("{subject}: {value}\n"));

    let nullable = result.field.as_ref().is_some_and(|f| f.is_nullable());
    if nullable || provenance.excluded_unknown > 0 {
        let label = result
            .field
            .as_ref()
            .map(|f| f.label())
            .unwrap_or_else(|| "value".to_string());
        output.push_str(&format!(
            "Based on {} of {} matching rows ({} scanned); {} excluded with unknown {}\n",
            result.rows_counted,
            provenance.rows_matched,
            provenance.rows_scanned,
            provenance.excluded_unknown,
            label
        ));
    }
    output
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.2}")
    }
}

fn format_entries(entries: &[CardEntry], currency: Currency) -> String {
    let mut output = String::new();
    if entries.is_empty() {
        output.push_str("No matching cards in your collection.\n");
        return output;
    }

    let copies: u64 = entries.iter().map(|e| u64::from(e.quantity)).sum();
    output.push_str(&format!(
        "Found {} cards ({} copies):\n",
        entries.len(),
        copies
    ));

    for entry in entries {
        let mut tags: Vec<&str> = entry.conditions.iter().map(|c| c.as_str()).collect();
        tags.extend(entry.finishes.iter().filter(|f| f.is_foil()).map(|f| f.as_str()));
        let tag_info = if tags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", tags.join(", "))
        };

        let value_info = match entry.market_value.and_then(|m| m.amount_in(currency)) {
            Some(value) => format!(" - {} each", format_money(value, currency)),
            None => String::new(),
        };

        output.push_str(&format!(
            "  {} x {} ({} #{}){}{}\n",
            entry.quantity,
            entry.name,
            entry.identity.set_code,
            entry.identity.collector_number,
            tag_info,
            value_info
        ));
    }
    output
}

fn format_scores(scores: &[ArchetypeScore]) -> String {
    let mut output = String::new();
    if scores.is_empty() {
        output.push_str("No deck archetypes met the threshold.\n");
        return output;
    }

    output.push_str("Deck ownership:\n");
    for score in scores {
        let format_info = score
            .format
            .as_ref()
            .map(|f| format!(" ({f})"))
            .unwrap_or_default();
        output.push_str(&format!(
            "  {}{}: {:.2}% owned ({} of {} cards)\n",
            score.archetype,
            format_info,
            score.score * 100.0,
            score.owned,
            score.required
        ));

        if !score.missing.is_empty() {
            let shown: Vec<String> = score
                .missing
                .iter()
                .take(MISSING_SHOWN)
                .map(|m| format!("{} x {}", m.needed, m.name))
                .collect();
            let more = score.missing.len().saturating_sub(MISSING_SHOWN);
            let more_info = if more > 0 {
                format!(" and {more} more")
            } else {
                String::new()
            };
            output.push_str(&format!("    missing: {}{}\n", shown.join(", "), more_info));
        }
    }
    output
}

fn metadata_note(provenance: &Provenance) -> String {
    match (provenance.metadata_stale, provenance.metadata_missing) {
        (0, 0) => String::new(),
        (stale, missing) => format!(
            "Note: card metadata was stale for {stale} and unavailable for {missing} of the cards looked up.\n"
        ),
    }
}

/// Render a collection overview
pub fn format_summary(summary: &CollectionSummary) -> String {
    let mut output = String::new();

    output.push_str("Collection Summary\n");
    output.push_str("------------------\n");
    output.push_str(&format!(
        "{} copies across {} unique printings\n",
        summary.total_copies, summary.unique_entries
    ));
    output.push_str(&format!(
        "Market value: {}",
        format_money(summary.market_value, summary.currency)
    ));
    if summary.unvalued_entries > 0 {
        output.push_str(&format!(
            " ({} printings without a known value)",
            summary.unvalued_entries
        ));
    }
    output.push('\n');

    for (currency, amount) in &summary.purchase_value {
        output.push_str(&format!("Purchase value: {}\n", format_money(*amount, *currency)));
    }

    if !summary.rarity_breakdown.is_empty() {
        output.push_str("\nBy rarity:\n");
        for (rarity, copies) in &summary.rarity_breakdown {
            output.push_str(&format!("  {rarity}: {copies}\n"));
        }
    }

    if !summary.top_valuable.is_empty() {
        output.push_str("\nMost valuable:\n");
        output.push_str(&format_entries(&summary.top_valuable, summary.currency));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CardIdentity, Money};
    use crate::planner::Field;
    use std::collections::BTreeSet;

    fn payload(value: ResultValue, provenance: Provenance) -> ResultPayload {
        ResultPayload {
            value,
            currency: Currency::Usd,
            provenance,
        }
    }

    fn entry(name: &str, quantity: u32, value: Option<f64>) -> CardEntry {
        CardEntry {
            identity: CardIdentity::new(name, "LEA", "1"),
            name: name.to_string(),
            set_name: String::new(),
            quantity,
            conditions: BTreeSet::new(),
            finishes: BTreeSet::new(),
            rarity: None,
            language: None,
            binder: None,
            scryfall_id: None,
            purchase_price: None,
            market_value: value.map(|v| Money::new(v, Currency::Usd)),
        }
    }

    #[test]
    fn money_has_two_decimals_and_currency() {
        assert_eq!(format_money(15.0, Currency::Usd), "15.00 USD");
        assert_eq!(format_money(2.5, Currency::Eur), "2.50 EUR");
        assert_eq!(format_money(1.999, Currency::Usd), "2.00 USD");
    }

    #[test]
    fn sum_shows_exclusions() {
        let result = ScalarResult {
            function: AggregateFn::Sum,
            field: Some(Field::MarketValue),
            value: Some(15.0),
            rows_counted: 2,
            currency: Some(Currency::Usd),
        };
        let provenance = Provenance {
            rows_scanned: 3,
            rows_matched: 3,
            excluded_unknown: 1,
            ..Provenance::default()
        };

        let response = format(&payload(ResultValue::Scalar(result), provenance));

        assert!(response.text.starts_with("Total market value: 15.00 USD\n"));
        assert!(response
            .text
            .contains("Based on 2 of 3 matching rows (3 scanned); 1 excluded with unknown market value"));
        assert_eq!(response.structured["value"]["type"], "scalar");
        assert_eq!(response.structured["value"]["data"]["value"], 15.0);
        assert_eq!(response.structured["provenance"]["excluded_unknown"], 1);
    }

    #[test]
    fn count_without_field_has_no_provenance_line() {
        let result = ScalarResult {
            function: AggregateFn::Count,
            field: None,
            value: Some(3.0),
            rows_counted: 3,
            currency: None,
        };
        let response = format(&payload(ResultValue::Scalar(result), Provenance::default()));
        assert_eq!(response.text, "Number of cards: 3\n");
    }

    #[test]
    fn unknown_average_is_reported_as_unknown() {
        let result = ScalarResult {
            function: AggregateFn::Avg,
            field: Some(Field::PurchasePrice),
            value: None,
            rows_counted: 0,
            currency: Some(Currency::Usd),
        };
        let provenance = Provenance {
            rows_matched: 2,
            excluded_unknown: 2,
            ..Provenance::default()
        };
        let response = format(&payload(ResultValue::Scalar(result), provenance));
        assert!(response.text.starts_with("Average purchase price: unknown\n"));
    }

    #[test]
    fn entries_list_quantity_printing_and_value() {
        let entries = vec![entry("Lightning Bolt", 2, Some(400.0)), entry("Opt", 1, None)];
        let response = format(&payload(ResultValue::Entries(entries), Provenance::default()));

        assert_eq!(
            response.text,
            "Found 2 cards (3 copies):\n  2 x Lightning Bolt (LEA #1) - 400.00 USD each\n  1 x Opt (LEA #1)\n"
        );
    }

    #[test]
    fn structured_payload_mirrors_the_result() {
        let payload = payload(
            ResultValue::Entries(vec![entry("Black Lotus", 1, Some(20000.0))]),
            Provenance {
                rows_scanned: 3,
                rows_matched: 1,
                ..Provenance::default()
            },
        );

        let response = format(&payload);

        assert_eq!(response.structured["value"]["type"], "entries");
        assert_eq!(response.structured["value"]["data"][0]["name"], "Black Lotus");
        assert_eq!(response.structured["provenance"]["rows_matched"], 1);
        assert_eq!(response.structured["currency"], "USD");
    }

    #[test]
    fn empty_entries_message() {
        let response = format(&payload(ResultValue::Entries(vec![]), Provenance::default()));
        assert_eq!(response.text, "No matching cards in your collection.\n");
    }

    #[test]
    fn scores_show_percent_and_missing_cards() {
        let score = ArchetypeScore {
            archetype: "Artifacts".to_string(),
            format: Some("commander".to_string()),
            score: 0.5,
            owned: 1,
            required: 2,
            missing: vec![crate::engine::MissingCard {
                name: "Arcane Signet".to_string(),
                needed: 1,
            }],
        };
        let response = format(&payload(
            ResultValue::ArchetypeScores(vec![score]),
            Provenance::default(),
        ));

        assert_eq!(
            response.text,
            "Deck ownership:\n  Artifacts (commander): 50.00% owned (1 of 2 cards)\n    missing: 1 x Arcane Signet\n"
        );
    }

    #[test]
    fn degraded_metadata_is_noted() {
        let provenance = Provenance {
            metadata_stale: 2,
            metadata_missing: 1,
            ..Provenance::default()
        };
        let response = format(&payload(ResultValue::Entries(vec![]), provenance));
        assert!(response
            .text
            .ends_with("Note: card metadata was stale for 2 and unavailable for 1 of the cards looked up.\n"));
    }

    #[test]
    fn summary_lists_values_and_rarities() {
        let mut rarity_breakdown = std::collections::BTreeMap::new();
        rarity_breakdown.insert("common".to_string(), 3);
        let summary = CollectionSummary {
            total_copies: 3,
            unique_entries: 2,
            currency: Currency::Usd,
            market_value: 800.5,
            unvalued_entries: 1,
            purchase_value: Default::default(),
            rarity_breakdown,
            top_valuable: vec![entry("Lightning Bolt", 2, Some(400.25))],
        };

        let text = format_summary(&summary);

        assert!(text.contains("3 copies across 2 unique printings\n"));
        assert!(text.contains("Market value: 800.50 USD (1 printings without a known value)\n"));
        assert!(text.contains("  common: 3\n"));
        assert!(text.contains("  2 x Lightning Bolt (LEA #1) - 400.25 USD each\n"));
    }
}
