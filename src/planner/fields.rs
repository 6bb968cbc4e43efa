//! Queryable fields and the alias table used to resolve user-facing names.

use crate::error::{QueryError, Result};
use crate::models::KNOWN_FORMATS;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A field of a card entry or of its joined metadata
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Name,
    SetCode,
    SetName,
    CollectorNumber,
    Quantity,
    Condition,
    Finish,
    Rarity,
    Language,
    Binder,
    /// Per copy
    PurchasePrice,
    /// Per copy
    MarketValue,
    /// Quantity x market value
    TotalValue,
    TypeLine,
    ColorIdentity,
    OracleText,
    ManaValue,
    /// Legality in one format
    Legality(String),
}

/// How values of a field compare
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Number,
    /// A set of tags; `eq` and `contains` match any element
    TextList,
}

const FIELD_ALIASES: &[(&str, Field)] = &[
    ("name", Field::Name),
    ("card", Field::Name),
    ("card_name", Field::Name),
    ("set", Field::SetCode),
    ("set_code", Field::SetCode),
    ("setcode", Field::SetCode),
    ("edition", Field::SetCode),
    ("expansion", Field::SetCode),
    ("set_name", Field::SetName),
    ("edition_name", Field::SetName),
    ("collector_number", Field::CollectorNumber),
    ("number", Field::CollectorNumber),
    ("cn", Field::CollectorNumber),
    ("quantity", Field::Quantity),
    ("qty", Field::Quantity),
    ("copies", Field::Quantity),
    ("condition", Field::Condition),
    ("grade", Field::Condition),
    ("finish", Field::Finish),
    ("finishes", Field::Finish),
    ("foil", Field::Finish),
    ("rarity", Field::Rarity),
    ("language", Field::Language),
    ("lang", Field::Language),
    ("binder", Field::Binder),
    ("binder_name", Field::Binder),
    ("purchase_price", Field::PurchasePrice),
    ("price_paid", Field::PurchasePrice),
    ("paid", Field::PurchasePrice),
    ("cost", Field::PurchasePrice),
    ("acquisition_price", Field::PurchasePrice),
    ("value", Field::MarketValue),
    ("market_value", Field::MarketValue),
    ("market_price", Field::MarketValue),
    ("price", Field::MarketValue),
    ("worth", Field::MarketValue),
    ("total_value", Field::TotalValue),
    ("holding_value", Field::TotalValue),
    ("type", Field::TypeLine),
    ("type_line", Field::TypeLine),
    ("types", Field::TypeLine),
    ("card_type", Field::TypeLine),
    ("color", Field::ColorIdentity),
    ("colors", Field::ColorIdentity),
    ("color_identity", Field::ColorIdentity),
    ("identity", Field::ColorIdentity),
    ("text", Field::OracleText),
    ("oracle_text", Field::OracleText),
    ("rules_text", Field::OracleText),
    ("mana_value", Field::ManaValue),
    ("cmc", Field::ManaValue),
    ("mv", Field::ManaValue),
];

impl Field {
    /// Resolve a user-facing field name through the alias table.
    ///
    /// Legality fields are written `legality.<format>`, `legal_in.<format>`
    /// or `<format>_legality`.
    pub fn resolve(name: &str) -> Result<Field> {
        let key = name.trim().to_lowercase().replace([' ', '-'], "_");

        if let Some(format) = legality_format(&key) {
            if KNOWN_FORMATS.contains(&format) {
                return Ok(Field::Legality(format.to_string()));
            }
            return Err(QueryError::invalid(
                name,
                format!("unknown format '{format}'"),
            ));
        }

        FIELD_ALIASES
            .iter()
            .find(|(alias, _)| *alias == key)
            .map(|(_, field)| field.clone())
            .ok_or_else(|| QueryError::invalid(name, "unknown field"))
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            Field::Quantity
            | Field::PurchasePrice
            | Field::MarketValue
            | Field::TotalValue
            | Field::ManaValue => FieldKind::Number,
            Field::Condition | Field::Finish | Field::ColorIdentity => FieldKind::TextList,
            _ => FieldKind::Text,
        }
    }

    /// Whether the value lives in card metadata and needs a join
    pub fn is_metadata(&self) -> bool {
        matches!(
            self,
            Field::TypeLine
                | Field::ColorIdentity
                | Field::OracleText
                | Field::ManaValue
                | Field::Legality(_)
        )
    }

    /// Whether values are amounts of money
    pub fn is_monetary(&self) -> bool {
        matches!(self, Field::PurchasePrice | Field::MarketValue | Field::TotalValue)
    }

    /// Monetary per-copy values are weighted by quantity when aggregated
    pub fn is_per_copy(&self) -> bool {
        matches!(self, Field::PurchasePrice | Field::MarketValue)
    }

    /// Whether an entry can lack a value for this field
    pub fn is_nullable(&self) -> bool {
        !matches!(
            self,
            Field::Name | Field::SetCode | Field::CollectorNumber | Field::Quantity | Field::Finish
        )
    }

    /// Human label, e.g. "market value"
    pub fn label(&self) -> String {
        match self {
            Field::Legality(format) => format!("{format} legality"),
            other => other.key().replace('_', " "),
        }
    }

    /// Canonical name, e.g. "market_value" or "legality.modern"
    pub fn key(&self) -> String {
        let key = match self {
            Field::Name => "name",
            Field::SetCode => "set_code",
            Field::SetName => "set_name",
            Field::CollectorNumber => "collector_number",
            Field::Quantity => "quantity",
            Field::Condition => "condition",
            Field::Finish => "finish",
            Field::Rarity => "rarity",
            Field::Language => "language",
            Field::Binder => "binder",
            Field::PurchasePrice => "purchase_price",
            Field::MarketValue => "market_value",
            Field::TotalValue => "total_value",
            Field::TypeLine => "type_line",
            Field::ColorIdentity => "color_identity",
            Field::OracleText => "oracle_text",
            Field::ManaValue => "mana_value",
            Field::Legality(format) => return format!("legality.{format}"),
        };
        key.to_string()
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

fn legality_format(key: &str) -> Option<&str> {
    key.strip_prefix("legality.")
        .or_else(|| key.strip_prefix("legal_in."))
        .or_else(|| key.strip_prefix("legal."))
        .or_else(|| key.strip_suffix("_legality"))
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
}

impl CompareOp {
    pub fn parse(s: &str) -> Option<Self> {
        let key = s.trim().to_lowercase().replace([' ', '-'], "_");
        match key.as_str() {
            "eq" | "=" | "==" | "is" | "equals" => Some(CompareOp::Eq),
            "ne" | "!=" | "<>" | "is_not" | "not" => Some(CompareOp::Ne),
            "gt" | ">" | "over" | "above" | "more_than" | "greater_than" => Some(CompareOp::Gt),
            "gte" | ">=" | "at_least" | "min" => Some(CompareOp::Gte),
            "lt" | "<" | "under" | "below" | "less_than" => Some(CompareOp::Lt),
            "lte" | "<=" | "at_most" | "max" => Some(CompareOp::Lte),
            "contains" | "includes" | "has" | "like" => Some(CompareOp::Contains),
            _ => None,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::Contains => "contains",
        }
    }

    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            CompareOp::Gt | CompareOp::Gte | CompareOp::Lt | CompareOp::Lte
        )
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "asc" | "ascending" | "lowest" | "lowest_first" | "smallest" => Some(SortOrder::Ascending),
            "desc" | "descending" | "highest" | "highest_first" | "largest" | "top" => {
                Some(SortOrder::Descending)
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Ascending => "ascending",
            SortOrder::Descending => "descending",
        }
    }
}
