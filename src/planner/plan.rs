//! Plans: ordered, typed operations with a declared result shape.
//!
//! A plan is plain data. It can be logged, serialized and executed again with
//! the same result against the same collection and metadata.

use super::fields::{CompareOp, Field, FieldKind, SortOrder};
use super::intent::AggregateFn;
use crate::models::{Currency, DeckArchetype};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Shape of the data flowing between operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    Entries,
    /// Entries with their card metadata joined
    EnrichedEntries,
    Scalar,
    ArchetypeScores,
}

impl Shape {
    fn is_rows(&self) -> bool {
        matches!(self, Shape::Entries | Shape::EnrichedEntries)
    }
}

/// A typed comparison value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    Number(f64),
    Text(String),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Number(n) => write!(f, "{n}"),
            Operand::Text(s) => write!(f, "'{s}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub field: Field,
    pub op: CompareOp,
    pub value: Operand,
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field, self.op.symbol(), self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Attach card metadata for the listed fields
    Join { fields: Vec<Field> },
    /// Keep rows satisfying every predicate
    Filter { predicates: Vec<Predicate> },
    Aggregate {
        function: AggregateFn,
        field: Option<Field>,
    },
    ListBy {
        field: Field,
        order: SortOrder,
        limit: Option<usize>,
    },
    OverlapScore {
        archetypes: Vec<DeckArchetype>,
        min_score: Option<f64>,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Join { .. } => "join",
            Operation::Filter { .. } => "filter",
            Operation::Aggregate { .. } => "aggregate",
            Operation::ListBy { .. } => "list_by",
            Operation::OverlapScore { .. } => "overlap_score",
        }
    }

    /// One-line description for provenance
    pub fn describe(&self) -> String {
        match self {
            Operation::Join { fields } => {
                let fields: Vec<String> = fields.iter().map(Field::key).collect();
                format!("join metadata({})", fields.join(", "))
            }
            Operation::Filter { predicates } => {
                let predicates: Vec<String> = predicates.iter().map(|p| p.to_string()).collect();
                format!("filter({})", predicates.join(" AND "))
            }
            Operation::Aggregate { function, field } => match field {
                Some(field) => format!("{}({})", function.as_str(), field),
                None => format!("{}(*)", function.as_str()),
            },
            Operation::ListBy { field, order, limit } => match limit {
                Some(limit) => format!("list_by({} {}, limit {})", field, order.as_str(), limit),
                None => format!("list_by({} {})", field, order.as_str()),
            },
            Operation::OverlapScore { archetypes, min_score } => {
                let names: Vec<&str> = archetypes.iter().map(|a| a.name.as_str()).collect();
                match min_score {
                    Some(min) => format!("overlap_score({}; min {})", names.join(", "), min),
                    None => format!("overlap_score({})", names.join(", ")),
                }
            }
        }
    }

    /// Output shape for `input`, or why this operation cannot take it
    fn output_shape(&self, input: Shape, joined: &BTreeSet<Field>) -> Result<Shape, String> {
        if !input.is_rows() {
            return Err(format!("expects card entries, got {input:?}"));
        }
        match self {
            Operation::Join { fields } => {
                if input != Shape::Entries {
                    return Err("metadata is already joined".to_string());
                }
                if let Some(field) = fields.iter().find(|f| !f.is_metadata()) {
                    return Err(format!("'{field}' is not a metadata field"));
                }
                Ok(Shape::EnrichedEntries)
            }
            Operation::Filter { predicates } => {
                for predicate in predicates {
                    require_field(&predicate.field, joined)?;
                    check_operator(predicate)?;
                }
                Ok(input)
            }
            Operation::ListBy { field, .. } => {
                require_field(field, joined)?;
                if field.kind() == FieldKind::TextList {
                    return Err(format!("cannot sort by list field '{field}'"));
                }
                Ok(input)
            }
            Operation::Aggregate { function, field } => {
                if let Some(field) = field {
                    require_field(field, joined)?;
                }
                match (function, field) {
                    (AggregateFn::Count, _) => Ok(Shape::Scalar),
                    (_, Some(field)) if field.kind() == FieldKind::Number => Ok(Shape::Scalar),
                    (function, _) => Err(format!("{} needs a numeric field", function.as_str())),
                }
            }
            Operation::OverlapScore { min_score, .. } => match min_score {
                Some(min) if !(0.0..=1.0).contains(min) => {
                    Err(format!("min_score {min} is outside [0, 1]"))
                }
                _ => Ok(Shape::ArchetypeScores),
            },
        }
    }
}

fn require_field(field: &Field, joined: &BTreeSet<Field>) -> Result<(), String> {
    if field.is_metadata() && !joined.contains(field) {
        return Err(format!("field '{field}' is not in the input shape"));
    }
    Ok(())
}

fn check_operator(predicate: &Predicate) -> Result<(), String> {
    let kind = predicate.field.kind();
    let ok = match (&predicate.value, kind) {
        (Operand::Number(_), FieldKind::Number) => predicate.op != CompareOp::Contains,
        (Operand::Text(_), FieldKind::Text | FieldKind::TextList) => !predicate.op.is_ordering(),
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(format!("predicate '{predicate}' does not type-check"))
    }
}

/// Output of the planner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub operations: Vec<Operation>,
    pub expected: Shape,
    /// Currency monetary fields are read and reported in
    pub currency: Currency,
    /// Stale or missing metadata fails the query
    #[serde(default)]
    pub must_be_current: bool,
}

impl Plan {
    /// Walk the operations, checking that each accepts its input shape and
    /// that the final shape is the declared one
    pub fn check(&self) -> Result<Shape, String> {
        let mut shape = Shape::Entries;
        let mut joined = BTreeSet::new();
        for (i, operation) in self.operations.iter().enumerate() {
            shape = operation
                .output_shape(shape, &joined)
                .map_err(|e| format!("operation {} ({}): {}", i, operation.name(), e))?;
            if let Operation::Join { fields } = operation {
                joined.extend(fields.iter().cloned());
            }
        }
        if shape != self.expected {
            return Err(format!(
                "plan produces {:?} but declares {:?}",
                shape, self.expected
            ));
        }
        Ok(shape)
    }

    pub fn describe(&self) -> Vec<String> {
        self.operations.iter().map(Operation::describe).collect()
    }
}
