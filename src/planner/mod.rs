//! Query planner: turns a classified intent and its parameters into a
//! type-checked [`Plan`].
//!
//! Planning is stateless. Every user-facing name goes through the alias table,
//! every value is converted to its field's type, and vague qualifiers like
//! "expensive" are rejected instead of being given a made-up threshold.

mod fields;
mod intent;
mod plan;

pub use fields::{CompareOp, Field, FieldKind, SortOrder};
pub use intent::{AggregateFn, ClassifiedQuery, Intent, ParamValue, Parameters, PredicateSpec};
pub use plan::{Operand, Operation, Plan, Predicate, Shape};

use crate::archetypes::ArchetypeLibrary;
use crate::error::{QueryError, Result};
use crate::import::parse_amount;
use crate::models::{canonical_set_code, Condition, Currency, DeckArchetype, Finish};

/// Qualifiers that imply a threshold nobody stated
const VAGUE_QUALIFIERS: &[&str] = &[
    "expensive",
    "cheap",
    "valuable",
    "pricey",
    "costly",
    "inexpensive",
    "worthless",
    "high",
    "low",
    "many",
    "few",
    "a lot",
    "lots",
    "big",
    "small",
];

const LEGALITY_VALUES: &[&str] = &["legal", "not_legal", "restricted", "banned"];

pub struct QueryPlanner<'a> {
    archetypes: &'a ArchetypeLibrary,
    currency: Currency,
}

impl<'a> QueryPlanner<'a> {
    pub fn new(archetypes: &'a ArchetypeLibrary, currency: Currency) -> Self {
        Self {
            archetypes,
            currency,
        }
    }

    /// Build and type-check a plan.
    ///
    /// Fails with `InvalidQuery` naming the offending parameter, or with
    /// `AmbiguousQuery` when a comparison has no usable threshold.
    pub fn plan(&self, intent: &Intent, params: &Parameters) -> Result<Plan> {
        let predicates = params
            .predicates
            .iter()
            .enumerate()
            .map(|(i, spec)| resolve_predicate(i, spec))
            .collect::<Result<Vec<_>>>()?;

        if params.limit.is_some() && !matches!(intent, Intent::ListBy { .. }) {
            return Err(QueryError::invalid("limit", "only applies to list_by queries"));
        }
        if params.min_score.is_some() && !matches!(intent, Intent::DeckOverlap { .. }) {
            return Err(QueryError::invalid("min_score", "only applies to deck_overlap queries"));
        }
        if params.field.is_some() && !matches!(intent, Intent::Aggregate { .. }) {
            return Err(QueryError::invalid("field", "only applies to aggregate queries"));
        }

        let terminal = match intent {
            Intent::Filter => None,
            Intent::Aggregate { function } => Some(self.plan_aggregate(*function, params)?),
            Intent::ListBy { field, order } => Some(plan_list_by(field, order.as_deref(), params.limit)?),
            Intent::DeckOverlap { archetypes } => Some(self.plan_overlap(archetypes, params.min_score)?),
        };

        // metadata fields in order of first use
        let mut join_fields: Vec<Field> = Vec::new();
        let used = predicates.iter().map(|p| &p.field).chain(terminal_field(terminal.as_ref()));
        for field in used {
            if field.is_metadata() && !join_fields.contains(field) {
                join_fields.push(field.clone());
            }
        }

        let mut operations = Vec::new();
        let mut expected = Shape::Entries;
        if !join_fields.is_empty() {
            operations.push(Operation::Join { fields: join_fields });
            expected = Shape::EnrichedEntries;
        }
        if !predicates.is_empty() {
            operations.push(Operation::Filter { predicates });
        }
        if let Some(terminal) = terminal {
            expected = match terminal {
                Operation::Aggregate { .. } => Shape::Scalar,
                Operation::OverlapScore { .. } => Shape::ArchetypeScores,
                _ => expected,
            };
            operations.push(terminal);
        }

        let plan = Plan {
            operations,
            expected,
            currency: self.currency,
            must_be_current: params.must_be_current,
        };
        plan.check()
            .map_err(|reason| QueryError::invalid("plan", reason))?;

        log::debug!("Planned {:?} as: {}", intent, plan.describe().join(" -> "));
        Ok(plan)
    }

    fn plan_aggregate(&self, function: AggregateFn, params: &Parameters) -> Result<Operation> {
        let field = params.field.as_deref().map(Field::resolve).transpose()?;
        match (&function, &field) {
            (AggregateFn::Count, _) => {}
            (_, None) => {
                return Err(QueryError::invalid(
                    "field",
                    format!("{} needs a numeric field", function.as_str()),
                ))
            }
            (_, Some(f)) if f.kind() != FieldKind::Number => {
                return Err(QueryError::invalid(
                    f.key(),
                    format!("{} needs a numeric field", function.as_str()),
                ))
            }
            _ => {}
        }
        Ok(Operation::Aggregate { function, field })
    }

    fn plan_overlap(&self, names: &[String], min_score: Option<f64>) -> Result<Operation> {
        if let Some(min) = min_score {
            if !(0.0..=1.0).contains(&min) {
                return Err(QueryError::invalid(
                    "min_score",
                    format!("must be between 0 and 1, got {min}"),
                ));
            }
        }

        let archetypes: Vec<DeckArchetype> = if names.is_empty() {
            self.archetypes.iter().cloned().collect()
        } else {
            names
                .iter()
                .map(|name| {
                    self.archetypes.get(name).cloned().ok_or_else(|| {
                        QueryError::invalid("archetypes", format!("unknown archetype '{name}'"))
                    })
                })
                .collect::<Result<_>>()?
        };
        if archetypes.is_empty() {
            return Err(QueryError::invalid("archetypes", "no deck archetypes are loaded"));
        }

        Ok(Operation::OverlapScore {
            archetypes,
            min_score,
        })
    }
}

fn terminal_field(terminal: Option<&Operation>) -> Option<&Field> {
    match terminal? {
        Operation::Aggregate { field, .. } => field.as_ref(),
        Operation::ListBy { field, .. } => Some(field),
        _ => None,
    }
}

fn plan_list_by(field: &str, order: Option<&str>, limit: Option<usize>) -> Result<Operation> {
    let field = Field::resolve(field)?;
    if field.kind() == FieldKind::TextList {
        return Err(QueryError::invalid(field.key(), "cannot sort by a list field"));
    }
    let order = match order {
        Some(order) => SortOrder::parse(order).ok_or_else(|| {
            QueryError::invalid("order", format!("unrecognized sort order '{order}'"))
        })?,
        // numbers read "top first", text reads A to Z
        None if field.kind() == FieldKind::Number => SortOrder::Descending,
        None => SortOrder::Ascending,
    };
    if limit == Some(0) {
        return Err(QueryError::invalid("limit", "must be at least 1"));
    }
    Ok(Operation::ListBy { field, order, limit })
}

fn is_vague(s: &str) -> bool {
    let s = s.trim().to_lowercase().replace('_', " ");
    VAGUE_QUALIFIERS.contains(&s.as_str())
}

fn resolve_predicate(index: usize, spec: &PredicateSpec) -> Result<Predicate> {
    let field = Field::resolve(&spec.field)?;
    let kind = field.kind();
    let op_param = format!("predicates[{index}].op");
    let value_param = format!("predicates[{index}].value");

    if let Some(op) = spec.op.as_deref().filter(|op| is_vague(op)) {
        return Err(QueryError::ambiguous(
            &spec.field,
            format!("'{op}' has no defined threshold; give an explicit value"),
        ));
    }
    if let Some(ParamValue::Text(text)) = &spec.value {
        if kind == FieldKind::Number && is_vague(text) {
            return Err(QueryError::ambiguous(
                &spec.field,
                format!("'{text}' has no defined threshold; give an explicit value"),
            ));
        }
    }

    let op = match spec.op.as_deref() {
        Some(op) => CompareOp::parse(op).ok_or_else(|| {
            QueryError::invalid(&op_param, format!("unrecognized comparison operator '{op}'"))
        })?,
        None => CompareOp::Eq,
    };

    let Some(value) = &spec.value else {
        return Err(if kind == FieldKind::Number {
            QueryError::ambiguous(
                &spec.field,
                "comparison has no threshold; give an explicit value",
            )
        } else {
            QueryError::invalid(&value_param, "missing value")
        });
    };

    match kind {
        FieldKind::Number if op == CompareOp::Contains => {
            return Err(QueryError::invalid(
                &op_param,
                format!("'contains' does not apply to numeric field '{}'", field.key()),
            ))
        }
        FieldKind::Text | FieldKind::TextList if op.is_ordering() => {
            return Err(QueryError::invalid(
                &op_param,
                format!("'{}' needs a numeric field, '{}' is text", op.symbol(), field.key()),
            ))
        }
        _ => {}
    }

    let value = match kind {
        FieldKind::Number => Operand::Number(number_operand(value, &value_param)?),
        FieldKind::Text | FieldKind::TextList => {
            Operand::Text(text_operand(&field, value, &value_param)?)
        }
    };

    if matches!(field, Field::Legality(_)) && !matches!(op, CompareOp::Eq | CompareOp::Ne) {
        return Err(QueryError::invalid(
            &op_param,
            "legality only supports equality comparisons",
        ));
    }

    Ok(Predicate { field, op, value })
}

fn number_operand(value: &ParamValue, param: &str) -> Result<f64> {
    let number = match value {
        ParamValue::Number(n) => Some(*n),
        ParamValue::Text(text) => parse_amount(text),
        ParamValue::Bool(_) => None,
    };
    match number {
        Some(n) if n.is_finite() => Ok(n),
        _ => Err(QueryError::invalid(
            param,
            format!("expected a number, got {}", describe_value(value)),
        )),
    }
}

fn text_operand(field: &Field, value: &ParamValue, param: &str) -> Result<String> {
    let text = match (field, value) {
        (Field::Finish, ParamValue::Bool(true)) => return Ok(Finish::Foil.as_str().to_string()),
        (Field::Finish, ParamValue::Bool(false)) => return Ok(Finish::Nonfoil.as_str().to_string()),
        (_, ParamValue::Text(text)) => text.trim().to_string(),
        (_, ParamValue::Number(n)) if n.fract() == 0.0 && n.is_finite() => format!("{}", *n as i64),
        (_, ParamValue::Number(n)) => n.to_string(),
        (_, ParamValue::Bool(_)) => {
            return Err(QueryError::invalid(
                param,
                format!("expected text for '{}', got a boolean", field.key()),
            ))
        }
    };
    if text.is_empty() {
        return Err(QueryError::invalid(param, "is empty"));
    }

    let unknown = |what: &str| {
        QueryError::invalid(param, format!("unknown {what} '{text}'"))
    };
    match field {
        Field::Condition => Condition::parse(&text)
            .map(|c| c.as_str().to_string())
            .ok_or_else(|| unknown("condition")),
        Field::Finish => Finish::parse(&text)
            .map(|f| f.as_str().to_string())
            .ok_or_else(|| unknown("finish")),
        Field::SetCode => Ok(canonical_set_code(&text)),
        Field::Legality(_) => {
            let status = text.to_lowercase().replace([' ', '-'], "_");
            if LEGALITY_VALUES.contains(&status.as_str()) {
                Ok(status)
            } else {
                Err(unknown("legality"))
            }
        }
        _ => Ok(text),
    }
}

fn describe_value(value: &ParamValue) -> String {
    match value {
        ParamValue::Bool(b) => b.to_string(),
        ParamValue::Number(n) => n.to_string(),
        ParamValue::Text(s) => format!("'{s}'"),
    }
}

#[cfg(test)]
#[path = "planner_tests.rs"]
mod tests;
