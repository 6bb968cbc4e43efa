//! Pre-classified request: a closed intent kind plus loosely typed parameters
//! as delivered by the language-understanding collaborator.

use serde::{Deserialize, Serialize};

/// Aggregation function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFn {
    Sum,
    Count,
    Avg,
}

impl AggregateFn {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateFn::Sum => "sum",
            AggregateFn::Count => "count",
            AggregateFn::Avg => "avg",
        }
    }
}

/// Recognized query kinds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Intent {
    /// Cards matching all predicates
    Filter,
    Aggregate { function: AggregateFn },
    ListBy {
        field: String,
        #[serde(default)]
        order: Option<String>,
    },
    /// Ownership overlap against the named archetypes, or all of them when empty
    DeckOverlap {
        #[serde(default)]
        archetypes: Vec<String>,
    },
}

/// A parameter value before it is checked against its field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Text(s.to_string())
    }
}

impl From<f64> for ParamValue {
    fn from(n: f64) -> Self {
        ParamValue::Number(n)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Bool(b)
    }
}

/// One requested condition, e.g. `{ "field": "value", "op": "gt", "value": 10 }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredicateSpec {
    pub field: String,
    #[serde(default)]
    pub op: Option<String>,
    #[serde(default)]
    pub value: Option<ParamValue>,
}

impl PredicateSpec {
    pub fn new(field: &str, op: &str, value: impl Into<ParamValue>) -> Self {
        Self {
            field: field.to_string(),
            op: Some(op.to_string()),
            value: Some(value.into()),
        }
    }
}

/// Parameters accompanying an intent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Parameters {
    /// Combined with logical AND, in the given order
    pub predicates: Vec<PredicateSpec>,
    /// Field for aggregate intents
    pub field: Option<String>,
    pub limit: Option<usize>,
    /// Minimum ownership score for deck overlap
    pub min_score: Option<f64>,
    /// Fail instead of using stale or missing card metadata
    pub must_be_current: bool,
}

impl Parameters {
    pub fn with_predicate(mut self, predicate: PredicateSpec) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn with_field(mut self, field: &str) -> Self {
        self.field = Some(field.to_string());
        self
    }
}

/// Output of the classifier boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedQuery {
    pub intent: Intent,
    #[serde(default)]
    pub parameters: Parameters,
}
