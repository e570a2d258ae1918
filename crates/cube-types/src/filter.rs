//! Range filters, predicates, and field projections.
//!
//! A query scan is described by a [`RangeFilter`] (the half-open time
//! window plus any predicates a compiled expression added) and a
//! [`Projection`] (which parts of the payload to return). Backends either
//! translate these into their native query language or evaluate them
//! directly with a [`PredicateMatcher`].

use std::cmp::Ordering;
use std::collections::BTreeSet;

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::ValidationError;
use crate::time::Timestamp;

/// Path to a field inside an event's `data` payload (`["user", "id"]`).
pub type FieldPath = Vec<String>;

/// Comparison applied by a [`Predicate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// Equal to the literal.
    Eq,
    /// Not equal to the literal (a missing field matches).
    Ne,
    /// Strictly less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Strictly greater than.
    Gt,
    /// Greater than or equal.
    Ge,
    /// String field matches a regular expression.
    Regex,
    /// Equal to one of the literals in an array.
    In,
}

impl CompareOp {
    /// Look up an operator by its expression name (`eq`, `re`, ...).
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "eq" => Some(Self::Eq),
            "ne" => Some(Self::Ne),
            "lt" => Some(Self::Lt),
            "le" => Some(Self::Le),
            "gt" => Some(Self::Gt),
            "ge" => Some(Self::Ge),
            "re" => Some(Self::Regex),
            "in" => Some(Self::In),
            _ => None,
        }
    }

    /// The operator's expression name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::Regex => "re",
            Self::In => "in",
        }
    }
}

/// A single condition on a payload field.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    /// Field inside `data`.
    pub path: FieldPath,
    /// Comparison to apply.
    pub op: CompareOp,
    /// Literal operand (a string pattern for `re`, an array for `in`).
    pub value: Value,
}

impl Predicate {
    /// Build a predicate, checking that the operand suits the operator.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidPattern`] if a `re` operand is not
    /// a string or does not compile, or an `in` operand is not an array.
    pub fn new(path: FieldPath, op: CompareOp, value: Value) -> Result<Self, ValidationError> {
        let predicate = Self { path, op, value };
        // Compile once up front so bad patterns fail at expression time.
        Rule::compile(&predicate)?;
        Ok(predicate)
    }
}

/// The data a storage scan must satisfy: `start <= time < stop` and every
/// predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeFilter {
    /// Inclusive lower bound.
    pub start: Timestamp,
    /// Exclusive upper bound.
    pub stop: Timestamp,
    /// Additional payload predicates, all of which must hold.
    pub predicates: Vec<Predicate>,
}

impl RangeFilter {
    /// A filter over `[start, stop)` with no predicates.
    pub const fn new(start: Timestamp, stop: Timestamp) -> Self {
        Self {
            start,
            stop,
            predicates: Vec::new(),
        }
    }

    /// Add a predicate.
    pub fn push(&mut self, predicate: Predicate) {
        self.predicates.push(predicate);
    }

    /// The same predicates over a different window.
    #[must_use]
    pub fn window(&self, start: Timestamp, stop: Timestamp) -> Self {
        Self {
            start,
            stop,
            predicates: self.predicates.clone(),
        }
    }

    /// Whether `time` falls in `[start, stop)`.
    pub fn contains_time(&self, time: Timestamp) -> bool {
        self.start <= time && time < self.stop
    }

    /// Whether the window is empty (`start >= stop`).
    pub fn is_empty_window(&self) -> bool {
        self.start >= self.stop
    }

    /// Compile the predicates for in-process evaluation.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidPattern`] if a predicate operand is
    /// malformed.
    pub fn matcher(&self) -> Result<PredicateMatcher, ValidationError> {
        let rules = self
            .predicates
            .iter()
            .map(|p| Ok((p.path.clone(), Rule::compile(p)?)))
            .collect::<Result<Vec<_>, ValidationError>>()?;
        Ok(PredicateMatcher { rules })
    }
}

/// Predicates compiled for evaluation against payloads.
#[derive(Debug, Clone)]
pub struct PredicateMatcher {
    rules: Vec<(FieldPath, Rule)>,
}

impl PredicateMatcher {
    /// Whether `data` satisfies every predicate.
    pub fn matches(&self, data: &Value) -> bool {
        self.rules
            .iter()
            .all(|(path, rule)| rule.matches(lookup(data, path)))
    }
}

#[derive(Debug, Clone)]
enum Rule {
    Compare(CompareOp, Value),
    Regex(Regex),
    In(Vec<Value>),
}

impl Rule {
    fn compile(predicate: &Predicate) -> Result<Self, ValidationError> {
        match predicate.op {
            CompareOp::Regex => {
                let Value::String(pattern) = &predicate.value else {
                    return Err(ValidationError::InvalidPattern {
                        pattern: predicate.value.to_string(),
                        reason: "pattern must be a string".to_owned(),
                    });
                };
                Regex::new(pattern)
                    .map(Self::Regex)
                    .map_err(|e| ValidationError::InvalidPattern {
                        pattern: pattern.clone(),
                        reason: e.to_string(),
                    })
            }
            CompareOp::In => match &predicate.value {
                Value::Array(values) => Ok(Self::In(values.clone())),
                other => Err(ValidationError::InvalidPattern {
                    pattern: other.to_string(),
                    reason: "in() expects an array".to_owned(),
                }),
            },
            op => Ok(Self::Compare(op, predicate.value.clone())),
        }
    }

    fn matches(&self, field: Option<&Value>) -> bool {
        match (self, field) {
            (Self::Compare(CompareOp::Ne, _), None) => true,
            (_, None) => false,
            (Self::Compare(op, literal), Some(v)) => match op {
                CompareOp::Eq => values_equal(v, literal),
                CompareOp::Ne => !values_equal(v, literal),
                CompareOp::Lt => compare_values(v, literal) == Some(Ordering::Less),
                CompareOp::Le => matches!(
                    compare_values(v, literal),
                    Some(Ordering::Less | Ordering::Equal)
                ),
                CompareOp::Gt => compare_values(v, literal) == Some(Ordering::Greater),
                CompareOp::Ge => matches!(
                    compare_values(v, literal),
                    Some(Ordering::Greater | Ordering::Equal)
                ),
                // Compiled into their own rule variants.
                CompareOp::Regex | CompareOp::In => false,
            },
            (Self::Regex(re), Some(Value::String(s))) => re.is_match(s),
            (Self::Regex(_), Some(_)) => false,
            (Self::In(values), Some(v)) => values.iter().any(|candidate| values_equal(v, candidate)),
        }
    }
}

/// Fetch the value at `path` inside `data`.
pub fn lookup<'a>(data: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter()
        .try_fold(data, |value, segment| value.get(segment.as_str()))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    a == b || compare_values(a, b) == Some(Ordering::Equal)
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Which payload fields a scan returns.
///
/// The event time is always returned. With no declared fields the whole
/// payload is returned; otherwise only the declared paths are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection {
    fields: BTreeSet<FieldPath>,
}

impl Projection {
    /// A projection returning the time and the whole payload.
    pub const fn new() -> Self {
        Self {
            fields: BTreeSet::new(),
        }
    }

    /// Request a payload field.
    pub fn add(&mut self, path: FieldPath) {
        self.fields.insert(path);
    }

    /// The declared payload fields, in path order.
    pub fn fields(&self) -> impl Iterator<Item = &FieldPath> {
        self.fields.iter()
    }

    /// Whether the whole payload is returned.
    pub fn is_whole_payload(&self) -> bool {
        self.fields.is_empty()
    }

    /// Apply the projection to a payload.
    pub fn project(&self, data: &Value) -> Value {
        if self.fields.is_empty() {
            return data.clone();
        }
        let mut out = Value::Object(Map::new());
        for path in &self.fields {
            if let Some(value) = lookup(data, path) {
                insert_path(&mut out, path, value.clone());
            }
        }
        out
    }
}

fn insert_path(target: &mut Value, path: &[String], value: Value) {
    let Some((first, rest)) = path.split_first() else {
        return;
    };
    let Value::Object(map) = target else {
        return;
    };
    if rest.is_empty() {
        map.insert(first.clone(), value);
        return;
    }
    let child = map
        .entry(first.clone())
        .or_insert_with(|| Value::Object(Map::new()));
    insert_path(child, rest, value);
}
