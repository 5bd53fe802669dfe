//! Filter compiler
//!
//! Turns the `where` argument of a field, a nested operator tree such as
//! `{ name: { eq: "xxx" }, or: [{ age: { gt: 3 } }] }`, into a normalized
//! [`Filter`]. The compiled filter is storage agnostic: backends translate it
//! into their own query language, and [`Filter::matches`] gives the reference
//! semantics used by the in-memory store.

use crate::core::error::ArgumentError;
use crate::core::schema::TypeDescriptor;
use serde::Serialize;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Comparison operators accepted inside a `where` leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operator {
    Eq,
    Neq,
    Gt,
    Lt,
    Gte,
    Lte,
    In,
    Nin,
}

impl Operator {
    pub const ALL: [Operator; 8] = [
        Operator::Eq,
        Operator::Neq,
        Operator::Gt,
        Operator::Lt,
        Operator::Gte,
        Operator::Lte,
        Operator::In,
        Operator::Nin,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "eq" => Some(Operator::Eq),
            "neq" => Some(Operator::Neq),
            "gt" => Some(Operator::Gt),
            "lt" => Some(Operator::Lt),
            "gte" => Some(Operator::Gte),
            "lte" => Some(Operator::Lte),
            "in" => Some(Operator::In),
            "nin" => Some(Operator::Nin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Neq => "neq",
            Operator::Gt => "gt",
            Operator::Lt => "lt",
            Operator::Gte => "gte",
            Operator::Lte => "lte",
            Operator::In => "in",
            Operator::Nin => "nin",
        }
    }

    /// Operators whose operand is a list of values
    pub fn takes_list(&self) -> bool {
        matches!(self, Operator::In | Operator::Nin)
    }

    /// Operators that need an ordering on the field's values
    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            Operator::Gt | Operator::Lt | Operator::Gte | Operator::Lte
        )
    }
}

/// The operators applied to a single field, at most one value each
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FieldOperators {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eq: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub neq: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gt: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lt: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gte: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lte: Option<Value>,
    #[serde(rename = "in", skip_serializing_if = "Option::is_none")]
    pub in_: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nin: Option<Value>,
}

impl FieldOperators {
    fn slot(&mut self, op: Operator) -> &mut Option<Value> {
        match op {
            Operator::Eq => &mut self.eq,
            Operator::Neq => &mut self.neq,
            Operator::Gt => &mut self.gt,
            Operator::Lt => &mut self.lt,
            Operator::Gte => &mut self.gte,
            Operator::Lte => &mut self.lte,
            Operator::In => &mut self.in_,
            Operator::Nin => &mut self.nin,
        }
    }

    pub fn get(&self, op: Operator) -> Option<&Value> {
        match op {
            Operator::Eq => self.eq.as_ref(),
            Operator::Neq => self.neq.as_ref(),
            Operator::Gt => self.gt.as_ref(),
            Operator::Lt => self.lt.as_ref(),
            Operator::Gte => self.gte.as_ref(),
            Operator::Lte => self.lte.as_ref(),
            Operator::In => self.in_.as_ref(),
            Operator::Nin => self.nin.as_ref(),
        }
    }

    /// Set an operator, replacing any previous value
    pub fn set(&mut self, op: Operator, value: Value) {
        *self.slot(op) = Some(value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (Operator, &Value)> {
        Operator::ALL
            .into_iter()
            .filter_map(|op| self.get(op).map(|value| (op, value)))
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    fn matches(&self, actual: &Value) -> bool {
        self.iter().all(|(op, expected)| match op {
            Operator::Eq => values_equal(actual, expected),
            Operator::Neq => !values_equal(actual, expected),
            Operator::Gt => compare_values(actual, expected) == Some(Ordering::Greater),
            Operator::Lt => compare_values(actual, expected) == Some(Ordering::Less),
            Operator::Gte => matches!(
                compare_values(actual, expected),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Operator::Lte => matches!(
                compare_values(actual, expected),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Operator::In => expected
                .as_array()
                .is_some_and(|list| list.iter().any(|v| values_equal(actual, v))),
            Operator::Nin => expected
                .as_array()
                .is_none_or(|list| !list.iter().any(|v| values_equal(actual, v))),
        })
    }
}

/// A normalized, storage agnostic filter
///
/// Fields are kept in a sorted map so that compiling the same argument tree
/// always yields the same value and the same serialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Filter {
    #[serde(flatten)]
    pub fields: BTreeMap<String, FieldOperators>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub and: Vec<Filter>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub or: Vec<Filter>,
}

impl Filter {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.and.is_empty() && self.or.is_empty()
    }

    pub fn field(&self, name: &str) -> Option<&FieldOperators> {
        self.fields.get(name)
    }

    /// Constrain `field` with `op`, overriding the same operator if present
    pub fn constrain(&mut self, field: &str, op: Operator, value: Value) {
        self.fields
            .entry(field.to_string())
            .or_default()
            .set(op, value);
    }

    /// Logical AND of two filters
    pub fn and_with(self, other: Filter) -> Filter {
        match (self.is_empty(), other.is_empty()) {
            (true, _) => other,
            (_, true) => self,
            _ => Filter {
                and: vec![self, other],
                ..Default::default()
            },
        }
    }

    /// Reference semantics of the filter against a document
    pub fn matches(&self, document: &Map<String, Value>) -> bool {
        let fields_match = self.fields.iter().all(|(name, ops)| {
            let actual = document.get(name).unwrap_or(&Value::Null);
            ops.matches(actual)
        });
        fields_match
            && self.and.iter().all(|f| f.matches(document))
            && (self.or.is_empty() || self.or.iter().any(|f| f.matches(document)))
    }
}

/// Compile a `where` argument tree against the fields of `descriptor`
pub fn compile_where(where_arg: &Value, descriptor: &TypeDescriptor) -> Result<Filter, ArgumentError> {
    let tree = match where_arg {
        Value::Null => return Ok(Filter::default()),
        Value::Object(tree) => tree,
        other => {
            return Err(ArgumentError::InvalidValue {
                argument: "where".to_string(),
                message: format!("expected an object, got {}", other),
            });
        }
    };

    let mut filter = Filter::default();
    for (key, value) in tree {
        match key.as_str() {
            "and" | "or" => {
                let branches = compile_branches(key, value, descriptor)?;
                if key == "and" {
                    filter.and.extend(branches.into_iter().filter(|f| !f.is_empty()));
                } else if !branches.iter().any(Filter::is_empty) {
                    // an empty branch matches every document, and so does the `or`
                    filter.or.extend(branches);
                }
            }
            field => {
                if !descriptor.has_field(field) {
                    return Err(ArgumentError::UnknownField {
                        type_name: descriptor.name.clone(),
                        field: field.to_string(),
                    });
                }
                let ops = compile_operators(field, value)?;
                if !ops.is_empty() {
                    filter.fields.insert(field.to_string(), ops);
                }
            }
        }
    }
    Ok(filter)
}

fn compile_branches(
    key: &str,
    value: &Value,
    descriptor: &TypeDescriptor,
) -> Result<Vec<Filter>, ArgumentError> {
    let Value::Array(items) = value else {
        return Err(ArgumentError::InvalidValue {
            argument: format!("where.{}", key),
            message: "expected a list of filters".to_string(),
        });
    };
    items
        .iter()
        .map(|item| compile_where(item, descriptor))
        .collect()
}

fn compile_operators(field: &str, value: &Value) -> Result<FieldOperators, ArgumentError> {
    let operators = match value {
        Value::Null => return Ok(FieldOperators::default()),
        Value::Object(operators) => operators,
        other => {
            return Err(ArgumentError::InvalidValue {
                argument: format!("where.{}", field),
                message: format!("expected an operator object, got {}", other),
            });
        }
    };

    let mut ops = FieldOperators::default();
    for (name, operand) in operators {
        let op = Operator::parse(name).ok_or_else(|| ArgumentError::UnsupportedOperator {
            field: field.to_string(),
            operator: name.clone(),
        })?;
        if op.takes_list() && !operand.is_array() {
            return Err(ArgumentError::InvalidValue {
                argument: format!("where.{}.{}", field, name),
                message: "expected a list".to_string(),
            });
        }
        ops.set(op, operand.clone());
    }
    Ok(ops)
}

/// Total-ish ordering between JSON values of compatible kinds.
///
/// Strings that hold a number compare numerically against numbers, since
/// cursors travel as strings.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Number(x), Value::String(y)) => x.as_f64()?.partial_cmp(&y.parse::<f64>().ok()?),
        (Value::String(x), Value::Number(y)) => x.parse::<f64>().ok()?.partial_cmp(&y.as_f64()?),
        _ => None,
    }
}

pub fn values_equal(a: &Value, b: &Value) -> bool {
    match compare_values(a, b) {
        Some(ordering) => ordering == Ordering::Equal,
        None => a == b,
    }
}
