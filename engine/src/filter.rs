//! Structured query filters.
//!
//! A [`Filter`] is a boolean predicate tree over record fields. It serializes
//! to the Mongo-style JSON the remote accepts in its `mdbFilter` list
//! parameter, can be parsed back from that JSON, and can be evaluated
//! against a record in-process.
//!
//! | Filter | JSON |
//! |--------|------|
//! | `Eq(f, v)` | `{"f": v}` |
//! | `Ne(f, v)` | `{"f": {"$ne": v}}` |
//! | `In(f, vs)` | `{"f": {"$in": vs}}` |
//! | `Exists(f, b)` | `{"f": {"$exists": b}}` |
//! | `Gte(f, v)` / `Lte(f, v)` | `{"f": {"$gte": v}}` / `{"f": {"$lte": v}}` |
//! | `ElemMatch(f, sub)` | `{"f": {"$elemMatch": sub}}` |
//! | `And(fs)` / `Or(fs)` | `{"$and": [...]}` / `{"$or": [...]}` |

use std::cmp::Ordering;

use serde_json::{json, Map, Value};

use crate::{Error, Result};

/// A predicate over record fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Ne(String, Value),
    In(String, Vec<Value>),
    Exists(String, bool),
    Gte(String, Value),
    Lte(String, Value),
    /// Some element of an array field satisfies the nested filter
    ElemMatch(String, Box<Filter>),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Ne(field.into(), value.into())
    }

    pub fn one_of(field: impl Into<String>, values: Vec<Value>) -> Self {
        Filter::In(field.into(), values)
    }

    pub fn exists(field: impl Into<String>, present: bool) -> Self {
        Filter::Exists(field.into(), present)
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gte(field.into(), value.into())
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lte(field.into(), value.into())
    }

    pub fn elem_match(field: impl Into<String>, filter: Filter) -> Self {
        Filter::ElemMatch(field.into(), Box::new(filter))
    }

    /// Conjunction; a single operand is returned unwrapped.
    pub fn all(mut filters: Vec<Filter>) -> Self {
        if filters.len() == 1 {
            filters.remove(0)
        } else {
            Filter::And(filters)
        }
    }

    /// Disjunction; a single operand is returned unwrapped.
    pub fn any(mut filters: Vec<Filter>) -> Self {
        if filters.len() == 1 {
            filters.remove(0)
        } else {
            Filter::Or(filters)
        }
    }

    /// Mongo-style JSON form.
    pub fn to_json(&self) -> Value {
        match self {
            Filter::Eq(field, value) => single(field, value.clone()),
            Filter::Ne(field, value) => single(field, json!({ "$ne": value })),
            Filter::In(field, values) => single(field, json!({ "$in": values })),
            Filter::Exists(field, present) => single(field, json!({ "$exists": present })),
            Filter::Gte(field, value) => single(field, json!({ "$gte": value })),
            Filter::Lte(field, value) => single(field, json!({ "$lte": value })),
            Filter::ElemMatch(field, inner) => {
                single(field, json!({ "$elemMatch": inner.to_json() }))
            }
            Filter::And(filters) if filters.is_empty() => Value::Object(Map::new()),
            Filter::And(filters) => {
                json!({ "$and": filters.iter().map(Filter::to_json).collect::<Vec<_>>() })
            }
            Filter::Or(filters) => {
                json!({ "$or": filters.iter().map(Filter::to_json).collect::<Vec<_>>() })
            }
        }
    }

    /// Parse the Mongo-style JSON form.
    ///
    /// An object with several keys is the conjunction of its entries; `{}`
    /// matches everything.
    pub fn from_json(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| invalid("filter must be an object"))?;

        let mut terms = Vec::with_capacity(obj.len());
        for (key, val) in obj {
            match key.as_str() {
                "$and" => terms.push(Filter::And(parse_list(val)?)),
                "$or" => terms.push(Filter::Or(parse_list(val)?)),
                op if op.starts_with('$') => {
                    return Err(invalid(&format!("unsupported top-level operator {op}")))
                }
                field => terms.extend(parse_field(field, val)?),
            }
        }

        Ok(match terms.len() {
            1 => terms.remove(0),
            _ => Filter::And(terms),
        })
    }

    /// Evaluate against a record's fields.
    pub fn matches(&self, doc: &Map<String, Value>) -> bool {
        match self {
            Filter::Eq(field, expected) => lookup(doc, field).is_some_and(|v| equals(v, expected)),
            Filter::Ne(field, expected) => !lookup(doc, field).is_some_and(|v| equals(v, expected)),
            Filter::In(field, options) => lookup(doc, field)
                .is_some_and(|v| options.iter().any(|option| equals(v, option))),
            Filter::Exists(field, present) => lookup(doc, field).is_some() == *present,
            Filter::Gte(field, bound) => lookup(doc, field)
                .and_then(|v| compare(v, bound))
                .is_some_and(|o| o != Ordering::Less),
            Filter::Lte(field, bound) => lookup(doc, field)
                .and_then(|v| compare(v, bound))
                .is_some_and(|o| o != Ordering::Greater),
            Filter::ElemMatch(field, inner) => lookup(doc, field)
                .and_then(Value::as_array)
                .is_some_and(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_object)
                        .any(|item| inner.matches(item))
                }),
            Filter::And(filters) => filters.iter().all(|f| f.matches(doc)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(doc)),
        }
    }
}

fn single(field: &str, value: Value) -> Value {
    let mut map = Map::with_capacity(1);
    map.insert(field.to_string(), value);
    Value::Object(map)
}

fn invalid(message: &str) -> Error {
    Error::Validation(format!("invalid filter: {message}"))
}

fn parse_list(value: &Value) -> Result<Vec<Filter>> {
    value
        .as_array()
        .ok_or_else(|| invalid("$and/$or expects an array"))?
        .iter()
        .map(Filter::from_json)
        .collect()
}

fn parse_field(field: &str, value: &Value) -> Result<Vec<Filter>> {
    let operators = match value.as_object() {
        Some(obj) if !obj.is_empty() && obj.keys().all(|k| k.starts_with('$')) => obj,
        _ => return Ok(vec![Filter::Eq(field.to_string(), value.clone())]),
    };

    operators
        .iter()
        .map(|(op, operand)| {
            let field = field.to_string();
            Ok(match op.as_str() {
                "$eq" => Filter::Eq(field, operand.clone()),
                "$ne" => Filter::Ne(field, operand.clone()),
                "$in" => Filter::In(
                    field,
                    operand
                        .as_array()
                        .cloned()
                        .ok_or_else(|| invalid("$in expects an array"))?,
                ),
                "$exists" => Filter::Exists(
                    field,
                    operand
                        .as_bool()
                        .ok_or_else(|| invalid("$exists expects a boolean"))?,
                ),
                "$gte" => Filter::Gte(field, operand.clone()),
                "$lte" => Filter::Lte(field, operand.clone()),
                "$elemMatch" => Filter::ElemMatch(field, Box::new(Filter::from_json(operand)?)),
                other => return Err(invalid(&format!("unsupported operator {other}"))),
            })
        })
        .collect()
}

/// Resolve a possibly dotted field path.
fn lookup<'a>(doc: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Mongo equality: an array field also matches when any element is equal.
fn equals(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    match actual {
        Value::Array(items) => items.iter().any(|item| item == expected),
        _ => false,
    }
}

fn compare(actual: &Value, bound: &Value) -> Option<Ordering> {
    match (actual, bound) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}
