//! Host `where` predicates: building, merging and evaluating them.

use serde_json::{Map, Value};

use crate::models::id_string;

/// `{field: {in: values}}`
pub fn field_in(field: &str, values: Vec<Value>) -> Value {
    let mut op = Map::new();
    op.insert("in".to_string(), Value::Array(values));
    let mut predicate = Map::new();
    predicate.insert(field.to_string(), Value::Object(op));
    Value::Object(predicate)
}

/// `{field: value}`
pub fn field_eq(field: &str, value: Value) -> Value {
    let mut predicate = Map::new();
    predicate.insert(field.to_string(), value);
    Value::Object(predicate)
}

pub fn is_empty(predicate: Option<&Value>) -> bool {
    match predicate {
        None | Some(Value::Null) => true,
        Some(Value::Object(map)) => map.is_empty(),
        Some(_) => false,
    }
}

/// Combine a caller predicate with a computed one. The caller's constraints
/// are kept as the first conjunct and never rewritten.
pub fn and_merge(existing: Option<Value>, extra: Value) -> Value {
    match existing {
        Some(existing) if !is_empty(Some(&existing)) => {
            let mut merged = Map::new();
            merged.insert("and".to_string(), Value::Array(vec![existing, extra]));
            Value::Object(merged)
        }
        _ => extra,
    }
}

/// Joins alternatives with `or`; a single alternative is returned as is.
pub fn any_of(mut predicates: Vec<Value>) -> Option<Value> {
    match predicates.len() {
        0 => None,
        1 => predicates.pop(),
        _ => {
            let mut merged = Map::new();
            merged.insert("or".to_string(), Value::Array(predicates));
            Some(Value::Object(merged))
        }
    }
}

/// Evaluate a predicate against a row. An absent or empty predicate matches
/// everything; unknown operators never match.
pub fn where_matches(predicate: &Value, row: &Value) -> bool {
    let clauses = match predicate {
        Value::Null => return true,
        Value::Object(clauses) => clauses,
        _ => return false,
    };

    clauses.iter().all(|(key, condition)| match key.as_str() {
        "and" => condition
            .as_array()
            .map(|items| items.iter().all(|item| where_matches(item, row)))
            .unwrap_or(false),
        "or" => condition
            .as_array()
            .map(|items| items.iter().any(|item| where_matches(item, row)))
            .unwrap_or(false),
        field => field_matches(row.get(field), condition),
    })
}

fn field_matches(actual: Option<&Value>, condition: &Value) -> bool {
    match condition {
        Value::Object(ops) if is_operator_map(ops) => ops.iter().all(|(op, operand)| match op.as_str() {
            "in" | "inq" => operand
                .as_array()
                .map(|values| values.iter().any(|value| values_equal(actual, value)))
                .unwrap_or(false),
            "nin" => operand
                .as_array()
                .map(|values| !values.iter().any(|value| values_equal(actual, value)))
                .unwrap_or(false),
            "neq" => !values_equal(actual, operand),
            "eq" => values_equal(actual, operand),
            _ => false,
        }),
        expected => values_equal(actual, expected),
    }
}

fn is_operator_map(ops: &Map<String, Value>) -> bool {
    !ops.is_empty()
        && ops
            .keys()
            .all(|k| matches!(k.as_str(), "in" | "inq" | "nin" | "neq" | "eq"))
}

/// Ids compare as strings so `7` and `"7"` are the same group.
fn values_equal(actual: Option<&Value>, expected: &Value) -> bool {
    match (actual, expected) {
        (None, Value::Null) | (Some(Value::Null), Value::Null) => true,
        (None, _) => false,
        (Some(actual), expected) => match (id_string(actual), id_string(expected)) {
            (Some(a), Some(b)) => a == b,
            _ => actual == expected,
        },
    }
}
