//! Backend filter documents and their evaluator.
//!
//! Filters are JSON documents in the tagged operator form the query
//! transpiler emits: field comparisons (`{"a.b": 1}`,
//! `{"a": {"$gt": 5}}`), logical combinators (`$and`/`$or`), `$regex`,
//! `$exists`, and arithmetic `$expr`. The storage engine evaluates them
//! against entity documents inside the dispatch/list transactions, after
//! queue scoping has already been applied in SQL.

use std::cmp::Ordering;

use serde_json::Value;

use crate::error::ApiError;
use crate::flatten::get_path;

/// AND-combine a filter with the enforced queue scope, mirroring how every
/// caller-supplied query is sanitized before execution.
pub fn scope_to_queue(queue_id: &str, filter: Value) -> Value {
    serde_json::json!({
        "$and": [
            {"queue_id": queue_id},
            filter,
        ]
    })
}

/// Evaluate a filter document against a JSON document.
pub fn matches(filter: &Value, doc: &Value) -> Result<bool, ApiError> {
    let obj = match filter {
        Value::Object(map) => map,
        Value::Null => return Ok(true),
        _ => {
            return Err(ApiError::BadRequest(
                "Filter must be a JSON object".to_string(),
            ))
        }
    };

    for (key, condition) in obj {
        let hit = match key.as_str() {
            // Short-circuiting matters: the transpiler emits $exists
            // guards ahead of $expr clauses so that arithmetic never sees
            // a missing field.
            "$and" => {
                let mut all = true;
                for clause in combinator_list(condition)? {
                    if !matches(clause, doc)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for clause in combinator_list(condition)? {
                    if matches(clause, doc)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$expr" => eval_expr(condition, doc)?.as_bool().unwrap_or(false),
            "$not" | "$nor" => {
                return Err(ApiError::BadRequest(format!(
                    "Unsupported filter operator: {}",
                    key
                )))
            }
            field => field_condition(field, condition, doc)?,
        };
        if !hit {
            return Ok(false);
        }
    }
    Ok(true)
}

fn combinator_list(condition: &Value) -> Result<&Vec<Value>, ApiError> {
    condition.as_array().ok_or_else(|| {
        ApiError::BadRequest("$and/$or requires an array of filters".to_string())
    })
}

fn field_condition(field: &str, condition: &Value, doc: &Value) -> Result<bool, ApiError> {
    let actual = get_path(doc, field);

    // An object whose keys are all operators is an operator spec;
    // anything else is a literal equality match.
    if let Value::Object(spec) = condition {
        if !spec.is_empty() && spec.keys().all(|k| k.starts_with('$')) {
            for (op, operand) in spec {
                if !apply_operator(op, operand, actual)? {
                    return Ok(false);
                }
            }
            return Ok(true);
        }
    }

    // Missing fields compare equal to an explicit null query.
    Ok(values_equal(actual.unwrap_or(&Value::Null), condition))
}

fn apply_operator(op: &str, operand: &Value, actual: Option<&Value>) -> Result<bool, ApiError> {
    match op {
        "$exists" => {
            let wanted = operand.as_bool().unwrap_or(true);
            Ok(actual.is_some() == wanted)
        }
        "$eq" => Ok(values_equal(actual.unwrap_or(&Value::Null), operand)),
        "$ne" => Ok(!values_equal(actual.unwrap_or(&Value::Null), operand)),
        "$in" => {
            let list = operand
                .as_array()
                .ok_or_else(|| ApiError::BadRequest("$in requires a list".to_string()))?;
            let Some(actual) = actual else {
                return Ok(false);
            };
            // Array-valued fields match when any element is in the list.
            if let Value::Array(items) = actual {
                return Ok(items
                    .iter()
                    .any(|item| list.iter().any(|cand| values_equal(item, cand))));
            }
            Ok(list.iter().any(|cand| values_equal(actual, cand)))
        }
        "$regex" => {
            let pattern = operand
                .as_str()
                .ok_or_else(|| ApiError::BadRequest("$regex requires a string".to_string()))?;
            let re = regex::Regex::new(pattern)
                .map_err(|e| ApiError::BadRequest(format!("Invalid regex: {}", e)))?;
            Ok(actual
                .and_then(|v| v.as_str())
                .map(|s| re.is_match(s))
                .unwrap_or(false))
        }
        "$gt" | "$gte" | "$lt" | "$lte" => {
            let Some(actual) = actual else {
                return Ok(false);
            };
            let Some(ordering) = compare_values(actual, operand) else {
                return Ok(false);
            };
            Ok(match op {
                "$gt" => ordering == Ordering::Greater,
                "$gte" => ordering != Ordering::Less,
                "$lt" => ordering == Ordering::Less,
                _ => ordering != Ordering::Greater,
            })
        }
        other => Err(ApiError::BadRequest(format!(
            "Unsupported filter operator: {}",
            other
        ))),
    }
}

/// Evaluate an arithmetic/comparison expression. Strings beginning with
/// `$` are field references; everything else is a literal.
pub fn eval_expr(expr: &Value, doc: &Value) -> Result<Value, ApiError> {
    match expr {
        Value::String(s) if s.starts_with('$') => {
            Ok(get_path(doc, &s[1..]).cloned().unwrap_or(Value::Null))
        }
        Value::Object(map) if map.len() == 1 => {
            let (op, operands) = map.iter().next().unwrap();
            let operands = operands
                .as_array()
                .ok_or_else(|| ApiError::BadRequest(format!("{} requires a list", op)))?;
            match op.as_str() {
                "$add" | "$subtract" | "$multiply" | "$divide" | "$mod" => {
                    arithmetic(op, operands, doc)
                }
                "$eq" | "$ne" | "$gt" | "$gte" | "$lt" | "$lte" => {
                    if operands.len() != 2 {
                        return Err(ApiError::BadRequest(format!(
                            "{} requires exactly two operands",
                            op
                        )));
                    }
                    let left = eval_expr(&operands[0], doc)?;
                    let right = eval_expr(&operands[1], doc)?;
                    let result = match op.as_str() {
                        "$eq" => values_equal(&left, &right),
                        "$ne" => !values_equal(&left, &right),
                        other => match compare_values(&left, &right) {
                            Some(ordering) => match other {
                                "$gt" => ordering == Ordering::Greater,
                                "$gte" => ordering != Ordering::Less,
                                "$lt" => ordering == Ordering::Less,
                                _ => ordering != Ordering::Greater,
                            },
                            None => false,
                        },
                    };
                    Ok(Value::Bool(result))
                }
                other => Err(ApiError::BadRequest(format!(
                    "Unsupported $expr operator: {}",
                    other
                ))),
            }
        }
        other => Ok(other.clone()),
    }
}

fn arithmetic(op: &str, operands: &[Value], doc: &Value) -> Result<Value, ApiError> {
    if matches!(op, "$subtract" | "$divide" | "$mod") && operands.len() != 2 {
        return Err(ApiError::BadRequest(format!(
            "{} requires exactly two operands",
            op
        )));
    }

    // Non-numeric operands (missing fields resolve to null) propagate as
    // null; the surrounding comparison then fails to match.
    let mut numbers = Vec::with_capacity(operands.len());
    for operand in operands {
        match eval_expr(operand, doc)?.as_f64() {
            Some(n) => numbers.push(n),
            None => return Ok(Value::Null),
        }
    }

    let result = match op {
        "$add" => numbers.iter().sum(),
        "$multiply" => numbers.iter().product(),
        "$subtract" => numbers[0] - numbers[1],
        "$divide" => {
            if numbers[1] == 0.0 {
                return Err(ApiError::BadRequest("Division by zero in $expr".to_string()));
            }
            numbers[0] / numbers[1]
        }
        "$mod" => {
            if numbers[1] == 0.0 {
                return Err(ApiError::BadRequest("Division by zero in $expr".to_string()));
            }
            numbers[0] % numbers[1]
        }
        _ => unreachable!(),
    };

    Ok(number_value(result))
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

/// Equality with int/float coercion; other types use strict JSON equality.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Ordering for numbers and strings; incomparable types yield None.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y);
    }
    if let (Value::String(x), Value::String(y)) = (a, b) {
        return Some(x.cmp(y));
    }
    None
}
