//! Tolerant equality between two candidate field values.
//!
//! Binary by construction: there is no partial credit here. The relation is reflexive
//! and symmetric for every JSON value.

use serde_json::Value;

/// Absolute tolerance for numeric comparison.
pub const NUMERIC_TOLERANCE: f64 = 0.01;

// Absorbs binary rounding so that e.g. 10.00 vs 10.01 still counts as within tolerance.
const FLOAT_SLACK: f64 = 1e-9;

/// Equality with tolerance: numbers (including numeric strings) within
/// [`NUMERIC_TOLERANCE`], strings trimmed and case-insensitive, booleans by identity,
/// null against null. Arrays and objects compare element-wise.
pub fn matches(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return (x - y).abs() <= NUMERIC_TOLERANCE + FLOAT_SLACK;
    }
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::String(x), Value::String(y)) => normalize_text(x) == normalize_text(y),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| matches(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(key, x)| ys.get(key).map(|y| matches(x, y)).unwrap_or(false))
        }
        _ => false,
    }
}

/// [`matches`] for optional values; an absent value is treated as null.
pub fn matches_opt(a: Option<&Value>, b: Option<&Value>) -> bool {
    matches(a.unwrap_or(&Value::Null), b.unwrap_or(&Value::Null))
}

fn normalize_text(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Finite numeric reading of a number or a numeric string.
fn as_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            trimmed.parse::<f64>().ok()?
        }
        _ => return None,
    };
    n.is_finite().then_some(n)
}
