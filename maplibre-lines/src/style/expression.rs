//! Evaluation of data-driven style values against the properties of a single feature.
//!
//! Only the expression subset which paint properties of line and fill layers use is supported:
//! literals, `["get", key]`, `["match", input, label, output, ..., fallback]`,
//! `["coalesce", ...]` and `["literal", value]`.

use csscolorparser::Color;
use serde_json::{Number, Value};

use crate::vector::decoder::{FeatureProperties, PropertyValue};

/// A value type which a paint property can hold.
pub trait PaintValue: Sized + Clone {
    fn from_json(value: &Value) -> Option<Self>;
}

impl PaintValue for f32 {
    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(number) => number.as_f64().map(|n| n as f32),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl PaintValue for String {
    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

impl PaintValue for Color {
    fn from_json(value: &Value) -> Option<Self> {
        value.as_str().and_then(|s| s.parse::<Color>().ok())
    }
}

impl PaintValue for Vec<f32> {
    fn from_json(value: &Value) -> Option<Self> {
        value
            .as_array()?
            .iter()
            .map(|v| v.as_f64().map(|n| n as f32))
            .collect()
    }
}

impl From<&PropertyValue> for Value {
    fn from(value: &PropertyValue) -> Self {
        match value {
            PropertyValue::String(s) => Value::String(s.clone()),
            PropertyValue::Double(d) => Number::from_f64(*d).map_or(Value::Null, Value::Number),
            PropertyValue::Int(i) => Value::Number(Number::from(*i)),
            PropertyValue::UInt(u) => Value::Number(Number::from(*u)),
            PropertyValue::Bool(b) => Value::Bool(*b),
        }
    }
}

/// Evaluates `expression` for a feature. Returns `None` if the expression is not supported or
/// yields no value, callers fall back to the property default in that case.
pub fn evaluate(expression: &Value, properties: &FeatureProperties) -> Option<Value> {
    let Some(arr) = expression.as_array() else {
        return Some(expression.clone());
    };
    let Some(op) = arr.first().and_then(|v| v.as_str()) else {
        // A plain array like a dash array is a literal.
        return Some(expression.clone());
    };

    match op {
        "get" => {
            let key = arr.get(1)?.as_str()?;
            properties.get(key).map(Value::from)
        }
        "literal" => arr.get(1).cloned(),
        "coalesce" => arr[1..]
            .iter()
            .find_map(|candidate| evaluate(candidate, properties).filter(|v| !v.is_null())),
        "match" if arr.len() >= 3 => {
            let input = evaluate(&arr[1], properties);
            let fallback = arr.last()?;
            if let Some(input) = input {
                let mut i = 2;
                while i + 1 < arr.len() - 1 {
                    if labels_match(&arr[i], &input) {
                        return evaluate(&arr[i + 1], properties);
                    }
                    i += 2;
                }
            }
            evaluate(fallback, properties)
        }
        _ => None,
    }
}

fn labels_match(label: &Value, input: &Value) -> bool {
    match label {
        Value::Array(labels) => labels.iter().any(|l| scalar_eq(l, input)),
        _ => scalar_eq(label, input),
    }
}

fn scalar_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => a == b,
    }
}
