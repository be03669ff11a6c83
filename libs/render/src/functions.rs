//! Built-in template functions and value helpers.

use std::cmp::Ordering;

use serde_json::{Number, Value};

use crate::RenderError;

/// Call a built-in by name.
pub(crate) fn call(name: &str, args: Vec<Value>) -> Result<Value, RenderError> {
    match name {
        "len" => unary(name, args, |v| match v {
            Value::String(s) => Ok(Value::from(s.chars().count())),
            Value::Array(items) => Ok(Value::from(items.len())),
            Value::Object(map) => Ok(Value::from(map.len())),
            Value::Null => Ok(Value::from(0)),
            other => Err(RenderError::eval(format!("len of {}", kind(&other)))),
        }),
        "lower" => unary(name, args, |v| Ok(Value::String(format_value(&v).to_lowercase()))),
        "upper" => unary(name, args, |v| Ok(Value::String(format_value(&v).to_uppercase()))),
        "trim" => unary(name, args, |v| Ok(Value::String(format_value(&v).trim().to_string()))),
        "toString" => unary(name, args, |v| Ok(Value::String(format_value(&v)))),
        "bold" => unary(name, args, |v| Ok(Value::String(format!("*{}*", format_value(&v))))),
        "italic" => unary(name, args, |v| Ok(Value::String(format!("_{}_", format_value(&v))))),
        "not" => unary(name, args, |v| Ok(Value::Bool(!truthy(&v)))),

        "eq" => {
            let (first, rest) = at_least(name, args, 2, "at least 2")?;
            Ok(Value::Bool(rest.iter().any(|other| equal(&first, other))))
        }
        "ne" => binary(name, args, |a, b| Ok(Value::Bool(!equal(&a, &b)))),
        "lt" => compare(name, args, |o| o == Ordering::Less),
        "le" => compare(name, args, |o| o != Ordering::Greater),
        "gt" => compare(name, args, |o| o == Ordering::Greater),
        "ge" => compare(name, args, |o| o != Ordering::Less),

        "and" => {
            let (first, rest) = at_least(name, args, 1, "at least 1")?;
            let mut last = first;
            for value in rest {
                if !truthy(&last) {
                    return Ok(last);
                }
                last = value;
            }
            Ok(last)
        }
        "or" => {
            let (first, rest) = at_least(name, args, 1, "at least 1")?;
            let mut last = first;
            for value in rest {
                if truthy(&last) {
                    return Ok(last);
                }
                last = value;
            }
            Ok(last)
        }

        "contains" => binary(name, args, |needle, haystack| match haystack {
            Value::String(s) => Ok(Value::Bool(s.contains(&format_value(&needle)))),
            Value::Array(items) => Ok(Value::Bool(items.iter().any(|v| equal(v, &needle)))),
            Value::Null => Ok(Value::Bool(false)),
            other => Err(RenderError::eval(format!("contains on {}", kind(&other)))),
        }),
        "join" => binary(name, args, |sep, list| match list {
            Value::Array(items) => Ok(Value::String(
                items
                    .iter()
                    .map(format_value)
                    .collect::<Vec<_>>()
                    .join(&format_value(&sep)),
            )),
            Value::Null => Ok(Value::String(String::new())),
            other => Err(RenderError::eval(format!("join on {}", kind(&other)))),
        }),
        "default" => binary(name, args, |fallback, value| {
            Ok(if truthy(&value) { value } else { fallback })
        }),

        "round" => binary(name, args, |x, places| {
            let x = expect_number(name, &x)?;
            let places = expect_number(name, &places)?;
            let factor = 10f64.powi(places as i32);
            Ok(number((x * factor).round() / factor))
        }),
        "add" => arithmetic(name, args, |a, b| Ok(a + b)),
        "sub" => arithmetic(name, args, |a, b| Ok(a - b)),
        "mul" => arithmetic(name, args, |a, b| Ok(a * b)),
        "div" => arithmetic(name, args, |a, b| {
            if b == 0.0 {
                Err(RenderError::eval("division by zero"))
            } else {
                Ok(a / b)
            }
        }),

        _ => Err(RenderError::UnknownFunction(name.to_string())),
    }
}

// =============================================================================
// Argument helpers
// =============================================================================

fn arity_error(name: &str, expected: &'static str, got: usize) -> RenderError {
    RenderError::Arity {
        function: name.to_string(),
        expected,
        got,
    }
}

fn unary(
    name: &str,
    args: Vec<Value>,
    f: impl FnOnce(Value) -> Result<Value, RenderError>,
) -> Result<Value, RenderError> {
    let got = args.len();
    let mut args = args.into_iter();
    match (args.next(), args.next()) {
        (Some(a), None) => f(a),
        _ => Err(arity_error(name, "1", got)),
    }
}

fn binary(
    name: &str,
    args: Vec<Value>,
    f: impl FnOnce(Value, Value) -> Result<Value, RenderError>,
) -> Result<Value, RenderError> {
    let got = args.len();
    let mut args = args.into_iter();
    match (args.next(), args.next(), args.next()) {
        (Some(a), Some(b), None) => f(a, b),
        _ => Err(arity_error(name, "2", got)),
    }
}

fn at_least(
    name: &str,
    args: Vec<Value>,
    min: usize,
    expected: &'static str,
) -> Result<(Value, Vec<Value>), RenderError> {
    if args.len() < min {
        return Err(arity_error(name, expected, args.len()));
    }
    let mut args = args.into_iter();
    let first = args.next().unwrap_or(Value::Null);
    Ok((first, args.collect()))
}

fn expect_number(name: &str, value: &Value) -> Result<f64, RenderError> {
    value
        .as_f64()
        .ok_or_else(|| RenderError::eval(format!("{name} expects a number, got {}", kind(value))))
}

fn arithmetic(
    name: &str,
    args: Vec<Value>,
    f: impl FnOnce(f64, f64) -> Result<f64, RenderError>,
) -> Result<Value, RenderError> {
    binary(name, args, |a, b| {
        let result = f(expect_number(name, &a)?, expect_number(name, &b)?)?;
        Ok(number(result))
    })
}

fn compare(
    name: &str,
    args: Vec<Value>,
    accept: impl FnOnce(Ordering) -> bool,
) -> Result<Value, RenderError> {
    binary(name, args, |a, b| {
        let ordering = match (&a, &b) {
            (Value::Number(x), Value::Number(y)) => x
                .as_f64()
                .zip(y.as_f64())
                .and_then(|(x, y)| x.partial_cmp(&y)),
            (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
            _ => None,
        }
        .ok_or_else(|| {
            RenderError::eval(format!(
                "{name}: incompatible types {} and {}",
                kind(&a),
                kind(&b)
            ))
        })?;
        Ok(Value::Bool(accept(ordering)))
    })
}

// =============================================================================
// Value helpers
// =============================================================================

/// JSON number from an f64, integral values become integers.
pub(crate) fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        Value::from(n as i64)
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Text form of a value as it appears in rendered output.
pub(crate) fn format_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(i), _, _) => i.to_string(),
            (None, Some(u), _) => u.to_string(),
            (None, None, Some(f)) if f.fract() == 0.0 && f.abs() < 1e15 => (f as i64).to_string(),
            (None, None, Some(f)) => f.to_string(),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

/// Template truthiness: false, zero, empty and null are false.
pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

pub(crate) fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}
