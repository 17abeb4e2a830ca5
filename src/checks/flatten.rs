//! Dotted-path views and path matching
//!
//! Decoded bodies are flattened into `path → leaf` maps (`data.0.id`), and
//! expectations are matched against those maps by [`match_paths`].

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::pattern;
use crate::common::AssertionFailure;

/// Flattened view of a decoded body
pub type FlatView = BTreeMap<String, Value>;

/// Flatten a value into dotted paths
///
/// Array indices become path segments. Empty collections are kept as leaves
/// so they can be asserted on. A top-level scalar is stored under `0`.
pub fn flatten(value: &Value) -> FlatView {
    let mut out = FlatView::new();
    match value {
        Value::Object(_) | Value::Array(_) => walk("", value, &mut out),
        scalar => {
            out.insert("0".to_string(), scalar.clone());
        }
    }
    out
}

fn walk(prefix: &str, value: &Value, out: &mut FlatView) {
    let join = |segment: &str| {
        if prefix.is_empty() {
            segment.to_string()
        } else {
            format!("{}.{}", prefix, segment)
        }
    };

    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                walk(&join(key), child, out);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (index, child) in items.iter().enumerate() {
                walk(&join(&index.to_string()), child, out);
            }
        }
        leaf => {
            if !prefix.is_empty() {
                out.insert(prefix.to_string(), leaf.clone());
            }
        }
    }
}

/// Match expected `path → value` pairs against a flattened view
///
/// With `negate` only absence is asserted. Otherwise each path must exist and
/// its value must satisfy, in order: the empty-collection rule, a delimited
/// regex, or loose equality.
pub fn match_paths(
    check: &str,
    view: &FlatView,
    expected: &Map<String, Value>,
    negate: bool,
    encoded: &str,
) -> Vec<AssertionFailure> {
    let mut failures = Vec::new();

    for (path, want) in expected {
        let actual = view.get(path);

        if negate {
            if actual.is_some() {
                failures.push(
                    AssertionFailure::new(
                        check,
                        "absent",
                        "present",
                        format!("Found unexpected path [{}] within [{}].", path, encoded),
                    )
                    .at(path),
                );
            }
            continue;
        }

        let Some(actual) = actual else {
            failures.push(
                AssertionFailure::new(
                    check,
                    stringify(want),
                    "missing",
                    format!("Unable to find path [{}] within [{}].", path, encoded),
                )
                .at(path),
            );
            continue;
        };

        if is_empty_collection(want) {
            if !is_empty(actual) {
                failures.push(
                    AssertionFailure::new(
                        check,
                        "empty",
                        stringify(actual),
                        format!("Expected [{}] to be empty.", path),
                    )
                    .at(path),
                );
            }
            continue;
        }

        if let Some(regex) = want.as_str().and_then(|raw| pattern::compile(raw).ok()) {
            let subject = stringify(actual);
            if !regex.is_match(&subject) {
                failures.push(
                    AssertionFailure::new(
                        check,
                        stringify(want),
                        subject.clone(),
                        format!("Expected [{}] match [{}] on [{}].", subject, stringify(want), path),
                    )
                    .at(path),
                );
            }
            continue;
        }

        if !loose_eq(want, actual) {
            failures.push(
                AssertionFailure::new(
                    check,
                    stringify(want),
                    stringify(actual),
                    format!(
                        "Expected [{}] on [{}], got [{}].",
                        stringify(want),
                        path,
                        stringify(actual)
                    ),
                )
                .at(path),
            );
        }
    }

    failures
}

fn is_empty_collection(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Emptiness in the loose sense: null, false, zero, `""`, `"0"` and empty
/// collections
pub fn is_empty(value: &Value) -> bool {
    !truthy(value)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !(s.is_empty() || s == "0"),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Render a value as text for regex subjects and messages
///
/// Strings are used as-is, booleans render as `1`/empty, null as empty and
/// collections as compact JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) => String::new(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse a numeric string, allowing surrounding whitespace
fn numeric(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    if trimmed.is_empty()
        || !trimmed
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'))
    {
        return None;
    }
    trimmed.parse().ok()
}

/// Loose equality between an expected and an actual value
///
/// Numeric strings compare numerically (`"200" == 200`), booleans compare by
/// truthiness, null equals every empty value and collections compare
/// key-by-key.
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), other) | (other, Value::Bool(x)) => *x == truthy(other),
        (Value::Null, Value::String(s)) | (Value::String(s), Value::Null) => s.is_empty(),
        (Value::Null, other) | (other, Value::Null) => !truthy(other),
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            match (numeric(s), n.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => n.to_string() == *s,
            }
        }
        (Value::String(x), Value::String(y)) => match (numeric(x), numeric(y)) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(_) | Value::Object(_), Value::Array(_) | Value::Object(_)) => {
            let left = entries(a);
            let right = entries(b);
            left.len() == right.len()
                && left.iter().all(|(key, value)| {
                    right
                        .get(key)
                        .map(|other| loose_eq(value, other))
                        .unwrap_or(false)
                })
        }
        _ => false,
    }
}

fn entries(value: &Value) -> BTreeMap<String, &Value> {
    match value {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v))
            .collect(),
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
        _ => BTreeMap::new(),
    }
}
