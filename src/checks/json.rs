//! JSON body matchers: fragments, structure and exact equality

use serde_json::Value;

static NULL: Value = Value::Null;

/// Strict JSON equality, treating `1` and `1.0` as equal
pub fn json_eq(a: &Value, b: &Value) -> bool {
    first_difference(a, b, "").is_none()
}

/// Locate the first path at which `expected` and `actual` diverge
///
/// Returns `(path, expected, actual)`; the root is the empty path.
pub fn first_difference<'a>(
    expected: &'a Value,
    actual: &'a Value,
    path: &str,
) -> Option<(String, &'a Value, &'a Value)> {
    let child = |segment: &str| {
        if path.is_empty() {
            segment.to_string()
        } else {
            format!("{}.{}", path, segment)
        }
    };

    match (expected, actual) {
        (Value::Number(x), Value::Number(y)) => {
            let equal = match (x.as_f64(), y.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => x == y,
            };
            (!equal).then(|| (path.to_string(), expected, actual))
        }
        (Value::Object(want), Value::Object(got)) => {
            for (key, value) in want {
                match got.get(key) {
                    Some(other) => {
                        if let Some(diff) = first_difference(value, other, &child(key)) {
                            return Some(diff);
                        }
                    }
                    None => return Some((child(key), value, &NULL)),
                }
            }
            got.iter()
                .find(|(key, _)| !want.contains_key(*key))
                .map(|(key, value)| (child(key), &NULL, value))
        }
        (Value::Array(want), Value::Array(got)) => {
            for (index, (value, other)) in want.iter().zip(got).enumerate() {
                if let Some(diff) = first_difference(value, other, &child(&index.to_string())) {
                    return Some(diff);
                }
            }
            if want.len() != got.len() {
                return Some((path.to_string(), expected, actual));
            }
            None
        }
        _ => (expected != actual).then(|| (path.to_string(), expected, actual)),
    }
}

/// Whether `fragment` occurs anywhere in `body`
///
/// An object fragment matches any object node holding all of its key/value
/// pairs; any other fragment matches a node equal to it.
pub fn contains_fragment(body: &Value, fragment: &Value) -> bool {
    let here = match (fragment, body) {
        (Value::Object(want), Value::Object(got)) => want.iter().all(|(key, value)| {
            got.get(key)
                .map(|other| json_eq(value, other))
                .unwrap_or(false)
        }),
        (Value::Object(_), _) => false,
        _ => json_eq(fragment, body),
    };
    if here {
        return true;
    }

    match body {
        Value::Object(map) => map.values().any(|child| contains_fragment(child, fragment)),
        Value::Array(items) => items.iter().any(|child| contains_fragment(child, fragment)),
        _ => false,
    }
}

/// Check that `actual` has the shape described by `structure`
///
/// A sequence lists required keys; a nested mapping descends into a key; the
/// key `*` applies its structure to every element of a collection. Returns
/// the missing paths.
pub fn missing_structure(structure: &Value, actual: &Value) -> Vec<String> {
    let mut missing = Vec::new();
    walk_structure(structure, actual, "", &mut missing);
    missing
}

fn walk_structure(structure: &Value, actual: &Value, path: &str, missing: &mut Vec<String>) {
    let child = |segment: &str| {
        if path.is_empty() {
            segment.to_string()
        } else {
            format!("{}.{}", path, segment)
        }
    };

    match structure {
        Value::Array(items) => {
            for item in items {
                walk_structure(item, actual, path, missing);
            }
        }
        Value::Object(map) => {
            for (key, nested) in map {
                if key == "*" {
                    let elements: Vec<(String, &Value)> = match actual {
                        Value::Array(items) => items
                            .iter()
                            .enumerate()
                            .map(|(i, v)| (i.to_string(), v))
                            .collect(),
                        Value::Object(entries) => {
                            entries.iter().map(|(k, v)| (k.clone(), v)).collect()
                        }
                        _ => {
                            missing.push(child("*"));
                            continue;
                        }
                    };
                    for (segment, element) in elements {
                        walk_structure(nested, element, &child(&segment), missing);
                    }
                } else {
                    match lookup(actual, key) {
                        Some(value) => walk_structure(nested, value, &child(key), missing),
                        None => missing.push(child(key)),
                    }
                }
            }
        }
        Value::String(key) => {
            if lookup(actual, key).is_none() {
                missing.push(child(key));
            }
        }
        _ => {}
    }
}

fn lookup<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}
