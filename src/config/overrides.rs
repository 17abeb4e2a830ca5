//! Command-line overrides
//!
//! Overrides are `key=value` tokens. Keys address nested settings either with
//! dots (`logging.verbosity=3`) or brackets (`logging[query]=1`). All values
//! arrive as strings; typed scalars in the schema coerce them.

use std::str::FromStr;

use serde_json::{Map, Value};

use crate::common::{Error, Result};

/// A single `key=value` override
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Override {
    /// Key segments (`logging.query` → `["logging", "query"]`)
    pub path: Vec<String>,
    /// Raw value
    pub value: String,
}

impl FromStr for Override {
    type Err = Error;

    fn from_str(token: &str) -> Result<Self> {
        let (key, value) = token
            .split_once('=')
            .ok_or_else(|| Error::InvalidOverride(token.to_string()))?;

        let path: Vec<String> = key
            .split(['.', '[', ']'])
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect();

        if path.is_empty() {
            return Err(Error::InvalidOverride(token.to_string()));
        }

        Ok(Self {
            path,
            value: value.to_string(),
        })
    }
}

/// Build the nested override document for one prefix
pub fn overrides_document(overrides: &[Override]) -> Value {
    let mut root = Map::new();
    for item in overrides {
        insert_path(&mut root, &item.path, Value::String(item.value.clone()));
    }
    let mut document = Value::Object(root);
    normalize_flags(&mut document);
    document
}

fn insert_path(map: &mut Map<String, Value>, path: &[String], value: Value) {
    match path {
        [] => {}
        [last] => {
            map.insert(last.clone(), value);
        }
        [head, rest @ ..] => {
            let entry = map
                .entry(head.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(child) = entry {
                insert_path(child, rest, value);
            }
        }
    }
}

/// Normalize boolean-looking flags that arrive as strings
///
/// `logging.query` becomes `true`/`false`, or null when unparsable so the
/// schema default applies.
fn normalize_flags(document: &mut Value) {
    if let Some(query) = document
        .get_mut("logging")
        .and_then(|logging| logging.get_mut("query"))
    {
        let parsed = match query {
            Value::String(s) => parse_bool_flag(s),
            Value::Bool(b) => Some(*b),
            _ => None,
        };
        *query = parsed.map(Value::Bool).unwrap_or(Value::Null);
    }
}

/// Boolean filter: `1/true/on/yes` and `0/false/off/no/""`, anything else is unparsable
pub fn parse_bool_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_dotted_and_bracket_keys() {
        let dotted: Override = "logging.verbosity=3".parse().unwrap();
        assert_eq!(dotted.path, vec!["logging", "verbosity"]);
        assert_eq!(dotted.value, "3");

        let bracket: Override = "logging[query]=1".parse().unwrap();
        assert_eq!(bracket.path, vec!["logging", "query"]);
    }

    #[test]
    fn test_value_may_contain_equals() {
        let o: Override = "test_regex=/id=\\d+/".parse().unwrap();
        assert_eq!(o.path, vec!["test_regex"]);
        assert_eq!(o.value, "/id=\\d+/");
    }

    #[test]
    fn test_token_without_equals_is_rejected() {
        assert!(matches!(
            "--verbose".parse::<Override>(),
            Err(Error::InvalidOverride(_))
        ));
        assert!(matches!("=x".parse::<Override>(), Err(Error::InvalidOverride(_))));
    }

    #[test]
    fn test_document_nests_and_normalizes_query_flag() {
        let overrides: Vec<Override> = ["base_url=http://localhost", "logging[query]=yes", "logging.verbosity=2"]
            .iter()
            .map(|t| t.parse().unwrap())
            .collect();
        let doc = overrides_document(&overrides);
        assert_eq!(
            doc,
            json!({
                "base_url": "http://localhost",
                "logging": {"query": true, "verbosity": "2"}
            })
        );
    }

    #[test]
    fn test_unparsable_query_flag_becomes_null() {
        let overrides = vec!["logging.query=maybe".parse::<Override>().unwrap()];
        let doc = overrides_document(&overrides);
        assert_eq!(doc["logging"]["query"], Value::Null);
    }
}
