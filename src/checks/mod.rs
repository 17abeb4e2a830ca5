//! Response checks
//!
//! Every check declared on an action is looked up in a fixed registry and
//! parsed into a typed [`Check`] before the request is sent. Unknown names
//! and malformed arguments are rejected up front, so a case never runs with
//! a silently skipped check.

pub mod decode;
mod dispatch;
pub mod flatten;
mod json;
pub mod pattern;

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};

use crate::common::{Error, Result};

pub use decode::ContentType;
pub use dispatch::{run_checks, CheckContext, Verdict};
pub use flatten::{flatten, loose_eq, match_paths, FlatView};

/// Registered check names, in the order handlers run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CheckKind {
    StatusCode,
    Headers,
    ContentType,
    Json,
    NoJson,
    JsonEquals,
    JsonStructure,
    JsonDecoded,
    NoJsonDecoded,
    ImageDecoded,
    PdfDecoded,
    CsvDecoded,
    Mail,
    Jobs,
    Events,
    Notification,
    Cache,
}

/// Name → kind registry, in canonical order
static REGISTRY: &[(&str, CheckKind)] = &[
    ("status_code", CheckKind::StatusCode),
    ("headers", CheckKind::Headers),
    ("content_type", CheckKind::ContentType),
    ("json", CheckKind::Json),
    ("no_json", CheckKind::NoJson),
    ("json_equals", CheckKind::JsonEquals),
    ("json_structure", CheckKind::JsonStructure),
    ("json_decoded", CheckKind::JsonDecoded),
    ("no_json_decoded", CheckKind::NoJsonDecoded),
    ("image_decoded", CheckKind::ImageDecoded),
    ("pdf_decoded", CheckKind::PdfDecoded),
    ("csv_decoded", CheckKind::CsvDecoded),
    ("mail", CheckKind::Mail),
    ("jobs", CheckKind::Jobs),
    ("events", CheckKind::Events),
    ("notification", CheckKind::Notification),
    ("cache", CheckKind::Cache),
];

impl CheckKind {
    /// All kinds in canonical order
    pub fn all() -> impl Iterator<Item = CheckKind> {
        REGISTRY.iter().map(|(_, kind)| *kind)
    }

    /// Look up a kind by its declared name
    pub fn from_name(name: &str) -> Option<Self> {
        REGISTRY.iter().find(|(n, _)| *n == name).map(|(_, kind)| *kind)
    }

    pub fn name(&self) -> &'static str {
        REGISTRY
            .iter()
            .find(|(_, kind)| kind == self)
            .map(|(name, _)| *name)
            .unwrap_or("unknown")
    }

    /// Checks that interpret the response body
    ///
    /// These are skipped for the rest of an iteration once the body fails to
    /// decode.
    pub fn is_content(&self) -> bool {
        matches!(
            self,
            CheckKind::ContentType
                | CheckKind::Json
                | CheckKind::NoJson
                | CheckKind::JsonEquals
                | CheckKind::JsonStructure
                | CheckKind::JsonDecoded
                | CheckKind::NoJsonDecoded
                | CheckKind::ImageDecoded
                | CheckKind::PdfDecoded
                | CheckKind::CsvDecoded
        )
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Side-effect subsystems that can be intercepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Channel {
    Mail,
    Jobs,
    Events,
    Notification,
}

impl Channel {
    pub const ALL: [Channel; 4] = [
        Channel::Mail,
        Channel::Jobs,
        Channel::Events,
        Channel::Notification,
    ];

    pub fn kind(&self) -> CheckKind {
        match self {
            Channel::Mail => CheckKind::Mail,
            Channel::Jobs => CheckKind::Jobs,
            Channel::Events => CheckKind::Events,
            Channel::Notification => CheckKind::Notification,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }
}

/// What an interceptor should observe during dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expectation {
    /// Exactly this many operations of any name
    Count(u64),
    /// Exactly this many operations per name
    PerName(BTreeMap<String, u64>),
    /// Each name at least once
    Names(Vec<String>),
}

impl Expectation {
    fn parse(check: &str, value: &Value) -> Result<Self> {
        match value {
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        Error::invalid_check_argument(check, "names must be strings")
                    })
                })
                .collect::<Result<Vec<_>>>()
                .map(Expectation::Names),
            Value::Object(map) => map
                .iter()
                .map(|(name, count)| Ok((name.clone(), parse_count(check, count)?)))
                .collect::<Result<BTreeMap<_, _>>>()
                .map(Expectation::PerName),
            other => parse_count(check, other).map(Expectation::Count),
        }
    }
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expectation::Count(n) => write!(f, "{} operation(s)", n),
            Expectation::PerName(map) => {
                let parts: Vec<String> = map.iter().map(|(k, v)| format!("{} x{}", k, v)).collect();
                write!(f, "{}", parts.join(", "))
            }
            Expectation::Names(names) => write!(f, "{}", names.join(", ")),
        }
    }
}

fn parse_count(check: &str, value: &Value) -> Result<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| {
        Error::invalid_check_argument(check, format!("expected a non-negative count, got {}", value))
    })
}

/// Cache operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOp {
    /// Key must be present; it is evicted after checking
    HasKey,
    /// Key must be absent
    NoKey,
    /// Key is evicted before dispatch and must still be absent afterwards
    CleanKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheAssertion {
    pub op: CacheOp,
    pub key: String,
}

/// A parsed check with its argument
#[derive(Debug, Clone, PartialEq)]
pub enum Check {
    StatusCode(u16),
    /// Header name → expected value; `None` asserts presence only
    Headers(Vec<(String, Option<String>)>),
    ContentType(ContentType),
    Json(Vec<Value>),
    NoJson(Vec<Value>),
    JsonEquals(Value),
    JsonStructure(Value),
    JsonDecoded(Map<String, Value>),
    NoJsonDecoded(Map<String, Value>),
    ImageDecoded(Map<String, Value>),
    PdfDecoded(Map<String, Value>),
    CsvDecoded(Map<String, Value>),
    Intercepted(Channel, Expectation),
    Cache(Vec<CacheAssertion>),
}

impl Check {
    pub fn kind(&self) -> CheckKind {
        match self {
            Check::StatusCode(_) => CheckKind::StatusCode,
            Check::Headers(_) => CheckKind::Headers,
            Check::ContentType(_) => CheckKind::ContentType,
            Check::Json(_) => CheckKind::Json,
            Check::NoJson(_) => CheckKind::NoJson,
            Check::JsonEquals(_) => CheckKind::JsonEquals,
            Check::JsonStructure(_) => CheckKind::JsonStructure,
            Check::JsonDecoded(_) => CheckKind::JsonDecoded,
            Check::NoJsonDecoded(_) => CheckKind::NoJsonDecoded,
            Check::ImageDecoded(_) => CheckKind::ImageDecoded,
            Check::PdfDecoded(_) => CheckKind::PdfDecoded,
            Check::CsvDecoded(_) => CheckKind::CsvDecoded,
            Check::Intercepted(channel, _) => channel.kind(),
            Check::Cache(_) => CheckKind::Cache,
        }
    }

    fn parse(kind: CheckKind, value: &Value) -> Result<Self> {
        let name = kind.name();
        let check = match kind {
            CheckKind::StatusCode => {
                let code = match value {
                    Value::Number(n) => n.as_u64(),
                    Value::String(s) => s.trim().parse().ok(),
                    _ => None,
                }
                .and_then(|code| u16::try_from(code).ok())
                .ok_or_else(|| {
                    Error::invalid_check_argument(name, format!("expected a status code, got {}", value))
                })?;
                Check::StatusCode(code)
            }
            CheckKind::Headers => {
                let map = expect_map(name, value)?;
                Check::Headers(
                    map.iter()
                        .map(|(header, expected)| {
                            let expected = match expected {
                                Value::Null => None,
                                other => Some(flatten::stringify(other)),
                            };
                            (header.clone(), expected)
                        })
                        .collect(),
                )
            }
            CheckKind::ContentType => {
                let raw = value.as_str().ok_or_else(|| {
                    Error::invalid_check_argument(name, "expected a content type name")
                })?;
                let content_type = ContentType::parse(raw).ok_or_else(|| {
                    Error::invalid_check_argument(name, format!("unknown content type \"{}\"", raw))
                })?;
                Check::ContentType(content_type)
            }
            CheckKind::Json => Check::Json(fragments(value)),
            CheckKind::NoJson => Check::NoJson(fragments(value)),
            CheckKind::JsonEquals => Check::JsonEquals(value.clone()),
            CheckKind::JsonStructure => Check::JsonStructure(value.clone()),
            CheckKind::JsonDecoded => Check::JsonDecoded(expect_map(name, value)?.clone()),
            CheckKind::NoJsonDecoded => Check::NoJsonDecoded(expect_map(name, value)?.clone()),
            CheckKind::ImageDecoded => Check::ImageDecoded(expect_map(name, value)?.clone()),
            CheckKind::PdfDecoded => Check::PdfDecoded(expect_map(name, value)?.clone()),
            CheckKind::CsvDecoded => Check::CsvDecoded(expect_map(name, value)?.clone()),
            CheckKind::Mail => Check::Intercepted(Channel::Mail, Expectation::parse(name, value)?),
            CheckKind::Jobs => Check::Intercepted(Channel::Jobs, Expectation::parse(name, value)?),
            CheckKind::Events => {
                Check::Intercepted(Channel::Events, Expectation::parse(name, value)?)
            }
            CheckKind::Notification => {
                Check::Intercepted(Channel::Notification, Expectation::parse(name, value)?)
            }
            CheckKind::Cache => {
                let map = expect_map(name, value)?;
                let mut assertions = Vec::with_capacity(map.len());
                for (op, key) in map {
                    let op = match op.as_str() {
                        "hasKey" => CacheOp::HasKey,
                        "noKey" => CacheOp::NoKey,
                        "cleanKey" => CacheOp::CleanKey,
                        other => {
                            return Err(Error::invalid_check_argument(
                                name,
                                format!("unknown cache operation '{}'", other),
                            ))
                        }
                    };
                    let key = key.as_str().ok_or_else(|| {
                        Error::invalid_check_argument(name, "cache keys must be strings")
                    })?;
                    assertions.push(CacheAssertion {
                        op,
                        key: key.to_string(),
                    });
                }
                Check::Cache(assertions)
            }
        };
        Ok(check)
    }
}

fn expect_map<'a>(check: &str, value: &'a Value) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| Error::invalid_check_argument(check, "expected a mapping"))
}

/// A single mapping is accepted as a one-fragment list
fn fragments(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

/// The checks of one case, in canonical order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckSet {
    checks: Vec<Check>,
}

impl CheckSet {
    /// Parse a declared check map
    ///
    /// Every name is resolved before any argument is parsed. Null arguments
    /// disable the check.
    pub fn parse(test_id: &str, declared: &Map<String, Value>) -> Result<Self> {
        let mut kinds = Vec::with_capacity(declared.len());
        for (name, value) in declared {
            let kind = CheckKind::from_name(name).ok_or_else(|| Error::UnknownCheck {
                test_id: test_id.to_string(),
                check: name.clone(),
            })?;
            kinds.push((kind, value));
        }

        let mut checks = Vec::with_capacity(kinds.len());
        for (kind, value) in kinds {
            if value.is_null() {
                continue;
            }
            checks.push(Check::parse(kind, value)?);
        }
        checks.sort_by_key(Check::kind);

        Ok(Self { checks })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Check> {
        self.checks.iter()
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Expectation declared for an interceptor channel
    pub fn expectation(&self, channel: Channel) -> Option<&Expectation> {
        self.checks.iter().find_map(|check| match check {
            Check::Intercepted(c, expectation) if *c == channel => Some(expectation),
            _ => None,
        })
    }

    /// Remove every check of `kind`
    pub fn remove(&mut self, kind: CheckKind) {
        self.checks.retain(|check| check.kind() != kind);
    }

    /// Declared cache assertions
    pub fn cache_assertions(&self) -> &[CacheAssertion] {
        self.checks
            .iter()
            .find_map(|check| match check {
                Check::Cache(assertions) => Some(assertions.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> Result<CheckSet> {
        CheckSet::parse("t1", value.as_object().unwrap())
    }

    #[test]
    fn test_registry_is_in_canonical_order() {
        let names: Vec<&str> = CheckKind::all().map(|k| k.name()).collect();
        assert_eq!(names.first(), Some(&"status_code"));
        assert_eq!(names.last(), Some(&"cache"));
        assert_eq!(names.len(), 17);

        let mut sorted: Vec<CheckKind> = CheckKind::all().collect();
        sorted.sort();
        assert_eq!(sorted, CheckKind::all().collect::<Vec<_>>());
    }

    #[test]
    fn test_checks_sorted_canonically() {
        let set = parse(json!({
            "cache": {"noKey": "k"},
            "json_decoded": {"status": "ok"},
            "status_code": 201,
        }))
        .unwrap();
        let kinds: Vec<CheckKind> = set.iter().map(Check::kind).collect();
        assert_eq!(
            kinds,
            vec![CheckKind::StatusCode, CheckKind::JsonDecoded, CheckKind::Cache]
        );
    }

    #[test]
    fn test_unknown_check_rejected_before_arguments() {
        let err = parse(json!({"status_code": "not a code", "teapot": true})).unwrap_err();
        match err {
            Error::UnknownCheck { test_id, check } => {
                assert_eq!(test_id, "t1");
                assert_eq!(check, "teapot");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_null_disables_check() {
        let set = parse(json!({"status_code": 200, "content_type": null})).unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_status_code_accepts_strings() {
        let set = parse(json!({"status_code": "404"})).unwrap();
        assert_eq!(set.iter().next(), Some(&Check::StatusCode(404)));
    }

    #[test]
    fn test_unknown_content_type_is_hard_error() {
        let err = parse(json!({"content_type": "xml"})).unwrap_err();
        assert!(matches!(err, Error::InvalidCheckArgument { .. }));
    }

    #[test]
    fn test_expectation_shapes() {
        let set = parse(json!({
            "mail": 2,
            "jobs": ["SendInvoice"],
            "events": {"OrderPlaced": 1},
        }))
        .unwrap();
        assert_eq!(set.expectation(Channel::Mail), Some(&Expectation::Count(2)));
        assert_eq!(
            set.expectation(Channel::Jobs),
            Some(&Expectation::Names(vec!["SendInvoice".to_string()]))
        );
        assert!(matches!(
            set.expectation(Channel::Events),
            Some(Expectation::PerName(_))
        ));
        assert_eq!(set.expectation(Channel::Notification), None);
    }

    #[test]
    fn test_cache_operations() {
        let set = parse(json!({"cache": {"hasKey": "a", "cleanKey": "b"}})).unwrap();
        let ops: Vec<CacheOp> = set.cache_assertions().iter().map(|a| a.op).collect();
        assert!(ops.contains(&CacheOp::HasKey));
        assert!(ops.contains(&CacheOp::CleanKey));

        let err = parse(json!({"cache": {"maybeKey": "a"}})).unwrap_err();
        assert!(matches!(err, Error::InvalidCheckArgument { .. }));
    }

    #[test]
    fn test_remove_channel_check() {
        let mut set = parse(json!({"mail": 1, "status_code": 200})).unwrap();
        set.remove(CheckKind::Mail);
        assert_eq!(set.expectation(Channel::Mail), None);
        assert_eq!(set.len(), 1);
    }
}
