//! Declarative schema for spec documents
//!
//! A schema is a tree of [`Node`]s. It drives two passes over the raw
//! documents: a schema-aware merge (sections merge key by key, lists append,
//! everything else is replaced by the later document) and a normalization
//! that fills defaults, enforces required fields and rejects unknown keys,
//! reporting the dotted path of the first violation.

use serde_json::{json, Map, Value};

use crate::common::{Error, Result};

/// Kind of a scalar leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    /// Any scalar, stored as a string
    Text { non_empty: bool },
    /// Integer within an inclusive range; numeric strings are accepted
    Integer { min: i64, max: i64 },
    Boolean,
}

/// One node of the schema tree
#[derive(Debug, Clone)]
pub enum Node {
    /// Typed scalar leaf
    Scalar {
        kind: ScalarKind,
        default: Option<Value>,
        required: bool,
    },
    /// Arbitrary value, replaced wholesale on merge
    Variable { default: Option<Value> },
    /// Mapping with free-form keys, replaced wholesale on merge
    ///
    /// An empty sequence is read as an empty mapping. When `values` is set
    /// every entry is normalized against it.
    Mapping {
        default: Option<Value>,
        values: Option<Box<Node>>,
    },
    /// Fixed set of children; missing children take their defaults
    Section(Vec<(&'static str, Node)>),
    /// Mapping accepting any key, with defaults for the listed ones
    OpenSection(Vec<(&'static str, Value)>),
    /// Ordered sequence, appended on merge
    List { item: Box<Node>, min_items: usize },
}

impl Node {
    pub fn text() -> Self {
        Node::Scalar {
            kind: ScalarKind::Text { non_empty: false },
            default: None,
            required: false,
        }
    }

    pub fn integer(min: i64, max: i64) -> Self {
        Node::Scalar {
            kind: ScalarKind::Integer { min, max },
            default: None,
            required: false,
        }
    }

    pub fn boolean() -> Self {
        Node::Scalar {
            kind: ScalarKind::Boolean,
            default: None,
            required: false,
        }
    }

    pub fn variable() -> Self {
        Node::Variable { default: None }
    }

    pub fn mapping() -> Self {
        Node::Mapping {
            default: None,
            values: None,
        }
    }

    /// Normalize every entry of a mapping against `node`
    pub fn of(mut self, node: Node) -> Self {
        if let Node::Mapping { values, .. } = &mut self {
            *values = Some(Box::new(node));
        }
        self
    }

    pub fn section(children: Vec<(&'static str, Node)>) -> Self {
        Node::Section(children)
    }

    pub fn open_section(defaults: Vec<(&'static str, Value)>) -> Self {
        Node::OpenSection(defaults)
    }

    pub fn list(item: Node, min_items: usize) -> Self {
        Node::List {
            item: Box::new(item),
            min_items,
        }
    }

    /// Set the value used when the node is absent
    pub fn with_default(mut self, value: Value) -> Self {
        match &mut self {
            Node::Scalar { default, .. }
            | Node::Variable { default }
            | Node::Mapping { default, .. } => *default = Some(value),
            _ => {}
        }
        self
    }

    /// Mark a scalar as mandatory
    pub fn required(mut self) -> Self {
        if let Node::Scalar { required, .. } = &mut self {
            *required = true;
        }
        self
    }

    /// Reject empty strings for a text scalar
    pub fn non_empty(mut self) -> Self {
        if let Node::Scalar {
            kind: ScalarKind::Text { non_empty },
            ..
        } = &mut self
        {
            *non_empty = true;
        }
        self
    }

    fn child(&self, key: &str) -> Option<&Node> {
        match self {
            Node::Section(children) => children.iter().find(|(name, _)| *name == key).map(|(_, n)| n),
            _ => None,
        }
    }

    /// Merge a later document into an earlier one
    pub fn merge(&self, base: Value, incoming: Value) -> Value {
        match (self, base, incoming) {
            (Node::Section(_), Value::Object(mut base), Value::Object(incoming)) => {
                for (key, value) in incoming {
                    let merged = match (self.child(&key), base.remove(&key)) {
                        (Some(child), Some(previous)) => child.merge(previous, value),
                        _ => value,
                    };
                    base.insert(key, merged);
                }
                Value::Object(base)
            }
            (Node::OpenSection(_), Value::Object(mut base), Value::Object(incoming)) => {
                base.extend(incoming);
                Value::Object(base)
            }
            (Node::List { .. }, Value::Array(mut base), Value::Array(incoming)) => {
                base.extend(incoming);
                Value::Array(base)
            }
            (_, _, incoming) => incoming,
        }
    }

    /// Validate a merged value and fill in defaults
    ///
    /// Returns `None` when the node is absent and has no default.
    pub fn normalize(&self, value: Option<&Value>, path: &str) -> Result<Option<Value>> {
        let value = value.filter(|v| !v.is_null());

        match self {
            Node::Scalar {
                kind,
                default,
                required,
            } => match value {
                None if *required => Err(Error::config_validation(path, "must be configured")),
                None => Ok(default.clone()),
                Some(v) => normalize_scalar(*kind, v, path).map(Some),
            },
            Node::Variable { default } => Ok(value.cloned().or_else(|| default.clone())),
            Node::Mapping { default, values } => {
                let map = match value {
                    None => return Ok(default.clone()),
                    Some(Value::Array(items)) if items.is_empty() => return Ok(Some(json!({}))),
                    Some(Value::Object(map)) => map,
                    Some(other) => {
                        return Err(Error::config_validation(
                            path,
                            format!("expected a mapping, got {}", type_name(other)),
                        ))
                    }
                };

                let Some(node) = values else {
                    return Ok(Some(Value::Object(map.clone())));
                };
                let mut out = Map::new();
                for (key, entry) in map {
                    if let Some(v) = node.normalize(Some(entry), &join(path, key))? {
                        out.insert(key.clone(), v);
                    }
                }
                Ok(Some(Value::Object(out)))
            }
            Node::Section(children) => {
                let empty = Map::new();
                let map = match value {
                    None => &empty,
                    Some(Value::Object(map)) => map,
                    Some(other) => {
                        return Err(Error::config_validation(
                            path,
                            format!("expected a mapping, got {}", type_name(other)),
                        ))
                    }
                };

                if let Some(unknown) = map.keys().find(|k| self.child(k).is_none()) {
                    return Err(Error::config_validation(
                        &join(path, unknown),
                        "unrecognized option",
                    ));
                }

                let mut out = Map::new();
                for (name, child) in children {
                    if let Some(v) = child.normalize(map.get(*name), &join(path, name))? {
                        out.insert((*name).to_string(), v);
                    }
                }
                Ok(Some(Value::Object(out)))
            }
            Node::OpenSection(defaults) => {
                let mut out = match value {
                    None => Map::new(),
                    Some(Value::Object(map)) => map.clone(),
                    Some(other) => {
                        return Err(Error::config_validation(
                            path,
                            format!("expected a mapping, got {}", type_name(other)),
                        ))
                    }
                };
                for (name, default) in defaults {
                    out.entry(*name).or_insert_with(|| default.clone());
                }
                Ok(Some(Value::Object(out)))
            }
            Node::List { item, min_items } => {
                let items = match value {
                    None => return Ok(None),
                    Some(Value::Array(items)) => items,
                    Some(other) => {
                        return Err(Error::config_validation(
                            path,
                            format!("expected a sequence, got {}", type_name(other)),
                        ))
                    }
                };

                if items.len() < *min_items {
                    return Err(Error::config_validation(
                        path,
                        format!("should have at least {} element(s) defined", min_items),
                    ));
                }

                let mut out = Vec::with_capacity(items.len());
                for (index, entry) in items.iter().enumerate() {
                    let entry_path = join(path, &index.to_string());
                    match item.normalize(Some(entry), &entry_path)? {
                        Some(v) => out.push(v),
                        None => {
                            return Err(Error::config_validation(&entry_path, "empty entry"))
                        }
                    }
                }
                Ok(Some(Value::Array(out)))
            }
        }
    }
}

fn normalize_scalar(kind: ScalarKind, value: &Value, path: &str) -> Result<Value> {
    match kind {
        ScalarKind::Text { non_empty } => {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => {
                    return Err(Error::config_validation(
                        path,
                        format!("expected a scalar, got {}", type_name(other)),
                    ))
                }
            };
            if non_empty && text.is_empty() {
                return Err(Error::config_validation(path, "cannot contain an empty value"));
            }
            Ok(Value::String(text))
        }
        ScalarKind::Integer { min, max } => {
            let parsed = match value {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.trim().parse::<i64>().ok(),
                _ => None,
            };
            match parsed {
                Some(n) if (min..=max).contains(&n) => Ok(json!(n)),
                Some(n) => Err(Error::config_validation(
                    path,
                    format!("{} is outside the range {}..={}", n, min, max),
                )),
                None => Err(Error::config_validation(
                    path,
                    format!("expected an integer, got {}", value),
                )),
            }
        }
        ScalarKind::Boolean => match value {
            Value::Bool(b) => Ok(Value::Bool(*b)),
            other => Err(Error::config_validation(
                path,
                format!("expected a boolean, got {}", other),
            )),
        },
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}
