//! Test case expansion
//!
//! Turns the declared `actions` of a prefix into an ordered list of
//! executable [`TestCase`]s, honouring the id and regex filters.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::checks::pattern;
use crate::common::{Error, Result};
use crate::config::{ActionSpec, ConfigTree};

/// An action with every recognised field present, ready to run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestCase {
    pub test_id: String,
    pub users: Vec<String>,
    pub method: String,
    pub uri: String,
    pub parameters: Map<String, Value>,
    pub cookies: Map<String, Value>,
    pub files: BTreeMap<String, String>,
    pub server: Map<String, Value>,
    pub content: Value,
    pub checks: Map<String, Value>,
}

impl From<&ActionSpec> for TestCase {
    fn from(action: &ActionSpec) -> Self {
        Self {
            test_id: action.test_id.clone(),
            users: action.users.clone(),
            method: action.method.to_ascii_uppercase(),
            uri: action.uri.clone(),
            parameters: action.parameters.clone(),
            cookies: action.cookies.clone(),
            files: action.files.clone(),
            server: action.server.clone(),
            content: action.content.clone(),
            checks: action.checks.clone(),
        }
    }
}

/// Expand actions into test cases
///
/// Empty filters are treated as unset. An invalid `filter_regex` fails before
/// any case is produced.
pub fn expand(
    actions: &[ActionSpec],
    filter_id: Option<&str>,
    filter_regex: Option<&str>,
) -> Result<Vec<TestCase>> {
    let filter_id = filter_id.filter(|id| !id.is_empty());
    let filter_regex = match filter_regex.filter(|re| !re.is_empty()) {
        Some(raw) => Some(pattern::compile(raw).map_err(|reason| Error::InvalidFilter {
            pattern: raw.to_string(),
            reason,
        })?),
        None => None,
    };

    Ok(actions
        .iter()
        .filter(|action| filter_id.map_or(true, |id| id == action.test_id))
        .filter(|action| {
            filter_regex
                .as_ref()
                .map_or(true, |re| re.is_match(&action.test_id))
        })
        .map(TestCase::from)
        .collect())
}

/// Expand the actions of a loaded prefix
///
/// Explicit filters take precedence over the prefix's `test_filter` and
/// `test_regex` settings.
pub fn expand_cases(
    tree: &ConfigTree,
    prefix: &str,
    filter_id: Option<&str>,
    filter_regex: Option<&str>,
) -> Result<Vec<TestCase>> {
    let config = tree.get(prefix)?;
    expand(
        &config.actions,
        filter_id.or(config.test_filter.as_deref()),
        filter_regex.or(config.test_regex.as_deref()),
    )
}
