//! Spec configuration tree
//!
//! Builds one validated [`PrefixConfig`] per prefix from every spec document
//! under the search roots plus the command-line overrides, validated against
//! the composed schema sections.

mod loader;
mod overrides;
pub mod schema;

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::common::paths::DEFAULT_UPLOADS_ROOT;
use crate::common::{Error, Result};

pub use loader::{discover, load_documents, parse_document, Document};
pub use overrides::{overrides_document, parse_bool_flag, Override};
use schema::Node;

/// Named groups of settings a prefix can be validated against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaSection {
    /// `base_url`, `test_filter`, `test_regex`, `uploads_root`, `identities`
    SystemSettings,
    /// `logging.file`, `logging.verbosity`, `logging.query`
    Logging,
    /// The `actions` list of API test intents
    ApiActions,
}

impl SchemaSection {
    /// Composition used when the caller names no sections
    pub const DEFAULT: [SchemaSection; 3] = [
        SchemaSection::SystemSettings,
        SchemaSection::ApiActions,
        SchemaSection::Logging,
    ];

    /// Identifier used in spec files and on the command line
    pub fn name(&self) -> &'static str {
        match self {
            SchemaSection::SystemSettings => "system_settings",
            SchemaSection::Logging => "logging",
            SchemaSection::ApiActions => "api_actions",
        }
    }

    /// Look up a section by identifier
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "system_settings" => Some(SchemaSection::SystemSettings),
            "logging" => Some(SchemaSection::Logging),
            "api_actions" | "api_controller_actions" | "api_controller_test_set" => {
                Some(SchemaSection::ApiActions)
            }
            _ => None,
        }
    }

    fn children(&self) -> Vec<(&'static str, Node)> {
        match self {
            SchemaSection::SystemSettings => vec![
                ("base_url", Node::text()),
                ("test_filter", Node::text()),
                ("test_regex", Node::text()),
                (
                    "uploads_root",
                    Node::text().with_default(json!(DEFAULT_UPLOADS_ROOT)),
                ),
                (
                    "identities",
                    Node::mapping()
                        .of(Node::mapping())
                        .with_default(json!({})),
                ),
            ],
            SchemaSection::Logging => vec![(
                "logging",
                Node::section(vec![
                    ("file", Node::text().with_default(json!("stderr"))),
                    ("verbosity", Node::integer(0, 9).with_default(json!(0))),
                    ("query", Node::boolean().with_default(json!(false))),
                ]),
            )],
            SchemaSection::ApiActions => vec![("actions", Node::list(action_node(), 1))],
        }
    }
}

fn action_node() -> Node {
    Node::section(vec![
        ("test_id", Node::text().required().non_empty()),
        ("users", Node::list(Node::text().non_empty(), 0)),
        ("method", Node::text().non_empty().with_default(json!("POST"))),
        ("uri", Node::text().required().non_empty()),
        ("parameters", Node::mapping().with_default(json!({}))),
        ("cookies", Node::mapping().with_default(json!({}))),
        ("files", Node::mapping().of(Node::text()).with_default(json!({}))),
        (
            "server",
            Node::mapping().with_default(json!({"Content-Type": "application/json"})),
        ),
        ("content", Node::variable()),
        (
            "checks",
            Node::open_section(vec![
                ("status_code", json!(200)),
                ("content_type", json!("json")),
            ]),
        ),
    ])
}

/// Compose the schema of one prefix from its sections
///
/// Duplicate sections are ignored. An empty list selects
/// [`SchemaSection::DEFAULT`].
pub fn compose_schema(sections: &[SchemaSection]) -> Node {
    let sections: &[SchemaSection] = if sections.is_empty() {
        &SchemaSection::DEFAULT
    } else {
        sections
    };

    // holder for YAML anchors shared between actions
    let mut children = vec![("___meta", Node::variable())];
    let mut seen = Vec::new();
    for section in sections {
        if seen.contains(section) {
            continue;
        }
        seen.push(*section);
        children.extend(section.children());
    }
    Node::section(children)
}

/// Logging settings of a prefix
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Sink: `stderr`, `stdout` or a file path
    #[serde(default = "default_log_file")]
    pub file: String,
    /// Diagnostic verbosity, 0 (quiet) to 9
    #[serde(default)]
    pub verbosity: u8,
    /// Dump store query logs after each dispatch
    #[serde(default)]
    pub query: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            file: default_log_file(),
            verbosity: 0,
            query: false,
        }
    }
}

fn default_log_file() -> String {
    "stderr".to_string()
}

fn default_uploads_root() -> PathBuf {
    PathBuf::from(DEFAULT_UPLOADS_ROOT)
}

fn default_method() -> String {
    "POST".to_string()
}

fn default_server() -> Map<String, Value> {
    let mut server = Map::new();
    server.insert("Content-Type".to_string(), json!("application/json"));
    server
}

/// One declared test intent as written in a spec document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub test_id: String,
    /// Identities to run as, in order; empty means anonymous
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default = "default_method")]
    pub method: String,
    pub uri: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub cookies: Map<String, Value>,
    /// Upload field name → path relative to the uploads root
    #[serde(default)]
    pub files: BTreeMap<String, String>,
    /// Request header overrides
    #[serde(default = "default_server")]
    pub server: Map<String, Value>,
    /// Request body value
    #[serde(default)]
    pub content: Value,
    /// Check name → check argument
    #[serde(default)]
    pub checks: Map<String, Value>,
}

/// Validated settings of one prefix
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefixConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    /// Run only the action with this exact `test_id`
    #[serde(default)]
    pub test_filter: Option<String>,
    /// Run only actions whose `test_id` matches this delimited regex
    #[serde(default)]
    pub test_regex: Option<String>,
    /// Fixture directory for uploaded files
    #[serde(default = "default_uploads_root")]
    pub uploads_root: PathBuf,
    /// Identity name → header overrides applied when acting as that identity
    #[serde(default)]
    pub identities: BTreeMap<String, Map<String, Value>>,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
}

/// Validated configuration for every loaded prefix
#[derive(Debug, Clone, Default)]
pub struct ConfigTree {
    prefixes: BTreeMap<String, PrefixConfig>,
}

impl ConfigTree {
    /// Get the settings of a prefix
    pub fn get(&self, prefix: &str) -> Result<&PrefixConfig> {
        self.prefixes
            .get(prefix)
            .ok_or_else(|| Error::UnknownPrefix(prefix.to_string()))
    }

    /// Names of all loaded prefixes
    pub fn prefixes(&self) -> impl Iterator<Item = &str> {
        self.prefixes.keys().map(String::as_str)
    }

    pub fn insert(&mut self, prefix: &str, config: PrefixConfig) {
        self.prefixes.insert(prefix.to_string(), config);
    }
}

/// Build the validated configuration of `prefix`
///
/// Documents are merged in sorted path order, then the overrides document,
/// then the result is validated against the composed schema.
pub fn load_config(
    prefix: &str,
    search_paths: &[PathBuf],
    overrides: &[Override],
    schemas: &[SchemaSection],
) -> Result<ConfigTree> {
    let schema = compose_schema(schemas);
    let mut merged = Value::Null;

    for document in load_documents(search_paths)? {
        match document.value.get(prefix) {
            Some(section) => {
                debug!("Merging '{}' from {}", prefix, document.path.display());
                merged = schema.merge(merged, section.clone());
            }
            None => debug!(
                "Spec document {} has no '{}' section",
                document.path.display(),
                prefix
            ),
        }
    }

    if !overrides.is_empty() {
        merged = schema.merge(merged, overrides_document(overrides));
    }

    let normalized = schema
        .normalize(Some(&merged), prefix)?
        .unwrap_or_else(|| Value::Object(Map::new()));

    let config: PrefixConfig = serde_json::from_value(normalized)
        .map_err(|e| Error::config_validation(prefix, e.to_string()))?;

    debug!(
        "Loaded '{}' with {} action(s)",
        prefix,
        config.actions.len()
    );

    let mut tree = ConfigTree::default();
    tree.insert(prefix, config);
    Ok(tree)
}

type ConfigCache = Mutex<HashMap<String, Arc<ConfigTree>>>;

static CONFIG_CACHE: OnceLock<ConfigCache> = OnceLock::new();

/// Like [`load_config`], computed once per prefix for the whole process
///
/// Later calls for the same prefix return the first result even if the
/// documents or overrides changed in between.
pub fn load_config_cached(
    prefix: &str,
    search_paths: &[PathBuf],
    overrides: &[Override],
    schemas: &[SchemaSection],
) -> Result<Arc<ConfigTree>> {
    let cache = CONFIG_CACHE.get_or_init(ConfigCache::default);

    if let Some(tree) = lock(cache)?.get(prefix) {
        return Ok(Arc::clone(tree));
    }

    let tree = Arc::new(load_config(prefix, search_paths, overrides, schemas)?);
    let mut guard = lock(cache)?;
    Ok(Arc::clone(guard.entry(prefix.to_string()).or_insert(tree)))
}

fn lock(cache: &ConfigCache) -> Result<std::sync::MutexGuard<'_, HashMap<String, Arc<ConfigTree>>>> {
    cache
        .lock()
        .map_err(|_| Error::Internal("config cache lock poisoned".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &std::path::Path, name: &str, body: &str) {
        fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn test_actions_append_across_documents() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "a.yml",
            "api:\n  base_url: http://a\n  actions:\n    - {test_id: one, uri: /one}\n",
        );
        write(
            dir.path(),
            "b.yml",
            "api:\n  base_url: http://b\n  actions:\n    - {test_id: two, uri: /two, method: GET}\n",
        );

        let tree = load_config("api", &[dir.path().to_path_buf()], &[], &[]).unwrap();
        let api = tree.get("api").unwrap();

        assert_eq!(api.base_url.as_deref(), Some("http://b"));
        let ids: Vec<&str> = api.actions.iter().map(|a| a.test_id.as_str()).collect();
        assert_eq!(ids, vec!["one", "two"]);
        assert_eq!(api.actions[0].method, "POST");
        assert_eq!(api.actions[1].method, "GET");
        assert_eq!(api.actions[0].checks["status_code"], json!(200));
        assert_eq!(api.actions[0].checks["content_type"], json!("json"));
        assert_eq!(api.actions[0].server["Content-Type"], json!("application/json"));
    }

    #[test]
    fn test_empty_sequences_read_as_empty_mappings() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "a.yml",
            "api:\n  actions:\n    - {test_id: one, uri: /one, parameters: [], files: [], cookies: []}\n",
        );

        let tree = load_config("api", &[dir.path().to_path_buf()], &[], &[]).unwrap();
        let action = &tree.get("api").unwrap().actions[0];
        assert!(action.parameters.is_empty());
        assert!(action.files.is_empty());
        assert!(action.cookies.is_empty());
    }

    #[test]
    fn test_mistyped_request_field_names_its_path() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "a.yml",
            "api:\n  actions:\n    - {test_id: one, uri: /one}\n    - {test_id: two, uri: /two, parameters: [a, b]}\n",
        );

        let err = load_config("api", &[dir.path().to_path_buf()], &[], &[]).unwrap_err();
        match err {
            Error::ConfigValidation { path, .. } => assert_eq!(path, "api.actions.1.parameters"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_overrides_win_over_documents() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "a.yml",
            "api:\n  logging: {verbosity: 1}\n  actions:\n    - {test_id: one, uri: /one}\n",
        );

        let overrides: Vec<Override> = ["logging.verbosity=4", "logging[query]=on", "test_filter=one"]
            .iter()
            .map(|t| t.parse().unwrap())
            .collect();
        let tree = load_config("api", &[dir.path().to_path_buf()], &overrides, &[]).unwrap();
        let api = tree.get("api").unwrap();

        assert_eq!(api.logging.verbosity, 4);
        assert!(api.logging.query);
        assert_eq!(api.test_filter.as_deref(), Some("one"));
    }

    #[test]
    fn test_missing_uri_names_offending_path() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.yml", "api:\n  actions:\n    - {test_id: one}\n");

        let err = load_config("api", &[dir.path().to_path_buf()], &[], &[]).unwrap_err();
        match err {
            Error::ConfigValidation { path, .. } => assert_eq!(path, "api.actions.0.uri"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_empty_actions_list_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.yml", "api:\n  actions: []\n");

        let err = load_config("api", &[dir.path().to_path_buf()], &[], &[]).unwrap_err();
        assert!(matches!(err, Error::ConfigValidation { ref path, .. } if path == "api.actions"));
    }

    #[test]
    fn test_unknown_override_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let overrides = vec!["colour=blue".parse::<Override>().unwrap()];
        let err = load_config("api", &[dir.path().to_path_buf()], &overrides, &[]).unwrap_err();
        assert!(matches!(err, Error::ConfigValidation { ref path, .. } if path == "api.colour"));
    }

    #[test]
    fn test_sections_limit_accepted_keys() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.yml", "api:\n  base_url: http://x\n");

        let err = load_config(
            "api",
            &[dir.path().to_path_buf()],
            &[],
            &[SchemaSection::Logging],
        )
        .unwrap_err();
        assert!(matches!(err, Error::ConfigValidation { ref path, .. } if path == "api.base_url"));
    }

    #[test]
    fn test_other_prefixes_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "a.yml",
            "admin:\n  bogus: true\napi:\n  actions:\n    - {test_id: one, uri: /one}\n",
        );
        let tree = load_config("api", &[dir.path().to_path_buf()], &[], &[]).unwrap();
        assert_eq!(tree.get("api").unwrap().actions.len(), 1);
        assert!(matches!(tree.get("admin"), Err(Error::UnknownPrefix(_))));
    }

    #[test]
    fn test_cached_load_is_computed_once() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "a.yml",
            "cache_probe:\n  actions:\n    - {test_id: one, uri: /one}\n",
        );
        let roots = [dir.path().to_path_buf()];

        let first = load_config_cached("cache_probe", &roots, &[], &[]).unwrap();
        write(
            dir.path(),
            "b.yml",
            "cache_probe:\n  actions:\n    - {test_id: two, uri: /two}\n",
        );
        let second = load_config_cached("cache_probe", &roots, &[], &[]).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.get("cache_probe").unwrap().actions.len(), 1);
    }

    #[test]
    fn test_section_names_round_trip() {
        for section in SchemaSection::DEFAULT {
            assert_eq!(SchemaSection::from_name(section.name()), Some(section));
        }
        assert_eq!(
            SchemaSection::from_name("api_controller_actions"),
            Some(SchemaSection::ApiActions)
        );
        assert_eq!(SchemaSection::from_name("nope"), None);
    }
}
