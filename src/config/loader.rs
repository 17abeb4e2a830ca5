//! Spec document discovery and parsing
//!
//! Walks every search root (following symlinks) and parses each YAML, TOML
//! or JSON document into a `serde_json::Value`. Documents are returned in
//! sorted path order so that last-wins merging is stable between runs.
//!
//! The `uploads` directory directly under a root holds fixtures and is not
//! walked. Documents whose top level is not a mapping are skipped.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;
use walkdir::WalkDir;

use crate::common::{Error, Result};

/// File extensions recognised as spec documents
const EXTENSIONS: &[&str] = &["yml", "yaml", "toml", "json"];

/// Fixture directory name excluded from discovery
const UPLOADS_DIR: &str = "uploads";

/// A parsed spec document
#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    pub value: Value,
}

/// List spec documents under the given roots
pub fn discover(roots: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for root in roots {
        if !root.exists() {
            return Err(Error::ConfigRead {
                path: root.display().to_string(),
                error: "search path does not exist".to_string(),
            });
        }

        let uploads = root.join(UPLOADS_DIR);
        let walker = WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_entry(|entry| entry.path() != uploads.as_path());

        for entry in walker {
            let entry = entry.map_err(|e| Error::ConfigRead {
                path: root.display().to_string(),
                error: e.to_string(),
            })?;
            if entry.file_type().is_file() && has_spec_extension(entry.path()) {
                files.push(entry.into_path());
            }
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}

fn has_spec_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Parse a single document by extension
///
/// Empty documents parse to `Value::Null`.
pub fn parse_document(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::ConfigRead {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;

    let parse_error = |message: String| Error::ConfigParse {
        path: path.display().to_string(),
        message,
    };

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    match extension.as_str() {
        "toml" => toml::from_str::<Value>(&content).map_err(|e| parse_error(e.to_string())),
        "json" => serde_json::from_str::<Value>(&content).map_err(|e| parse_error(e.to_string())),
        _ => {
            let mut yaml: serde_yaml::Value =
                serde_yaml::from_str(&content).map_err(|e| parse_error(e.to_string()))?;
            yaml.apply_merge().map_err(|e| parse_error(e.to_string()))?;
            serde_json::to_value(yaml).map_err(|e| parse_error(e.to_string()))
        }
    }
}

/// Discover and parse every document under the roots
pub fn load_documents(roots: &[PathBuf]) -> Result<Vec<Document>> {
    let mut documents = Vec::new();

    for path in discover(roots)? {
        let value = parse_document(&path)?;
        match value {
            Value::Null => debug!("Skipping empty spec document {}", path.display()),
            Value::Object(_) => documents.push(Document { path, value }),
            _ => debug!(
                "Skipping {}: top level is not a mapping",
                path.display()
            ),
        }
    }

    Ok(documents)
}
