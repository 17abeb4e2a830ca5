//! Default locations for spec documents
//!
//! - Project: `./tests/api`
//! - User (via the directories crate):
//!   - Linux: `~/.config/apicheck/specs/`
//!   - macOS: `~/Library/Application Support/apicheck/specs/`
//!   - Windows: `%APPDATA%\apicheck\specs\`

use std::path::{Path, PathBuf};

/// Application name used for platform directories
const APP_NAME: &str = "apicheck";

/// Project-relative directory searched when no path is given
pub const PROJECT_SPEC_DIR: &str = "tests/api";

/// Default fixture directory for uploaded files
pub const DEFAULT_UPLOADS_ROOT: &str = "tests/api/uploads";

/// Get the user-level spec directory
pub fn user_spec_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME)
        .map(|dirs| dirs.config_dir().join("specs"))
}

/// Search roots used when the caller passes none
///
/// Only directories that exist are returned.
pub fn default_search_roots(cwd: &Path) -> Vec<PathBuf> {
    let mut roots = Vec::new();

    let project = cwd.join(PROJECT_SPEC_DIR);
    if project.is_dir() {
        roots.push(project);
    }

    if let Some(user) = user_spec_dir() {
        if user.is_dir() {
            roots.push(user);
        }
    }

    roots
}

/// Resolve a declared upload path against the fixture root
///
/// Declared paths are conventionally written with a leading slash
/// (`/avatars/me.png`); they are always treated as relative to the root.
pub fn resolve_upload(root: &Path, declared: &str) -> PathBuf {
    root.join(declared.trim_start_matches(['/', '\\']))
}
