//! apicheck - Declarative HTTP API test engine
//!
//! Test intents are declared in YAML, TOML or JSON spec documents, merged
//! and validated into a configuration tree, expanded into test cases and
//! executed against a kernel with per-request isolation and response checks.

pub mod checks;
pub mod cli;
pub mod commands;
pub mod common;
pub mod config;
pub mod testing;

// Re-export commonly used types for tests
pub use common::{AssertionFailure, DispatchError, Error, Result};
pub use config::{load_config, ConfigTree, Override, SchemaSection};
pub use testing::{expand_cases, Engine, EngineConfig, Executor, TestCase};
