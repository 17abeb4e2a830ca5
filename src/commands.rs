//! CLI command definitions
//!
//! Defines the clap commands for the apicheck CLI.

use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::config::{Override, SchemaSection};

#[derive(Subcommand)]
pub enum Commands {
    /// Run the declared test cases against a live server
    Run {
        #[command(flatten)]
        spec: SpecArgs,

        /// Stop after the first failing case
        #[arg(long)]
        fail_fast: bool,

        /// Verbose output (print every failure detail)
        #[arg(long, short)]
        verbose: bool,
    },

    /// List the test cases that would run, in order
    #[command(alias = "ls")]
    List {
        #[command(flatten)]
        spec: SpecArgs,
    },
}

/// Options shared by every command that loads spec documents
#[derive(Args, Debug, Clone)]
pub struct SpecArgs {
    /// Directory to search for spec documents (default: ./tests/api and the user spec dir)
    /// Can be specified multiple times: --path tests/api --path ../shared
    #[arg(long = "path", short = 'p')]
    pub paths: Vec<PathBuf>,

    /// Top-level key of the spec documents to load
    #[arg(long, default_value = "api")]
    pub prefix: String,

    /// Schema section to validate against (system_settings, api_actions, logging)
    /// Defaults to all three
    #[arg(long = "schema", value_parser = parse_schema)]
    pub schemas: Vec<SchemaSection>,

    /// Run only the case with this exact test_id
    #[arg(long)]
    pub filter: Option<String>,

    /// Run only cases whose test_id matches this delimited regex, e.g. '/^user_/'
    #[arg(long)]
    pub regex: Option<String>,

    /// Setting overrides as key=value, e.g. base_url=http://localhost:8000 logging.verbosity=2
    pub overrides: Vec<Override>,
}

fn parse_schema(raw: &str) -> Result<SchemaSection, String> {
    SchemaSection::from_name(raw).ok_or_else(|| {
        format!(
            "unknown schema section '{}' (expected system_settings, api_actions or logging)",
            raw
        )
    })
}
