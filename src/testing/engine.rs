//! Engine entry point
//!
//! Bundles everything needed to load a prefix and run its cases, so callers
//! pass one explicit [`EngineConfig`] instead of reaching for globals.

use std::path::PathBuf;
use std::sync::Arc;

use super::case::{expand_cases, TestCase};
use super::kernel::Kernel;
use super::runner::{Executor, RunSettings};
use crate::common::paths::default_search_roots;
use crate::common::Result;
use crate::config::{load_config, load_config_cached, ConfigTree, Override, PrefixConfig, SchemaSection};

/// Everything that determines which configuration is loaded
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub prefix: String,
    pub search_paths: Vec<PathBuf>,
    pub overrides: Vec<Override>,
    pub schemas: Vec<SchemaSection>,
    /// Reuse a configuration already loaded for this prefix in this process
    pub cached: bool,
}

impl EngineConfig {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            search_paths: Vec::new(),
            overrides: Vec::new(),
            schemas: SchemaSection::DEFAULT.to_vec(),
            cached: false,
        }
    }

    pub fn search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_paths.push(path.into());
        self
    }

    pub fn overrides(mut self, overrides: Vec<Override>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn schemas(mut self, schemas: Vec<SchemaSection>) -> Self {
        if !schemas.is_empty() {
            self.schemas = schemas;
        }
        self
    }

    pub fn cached(mut self, cached: bool) -> Self {
        self.cached = cached;
        self
    }
}

/// A loaded configuration ready to expand and run
#[derive(Debug, Clone)]
pub struct Engine {
    config: EngineConfig,
    tree: Arc<ConfigTree>,
}

impl Engine {
    /// Load and validate the configuration
    ///
    /// With no search paths, the project and user spec directories are used.
    pub fn load(mut config: EngineConfig) -> Result<Self> {
        if config.search_paths.is_empty() {
            let cwd = std::env::current_dir()?;
            config.search_paths = default_search_roots(&cwd);
        }

        let tree = if config.cached {
            load_config_cached(
                &config.prefix,
                &config.search_paths,
                &config.overrides,
                &config.schemas,
            )?
        } else {
            Arc::new(load_config(
                &config.prefix,
                &config.search_paths,
                &config.overrides,
                &config.schemas,
            )?)
        };

        Ok(Self { config, tree })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn tree(&self) -> &ConfigTree {
        &self.tree
    }

    /// Settings of the loaded prefix
    pub fn prefix_config(&self) -> Result<&PrefixConfig> {
        self.tree.get(&self.config.prefix)
    }

    /// Expand the prefix's actions into cases
    pub fn cases(&self, filter_id: Option<&str>, filter_regex: Option<&str>) -> Result<Vec<TestCase>> {
        expand_cases(&self.tree, &self.config.prefix, filter_id, filter_regex)
    }

    /// Build an executor for this prefix around a kernel
    pub fn executor(&self, kernel: Arc<dyn Kernel>) -> Result<Executor> {
        let settings = RunSettings::from(self.prefix_config()?);
        Ok(Executor::new(kernel, settings))
    }
}
