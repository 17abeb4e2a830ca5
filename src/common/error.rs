//! Error types for the API test engine
//!
//! Configuration-phase errors abort the whole run before any case executes.
//! Per-iteration failures (`DispatchError`) and assertion mismatches
//! (`AssertionFailure`) are reported per case and never abort the run.

use std::fmt;
use std::io;

use serde::Serialize;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for configuration and case preparation
#[derive(Error, Debug)]
pub enum Error {
    // === Configuration Errors ===
    #[error("Invalid configuration at '{path}': {message}")]
    ConfigValidation { path: String, message: String },

    #[error("Failed to read spec document '{path}': {error}")]
    ConfigRead { path: String, error: String },

    #[error("Failed to parse spec document '{path}': {message}")]
    ConfigParse { path: String, message: String },

    #[error("Invalid override '{0}'. Expected key=value")]
    InvalidOverride(String),

    #[error("Unknown config prefix '{0}'")]
    UnknownPrefix(String),

    // === Filter Errors ===
    #[error("Invalid regex '{pattern}' provided as test filter: {reason}")]
    InvalidFilter { pattern: String, reason: String },

    // === Check Errors ===
    #[error("Test '{test_id}' declares unknown check '{check}'")]
    UnknownCheck { test_id: String, check: String },

    #[error("Invalid argument for check '{check}': {message}")]
    InvalidCheckArgument { check: String, message: String },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a configuration validation error for a dotted path
    pub fn config_validation(path: &str, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            path: path.to_string(),
            message: message.into(),
        }
    }

    /// Create an invalid check argument error
    pub fn invalid_check_argument(check: &str, message: impl Into<String>) -> Self {
        Self::InvalidCheckArgument {
            check: check.to_string(),
            message: message.into(),
        }
    }
}

/// Failure of a single request dispatch
///
/// Aborts the current identity iteration; isolation teardown still runs.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Kernel raised an error: {0}")]
    Kernel(String),

    #[error("Failed to stage upload '{path}': {reason}")]
    Upload { path: String, reason: String },

    #[error("Failed to authenticate identity '{identity}': {reason}")]
    Authentication { identity: String, reason: String },

    #[error("Failed to refresh application context: {0}")]
    Refresh(String),

    #[error("Failed to open isolation scope: {0}")]
    Isolation(String),
}

impl DispatchError {
    /// Create an upload staging error
    pub fn upload(path: &std::path::Path, reason: impl fmt::Display) -> Self {
        Self::Upload {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}

/// An unmet expectation recorded by a check handler
///
/// Carries enough context to diagnose the mismatch without re-running the case.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssertionFailure {
    /// Name of the check that failed (e.g. `status_code`)
    pub check: String,
    /// Dotted path or other location where expectation and response diverge
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Expected value, rendered for display
    pub expected: String,
    /// Actual value, rendered for display
    pub actual: String,
    /// Human-readable explanation
    pub message: String,
}

impl AssertionFailure {
    /// Create a failure without a path
    pub fn new(
        check: &str,
        expected: impl Into<String>,
        actual: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            check: check.to_string(),
            path: None,
            expected: expected.into(),
            actual: actual.into(),
            message: message.into(),
        }
    }

    /// Attach the path where the mismatch occurred
    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl fmt::Display for AssertionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "[{}] {} (at {})", self.check, self.message, path),
            None => write!(f, "[{}] {}", self.check, self.message),
        }
    }
}

/// Response body does not match its declared content type
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Invalid JSON was returned from the route. Perhaps an exception was thrown? ({0})")]
    Json(String),

    #[error("Response is not valid HTML: {0}")]
    Html(String),

    #[error("Response is not a decodable image: {0}")]
    Image(String),

    #[error("Response is not a valid PDF: {0}")]
    Pdf(String),

    #[error("Response is not valid CSV: {0}")]
    Csv(String),

    #[error("Response is not a valid ZIP archive: {0}")]
    Zip(String),
}

impl DecodeError {
    /// Convert into an assertion failure for the given check
    pub fn into_failure(self, check: &str, expected: &str) -> AssertionFailure {
        AssertionFailure::new(check, expected, "undecodable body", self.to_string())
    }
}
