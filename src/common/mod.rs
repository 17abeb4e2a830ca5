//! Common utilities shared between the CLI and the engine

pub mod error;
pub mod logging;
pub mod paths;

pub use error::{AssertionFailure, DecodeError, DispatchError, Error, Result};
