//! Request/response records and the kernel seam
//!
//! The executor never talks to a transport directly. It builds an
//! [`ApiRequest`], hands it to a [`Kernel`] and checks the [`ApiResponse`]
//! that comes back. [`HttpKernel`](super::HttpKernel) is the live
//! implementation; tests plug in scripted kernels.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::common::DispatchError;

/// A file staged for upload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadedFile {
    /// Form field name
    pub field: String,
    /// Scratch copy of the fixture
    pub path: PathBuf,
    pub file_name: String,
    /// Sniffed MIME type
    pub mime_type: String,
}

/// A simulated request, ready for dispatch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiRequest {
    pub method: String,
    pub uri: String,
    pub parameters: Map<String, Value>,
    pub cookies: BTreeMap<String, String>,
    pub files: Vec<UploadedFile>,
    pub headers: BTreeMap<String, String>,
    #[serde(serialize_with = "serialize_body")]
    pub body: Vec<u8>,
}

impl ApiRequest {
    /// Header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A captured response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse {
    pub status: u16,
    /// Header names are stored lowercase
    pub headers: BTreeMap<String, String>,
    #[serde(serialize_with = "serialize_body")]
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: Vec::new(),
        }
    }

    /// A JSON response with a matching content type
    pub fn json(status: u16, body: &Value) -> Self {
        Self::new(status)
            .with_header("Content-Type", "application/json")
            .with_body(body.to_string())
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Bodies are dumped as text when they are UTF-8, otherwise as a size
fn serialize_body<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    match std::str::from_utf8(body) {
        Ok(text) => serializer.serialize_str(text),
        Err(_) => serializer.serialize_str(&format!("<{} bytes of binary data>", body.len())),
    }
}

/// The application under test
#[async_trait]
pub trait Kernel: Send + Sync {
    /// Handle one request
    async fn handle(&self, request: &ApiRequest) -> Result<ApiResponse, DispatchError>;

    /// Called after a successful dispatch, before isolation is closed
    async fn finalize(&self, _request: &ApiRequest, _response: &ApiResponse) {}

    /// Reset application state between identity iterations
    async fn refresh(&self) -> Result<(), DispatchError> {
        Ok(())
    }
}
