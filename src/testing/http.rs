//! Live HTTP kernel
//!
//! Sends each [`ApiRequest`] to a running server with reqwest. Parameters go
//! into the query string, cookies into a `Cookie` header and uploads into a
//! multipart form alongside the parameters.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{header, Client, Method, Url};
use tracing::debug;

use super::kernel::{ApiRequest, ApiResponse, Kernel};
use crate::checks::flatten::stringify;
use crate::common::{DispatchError, Error, Result};

/// Default request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Kernel backed by a real HTTP server
#[derive(Debug, Clone)]
pub struct HttpKernel {
    client: Client,
}

impl HttpKernel {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    async fn multipart(&self, request: &ApiRequest) -> std::result::Result<Form, DispatchError> {
        let mut form = Form::new();
        for (name, value) in &request.parameters {
            form = form.text(name.clone(), stringify(value));
        }
        for file in &request.files {
            let bytes = tokio::fs::read(&file.path)
                .await
                .map_err(|e| DispatchError::upload(&file.path, e))?;
            let part = Part::bytes(bytes)
                .file_name(file.file_name.clone())
                .mime_str(&file.mime_type)
                .map_err(|e| DispatchError::upload(&file.path, e))?;
            form = form.part(file.field.clone(), part);
        }
        Ok(form)
    }
}

fn transport(error: impl std::fmt::Display) -> DispatchError {
    DispatchError::Transport(error.to_string())
}

#[async_trait]
impl Kernel for HttpKernel {
    async fn handle(&self, request: &ApiRequest) -> std::result::Result<ApiResponse, DispatchError> {
        let method = Method::from_bytes(request.method.as_bytes()).map_err(transport)?;
        let url = Url::parse(&request.uri).map_err(transport)?;
        let has_files = !request.files.is_empty();

        let mut builder = self.client.request(method, url);

        for (name, value) in &request.headers {
            // reqwest computes these from the body it actually sends
            if name.eq_ignore_ascii_case("content-length")
                || (has_files && name.eq_ignore_ascii_case("content-type"))
            {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }

        if !request.cookies.is_empty() {
            let cookie = request
                .cookies
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("; ");
            builder = builder.header(header::COOKIE, cookie);
        }

        if has_files {
            builder = builder.multipart(self.multipart(request).await?);
        } else {
            if !request.parameters.is_empty() {
                let query: Vec<(&str, String)> = request
                    .parameters
                    .iter()
                    .map(|(name, value)| (name.as_str(), stringify(value)))
                    .collect();
                builder = builder.query(&query);
            }
            if !request.body.is_empty() {
                builder = builder.body(request.body.clone());
            }
        }

        debug!("{} {}", request.method, request.uri);
        let response = builder.send().await.map_err(transport)?;

        let status = response.status().as_u16();
        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in response.headers() {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            headers
                .entry(name.as_str().to_string())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert(value);
        }
        let body = response.bytes().await.map_err(transport)?.to_vec();

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}
