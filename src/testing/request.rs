//! Request building
//!
//! Turns a [`TestCase`] plus the headers of the acting identity into an
//! [`ApiRequest`]: URI joining, upload staging, header merging and body
//! encoding.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::{Map, Value};
use tempfile::TempDir;

use super::case::TestCase;
use super::kernel::{ApiRequest, UploadedFile};
use crate::checks::flatten::stringify;
use crate::common::paths::resolve_upload;
use crate::common::DispatchError;

/// Join the base URL and a case URI, trimming surrounding slashes
pub fn join_uri(base_url: Option<&str>, uri: &str) -> String {
    format!("{}{}", base_url.unwrap_or_default(), uri)
        .trim_matches('/')
        .to_string()
}

/// Uploads copied to a scratch directory for one iteration
///
/// The scratch directory is removed when this is dropped.
#[derive(Debug, Default)]
pub struct StagedUploads {
    scratch: Option<TempDir>,
    files: Vec<UploadedFile>,
}

impl StagedUploads {
    pub fn files(&self) -> &[UploadedFile] {
        &self.files
    }

    pub fn scratch_dir(&self) -> Option<&Path> {
        self.scratch.as_ref().map(TempDir::path)
    }
}

/// Copy declared uploads from the fixture root into a scratch directory
pub fn stage_uploads(
    root: &Path,
    files: &BTreeMap<String, String>,
) -> Result<StagedUploads, DispatchError> {
    if files.is_empty() {
        return Ok(StagedUploads::default());
    }

    let scratch = tempfile::tempdir().map_err(|e| DispatchError::upload(root, e))?;
    let mut staged = Vec::with_capacity(files.len());

    for (field, declared) in files {
        let source = resolve_upload(root, declared);
        if !source.is_file() {
            return Err(DispatchError::upload(&source, "file does not exist"));
        }
        let file_name = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| field.clone());

        let bytes = std::fs::read(&source).map_err(|e| DispatchError::upload(&source, e))?;
        let target = scratch.path().join(&file_name);
        std::fs::write(&target, &bytes).map_err(|e| DispatchError::upload(&target, e))?;

        staged.push(UploadedFile {
            field: field.clone(),
            path: target,
            file_name,
            mime_type: sniff_mime_type(&bytes),
        });
    }

    Ok(StagedUploads {
        scratch: Some(scratch),
        files: staged,
    })
}

/// Guess a MIME type from magic bytes
pub fn sniff_mime_type(bytes: &[u8]) -> String {
    if let Ok(format) = image::guess_format(bytes) {
        return format.to_mime_type().to_string();
    }
    if bytes.starts_with(b"%PDF-") {
        return "application/pdf".to_string();
    }
    if bytes.starts_with(b"PK\x03\x04") {
        return "application/zip".to_string();
    }
    match std::str::from_utf8(bytes) {
        Ok(_) => "text/plain".to_string(),
        Err(_) => "application/octet-stream".to_string(),
    }
}

/// Encode the request body according to its content type
///
/// Missing or null `content` sends an empty body, not `[]`; declare
/// `content: []` to send an empty JSON array. Form content types are
/// url-encoded, `text/*` with string content is sent raw, anything else
/// as JSON.
pub fn encode_body(content: &Value, content_type: Option<&str>) -> Vec<u8> {
    if content.is_null() {
        return Vec::new();
    }

    let content_type = content_type.unwrap_or_default().to_ascii_lowercase();
    match content {
        Value::Object(map) if content_type.starts_with("application/x-www-form-urlencoded") => {
            let mut serializer = url::form_urlencoded::Serializer::new(String::new());
            for (key, value) in map {
                serializer.append_pair(key, &stringify(value));
            }
            serializer.finish().into_bytes()
        }
        Value::String(text) if content_type.starts_with("text/") => text.clone().into_bytes(),
        other => other.to_string().into_bytes(),
    }
}

fn string_map(map: &Map<String, Value>) -> BTreeMap<String, String> {
    map.iter()
        .map(|(key, value)| (key.clone(), stringify(value)))
        .collect()
}

/// Build the request for one iteration
///
/// `server` is the header map of the acting identity. The computed
/// `Content-Length` comes first, so a declared one wins.
pub fn build_request(
    case: &TestCase,
    server: &Map<String, Value>,
    base_url: Option<&str>,
    uploads: &StagedUploads,
) -> ApiRequest {
    let content_type = server
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
        .and_then(|(_, value)| value.as_str());
    let body = encode_body(&case.content, content_type);

    let mut headers = BTreeMap::new();
    headers.insert("Content-Length".to_string(), body.len().to_string());
    for (name, value) in string_map(server) {
        if name.eq_ignore_ascii_case("content-length") {
            headers.remove("Content-Length");
        }
        headers.insert(name, value);
    }

    ApiRequest {
        method: case.method.clone(),
        uri: join_uri(base_url, &case.uri),
        parameters: case.parameters.clone(),
        cookies: string_map(&case.cookies),
        files: uploads.files().to_vec(),
        headers,
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    fn case(content: Value, server: Value) -> TestCase {
        let action = json!({
            "test_id": "t",
            "uri": "/users/",
            "content": content,
            "server": server,
            "cookies": {"session": "abc", "remember": 1},
        });
        TestCase::from(&serde_json::from_value::<crate::config::ActionSpec>(action).unwrap())
    }

    #[test]
    fn test_join_uri_trims_slashes() {
        assert_eq!(join_uri(Some("http://localhost/"), "/ping/"), "http://localhost//ping");
        assert_eq!(join_uri(Some("http://localhost"), "/ping"), "http://localhost/ping");
        assert_eq!(join_uri(None, "/ping"), "ping");
    }

    #[test]
    fn test_json_body_and_content_length() {
        let case = case(json!({"name": "Ada"}), json!({"Content-Type": "application/json"}));
        let request = build_request(&case, &case.server, Some("http://api.test"), &StagedUploads::default());
        assert_eq!(request.uri, "http://api.test/users");
        assert_eq!(request.body, br#"{"name":"Ada"}"#.to_vec());
        assert_eq!(request.header("content-length"), Some("14"));
        assert_eq!(request.cookies["remember"], "1");
    }

    #[test]
    fn test_null_content_sends_empty_body() {
        let case = case(Value::Null, json!({}));
        let request = build_request(&case, &case.server, None, &StagedUploads::default());
        assert!(request.body.is_empty());
        assert_eq!(request.header("Content-Length"), Some("0"));

        assert_eq!(encode_body(&json!([]), Some("application/json")), b"[]".to_vec());
    }

    #[test]
    fn test_form_and_text_bodies() {
        assert_eq!(
            encode_body(
                &json!({"q": "a b", "page": 2}),
                Some("application/x-www-form-urlencoded")
            ),
            b"page=2&q=a+b".to_vec()
        );
        assert_eq!(encode_body(&json!("raw"), Some("text/plain")), b"raw".to_vec());
        assert_eq!(encode_body(&json!("raw"), None), b"\"raw\"".to_vec());
    }

    #[test]
    fn test_stage_uploads() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("docs")).unwrap();
        fs::write(root.path().join("docs/report.pdf"), b"%PDF-1.4\n").unwrap();

        let files: BTreeMap<String, String> =
            [("report".to_string(), "/docs/report.pdf".to_string())].into_iter().collect();
        let staged = stage_uploads(root.path(), &files).unwrap();
        let file = &staged.files()[0];
        assert_eq!(file.field, "report");
        assert_eq!(file.file_name, "report.pdf");
        assert_eq!(file.mime_type, "application/pdf");
        assert!(file.path.starts_with(staged.scratch_dir().unwrap()));

        let scratch = staged.scratch_dir().unwrap().to_path_buf();
        drop(staged);
        assert!(!scratch.exists());
    }

    #[test]
    fn test_missing_upload_fails() {
        let root = tempfile::tempdir().unwrap();
        let files: BTreeMap<String, String> =
            [("avatar".to_string(), "missing.png".to_string())].into_iter().collect();
        let err = stage_uploads(root.path(), &files).unwrap_err();
        assert!(matches!(err, DispatchError::Upload { .. }));
    }

    #[test]
    fn test_sniff_mime_type() {
        assert_eq!(sniff_mime_type(b"\x89PNG\r\n\x1a\n"), "image/png");
        assert_eq!(sniff_mime_type(b"PK\x03\x04rest"), "application/zip");
        assert_eq!(sniff_mime_type(b"hello"), "text/plain");
        assert_eq!(sniff_mime_type(&[0xC3, 0x28]), "application/octet-stream");
    }
}
