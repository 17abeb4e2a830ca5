//! End-to-end tests for the API test engine
//!
//! These tests load real spec documents from a temporary directory and run
//! the expanded cases against an in-process application kernel that:
//! 1. Writes to a transactional `MemoryStore`
//! 2. Sends mail through a `RecordingInterceptor`
//! 3. Warms a `MemoryCache`
//!
//! so that isolation, interception and cache checks are exercised together.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

use apicheck::checks::Channel;
use apicheck::common::DispatchError;
use apicheck::testing::{
    ApiRequest, ApiResponse, CacheStore, CaseOutcome, Engine, EngineConfig, Executor,
    IterationResult, Kernel, MemoryCache, MemoryStore, RecordingInterceptor, TestCase,
};
use async_trait::async_trait;
use serde_json::{json, Value};

const BASE_URL: &str = "http://app.test";

const SPEC: &str = r#"
api:
  base_url: http://app.test
  identities:
    admin:
      Authorization: Bearer admin
    guest:
      Authorization: Bearer guest
  actions:
    - test_id: ping
      method: get
      uri: /ping
      checks:
        json_decoded:
          status: ok

    - test_id: missing_route
      method: GET
      uri: /missing
      checks:
        json_decoded:
          status: ok

    - test_id: create_user
      users: [admin]
      uri: /users
      content:
        name: Ada
      checks:
        status_code: 201
        json_decoded:
          id: '/^\d+$/'
          name: Ada
        mail: 1

    - test_id: create_user_roles
      users: [admin, guest]
      uri: /users
      content:
        name: Bob
      checks:
        status_code: 201
        mail: 1

    - test_id: welcome_mail_named
      users: [admin]
      uri: /users
      content:
        name: Cy
      checks:
        status_code: 201
        mail:
          WelcomeMail: 2

    - test_id: cache_first
      method: GET
      uri: /cached
      checks:
        cache:
          hasKey: users.all

    - test_id: cache_second
      method: GET
      uri: /cached
      checks:
        cache:
          hasKey: users.all

    - test_id: upload_avatar
      uri: /avatar
      files:
        avatar: /avatars/me.png
      checks:
        json_decoded:
          avatar.field: avatar
          avatar.name: me.png
          avatar.mime: image/png

    - test_id: export_csv
      method: GET
      uri: /report
      checks:
        content_type: csv
        csv_decoded:
          r0.1: name
          r1.1: '/^A/'

    - test_id: kernel_error
      users: [admin]
      uri: /boom
"#;

/// Test context with a spec directory and an upload fixture root
struct TestContext {
    _temp_dir: tempfile::TempDir,
    spec_dir: PathBuf,
    uploads_dir: PathBuf,
}

impl TestContext {
    fn new() -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let spec_dir = temp_dir.path().join("specs");
        let uploads_dir = temp_dir.path().join("uploads");

        fs::create_dir_all(&spec_dir).expect("Failed to create spec dir");
        fs::create_dir_all(uploads_dir.join("avatars")).expect("Failed to create uploads dir");
        fs::write(spec_dir.join("api.yml"), SPEC).expect("Failed to write spec");
        fs::write(
            uploads_dir.join("avatars/me.png"),
            b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR",
        )
        .expect("Failed to write upload fixture");

        Self {
            _temp_dir: temp_dir,
            spec_dir,
            uploads_dir,
        }
    }

    fn engine(&self) -> Engine {
        let uploads = format!("uploads_root={}", self.uploads_dir.display());
        Engine::load(
            EngineConfig::new("api")
                .search_path(&self.spec_dir)
                .overrides(vec![uploads.parse().unwrap()]),
        )
        .expect("Failed to load spec")
    }

    fn case(&self, test_id: &str) -> TestCase {
        let cases = self.engine().cases(Some(test_id), None).unwrap();
        assert_eq!(cases.len(), 1, "expected exactly one case '{}'", test_id);
        cases.into_iter().next().unwrap()
    }
}

#[derive(Default)]
struct AppState {
    requests: Vec<ApiRequest>,
    in_transaction: Vec<bool>,
    refreshes: usize,
    cache_warmed: bool,
}

/// Scripted application under test
#[derive(Default)]
struct AppKernel {
    store: MemoryStore,
    cache: MemoryCache,
    mail: RecordingInterceptor,
    state: Mutex<AppState>,
}

#[async_trait]
impl Kernel for AppKernel {
    async fn handle(&self, request: &ApiRequest) -> Result<ApiResponse, DispatchError> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(request.clone());
        state.in_transaction.push(self.store.in_transaction());

        let path = request.uri.trim_start_matches(BASE_URL).trim_start_matches('/');
        let response = match (request.method.as_str(), path) {
            ("GET", "ping") => ApiResponse::json(200, &json!({"status": "ok"})),
            ("POST", "users") => match request.header("authorization") {
                Some("Bearer admin") => {
                    let body: Value = serde_json::from_slice(&request.body)
                        .map_err(|e| DispatchError::Kernel(e.to_string()))?;
                    let id = self.store.len() + 1;
                    self.store.insert(&format!("users.{}", id), body.clone());
                    self.mail.record("WelcomeMail");
                    ApiResponse::json(201, &json!({"id": id, "name": body["name"]}))
                }
                _ => ApiResponse::json(403, &json!({"message": "Forbidden"})),
            },
            ("GET", "cached") => {
                if !state.cache_warmed {
                    self.cache.put("users.all", json!([]));
                    state.cache_warmed = true;
                }
                ApiResponse::json(200, &json!({"ok": true}))
            }
            ("POST", "avatar") => {
                let file = &request.files[0];
                assert!(file.path.exists(), "upload should be staged during dispatch");
                ApiResponse::json(
                    200,
                    &json!({"avatar": {
                        "field": file.field,
                        "name": file.file_name,
                        "mime": file.mime_type,
                    }}),
                )
            }
            ("GET", "report") => ApiResponse::new(200)
                .with_header("Content-Type", "text/csv")
                .with_body("\"id\",\"name\"\n\"1\",\"Ada\""),
            ("POST", "boom") => {
                self.store.insert("users.partial", json!({}));
                return Err(DispatchError::Kernel("boom".to_string()));
            }
            _ => ApiResponse::json(404, &json!({"message": "Not Found"})),
        };

        Ok(response)
    }

    async fn refresh(&self) -> Result<(), DispatchError> {
        self.state.lock().unwrap().refreshes += 1;
        Ok(())
    }
}

fn executor(engine: &Engine, app: &Arc<AppKernel>) -> Executor {
    engine
        .executor(app.clone())
        .unwrap()
        .with_store(Arc::new(app.store.clone()))
        .with_cache(Arc::new(app.cache.clone()))
        .with_interceptor(Channel::Mail, Arc::new(app.mail.clone()))
}

async fn run(ctx: &TestContext, app: &Arc<AppKernel>, test_id: &str) -> CaseOutcome {
    let engine = ctx.engine();
    executor(&engine, app)
        .run_case(&ctx.case(test_id))
        .await
        .expect("case should be runnable")
}

fn failure_checks(outcome: &CaseOutcome) -> Vec<String> {
    outcome.failures().map(|f| f.check.clone()).collect()
}

// ============== Tests ==============

#[test]
fn test_cases_expand_in_declaration_order() {
    let ctx = TestContext::new();
    let cases = ctx.engine().cases(None, None).unwrap();
    let ids: Vec<&str> = cases.iter().map(|c| c.test_id.as_str()).collect();
    assert_eq!(ids.first(), Some(&"ping"));
    assert_eq!(ids.last(), Some(&"kernel_error"));
    assert_eq!(ids.len(), 10);

    let cache_cases = ctx.engine().cases(None, Some("/^cache_/")).unwrap();
    assert_eq!(cache_cases.len(), 2);
}

#[tokio::test]
async fn test_ping_passes() {
    let ctx = TestContext::new();
    let app = Arc::new(AppKernel::default());
    let outcome = run(&ctx, &app, "ping").await;

    assert!(outcome.passed(), "unexpected failures: {:?}", failure_checks(&outcome));
    let state = app.state.lock().unwrap();
    assert_eq!(state.requests[0].method, "GET");
    assert_eq!(state.requests[0].uri, "http://app.test/ping");
}

#[tokio::test]
async fn test_missing_route_reports_status_and_path() {
    let ctx = TestContext::new();
    let app = Arc::new(AppKernel::default());
    let outcome = run(&ctx, &app, "missing_route").await;

    assert!(!outcome.passed());
    assert_eq!(failure_checks(&outcome), vec!["status_code", "json_decoded"]);
    let path_failure = outcome.failures().nth(1).unwrap();
    assert!(path_failure.message.contains("Unable to find path [status]"));
}

#[tokio::test]
async fn test_writes_are_rolled_back_after_dispatch() {
    let ctx = TestContext::new();
    let app = Arc::new(AppKernel::default());
    let outcome = run(&ctx, &app, "create_user").await;

    assert!(outcome.passed(), "unexpected failures: {:?}", failure_checks(&outcome));
    assert!(app.store.is_empty());
    assert!(!app.store.in_transaction());

    let state = app.state.lock().unwrap();
    assert_eq!(state.in_transaction, vec![true]);
    assert_eq!(
        state.requests[0].header("authorization"),
        Some("Bearer admin")
    );
}

#[tokio::test]
async fn test_each_identity_runs_in_its_own_scope() {
    let ctx = TestContext::new();
    let app = Arc::new(AppKernel::default());
    let outcome = run(&ctx, &app, "create_user_roles").await;

    assert_eq!(outcome.iterations.len(), 2);
    assert!(outcome.iterations[0].passed());
    assert_eq!(outcome.iterations[1].identity.as_deref(), Some("guest"));
    assert!(failure_checks(&outcome).contains(&"status_code".to_string()));
    assert!(failure_checks(&outcome).contains(&"mail".to_string()));

    assert!(app.store.is_empty());
    let state = app.state.lock().unwrap();
    assert_eq!(state.refreshes, 1);
    assert_eq!(state.requests[1].header("authorization"), Some("Bearer guest"));
}

#[tokio::test]
async fn test_named_mail_expectation_is_checked_after_dispatch() {
    let ctx = TestContext::new();
    let app = Arc::new(AppKernel::default());
    let outcome = run(&ctx, &app, "welcome_mail_named").await;

    assert_eq!(failure_checks(&outcome), vec!["mail"]);
    let failure = outcome.failures().next().unwrap();
    assert!(failure.message.contains("[WelcomeMail] recorded 1 time(s), expected 2"));
    assert!(!app.mail.is_armed());
}

#[tokio::test]
async fn test_has_key_consumes_the_entry() {
    let ctx = TestContext::new();
    let app = Arc::new(AppKernel::default());

    let first = run(&ctx, &app, "cache_first").await;
    assert!(first.passed(), "unexpected failures: {:?}", failure_checks(&first));
    assert!(!app.cache.has("users.all"));

    let second = run(&ctx, &app, "cache_second").await;
    assert_eq!(failure_checks(&second), vec!["cache"]);
}

#[tokio::test]
async fn test_upload_is_staged_and_sniffed() {
    let ctx = TestContext::new();
    let app = Arc::new(AppKernel::default());
    let outcome = run(&ctx, &app, "upload_avatar").await;

    assert!(outcome.passed(), "unexpected failures: {:?}", failure_checks(&outcome));
    let state = app.state.lock().unwrap();
    let staged = &state.requests[0].files[0].path;
    assert!(!staged.exists(), "scratch copy should be removed after the iteration");
    assert!(!staged.starts_with(&ctx.uploads_dir));
}

#[tokio::test]
async fn test_csv_download() {
    let ctx = TestContext::new();
    let app = Arc::new(AppKernel::default());
    let outcome = run(&ctx, &app, "export_csv").await;
    assert!(outcome.passed(), "unexpected failures: {:?}", failure_checks(&outcome));
}

#[tokio::test]
async fn test_kernel_error_still_rolls_back() {
    let ctx = TestContext::new();
    let app = Arc::new(AppKernel::default());
    let outcome = run(&ctx, &app, "kernel_error").await;

    assert!(matches!(
        outcome.iterations[0].result,
        IterationResult::DispatchFailed(DispatchError::Kernel(_))
    ));
    assert!(app.store.is_empty());
    assert!(!app.store.in_transaction());
}

#[tokio::test]
async fn test_unknown_check_fails_before_dispatch() {
    let ctx = TestContext::new();
    fs::write(
        ctx.spec_dir.join("extra.yml"),
        "api:\n  actions:\n    - test_id: teapot\n      uri: /tea\n      checks:\n        brew: true\n",
    )
    .unwrap();

    let app = Arc::new(AppKernel::default());
    let engine = ctx.engine();
    let case = engine.cases(Some("teapot"), None).unwrap().remove(0);
    let err = executor(&engine, &app).run_case(&case).await.unwrap_err();

    assert!(err.to_string().contains("unknown check 'brew'"));
    assert!(app.state.lock().unwrap().requests.is_empty());
}

// ============== CLI ==============

fn apicheck(spec_dir: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_apicheck"))
        .args(args)
        .arg("--path")
        .arg(spec_dir)
        .output()
        .expect("Failed to run apicheck")
}

#[test]
fn test_cli_list_prints_cases() {
    let ctx = TestContext::new();
    let output = apicheck(&ctx.spec_dir, &["list", "--regex", "/^create_/"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("create_user"));
    assert!(stdout.contains("create_user_roles"));
    assert!(!stdout.contains("ping"));
}

#[test]
fn test_cli_invalid_regex_is_an_error() {
    let ctx = TestContext::new();
    let output = apicheck(&ctx.spec_dir, &["list", "--regex", "["]);
    assert_eq!(output.status.code(), Some(2));

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Invalid regex '['"));
}

#[test]
fn test_cli_invalid_config_is_an_error() {
    let ctx = TestContext::new();
    fs::write(
        ctx.spec_dir.join("broken.yml"),
        "api:\n  actions:\n    - test_id: nouri\n",
    )
    .unwrap();

    let output = apicheck(&ctx.spec_dir, &["list"]);
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("api.actions"));
}
