//! Check dispatch
//!
//! Runs a parsed [`CheckSet`] against one response. Every check runs and
//! records its own failures; the only short-circuit is a body that cannot be
//! decoded, which skips the remaining content checks of the iteration.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::debug;

use super::decode::{self, ContentType};
use super::flatten::{flatten, match_paths, stringify};
use super::json::{contains_fragment, first_difference, missing_structure};
use super::{CacheOp, Channel, Check, CheckKind, CheckSet};
use crate::common::{AssertionFailure, DecodeError};
use crate::testing::{ApiResponse, CacheStore};

/// Interceptor verdict surfaced to the dispatcher
pub type Verdict = std::result::Result<(), String>;

/// What the dispatcher can observe after a dispatch
pub struct CheckContext<'a> {
    pub response: &'a ApiResponse,
    pub cache: Option<&'a dyn CacheStore>,
    /// Verdicts of interceptors whose assertions are deferred to the dispatcher
    pub verdicts: &'a BTreeMap<Channel, Verdict>,
}

/// Run every check, in canonical order, and collect the failures
pub fn run_checks(checks: &CheckSet, ctx: &CheckContext<'_>) -> Vec<AssertionFailure> {
    let mut run = Evaluation {
        ctx,
        json: None,
        aborted: false,
        failures: Vec::new(),
    };

    for check in checks.iter() {
        let kind = check.kind();
        if run.aborted && kind.is_content() {
            debug!("Skipping '{}' after decode failure", kind);
            continue;
        }
        run.check(check);
    }

    run.failures
}

struct Evaluation<'a> {
    ctx: &'a CheckContext<'a>,
    /// JSON body, decoded at most once
    json: Option<Value>,
    aborted: bool,
    failures: Vec<AssertionFailure>,
}

impl Evaluation<'_> {
    fn fail(&mut self, failure: AssertionFailure) {
        self.failures.push(failure);
    }

    fn abort(&mut self, kind: CheckKind, expected: &str, error: DecodeError) {
        self.aborted = true;
        self.fail(error.into_failure(kind.name(), expected));
    }

    fn body(&self) -> &[u8] {
        &self.ctx.response.body
    }

    /// Decoded JSON body, or `None` after recording the failure
    fn json(&mut self, kind: CheckKind) -> Option<Value> {
        if let Some(value) = &self.json {
            return Some(value.clone());
        }
        match decode::decode_json(self.body()) {
            Ok(value) => {
                self.json = Some(value.clone());
                Some(value)
            }
            Err(e) => {
                self.abort(kind, "json", e);
                None
            }
        }
    }

    fn check(&mut self, check: &Check) {
        let ctx = self.ctx;
        let kind = check.kind();
        let name = kind.name();

        match check {
            Check::StatusCode(expected) => {
                let actual = ctx.response.status;
                if actual != *expected {
                    self.fail(AssertionFailure::new(
                        name,
                        expected.to_string(),
                        actual.to_string(),
                        format!(
                            "Expected status code {} but received {}.",
                            expected, actual
                        ),
                    ));
                }
            }

            Check::Headers(expected) => {
                for (header, want) in expected {
                    match (ctx.response.header(header), want) {
                        (None, _) => self.fail(
                            AssertionFailure::new(
                                name,
                                want.clone().unwrap_or_default(),
                                "missing",
                                format!("Header [{}] not present on response.", header),
                            )
                            .at(header.as_str()),
                        ),
                        (Some(actual), Some(want)) if actual != want.as_str() => {
                            let actual = actual.to_string();
                            self.fail(
                                AssertionFailure::new(
                                    name,
                                    want.clone(),
                                    actual.clone(),
                                    format!(
                                        "Header [{}] was found, but value [{}] does not match [{}].",
                                        header, actual, want
                                    ),
                                )
                                .at(header.as_str()),
                            )
                        }
                        _ => {}
                    }
                }
            }

            Check::ContentType(content_type) => match content_type {
                ContentType::Json => {
                    self.json(kind);
                }
                other => {
                    if let Err(e) = other.validate(self.body()) {
                        self.abort(kind, other.name(), e);
                    }
                }
            },

            Check::Json(fragments) | Check::NoJson(fragments) => {
                let negate = matches!(check, Check::NoJson(_));
                let Some(body) = self.json(kind) else { return };
                for fragment in fragments {
                    if contains_fragment(&body, fragment) == negate {
                        let message = if negate {
                            format!(
                                "Found unexpected JSON fragment [{}] within [{}].",
                                fragment, body
                            )
                        } else {
                            format!("Unable to find JSON fragment [{}] within [{}].", fragment, body)
                        };
                        self.fail(AssertionFailure::new(
                            name,
                            fragment.to_string(),
                            body.to_string(),
                            message,
                        ));
                    }
                }
            }

            Check::JsonEquals(expected) => {
                let Some(body) = self.json(kind) else { return };
                if let Some((path, want, got)) = first_difference(expected, &body, "") {
                    let location = if path.is_empty() { "root" } else { path.as_str() };
                    let failure = AssertionFailure::new(
                        name,
                        want.to_string(),
                        got.to_string(),
                        format!(
                            "Response JSON differs at [{}]: expected [{}], got [{}].",
                            location, want, got
                        ),
                    );
                    self.fail(failure.at(location));
                }
            }

            Check::JsonStructure(structure) => {
                let Some(body) = self.json(kind) else { return };
                for path in missing_structure(structure, &body) {
                    self.fail(
                        AssertionFailure::new(
                            name,
                            path.clone(),
                            "missing",
                            format!("Response JSON is missing [{}].", path),
                        )
                        .at(path),
                    );
                }
            }

            Check::JsonDecoded(expected) | Check::NoJsonDecoded(expected) => {
                let negate = matches!(check, Check::NoJsonDecoded(_));
                let Some(body) = self.json(kind) else { return };
                let failures = match_paths(name, &flatten(&body), expected, negate, &body.to_string());
                self.failures.extend(failures);
            }

            Check::ImageDecoded(expected) => match decode::image_dimensions(self.body()) {
                Ok((width, height)) => {
                    let mut actual = Map::new();
                    actual.insert("width".to_string(), Value::String(width.to_string()));
                    actual.insert("height".to_string(), Value::String(height.to_string()));
                    self.compare_strings(name, expected, &actual);
                }
                Err(e) => self.abort(kind, "image", e),
            },

            Check::PdfDecoded(expected) => match decode::decode_pdf(self.body()) {
                Ok(view) => {
                    let failures = match_paths(name, &flatten(&view), expected, false, &view.to_string());
                    self.failures.extend(failures);
                }
                Err(e) => self.abort(kind, "pdf", e),
            },

            Check::CsvDecoded(expected) => match decode::decode_csv(self.body()) {
                Ok(view) => {
                    let failures = match_paths(name, &flatten(&view), expected, false, &view.to_string());
                    self.failures.extend(failures);
                }
                Err(e) => self.abort(kind, "csv", e),
            },

            Check::Intercepted(channel, expectation) => match ctx.verdicts.get(channel) {
                Some(Ok(())) => {}
                Some(Err(message)) => self.fail(AssertionFailure::new(
                    name,
                    expectation.to_string(),
                    "unsatisfied",
                    message.clone(),
                )),
                None => self.fail(AssertionFailure::new(
                    name,
                    expectation.to_string(),
                    "not intercepted",
                    format!("No {} interceptor was armed for this request.", channel.name()),
                )),
            },

            Check::Cache(assertions) => {
                let Some(cache) = ctx.cache else {
                    self.fail(AssertionFailure::new(
                        name,
                        "cache store",
                        "none",
                        "No cache store is attached to the executor.",
                    ));
                    return;
                };
                for assertion in assertions {
                    let present = cache.has(&assertion.key);
                    match assertion.op {
                        CacheOp::HasKey => {
                            if present {
                                cache.forget(&assertion.key);
                            } else {
                                self.fail(
                                    AssertionFailure::new(
                                        name,
                                        "present",
                                        "absent",
                                        format!("Cache key [{}] is missing.", assertion.key),
                                    )
                                    .at(assertion.key.as_str()),
                                );
                            }
                        }
                        CacheOp::NoKey | CacheOp::CleanKey => {
                            if present {
                                self.fail(
                                    AssertionFailure::new(
                                        name,
                                        "absent",
                                        "present",
                                        format!("Cache key [{}] should not exist.", assertion.key),
                                    )
                                    .at(assertion.key.as_str()),
                                );
                            }
                        }
                    }
                }
            }
        }
    }

    /// Compare expected values to actual ones as strings, keys included
    fn compare_strings(&mut self, name: &str, expected: &Map<String, Value>, actual: &Map<String, Value>) {
        let wanted: Vec<&String> = expected.keys().collect();
        let found: Vec<&String> = actual.keys().collect();
        if wanted != found {
            self.fail(AssertionFailure::new(
                name,
                format!("{:?}", wanted),
                format!("{:?}", found),
                format!("Expected keys {:?} but decoded {:?}.", wanted, found),
            ));
            return;
        }
        for (key, want) in expected {
            let want = stringify(want);
            let got = actual.get(key).map(stringify).unwrap_or_default();
            if want != got {
                self.fail(
                    AssertionFailure::new(
                        name,
                        want.clone(),
                        got.clone(),
                        format!("Expected [{}] on [{}], got [{}].", want, key, got),
                    )
                    .at(key.as_str()),
                );
            }
        }
    }
}
