//! Test case executor
//!
//! Runs one [`TestCase`] per identity: authenticate, arm interceptors, open
//! isolation, dispatch through the kernel, tear everything down, then run
//! the checks against the captured response.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::case::TestCase;
use super::identity::{IdentityProvider, StaticIdentities};
use super::intercept::{prepare_cache, CacheStore, Interceptor, InterceptorSet};
use super::isolation::{IsolationScope, TransactionalStore};
use super::kernel::{ApiRequest, ApiResponse, Kernel};
use super::request::{build_request, stage_uploads};
use crate::checks::{run_checks, Channel, CheckContext, CheckKind, CheckSet};
use crate::common::logging::Diagnostics;
use crate::common::paths::DEFAULT_UPLOADS_ROOT;
use crate::common::{AssertionFailure, DispatchError, Result};
use crate::config::{LoggingSettings, PrefixConfig};

/// Diagnostic levels for payload dumps
const LEVEL_IDENTITY: u8 = 1;
const LEVEL_REQUEST: u8 = 2;
const LEVEL_RESPONSE: u8 = 6;

/// Prefix-wide settings the executor needs
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub base_url: Option<String>,
    pub uploads_root: PathBuf,
    pub identities: BTreeMap<String, Map<String, Value>>,
    pub logging: LoggingSettings,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            uploads_root: PathBuf::from(DEFAULT_UPLOADS_ROOT),
            identities: BTreeMap::new(),
            logging: LoggingSettings::default(),
        }
    }
}

impl From<&PrefixConfig> for RunSettings {
    fn from(config: &PrefixConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            uploads_root: config.uploads_root.clone(),
            identities: config.identities.clone(),
            logging: config.logging.clone(),
        }
    }
}

/// Result of one identity iteration
#[derive(Debug)]
pub enum IterationResult {
    Passed,
    Failed(Vec<AssertionFailure>),
    DispatchFailed(DispatchError),
}

#[derive(Debug)]
pub struct IterationOutcome {
    /// Acting identity, `None` when anonymous
    pub identity: Option<String>,
    pub result: IterationResult,
}

impl IterationOutcome {
    pub fn passed(&self) -> bool {
        matches!(self.result, IterationResult::Passed)
    }
}

/// Result of running one case
#[derive(Debug)]
pub struct CaseOutcome {
    pub test_id: String,
    pub iterations: Vec<IterationOutcome>,
}

impl CaseOutcome {
    pub fn passed(&self) -> bool {
        self.iterations.iter().all(IterationOutcome::passed)
    }

    /// Every assertion failure across iterations
    pub fn failures(&self) -> impl Iterator<Item = &AssertionFailure> {
        self.iterations
            .iter()
            .filter_map(|it| match &it.result {
                IterationResult::Failed(failures) => Some(failures),
                _ => None,
            })
            .flatten()
    }
}

/// Runs test cases against a kernel
pub struct Executor {
    kernel: Arc<dyn Kernel>,
    stores: Vec<Arc<dyn TransactionalStore>>,
    interceptors: InterceptorSet,
    cache: Option<Arc<dyn CacheStore>>,
    identities: Arc<dyn IdentityProvider>,
    settings: RunSettings,
    diagnostics: Diagnostics,
}

impl Executor {
    /// Create an executor; identities come from `settings.identities`
    pub fn new(kernel: Arc<dyn Kernel>, settings: RunSettings) -> Self {
        Self {
            kernel,
            stores: Vec::new(),
            interceptors: InterceptorSet::default(),
            cache: None,
            identities: Arc::new(StaticIdentities::new(settings.identities.clone())),
            diagnostics: Diagnostics::new(settings.logging.verbosity),
            settings,
        }
    }

    /// Add a store to isolate around every dispatch
    pub fn with_store(mut self, store: Arc<dyn TransactionalStore>) -> Self {
        self.stores.push(store);
        self
    }

    pub fn with_interceptor(mut self, channel: Channel, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.insert(channel, interceptor);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_identities(mut self, identities: Arc<dyn IdentityProvider>) -> Self {
        self.identities = identities;
        self
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Run a case once per identity, or once anonymously
    ///
    /// Unknown or malformed checks fail before anything is dispatched.
    /// Identities after a failed iteration are not run.
    pub async fn run_case(&self, case: &TestCase) -> Result<CaseOutcome> {
        let checks = CheckSet::parse(&case.test_id, &case.checks)?;
        let mut outcome = CaseOutcome {
            test_id: case.test_id.clone(),
            iterations: Vec::new(),
        };

        info!("Running '{}': {} {}", case.test_id, case.method, case.uri);

        if case.users.is_empty() {
            let result = self.run_iteration(case, None, checks).await;
            outcome.iterations.push(IterationOutcome {
                identity: None,
                result,
            });
            return Ok(outcome);
        }

        for (index, identity) in case.users.iter().enumerate() {
            if index > 0 {
                if let Err(e) = self.kernel.refresh().await {
                    outcome.iterations.push(IterationOutcome {
                        identity: Some(identity.clone()),
                        result: IterationResult::DispatchFailed(e),
                    });
                    break;
                }
            }

            let result = self.run_iteration(case, Some(identity.as_str()), checks.clone()).await;
            let iteration = IterationOutcome {
                identity: Some(identity.clone()),
                result,
            };
            let passed = iteration.passed();
            outcome.iterations.push(iteration);
            if !passed {
                warn!(
                    "'{}' failed as '{}', skipping remaining identities",
                    case.test_id, identity
                );
                break;
            }
        }

        Ok(outcome)
    }

    async fn run_iteration(
        &self,
        case: &TestCase,
        identity: Option<&str>,
        mut checks: CheckSet,
    ) -> IterationResult {
        // Authenticated | Anonymous
        let server = match identity {
            Some(name) => match self.identities.authenticate(name, &case.server) {
                Ok(headers) => {
                    self.diagnostics
                        .dump(LEVEL_IDENTITY, &format!("Acting as '{}'", name), &headers);
                    headers
                }
                Err(e) => return IterationResult::DispatchFailed(e),
            },
            None => case.server.clone(),
        };

        let uploads = match stage_uploads(&self.settings.uploads_root, &case.files) {
            Ok(uploads) => uploads,
            Err(e) => return IterationResult::DispatchFailed(e),
        };
        let request = build_request(case, &server, self.settings.base_url.as_deref(), &uploads);
        self.diagnostics.dump(LEVEL_REQUEST, "Request", &request);

        let armed = self.interceptors.stage(&mut checks);
        prepare_cache(&checks, self.cache.as_deref());

        // IsolationOpen → Dispatched → IsolationClosed
        let dispatched = match IsolationScope::open(
            &self.stores,
            self.settings.logging.query,
            self.diagnostics,
        ) {
            Ok(scope) => {
                let response = self.dispatch(&request).await;
                scope.close();
                response
            }
            Err(e) => Err(e),
        };
        let (intercepted, verdicts) = armed.release();
        drop(uploads);

        let response = match dispatched {
            Ok(response) => response,
            Err(e) => return IterationResult::DispatchFailed(e),
        };
        self.diagnostics.dump(LEVEL_RESPONSE, "Response", &response);

        // Decoded
        let ctx = CheckContext {
            response: &response,
            cache: self.cache.as_deref(),
            verdicts: &verdicts,
        };
        let mut failures = run_checks(&checks, &ctx);
        failures.extend(intercepted);
        failures.sort_by_key(|failure| CheckKind::from_name(&failure.check));

        debug!(
            "'{}' finished with {} failure(s)",
            case.test_id,
            failures.len()
        );
        if failures.is_empty() {
            IterationResult::Passed
        } else {
            IterationResult::Failed(failures)
        }
    }

    async fn dispatch(&self, request: &ApiRequest) -> std::result::Result<ApiResponse, DispatchError> {
        let response = self.kernel.handle(request).await?;
        self.kernel.finalize(request, &response).await;
        Ok(response)
    }
}
