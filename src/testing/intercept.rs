//! Side-effect interceptors and the cache seam
//!
//! Interceptors observe mail, jobs, events and notifications raised while a
//! request is handled. They are armed before dispatch with the expectation
//! declared on the case and asked for a verdict at teardown.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::debug;

use crate::checks::{CacheOp, Channel, CheckSet, Expectation, Verdict};
use crate::common::AssertionFailure;

/// Records side effects of one subsystem
pub trait Interceptor: Send + Sync {
    /// Forget recorded operations and any previous expectation
    fn reset(&self);

    /// Start recording against `expectation`
    fn arm(&self, expectation: &Expectation);

    /// Compare what was recorded with the armed expectation
    fn assert_satisfied(&self) -> Verdict;
}

#[derive(Debug, Default)]
struct Recording {
    armed: Option<Expectation>,
    recorded: Vec<String>,
}

/// Interceptor that counts named operations
///
/// Clones share state: hand one clone to the application and register the
/// other with the executor.
#[derive(Debug, Clone, Default)]
pub struct RecordingInterceptor {
    inner: Arc<Mutex<Recording>>,
}

impl RecordingInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Recording> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one operation, e.g. a mailable or job class name
    pub fn record(&self, name: &str) {
        self.inner().recorded.push(name.to_string());
    }

    pub fn recorded(&self) -> Vec<String> {
        self.inner().recorded.clone()
    }

    pub fn is_armed(&self) -> bool {
        self.inner().armed.is_some()
    }
}

impl Interceptor for RecordingInterceptor {
    fn reset(&self) {
        let mut inner = self.inner();
        inner.armed = None;
        inner.recorded.clear();
    }

    fn arm(&self, expectation: &Expectation) {
        let mut inner = self.inner();
        inner.recorded.clear();
        inner.armed = Some(expectation.clone());
    }

    fn assert_satisfied(&self) -> Verdict {
        let inner = self.inner();
        let count = |name: &str| inner.recorded.iter().filter(|r| *r == name).count() as u64;

        match &inner.armed {
            None => Ok(()),
            Some(Expectation::Count(expected)) => {
                let actual = inner.recorded.len() as u64;
                if actual == *expected {
                    Ok(())
                } else {
                    Err(format!(
                        "Expected {} operation(s), {} recorded.",
                        expected, actual
                    ))
                }
            }
            Some(Expectation::PerName(expected)) => {
                let mismatches: Vec<String> = expected
                    .iter()
                    .filter(|(name, times)| count(name) != **times)
                    .map(|(name, times)| {
                        format!("[{}] recorded {} time(s), expected {}", name, count(name), times)
                    })
                    .collect();
                if mismatches.is_empty() {
                    Ok(())
                } else {
                    Err(format!("{}.", mismatches.join("; ")))
                }
            }
            Some(Expectation::Names(names)) => {
                let missing: Vec<&str> = names
                    .iter()
                    .map(String::as_str)
                    .filter(|name| count(name) == 0)
                    .collect();
                if missing.is_empty() {
                    Ok(())
                } else {
                    Err(format!("Expected [{}] to be recorded.", missing.join(", ")))
                }
            }
        }
    }
}

/// Interceptors registered with an executor, one per channel
#[derive(Clone, Default)]
pub struct InterceptorSet {
    channels: BTreeMap<Channel, Arc<dyn Interceptor>>,
}

impl InterceptorSet {
    pub fn insert(&mut self, channel: Channel, interceptor: Arc<dyn Interceptor>) {
        self.channels.insert(channel, interceptor);
    }

    pub fn get(&self, channel: Channel) -> Option<&Arc<dyn Interceptor>> {
        self.channels.get(&channel)
    }

    /// Arm every interceptor a case declares an expectation for
    ///
    /// Count-style mail expectations and every jobs/events/notification
    /// expectation are asserted at teardown and removed from `checks`. Mail
    /// expectations keyed by name stay in `checks` and are surfaced by the
    /// dispatcher. A declared channel with no interceptor is a failure.
    pub fn stage(&self, checks: &mut CheckSet) -> ArmedInterceptors {
        let mut armed = ArmedInterceptors::default();

        for channel in Channel::ALL {
            let Some(expectation) = checks.expectation(channel).cloned() else {
                continue;
            };
            let deferred =
                channel == Channel::Mail && matches!(expectation, Expectation::PerName(_));
            if !deferred {
                checks.remove(channel.kind());
            }

            match self.get(channel) {
                Some(interceptor) => {
                    debug!("Arming {} interceptor: {}", channel.name(), expectation);
                    interceptor.reset();
                    interceptor.arm(&expectation);
                    armed.entries.push(Armed {
                        channel,
                        interceptor: Arc::clone(interceptor),
                        deferred,
                    });
                }
                None if deferred => {}
                None => armed.failures.push(AssertionFailure::new(
                    channel.name(),
                    expectation.to_string(),
                    "not intercepted",
                    format!("No {} interceptor is registered.", channel.name()),
                )),
            }
        }

        armed
    }
}

struct Armed {
    channel: Channel,
    interceptor: Arc<dyn Interceptor>,
    deferred: bool,
}

/// Interceptors armed for one iteration
///
/// Released at teardown; dropping without release still resets them.
#[derive(Default)]
pub struct ArmedInterceptors {
    entries: Vec<Armed>,
    failures: Vec<AssertionFailure>,
}

impl ArmedInterceptors {
    /// Collect verdicts and reset every interceptor
    ///
    /// Returns the failures of immediately asserted channels and the verdicts
    /// deferred to the dispatcher.
    pub fn release(mut self) -> (Vec<AssertionFailure>, BTreeMap<Channel, Verdict>) {
        let mut failures = std::mem::take(&mut self.failures);
        let mut verdicts = BTreeMap::new();

        for armed in std::mem::take(&mut self.entries) {
            let verdict = armed.interceptor.assert_satisfied();
            armed.interceptor.reset();
            if armed.deferred {
                verdicts.insert(armed.channel, verdict);
            } else if let Err(message) = verdict {
                failures.push(AssertionFailure::new(
                    armed.channel.name(),
                    "satisfied",
                    "unsatisfied",
                    message,
                ));
            }
        }

        (failures, verdicts)
    }
}

impl Drop for ArmedInterceptors {
    fn drop(&mut self) {
        for armed in &self.entries {
            armed.interceptor.reset();
        }
    }
}

/// Application cache inspected by the `cache` check
pub trait CacheStore: Send + Sync {
    fn has(&self, key: &str) -> bool;

    fn forget(&self, key: &str);
}

/// Shared in-memory cache
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    entries: Arc<Mutex<BTreeMap<String, Value>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, Value>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn put(&self, key: &str, value: Value) {
        self.entries().insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries().get(key).cloned()
    }
}

impl CacheStore for MemoryCache {
    fn has(&self, key: &str) -> bool {
        self.entries().contains_key(key)
    }

    fn forget(&self, key: &str) {
        self.entries().remove(key);
    }
}

/// Evict every `cleanKey` before dispatch
pub fn prepare_cache(checks: &CheckSet, cache: Option<&dyn CacheStore>) {
    let Some(cache) = cache else { return };
    for assertion in checks.cache_assertions() {
        if assertion.op == CacheOp::CleanKey {
            debug!("Evicting cache key '{}' before dispatch", assertion.key);
            cache.forget(&assertion.key);
        }
    }
}
