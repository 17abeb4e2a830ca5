//! API test execution
//!
//! Expands declared actions into test cases and runs them through a kernel
//! with transactional isolation, side-effect interception and response
//! checks. The seams ([`Kernel`], [`TransactionalStore`], [`Interceptor`],
//! [`CacheStore`], [`IdentityProvider`]) are traits so the engine can run
//! against a live server or an in-process fake.

mod case;
mod engine;
mod http;
mod identity;
mod intercept;
mod isolation;
mod kernel;
mod request;
mod runner;

pub use case::{expand, expand_cases, TestCase};
pub use engine::{Engine, EngineConfig};
pub use http::HttpKernel;
pub use identity::{IdentityProvider, StaticIdentities};
pub use intercept::{
    prepare_cache, ArmedInterceptors, CacheStore, Interceptor, InterceptorSet, MemoryCache,
    RecordingInterceptor,
};
pub use isolation::{IsolationScope, MemoryStore, TransactionalStore};
pub use kernel::{ApiRequest, ApiResponse, Kernel, UploadedFile};
pub use request::{build_request, encode_body, join_uri, sniff_mime_type, stage_uploads, StagedUploads};
pub use runner::{CaseOutcome, Executor, IterationOutcome, IterationResult, RunSettings};
