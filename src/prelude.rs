//! A "prelude" for users of the `spider-driver` crate.
//!
//! Re-exports the types needed to write a scraper and run it.
//!
//! # Example
//!
//! ```
//! use spider_driver::prelude::*;
//! ```

pub use crate::{
    // Building and running
    ConcurrentDriver,
    DriverBuilder,
    DriverConfig,
    RunStatus,
    SequentialDriver,
    StopSignal,
    // Scraper contract
    Continuation,
    NavigatingRequest,
    ParseOutput,
    Request,
    Response,
    Scraper,
    // Errors
    DriverError,
    FailureAction,
    FailureReport,
    Severity,
    // Essential re-exports for trait implementation
    async_trait,
};

pub use crate::interceptor::{
    Interceptor, InterceptorAction, StatusHandling, StatusPolicy,
    headers::HeaderInterceptor,
    logging::LoggingInterceptor,
    mock::MockInterceptor,
    rate_limit::{RateLimitConfig, RateLimitInterceptor},
    warc::{WarcCacheInterceptor, WarcCaptureInterceptor},
};
pub use crate::request::{DedupKey, Permanent, RequestKind};
pub use crate::scheduler::Dedup;
