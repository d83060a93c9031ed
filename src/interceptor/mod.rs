//! # Interceptor Module
//!
//! Interceptors are composable transformers inserted into the fetch pipeline.
//! Each one sees every request on the way out and every response on the way
//! back, which is how caching, mocking, rate limiting, logging and archival are
//! layered onto a run without the scraper knowing about any of them.
//!
//! ## Contract
//!
//! - [`Interceptor::modify_request`] returns [`InterceptorAction::Continue`] with a
//!   (possibly new) request, or [`InterceptorAction::ShortCircuit`] with a
//!   response. Short-circuiting skips the fetch and every later request-phase
//!   interceptor.
//! - [`Interceptor::modify_response`] runs for every interceptor in reverse
//!   order, exactly once per request, short-circuited or not.
//!
//! Interceptors are shared by every worker of a concurrent run, so each one is
//! `Send + Sync` and serializes its own critical sections. The chain itself is
//! never locked.

use crate::error::Result;
use crate::request::Request;
use crate::response::Response;
use async_trait::async_trait;

pub mod chain;
pub mod headers;
pub mod logging;
pub mod mock;
pub mod rate_limit;
pub mod warc;

pub use chain::{ChainError, ChainOutcome, InterceptorChain, StatusHandling, StatusPolicy};

/// The outcome of the request phase for a single interceptor.
#[derive(Debug)]
pub enum InterceptorAction {
    /// Hand the request to the next interceptor (or the transport).
    Continue(Request),
    /// Stop the request phase and use this response instead of fetching.
    ShortCircuit(Response),
}

#[async_trait]
pub trait Interceptor: Send + Sync + 'static {
    /// Name used in logs and error reports.
    fn name(&self) -> &str;

    async fn modify_request(&self, request: Request) -> Result<InterceptorAction> {
        Ok(InterceptorAction::Continue(request))
    }

    /// `request` is the originating request, before any request-phase rewriting.
    async fn modify_response(&self, response: Response, _request: &Request) -> Result<Response> {
        Ok(response)
    }

    /// Releases resources held by the interceptor. Called by the drivers on
    /// every exit path; must be idempotent.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}
