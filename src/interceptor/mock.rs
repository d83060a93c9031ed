//! Canned responses keyed by URL.
//!
//! Placed first in a chain, `MockInterceptor` replaces the network dependency
//! entirely for the URLs it knows; unknown URLs pass through.

use crate::error::Result;
use crate::interceptor::{Interceptor, InterceptorAction};
use crate::request::Request;
use crate::response::Response;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct MockInterceptor {
    responses: DashMap<String, Response>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl MockInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `response` for `url` (matched against the request URL verbatim).
    pub fn with_response(self, url: &str, response: Response) -> Self {
        self.responses.insert(url.to_string(), response);
        self
    }

    /// Registers a `200 OK` with `body` for `url`.
    pub fn with_body(self, url: &str, body: &str) -> Result<Self> {
        let response = Response::canned(url, body.to_string())?;
        Ok(self.with_response(url, response))
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn misses(&self) -> usize {
        self.misses.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Interceptor for MockInterceptor {
    fn name(&self) -> &str {
        "mock"
    }

    async fn modify_request(&self, request: Request) -> Result<InterceptorAction> {
        let canned = self
            .responses
            .get(request.url().as_str())
            .map(|entry| entry.value().clone());
        match canned {
            Some(response) => {
                self.hits.fetch_add(1, Ordering::SeqCst);
                Ok(InterceptorAction::ShortCircuit(response))
            }
            None => {
                self.misses.fetch_add(1, Ordering::SeqCst);
                Ok(InterceptorAction::Continue(request))
            }
        }
    }
}
