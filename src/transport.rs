//! # Transport Module
//!
//! The fetch layer the interceptor chain dispatches to once no interceptor has
//! short-circuited. Transports own per-fetch timeouts; a timeout or any other
//! network-level failure surfaces as a recoverable [`DriverError::Transport`].
//!
//! HTTP status codes are never turned into errors here. Classification happens
//! in the chain's [`StatusPolicy`](crate::interceptor::StatusPolicy), which is
//! what keeps a `429` flowing through to the rate limiter.

use crate::error::{DriverError, Result};
use crate::request::Request;
use crate::response::Response;
use async_trait::async_trait;
use std::sync::Arc;
#[cfg(feature = "reqwest-transport")]
use std::time::Duration;

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Performs the network fetch for a fully intercepted request.
    async fn fetch(&self, request: &Request) -> Result<Response>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        (**self).fetch(request).await
    }
}

/// A transport that refuses every fetch.
///
/// Used for replay-only runs: a cache miss then shows up as a transport failure
/// instead of silently reaching the network.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineTransport;

#[async_trait]
impl Transport for OfflineTransport {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        Err(DriverError::transport(
            request.url().as_str(),
            "network access is disabled for this run",
        ))
    }
}

/// Live HTTP transport backed by `reqwest`.
#[cfg(feature = "reqwest-transport")]
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    timeout: Duration,
}

#[cfg(feature = "reqwest-transport")]
impl ReqwestTransport {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new() -> Result<Self> {
        Self::with_timeout(Self::DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DriverError::configuration(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, timeout })
    }

    /// Wraps a preconfigured client. `timeout` is only used for error reporting.
    pub fn from_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    fn map_error(&self, url: &str, error: reqwest::Error) -> DriverError {
        if error.is_timeout() {
            DriverError::timeout(url, self.timeout)
        } else {
            DriverError::transport(url, error.to_string())
        }
    }
}

#[cfg(feature = "reqwest-transport")]
#[async_trait]
impl Transport for ReqwestTransport {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        let url = request.url().as_str();
        let mut builder = self
            .client
            .request(request.method().clone(), request.url().clone())
            .headers(request.headers().clone());
        if let Some(cookies) = request.cookie_header() {
            builder = builder.header(http::header::COOKIE, cookies);
        }
        if let Some(body) = request.body() {
            builder = builder.body(body.clone());
        }

        tracing::trace!("Fetching {} {}", request.method(), url);
        let http_response = builder.send().await.map_err(|e| self.map_error(url, e))?;
        let status = http_response.status();
        let headers = http_response.headers().clone();
        let final_url = http_response.url().clone();
        let body = http_response
            .bytes()
            .await
            .map_err(|e| self.map_error(url, e))?;

        Ok(Response::new(final_url, status, headers, body).with_request(Arc::new(request.clone())))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use dashmap::DashMap;
    use http::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves canned bodies by URL and counts every fetch it performs.
    #[derive(Default)]
    pub(crate) struct CountingTransport {
        pub(crate) routes: DashMap<String, (StatusCode, String)>,
        pub(crate) fetches: AtomicUsize,
    }

    impl CountingTransport {
        pub(crate) fn route(self, url: &str, status: StatusCode, body: &str) -> Self {
            self.routes.insert(url.to_string(), (status, body.to_string()));
            self
        }

        pub(crate) fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn fetch(&self, request: &Request) -> Result<Response> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let Some(route) = self.routes.get(request.url().as_str()) else {
                return Err(DriverError::transport(request.url().as_str(), "connection refused"));
            };
            let (status, body) = route.value().clone();
            let mut headers = http::HeaderMap::new();
            headers.insert(http::header::CONTENT_TYPE, http::HeaderValue::from_static("text/plain"));
            Ok(Response::new(request.url().clone(), status, headers, body.into())
                .with_request(Arc::new(request.clone())))
        }
    }
}
