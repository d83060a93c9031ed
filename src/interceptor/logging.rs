//! Interceptor that logs every request and response passing through the chain.

use crate::error::Result;
use crate::interceptor::{Interceptor, InterceptorAction};
use crate::request::Request;
use crate::response::Response;
use async_trait::async_trait;
use log::info;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Logs every request and response passing through the chain without changing them.
#[derive(Debug, Default)]
pub struct LoggingInterceptor {
    prefix: String,
    requests: AtomicUsize,
    responses: AtomicUsize,
}

impl LoggingInterceptor {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::default()
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn response_count(&self) -> usize {
        self.responses.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Interceptor for LoggingInterceptor {
    fn name(&self) -> &str {
        "logging"
    }

    async fn modify_request(&self, request: Request) -> Result<InterceptorAction> {
        let n = self.requests.fetch_add(1, Ordering::SeqCst) + 1;
        info!("{}Request #{}: {} {}", self.prefix, n, request.method(), request.url());
        Ok(InterceptorAction::Continue(request))
    }

    async fn modify_response(&self, response: Response, _request: &Request) -> Result<Response> {
        let n = self.responses.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            "{}Response #{}: {} from {}",
            self.prefix,
            n,
            response.status(),
            response.url()
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counts_both_phases() {
        let logger = LoggingInterceptor::new("[test] ");
        let request = Request::get("https://example.com").unwrap();
        let action = logger.modify_request(request.clone()).await.unwrap();
        assert!(matches!(action, InterceptorAction::Continue(ref r) if *r == request));
        let response = Response::canned("https://example.com", "ok").unwrap();
        logger.modify_response(response, &request).await.unwrap();
        assert_eq!((logger.request_count(), logger.response_count()), (1, 1));
    }
}
