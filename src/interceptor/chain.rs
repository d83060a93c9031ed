//! Interceptor chain execution.
//!
//! The chain owns the per-request pipeline: request phase in registration order,
//! an optional transport fetch, then the response phase in reverse order. It is
//! shared read-only between workers; interceptors carry their own locks.

use crate::error::{DriverError, Severity};
use crate::interceptor::{Interceptor, InterceptorAction};
use crate::request::Request;
use crate::response::Response;
use crate::transport::Transport;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace};

/// What to do with a fetched response whose status falls in a given class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusHandling {
    /// Deliver the response to the interceptors and continuation as usual.
    PassThrough,
    /// Report a recoverable failure and move on.
    Recoverable,
    /// Terminate this request's chain.
    Fatal,
}

/// Classification of fetched status codes. `429` always passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusPolicy {
    pub redirects: StatusHandling,
    pub client_errors: StatusHandling,
    pub server_errors: StatusHandling,
}

impl Default for StatusPolicy {
    fn default() -> Self {
        Self {
            redirects: StatusHandling::PassThrough,
            client_errors: StatusHandling::PassThrough,
            server_errors: StatusHandling::Fatal,
        }
    }
}

impl StatusPolicy {
    pub fn handling_for(&self, status: StatusCode) -> StatusHandling {
        if status == StatusCode::TOO_MANY_REQUESTS {
            return StatusHandling::PassThrough;
        }
        if status.is_server_error() {
            self.server_errors
        } else if status.is_client_error() {
            self.client_errors
        } else if status.is_redirection() {
            self.redirects
        } else {
            StatusHandling::PassThrough
        }
    }

    fn check(&self, response: Response) -> Result<Response, ChainError> {
        let status = response.status();
        let url = response.url().to_string();
        let error = match self.handling_for(status) {
            StatusHandling::PassThrough => return Ok(response),
            StatusHandling::Fatal if status.is_server_error() => {
                DriverError::ServerError { url, status }
            }
            StatusHandling::Fatal => DriverError::UnexpectedStatus {
                url,
                status,
                severity: Severity::RequestFatal,
            },
            StatusHandling::Recoverable => DriverError::UnexpectedStatus {
                url,
                status,
                severity: Severity::Recoverable,
            },
        };
        Err(ChainError {
            error,
            response: Some(response),
        })
    }
}

/// A pipeline failure, with the response when one had already been produced.
#[derive(Debug)]
pub struct ChainError {
    pub error: DriverError,
    pub response: Option<Response>,
}

impl From<DriverError> for ChainError {
    fn from(error: DriverError) -> Self {
        Self {
            error,
            response: None,
        }
    }
}

/// A successfully processed request.
#[derive(Debug)]
pub struct ChainOutcome {
    pub response: Response,
    /// True when an interceptor supplied the response and no fetch happened.
    pub short_circuited: bool,
}

enum RequestPhase {
    Dispatch(Request),
    ShortCircuit(Response),
}

/// An ordered, immutable list of interceptors plus the status policy.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
    status_policy: StatusPolicy,
}

impl InterceptorChain {
    pub fn new(interceptors: Vec<Arc<dyn Interceptor>>, status_policy: StatusPolicy) -> Self {
        Self {
            interceptors,
            status_policy,
        }
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.interceptors.iter().map(|i| i.name()).collect()
    }

    /// Runs `request` through the full pipeline.
    pub async fn execute(
        &self,
        request: Arc<Request>,
        transport: &dyn Transport,
    ) -> Result<ChainOutcome, ChainError> {
        let (response, short_circuited) = match self.request_phase(&request).await? {
            RequestPhase::ShortCircuit(response) => {
                let response = match response.request() {
                    Some(_) => response,
                    None => response.with_request(Arc::clone(&request)),
                };
                (response, true)
            }
            RequestPhase::Dispatch(final_request) => {
                let response = transport.fetch(&final_request).await?;
                trace!(
                    "Fetched {} with status {}",
                    final_request.url(),
                    response.status()
                );
                (self.status_policy.check(response)?, false)
            }
        };

        let response = self.response_phase(response, &request).await?;
        Ok(ChainOutcome {
            response,
            short_circuited,
        })
    }

    async fn request_phase(&self, request: &Arc<Request>) -> Result<RequestPhase, DriverError> {
        let mut current = Request::clone(request);
        for interceptor in &self.interceptors {
            match interceptor.modify_request(current).await {
                Ok(InterceptorAction::Continue(next)) => current = next,
                Ok(InterceptorAction::ShortCircuit(response)) => {
                    debug!(
                        "Interceptor '{}' short-circuited {}",
                        interceptor.name(),
                        request.url()
                    );
                    return Ok(RequestPhase::ShortCircuit(response));
                }
                Err(e) => return Err(DriverError::in_interceptor(interceptor.name(), e)),
            }
        }
        Ok(RequestPhase::Dispatch(current))
    }

    async fn response_phase(&self, response: Response, request: &Request) -> Result<Response, DriverError> {
        let mut current = response;
        for interceptor in self.interceptors.iter().rev() {
            current = interceptor
                .modify_response(current, request)
                .await
                .map_err(|e| DriverError::in_interceptor(interceptor.name(), e))?;
        }
        Ok(current)
    }

    /// Closes every interceptor, returning the first failure after trying all.
    pub fn close_all(&self) -> Result<(), DriverError> {
        let mut first_error = None;
        for interceptor in &self.interceptors {
            if let Err(e) = interceptor.close() {
                tracing::error!("Failed to close interceptor '{}': {}", interceptor.name(), e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
