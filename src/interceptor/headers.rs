//! Interceptor that sets a fixed set of headers on outgoing requests.

use crate::error::Result;
use crate::interceptor::{Interceptor, InterceptorAction};
use crate::request::Request;
use async_trait::async_trait;

/// Adds a fixed set of headers to every outgoing request, overriding existing values.
#[derive(Debug, Clone, Default)]
pub struct HeaderInterceptor {
    headers: Vec<(String, String)>,
}

impl HeaderInterceptor {
    pub fn new<I, K, V>(headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[async_trait]
impl Interceptor for HeaderInterceptor {
    fn name(&self) -> &str {
        "headers"
    }

    async fn modify_request(&self, request: Request) -> Result<InterceptorAction> {
        let mut request = request;
        for (name, value) in &self.headers {
            request = request.with_header(name, value)?;
        }
        Ok(InterceptorAction::Continue(request))
    }
}
