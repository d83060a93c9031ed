//! # Response Module
//!
//! The inbound half of the data model. A [`Response`] is immutable once built;
//! re-binding it to a request or marking it as archived yields a new value.

use crate::error::Result;
use crate::request::{Continuation, NavigatingRequest, Request};
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use std::sync::Arc;
use url::Url;

#[derive(Debug, Clone)]
pub struct Response {
    url: Url,
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    text: String,
    request: Option<Arc<Request>>,
    from_cache: bool,
    archived_path: Option<String>,
    base: Option<Url>,
}

impl Response {
    /// Builds an uncorrelated response. The text is decoded eagerly.
    pub fn new(url: Url, status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        let text = decode_text(&body);
        Self {
            url,
            status,
            headers,
            body,
            text,
            request: None,
            from_cache: false,
            archived_path: None,
            base: None,
        }
    }

    /// A canned `200 OK` response for `url`, used by mocks and tests.
    pub fn canned(url: &str, body: impl Into<Bytes>) -> Result<Self> {
        Ok(Self::new(
            Url::parse(url)?,
            StatusCode::OK,
            HeaderMap::new(),
            body.into(),
        ))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// The request this response answers, if it has been correlated.
    pub fn request(&self) -> Option<&Arc<Request>> {
        self.request.as_ref()
    }

    pub fn is_from_cache(&self) -> bool {
        self.from_cache
    }

    pub fn archived_path(&self) -> Option<&str> {
        self.archived_path.as_deref()
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn with_request(mut self, request: Arc<Request>) -> Self {
        self.request = Some(request);
        self
    }

    pub fn with_from_cache(mut self, from_cache: bool) -> Self {
        self.from_cache = from_cache;
        self
    }

    pub fn with_archived_path(mut self, path: impl Into<String>) -> Self {
        self.archived_path = Some(path.into());
        self
    }

    /// Sets the location relative links resolve against, when it differs from
    /// the response URL (responses to non-navigating requests).
    pub fn with_base(mut self, base: Url) -> Self {
        self.base = Some(base);
        self
    }

    /// The URL relative links resolve against.
    pub fn base_url(&self) -> &Url {
        self.base.as_ref().unwrap_or(&self.url)
    }

    /// Resolves `href` against [`Response::base_url`].
    pub fn join(&self, href: &str) -> Result<Url> {
        Ok(self.base_url().join(href)?)
    }

    /// Builds a `GET` navigating request for `href`, resolved against the base URL.
    pub fn follow<R>(&self, href: &str, continuation: Continuation<R>) -> Result<NavigatingRequest<R>> {
        Ok(NavigatingRequest::new(Request::new(self.join(href)?), continuation))
    }
}

fn decode_text(body: &[u8]) -> String {
    match std::str::from_utf8(body) {
        Ok(text) => text.to_string(),
        // Latin-1 maps every byte to the code point of the same value.
        Err(_) => body.iter().map(|&b| b as char).collect(),
    }
}
