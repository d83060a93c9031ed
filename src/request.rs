//! # Request Module
//!
//! The outbound half of the data model.
//!
//! A [`Request`] is an immutable description of a single HTTP fetch: every
//! "mutation" consumes the value and hands back a new one. Permanent state
//! (session headers and cookies) rides along with the request and is merged into
//! every request derived from it, so a login performed early in a chain is
//! visible to every later fetch without the scraper re-threading it.
//!
//! A [`NavigatingRequest`] pairs a request with the continuation that will
//! receive its response, plus the bookkeeping the drivers need: an ownership
//! marker, a priority, a deduplication key and the navigation context.

use crate::error::{DriverError, Result};
use crate::response::Response;
use crate::scraper::ParseOutput;
use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::Method;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use url::Url;

/// Cross-request state merged into every request derived from the one carrying it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permanent {
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,
}

impl Permanent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() && self.cookies.is_empty()
    }

    /// Merges `other` over `self`; entries in `other` win.
    pub fn merged_with(&self, other: &Permanent) -> Permanent {
        let mut merged = self.clone();
        merged
            .headers
            .extend(other.headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
            .cookies
            .extend(other.cookies.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }
}

/// An immutable outbound HTTP request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Bytes>,
    cookies: BTreeMap<String, String>,
    permanent: Permanent,
}

impl Request {
    /// Creates a `GET` request for `url`. The fragment is dropped.
    pub fn new(mut url: Url) -> Self {
        url.set_fragment(None);
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: None,
            cookies: BTreeMap::new(),
            permanent: Permanent::default(),
        }
    }

    pub fn get(url: &str) -> Result<Self> {
        Ok(Self::new(Url::parse(url)?))
    }

    pub fn post(url: &str, body: impl Into<Bytes>) -> Result<Self> {
        Ok(Self::new(Url::parse(url)?)
            .with_method(Method::POST)
            .with_body(body))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn cookies(&self) -> &BTreeMap<String, String> {
        &self.cookies
    }

    pub fn permanent(&self) -> &Permanent {
        &self.permanent
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_url(mut self, mut url: Url) -> Self {
        url.set_fragment(None);
        self.url = url;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        let (name, value) = parse_header(name, value)?;
        self.headers.insert(name, value);
        Ok(self)
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    /// Attaches permanent state and merges its headers and cookies into this request.
    pub fn with_permanent(mut self, permanent: Permanent) -> Result<Self> {
        for (name, value) in &permanent.headers {
            let (name, value) = parse_header(name, value)?;
            self.headers.insert(name, value);
        }
        self.cookies
            .extend(permanent.cookies.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.permanent = permanent;
        Ok(self)
    }

    /// Renders the cookie jar as a single `Cookie` header value.
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// SHA-256 over `METHOD|URL|` followed by the raw body bytes.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.method, self.url.as_str(), self.body.as_deref().unwrap_or(&[]))
    }
}

/// Computes the replay/dedup fingerprint from its raw parts.
pub fn fingerprint(method: &Method, url: &str, body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}|{}|", method.as_str(), url).as_bytes());
    hasher.update(body);
    hex::encode(hasher.finalize())
}

fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| DriverError::General(format!("invalid header name '{}': {}", name, e)))?;
    let header_value = HeaderValue::from_str(value)
        .map_err(|e| DriverError::General(format!("invalid value for header '{}': {}", name, e)))?;
    Ok((header_name, header_value))
}

/// Ownership marker correlating a response with the request that spawned it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub(crate) u64);

impl RequestId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How the driver treats a request's response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    /// Moves the navigation context to the response URL.
    Navigating,
    /// Fetches supplementary data without moving the navigation context.
    NonNavigating,
    /// Downloads a file and hands it to the archive callback before continuing.
    Archive { expected_type: Option<String> },
}

/// Key used by the scheduler's duplicate check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupKey {
    /// Derived from the request fingerprint.
    Default,
    Custom(String),
    /// Never deduplicated.
    Skip,
}

pub const DEFAULT_PRIORITY: i32 = 9;
pub const ARCHIVE_PRIORITY: i32 = 1;

type ContinuationFn<R> = dyn Fn(Response) -> Result<ParseOutput<R>> + Send + Sync;

/// The handler bound to a request that receives its response.
pub struct Continuation<R> {
    name: Arc<str>,
    handler: Arc<ContinuationFn<R>>,
}

impl<R> Continuation<R> {
    pub fn new<F, E>(name: &str, handler: F) -> Self
    where
        F: Fn(Response) -> std::result::Result<ParseOutput<R>, E> + Send + Sync + 'static,
        E: Into<DriverError>,
    {
        Self {
            name: Arc::from(name),
            handler: Arc::new(move |response| handler(response).map_err(Into::into)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, response: Response) -> Result<ParseOutput<R>> {
        (self.handler)(response)
    }
}

impl<R> Clone for Continuation<R> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<R> fmt::Debug for Continuation<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Continuation").field(&self.name).finish()
    }
}

/// A request paired with the continuation that will receive its response.
pub struct NavigatingRequest<R> {
    pub(crate) id: Option<RequestId>,
    pub(crate) parent: Option<RequestId>,
    request: Arc<Request>,
    continuation: Continuation<R>,
    kind: RequestKind,
    priority: i32,
    dedup: DedupKey,
    current_location: Option<Url>,
    depth: usize,
}

impl<R> NavigatingRequest<R> {
    pub fn new(request: Request, continuation: Continuation<R>) -> Self {
        Self {
            id: None,
            parent: None,
            request: Arc::new(request),
            continuation,
            kind: RequestKind::Navigating,
            priority: DEFAULT_PRIORITY,
            dedup: DedupKey::Default,
            current_location: None,
            depth: 0,
        }
    }

    /// A request that does not move the navigation context, e.g. an API call.
    pub fn non_navigating(request: Request, continuation: Continuation<R>) -> Self {
        Self::new(request, continuation).with_kind(RequestKind::NonNavigating)
    }

    /// A file download whose body is handed to the archive callback.
    pub fn archive(
        request: Request,
        expected_type: Option<&str>,
        continuation: Continuation<R>,
    ) -> Self {
        Self::new(request, continuation)
            .with_kind(RequestKind::Archive {
                expected_type: expected_type.map(str::to_string),
            })
            .with_priority(ARCHIVE_PRIORITY)
    }

    pub fn with_kind(mut self, kind: RequestKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dedup_key(mut self, key: DedupKey) -> Self {
        self.dedup = key;
        self
    }

    pub fn id(&self) -> Option<RequestId> {
        self.id
    }

    pub fn parent(&self) -> Option<RequestId> {
        self.parent
    }

    pub fn request(&self) -> &Arc<Request> {
        &self.request
    }

    pub fn continuation(&self) -> &Continuation<R> {
        &self.continuation
    }

    pub fn kind(&self) -> &RequestKind {
        &self.kind
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn current_location(&self) -> Option<&Url> {
        self.current_location.as_ref()
    }

    /// The key consulted by the duplicate check, or `None` when deduplication is skipped.
    pub fn dedup_key(&self) -> Option<String> {
        match &self.dedup {
            DedupKey::Default => Some(self.request.fingerprint()),
            DedupKey::Custom(key) => Some(key.clone()),
            DedupKey::Skip => None,
        }
    }

    /// The navigation context once `response` to this request has arrived.
    ///
    /// A navigating request moves it to the response URL; other kinds keep the
    /// location they were issued from.
    pub fn location_after(&self, response: &Response) -> Url {
        match self.kind {
            RequestKind::Navigating => response.url().clone(),
            _ => self
                .current_location
                .clone()
                .unwrap_or_else(|| self.request.url().clone()),
        }
    }

    /// Binds this request to the response that produced it.
    ///
    /// The parent's permanent state is merged under this request's own, the
    /// navigation context is inherited and the ancestry depth grows by one.
    pub fn resolve_from(mut self, parent: &Response, parent_request: &NavigatingRequest<R>) -> Result<Self> {
        let inherited = parent_request.request.permanent();
        if !inherited.is_empty() {
            let merged = inherited.merged_with(self.request.permanent());
            let request = Arc::unwrap_or_clone(self.request).with_permanent(merged)?;
            self.request = Arc::new(request);
        }
        self.current_location = Some(parent_request.location_after(parent));
        self.parent = parent_request.id;
        self.depth = parent_request.depth + 1;
        Ok(self)
    }
}

impl<R> fmt::Debug for NavigatingRequest<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NavigatingRequest")
            .field("id", &self.id)
            .field("method", self.request.method())
            .field("url", &self.request.url().as_str())
            .field("continuation", &self.continuation.name())
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .field("depth", &self.depth)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    #[test]
    fn mutations_produce_new_values() {
        let original = Request::get("https://example.com/list#top").unwrap();
        let changed = original.clone().with_method(Method::POST).with_body("q=1");
        assert_eq!(original.method(), &Method::GET);
        assert!(original.body().is_none());
        assert_eq!(changed.method(), &Method::POST);
        assert_eq!(original.url().as_str(), "https://example.com/list");
    }

    #[test]
    fn fingerprint_covers_method_url_and_body() {
        let get = Request::get("https://example.com/search").unwrap();
        let post_a = Request::post("https://example.com/search", "a=1").unwrap();
        let post_b = Request::post("https://example.com/search", "a=2").unwrap();
        assert_ne!(get.fingerprint(), post_a.fingerprint());
        assert_ne!(post_a.fingerprint(), post_b.fingerprint());
        assert_eq!(post_a.fingerprint(), post_a.clone().fingerprint());
        assert_eq!(get.fingerprint().len(), 64);
    }

    #[test]
    fn permanent_state_is_merged_into_headers_and_cookies() {
        let permanent = Permanent::new()
            .with_header("x-session", "abc")
            .with_cookie("sid", "42");
        let request = Request::get("https://example.com")
            .unwrap()
            .with_cookie("lang", "en")
            .with_permanent(permanent)
            .unwrap();
        assert_eq!(request.headers()["x-session"], "abc");
        assert_eq!(request.cookie_header().as_deref(), Some("lang=en; sid=42"));
    }

    #[test]
    fn resolve_from_inherits_permanent_state_and_location() {
        let noop = Continuation::<()>::new("noop", |_r| Ok::<_, DriverError>(ParseOutput::new()));
        let parent_request = Request::get("https://example.com/login")
            .unwrap()
            .with_permanent(Permanent::new().with_header("x-token", "t1").with_cookie("sid", "1"))
            .unwrap();
        let mut parent = NavigatingRequest::new(parent_request, noop.clone());
        parent.id = Some(RequestId(7));
        let response = Response::new(
            Url::parse("https://example.com/home").unwrap(),
            StatusCode::OK,
            HeaderMap::new(),
            Bytes::from_static(b"ok"),
        );

        let child_request = Request::get("https://example.com/item/1")
            .unwrap()
            .with_permanent(Permanent::new().with_cookie("sid", "2"))
            .unwrap();
        let child = NavigatingRequest::new(child_request, noop)
            .resolve_from(&response, &parent)
            .unwrap();

        assert_eq!(child.request().headers()["x-token"], "t1");
        assert_eq!(child.request().cookie_header().as_deref(), Some("sid=2"));
        assert_eq!(child.current_location().unwrap().as_str(), "https://example.com/home");
        assert_eq!(child.parent(), Some(RequestId(7)));
        assert_eq!(child.depth(), 1);
    }

    #[test]
    fn dedup_key_follows_policy() {
        let noop = Continuation::<()>::new("noop", |_r| Ok::<_, DriverError>(ParseOutput::new()));
        let request = Request::get("https://example.com/a").unwrap();
        let fingerprint = request.fingerprint();
        let nav = NavigatingRequest::new(request.clone(), noop.clone());
        assert_eq!(nav.dedup_key(), Some(fingerprint));
        let nav = NavigatingRequest::new(request.clone(), noop.clone())
            .with_dedup_key(DedupKey::Custom("case-1".into()));
        assert_eq!(nav.dedup_key().as_deref(), Some("case-1"));
        let nav = NavigatingRequest::new(request, noop).with_dedup_key(DedupKey::Skip);
        assert_eq!(nav.dedup_key(), None);
    }
}
