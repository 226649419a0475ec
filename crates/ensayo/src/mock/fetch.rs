//! Process-wide fetch substitution.
//!
//! Code under test calls [`fetch`], which dispatches to the installed
//! [`Fetcher`] (the real network when none is installed). Each
//! [`mock_fetch`] pushes a layer over it: matching requests are recorded and
//! answered from a [`MockResponse`], everything else falls to the layers
//! below and finally to the installed fetcher, untouched.

use crate::result::{EnsayoError, EnsayoResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// HTTP methods for request matching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl HttpMethod {
    /// Parse a method name, case-insensitively
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            "DELETE" => Some(Self::Delete),
            "PATCH" => Some(Self::Patch),
            "HEAD" => Some(Self::Head),
            "OPTIONS" => Some(Self::Options),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }
}

/// Pattern for matching request URLs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum UrlPattern {
    /// Exact URL match
    Exact(String),
    /// Prefix match
    Prefix(String),
    /// Contains substring
    Contains(String),
    /// Regex match
    Regex(String),
    /// Glob pattern (e.g., "https://api/*/users")
    Glob(String),
    /// Match any URL
    Any,
}

impl UrlPattern {
    /// Check if a URL matches this pattern
    #[must_use]
    pub fn matches(&self, url: &str) -> bool {
        match self {
            Self::Exact(pattern) => url == pattern,
            Self::Prefix(pattern) => url.starts_with(pattern.as_str()),
            Self::Contains(pattern) => url.contains(pattern.as_str()),
            Self::Regex(pattern) => regex::Regex::new(pattern).is_ok_and(|re| re.is_match(url)),
            Self::Glob(pattern) => glob_matches(pattern, url),
            Self::Any => true,
        }
    }
}

/// Strings containing `*` are globs, anything else must match exactly
impl From<&str> for UrlPattern {
    fn from(pattern: &str) -> Self {
        if pattern.contains('*') {
            Self::Glob(pattern.to_string())
        } else {
            Self::Exact(pattern.to_string())
        }
    }
}

impl From<String> for UrlPattern {
    fn from(pattern: String) -> Self {
        Self::from(pattern.as_str())
    }
}

impl fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(s) => write!(f, "{s}"),
            Self::Prefix(s) => write!(f, "{s}*"),
            Self::Contains(s) => write!(f, "*{s}*"),
            Self::Regex(s) => write!(f, "/{s}/"),
            Self::Glob(s) => write!(f, "{s}"),
            Self::Any => write!(f, "*"),
        }
    }
}

/// `*` matches any run of characters, everything else is literal.
///
/// The literal before the first `*` anchors the start and the literal after
/// the last `*` anchors the end; inner literals take their leftmost match,
/// which leaves the most room for the ones after them.
fn glob_matches(pattern: &str, url: &str) -> bool {
    let mut parts = pattern.split('*');
    let first = parts.next().unwrap_or_default();
    let Some(mut rest) = url.strip_prefix(first) else {
        return false;
    };
    let tail: Vec<&str> = parts.collect();
    let Some((last, inner)) = tail.split_last() else {
        return rest.is_empty();
    };
    for part in inner {
        match rest.find(part) {
            Some(at) => rest = &rest[at + part.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}

/// A pattern with its regex compiled once
#[derive(Debug)]
struct UrlMatcher {
    pattern: UrlPattern,
    regex: Option<regex::Regex>,
}

impl UrlMatcher {
    fn new(pattern: UrlPattern) -> Self {
        let regex = match &pattern {
            UrlPattern::Regex(source) => match regex::Regex::new(source) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!(pattern = %source, error = %e, "invalid fetch mock regex never matches");
                    None
                }
            },
            _ => None,
        };
        Self { pattern, regex }
    }

    fn matches(&self, url: &str) -> bool {
        match &self.pattern {
            UrlPattern::Regex(_) => self.regex.as_ref().is_some_and(|re| re.is_match(url)),
            pattern => pattern.matches(url),
        }
    }
}

/// An outgoing request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub url: String,
    pub method: HttpMethod,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
}

impl FetchRequest {
    /// GET request
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// POST request
    #[must_use]
    pub fn post(url: impl Into<String>) -> Self {
        Self::get(url).with_method(HttpMethod::Post)
    }

    #[must_use]
    pub const fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    #[must_use]
    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.insert(key.to_string(), value.to_string());
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set a JSON body and content type
    pub fn with_json<T: Serialize>(self, data: &T) -> EnsayoResult<Self> {
        Ok(self
            .with_body(serde_json::to_vec(data)?)
            .with_header("content-type", "application/json"))
    }
}

/// A response as seen by code under test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl FetchResponse {
    /// Status is 2xx
    #[must_use]
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    pub fn json<T: for<'de> Deserialize<'de>>(&self) -> EnsayoResult<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// A mocked HTTP response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub content_type: String,
    /// Artificial delay in milliseconds
    pub delay_ms: u64,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self {
            status: 200,
            headers: HashMap::new(),
            body: Vec::new(),
            content_type: "application/json".to_string(),
            delay_ms: 0,
        }
    }
}

impl MockResponse {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// JSON response with status 200
    pub fn json<T: Serialize>(data: &T) -> EnsayoResult<Self> {
        Ok(Self {
            body: serde_json::to_vec(data)?,
            ..Self::default()
        })
    }

    /// Plain-text response with status 200
    #[must_use]
    pub fn text(content: &str) -> Self {
        Self {
            body: content.as_bytes().to_vec(),
            content_type: "text/plain".to_string(),
            ..Self::default()
        }
    }

    /// JSON `{"error": message}` response
    #[must_use]
    pub fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            body: serde_json::json!({ "error": message }).to_string().into_bytes(),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.insert(key.to_string(), value.to_string());
        self
    }

    #[must_use]
    pub const fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    fn to_fetch_response(&self) -> FetchResponse {
        let mut headers = self.headers.clone();
        headers
            .entry("content-type".to_string())
            .or_insert_with(|| self.content_type.clone());
        FetchResponse {
            status: self.status,
            headers,
            body: self.body.clone(),
        }
    }
}

/// A request answered by a fetch mock
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedRequest {
    pub url: String,
    pub method: HttpMethod,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
    /// Milliseconds since the mock was installed
    pub timestamp_ms: u64,
}

impl CapturedRequest {
    #[must_use]
    pub fn body_string(&self) -> Option<String> {
        self.body
            .as_ref()
            .map(|b| String::from_utf8_lossy(b).to_string())
    }

    pub fn body_json<T: for<'de> Deserialize<'de>>(&self) -> EnsayoResult<T> {
        let body = self
            .body
            .as_ref()
            .ok_or_else(|| EnsayoError::assertion("request had no body"))?;
        Ok(serde_json::from_slice(body)?)
    }
}

/// Something that can answer requests
#[async_trait]
pub trait Fetcher: Send + Sync + fmt::Debug {
    async fn fetch(&self, request: FetchRequest) -> EnsayoResult<FetchResponse>;
}

/// Real network access through `reqwest`
#[derive(Debug, Clone, Default)]
pub struct NetworkFetcher {
    #[cfg(feature = "net")]
    client: reqwest::Client,
}

#[async_trait]
impl Fetcher for NetworkFetcher {
    #[cfg(feature = "net")]
    async fn fetch(&self, request: FetchRequest) -> EnsayoResult<FetchResponse> {
        let network = |e: reqwest::Error| EnsayoError::Network {
            message: e.to_string(),
        };
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| EnsayoError::Network {
                message: e.to_string(),
            })?;
        let mut builder = self.client.request(method, &request.url);
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        let response = builder.send().await.map_err(network)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(network)?.to_vec();
        Ok(FetchResponse {
            status,
            headers,
            body,
        })
    }

    #[cfg(not(feature = "net"))]
    async fn fetch(&self, request: FetchRequest) -> EnsayoResult<FetchResponse> {
        Err(EnsayoError::Network {
            message: format!(
                "cannot reach {}: ensayo was built without the `net` feature",
                request.url
            ),
        })
    }
}

/// The process-wide fetch state: a base fetcher and the mocks layered on it
#[derive(Debug)]
struct FetchSlot {
    base: Option<Arc<dyn Fetcher>>,
    /// Bottom to top
    layers: Vec<Arc<MockLayer>>,
    next_id: u64,
}

static SLOT: Mutex<FetchSlot> = Mutex::new(FetchSlot {
    base: None,
    layers: Vec::new(),
    next_id: 0,
});

fn slot() -> MutexGuard<'static, FetchSlot> {
    SLOT.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Replace the base fetcher under any installed mocks, returning the
/// previous base
pub fn install_fetcher(fetcher: Option<Arc<dyn Fetcher>>) -> Option<Arc<dyn Fetcher>> {
    std::mem::replace(&mut slot().base, fetcher)
}

/// A snapshot of the mock layers and the base they fall through to
#[derive(Debug)]
struct Layered {
    layers: Vec<Arc<MockLayer>>,
    base: Arc<dyn Fetcher>,
}

#[async_trait]
impl Fetcher for Layered {
    async fn fetch(&self, request: FetchRequest) -> EnsayoResult<FetchResponse> {
        for layer in self.layers.iter().rev() {
            if layer.accepts(&request) && layer.claim() {
                return Ok(layer.answer(request).await);
            }
        }
        tracing::debug!(url = %request.url, "fetch passed through");
        self.base.fetch(request).await
    }
}

/// The fetcher `fetch` dispatches to right now
#[must_use]
pub fn current_fetcher() -> Arc<dyn Fetcher> {
    let slot = slot();
    let base = slot
        .base
        .clone()
        .unwrap_or_else(|| Arc::new(NetworkFetcher::default()));
    if slot.layers.is_empty() {
        return base;
    }
    Arc::new(Layered {
        layers: slot.layers.clone(),
        base,
    })
}

/// Issue a request through the installed fetcher
pub async fn fetch(request: FetchRequest) -> EnsayoResult<FetchResponse> {
    current_fetcher().fetch(request).await
}

/// What a fetch mock intercepts and how it answers
#[derive(Debug, Clone, Default)]
pub struct MockFetchOptions {
    /// Only intercept this method; any method when `None`
    pub method: Option<HttpMethod>,
    /// Only intercept requests whose body equals this exactly
    pub body: Option<Vec<u8>>,
    pub response: MockResponse,
    /// Stop intercepting after this many matches
    pub times: Option<usize>,
}

impl MockFetchOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer with `response`
    #[must_use]
    pub fn respond(response: MockResponse) -> Self {
        Self {
            response,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = Some(method);
        self
    }

    #[must_use]
    pub fn with_request_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    #[must_use]
    pub fn with_response(mut self, response: MockResponse) -> Self {
        self.response = response;
        self
    }

    #[must_use]
    pub const fn times(mut self, n: usize) -> Self {
        self.times = Some(n);
        self
    }
}

/// One installed fetch mock
#[derive(Debug)]
struct MockLayer {
    id: u64,
    matcher: UrlMatcher,
    options: MockFetchOptions,
    calls: Arc<Mutex<Vec<CapturedRequest>>>,
    matched: AtomicUsize,
    installed_at: Instant,
}

impl MockLayer {
    fn accepts(&self, request: &FetchRequest) -> bool {
        self.matcher.matches(&request.url)
            && self.options.method.map_or(true, |m| m == request.method)
            && self
                .options
                .body
                .as_ref()
                .map_or(true, |body| request.body.as_ref() == Some(body))
    }

    /// Claim one use; false once `times` is exhausted
    fn claim(&self) -> bool {
        let Some(limit) = self.options.times else {
            self.matched.fetch_add(1, Ordering::SeqCst);
            return true;
        };
        self.matched
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < limit).then_some(n + 1))
            .is_ok()
    }

    async fn answer(&self, request: FetchRequest) -> FetchResponse {
        tracing::debug!(url = %request.url, pattern = %self.matcher.pattern, "fetch intercepted");
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(CapturedRequest {
                url: request.url,
                method: request.method,
                headers: request.headers,
                body: request.body,
                timestamp_ms: self.installed_at.elapsed().as_millis() as u64,
            });
        let response = &self.options.response;
        if response.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(response.delay_ms)).await;
        }
        response.to_fetch_response()
    }
}

/// Handle to an installed fetch mock.
///
/// Dropping the handle removes the mock. Mocks may be restored in any
/// order; each removes only its own layer.
#[derive(Debug)]
pub struct FetchMock {
    id: u64,
    pattern: UrlPattern,
    calls: Arc<Mutex<Vec<CapturedRequest>>>,
    restored: bool,
}

/// Intercept requests matching `pattern`.
///
/// The newest mock is consulted first; a request it does not take falls to
/// the mocks below it and finally to the installed fetcher.
pub fn mock_fetch(pattern: impl Into<UrlPattern>, options: MockFetchOptions) -> FetchMock {
    let pattern = pattern.into();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut slot = slot();
    let id = slot.next_id;
    slot.next_id += 1;
    slot.layers.push(Arc::new(MockLayer {
        id,
        matcher: UrlMatcher::new(pattern.clone()),
        options,
        calls: Arc::clone(&calls),
        matched: AtomicUsize::new(0),
        installed_at: Instant::now(),
    }));
    tracing::debug!(pattern = %pattern, layers = slot.layers.len(), "fetch mock installed");
    FetchMock {
        id,
        pattern,
        calls,
        restored: false,
    }
}

impl FetchMock {
    /// Requests this mock answered, oldest first
    #[must_use]
    pub fn calls(&self) -> Vec<CapturedRequest> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub const fn pattern(&self) -> &UrlPattern {
        &self.pattern
    }

    /// Stop intercepting; mocks installed before or after this one stay
    pub fn restore(&mut self) {
        if self.restored {
            return;
        }
        slot().layers.retain(|layer| layer.id != self.id);
        self.restored = true;
        tracing::debug!(pattern = %self.pattern, "fetch mock restored");
    }
}

impl Drop for FetchMock {
    fn drop(&mut self) {
        self.restore();
    }
}
