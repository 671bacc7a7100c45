use std::collections::{BTreeMap, VecDeque};
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::ValidationError;

/// Standard HTTP verbs accepted by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }

    fn to_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Patch => reqwest::Method::PATCH,
            Self::Delete => reqwest::Method::DELETE,
            Self::Head => reqwest::Method::HEAD,
            Self::Options => reqwest::Method::OPTIONS,
        }
    }
}

impl Display for HttpMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            "HEAD" => Ok(Self::Head),
            "OPTIONS" => Ok(Self::Options),
            _ => Err(ValidationError::InvalidMethod {
                value: value.to_owned(),
            }),
        }
    }
}

/// Outgoing call to a provider. The URL is absolute `http`/`https`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: Url,
    /// Header names are lower-cased.
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    /// Per-call timeout; the provider default applies when unset.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: Url) -> Result<Self, ValidationError> {
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(ValidationError::UnsupportedScheme {
                    scheme: other.to_owned(),
                })
            }
        }
        if url.host_str().is_none() {
            return Err(ValidationError::InvalidUrl {
                value: url.to_string(),
                reason: String::from("missing host"),
            });
        }

        Ok(Self {
            method,
            url,
            headers: BTreeMap::new(),
            body: None,
            timeout: None,
        })
    }

    pub fn parse(method: HttpMethod, url: &str) -> Result<Self, ValidationError> {
        let parsed = Url::parse(url.trim()).map_err(|error| ValidationError::InvalidUrl {
            value: url.to_owned(),
            reason: error.to_string(),
        })?;
        Self::new(method, parsed)
    }

    pub fn get(url: &str) -> Result<Self, ValidationError> {
        Self::parse(HttpMethod::Get, url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().trim().to_ascii_lowercase(), value.into());
        self
    }

    /// Add a header given as `name:value`.
    pub fn with_header_line(self, line: &str) -> Result<Self, ValidationError> {
        let Some((name, value)) = line.split_once(':') else {
            return Err(ValidationError::InvalidHeader {
                value: line.to_owned(),
            });
        };
        if name.trim().is_empty() {
            return Err(ValidationError::InvalidHeader {
                value: line.to_owned(),
            });
        }
        Ok(self.with_header(name, value.trim()))
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Response returned by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn ok_json(body: impl Into<String>) -> Self {
        Self::new(200, body).with_header("content-type", "application/json")
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    /// Add a header value, joining repeats of the same name with `", "`.
    pub fn append_header(&mut self, name: &str, value: &str) {
        self.headers
            .entry(name.to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_owned());
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Transport failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HttpErrorKind {
    Timeout,
    Connect,
    Body,
    Transport,
}

impl HttpErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connect => "connect",
            Self::Body => "body",
            Self::Transport => "transport",
        }
    }
}

/// Transport-level HTTP error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    kind: HttpErrorKind,
    message: String,
}

impl HttpError {
    pub fn new(kind: HttpErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(HttpErrorKind::Timeout, message)
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(HttpErrorKind::Connect, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(HttpErrorKind::Transport, message)
    }

    pub const fn kind(&self) -> HttpErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for HttpError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for HttpError {}

/// Transport contract used by the request maker.
pub trait HttpClient: Send + Sync {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>>;
}

/// Deterministic transport for offline tests.
///
/// Replays queued results in order, then answers `200 {}`. Counts every call.
#[derive(Debug, Default)]
pub struct ScriptedHttpClient {
    script: Mutex<VecDeque<Result<HttpResponse, HttpError>>>,
    latency: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn push(&self, result: Result<HttpResponse, HttpError>) {
        self.script
            .lock()
            .expect("scripted client mutex poisoned")
            .push_back(result);
    }

    pub fn push_status(&self, status: u16, body: &str) {
        self.push(Ok(HttpResponse::new(status, body)));
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl HttpClient for ScriptedHttpClient {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        let _ = request;
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }
            let next = self
                .script
                .lock()
                .expect("scripted client mutex poisoned")
                .pop_front();
            next.unwrap_or_else(|| Ok(HttpResponse::ok_json("{}")))
        })
    }
}

/// Production HTTP client using reqwest for real API calls.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: Arc<reqwest::Client>,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self {
            client: Arc::new(
                reqwest::Client::builder()
                    .user_agent(concat!("ferrogate/", env!("CARGO_PKG_VERSION")))
                    .build()
                    .unwrap_or_else(|_| reqwest::Client::new()),
            ),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient for ReqwestHttpClient {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        Box::pin(async move {
            let mut builder = self
                .client
                .request(request.method.to_reqwest(), request.url.clone());

            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }
            if let Some(timeout) = request.timeout {
                builder = builder.timeout(timeout);
            }
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder.send().await.map_err(classify_reqwest_error)?;

            let mut received = HttpResponse::new(response.status().as_u16(), String::new());
            for (name, value) in response.headers() {
                if let Ok(value) = value.to_str() {
                    received.append_header(name.as_str(), value);
                }
            }
            let body = response.text().await.map_err(|error| {
                if error.is_timeout() {
                    HttpError::timeout(format!("timed out reading response body: {error}"))
                } else {
                    HttpError::new(
                        HttpErrorKind::Body,
                        format!("failed to read response body: {error}"),
                    )
                }
            })?;

            received.body = body;
            Ok(received)
        })
    }
}

fn classify_reqwest_error(error: reqwest::Error) -> HttpError {
    if error.is_timeout() {
        HttpError::timeout(format!("request timeout: {error}"))
    } else if error.is_connect() {
        HttpError::connect(format!("connection failed: {error}"))
    } else {
        HttpError::transport(format!("request failed: {error}"))
    }
}
