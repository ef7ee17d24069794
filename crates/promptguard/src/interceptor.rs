//! Outgoing request interception.
//!
//! [`Interceptor`] wraps a [`RequestSender`] and is itself a `RequestSender`,
//! so callers keep the same call shape. For requests to the chat API it scans
//! string bodies, replaces email-shaped substrings, and emits a
//! [`DetectionEvent`] before the redacted request goes out. Everything else
//! passes through untouched.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::InterceptionConfig;
use crate::detection::{Redactor, ScanOutcome};
use crate::error::Result;
use crate::message::DetectionEvent;

/// Where a request is addressed, in whatever shape the caller had.
#[derive(Clone)]
pub enum RequestTarget {
    /// A plain URL string.
    Text(String),
    /// A URL object; its `Display` form is the URL.
    Url(Arc<dyn fmt::Display + Send + Sync>),
    /// A request object that may carry a URL.
    Request(RequestInfo),
}

/// Minimal view of a request object used as a target.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestInfo {
    /// The request's URL, if it has one.
    pub url: Option<String>,
    /// HTTP method.
    pub method: String,
}

impl RequestTarget {
    /// Resolve the target to a URL string, best effort.
    ///
    /// Never fails: anything without a usable URL falls back to its generic
    /// string form.
    #[must_use]
    pub fn resolve(&self) -> String {
        match self {
            Self::Text(url) => url.clone(),
            Self::Url(url) => url.to_string(),
            Self::Request(RequestInfo { url: Some(url), .. }) if !url.is_empty() => url.clone(),
            Self::Request(_) => self.to_string(),
        }
    }
}

impl fmt::Display for RequestTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(url) => f.write_str(url),
            Self::Url(url) => write!(f, "{url}"),
            Self::Request(info) => match &info.url {
                Some(url) if !url.is_empty() => f.write_str(url),
                _ => write!(f, "[request {}]", info.method),
            },
        }
    }
}

impl fmt::Debug for RequestTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(url) => f.debug_tuple("Text").field(url).finish(),
            Self::Url(url) => f.debug_tuple("Url").field(&url.to_string()).finish(),
            Self::Request(info) => f.debug_tuple("Request").field(info).finish(),
        }
    }
}

impl PartialEq for RequestTarget {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Url(a), Self::Url(b)) => a.to_string() == b.to_string(),
            (Self::Request(a), Self::Request(b)) => a == b,
            _ => false,
        }
    }
}

impl From<&str> for RequestTarget {
    fn from(url: &str) -> Self {
        Self::Text(url.to_string())
    }
}

impl From<String> for RequestTarget {
    fn from(url: String) -> Self {
        Self::Text(url)
    }
}

/// An outgoing request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    /// A string body. The only kind that is scanned.
    Text(String),
    /// Binary or streamed content. Never scanned.
    Binary(Bytes),
}

/// An outgoing request.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    /// Where the request goes.
    pub target: RequestTarget,
    /// HTTP method.
    pub method: String,
    /// Request headers, in order.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Option<RequestBody>,
}

impl OutboundRequest {
    /// Create a POST request with a string body.
    #[must_use]
    pub fn post(target: impl Into<RequestTarget>, body: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            method: "POST".to_string(),
            headers: Vec::new(),
            body: Some(RequestBody::Text(body.into())),
        }
    }

    /// Create a GET request without a body.
    #[must_use]
    pub fn get(target: impl Into<RequestTarget>) -> Self {
        Self {
            target: target.into(),
            method: "GET".to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Replace the body.
    #[must_use]
    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// The request primitive being wrapped.
#[async_trait]
pub trait RequestSender: Send + Sync {
    /// What a completed request yields.
    type Response: Send;

    /// Send a request.
    ///
    /// # Errors
    ///
    /// Returns whatever error the underlying transport reports.
    async fn send(&self, request: OutboundRequest) -> Result<Self::Response>;
}

/// Receives detection events from the interceptor.
///
/// `emit` is called synchronously before the redacted request is sent.
pub trait DetectionSink: Send + Sync + fmt::Debug {
    /// Hand off one event.
    ///
    /// # Errors
    ///
    /// Returns an error if the event cannot be delivered. The interceptor
    /// logs it and sends the redacted request regardless.
    fn emit(&self, event: DetectionEvent) -> Result<()>;
}

/// Decides which URLs belong to the chat API.
///
/// A plain substring test: at least one endpoint marker and the resource
/// marker must both appear somewhere in the URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlMatcher {
    endpoint_markers: Vec<String>,
    resource_marker: String,
}

impl UrlMatcher {
    /// Create a matcher.
    #[must_use]
    pub fn new(endpoint_markers: Vec<String>, resource_marker: impl Into<String>) -> Self {
        Self {
            endpoint_markers,
            resource_marker: resource_marker.into(),
        }
    }

    /// Build a matcher from configuration.
    #[must_use]
    pub fn from_config(config: &InterceptionConfig) -> Self {
        Self::new(
            config.endpoint_markers.clone(),
            config.resource_marker.clone(),
        )
    }

    /// Check whether `url` should be inspected.
    #[must_use]
    pub fn matches(&self, url: &str) -> bool {
        self.endpoint_markers
            .iter()
            .any(|m| url.contains(m.as_str()))
            && url.contains(self.resource_marker.as_str())
    }
}

impl Default for UrlMatcher {
    fn default() -> Self {
        Self::from_config(&InterceptionConfig::default())
    }
}

/// Short BLAKE3 fingerprint of a body, for logs that must not carry content.
#[must_use]
pub fn body_digest(body: &str) -> String {
    let hex = blake3::hash(body.as_bytes()).to_hex();
    hex[..16].to_string()
}

/// A [`RequestSender`] that redacts email addresses from chat API requests.
#[derive(Debug)]
pub struct Interceptor<S> {
    inner: S,
    sink: Arc<dyn DetectionSink>,
    matcher: UrlMatcher,
    redactor: Redactor,
    clock: Arc<dyn Clock>,
}

impl<S: RequestSender> Interceptor<S> {
    /// Wrap `inner` with the default matcher and placeholder.
    pub fn wrap(inner: S, sink: Arc<dyn DetectionSink>) -> Self {
        Self::with_config(inner, sink, &InterceptionConfig::default())
    }

    /// Wrap `inner` using the given interception settings.
    pub fn with_config(
        inner: S,
        sink: Arc<dyn DetectionSink>,
        config: &InterceptionConfig,
    ) -> Self {
        Self {
            inner,
            sink,
            matcher: UrlMatcher::from_config(config),
            redactor: Redactor::with_placeholder(config.placeholder.clone()),
            clock: Arc::new(SystemClock),
        }
    }

    /// Use a different clock for event timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The wrapped sender.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Inspect and, if needed, redact a request in place.
    ///
    /// Returns `true` if the body was redacted. The detection event has
    /// already been handed to the sink by the time this returns.
    pub fn intercept(&self, request: &mut OutboundRequest) -> bool {
        let url = request.target.resolve();
        if !self.matcher.matches(&url) {
            trace!(%url, "Request not inspected");
            return false;
        }

        let Some(RequestBody::Text(body)) = &request.body else {
            debug!(%url, "Skipping non-text body");
            return false;
        };

        let digest = body_digest(body);
        let ScanOutcome::Redacted {
            body: redacted,
            emails,
        } = self.redactor.scan(body)
        else {
            trace!(%url, body_digest = %digest, "No email addresses in request");
            return false;
        };

        info!(
            count = emails.len(),
            body_digest = %digest,
            "Redacted email addresses from outgoing request"
        );
        let event = DetectionEvent {
            emails,
            timestamp: self.clock.now_ms(),
        };
        if let Err(e) = self.sink.emit(event) {
            warn!(error = %e, "Could not deliver detection event; request is still redacted");
        }

        request.body = Some(RequestBody::Text(redacted));
        true
    }
}

#[async_trait]
impl<S: RequestSender> RequestSender for Interceptor<S> {
    type Response = S::Response;

    async fn send(&self, mut request: OutboundRequest) -> Result<Self::Response> {
        self.intercept(&mut request);
        self.inner.send(request).await
    }
}
