//! Network seam: the two request-issuing primitives a page script has.
//!
//! [`Transport`] is the promise-style primitive (request in, response
//! out). [`XhrLike`] is the open/send primitive that reports failure through
//! an `error` event. The gate wraps both.

use std::future::Future;

use http::header::CONTENT_TYPE;
use http::{HeaderMap, Method, StatusCode};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub body: Option<Vec<u8>>,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self::new(Method::HEAD, url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: StatusCode,
    pub status_text: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    /// The response is an unfollowed redirect the page may not inspect.
    pub opaque_redirect: bool,
}

impl Response {
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            status_text: status.canonical_reason().unwrap_or("").to_owned(),
            headers: HeaderMap::new(),
            body: body.into(),
            opaque_redirect: false,
        }
    }

    /// A `200 OK` JSON response.
    pub fn json(body: impl Into<Vec<u8>>) -> Self {
        let mut res = Self::new(StatusCode::OK, body);
        res.headers.insert(
            CONTENT_TYPE,
            http::HeaderValue::from_static("application/json"),
        );
        res
    }

    pub fn opaque_redirect() -> Self {
        Self {
            opaque_redirect: true,
            ..Self::new(StatusCode::FOUND, Vec::new())
        }
    }

    /// 2xx status.
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Counts as "reachable" for liveness probing.
    pub fn is_alive(&self) -> bool {
        self.ok() || self.opaque_redirect
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }
}

/// Failure of a request, as seen by the calling page code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request aborted")]
    Aborted,
    #[error("request timed out")]
    TimedOut,
    #[error("network error: {0}")]
    Network(String),
}

/// Promise-style request primitive.
pub trait Transport {
    fn send(&self, request: Request) -> impl Future<Output = Result<Response, TransportError>>;

    /// Fire-and-forget beacon. Returns whether it was queued.
    fn send_beacon(&self, _url: &str) -> bool {
        false
    }
}

impl<T: Transport> Transport for &T {
    fn send(&self, request: Request) -> impl Future<Output = Result<Response, TransportError>> {
        (**self).send(request)
    }

    fn send_beacon(&self, url: &str) -> bool {
        (**self).send_beacon(url)
    }
}

/// Open/send request primitive with event-style failure reporting.
pub trait XhrLike {
    fn open(&mut self, method: &str, url: &str);
    fn send(&mut self, body: Option<&[u8]>);
    fn abort(&mut self);
    /// Deliver an `error` event to the caller's handlers.
    fn dispatch_error(&mut self);
}
