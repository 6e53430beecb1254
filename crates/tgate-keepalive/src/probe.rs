//! Liveness probing against same-origin endpoints.
//!
//! Each candidate is tried with HEAD; GET is only attempted when HEAD
//! fails at the transport level. A hidden page may fall back to a
//! fire-and-forget beacon. The first endpoint that answers is cached for
//! the rest of the session.

use std::rc::Rc;
use std::time::Duration;

use url::Url;

use tgate_core::{Request, Response, TelemetryEvent, TelemetrySink, Transport, TransportError};

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(6);

/// Probed in order; `/` doubles as the fallback.
pub const CANDIDATE_PATHS: [&str; 5] = [
    "/api/auth/session",
    "/backend-api/models",
    "/backend-api/conversations?offset=0&limit=1",
    "/favicon.ico",
    "/",
];

const FALLBACK_PATH: &str = "/";

pub struct Pinger {
    origin: Url,
    chosen: Option<String>,
    timeout: Duration,
    telemetry: Rc<dyn TelemetrySink>,
}

impl Pinger {
    pub fn new(origin: Url, telemetry: Rc<dyn TelemetrySink>) -> Self {
        Self {
            origin,
            chosen: None,
            timeout: PROBE_TIMEOUT,
            telemetry,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Cached endpoint path, once one has been picked.
    pub fn chosen(&self) -> Option<&str> {
        self.chosen.as_deref()
    }

    /// Pick the first live candidate, or the fallback when none answers.
    pub async fn choose_endpoint<T: Transport>(&mut self, transport: &T, page_visible: bool) -> &str {
        if self.chosen.is_none() {
            let mut picked = FALLBACK_PATH;
            for path in CANDIDATE_PATHS {
                if self.head_or_get(transport, path, page_visible).await {
                    picked = path;
                    break;
                }
            }
            tracing::debug!(endpoint = picked, "keepalive endpoint chosen");
            self.chosen = Some(picked.to_owned());
        }
        self.chosen.as_deref().unwrap_or(FALLBACK_PATH)
    }

    /// One keepalive ping. Failures are swallowed; the attempt is always
    /// counted.
    pub async fn ping<T: Transport>(&mut self, transport: &T, page_visible: bool) -> bool {
        let path = self.choose_endpoint(transport, page_visible).await.to_owned();
        let alive = self.head_or_get(transport, &path, page_visible).await;
        tracing::debug!(endpoint = %path, alive, "keepalive ping");
        self.telemetry.record(TelemetryEvent::Ping);
        alive
    }

    async fn head_or_get<T: Transport>(&self, transport: &T, path: &str, page_visible: bool) -> bool {
        let url = match self.origin.join(path) {
            Ok(url) => url.to_string(),
            Err(e) => {
                tracing::debug!(path, error = %e, "bad probe path");
                return false;
            }
        };

        match self.bounded(transport, Request::head(url.as_str())).await {
            Ok(res) => return res.is_alive(),
            Err(e) => tracing::debug!(url = %url, error = %e, "HEAD probe failed"),
        }
        match self.bounded(transport, Request::get(url.as_str())).await {
            Ok(res) => return res.is_alive(),
            Err(e) => tracing::debug!(url = %url, error = %e, "GET probe failed"),
        }
        !page_visible && transport.send_beacon(&url)
    }

    async fn bounded<T: Transport>(&self, transport: &T, request: Request) -> Result<Response, TransportError> {
        tokio::time::timeout(self.timeout, transport.send(request))
            .await
            .unwrap_or(Err(TransportError::TimedOut))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    use http::{Method, StatusCode};
    use tgate_core::Telemetry;

    /// Scripted responder keyed by path.
    #[derive(Default)]
    struct Script {
        seen: RefCell<Vec<(Method, String)>>,
        beacons: RefCell<Vec<String>>,
        live: Vec<&'static str>,
        errors: Vec<(Method, &'static str)>,
        hang: bool,
    }

    impl Transport for Script {
        async fn send(&self, request: Request) -> Result<Response, TransportError> {
            let url = Url::parse(&request.url).expect("absolute");
            let path = match url.query() {
                Some(q) => format!("{}?{q}", url.path()),
                None => url.path().to_owned(),
            };
            self.seen.borrow_mut().push((request.method.clone(), path.clone()));
            if self.hang {
                std::future::pending::<()>().await;
            }
            let failing = self
                .errors
                .iter()
                .any(|(m, p)| *m == request.method && *p == path);
            if failing {
                return Err(TransportError::Network("reset".into()));
            }
            if self.live.contains(&path.as_str()) {
                Ok(Response::new(StatusCode::OK, Vec::new()))
            } else {
                Ok(Response::new(StatusCode::NOT_FOUND, Vec::new()))
            }
        }

        fn send_beacon(&self, url: &str) -> bool {
            self.beacons.borrow_mut().push(url.to_owned());
            true
        }
    }

    fn pinger() -> (Pinger, Rc<Telemetry>) {
        let telemetry = Rc::new(Telemetry::new());
        let origin = Url::parse("https://chatgpt.com").expect("url");
        (Pinger::new(origin, telemetry.clone()), telemetry)
    }

    // ── 1. endpoint selection ───────────────────────────────────────

    #[tokio::test]
    async fn first_live_candidate_wins_and_is_cached() {
        let (mut p, _) = pinger();
        let net = Script {
            live: vec!["/backend-api/models", "/"],
            ..Script::default()
        };
        assert_eq!(p.choose_endpoint(&net, true).await, "/backend-api/models");
        let probes = net.seen.borrow().len();
        assert_eq!(probes, 2);

        assert_eq!(p.choose_endpoint(&net, true).await, "/backend-api/models");
        assert_eq!(net.seen.borrow().len(), probes, "cached choice is not re-probed");
    }

    #[tokio::test]
    async fn nothing_alive_falls_back_to_root() {
        let (mut p, _) = pinger();
        let net = Script::default();
        assert_eq!(p.choose_endpoint(&net, true).await, "/");
        assert_eq!(p.chosen(), Some("/"));
    }

    #[tokio::test]
    async fn get_is_tried_only_after_head_errors() {
        let (mut p, _) = pinger();
        let net = Script {
            live: vec!["/api/auth/session"],
            errors: vec![(Method::HEAD, "/api/auth/session")],
            ..Script::default()
        };
        assert_eq!(p.choose_endpoint(&net, true).await, "/api/auth/session");
        let seen = net.seen.borrow();
        assert_eq!(seen[0].0, Method::HEAD);
        assert_eq!(seen[1].0, Method::GET);
    }

    #[tokio::test]
    async fn hidden_page_accepts_beacon() {
        let (p, _) = pinger();
        let net = Script {
            errors: vec![(Method::HEAD, "/favicon.ico"), (Method::GET, "/favicon.ico")],
            ..Script::default()
        };
        assert!(!p.head_or_get(&net, "/favicon.ico", true).await);
        assert!(p.head_or_get(&net, "/favicon.ico", false).await);
        assert_eq!(net.beacons.borrow().as_slice(), ["https://chatgpt.com/favicon.ico"]);
    }

    // ── 2. ping ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn ping_counts_every_attempt() {
        let (mut p, telemetry) = pinger();
        let net = Script {
            live: vec!["/"],
            ..Script::default()
        };
        assert!(p.ping(&net, true).await);
        assert!(p.ping(&net, true).await);
        assert_eq!(telemetry.total("ping"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_requests_time_out() {
        let (mut p, telemetry) = pinger();
        let net = Script {
            hang: true,
            ..Script::default()
        };
        assert!(!p.ping(&net, true).await);
        assert_eq!(p.chosen(), Some("/"));
        assert_eq!(telemetry.total("ping"), 1);
    }
}
