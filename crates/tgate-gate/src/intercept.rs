//! In-page interception surface: decorators over the page's two request
//! primitives. A blocked request fails exactly like a network abort so the
//! host application's own error handling takes over.

use std::rc::Rc;

use tgate_core::{Request, Response, Transport, TransportError, XhrLike};

use crate::gate::{GateDecision, RequestGate};
use crate::reshape::{DEFAULT_RESHAPE_KEEP, reshape_response};

/// Promise-style primitive wrapped by the gate.
pub struct GatedFetch<T> {
    inner: T,
    gate: Rc<RequestGate>,
}

impl<T: Transport> GatedFetch<T> {
    pub fn new(inner: T, gate: Rc<RequestGate>) -> Self {
        Self { inner, gate }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: Transport> Transport for GatedFetch<T> {
    async fn send(&self, request: Request) -> Result<Response, TransportError> {
        match self.gate.decide(request.method.as_str(), &request.url) {
            GateDecision::Block => {
                self.gate.record_cancel(&request.url);
                Err(TransportError::Aborted)
            }
            GateDecision::Reshape => {
                let response = self.inner.send(request).await?;
                Ok(reshape_response(response, DEFAULT_RESHAPE_KEEP))
            }
            GateDecision::Pass => self.inner.send(request).await,
        }
    }

    fn send_beacon(&self, url: &str) -> bool {
        self.inner.send_beacon(url)
    }
}

/// Open/send primitive wrapped by the gate.
///
/// The method and URL captured at `open` decide the fate of `send`.
pub struct GatedXhr<X> {
    inner: X,
    gate: Rc<RequestGate>,
    method: String,
    url: String,
}

impl<X: XhrLike> GatedXhr<X> {
    pub fn new(inner: X, gate: Rc<RequestGate>) -> Self {
        Self {
            inner,
            gate,
            method: String::from("GET"),
            url: String::new(),
        }
    }

    pub fn inner(&self) -> &X {
        &self.inner
    }
}

impl<X: XhrLike> XhrLike for GatedXhr<X> {
    fn open(&mut self, method: &str, url: &str) {
        self.method = method.to_ascii_uppercase();
        self.url = url.to_owned();
        self.inner.open(method, url);
    }

    fn send(&mut self, body: Option<&[u8]>) {
        if self.gate.should_block(&self.method, &self.url) {
            self.inner.abort();
            self.inner.dispatch_error();
            self.gate.record_cancel(&self.url);
            return;
        }
        self.inner.send(body);
    }

    fn abort(&mut self) {
        self.inner.abort();
    }

    fn dispatch_error(&mut self) {
        self.inner.dispatch_error();
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    use serde_json::{Value, json};
    use tgate_core::{ManualClock, Telemetry};

    const HISTORY: &str = "https://chatgpt.com/backend-api/conversation/abc?cursor=9";

    /// Records every request and answers with a canned body.
    struct FakeNetwork {
        seen: RefCell<Vec<String>>,
        body: Value,
    }

    impl FakeNetwork {
        fn new(body: Value) -> Self {
            Self {
                seen: RefCell::new(Vec::new()),
                body,
            }
        }
    }

    impl Transport for FakeNetwork {
        async fn send(&self, request: Request) -> Result<Response, TransportError> {
            self.seen.borrow_mut().push(request.url);
            Ok(Response::json(self.body.to_string()))
        }
    }

    #[derive(Default)]
    struct FakeXhr {
        calls: Vec<&'static str>,
    }

    impl XhrLike for FakeXhr {
        fn open(&mut self, _method: &str, _url: &str) {
            self.calls.push("open");
        }
        fn send(&mut self, _body: Option<&[u8]>) {
            self.calls.push("send");
        }
        fn abort(&mut self) {
            self.calls.push("abort");
        }
        fn dispatch_error(&mut self) {
            self.calls.push("error");
        }
    }

    fn gate() -> (Rc<RequestGate>, Rc<Telemetry>) {
        let telemetry = Rc::new(Telemetry::new());
        let gate = RequestGate::new(Rc::new(ManualClock::new(10_000)), telemetry.clone());
        (Rc::new(gate), telemetry)
    }

    // ── 1. fetch surface ────────────────────────────────────────────

    #[tokio::test]
    async fn blocked_fetch_rejects_as_abort_and_never_hits_network() {
        let (gate, telemetry) = gate();
        let fetch = GatedFetch::new(FakeNetwork::new(json!({})), gate);

        let result = fetch.send(Request::get(HISTORY)).await;
        assert_eq!(result, Err(TransportError::Aborted));
        assert!(fetch.inner().seen.borrow().is_empty());
        assert_eq!(telemetry.drain().cancels, 1);
    }

    #[tokio::test]
    async fn each_blocked_attempt_counts_once() {
        let (gate, telemetry) = gate();
        let fetch = GatedFetch::new(FakeNetwork::new(json!({})), gate);
        for _ in 0..3 {
            let _ = fetch.send(Request::get(HISTORY)).await;
        }
        assert_eq!(telemetry.drain().cancels, 3);
    }

    #[tokio::test]
    async fn allowed_history_response_is_thinned() {
        let (gate, telemetry) = gate();
        gate.set_intent(true);
        let messages: Vec<Value> = (0..80).map(|i| json!({"create_time": i})).collect();
        let fetch = GatedFetch::new(FakeNetwork::new(json!({ "messages": messages })), gate);

        let res = fetch.send(Request::get(HISTORY)).await.expect("allowed");
        let body: Value = serde_json::from_slice(&res.body).expect("json");
        assert_eq!(body["messages"].as_array().map(Vec::len), Some(60));
        assert_eq!(telemetry.drain().cancels, 0);
    }

    #[tokio::test]
    async fn non_history_passes_untouched() {
        let (gate, _) = gate();
        let items: Vec<Value> = (0..100).map(|i| json!(i)).collect();
        let fetch = GatedFetch::new(FakeNetwork::new(json!({ "items": items })), gate);
        let res = fetch
            .send(Request::get("https://chatgpt.com/backend-api/models"))
            .await
            .expect("passes");
        let body: Value = serde_json::from_slice(&res.body).expect("json");
        assert_eq!(body["items"].as_array().map(Vec::len), Some(100));
    }

    // ── 2. xhr surface ──────────────────────────────────────────────

    #[test]
    fn blocked_xhr_aborts_and_reports_error() {
        let (gate, telemetry) = gate();
        let mut xhr = GatedXhr::new(FakeXhr::default(), gate);
        xhr.open("get", HISTORY);
        xhr.send(None);
        assert_eq!(xhr.inner().calls, vec!["open", "abort", "error"]);
        assert_eq!(telemetry.drain().cancels, 1);
    }

    #[test]
    fn surfaces_agree_on_allow_window() {
        let (gate, telemetry) = gate();
        gate.allow_for_ms(10_000);
        let mut xhr = GatedXhr::new(FakeXhr::default(), gate.clone());
        xhr.open("POST", HISTORY);
        xhr.send(Some(b"{}".as_slice()));
        assert_eq!(xhr.inner().calls, vec!["open", "send"]);
        assert_eq!(gate.decide("POST", HISTORY), GateDecision::Reshape);
        assert_eq!(telemetry.drain().cancels, 0);
    }
}
