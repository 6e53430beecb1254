//! Real network transport over reqwest.
//!
//! Redirects are not followed: a 3xx is reported as an opaque redirect,
//! which liveness probing treats as reachable.

use reqwest::redirect::Policy;

use tgate_core::{Request, Response, Transport, TransportError};

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(Self { client })
    }
}

fn map_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::TimedOut
    } else {
        TransportError::Network(e.to_string())
    }
}

impl Transport for ReqwestTransport {
    async fn send(&self, request: Request) -> Result<Response, TransportError> {
        let mut builder = self.client.request(request.method, &request.url);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        let res = builder.send().await.map_err(map_error)?;

        let status = res.status();
        let headers = res.headers().clone();
        let body = res.bytes().await.map_err(map_error)?;
        Ok(Response {
            status,
            status_text: status.canonical_reason().unwrap_or("").to_owned(),
            headers,
            body: body.to_vec(),
            opaque_redirect: status.is_redirection(),
        })
    }

    /// Fire-and-forget POST; the outcome is never observed.
    fn send_beacon(&self, url: &str) -> bool {
        let pending = self.client.post(url).send();
        tokio::spawn(async move {
            if let Err(e) = pending.await {
                tracing::debug!(error = %e, "beacon failed");
            }
        });
        true
    }
}
