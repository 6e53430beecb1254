use std::rc::Rc;
use std::time::Duration;

use anyhow::Context;
use url::Url;

use tgate_core::Telemetry;
use tgate_keepalive::Pinger;
use tgate_runtime::ReqwestTransport;

/// Choose a keepalive endpoint on `origin` and ping it once.
pub async fn cmd_probe(origin: &str, hidden: bool, timeout_ms: u64) -> anyhow::Result<bool> {
    let origin = Url::parse(origin).with_context(|| format!("invalid origin {origin:?}"))?;
    let transport = ReqwestTransport::new()?;
    let telemetry = Rc::new(Telemetry::new());
    let mut pinger =
        Pinger::new(origin, telemetry.clone()).with_timeout(Duration::from_millis(timeout_ms));

    let endpoint = pinger.choose_endpoint(&transport, !hidden).await.to_owned();
    println!("endpoint: {endpoint}");
    let alive = pinger.ping(&transport, !hidden).await;
    println!("alive: {alive}");
    Ok(alive)
}
