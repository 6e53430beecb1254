use anyhow::Context;
use url::Url;

use tgate_core::classifier::classify_relative;

pub fn cmd_classify(method: &str, url: &str, origin: &str) -> anyhow::Result<()> {
    let origin = Url::parse(origin).with_context(|| format!("invalid origin {origin:?}"))?;
    let history = classify_relative(method, url, &origin);
    println!("{}", if history { "history" } else { "pass" });
    Ok(())
}
