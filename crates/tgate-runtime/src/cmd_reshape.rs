use std::io::Read;
use std::path::Path;

use anyhow::Context;

use tgate_core::Response;
use tgate_gate::reshape_response;

pub fn cmd_reshape(file: &Path, keep: usize) -> anyhow::Result<()> {
    let body = if file == Path::new("-") {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .context("failed to read stdin")?;
        buf
    } else {
        std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?
    };

    let reshaped = reshape_response(Response::json(body.clone()), keep);
    if reshaped.body == body {
        tracing::info!(keep, "body left unchanged");
    }
    println!("{}", String::from_utf8_lossy(&reshaped.body));
    Ok(())
}
