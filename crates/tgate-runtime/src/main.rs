//! tgate: chat traffic gate runtime binary.

use clap::Parser;

mod cli;
mod cmd_classify;
mod cmd_probe;
mod cmd_reshape;
mod cmd_simulate;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let filter = std::env::var("TGATE_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        cli::Command::Classify(opts) => {
            cmd_classify::cmd_classify(&opts.method, &opts.url, &opts.origin)?;
        }
        cli::Command::Reshape(opts) => {
            cmd_reshape::cmd_reshape(&opts.file, opts.keep)?;
        }
        cli::Command::Simulate(opts) => {
            let failures =
                cmd_simulate::cmd_simulate(&opts.scenario, opts.settings.as_deref(), opts.json)
                    .await?;
            if failures > 0 {
                std::process::exit(1);
            }
        }
        cli::Command::Probe(opts) => {
            let alive = cmd_probe::cmd_probe(&opts.origin, opts.hidden, opts.timeout_ms).await?;
            if !alive {
                std::process::exit(2);
            }
        }
    }

    Ok(())
}
