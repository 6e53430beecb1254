//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tgate", about = "chat traffic gate: classify, reshape, simulate, probe")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Tell whether a request is a history pagination request
    Classify(ClassifyOpts),
    /// Thin a JSON history response body
    Reshape(ReshapeOpts),
    /// Replay a scenario file against a simulated page
    Simulate(SimulateOpts),
    /// Pick a keepalive endpoint on a live origin and ping it
    Probe(ProbeOpts),
}

#[derive(clap::Args)]
pub struct ClassifyOpts {
    /// HTTP method
    pub method: String,
    /// Absolute URL, or a path resolved against --origin
    pub url: String,
    #[arg(long, default_value = "https://chatgpt.com")]
    pub origin: String,
}

#[derive(clap::Args)]
pub struct ReshapeOpts {
    /// JSON body to thin ("-" reads stdin)
    pub file: PathBuf,
    /// Number of newest entries to keep
    #[arg(long, default_value = "60")]
    pub keep: usize,
}

#[derive(clap::Args)]
pub struct SimulateOpts {
    /// Scenario JSON file
    pub scenario: PathBuf,
    /// Use a settings file instead of the scenario's in-memory settings
    #[arg(long, env = "TGATE_SETTINGS")]
    pub settings: Option<PathBuf>,
    /// Print the full outcome as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(clap::Args)]
pub struct ProbeOpts {
    /// Origin to probe, e.g. https://chatgpt.com
    pub origin: String,
    /// Behave like a hidden page (beacon fallback)
    #[arg(long)]
    pub hidden: bool,
    /// Per-request timeout in milliseconds
    #[arg(long, default_value = "6000")]
    pub timeout_ms: u64,
}
