//! tgate-runtime: wires the gate, trimmer, keepalive and autopilot into one
//! page and drives it from a single-threaded event loop.
//!
//! The loop is fed by scenario files. Time comes from the tokio clock, so a
//! paused runtime replays hours of page life in milliseconds.

pub mod clock;
pub mod net;
pub mod page;
pub mod scenario;
pub mod settings;

pub use clock::TokioClock;
pub use net::ReqwestTransport;
pub use page::{FetchOutcome, FetchRecord, Page, PageConfig, PageOutcome};
pub use scenario::{
    Action, Expectations, Scenario, ScenarioError, ScenarioTransport, Step, run_scenario,
};
pub use settings::FileSettings;
