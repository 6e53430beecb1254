//! tgate-autopilot: periodic self-tuning of the gate, trimmer and
//! keepalive from drained telemetry windows.

pub mod pilot;

pub use pilot::{
    Adjustment, AutoPilot, INTENT_SAMPLE_MS, TUNE_FIRST_MS, TUNE_PERIOD_MS, TuneReport,
    TuningConfig, WindowVerdict,
};
