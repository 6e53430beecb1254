//! tgate-keepalive: keeps the chat session warm and recovers from
//! disconnects.
//!
//! [`KeepaliveMonitor`] owns the jittered ping schedule, disconnect banner
//! detection and the guarded soft reload. [`Pinger`] performs the actual
//! liveness requests and caches the first endpoint that answers.

pub mod monitor;
pub mod probe;

pub use monitor::{
    KeepaliveConfig, KeepaliveHandle, KeepaliveMonitor, KeepaliveTask, RELOAD_COOLDOWN_MS, ReloadOutcome, SkipReason,
    is_disconnect_text,
};
pub use probe::{CANDIDATE_PATHS, PROBE_TIMEOUT, Pinger};
