//! Core domain types: persisted settings, telemetry events, and the
//! clamping rules shared by the gate, the trimmer and the keepalive monitor.

use serde::{Deserialize, Serialize};

// ─── Clamp Bounds ───────────────────────────────────────────────────

/// Shortest temporary allow window (milliseconds).
pub const ALLOW_MIN_MS: u64 = 2_000;
/// Longest temporary allow window (milliseconds).
pub const ALLOW_MAX_MS: u64 = 60_000;
/// Allow window used when the requested duration is zero or unusable.
pub const ALLOW_DEFAULT_MS: u64 = 10_000;

/// Hard lower bound for the softcap keep-count.
pub const SOFTCAP_KEEP_MIN: usize = 20;
/// Hard upper bound for the softcap keep-count.
pub const SOFTCAP_KEEP_MAX: usize = 300;
/// Keep-count used before any tuning.
pub const SOFTCAP_KEEP_DEFAULT: usize = 60;

/// Keepalive interval bounds (minutes).
pub const KEEPALIVE_MINUTES_MIN: u32 = 2;
pub const KEEPALIVE_MINUTES_MAX: u32 = 30;
pub const KEEPALIVE_MINUTES_DEFAULT: u32 = 4;

/// Clamp a requested allow window.
///
/// Zero means "unspecified" and falls back to [`ALLOW_DEFAULT_MS`]; every
/// other value, negative ones included, lands in `[2000, 60000]`.
pub fn clamp_allow_ms(ms: i64) -> u64 {
    if ms == 0 {
        return ALLOW_DEFAULT_MS;
    }
    ms.clamp(ALLOW_MIN_MS as i64, ALLOW_MAX_MS as i64) as u64
}

/// Clamp a keep-count to `[20, 300]`.
pub fn clamp_keep(keep: i64) -> usize {
    keep.clamp(SOFTCAP_KEEP_MIN as i64, SOFTCAP_KEEP_MAX as i64) as usize
}

/// Clamp a keepalive period to `[2, 30]` minutes.
///
/// Non-finite input keeps `fallback`; fractional input is floored.
pub fn clamp_minutes(minutes: f64, fallback: u32) -> u32 {
    if !minutes.is_finite() || minutes == 0.0 {
        return fallback.clamp(KEEPALIVE_MINUTES_MIN, KEEPALIVE_MINUTES_MAX);
    }
    let floored = minutes.floor();
    floored.clamp(KEEPALIVE_MINUTES_MIN as f64, KEEPALIVE_MINUTES_MAX as f64) as u32
}

// ─── Settings ───────────────────────────────────────────────────────

/// Persisted user settings. Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub block_history: bool,
    pub debug: bool,
    pub keepalive_enabled: bool,
    pub keepalive_minutes: f64,
    pub auto_reconnect: bool,
    /// Full page reloads stay off until failure pressure turns them on.
    pub allow_reloads: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            block_history: true,
            debug: false,
            keepalive_enabled: true,
            keepalive_minutes: KEEPALIVE_MINUTES_DEFAULT as f64,
            auto_reconnect: true,
            allow_reloads: false,
        }
    }
}

// ─── Telemetry Events ───────────────────────────────────────────────

/// Event emitted by a component into the shared telemetry sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum TelemetryEvent {
    /// A history pagination request was cancelled.
    HistoryCancel,
    /// A disconnect banner was observed in the page.
    Disconnect,
    /// A long main-thread task was observed.
    #[serde(rename_all = "camelCase")]
    LongTask { duration_ms: u64 },
    /// Turn count observed by a trim pass.
    TurnCount { count: usize, keep: usize },
    /// A trim pass removed old turns.
    Trim { removed: usize, kept: usize },
    /// A keepalive ping completed.
    Ping,
    /// A reconnect-like button was clicked.
    RetryClick,
    /// A guarded full reload was performed.
    SoftReload,
}

impl TelemetryEvent {
    /// Stable event name, used for logging and lifetime totals.
    pub fn name(&self) -> &'static str {
        match self {
            Self::HistoryCancel => "historyCancel",
            Self::Disconnect => "disconnect",
            Self::LongTask { .. } => "longtask",
            Self::TurnCount { .. } => "turnCount",
            Self::Trim { .. } => "trim",
            Self::Ping => "ping",
            Self::RetryClick => "retryClick",
            Self::SoftReload => "softReload",
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn allow_zero_uses_default() {
        assert_eq!(clamp_allow_ms(0), ALLOW_DEFAULT_MS);
    }

    #[test]
    fn allow_negative_and_huge_are_clamped() {
        assert_eq!(clamp_allow_ms(-5), ALLOW_MIN_MS);
        assert_eq!(clamp_allow_ms(1), ALLOW_MIN_MS);
        assert_eq!(clamp_allow_ms(i64::MAX), ALLOW_MAX_MS);
        assert_eq!(clamp_allow_ms(15_000), 15_000);
    }

    #[test]
    fn keep_bounds() {
        assert_eq!(clamp_keep(0), 20);
        assert_eq!(clamp_keep(45), 45);
        assert_eq!(clamp_keep(10_000), 300);
    }

    #[test]
    fn minutes_floor_and_fallback() {
        assert_eq!(clamp_minutes(3.9, 4), 3);
        assert_eq!(clamp_minutes(1.0, 4), 2);
        assert_eq!(clamp_minutes(99.0, 4), 30);
        assert_eq!(clamp_minutes(f64::NAN, 4), 4);
        assert_eq!(clamp_minutes(0.0, 5), 5);
    }

    #[test]
    fn settings_defaults_fill_missing_keys() {
        let s: Settings = serde_json::from_str(r#"{"debug":true}"#).expect("valid json");
        assert!(s.debug);
        assert!(s.block_history);
        assert!(!s.allow_reloads);
        assert_eq!(s.keepalive_minutes, 4.0);
    }

    #[test]
    fn telemetry_event_wire_names() {
        let json = serde_json::to_string(&TelemetryEvent::LongTask { duration_ms: 250 })
            .expect("serialize");
        assert_eq!(json, r#"{"event":"longTask","durationMs":250}"#);
        assert_eq!(TelemetryEvent::HistoryCancel.name(), "historyCancel");
    }

    proptest! {
        #[test]
        fn allow_always_within_bounds(ms in any::<i64>()) {
            let v = clamp_allow_ms(ms);
            prop_assert!((ALLOW_MIN_MS..=ALLOW_MAX_MS).contains(&v));
        }
    }
}
