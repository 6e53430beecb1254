//! Telemetry counter sink shared by all components.
//!
//! Components only append; the tuning controller is the single reader and
//! always resets what it reads. Execution is single-threaded, so the
//! counters sit behind a `RefCell` rather than a lock.

use std::cell::RefCell;
use std::collections::BTreeMap;

use crate::types::TelemetryEvent;

/// Minimum duration for a long-task entry to count (milliseconds).
pub const LONG_TASK_MIN_MS: u64 = 200;

/// Fire-and-forget event sink. Implementations never fail observably.
pub trait TelemetrySink {
    fn record(&self, event: TelemetryEvent);
}

impl<T: TelemetrySink + ?Sized> TelemetrySink for &T {
    fn record(&self, event: TelemetryEvent) {
        (**self).record(event)
    }
}

/// Counts accumulated since the last drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub cancels: u32,
    pub disconnects: u32,
    pub longtasks: u32,
    /// Last reported turn count. A gauge: draining does not reset it, unlike
    /// the event counters above. The trimmer reports on every heartbeat, so
    /// a pass only sees a stale value if no report arrived in its window.
    pub last_turn_count: usize,
}

#[derive(Debug, Default)]
struct Counters {
    window: WindowSnapshot,
    totals: BTreeMap<&'static str, u64>,
}

/// Owner of the telemetry counters.
#[derive(Debug, Default)]
pub struct Telemetry {
    counters: RefCell<Counters>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read and reset the window counters in one step.
    pub fn drain(&self) -> WindowSnapshot {
        let mut counters = self.counters.borrow_mut();
        let snapshot = counters.window;
        counters.window = WindowSnapshot {
            last_turn_count: snapshot.last_turn_count,
            ..WindowSnapshot::default()
        };
        snapshot
    }

    /// Lifetime count of events with the given name.
    pub fn total(&self, name: &str) -> u64 {
        self.counters.borrow().totals.get(name).copied().unwrap_or(0)
    }

    /// Lifetime counts of every event seen so far, by name.
    pub fn totals(&self) -> BTreeMap<&'static str, u64> {
        self.counters.borrow().totals.clone()
    }
}

impl TelemetrySink for Telemetry {
    fn record(&self, event: TelemetryEvent) {
        // A re-entrant record during a drain is dropped rather than panicking.
        let Ok(mut counters) = self.counters.try_borrow_mut() else {
            return;
        };
        *counters.totals.entry(event.name()).or_insert(0) += 1;

        let window = &mut counters.window;
        match event {
            TelemetryEvent::HistoryCancel => window.cancels = window.cancels.saturating_add(1),
            TelemetryEvent::Disconnect => {
                window.disconnects = window.disconnects.saturating_add(1)
            }
            TelemetryEvent::LongTask { duration_ms } if duration_ms >= LONG_TASK_MIN_MS => {
                window.longtasks = window.longtasks.saturating_add(1)
            }
            TelemetryEvent::TurnCount { count, .. } => window.last_turn_count = count,
            _ => {}
        }
        drop(counters);

        tracing::trace!(event = event.name(), ?event, "telemetry");
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_and_drains() {
        let t = Telemetry::new();
        t.record(TelemetryEvent::HistoryCancel);
        t.record(TelemetryEvent::HistoryCancel);
        t.record(TelemetryEvent::Disconnect);
        t.record(TelemetryEvent::TurnCount { count: 75, keep: 60 });

        let snap = t.drain();
        assert_eq!(snap.cancels, 2);
        assert_eq!(snap.disconnects, 1);
        assert_eq!(snap.last_turn_count, 75);

        let next = t.drain();
        assert_eq!(next.cancels, 0);
        assert_eq!(next.disconnects, 0);
        assert_eq!(next.last_turn_count, 75, "turn count is a gauge");
    }

    #[test]
    fn short_long_tasks_are_ignored() {
        let t = Telemetry::new();
        t.record(TelemetryEvent::LongTask { duration_ms: 120 });
        t.record(TelemetryEvent::LongTask { duration_ms: 200 });
        t.record(TelemetryEvent::LongTask { duration_ms: 900 });
        assert_eq!(t.drain().longtasks, 2);
        assert_eq!(t.total("longtask"), 3);
    }

    #[test]
    fn informational_events_only_hit_totals() {
        let t = Telemetry::new();
        t.record(TelemetryEvent::Ping);
        t.record(TelemetryEvent::Trim { removed: 5, kept: 60 });
        assert_eq!(t.drain(), WindowSnapshot::default());
        assert_eq!(t.total("ping"), 1);
        assert_eq!(t.total("trim"), 1);
        assert_eq!(t.total("softReload"), 0);
    }
}
