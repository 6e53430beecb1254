//! Softcap trimmer state machine.
//!
//! `Unbound → Bound → Bound(stale)`: the container is (re)discovered on a
//! 1s heartbeat and on structural changes. Trim passes are debounced so a
//! burst of mutations yields one trailing pass.
//!
//! A pure container (every element child is a turn) is trimmed with a
//! single bulk child replacement; a mixed container loses its oldest turns
//! one by one. Either way the container is hidden for the duration of the
//! batch and its previous `display` restored afterwards.

use std::cell::RefCell;
use std::rc::Rc;

use tgate_core::types::{SOFTCAP_KEEP_DEFAULT, clamp_keep};
use tgate_core::{
    MutationRecord, NodeId, PageDom, SoftcapControl, SoftcapPatch, TelemetryEvent, TelemetrySink,
    TimerQueue,
};

/// Rediscovery period.
pub const HEARTBEAT_MS: u64 = 1_000;
/// Debounce after a config change.
const CONFIG_DEBOUNCE_MS: u64 = 30;
/// Debounce after a container mutation.
const MUTATION_DEBOUNCE_MS: u64 = 20;
/// Debounce after binding a new container.
const REBIND_DEBOUNCE_MS: u64 = 50;
/// Delay of the first pass after start.
const STARTUP_DELAY_MS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Timer {
    Heartbeat,
    Trim,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftcapConfig {
    pub enabled: bool,
    pub keep: usize,
}

impl Default for SoftcapConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            keep: SOFTCAP_KEEP_DEFAULT,
        }
    }
}

/// Container binding. Observing a container means reacting to its
/// child-list mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Unbound,
    Bound { container: NodeId },
}

/// Outcome of one trim pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrimReport {
    pub total: usize,
    pub removed: usize,
    pub bulk: bool,
}

pub struct SoftcapTrimmer {
    config: SoftcapConfig,
    binding: Binding,
    first_done: bool,
    unshield_pending: bool,
    timers: TimerQueue<Timer>,
    telemetry: Rc<dyn TelemetrySink>,
}

impl SoftcapTrimmer {
    pub fn new(telemetry: Rc<dyn TelemetrySink>) -> Self {
        Self {
            config: SoftcapConfig::default(),
            binding: Binding::Unbound,
            first_done: false,
            unshield_pending: false,
            timers: TimerQueue::new(),
            telemetry,
        }
    }

    /// Bind if possible, schedule the first pass and start the heartbeat.
    pub fn start(&mut self, dom: &dyn PageDom, now_ms: u64) {
        self.watch(dom, now_ms);
        self.timers.set(Timer::Trim, now_ms, STARTUP_DELAY_MS);
        self.timers.set(Timer::Heartbeat, now_ms, HEARTBEAT_MS);
    }

    pub fn config(&self) -> SoftcapConfig {
        self.config
    }

    pub fn binding(&self) -> Binding {
        self.binding
    }

    pub fn set_config(&mut self, patch: SoftcapPatch, now_ms: u64) {
        if let Some(enabled) = patch.enabled {
            self.config.enabled = enabled;
        }
        if let Some(keep) = patch.keep {
            self.config.keep = clamp_keep(keep);
        }
        tracing::debug!(enabled = self.config.enabled, keep = self.config.keep, "softcap config");
        self.timers.set(Timer::Trim, now_ms, CONFIG_DEBOUNCE_MS);
    }

    /// Rediscover the container; rebinding schedules a pass.
    pub fn watch(&mut self, dom: &dyn PageDom, now_ms: u64) {
        let Some(found) = find_container(dom) else {
            return;
        };
        if self.binding == (Binding::Bound { container: found }) {
            return;
        }
        tracing::debug!(container = found.0, "softcap bound");
        self.binding = Binding::Bound { container: found };
        self.timers.set(Timer::Trim, now_ms, REBIND_DEBOUNCE_MS);
    }

    /// React to child-list changes.
    pub fn on_mutations(&mut self, dom: &dyn PageDom, records: &[MutationRecord], now_ms: u64) {
        match self.binding {
            Binding::Bound { container } if dom.is_connected(container) => {
                if records.iter().any(|r| r.target == container) {
                    self.timers.set(Timer::Trim, now_ms, MUTATION_DEBOUNCE_MS);
                }
            }
            _ => {
                if records.iter().any(|r| !r.added.is_empty()) {
                    self.watch(dom, now_ms);
                }
            }
        }
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.timers.next_deadline()
    }

    pub fn on_timer(&mut self, dom: &mut dyn PageDom, now_ms: u64) {
        while let Some(timer) = self.timers.pop_due(now_ms) {
            match timer {
                Timer::Heartbeat => {
                    self.watch(dom, now_ms);
                    self.timers.set(Timer::Trim, now_ms, 0);
                    self.timers.set(Timer::Heartbeat, now_ms, HEARTBEAT_MS);
                }
                Timer::Trim => {
                    self.trim(dom);
                }
            }
        }
    }

    /// One trim pass. `None` when disabled or unbound.
    pub fn trim(&mut self, dom: &mut dyn PageDom) -> Option<TrimReport> {
        if !self.config.enabled {
            return None;
        }
        let Binding::Bound { container } = self.binding else {
            return None;
        };

        let turns = dom.turn_markers_under(container);
        let total = turns.len();
        let keep = self.config.keep;
        self.telemetry
            .record(TelemetryEvent::TurnCount { count: total, keep });

        let mut report = TrimReport {
            total,
            removed: 0,
            bulk: false,
        };
        let excess = total.saturating_sub(keep);
        if excess > 0 {
            let previous_display = dom.display(container);
            dom.set_display(container, Some("none".to_owned()));
            if is_pure(dom, container) {
                dom.replace_children(container, &turns[excess..]);
                report.bulk = true;
            } else {
                for turn in &turns[..excess] {
                    dom.remove(*turn);
                }
            }
            dom.set_display(container, previous_display);
            report.removed = excess;
            tracing::debug!(removed = excess, kept = keep, bulk = report.bulk, "softcap trim");
            self.telemetry.record(TelemetryEvent::Trim {
                removed: excess,
                kept: keep,
            });
        }

        if !self.first_done {
            self.first_done = true;
            self.unshield_pending = true;
        }
        Some(report)
    }

    /// Take the one-shot unshield signal raised by the first pass.
    pub fn take_unshield(&mut self) -> bool {
        std::mem::take(&mut self.unshield_pending)
    }
}

/// Shared trimmer handle the tuning controller pushes config through.
#[derive(Clone)]
pub struct SoftcapHandle(Rc<RefCell<SoftcapTrimmer>>);

impl SoftcapHandle {
    pub fn new(trimmer: Rc<RefCell<SoftcapTrimmer>>) -> Self {
        Self(trimmer)
    }
}

impl SoftcapControl for SoftcapHandle {
    fn set_config(&self, patch: SoftcapPatch, now_ms: u64) {
        match self.0.try_borrow_mut() {
            Ok(mut trimmer) => trimmer.set_config(patch, now_ms),
            Err(_) => tracing::debug!("softcap busy; config push dropped"),
        }
    }
}

// ─── Container Discovery ────────────────────────────────────────────

/// Closest ancestor of the first turn whose element children are all
/// turns, stopping below `body`; else the first turn's parent.
pub fn find_container(dom: &dyn PageDom) -> Option<NodeId> {
    let first = dom.first_turn_marker()?;
    let parent = dom.parent(first);
    let body = dom.body();

    let mut cursor = parent;
    while let Some(node) = cursor {
        if node == body {
            break;
        }
        if is_pure(dom, node) {
            return Some(node);
        }
        cursor = dom.parent(node);
    }
    parent
}

/// Non-empty and every element child is a turn.
pub fn is_pure(dom: &dyn PageDom, node: NodeId) -> bool {
    let children = dom.children(node);
    !children.is_empty() && children.iter().all(|c| dom.is_turn_marker(*c))
}

// ─── Tests ──────────────────────────────────────────────────────────
