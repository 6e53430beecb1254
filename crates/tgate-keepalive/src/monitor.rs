//! Keepalive monitor state machine.
//!
//! Timers:
//!
//! - **Ping**: every `minutes * U(0.25, 0.5)` minutes, re-rolled whenever the
//!   schedule is rebuilt.
//! - **PingSoon**: 3s after a reschedule, 1.2s after the page becomes visible.
//! - **SoftReload**: 2.5s after an unrecovered disconnect banner.
//! - **OnlineRetry**: 1.2s after the network comes back.
//!
//! Pings are async network work, so `on_timer` hands them back to the
//! caller as [`KeepaliveTask`]s; everything else happens synchronously.

use std::cell::RefCell;
use std::rc::Rc;

use rand::Rng;

use tgate_core::types::{KEEPALIVE_MINUTES_DEFAULT, clamp_minutes};
use tgate_core::{
    KeepaliveControl, MutationRecord, PageDom, Settings, TelemetryEvent, TelemetrySink, TimerQueue,
};

/// Minimum spacing between two reloads.
pub const RELOAD_COOLDOWN_MS: u64 = 30_000;
const PING_SOON_AFTER_SCHEDULE_MS: u64 = 3_000;
const PING_SOON_AFTER_VISIBLE_MS: u64 = 1_200;
const SOFT_RELOAD_DELAY_MS: u64 = 2_500;
const ONLINE_RETRY_DELAY_MS: u64 = 1_200;
/// Only the head of an inserted node's text is scanned.
const BANNER_SCAN_CHARS: usize = 4_096;

const DISCONNECT_PHRASES: [&str; 6] = [
    "trying to reconnect",
    "attempting to connect",
    "reconnecting",
    "network error",
    "disconnected",
    "lost connection",
];

const RETRY_LABELS: [&str; 4] = ["reload", "retry", "try again", "reconnect"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Timer {
    Ping,
    PingSoon,
    SoftReload,
    OnlineRetry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveConfig {
    pub enabled: bool,
    pub minutes: u32,
    pub auto_reconnect: bool,
    pub allow_reloads: bool,
    pub last_reload_at_ms: Option<u64>,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            minutes: KEEPALIVE_MINUTES_DEFAULT,
            auto_reconnect: true,
            allow_reloads: false,
            last_reload_at_ms: None,
        }
    }
}

/// Async work requested by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveTask {
    Ping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Cooldown,
    Hidden,
    Typing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    Reloaded,
    Skipped(SkipReason),
}

pub struct KeepaliveMonitor<R> {
    config: KeepaliveConfig,
    period_ms: Option<u64>,
    timers: TimerQueue<Timer>,
    rng: R,
    telemetry: Rc<dyn TelemetrySink>,
}

impl<R: Rng> KeepaliveMonitor<R> {
    pub fn new(rng: R, telemetry: Rc<dyn TelemetrySink>) -> Self {
        Self {
            config: KeepaliveConfig::default(),
            period_ms: None,
            timers: TimerQueue::new(),
            rng,
            telemetry,
        }
    }

    pub fn config(&self) -> KeepaliveConfig {
        self.config
    }

    /// Current ping period, if scheduled.
    pub fn period_ms(&self) -> Option<u64> {
        self.period_ms
    }

    /// Take the persisted settings and rebuild the schedule.
    pub fn apply_settings(&mut self, settings: &Settings, now_ms: u64) {
        self.config.enabled = settings.keepalive_enabled;
        self.config.minutes = clamp_minutes(settings.keepalive_minutes, KEEPALIVE_MINUTES_DEFAULT);
        self.config.auto_reconnect = settings.auto_reconnect;
        self.config.allow_reloads = settings.allow_reloads;
        self.schedule(now_ms);
    }

    pub fn set_enabled(&mut self, enabled: bool, now_ms: u64) {
        self.config.enabled = enabled;
        self.schedule(now_ms);
    }

    pub fn set_minutes(&mut self, minutes: f64, now_ms: u64) {
        self.config.minutes = clamp_minutes(minutes, self.config.minutes);
        self.schedule(now_ms);
    }

    pub fn set_auto_reconnect(&mut self, on: bool) {
        self.config.auto_reconnect = on;
    }

    pub fn set_allow_reloads(&mut self, on: bool) {
        self.config.allow_reloads = on;
    }

    /// Rebuild the ping schedule with a fresh jitter roll.
    pub fn schedule(&mut self, now_ms: u64) {
        self.timers.cancel(Timer::Ping);
        self.timers.cancel(Timer::PingSoon);
        if !self.config.enabled {
            self.period_ms = None;
            return;
        }
        let jitter = 0.25 + self.rng.r#gen::<f64>() * 0.25;
        let period = (f64::from(self.config.minutes) * jitter * 60_000.0).floor() as u64;
        tracing::debug!(minutes = self.config.minutes, period_ms = period, "keepalive scheduled");
        self.period_ms = Some(period);
        self.timers.set(Timer::Ping, now_ms, period);
        self.timers.set(Timer::PingSoon, now_ms, PING_SOON_AFTER_SCHEDULE_MS);
    }

    pub fn on_visibility(&mut self, visible: bool, now_ms: u64) {
        if visible && self.config.enabled {
            self.timers.set(Timer::PingSoon, now_ms, PING_SOON_AFTER_VISIBLE_MS);
        }
    }

    pub fn on_online(&mut self, now_ms: u64) {
        if self.config.auto_reconnect && self.config.allow_reloads {
            self.timers.set(Timer::OnlineRetry, now_ms, ONLINE_RETRY_DELAY_MS);
        }
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.timers.next_deadline()
    }

    pub fn on_timer(&mut self, dom: &mut dyn PageDom, now_ms: u64) -> Vec<KeepaliveTask> {
        let mut tasks = Vec::new();
        while let Some(timer) = self.timers.pop_due(now_ms) {
            match timer {
                Timer::Ping => {
                    if let Some(period) = self.period_ms {
                        self.timers.set(Timer::Ping, now_ms, period);
                    }
                    if self.config.enabled {
                        tasks.push(KeepaliveTask::Ping);
                    }
                }
                Timer::PingSoon => {
                    if self.config.enabled {
                        tasks.push(KeepaliveTask::Ping);
                    }
                }
                Timer::SoftReload => {
                    self.soft_reload(dom, now_ms);
                }
                Timer::OnlineRetry => {
                    if !self.try_click_retry(dom) {
                        self.soft_reload(dom, now_ms);
                    }
                }
            }
        }
        tasks.dedup();
        tasks
    }

    /// Scan newly inserted nodes for a disconnect banner.
    pub fn on_mutations(&mut self, dom: &mut dyn PageDom, records: &[MutationRecord], now_ms: u64) {
        if !self.config.auto_reconnect {
            return;
        }
        let banner = records
            .iter()
            .flat_map(|r| r.added.iter())
            .any(|node| is_disconnect_text(&dom.text_content(*node)));
        if !banner {
            return;
        }

        tracing::info!("disconnect banner detected");
        self.telemetry.record(TelemetryEvent::Disconnect);
        if !self.try_click_retry(dom) && self.config.allow_reloads {
            self.timers.set(Timer::SoftReload, now_ms, SOFT_RELOAD_DELAY_MS);
        }
    }

    /// Retry click first; reload only if reloads are permitted.
    pub fn reconnect_now(&mut self, dom: &mut dyn PageDom, now_ms: u64) -> bool {
        if self.try_click_retry(dom) {
            return true;
        }
        self.config.allow_reloads && self.soft_reload(dom, now_ms) == ReloadOutcome::Reloaded
    }

    /// Click the first visible reconnect-like control.
    pub fn try_click_retry(&mut self, dom: &mut dyn PageDom) -> bool {
        let target = dom.clickables().into_iter().find(|node| {
            let label = dom.text_content(*node).trim().to_lowercase();
            RETRY_LABELS.iter().any(|l| label.contains(l))
        });
        let Some(node) = target else {
            return false;
        };
        dom.click(node);
        self.telemetry.record(TelemetryEvent::RetryClick);
        true
    }

    /// Full reload, unless a guard says no.
    pub fn soft_reload(&mut self, dom: &mut dyn PageDom, now_ms: u64) -> ReloadOutcome {
        let outcome = self.reload_guard(dom, now_ms);
        match outcome {
            ReloadOutcome::Reloaded => {
                self.config.last_reload_at_ms = Some(now_ms);
                tracing::info!("soft reload");
                self.telemetry.record(TelemetryEvent::SoftReload);
                dom.reload();
            }
            ReloadOutcome::Skipped(reason) => {
                tracing::debug!(?reason, "soft reload skipped");
            }
        }
        outcome
    }

    fn reload_guard(&self, dom: &dyn PageDom, now_ms: u64) -> ReloadOutcome {
        let cooling = self
            .config
            .last_reload_at_ms
            .is_some_and(|last| now_ms.saturating_sub(last) < RELOAD_COOLDOWN_MS);
        if cooling {
            return ReloadOutcome::Skipped(SkipReason::Cooldown);
        }
        if !dom.is_visible() {
            return ReloadOutcome::Skipped(SkipReason::Hidden);
        }
        if dom.active_element().is_some_and(|el| el.is_text_entry()) {
            return ReloadOutcome::Skipped(SkipReason::Typing);
        }
        ReloadOutcome::Reloaded
    }
}

/// Shared monitor handle the tuning controller drives. A push that finds
/// the monitor borrowed is dropped.
pub struct KeepaliveHandle<R>(Rc<RefCell<KeepaliveMonitor<R>>>);

impl<R: Rng> KeepaliveHandle<R> {
    pub fn new(monitor: Rc<RefCell<KeepaliveMonitor<R>>>) -> Self {
        Self(monitor)
    }
}

impl<R: Rng> KeepaliveControl for KeepaliveHandle<R> {
    fn set_minutes(&self, minutes: f64, now_ms: u64) {
        if let Ok(mut monitor) = self.0.try_borrow_mut() {
            monitor.set_minutes(minutes, now_ms);
        }
    }

    fn set_auto_reconnect(&self, on: bool) {
        if let Ok(mut monitor) = self.0.try_borrow_mut() {
            monitor.set_auto_reconnect(on);
        }
    }

    fn set_allow_reloads(&self, on: bool) {
        if let Ok(mut monitor) = self.0.try_borrow_mut() {
            monitor.set_allow_reloads(on);
        }
    }
}

/// Case-insensitive disconnect phrase match over the head of `text`.
pub fn is_disconnect_text(text: &str) -> bool {
    let head: String = text.chars().take(BANNER_SCAN_CHARS).collect();
    let head = head.to_lowercase();
    DISCONNECT_PHRASES.iter().any(|p| head.contains(p))
}

// ─── Tests ──────────────────────────────────────────────────────────
