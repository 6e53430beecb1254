//! Tuning controller.
//!
//! Every pass drains the telemetry window and evaluates four rules against
//! the same snapshot:
//!
//! 1. disconnects >= 2: keepalive to 3 minutes, auto-reconnect and reloads on
//! 2. long tasks >= 4, or turn count > keep + 10: keep -10 (floor `min_keep`)
//! 3. cancels >= 20: near-top threshold -20px (floor `min_top_px`)
//! 4. clean window: keep +10 (cap 60), threshold +10px (cap 180), keepalive
//!    back to 4 minutes, reloads off
//!
//! Rules 1-3 may fire together. Rule 4 only applies when none of them did.

use std::rc::Rc;

use tgate_core::telemetry::LONG_TASK_MIN_MS;
use tgate_core::{
    GateControl, KeepaliveControl, PageDom, SoftcapControl, SoftcapPatch, Telemetry,
    TelemetryEvent, TelemetrySink, TimerQueue, WindowSnapshot,
};

/// Delay before the first tuning pass.
pub const TUNE_FIRST_MS: u64 = 5_000;
pub const TUNE_PERIOD_MS: u64 = 40_000;
pub const INTENT_SAMPLE_MS: u64 = 2_000;

const KEEP_STEP: usize = 10;
const KEEP_CEILING: usize = 60;
const KEEP_HYSTERESIS: usize = 10;
const TOP_PX_ESCALATE_STEP: u32 = 20;
const TOP_PX_RELAX_STEP: u32 = 10;
const TOP_PX_CEILING: u32 = 180;

const PRESSURE_MINUTES: f64 = 3.0;
const RESTING_MINUTES: f64 = 4.0;

const DISCONNECT_PRESSURE: u32 = 2;
const LONGTASK_PRESSURE: u32 = 4;
const CANCEL_PRESSURE: u32 = 20;
const CLEAN_MAX_LONGTASKS: u32 = 1;
const CLEAN_MAX_CANCELS: u32 = 5;

// ─── Types ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TuningConfig {
    /// Scroll offset under which the user counts as near the top.
    pub top_px: u32,
    pub min_top_px: u32,
    pub softcap_keep: usize,
    pub min_keep: usize,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            top_px: 180,
            min_top_px: 80,
            softcap_keep: 60,
            min_keep: 30,
        }
    }
}

/// One change pushed during a pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Adjustment {
    KeepaliveEscalated,
    SoftcapKeep { from: usize, to: usize },
    TopPx { from: u32, to: u32 },
    KeepaliveRelaxed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowVerdict {
    /// At least one escalation rule fired.
    Pressure,
    Clean,
    /// Neither bad enough to escalate nor clean enough to relax.
    Quiet,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TuneReport {
    pub snapshot: WindowSnapshot,
    pub verdict: WindowVerdict,
    pub adjustments: Vec<Adjustment>,
    pub config: TuningConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Timer {
    Tune,
    IntentSample,
}

// ─── AutoPilot ──────────────────────────────────────────────────────

pub struct AutoPilot {
    config: TuningConfig,
    timers: TimerQueue<Timer>,
    telemetry: Rc<Telemetry>,
    softcap: Rc<dyn SoftcapControl>,
    keepalive: Rc<dyn KeepaliveControl>,
    gate: Rc<dyn GateControl>,
}

impl AutoPilot {
    pub fn new(
        telemetry: Rc<Telemetry>,
        softcap: Rc<dyn SoftcapControl>,
        keepalive: Rc<dyn KeepaliveControl>,
        gate: Rc<dyn GateControl>,
    ) -> Self {
        Self {
            config: TuningConfig::default(),
            timers: TimerQueue::new(),
            telemetry,
            softcap,
            keepalive,
            gate,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: TuningConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> TuningConfig {
        self.config
    }

    /// Arm the early pass and the intent sampler.
    pub fn start(&mut self, now_ms: u64) {
        self.timers.set(Timer::Tune, now_ms, TUNE_FIRST_MS);
        self.timers.set(Timer::IntentSample, now_ms, INTENT_SAMPLE_MS);
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.timers.next_deadline()
    }

    /// Run whatever is due. Returns the report of a tuning pass, if one ran.
    pub fn on_timer(&mut self, dom: &dyn PageDom, now_ms: u64) -> Option<TuneReport> {
        let mut report = None;
        while let Some(timer) = self.timers.pop_due(now_ms) {
            match timer {
                Timer::Tune => {
                    self.timers.set(Timer::Tune, now_ms, TUNE_PERIOD_MS);
                    report = Some(self.tune(now_ms));
                }
                Timer::IntentSample => {
                    self.timers.set(Timer::IntentSample, now_ms, INTENT_SAMPLE_MS);
                    self.sample_intent(dom);
                }
            }
        }
        report
    }

    pub fn on_scroll(&self, dom: &dyn PageDom) {
        self.sample_intent(dom);
    }

    /// Long-task observer entry; short tasks are ignored.
    pub fn on_long_task(&self, duration_ms: u64) {
        if duration_ms >= LONG_TASK_MIN_MS {
            self.telemetry.record(TelemetryEvent::LongTask { duration_ms });
        }
    }

    /// Push the near-top signal to the gate.
    pub fn sample_intent(&self, dom: &dyn PageDom) -> bool {
        let near_top = dom.scroll_top() < f64::from(self.config.top_px);
        self.gate.set_intent(near_top);
        near_top
    }

    /// Drain the window and tune.
    pub fn tune(&mut self, now_ms: u64) -> TuneReport {
        let snapshot = self.telemetry.drain();
        self.apply(snapshot, now_ms)
    }

    /// Evaluate the rules against one snapshot.
    pub fn apply(&mut self, s: WindowSnapshot, now_ms: u64) -> TuneReport {
        let mut adjustments = Vec::new();

        // 1. Disconnect pressure
        if s.disconnects >= DISCONNECT_PRESSURE {
            self.keepalive.set_minutes(PRESSURE_MINUTES, now_ms);
            self.keepalive.set_auto_reconnect(true);
            self.keepalive.set_allow_reloads(true);
            adjustments.push(Adjustment::KeepaliveEscalated);
        }

        // 2. Render pressure
        let too_many_turns = s.last_turn_count > 0
            && s.last_turn_count > self.config.softcap_keep + KEEP_HYSTERESIS;
        if s.longtasks >= LONGTASK_PRESSURE || too_many_turns {
            let from = self.config.softcap_keep;
            let to = from.saturating_sub(KEEP_STEP).max(self.config.min_keep);
            self.config.softcap_keep = to;
            self.softcap.set_config(SoftcapPatch::keep(to), now_ms);
            adjustments.push(Adjustment::SoftcapKeep { from, to });
        }

        // 3. Blocking pressure
        if s.cancels >= CANCEL_PRESSURE {
            let from = self.config.top_px;
            let to = from
                .saturating_sub(TOP_PX_ESCALATE_STEP)
                .max(self.config.min_top_px);
            self.config.top_px = to;
            adjustments.push(Adjustment::TopPx { from, to });
        }

        let verdict = if !adjustments.is_empty() {
            WindowVerdict::Pressure
        } else if s.disconnects == 0
            && s.longtasks <= CLEAN_MAX_LONGTASKS
            && s.cancels < CLEAN_MAX_CANCELS
        {
            WindowVerdict::Clean
        } else {
            WindowVerdict::Quiet
        };

        // 4. Relax
        if verdict == WindowVerdict::Clean {
            self.relax(now_ms, &mut adjustments);
        }

        tracing::debug!(
            cancels = s.cancels,
            disconnects = s.disconnects,
            longtasks = s.longtasks,
            turns = s.last_turn_count,
            ?verdict,
            "autopilot pass"
        );
        if verdict == WindowVerdict::Pressure {
            tracing::info!(?adjustments, "autopilot escalated");
        }

        TuneReport {
            snapshot: s,
            verdict,
            adjustments,
            config: self.config,
        }
    }

    fn relax(&mut self, now_ms: u64, adjustments: &mut Vec<Adjustment>) {
        if self.config.softcap_keep < KEEP_CEILING {
            let from = self.config.softcap_keep;
            let to = (from + KEEP_STEP).min(KEEP_CEILING);
            self.config.softcap_keep = to;
            self.softcap.set_config(SoftcapPatch::keep(to), now_ms);
            adjustments.push(Adjustment::SoftcapKeep { from, to });
        }
        if self.config.top_px < TOP_PX_CEILING {
            let from = self.config.top_px;
            let to = (from + TOP_PX_RELAX_STEP).min(TOP_PX_CEILING);
            self.config.top_px = to;
            adjustments.push(Adjustment::TopPx { from, to });
        }
        self.keepalive.set_minutes(RESTING_MINUTES, now_ms);
        self.keepalive.set_allow_reloads(false);
        adjustments.push(Adjustment::KeepaliveRelaxed);
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    use proptest::prelude::*;
    use tgate_core::MemoryDom;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Softcap(SoftcapPatch),
        Minutes(f64),
        AutoReconnect(bool),
        AllowReloads(bool),
        Intent(bool),
    }

    #[derive(Default)]
    struct Recorder {
        calls: RefCell<Vec<Call>>,
    }

    impl Recorder {
        fn take(&self) -> Vec<Call> {
            std::mem::take(&mut *self.calls.borrow_mut())
        }
    }

    impl SoftcapControl for Recorder {
        fn set_config(&self, patch: SoftcapPatch, _now_ms: u64) {
            self.calls.borrow_mut().push(Call::Softcap(patch));
        }
    }

    impl KeepaliveControl for Recorder {
        fn set_minutes(&self, minutes: f64, _now_ms: u64) {
            self.calls.borrow_mut().push(Call::Minutes(minutes));
        }
        fn set_auto_reconnect(&self, on: bool) {
            self.calls.borrow_mut().push(Call::AutoReconnect(on));
        }
        fn set_allow_reloads(&self, on: bool) {
            self.calls.borrow_mut().push(Call::AllowReloads(on));
        }
    }

    impl GateControl for Recorder {
        fn set_intent(&self, near_top: bool) {
            self.calls.borrow_mut().push(Call::Intent(near_top));
        }
    }

    fn pilot() -> (AutoPilot, Rc<Telemetry>, Rc<Recorder>) {
        let telemetry = Rc::new(Telemetry::new());
        let rec = Rc::new(Recorder::default());
        let pilot = AutoPilot::new(telemetry.clone(), rec.clone(), rec.clone(), rec.clone());
        (pilot, telemetry, rec)
    }

    fn window(cancels: u32, disconnects: u32, longtasks: u32, turns: usize) -> WindowSnapshot {
        WindowSnapshot {
            cancels,
            disconnects,
            longtasks,
            last_turn_count: turns,
        }
    }

    // ── 1. escalation rules ─────────────────────────────────────────

    #[test]
    fn disconnects_escalate_keepalive() {
        let (mut p, _, rec) = pilot();
        let report = p.apply(window(0, 2, 0, 0), 0);
        assert_eq!(report.verdict, WindowVerdict::Pressure);
        assert_eq!(
            rec.take(),
            vec![
                Call::Minutes(3.0),
                Call::AutoReconnect(true),
                Call::AllowReloads(true)
            ]
        );
    }

    #[test]
    fn long_tasks_lower_keep_to_floor() {
        let (mut p, _, rec) = pilot();
        let keeps: Vec<usize> = (0..5)
            .map(|i| p.apply(window(0, 0, 4, 0), i).config.softcap_keep)
            .collect();
        assert_eq!(keeps, vec![50, 40, 30, 30, 30]);
        assert_eq!(
            rec.take()[0],
            Call::Softcap(SoftcapPatch {
                enabled: Some(true),
                keep: Some(50)
            })
        );
    }

    #[test]
    fn turn_count_over_hysteresis_lowers_keep() {
        let (mut p, _, _) = pilot();
        assert_eq!(p.apply(window(0, 0, 0, 70), 0).verdict, WindowVerdict::Clean);
        let report = p.apply(window(0, 0, 0, 71), 0);
        assert_eq!(report.adjustments, vec![Adjustment::SoftcapKeep { from: 60, to: 50 }]);
    }

    #[test]
    fn cancels_widen_near_top_zone() {
        let (mut p, _, rec) = pilot();
        let report = p.apply(window(20, 0, 0, 0), 0);
        assert_eq!(report.config.top_px, 160);
        assert!(rec.take().is_empty(), "threshold is controller-local");
        for _ in 0..10 {
            p.apply(window(25, 0, 0, 0), 0);
        }
        assert_eq!(p.config().top_px, 80);
    }

    #[test]
    fn escalations_combine_in_one_pass() {
        let (mut p, _, _) = pilot();
        let report = p.apply(window(30, 3, 5, 0), 0);
        assert_eq!(
            report.adjustments,
            vec![
                Adjustment::KeepaliveEscalated,
                Adjustment::SoftcapKeep { from: 60, to: 50 },
                Adjustment::TopPx { from: 180, to: 160 },
            ]
        );
    }

    // ── 2. relaxation ───────────────────────────────────────────────

    #[test]
    fn clean_passes_relax_toward_defaults() {
        let (p, _, rec) = pilot();
        let mut p = p.with_config(TuningConfig {
            top_px: 100,
            softcap_keep: 40,
            ..TuningConfig::default()
        });
        p.apply(WindowSnapshot::default(), 0);
        let report = p.apply(WindowSnapshot::default(), 0);
        assert_eq!(report.config.softcap_keep, 60);
        assert_eq!(report.config.top_px, 120);
        let calls = rec.take();
        assert!(calls.contains(&Call::Minutes(4.0)));
        assert!(calls.contains(&Call::AllowReloads(false)));
    }

    #[test]
    fn relaxed_defaults_are_not_pushed_again() {
        let (mut p, _, rec) = pilot();
        let report = p.apply(window(0, 0, 1, 0), 0);
        assert_eq!(report.adjustments, vec![Adjustment::KeepaliveRelaxed]);
        assert_eq!(rec.take(), vec![Call::Minutes(4.0), Call::AllowReloads(false)]);
    }

    #[test]
    fn moderate_cancels_are_a_quiet_band() {
        let (mut p, _, rec) = pilot();
        for cancels in [5, 12, 19] {
            let report = p.apply(window(cancels, 0, 0, 0), 0);
            assert_eq!(report.verdict, WindowVerdict::Quiet);
            assert!(report.adjustments.is_empty());
        }
        assert!(rec.take().is_empty());
    }

    #[test]
    fn one_disconnect_blocks_relaxation() {
        let (mut p, _, _) = pilot();
        assert_eq!(p.apply(window(0, 1, 0, 0), 0).verdict, WindowVerdict::Quiet);
    }

    // ── 3. scheduling and sampling ──────────────────────────────────

    #[test]
    fn early_pass_then_fixed_period() {
        let (mut p, telemetry, _) = pilot();
        let dom = MemoryDom::new();
        p.start(0);
        telemetry.record(TelemetryEvent::Disconnect);
        telemetry.record(TelemetryEvent::Disconnect);

        assert!(p.on_timer(&dom, 4_999).is_none());
        let first = p.on_timer(&dom, 5_000).expect("early pass");
        assert_eq!(first.snapshot.disconnects, 2);

        assert!(p.on_timer(&dom, 44_999).is_none());
        let second = p.on_timer(&dom, 45_000).expect("periodic pass");
        assert_eq!(second.snapshot.disconnects, 0, "window was drained");
    }

    #[test]
    fn intent_follows_scroll_threshold() {
        let (mut p, _, rec) = pilot();
        let mut dom = MemoryDom::new();
        dom.set_scroll_top(179.0);
        p.on_scroll(&dom);
        dom.set_scroll_top(180.0);
        p.on_scroll(&dom);
        assert_eq!(rec.take(), vec![Call::Intent(true), Call::Intent(false)]);

        p.start(0);
        p.on_timer(&dom, 2_000);
        assert_eq!(rec.take(), vec![Call::Intent(false)]);
    }

    #[test]
    fn short_tasks_are_not_counted() {
        let (p, telemetry, _) = pilot();
        p.on_long_task(199);
        p.on_long_task(200);
        p.on_long_task(750);
        assert_eq!(telemetry.drain().longtasks, 2);
    }

    // ── 4. bounds ───────────────────────────────────────────────────

    fn arb_window() -> impl Strategy<Value = WindowSnapshot> {
        (0u32..40, 0u32..4, 0u32..8, 0usize..200).prop_map(|(c, d, l, t)| window(c, d, l, t))
    }

    proptest! {
        #[test]
        fn config_stays_within_bounds(windows in prop::collection::vec(arb_window(), 1..60)) {
            let (mut p, _, _) = pilot();
            for (i, w) in windows.into_iter().enumerate() {
                let cfg = p.apply(w, i as u64 * TUNE_PERIOD_MS).config;
                prop_assert!((30..=60).contains(&cfg.softcap_keep));
                prop_assert!((80..=180).contains(&cfg.top_px));
            }
        }
    }
}
