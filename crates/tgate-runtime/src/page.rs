//! Composition root for one chat tab.
//!
//! Owns the document and every component, and routes page events to them.
//! Shared handles are `Rc`/`RefCell`: the autopilot drives the trimmer, the
//! keepalive and the gate through their control traits, and the gate mirrors
//! its state to the network filter over a tab channel.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use http::Method;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use serde_json::Value;
use url::Url;

use tgate_autopilot::{AutoPilot, TuneReport, TuningConfig};
use tgate_core::{
    Clock, GateControl, KeepaliveControl, MemoryDom, NodeId, PageDom, Request, Response,
    Settings, SettingsStore, SoftcapControl, Telemetry, Transport, XhrLike,
};
use tgate_gate::{FilteredTransport, GatedFetch, GatedXhr, NetworkFilter, RequestGate, TabChannel, TabId};
use tgate_keepalive::{KeepaliveHandle, KeepaliveMonitor, KeepaliveTask, Pinger};
use tgate_softcap::{EarlyShield, ReleaseCause, ShieldState, SoftcapHandle, SoftcapTrimmer};

#[derive(Debug, Clone)]
pub struct PageConfig {
    pub origin: Url,
    pub tab: TabId,
    pub tuning: TuningConfig,
    /// Seed for keepalive jitter.
    pub seed: u64,
}

impl PageConfig {
    pub fn new(origin: Url) -> Self {
        Self {
            origin,
            tab: 1,
            tuning: TuningConfig::default(),
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetchOutcome {
    /// Failed like a network abort.
    Aborted,
    Failed { error: String },
    /// Handed to the network without a visible response (open/send surface).
    Sent,
    Status {
        status: u16,
        /// Size of the history collection in the body, if there is one.
        entries: Option<usize>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchRecord {
    pub at_ms: u64,
    pub method: String,
    pub url: String,
    pub outcome: FetchOutcome,
}

/// Observable end state of a page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageOutcome {
    pub now_ms: u64,
    pub totals: BTreeMap<String, u64>,
    pub turns: usize,
    pub reloads: u32,
    pub clicks: usize,
    pub softcap_keep: usize,
    pub top_px: u32,
    pub keepalive_minutes: u32,
    pub allow_reloads: bool,
    pub gate_enabled: bool,
    pub shield: String,
    pub endpoint: Option<String>,
    pub tune_passes: usize,
    pub fetches: Vec<FetchRecord>,
}

type Keepalive = KeepaliveMonitor<StdRng>;

pub struct Page<T> {
    origin: Url,
    tab: TabId,
    clock: Rc<dyn Clock>,
    store: Rc<dyn SettingsStore>,
    dom: MemoryDom,
    thread: Option<NodeId>,
    telemetry: Rc<Telemetry>,
    filter: Rc<RefCell<NetworkFilter>>,
    gate: Rc<RequestGate>,
    network: FilteredTransport<T>,
    trimmer: Rc<RefCell<SoftcapTrimmer>>,
    shield: EarlyShield,
    keepalive: Rc<RefCell<Keepalive>>,
    pinger: Pinger,
    autopilot: AutoPilot,
    reports: Vec<TuneReport>,
    fetches: Vec<FetchRecord>,
}

impl<T: Transport> Page<T> {
    pub fn new(
        config: PageConfig,
        transport: T,
        clock: Rc<dyn Clock>,
        store: Rc<dyn SettingsStore>,
    ) -> Self {
        let now = clock.now_ms();
        let telemetry = Rc::new(Telemetry::new());

        let filter = Rc::new(RefCell::new(NetworkFilter::new(store.clone())));
        let channel = TabChannel::new(filter.clone(), config.tab, clock.clone());
        let gate = Rc::new(
            RequestGate::new(clock.clone(), telemetry.clone())
                .with_origin(config.origin.clone())
                .with_messenger(Rc::new(channel)),
        );
        let network = FilteredTransport::new(transport, filter.clone(), config.tab, clock.clone());

        let trimmer = Rc::new(RefCell::new(SoftcapTrimmer::new(telemetry.clone())));
        let keepalive = Rc::new(RefCell::new(KeepaliveMonitor::new(
            StdRng::seed_from_u64(config.seed),
            telemetry.clone(),
        )));
        let pinger = Pinger::new(config.origin.clone(), telemetry.clone());

        let softcap_control: Rc<dyn SoftcapControl> = Rc::new(SoftcapHandle::new(trimmer.clone()));
        let keepalive_control: Rc<dyn KeepaliveControl> =
            Rc::new(KeepaliveHandle::new(keepalive.clone()));
        let gate_control: Rc<dyn GateControl> = gate.clone();
        let autopilot = AutoPilot::new(telemetry.clone(), softcap_control, keepalive_control, gate_control)
            .with_config(config.tuning);

        Self {
            origin: config.origin,
            tab: config.tab,
            clock,
            store,
            dom: MemoryDom::new(),
            thread: None,
            telemetry,
            filter,
            gate,
            network,
            trimmer,
            shield: EarlyShield::engage(now),
            keepalive,
            pinger,
            autopilot,
            reports: Vec::new(),
            fetches: Vec::new(),
        }
    }

    /// Startup: settings, status sync, first trim pass and tuning timers.
    pub fn start(&mut self) {
        let now = self.clock.now_ms();
        self.gate.sync_startup(&*self.store);
        let settings = self.load_settings();
        self.keepalive.borrow_mut().apply_settings(&settings, now);
        self.trimmer.borrow_mut().start(&self.dom, now);
        self.autopilot.start(now);
        tracing::info!(origin = %self.origin, block_history = settings.block_history, "page started");
    }

    /// The tab went away: the filter drops its intent and allow window.
    pub fn close(&mut self) {
        self.filter.borrow_mut().forget_tab(self.tab);
        tracing::debug!(tab = self.tab, "page closed");
    }

    /// Persisted settings changed underneath us.
    pub fn settings_changed(&mut self) {
        let now = self.clock.now_ms();
        let settings = self.load_settings();
        self.filter.borrow_mut().apply_settings(&settings);
        self.gate.apply_settings(&settings);
        self.keepalive.borrow_mut().apply_settings(&settings, now);
    }

    fn load_settings(&self) -> Settings {
        self.store.load().unwrap_or_else(|e| {
            tracing::debug!(error = %e, "settings unavailable; using defaults");
            Settings::default()
        })
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn dom(&self) -> &MemoryDom {
        &self.dom
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn gate(&self) -> &RequestGate {
        &self.gate
    }

    pub fn reports(&self) -> &[TuneReport] {
        &self.reports
    }

    pub fn shield(&self) -> ShieldState {
        self.shield.state()
    }

    // ─── Page events ───────────────────────────────────────────────

    /// Append `count` turns to the conversation, creating it on first use.
    pub fn add_turns(&mut self, count: usize) {
        let thread = self.thread();
        for _ in 0..count {
            self.dom.append_turn(thread, "turn");
        }
    }

    /// Non-turn content inside the conversation container.
    pub fn add_note(&mut self, text: &str) {
        let thread = self.thread();
        self.dom.append_element(thread, "div", text);
    }

    /// Re-render: the turns move into a fresh container and the old one goes.
    pub fn replace_container(&mut self) {
        let Some(old) = self.thread else {
            return;
        };
        let main = self.dom.parent(old).unwrap_or_else(|| self.dom.body());
        let fresh = self.dom.create_element("div");
        self.dom.append_child(main, fresh);
        for child in self.dom.children(old) {
            self.dom.append_child(fresh, child);
        }
        self.dom.remove(old);
        self.thread = Some(fresh);
    }

    /// A banner inserted by the host app, optionally with a button.
    pub fn show_banner(&mut self, text: &str, button: Option<&str>) {
        let body = self.dom.body();
        let banner = self.dom.append_element(body, "div", text);
        if let Some(label) = button {
            self.dom.append_element(banner, "button", label);
        }
    }

    pub fn scroll_to(&mut self, top: f64) {
        self.dom.set_scroll_top(top);
        self.autopilot.on_scroll(&self.dom);
    }

    pub fn set_visible(&mut self, visible: bool) {
        let now = self.clock.now_ms();
        self.dom.set_visible(visible);
        self.keepalive.borrow_mut().on_visibility(visible, now);
    }

    pub fn go_online(&mut self) {
        let now = self.clock.now_ms();
        self.keepalive.borrow_mut().on_online(now);
    }

    /// Focus a new form control of the given kind.
    pub fn focus(&mut self, tag: &str, input_type: Option<&str>) {
        let body = self.dom.body();
        let node = self.dom.append_element(body, tag, "");
        if let Some(kind) = input_type {
            self.dom.set_attr(node, "type", kind);
        }
        self.dom.focus(Some(node));
    }

    pub fn blur(&mut self) {
        self.dom.focus(None);
    }

    pub fn long_task(&self, duration_ms: u64) {
        self.autopilot.on_long_task(duration_ms);
    }

    pub fn allow_history(&self, ms: i64) {
        self.gate.allow_for_ms(ms);
    }

    pub fn toggle_block_history(&self, value: bool) {
        self.gate.set_enabled(value);
    }

    pub fn reconnect_now(&mut self) -> bool {
        let now = self.clock.now_ms();
        self.keepalive.borrow_mut().reconnect_now(&mut self.dom, now)
    }

    /// Page script fetch through the gate and the tab's network stack.
    pub async fn fetch(&mut self, method: Method, url: &str) -> FetchRecord {
        let url = self.resolve(url);
        let at_ms = self.clock.now_ms();
        let fetch = GatedFetch::new(&self.network, self.gate.clone());
        let outcome = match fetch.send(Request::new(method.clone(), url.as_str())).await {
            Ok(res) => FetchOutcome::Status {
                status: res.status.as_u16(),
                entries: history_entries(&res),
            },
            Err(tgate_core::TransportError::Aborted) => FetchOutcome::Aborted,
            Err(e) => FetchOutcome::Failed {
                error: e.to_string(),
            },
        };
        self.record(at_ms, method.as_str(), url, outcome)
    }

    /// Page script request through the open/send primitive.
    pub fn xhr(&mut self, method: &str, url: &str) -> FetchRecord {
        let url = self.resolve(url);
        let at_ms = self.clock.now_ms();
        let mut xhr = GatedXhr::new(PageXhr::default(), self.gate.clone());
        xhr.open(method, &url);
        xhr.send(None);
        let outcome = if xhr.inner().errored {
            FetchOutcome::Aborted
        } else {
            FetchOutcome::Sent
        };
        self.record(at_ms, &method.to_ascii_uppercase(), url, outcome)
    }

    // ─── Event loop hooks ──────────────────────────────────────────

    /// Deliver queued DOM changes to the observers.
    pub fn pump(&mut self) {
        let records = self.dom.take_mutations();
        if records.is_empty() {
            return;
        }
        let now = self.clock.now_ms();
        self.trimmer
            .borrow_mut()
            .on_mutations(&self.dom, &records, now);
        self.keepalive
            .borrow_mut()
            .on_mutations(&mut self.dom, &records, now);
    }

    pub fn next_deadline(&self) -> Option<u64> {
        [
            self.filter.borrow().next_deadline(),
            self.trimmer.borrow().next_deadline(),
            self.shield.next_deadline(),
            self.keepalive.borrow().next_deadline(),
            self.autopilot.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Run every component whose deadline has passed.
    pub async fn on_timer(&mut self) {
        let now = self.clock.now_ms();
        self.filter.borrow_mut().on_timer(now);

        self.trimmer.borrow_mut().on_timer(&mut self.dom, now);
        if self.trimmer.borrow_mut().take_unshield() {
            self.shield.on_unshield();
        }
        self.shield.on_timer(now);

        let tasks = self.keepalive.borrow_mut().on_timer(&mut self.dom, now);
        if let Some(report) = self.autopilot.on_timer(&self.dom, now) {
            self.reports.push(report);
        }
        self.pump();

        for task in tasks {
            match task {
                KeepaliveTask::Ping => {
                    let visible = self.dom.is_visible();
                    self.pinger.ping(&self.network, visible).await;
                }
            }
        }
    }

    pub fn outcome(&self) -> PageOutcome {
        let shield = match self.shield.state() {
            ShieldState::Shielding { .. } => "shielding",
            ShieldState::Released(ReleaseCause::Signal) => "signal",
            ShieldState::Released(ReleaseCause::Timeout) => "timeout",
        };
        let keepalive = self.keepalive.borrow().config();
        PageOutcome {
            now_ms: self.clock.now_ms(),
            totals: self
                .telemetry
                .totals()
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v))
                .collect(),
            turns: self
                .thread
                .map(|t| self.dom.turn_markers_under(t).len())
                .unwrap_or(0),
            reloads: self.dom.reloads(),
            clicks: self.dom.clicks().len(),
            softcap_keep: self.trimmer.borrow().config().keep,
            top_px: self.autopilot.config().top_px,
            keepalive_minutes: keepalive.minutes,
            allow_reloads: keepalive.allow_reloads,
            gate_enabled: self.gate.state().enabled,
            shield: shield.to_owned(),
            endpoint: self.pinger.chosen().map(str::to_owned),
            tune_passes: self.reports.len(),
            fetches: self.fetches.clone(),
        }
    }

    fn thread(&mut self) -> NodeId {
        if let Some(thread) = self.thread {
            return thread;
        }
        let body = self.dom.body();
        let main = self.dom.append_element(body, "main", "");
        let thread = self.dom.append_element(main, "div", "");
        self.thread = Some(thread);
        thread
    }

    fn resolve(&self, url: &str) -> String {
        match self.origin.join(url) {
            Ok(resolved) => resolved.to_string(),
            Err(_) => url.to_owned(),
        }
    }

    fn record(&mut self, at_ms: u64, method: &str, url: String, outcome: FetchOutcome) -> FetchRecord {
        tracing::debug!(method, url = %url, ?outcome, "page request");
        let record = FetchRecord {
            at_ms,
            method: method.to_owned(),
            url,
            outcome,
        };
        self.fetches.push(record.clone());
        record
    }
}

/// Open/send primitive of the simulated page. Only records its fate.
#[derive(Debug, Default)]
struct PageXhr {
    errored: bool,
}

impl XhrLike for PageXhr {
    fn open(&mut self, _method: &str, _url: &str) {}
    fn send(&mut self, _body: Option<&[u8]>) {}
    fn abort(&mut self) {}
    fn dispatch_error(&mut self) {
        self.errored = true;
    }
}

/// Length of the history collection a JSON body carries.
fn history_entries(res: &Response) -> Option<usize> {
    let body: Value = serde_json::from_slice(&res.body).ok()?;
    if let Some(messages) = body.get("messages").and_then(Value::as_array) {
        return Some(messages.len());
    }
    if let Some(mapping) = body.get("mapping").and_then(Value::as_object) {
        return Some(mapping.len());
    }
    body.get("items").and_then(Value::as_array).map(Vec::len)
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tgate_core::{ManualClock, MemorySettings};

    use crate::scenario::ScenarioTransport;

    fn page() -> Page<ScenarioTransport> {
        let origin = Url::parse("https://chatgpt.com/").expect("origin");
        let clock: Rc<dyn Clock> = Rc::new(ManualClock::new(1_000));
        let store: Rc<dyn SettingsStore> = Rc::new(MemorySettings::default());
        let mut page = Page::new(
            PageConfig::new(origin),
            ScenarioTransport::new(BTreeMap::new()),
            clock,
            store,
        );
        page.start();
        page
    }

    #[test]
    fn allow_window_reaches_filter() {
        let page = page();
        page.allow_history(5_000);
        assert_eq!(page.filter.borrow().status(page.tab).allow_until, 6_000);
    }

    #[test]
    fn closing_drops_tab_state_in_filter() {
        let mut page = page();
        page.allow_history(5_000);
        page.scroll_to(0.0);
        page.close();
        let status = page.filter.borrow().status(page.tab);
        assert_eq!(status.allow_until, 0);
        assert!(!status.intent);
        assert_eq!(page.filter.borrow().next_deadline(), None);
    }
}
