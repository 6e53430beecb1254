//! Scenario replay.
//!
//! A scenario is a JSON file of timed page events, a canned network and
//! optional expectations on the end state. [`run_scenario`] replays it
//! through a [`Page`] on the tokio clock: the loop sleeps to whichever comes
//! first, the next step or the earliest component deadline.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use http::header::CONTENT_TYPE;
use http::{HeaderValue, Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use tgate_autopilot::TuningConfig;
use tgate_core::{Clock, MemorySettings, Request, Response, Settings, SettingsStore, Transport, TransportError};

use crate::clock::TokioClock;
use crate::page::{FetchOutcome, Page, PageConfig, PageOutcome};

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("failed to read scenario {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse scenario {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid origin: {0}")]
    Origin(#[from] url::ParseError),
    #[error("step {index} at {at_ms}ms runs before the step preceding it")]
    OutOfOrder { index: usize, at_ms: u64 },
    #[error("unknown method {0:?}")]
    Method(String),
}

// ─── Model ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_origin")]
    pub origin: String,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub tuning: TuningStart,
    #[serde(default)]
    pub seed: u64,
    pub run_until_ms: u64,
    /// Canned responses keyed by URL path.
    #[serde(default)]
    pub network: BTreeMap<String, CannedResponse>,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub expect: Expectations,
}

fn default_origin() -> String {
    "https://chatgpt.com".to_owned()
}

/// Non-default starting point for the tuning controller.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct TuningStart {
    pub top_px: Option<u32>,
    pub softcap_keep: Option<usize>,
}

impl TuningStart {
    fn config(self) -> TuningConfig {
        let base = TuningConfig::default();
        TuningConfig {
            top_px: self.top_px.unwrap_or(base.top_px),
            softcap_keep: self.softcap_keep.unwrap_or(base.softcap_keep),
            ..base
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    pub at_ms: u64,
    #[serde(flatten)]
    pub action: Action,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    AddTurns { count: usize },
    AddNote { text: String },
    ReplaceContainer,
    Banner {
        text: String,
        #[serde(default)]
        button: Option<String>,
    },
    Scroll { top: f64 },
    Visibility { visible: bool },
    Online,
    Focus {
        tag: String,
        #[serde(default)]
        input_type: Option<String>,
    },
    Blur,
    LongTask { duration_ms: u64 },
    Fetch {
        #[serde(default = "default_method")]
        method: String,
        url: String,
    },
    Xhr {
        #[serde(default = "default_method")]
        method: String,
        url: String,
    },
    AllowHistory { ms: i64 },
    ToggleBlockHistory { value: bool },
    UpdateSettings { settings: Settings },
    ReconnectNow,
}

fn default_method() -> String {
    "GET".to_owned()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CannedResponse {
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub delay_ms: u64,
    /// Fail at the transport level.
    #[serde(default)]
    pub fail: bool,
    /// Never answer.
    #[serde(default)]
    pub hang: bool,
}

fn default_status() -> u16 {
    200
}

/// End-state checks; absent fields are not checked.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Expectations {
    #[serde(default)]
    pub totals: BTreeMap<String, u64>,
    pub turns: Option<usize>,
    pub reloads: Option<u32>,
    pub clicks: Option<usize>,
    pub softcap_keep: Option<usize>,
    pub top_px: Option<u32>,
    pub keepalive_minutes: Option<u32>,
    pub allow_reloads: Option<bool>,
    pub gate_enabled: Option<bool>,
    pub shield: Option<String>,
    pub endpoint: Option<String>,
    pub blocked_requests: Option<usize>,
    /// History entries in the last successful fetch body.
    pub last_entries: Option<usize>,
    pub persisted_block_history: Option<bool>,
}

impl Expectations {
    /// Human-readable mismatches, empty when everything holds.
    pub fn check(&self, outcome: &PageOutcome, persisted: &Settings) -> Vec<String> {
        let mut failures = Vec::new();
        let mut expect = |what: &str, want: String, got: String| {
            if want != got {
                failures.push(format!("{what}: expected {want}, got {got}"));
            }
        };

        for (name, want) in &self.totals {
            let got = outcome.totals.get(name).copied().unwrap_or(0);
            expect(&format!("total {name}"), want.to_string(), got.to_string());
        }
        let blocked = outcome
            .fetches
            .iter()
            .filter(|f| f.outcome == FetchOutcome::Aborted)
            .count();
        let last_entries = outcome.fetches.iter().rev().find_map(|f| match f.outcome {
            FetchOutcome::Status { entries, .. } => Some(entries),
            _ => None,
        });

        check_opt(&mut expect, "turns", self.turns, outcome.turns);
        check_opt(&mut expect, "reloads", self.reloads, outcome.reloads);
        check_opt(&mut expect, "clicks", self.clicks, outcome.clicks);
        check_opt(&mut expect, "softcap_keep", self.softcap_keep, outcome.softcap_keep);
        check_opt(&mut expect, "top_px", self.top_px, outcome.top_px);
        check_opt(&mut expect, "keepalive_minutes", self.keepalive_minutes, outcome.keepalive_minutes);
        check_opt(&mut expect, "allow_reloads", self.allow_reloads, outcome.allow_reloads);
        check_opt(&mut expect, "gate_enabled", self.gate_enabled, outcome.gate_enabled);
        check_opt(&mut expect, "shield", self.shield.clone(), outcome.shield.clone());
        check_opt(&mut expect, "endpoint", self.endpoint.clone(), outcome.endpoint.clone().unwrap_or_default());
        check_opt(&mut expect, "blocked_requests", self.blocked_requests, blocked);
        check_opt(&mut expect, "last_entries", self.last_entries, last_entries.flatten().unwrap_or(0));
        check_opt(
            &mut expect,
            "persisted_block_history",
            self.persisted_block_history,
            persisted.block_history,
        );
        failures
    }
}

fn check_opt<V: ToString>(
    expect: &mut impl FnMut(&str, String, String),
    what: &str,
    want: Option<V>,
    got: V,
) {
    if let Some(want) = want {
        expect(what, want.to_string(), got.to_string());
    }
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let content = fs::read_to_string(path).map_err(|source| ScenarioError::Read {
            path: path.to_owned(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ScenarioError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    fn validate(&self) -> Result<Url, ScenarioError> {
        let origin = Url::parse(&self.origin)?;
        let mut last = 0;
        for (index, step) in self.steps.iter().enumerate() {
            if step.at_ms < last {
                return Err(ScenarioError::OutOfOrder {
                    index,
                    at_ms: step.at_ms,
                });
            }
            last = step.at_ms;
            if let Action::Fetch { method, .. } = &step.action {
                Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                    .map_err(|_| ScenarioError::Method(method.clone()))?;
            }
        }
        Ok(origin)
    }
}

// ─── Canned network ─────────────────────────────────────────────────

/// Answers from the scenario's table; unknown paths get a 404.
pub struct ScenarioTransport {
    routes: BTreeMap<String, CannedResponse>,
    log: RefCell<Vec<String>>,
    beacons: RefCell<Vec<String>>,
}

impl ScenarioTransport {
    pub fn new(routes: BTreeMap<String, CannedResponse>) -> Self {
        Self {
            routes,
            log: RefCell::new(Vec::new()),
            beacons: RefCell::new(Vec::new()),
        }
    }

    /// `METHOD url` of every request that reached the network.
    pub fn log(&self) -> Vec<String> {
        self.log.borrow().clone()
    }

    pub fn beacons(&self) -> Vec<String> {
        self.beacons.borrow().clone()
    }
}

impl Transport for ScenarioTransport {
    async fn send(&self, request: Request) -> Result<Response, TransportError> {
        self.log
            .borrow_mut()
            .push(format!("{} {}", request.method, request.url));
        let path = Url::parse(&request.url)
            .map(|u| u.path().to_owned())
            .unwrap_or_else(|_| request.url.clone());
        let Some(canned) = self.routes.get(&path) else {
            return Ok(Response::new(StatusCode::NOT_FOUND, Vec::new()));
        };

        if canned.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(canned.delay_ms)).await;
        }
        if canned.hang {
            std::future::pending::<()>().await;
        }
        if canned.fail {
            return Err(TransportError::Network("connection reset".into()));
        }

        let status = StatusCode::from_u16(canned.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = match &canned.body {
            Some(body) => {
                let mut res = Response::new(status, body.to_string());
                res.headers
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                res
            }
            None => Response::new(status, Vec::new()),
        };
        response.opaque_redirect = status.is_redirection();
        Ok(response)
    }

    fn send_beacon(&self, url: &str) -> bool {
        self.beacons.borrow_mut().push(url.to_owned());
        true
    }
}

// ─── Runner ─────────────────────────────────────────────────────────

/// Replay `scenario` against a fresh page. The store defaults to an
/// in-memory one seeded with the scenario's settings.
pub async fn run_scenario(
    scenario: &Scenario,
    store: Option<Rc<dyn SettingsStore>>,
) -> Result<(PageOutcome, Settings), ScenarioError> {
    let origin = scenario.validate()?;
    let store: Rc<dyn SettingsStore> =
        store.unwrap_or_else(|| Rc::new(MemorySettings::new(scenario.settings.clone())));
    let clock = Rc::new(TokioClock::new(0));
    let config = PageConfig {
        tuning: scenario.tuning.config(),
        seed: scenario.seed,
        ..PageConfig::new(origin)
    };
    let transport = ScenarioTransport::new(scenario.network.clone());
    let mut page = Page::new(config, transport, clock.clone(), store.clone());

    tracing::info!(scenario = %scenario.name, steps = scenario.steps.len(), "replay starting");
    page.start();

    let mut steps = scenario.steps.iter().peekable();
    loop {
        page.pump();
        let next_step = steps.peek().map(|s| s.at_ms);
        let Some(at) = [next_step, page.next_deadline()].into_iter().flatten().min() else {
            break;
        };
        if at > scenario.run_until_ms {
            break;
        }
        clock.sleep_until(at).await;

        while let Some(step) = steps.next_if(|s| s.at_ms <= clock.now_ms()) {
            apply(&mut page, &*store, &step.action).await;
            page.pump();
        }
        page.on_timer().await;
    }
    clock.sleep_until(scenario.run_until_ms).await;
    let outcome = page.outcome();
    page.close();

    let persisted = store.load().unwrap_or_default();
    Ok((outcome, persisted))
}

async fn apply<T: Transport>(page: &mut Page<T>, store: &dyn SettingsStore, action: &Action) {
    tracing::debug!(at_ms = page.now_ms(), ?action, "step");
    match action {
        Action::AddTurns { count } => page.add_turns(*count),
        Action::AddNote { text } => page.add_note(text),
        Action::ReplaceContainer => page.replace_container(),
        Action::Banner { text, button } => page.show_banner(text, button.as_deref()),
        Action::Scroll { top } => page.scroll_to(*top),
        Action::Visibility { visible } => page.set_visible(*visible),
        Action::Online => page.go_online(),
        Action::Focus { tag, input_type } => page.focus(tag, input_type.as_deref()),
        Action::Blur => page.blur(),
        Action::LongTask { duration_ms } => page.long_task(*duration_ms),
        Action::Fetch { method, url } => {
            // Validated before the run.
            if let Ok(method) = Method::from_bytes(method.to_ascii_uppercase().as_bytes()) {
                page.fetch(method, url).await;
            }
        }
        Action::Xhr { method, url } => {
            page.xhr(method, url);
        }
        Action::AllowHistory { ms } => page.allow_history(*ms),
        Action::ToggleBlockHistory { value } => page.toggle_block_history(*value),
        Action::UpdateSettings { settings } => {
            if let Err(e) = store.save(settings) {
                tracing::warn!(error = %e, "settings update failed");
            }
            page.settings_changed();
        }
        Action::ReconnectNow => {
            page.reconnect_now();
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
