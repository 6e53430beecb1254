//! In-page gate state and the block decision.
//!
//! An open allow window or a near-top scroll intent always wins over the
//! classifier. Every local mutation is mirrored to the privileged
//! counterpart on a best-effort basis so both surfaces converge.

use std::cell::Cell;
use std::rc::Rc;

use url::Url;

use tgate_core::classifier::{classify_relative, is_history_request};
use tgate_core::types::clamp_allow_ms;
use tgate_core::{
    Clock, GateControl, Message, Messenger, Settings, SettingsStore, TelemetryEvent,
    TelemetrySink,
};


/// Gate configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateState {
    pub enabled: bool,
    pub intent_near_top: bool,
    /// Epoch milliseconds; requests are allowed while `now < allow_until_ms`.
    pub allow_until_ms: u64,
}

impl Default for GateState {
    fn default() -> Self {
        Self {
            enabled: true,
            intent_near_top: false,
            allow_until_ms: 0,
        }
    }
}

impl GateState {
    /// Whether blocking is currently overridden or switched off.
    pub fn is_open(&self, now_ms: u64) -> bool {
        !self.enabled || now_ms < self.allow_until_ms || self.intent_near_top
    }
}

/// What an interception surface should do with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Fail the request as if the network had aborted it.
    Block,
    /// History request let through; thin the response.
    Reshape,
    /// Not history; leave it alone.
    Pass,
}

pub struct RequestGate {
    state: Cell<GateState>,
    origin: Option<Url>,
    clock: Rc<dyn Clock>,
    telemetry: Rc<dyn TelemetrySink>,
    messenger: Option<Rc<dyn Messenger>>,
}

impl RequestGate {
    pub fn new(clock: Rc<dyn Clock>, telemetry: Rc<dyn TelemetrySink>) -> Self {
        Self {
            state: Cell::new(GateState::default()),
            origin: None,
            clock,
            telemetry,
            messenger: None,
        }
    }

    /// Resolve relative request URLs against the page origin.
    #[must_use]
    pub fn with_origin(mut self, origin: Url) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Mirror local mutations to the privileged counterpart.
    #[must_use]
    pub fn with_messenger(mut self, messenger: Rc<dyn Messenger>) -> Self {
        self.messenger = Some(messenger);
        self
    }

    /// Startup sync: persisted default first, then the counterpart's view.
    pub fn sync_startup(&self, store: &dyn SettingsStore) {
        match store.load() {
            Ok(settings) => self.apply_settings(&settings),
            Err(e) => tracing::debug!(error = %e, "gate settings unavailable; keeping defaults"),
        }

        let Some(messenger) = &self.messenger else {
            return;
        };
        match messenger.send(Message::RequestStatus) {
            Ok(Some(reply)) => self.state.set(GateState {
                enabled: reply.block_history,
                intent_near_top: reply.intent,
                allow_until_ms: reply.allow_until,
            }),
            Ok(None) => {}
            Err(e) => tracing::debug!(error = %e, "status request failed; keeping local state"),
        }
    }

    /// Re-read the blocking flag after a settings change.
    pub fn apply_settings(&self, settings: &Settings) {
        self.update(|s| s.enabled = settings.block_history);
    }

    pub fn state(&self) -> GateState {
        self.state.get()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.update(|s| s.enabled = enabled);
        self.forward(Message::ToggleBlockHistory { value: enabled });
    }

    pub fn set_intent(&self, near_top: bool) {
        self.update(|s| s.intent_near_top = near_top);
        self.forward(Message::HistoryIntent { value: near_top });
    }

    /// Open an allow window of `ms` milliseconds, clamped to `[2000, 60000]`.
    pub fn allow_for_ms(&self, ms: i64) {
        let window = clamp_allow_ms(ms);
        let until = self.clock.now_ms().saturating_add(window);
        self.update(|s| s.allow_until_ms = until);
        self.forward(Message::AllowHistoryForMs {
            ms: Some(window as f64),
        });
    }


    pub fn is_history(&self, method: &str, url: &str) -> bool {
        match &self.origin {
            Some(origin) => classify_relative(method, url, origin),
            None => is_history_request(method, url),
        }
    }

    pub fn should_block(&self, method: &str, url: &str) -> bool {
        !self.state.get().is_open(self.clock.now_ms()) && self.is_history(method, url)
    }

    pub fn decide(&self, method: &str, url: &str) -> GateDecision {
        if !self.is_history(method, url) {
            return GateDecision::Pass;
        }
        if self.state.get().is_open(self.clock.now_ms()) {
            GateDecision::Reshape
        } else {
            GateDecision::Block
        }
    }

    /// Count one cancelled request.
    pub fn record_cancel(&self, url: &str) {
        tracing::debug!(url, "history request blocked");
        self.telemetry.record(TelemetryEvent::HistoryCancel);
    }

    fn update(&self, f: impl FnOnce(&mut GateState)) {
        let mut state = self.state.get();
        f(&mut state);
        self.state.set(state);
    }

    fn forward(&self, message: Message) {
        let Some(messenger) = &self.messenger else {
            return;
        };
        if let Err(e) = messenger.send(message) {
            tracing::debug!(error = %e, "gate mirror failed");
        }
    }
}

impl GateControl for RequestGate {
    fn set_intent(&self, near_top: bool) {
        RequestGate::set_intent(self, near_top);
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
