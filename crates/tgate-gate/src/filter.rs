//! Privileged pre-network filter.
//!
//! Holds per-tab intent and allow windows fed by page messages, and cancels
//! XHR/fetch-class history requests synchronously before they are sent.
//! Expired allow windows are swept 250ms after they lapse.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tgate_core::classifier::is_history_request;
use tgate_core::{
    ChannelError, Clock, Message, Messenger, Request, Response, Settings, SettingsStore,
    StatusReply, TimerQueue, Transport, TransportError,
};

pub type TabId = u32;

/// Grace period before an expired allow window is dropped.
const ALLOW_SWEEP_GRACE_MS: u64 = 250;

/// Resource class of an outgoing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    XmlHttpRequest,
    Fetch,
    Document,
    Script,
    Other,
}

impl ResourceType {
    fn is_api_call(self) -> bool {
        matches!(self, Self::XmlHttpRequest | Self::Fetch)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDetails {
    pub tab_id: TabId,
    pub method: String,
    pub url: String,
    pub resource_type: ResourceType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Cancel,
}

pub struct NetworkFilter {
    store: Rc<dyn SettingsStore>,
    block_history: bool,
    debug: bool,
    intent: HashMap<TabId, bool>,
    allow_until: HashMap<TabId, u64>,
    sweeps: TimerQueue<TabId>,
}

impl NetworkFilter {
    /// Load the persisted flags; storage errors leave blocking on.
    pub fn new(store: Rc<dyn SettingsStore>) -> Self {
        let settings = store.load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "filter settings unavailable; using defaults");
            Settings::default()
        });
        Self {
            store,
            block_history: settings.block_history,
            debug: settings.debug,
            intent: HashMap::new(),
            allow_until: HashMap::new(),
            sweeps: TimerQueue::new(),
        }
    }

    pub fn apply_settings(&mut self, settings: &Settings) {
        self.block_history = settings.block_history;
        self.debug = settings.debug;
    }

    pub fn block_history(&self) -> bool {
        self.block_history
    }

    pub fn status(&self, tab: TabId) -> StatusReply {
        StatusReply {
            block_history: self.block_history,
            intent: self.intent.get(&tab).copied().unwrap_or(false),
            allow_until: self.allow_until.get(&tab).copied().unwrap_or(0),
        }
    }

    /// Handle one page message. Only `RequestStatus` produces a reply.
    pub fn handle_message(&mut self, tab: TabId, message: Message, now_ms: u64) -> Option<StatusReply> {
        match message {
            Message::RequestStatus => return Some(self.status(tab)),
            Message::HistoryIntent { value } => {
                self.intent.insert(tab, value);
            }
            Message::ToggleBlockHistory { value } => {
                self.block_history = value;
                self.persist_block_history(value);
            }
            Message::AllowHistoryForMs { ms } => {
                let window = Message::allow_ms(ms);
                self.allow_until.insert(tab, now_ms.saturating_add(window));
                self.sweeps.set(tab, now_ms, window + ALLOW_SWEEP_GRACE_MS);
            }
        }
        None
    }

    /// Decide before any bytes are sent.
    pub fn on_before_request(&self, details: &RequestDetails, now_ms: u64) -> Verdict {
        if !self.block_history || !details.resource_type.is_api_call() {
            return Verdict::Allow;
        }
        let allowed_by_timer = self
            .allow_until
            .get(&details.tab_id)
            .is_some_and(|until| *until > now_ms);
        let allowed_by_intent = self.intent.get(&details.tab_id).copied().unwrap_or(false);
        if allowed_by_timer || allowed_by_intent {
            return Verdict::Allow;
        }
        if !is_history_request(&details.method, &details.url) {
            return Verdict::Allow;
        }
        if self.debug {
            tracing::debug!(tab = details.tab_id, url = %details.url, "cancel history request");
        }
        Verdict::Cancel
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.sweeps.next_deadline()
    }

    /// Drop allow windows whose sweep is due and which have lapsed.
    pub fn on_timer(&mut self, now_ms: u64) {
        while let Some(tab) = self.sweeps.pop_due(now_ms) {
            if self.allow_until.get(&tab).is_some_and(|until| *until <= now_ms) {
                self.allow_until.remove(&tab);
            }
        }
    }

    /// Forget a closed tab.
    pub fn forget_tab(&mut self, tab: TabId) {
        self.intent.remove(&tab);
        self.allow_until.remove(&tab);
        self.sweeps.cancel(tab);
    }

    fn persist_block_history(&self, value: bool) {
        let result = self.store.load().and_then(|mut settings| {
            settings.block_history = value;
            self.store.save(&settings)
        });
        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to persist blockHistory");
        }
    }
}

/// Page-side messenger bound to one tab of a shared filter.
pub struct TabChannel {
    filter: Rc<RefCell<NetworkFilter>>,
    tab: TabId,
    clock: Rc<dyn Clock>,
}

impl TabChannel {
    pub fn new(filter: Rc<RefCell<NetworkFilter>>, tab: TabId, clock: Rc<dyn Clock>) -> Self {
        Self { filter, tab, clock }
    }
}

impl Messenger for TabChannel {
    fn send(&self, message: Message) -> Result<Option<StatusReply>, ChannelError> {
        let mut filter = self
            .filter
            .try_borrow_mut()
            .map_err(|_| ChannelError::Unavailable)?;
        Ok(filter.handle_message(self.tab, message, self.clock.now_ms()))
    }
}

/// Network stack of one tab: every outgoing fetch passes the filter first.
pub struct FilteredTransport<T> {
    inner: T,
    filter: Rc<RefCell<NetworkFilter>>,
    tab: TabId,
    clock: Rc<dyn Clock>,
}

impl<T: Transport> FilteredTransport<T> {
    pub fn new(inner: T, filter: Rc<RefCell<NetworkFilter>>, tab: TabId, clock: Rc<dyn Clock>) -> Self {
        Self {
            inner,
            filter,
            tab,
            clock,
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    fn verdict(&self, request: &Request) -> Verdict {
        let details = RequestDetails {
            tab_id: self.tab,
            method: request.method.as_str().to_owned(),
            url: request.url.clone(),
            resource_type: ResourceType::Fetch,
        };
        match self.filter.try_borrow() {
            Ok(filter) => filter.on_before_request(&details, self.clock.now_ms()),
            Err(_) => Verdict::Allow,
        }
    }
}

impl<T: Transport> Transport for FilteredTransport<T> {
    async fn send(&self, request: Request) -> Result<Response, TransportError> {
        if self.verdict(&request) == Verdict::Cancel {
            return Err(TransportError::Aborted);
        }
        self.inner.send(request).await
    }

    fn send_beacon(&self, url: &str) -> bool {
        self.inner.send_beacon(url)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
