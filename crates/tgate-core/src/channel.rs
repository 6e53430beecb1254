//! Cross-realm messaging and persisted settings seams.
//!
//! Both are best-effort: callers log and discard [`ChannelError`]s and keep
//! their local defaults.

use std::cell::RefCell;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ALLOW_DEFAULT_MS, ALLOW_MIN_MS, Settings, clamp_allow_ms};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("counterpart unavailable")]
    Unavailable,
    #[error("channel closed")]
    Closed,
    #[error("settings storage error: {0}")]
    Storage(String),
}

/// Message from the page side to the privileged counterpart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Message {
    /// Ask for this tab's gate status.
    RequestStatus,
    /// The user is (or is not) scrolling near the top of the conversation.
    HistoryIntent { value: bool },
    /// Set and persist the blocking flag.
    ToggleBlockHistory { value: bool },
    /// Open a temporary allow window for this tab.
    AllowHistoryForMs {
        #[serde(default)]
        ms: Option<f64>,
    },
}

impl Message {
    /// Requested allow window, clamped. Missing or unusable values use the default.
    pub fn allow_ms(ms: Option<f64>) -> u64 {
        match ms.filter(|v| v.is_finite() && *v != 0.0) {
            None => ALLOW_DEFAULT_MS,
            // A nonzero fraction is a real request, just below the floor.
            Some(v) if v.trunc() == 0.0 => ALLOW_MIN_MS,
            Some(v) => clamp_allow_ms(v as i64),
        }
    }
}

/// Reply to [`Message::RequestStatus`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReply {
    pub block_history: bool,
    pub intent: bool,
    /// Epoch milliseconds; zero when no window is open.
    pub allow_until: u64,
}

/// Page-to-privileged message channel for one tab.
pub trait Messenger {
    /// Deliver `message`. Only `RequestStatus` yields a reply.
    fn send(&self, message: Message) -> Result<Option<StatusReply>, ChannelError>;
}

/// Persisted settings storage.
pub trait SettingsStore {
    fn load(&self) -> Result<Settings, ChannelError>;
    fn save(&self, settings: &Settings) -> Result<(), ChannelError>;
}

/// In-memory settings store.
#[derive(Debug, Default)]
pub struct MemorySettings {
    settings: RefCell<Settings>,
}

impl MemorySettings {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: RefCell::new(settings),
        }
    }
}

impl SettingsStore for MemorySettings {
    fn load(&self) -> Result<Settings, ChannelError> {
        Ok(self.settings.borrow().clone())
    }

    fn save(&self, settings: &Settings) -> Result<(), ChannelError> {
        *self.settings.borrow_mut() = settings.clone();
        Ok(())
    }
}
