//! Setter contracts the tuning controller drives.
//!
//! Each component implements its contract on whatever shared handle the
//! composition root hands to the controller (a crate-local handle over
//! `Rc<RefCell<_>>` for components with timers, the component itself when
//! its state is `Cell`-based).
//! Every call carries `now_ms` so implementations can reschedule work.

/// Partial softcap configuration update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SoftcapPatch {
    pub enabled: Option<bool>,
    pub keep: Option<i64>,
}

impl SoftcapPatch {
    /// Enable the softcap with the given keep-count.
    pub fn keep(keep: usize) -> Self {
        Self {
            enabled: Some(true),
            keep: Some(keep as i64),
        }
    }
}

pub trait SoftcapControl {
    fn set_config(&self, patch: SoftcapPatch, now_ms: u64);
}

pub trait KeepaliveControl {
    fn set_minutes(&self, minutes: f64, now_ms: u64);
    fn set_auto_reconnect(&self, on: bool);
    fn set_allow_reloads(&self, on: bool);
}

pub trait GateControl {
    fn set_intent(&self, near_top: bool);
}
