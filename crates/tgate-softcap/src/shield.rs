//! Early-paint shield: turn content stays hidden from startup until the
//! trimmer's first pass signals, or a safety timeout lapses. Releases once.

/// Safety timeout after which the shield lifts on its own.
pub const SHIELD_SAFETY_MS: u64 = 2_500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseCause {
    /// The trimmer finished its first pass.
    Signal,
    /// Nobody signalled in time.
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShieldState {
    Shielding { until_ms: u64 },
    Released(ReleaseCause),
}

#[derive(Debug, Clone)]
pub struct EarlyShield {
    state: ShieldState,
}

impl EarlyShield {
    /// Raise the shield at `now_ms`.
    pub fn engage(now_ms: u64) -> Self {
        Self {
            state: ShieldState::Shielding {
                until_ms: now_ms.saturating_add(SHIELD_SAFETY_MS),
            },
        }
    }

    pub fn state(&self) -> ShieldState {
        self.state
    }

    pub fn is_shielding(&self) -> bool {
        matches!(self.state, ShieldState::Shielding { .. })
    }

    pub fn next_deadline(&self) -> Option<u64> {
        match self.state {
            ShieldState::Shielding { until_ms } => Some(until_ms),
            ShieldState::Released(_) => None,
        }
    }

    /// Unshield signal. Returns `true` if this call lifted the shield.
    pub fn on_unshield(&mut self) -> bool {
        self.release(ReleaseCause::Signal)
    }

    /// Safety timeout check. Returns `true` if this call lifted the shield.
    pub fn on_timer(&mut self, now_ms: u64) -> bool {
        match self.state {
            ShieldState::Shielding { until_ms } if now_ms >= until_ms => {
                self.release(ReleaseCause::Timeout)
            }
            _ => false,
        }
    }

    fn release(&mut self, cause: ReleaseCause) -> bool {
        if !self.is_shielding() {
            return false;
        }
        tracing::debug!(?cause, "shield released");
        self.state = ShieldState::Released(cause);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_releases_before_timeout() {
        let mut shield = EarlyShield::engage(1_000);
        assert!(shield.is_shielding());
        assert!(shield.on_unshield());
        assert_eq!(shield.state(), ShieldState::Released(ReleaseCause::Signal));
        assert!(!shield.on_timer(10_000));
        assert_eq!(shield.next_deadline(), None);
    }

    #[test]
    fn timeout_releases_without_signal() {
        let mut shield = EarlyShield::engage(0);
        assert!(!shield.on_timer(2_499));
        assert!(shield.on_timer(2_500));
        assert_eq!(shield.state(), ShieldState::Released(ReleaseCause::Timeout));
        assert!(!shield.on_unshield(), "late signal is a no-op");
    }
}
