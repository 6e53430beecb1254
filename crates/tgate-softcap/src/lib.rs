//! tgate-softcap: keeps the live conversation turn list under a soft cap.
//!
//! [`SoftcapTrimmer`] binds to the turn container, trims old turns in
//! debounced batches and raises a one-shot unshield signal after its first
//! pass. [`EarlyShield`] is the collaborator hiding turns until then.

pub mod shield;
pub mod trimmer;

pub use shield::{EarlyShield, ReleaseCause, ShieldState};
pub use trimmer::{
    Binding, SoftcapConfig, SoftcapHandle, SoftcapTrimmer, TrimReport, find_container, is_pure,
};
