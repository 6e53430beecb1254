//! tgate-gate: history request gating.
//!
//! Two interception surfaces share one decision rule: the in-page surface
//! wraps the page's request primitives ([`GatedFetch`], [`GatedXhr`]) and
//! the privileged pre-network surface ([`NetworkFilter`]) cancels requests
//! before any bytes are sent. Unblocked history responses are thinned by
//! [`reshape`].

pub mod filter;
pub mod gate;
pub mod intercept;
pub mod reshape;

pub use filter::{
    FilteredTransport, NetworkFilter, RequestDetails, ResourceType, TabChannel, TabId, Verdict,
};
pub use gate::{GateDecision, GateState, RequestGate};
pub use intercept::{GatedFetch, GatedXhr};
pub use reshape::{DEFAULT_RESHAPE_KEEP, RESHAPE_MARGIN, reshape_response};
