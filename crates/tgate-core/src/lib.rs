//! tgate-core: shared types and host seams for the chat traffic gate.
//! Pagination classifier, telemetry counters, keyed timers, and the
//! page/network/settings traits every other crate is written against.
//! No async runtime and no real IO live here.

pub mod channel;
pub mod classifier;
pub mod clock;
pub mod control;
pub mod dom;
pub mod telemetry;
pub mod timer;
pub mod transport;
pub mod types;

pub use channel::{ChannelError, MemorySettings, Message, Messenger, SettingsStore, StatusReply};
pub use classifier::{is_history_request, is_history_url};
pub use clock::{Clock, ManualClock, SystemClock};
pub use control::{GateControl, KeepaliveControl, SoftcapControl, SoftcapPatch};
pub use dom::{ActiveElement, MemoryDom, MutationRecord, NodeId, PageDom};
pub use telemetry::{Telemetry, TelemetrySink, WindowSnapshot};
pub use timer::TimerQueue;
pub use transport::{Request, Response, Transport, TransportError, XhrLike};
pub use types::{Settings, TelemetryEvent};
