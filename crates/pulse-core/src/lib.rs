//! Pulse Core
//!
//! Foundational pieces of the pulse client runtime: identifiers and time,
//! the frame wire format and payload items, configuration, errors, the
//! engine contract and the two registries that correlate outgoing requests
//! with incoming responses.
//!
//! Transports live in `pulse-transport`; the scheduler and worker loop live
//! in `pulse-runtime`.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod engine;
pub mod errors;
pub mod kick;
pub mod payload;
pub mod platform;
pub mod request;
pub mod response;
pub mod session;
pub mod types;
pub mod wire;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::{
    PersistentConfig, PollingConfig, PulseConfig, SchedulerConfig, TransportMode,
    DEFAULT_MAX_PAYLOAD_SIZE,
};
pub use engine::{Engine, EngineContext, EngineCore, ResetCompletion, UiRequest};
pub use errors::{
    ProtocolError, PulseError, PulseResult, Result, SchedulerError, TransportError,
};
pub use kick::{Kick, NoopKick};
pub use payload::{
    PayloadCodec, PayloadItem, PushEvent, PushEventType, ServerError, ServerErrorKind,
};
pub use platform::{NoopPlatform, Platform, PowerAssertion, PowerGuard, WakeAlarm};
pub use request::{OutgoingRequest, Request, RequestQueue};
pub use response::{DecodedResponse, ResponseRouter, RouterStatsSnapshot};
pub use session::{AuthSession, SessionHandle};
pub use types::{
    ConnectionState, EngineId, ManualTimeSource, NetworkStatus, NextRun, RequestId,
    SystemTimeSource, TimeSource, Timestamp,
};
pub use wire::{Frame, FrameHeader, MessageType};
