//! Pulse Transport
//!
//! The two interchangeable strategies that move queued requests to the back
//! end and decoded responses back to the router:
//!
//! - [`PersistentTransport`]: one long-lived stream kept alive with
//!   heartbeats, recovered by a reconnect supervisor
//! - [`PollingTransport`]: batched HTTP POSTs plus a long-poll loop
//!
//! Both implement [`Transport`] and share the [`ResponseDecoder`].

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod decoder;
pub mod generation;
pub mod persistent;
pub mod polling;
pub mod stats;
pub mod transport;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use decoder::{DecodeOutcome, ResponseDecoder};
pub use generation::{generation_pair, GenerationReader, GenerationStamp, GenerationWriter};
pub use persistent::{Connector, PersistentTransport, ReconnectSupervisor, TcpConnector};
pub use polling::{HttpExchange, HttpReply, PollingTransport, ReqwestExchange};
pub use stats::{TransportStats, TransportStatsSnapshot};
pub use transport::{Transport, TransportContext, TransportKind};
