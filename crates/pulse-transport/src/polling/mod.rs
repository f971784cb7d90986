//! HTTP polling transport
//!
//! Requests leave in batched POSTs; push messages and late responses arrive
//! on a long-poll loop that stops after too many empty replies.

pub mod batch;
pub mod http;
pub mod poller;
pub mod transport;

pub use batch::BatchSender;
pub use http::{HttpExchange, HttpReply, ReqwestExchange};
pub use poller::{poll_frame, LongPoller, PollExit};
pub use transport::PollingTransport;
