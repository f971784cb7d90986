//! Persistent stream transport
//!
//! A single long-lived connection served by three helper tasks: a response
//! reader, a request writer and a heartbeat sender. The reconnect task
//! drives a [`ReconnectSupervisor`] and owns the generation counter that
//! retires helpers from torn down connections.

pub mod connector;
pub mod heartbeat;
mod reader;
pub mod supervisor;
pub mod transport;
mod writer;

pub use connector::{BoxedStream, ByteStream, Connector, TcpConnector};
pub use heartbeat::heartbeat_frame;
pub use reader::read_frame;
pub use supervisor::{FailureAction, ReconnectSupervisor, ResumeAction, SupervisorState};
pub use transport::PersistentTransport;

pub(crate) use writer::encode_batch;
