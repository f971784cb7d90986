//! Error types for the pulse runtime
//!
//! Transport errors are recovered by the reconnect supervisor and only reach
//! engines once retries are exhausted. Protocol errors are surfaced to the
//! owning engine immediately. `PulseError` unifies them all.

use crate::types::{EngineId, RequestId};

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Connection-level failures
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Network I/O error: {0}")]
    NetworkIo(#[from] std::io::Error),
    #[error("Connection to {address} failed: {reason}")]
    ConnectionFailed { address: String, reason: String },
    #[error("Connection closed by remote end")]
    ConnectionClosed,
    #[error("Transport timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
    #[error("Not connected")]
    NotConnected,
    #[error("HTTP exchange failed: {reason}")]
    Http { reason: String },
    #[error("HTTP status {status}")]
    HttpStatus { status: u16 },
    #[error("Retries exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
    #[error("Transport shutdown: {reason}")]
    Shutdown { reason: String },
}

impl TransportError {
    /// Whether retrying the same exchange may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::NetworkIo(_)
                | TransportError::ConnectionFailed { .. }
                | TransportError::ConnectionClosed
                | TransportError::Timeout { .. }
                | TransportError::Http { .. }
        )
    }
}

/// Wire and payload format violations
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Bad frame delimiter {found:02x?}")]
    BadDelimiter { found: [u8; 2] },
    #[error("Unknown message type: {message_type}")]
    UnknownMessageType { message_type: u8 },
    #[error("Negative payload length: {length}")]
    NegativeLength { length: i32 },
    #[error("Payload too large (max {max}, got {actual})")]
    PayloadTooLarge { max: usize, actual: usize },
    #[error("Truncated data (expected {expected} bytes, got {actual})")]
    Truncated { expected: usize, actual: usize },
    #[error("Unknown payload item type: {item_type}")]
    UnknownItemType { item_type: u8 },
    #[error("Unknown push event type: {event_type}")]
    UnknownPushType { event_type: u8 },
    #[error("Decompression failed: {reason}")]
    Decompression { reason: String },
    #[error("Invalid UTF-8 in payload item")]
    InvalidUtf8,
    #[error("Unexpected response: {reason}")]
    UnexpectedResponse { reason: String },
}

/// Engine registry and engine-facing failures
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Engine {engine} is deactivated")]
    EngineDeactivated { engine: EngineId },
    #[error("Engine {engine} already has request {request_id} outstanding")]
    RequestOutstanding {
        engine: EngineId,
        request_id: RequestId,
    },
    #[error("Engine {engine} is already registered")]
    DuplicateEngine { engine: EngineId },
    #[error("Engine {engine} is not registered")]
    EngineNotFound { engine: EngineId },
    #[error("Engine {engine} dropped its reset completion")]
    ResetAbandoned { engine: EngineId },
}

// ----------------------------------------------------------------------------
// Unified Error Type
// ----------------------------------------------------------------------------

/// Core error type for the pulse runtime
#[derive(Debug, thiserror::Error)]
pub enum PulseError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Internal channel closed or unavailable
    #[error("Channel error: {message}")]
    Channel { message: String },

    /// Configuration error
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },
}

impl From<std::io::Error> for PulseError {
    fn from(err: std::io::Error) -> Self {
        PulseError::Transport(TransportError::NetworkIo(err))
    }
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl PulseError {
    /// Create a channel error with a message
    pub fn channel_error<T: Into<String>>(message: T) -> Self {
        PulseError::Channel {
            message: message.into(),
        }
    }

    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        PulseError::Configuration {
            reason: reason.into(),
        }
    }

    /// Create an unexpected-response protocol error
    pub fn unexpected_response<T: Into<String>>(reason: T) -> Self {
        PulseError::Protocol(ProtocolError::UnexpectedResponse {
            reason: reason.into(),
        })
    }

    /// Create a connection failed error
    pub fn connection_failed<A: Into<String>, R: Into<String>>(address: A, reason: R) -> Self {
        PulseError::Transport(TransportError::ConnectionFailed {
            address: address.into(),
            reason: reason.into(),
        })
    }

    /// Whether this error is a transport-level failure the supervisor recovers from
    pub fn is_transport(&self) -> bool {
        matches!(self, PulseError::Transport(_))
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, PulseError>;
pub type PulseResult<T> = Result<T>;
