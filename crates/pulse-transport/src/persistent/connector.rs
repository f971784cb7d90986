//! Stream establishment for the persistent transport

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use pulse_core::{PersistentConfig, TransportError};

/// Bidirectional byte stream carrying frames
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ByteStream for T {}

pub type BoxedStream = Box<dyn ByteStream>;

/// Opens a fresh stream to the back end for each connection attempt
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<BoxedStream, TransportError>;

    /// Human readable endpoint for logs
    fn endpoint(&self) -> String;
}

/// Plain TCP connector with a bounded connect time
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
    timeout: Duration,
}

impl TcpConnector {
    pub fn new<A: Into<String>>(address: A, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }

    pub fn from_config(config: &PersistentConfig) -> Self {
        Self::new(config.address.clone(), config.connect_timeout())
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<BoxedStream, TransportError> {
        debug!(address = %self.address, "opening connection");
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| TransportError::Timeout {
                duration_ms: self.timeout.as_millis() as u64,
            })?
            .map_err(|e| TransportError::ConnectionFailed {
                address: self.address.clone(),
                reason: e.to_string(),
            })?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }

    fn endpoint(&self) -> String {
        self.address.clone()
    }
}
