//! HTTP exchange used by the polling transport

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;

use pulse_core::{PulseError, PulseResult, TransportError};

/// Status and body of one HTTP reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpReply {
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }

    /// 2xx codes up to and including partial content
    pub fn is_success(&self) -> bool {
        (200..=206).contains(&self.status)
    }
}

/// One POST round trip to the back end
#[async_trait]
pub trait HttpExchange: Send + Sync {
    async fn post(&self, url: &str, body: Vec<u8>) -> Result<HttpReply, TransportError>;
}

/// `reqwest` backed exchange
#[derive(Debug, Clone)]
pub struct ReqwestExchange {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestExchange {
    pub fn new(timeout: Duration) -> PulseResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PulseError::config_error(format!("HTTP client: {}", e)))?;
        Ok(Self { client, timeout })
    }

    fn map_error(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout {
                duration_ms: self.timeout.as_millis() as u64,
            }
        } else {
            TransportError::Http {
                reason: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl HttpExchange for ReqwestExchange {
    async fn post(&self, url: &str, body: Vec<u8>) -> Result<HttpReply, TransportError> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| self.map_error(e))?;
        Ok(HttpReply::new(status, body.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_range_includes_partial_content() {
        assert!(HttpReply::new(200, vec![]).is_success());
        assert!(HttpReply::new(206, vec![]).is_success());
        assert!(!HttpReply::new(207, vec![]).is_success());
        assert!(!HttpReply::new(404, vec![]).is_success());
        assert!(!HttpReply::new(503, vec![]).is_success());
    }
}
