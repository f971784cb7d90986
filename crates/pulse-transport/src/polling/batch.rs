//! Batched request POSTs

use std::sync::Arc;

use tracing::{debug, warn};

use pulse_core::{PulseError, PulseResult, RequestQueue, ServerErrorKind, TransportError};

use super::http::HttpExchange;
use crate::decoder::ResponseDecoder;
use crate::persistent::encode_batch;
use crate::stats::TransportStats;

/// Sends every unsent request in one POST and decodes the reply
pub struct BatchSender {
    exchange: Arc<dyn HttpExchange>,
    url: String,
    max_attempts: u32,
    queue: Arc<RequestQueue>,
    decoder: ResponseDecoder,
    stats: Arc<TransportStats>,
}

impl BatchSender {
    pub fn new(
        exchange: Arc<dyn HttpExchange>,
        url: String,
        max_attempts: u32,
        queue: Arc<RequestQueue>,
        decoder: ResponseDecoder,
        stats: Arc<TransportStats>,
    ) -> Self {
        Self {
            exchange,
            url,
            max_attempts: max_attempts.max(1),
            queue,
            decoder,
            stats,
        }
    }

    /// POST all unsent requests, returning how many were sent
    ///
    /// Retryable errors are retried up to the attempt budget. Once it is
    /// exhausted, or when the server answers with a non-success status,
    /// every request of the batch receives a synthetic error response.
    pub async fn send_pending(&self) -> PulseResult<usize> {
        let batch = self.queue.take_unsent();
        if batch.is_empty() {
            return Ok(0);
        }
        let (ids, body) = encode_batch(&batch);
        debug!(requests = ids.len(), bytes = body.len(), "posting request batch");

        let mut attempt = 0;
        let reply = loop {
            attempt += 1;
            match self.exchange.post(&self.url, body.clone()).await {
                Ok(reply) => break reply,
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    warn!(attempt, error = %e, "batch POST failed, retrying");
                    TransportStats::bump(&self.stats.batch_retries);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "batch POST abandoned");
                    self.decoder.fail_batch(&ids, ServerErrorKind::CommsFailure, &e.to_string());
                    let error = if e.is_retryable() {
                        TransportError::RetriesExhausted { attempts: attempt }
                    } else {
                        e
                    };
                    return Err(PulseError::from(error));
                }
            }
        };

        TransportStats::bump(&self.stats.batches_sent);
        self.stats.record_sent(ids.len(), body.len());
        self.queue.remove_fire_and_forget(&ids);

        if !reply.is_success() {
            warn!(status = reply.status, requests = ids.len(), "batch rejected");
            self.decoder.fail_batch(
                &ids,
                ServerErrorKind::HttpStatus(reply.status),
                &format!("HTTP status {}", reply.status),
            );
            return Err(TransportError::HttpStatus {
                status: reply.status,
            }
            .into());
        }

        if let Err(e) = self.decoder.handle_body(&reply.body) {
            // Requests whose answers were lost in the malformed body
            self.decoder
                .fail_batch(&ids, ServerErrorKind::Malformed, &e.to_string());
            return Err(e.into());
        }
        Ok(ids.len())
    }
}
