//! Request writer for one persistent connection

use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use pulse_core::{PulseError, RequestId, RequestQueue};

use super::connector::BoxedStream;
use super::reader::{report_failure, FailureSender};
use crate::generation::GenerationStamp;
use crate::stats::TransportStats;

/// Write half shared by the request writer and the heartbeat sender
pub(crate) type SharedWriter = Arc<Mutex<WriteHalf<BoxedStream>>>;

/// Write `bytes` and flush while holding the shared write half
pub(crate) async fn write_locked<W: AsyncWrite + Unpin>(
    writer: &Mutex<W>,
    bytes: &[u8],
) -> std::io::Result<()> {
    let mut guard = writer.lock().await;
    guard.write_all(bytes).await?;
    guard.flush().await
}

/// Serialize unsent requests into one buffer of frames
pub(crate) fn encode_batch(requests: &[pulse_core::Request]) -> (Vec<RequestId>, Vec<u8>) {
    let mut ids = Vec::with_capacity(requests.len());
    let mut bytes = Vec::new();
    for request in requests {
        ids.push(request.id);
        let frame = request.to_frame();
        match frame.clone().compressed() {
            Ok(compressed) => compressed.encode_into(&mut bytes),
            Err(e) => {
                warn!(request_id = %request.id, error = %e, "compression failed, sending raw");
                frame.encode_into(&mut bytes);
            }
        }
    }
    (ids, bytes)
}

/// Loop draining the request queue onto the connection
pub(crate) struct RequestWriter {
    pub stamp: GenerationStamp,
    pub writer: SharedWriter,
    pub queue: Arc<RequestQueue>,
    pub failures: FailureSender,
    pub stats: Arc<TransportStats>,
}

impl RequestWriter {
    pub async fn run(self) {
        debug!(generation = self.stamp.generation(), "request writer started");
        loop {
            if !self.stamp.is_live() {
                break;
            }

            let batch = self.queue.take_unsent();
            if batch.is_empty() {
                tokio::select! {
                    biased;
                    _ = self.stamp.retired() => break,
                    _ = self.queue.wait_submitted() => continue,
                }
            }

            let (ids, bytes) = encode_batch(&batch);
            trace!(requests = ids.len(), bytes = bytes.len(), "writing request batch");
            let result = write_locked(&self.writer, &bytes).await;

            // Fire-and-forget entries are done once written, whatever the outcome
            let removed = self.queue.remove_fire_and_forget(&ids);
            if removed > 0 {
                trace!(removed, "fire-and-forget requests retired");
            }

            match result {
                Ok(()) => self.stats.record_sent(ids.len(), bytes.len()),
                Err(e) => {
                    report_failure(&self.failures, &self.stamp, "writer", PulseError::from(e));
                    return;
                }
            }
        }
        debug!(generation = self.stamp.generation(), "request writer retired");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::{EngineId, Frame, MessageType, OutgoingRequest, Timestamp};

    #[test]
    fn test_encode_batch_concatenates_frames() {
        let queue = RequestQueue::new();
        let now = Timestamp::from_millis(0);
        queue.submit(
            OutgoingRequest::new(EngineId::LOGIN, MessageType::ExternalRequest, vec![1]),
            now,
        );
        queue.submit(
            OutgoingRequest::new(EngineId::CONTENT, MessageType::ExternalRequest, vec![9; 1024]),
            now,
        );

        let batch = queue.take_unsent();
        let (ids, bytes) = encode_batch(&batch);
        assert_eq!(ids.len(), 2);

        let frames = Frame::decode_all(&bytes).unwrap();
        assert_eq!(frames.len(), 2);
        assert!(!frames[0].header.compressed);
        assert!(frames[1].header.compressed);
        assert_eq!(frames[1].inflated_payload(1024).unwrap(), vec![9; 1024]);
    }

    #[tokio::test]
    async fn test_write_locked_flushes_bytes() {
        use tokio::io::AsyncReadExt;
        let (client, mut server) = tokio::io::duplex(64);
        let writer = Mutex::new(client);
        write_locked(&writer, b"frame").await.unwrap();

        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"frame");
    }
}
