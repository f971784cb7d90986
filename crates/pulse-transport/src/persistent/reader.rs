//! Response reader for one persistent connection

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use pulse_core::wire::HEADER_SIZE;
use pulse_core::{Frame, FrameHeader, PulseError, PulseResult, TransportError};

use crate::decoder::ResponseDecoder;
use crate::generation::GenerationStamp;
use crate::stats::TransportStats;

/// Failure reported by a helper task to the reconnect task
#[derive(Debug)]
pub(crate) struct LinkFailure {
    pub generation: u64,
    pub origin: &'static str,
    pub error: PulseError,
}

pub(crate) type FailureSender = mpsc::UnboundedSender<LinkFailure>;

/// Report a failure upward unless the task has already been retired
pub(crate) fn report_failure(
    failures: &FailureSender,
    stamp: &GenerationStamp,
    origin: &'static str,
    error: PulseError,
) {
    if !stamp.is_live() {
        debug!(origin, generation = stamp.generation(), "stale task failure ignored");
        return;
    }
    // Reconnect task gone means the transport is stopping
    let _ = failures.send(LinkFailure {
        generation: stamp.generation(),
        origin,
        error,
    });
}

/// Read one complete frame, rejecting payloads above `max_payload`
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_payload: usize,
) -> PulseResult<Frame> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    reader
        .read_exact(&mut header_bytes)
        .await
        .map_err(map_read_error)?;
    let header = FrameHeader::from_bytes(&header_bytes)?;
    header.check_payload_size(max_payload)?;

    let mut payload = vec![0u8; header.payload_length as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(map_read_error)?;
    Ok(Frame { header, payload })
}

fn map_read_error(err: std::io::Error) -> PulseError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        TransportError::ConnectionClosed.into()
    } else {
        TransportError::NetworkIo(err).into()
    }
}

/// Loop decoding inbound frames until the stream fails or the task goes stale
pub(crate) struct ResponseReader<R> {
    pub stamp: GenerationStamp,
    pub reader: R,
    pub decoder: ResponseDecoder,
    pub max_payload: usize,
    pub failures: FailureSender,
    pub stats: Arc<TransportStats>,
}

impl<R: AsyncRead + Unpin> ResponseReader<R> {
    pub async fn run(mut self) {
        debug!(generation = self.stamp.generation(), "response reader started");
        loop {
            if !self.stamp.is_live() {
                break;
            }

            let result = tokio::select! {
                biased;
                _ = self.stamp.retired() => break,
                result = read_frame(&mut self.reader, self.max_payload) => result,
            };

            // A reconnect may have happened while blocked in the read
            if !self.stamp.is_live() {
                break;
            }

            match result {
                Ok(frame) => {
                    trace!(
                        message_type = ?frame.header.message_type,
                        request_id = %frame.header.correlation_id,
                        "frame received"
                    );
                    self.stats
                        .record_received(1, HEADER_SIZE + frame.payload.len());
                    self.decoder.handle_frame(frame);
                }
                Err(error) => {
                    report_failure(&self.failures, &self.stamp, "reader", error);
                    return;
                }
            }
        }
        debug!(generation = self.stamp.generation(), "response reader retired");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::{MessageType, ProtocolError, RequestId};
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_read_frame_from_stream() {
        let (mut client, mut server) = tokio::io::duplex(256);
        let frame = Frame::new(MessageType::ExternalResponse, RequestId::new(7), vec![1, 2, 3]);
        server.write_all(&frame.encode()).await.unwrap();
        assert_eq!(read_frame(&mut client, 1024).await.unwrap(), frame);
    }

    #[tokio::test]
    async fn test_end_of_stream_is_connection_closed() {
        let (mut client, server) = tokio::io::duplex(64);
        drop(server);
        assert!(matches!(
            read_frame(&mut client, 1024).await,
            Err(PulseError::Transport(TransportError::ConnectionClosed))
        ));
    }

    #[tokio::test]
    async fn test_bad_delimiter_is_protocol_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        server.write_all(&[0u8; HEADER_SIZE]).await.unwrap();
        assert!(matches!(
            read_frame(&mut client, 1024).await,
            Err(PulseError::Protocol(ProtocolError::BadDelimiter { .. }))
        ));
    }

    struct ReaderFixture {
        queue: Arc<pulse_core::RequestQueue>,
        router: Arc<pulse_core::ResponseRouter>,
        id: RequestId,
        failures: mpsc::UnboundedReceiver<LinkFailure>,
    }

    fn create_test_reader<R>(
        stamp: GenerationStamp,
        reader: R,
    ) -> (ResponseReader<R>, ReaderFixture) {
        let queue = Arc::new(pulse_core::RequestQueue::new());
        let router = Arc::new(pulse_core::ResponseRouter::new(Arc::new(pulse_core::NoopKick)));
        let stats = Arc::new(TransportStats::new());
        let id = queue.submit(
            pulse_core::OutgoingRequest::new(
                pulse_core::EngineId::LOGIN,
                MessageType::ExternalRequest,
                vec![],
            ),
            pulse_core::Timestamp::from_millis(0),
        );
        let (failures_tx, failures) = mpsc::unbounded_channel();
        let response_reader = ResponseReader {
            stamp,
            reader,
            decoder: ResponseDecoder::new(Arc::clone(&queue), Arc::clone(&router), Arc::clone(&stats)),
            max_payload: 1024,
            failures: failures_tx,
            stats,
        };
        (
            response_reader,
            ReaderFixture {
                queue,
                router,
                id,
                failures,
            },
        )
    }

    #[tokio::test]
    async fn test_live_reader_routes_frames() {
        let (_writer, reader) = crate::generation::generation_pair();
        let (client, mut server) = tokio::io::duplex(256);
        let (response_reader, fixture) = create_test_reader(reader.stamp(), client);
        let task = tokio::spawn(response_reader.run());

        let frame = Frame::new(MessageType::ExternalResponse, fixture.id, vec![]);
        server.write_all(&frame.encode()).await.unwrap();
        drop(server);

        tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .expect("reader should stop at end of stream")
            .unwrap();
        assert!(fixture.queue.is_empty());
        assert!(fixture
            .router
            .has_response_for(pulse_core::EngineId::LOGIN));
    }

    #[tokio::test]
    async fn test_stale_reader_leaves_registries_untouched() {
        let (mut writer, reader) = crate::generation::generation_pair();
        let (client, mut server) = tokio::io::duplex(256);
        let (response_reader, mut fixture) = create_test_reader(reader.stamp(), client);
        let task = tokio::spawn(response_reader.run());

        // Reconnect happens while the reader is blocked
        tokio::task::yield_now().await;
        writer.advance();
        tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .expect("stale reader should retire")
            .unwrap();

        let frame = Frame::new(MessageType::ExternalResponse, fixture.id, vec![]);
        let _ = server.write_all(&frame.encode()).await;
        assert!(fixture.queue.contains(fixture.id));
        assert!(!fixture
            .router
            .has_response_for(pulse_core::EngineId::LOGIN));
        assert!(fixture.failures.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reader_stamped_stale_never_reads() {
        let (mut writer, reader) = crate::generation::generation_pair();
        let stamp = reader.stamp();
        writer.advance();

        let (client, mut server) = tokio::io::duplex(256);
        let (response_reader, fixture) = create_test_reader(stamp, client);
        let frame = Frame::new(MessageType::ExternalResponse, fixture.id, vec![]);
        server.write_all(&frame.encode()).await.unwrap();

        response_reader.run().await;
        assert!(fixture.queue.contains(fixture.id));
        assert_eq!(fixture.router.stats().routed, 0);
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected_before_read() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let frame = Frame::new(MessageType::ExternalResponse, RequestId::new(1), vec![0; 32]);
        server.write_all(&frame.header.to_bytes()).await.unwrap();
        assert!(matches!(
            read_frame(&mut client, 16).await,
            Err(PulseError::Protocol(ProtocolError::PayloadTooLarge { .. }))
        ));
    }
}
