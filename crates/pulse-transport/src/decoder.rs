//! Frame decoding shared by both transports
//!
//! Turns raw frames into [`DecodedResponse`]s, resolves the owning engine
//! through the request queue and hands the result to the router. Also
//! produces the synthetic error responses that unblock engines when a
//! transport gives up on their requests.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use pulse_core::{
    payload::PayloadCodec, DecodedResponse, EngineId, Frame, MessageType, ProtocolError, Request,
    RequestId, RequestQueue, ResponseRouter, ServerErrorKind, DEFAULT_MAX_PAYLOAD_SIZE,
};

use crate::stats::TransportStats;

/// What happened to one inbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// Correlated response delivered to its engine
    Routed(EngineId),
    /// Push message handed to the router's broadcast path
    Push,
    /// Idle keep-alive, nothing to process
    Idle,
    /// No in-flight request owns the frame's correlation id
    Unmatched,
}

/// Decoder feeding the router from either transport
#[derive(Debug, Clone)]
pub struct ResponseDecoder {
    queue: Arc<RequestQueue>,
    router: Arc<ResponseRouter>,
    stats: Arc<TransportStats>,
    max_payload: usize,
}

impl ResponseDecoder {
    pub fn new(
        queue: Arc<RequestQueue>,
        router: Arc<ResponseRouter>,
        stats: Arc<TransportStats>,
    ) -> Self {
        Self {
            queue,
            router,
            stats,
            max_payload: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }

    /// Cap on a frame payload after inflation
    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload;
        self
    }

    /// Decode one frame and route the result
    pub fn handle_frame(&self, frame: Frame) -> DecodeOutcome {
        let header = frame.header;
        if header.message_type == MessageType::IdlePoll {
            trace!("idle poll frame ignored");
            return DecodeOutcome::Idle;
        }

        trace!(
            message_type = ?header.message_type,
            request_id = %header.correlation_id,
            payload = %frame.payload_preview(),
            "decoding frame"
        );
        let items = frame
            .inflated_payload(self.max_payload)
            .and_then(|payload| PayloadCodec::decode(&payload));

        if header.message_type == MessageType::PushMessage || header.correlation_id.is_push() {
            match items {
                Ok(items) => self.router.add_push(DecodedResponse::new(
                    RequestId::PUSH,
                    EngineId::UNDEFINED,
                    header.message_type,
                    items,
                )),
                Err(e) => warn!(error = %e, "dropping malformed push message"),
            }
            return DecodeOutcome::Push;
        }

        let engine = if header.correlation_id.is_none() {
            // No id to correlate; fall back to the engine echoed in the secondary id
            match u16::try_from(header.secondary_id) {
                Ok(engine) if engine != 0 => EngineId::new(engine),
                _ => return self.unmatched(header.correlation_id),
            }
        } else {
            match self.queue.retire(header.correlation_id) {
                Some(request) => request.engine_id,
                None => return self.unmatched(header.correlation_id),
            }
        };

        let response = match items {
            Ok(items) => DecodedResponse::new(
                header.correlation_id,
                engine,
                header.message_type,
                items,
            ),
            Err(e) => {
                warn!(request_id = %header.correlation_id, engine = %engine, error = %e, "malformed response payload");
                DecodedResponse::error(
                    header.correlation_id,
                    engine,
                    ServerErrorKind::Malformed,
                    e.to_string(),
                )
            }
        };
        self.router.add_response(response);
        DecodeOutcome::Routed(engine)
    }

    fn unmatched(&self, id: RequestId) -> DecodeOutcome {
        debug!(request_id = %id, "response for unknown request dropped");
        TransportStats::bump(&self.stats.unmatched_responses);
        DecodeOutcome::Unmatched
    }

    /// Decode a concatenation of frames, returning how many carried work
    pub fn handle_body(&self, body: &[u8]) -> Result<usize, ProtocolError> {
        let frames = Frame::decode_all(body)?;
        self.stats.record_received(frames.len(), body.len());
        Ok(frames
            .into_iter()
            .map(|frame| self.handle_frame(frame))
            .filter(|outcome| *outcome != DecodeOutcome::Idle)
            .count())
    }

    // ------------------------------------------------------------------------
    // Synthetic errors
    // ------------------------------------------------------------------------

    /// Give each request a synthetic error response
    pub fn fail_requests(&self, requests: Vec<Request>, kind: ServerErrorKind, message: &str) -> usize {
        let count = requests.len();
        for request in requests {
            self.router.add_response(DecodedResponse::error(
                request.id,
                request.engine_id,
                kind,
                message,
            ));
            TransportStats::bump(&self.stats.synthetic_errors);
        }
        count
    }

    /// Invalidate the given batch, failing the requests that awaited a response
    pub fn fail_batch(&self, ids: &[RequestId], kind: ServerErrorKind, message: &str) -> usize {
        let failed = self.queue.invalidate(ids);
        debug!(batch = ids.len(), failed = failed.len(), ?kind, "failing request batch");
        self.fail_requests(failed, kind, message)
    }

    /// Invalidate every queued request after recovery was abandoned
    pub fn fail_all_in_flight(&self, kind: ServerErrorKind, message: &str) -> usize {
        let failed = self.queue.invalidate_all();
        self.fail_requests(failed, kind, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::{
        NoopKick, OutgoingRequest, PayloadItem, PushEvent, PushEventType, Timestamp,
    };

    fn create_test_decoder() -> (ResponseDecoder, Arc<RequestQueue>, Arc<ResponseRouter>) {
        let queue = Arc::new(RequestQueue::new());
        let router = Arc::new(ResponseRouter::new(Arc::new(NoopKick)));
        let decoder = ResponseDecoder::new(
            Arc::clone(&queue),
            Arc::clone(&router),
            Arc::new(TransportStats::new()),
        );
        (decoder, queue, router)
    }

    fn submit(queue: &RequestQueue, engine: EngineId) -> RequestId {
        queue.submit(
            OutgoingRequest::new(engine, MessageType::ExternalRequest, vec![]),
            Timestamp::from_millis(0),
        )
    }

    #[test]
    fn test_correlated_frame_routed_to_owner() {
        let (decoder, queue, router) = create_test_decoder();
        let id = submit(&queue, EngineId::CONTACT_SYNC);
        let payload = PayloadCodec::encode(&[PayloadItem::Status(true)]);
        let outcome = decoder.handle_frame(Frame::new(MessageType::ExternalResponse, id, payload));

        assert_eq!(outcome, DecodeOutcome::Routed(EngineId::CONTACT_SYNC));
        assert!(queue.is_empty());
        let response = router.take_for(EngineId::CONTACT_SYNC, id).unwrap();
        assert_eq!(response.items.as_slice(), &[PayloadItem::Status(true)]);
    }

    #[test]
    fn test_compressed_payload_inflated() {
        let (decoder, queue, router) = create_test_decoder();
        let id = submit(&queue, EngineId::CONTENT);
        let items = vec![PayloadItem::Data(vec![42; 2048])];
        let frame = Frame::new(MessageType::ExternalResponse, id, PayloadCodec::encode(&items))
            .compressed()
            .unwrap();
        assert!(frame.header.compressed);

        decoder.handle_frame(frame);
        let response = router.take_for(EngineId::CONTENT, id).unwrap();
        assert_eq!(response.items.to_vec(), items);
    }

    #[test]
    fn test_oversized_inflated_payload_becomes_server_error() {
        let (decoder, queue, router) = create_test_decoder();
        let decoder = decoder.with_max_payload(4096);
        let id = submit(&queue, EngineId::CONTENT);
        let items = vec![PayloadItem::Data(vec![0; 256 * 1024])];
        let frame = Frame::new(MessageType::ExternalResponse, id, PayloadCodec::encode(&items))
            .compressed()
            .unwrap();
        assert!(frame.payload.len() <= 4096);

        assert_eq!(decoder.handle_frame(frame), DecodeOutcome::Routed(EngineId::CONTENT));
        let response = router.take_for(EngineId::CONTENT, id).unwrap();
        assert_eq!(
            response.server_error().map(|e| e.kind),
            Some(ServerErrorKind::Malformed)
        );
        assert!(!response.items.iter().any(|item| matches!(item, PayloadItem::Data(_))));
    }

    #[test]
    fn test_polling_body_applies_payload_limit() {
        let (decoder, queue, router) = create_test_decoder();
        let decoder = decoder.with_max_payload(4096);
        let big = submit(&queue, EngineId::CONTENT);
        let small = submit(&queue, EngineId::GROUPS);

        let mut body = Frame::new(
            MessageType::ExternalResponse,
            big,
            PayloadCodec::encode(&[PayloadItem::Data(vec![7; 512 * 1024])]),
        )
        .compressed()
        .unwrap()
        .encode();
        Frame::new(
            MessageType::ExternalResponse,
            small,
            PayloadCodec::encode(&[PayloadItem::Status(true)]),
        )
        .encode_into(&mut body);

        assert_eq!(decoder.handle_body(&body).unwrap(), 2);
        let rejected = router.take_for(EngineId::CONTENT, big).unwrap();
        assert!(rejected.server_error().is_some());
        let accepted = router.take_for(EngineId::GROUPS, small).unwrap();
        assert_eq!(accepted.items.as_slice(), &[PayloadItem::Status(true)]);
    }

    #[test]
    fn test_malformed_payload_becomes_server_error() {
        let (decoder, queue, router) = create_test_decoder();
        let id = submit(&queue, EngineId::GROUPS);
        decoder.handle_frame(Frame::new(MessageType::InternalResponse, id, vec![0x7F, 0, 0]));

        let response = router.take_for(EngineId::GROUPS, id).unwrap();
        assert_eq!(
            response.server_error().map(|e| e.kind),
            Some(ServerErrorKind::Malformed)
        );
    }

    #[test]
    fn test_idle_and_unknown_frames_ignored() {
        let (decoder, _queue, router) = create_test_decoder();
        let idle = Frame::new(MessageType::IdlePoll, RequestId::new(0), vec![]);
        assert_eq!(decoder.handle_frame(idle), DecodeOutcome::Idle);

        let unknown = Frame::new(MessageType::ExternalResponse, RequestId::new(99), vec![]);
        assert_eq!(decoder.handle_frame(unknown), DecodeOutcome::Unmatched);
        assert_eq!(router.stats().routed, 0);
    }

    #[test]
    fn test_push_frame_broadcast() {
        let (decoder, _queue, router) = create_test_decoder();
        router.subscribe_push(EngineId::CONTACT_SYNC, &[PushEventType::ContactsChange]);
        let payload = PayloadCodec::encode(&[PayloadItem::PushEvent(PushEvent {
            event_type: PushEventType::ContactsChange,
            body: vec![1],
        })]);
        let outcome = decoder.handle_frame(Frame::new(MessageType::PushMessage, RequestId::PUSH, payload));
        assert_eq!(outcome, DecodeOutcome::Push);
        assert!(router.has_response_for(EngineId::CONTACT_SYNC));
    }

    #[test]
    fn test_sentinel_id_routed_by_secondary_id() {
        let (decoder, _queue, router) = create_test_decoder();
        let frame = Frame::new(MessageType::InternalResponse, RequestId::NONE, vec![])
            .with_secondary_id(i32::from(EngineId::LOGIN.as_u16()));
        assert_eq!(decoder.handle_frame(frame), DecodeOutcome::Routed(EngineId::LOGIN));
        assert!(router.take_for(EngineId::LOGIN, RequestId::new(4)).is_some());
    }

    #[test]
    fn test_fail_all_in_flight_skips_fire_and_forget() {
        let (decoder, queue, router) = create_test_decoder();
        let id = submit(&queue, EngineId::LOGIN);
        queue.submit(
            OutgoingRequest::new(EngineId::PRESENCE, MessageType::ExternalRequest, vec![])
                .fire_and_forget(),
            Timestamp::from_millis(0),
        );

        assert_eq!(decoder.fail_all_in_flight(ServerErrorKind::CommsFailure, "gone"), 1);
        assert!(queue.is_empty());
        assert!(router.take_for(EngineId::LOGIN, id).is_some());
        assert!(!router.has_response_for(EngineId::PRESENCE));
    }
}
