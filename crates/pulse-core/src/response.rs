//! Incoming response registry
//!
//! Transports hand decoded responses to the `ResponseRouter`, which keeps one
//! FIFO per engine. Engines pull lazily while they run. Push messages are
//! copied to every engine that declared interest in their event type.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::kick::Kick;
use crate::payload::{PayloadItem, PushEvent, PushEventType, ServerError, ServerErrorKind};
use crate::types::{EngineId, RequestId};
use crate::wire::MessageType;

// ----------------------------------------------------------------------------
// Decoded Response
// ----------------------------------------------------------------------------

/// A server response ready for consumption by one engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedResponse {
    /// `RequestId::PUSH` for unsolicited messages
    pub request_id: RequestId,
    pub engine_id: EngineId,
    pub message_type: MessageType,
    pub items: SmallVec<[PayloadItem; 2]>,
}

impl DecodedResponse {
    pub fn new(
        request_id: RequestId,
        engine_id: EngineId,
        message_type: MessageType,
        items: impl IntoIterator<Item = PayloadItem>,
    ) -> Self {
        Self {
            request_id,
            engine_id,
            message_type,
            items: items.into_iter().collect(),
        }
    }

    /// Synthetic error response unblocking an engine waiting on `request_id`
    pub fn error(
        request_id: RequestId,
        engine_id: EngineId,
        kind: ServerErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            request_id,
            engine_id,
            MessageType::InternalResponse,
            [PayloadItem::ServerError(ServerError::new(kind, message))],
        )
    }

    pub fn is_push(&self) -> bool {
        self.request_id.is_push()
    }

    /// First error item, if any
    pub fn server_error(&self) -> Option<&ServerError> {
        self.items.iter().find_map(|item| match item {
            PayloadItem::ServerError(error) => Some(error),
            _ => None,
        })
    }

    pub fn push_events(&self) -> impl Iterator<Item = &PushEvent> {
        self.items.iter().filter_map(|item| match item {
            PayloadItem::PushEvent(event) => Some(event),
            _ => None,
        })
    }
}

// ----------------------------------------------------------------------------
// Router Statistics
// ----------------------------------------------------------------------------

/// Counters describing router traffic
#[derive(Debug, Default)]
pub struct RouterStats {
    routed: AtomicU64,
    push_delivered: AtomicU64,
    push_unclaimed: AtomicU64,
    stale_dropped: AtomicU64,
}

/// Point-in-time copy of `RouterStats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStatsSnapshot {
    pub routed: u64,
    pub push_delivered: u64,
    pub push_unclaimed: u64,
    pub stale_dropped: u64,
}

impl RouterStats {
    pub fn snapshot(&self) -> RouterStatsSnapshot {
        RouterStatsSnapshot {
            routed: self.routed.load(Ordering::Relaxed),
            push_delivered: self.push_delivered.load(Ordering::Relaxed),
            push_unclaimed: self.push_unclaimed.load(Ordering::Relaxed),
            stale_dropped: self.stale_dropped.load(Ordering::Relaxed),
        }
    }
}

// ----------------------------------------------------------------------------
// Response Router
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct RouterState {
    by_engine: HashMap<EngineId, VecDeque<DecodedResponse>>,
    push_interest: HashMap<PushEventType, Vec<EngineId>>,
}

/// Registry of decoded responses awaiting their engines
pub struct ResponseRouter {
    state: Mutex<RouterState>,
    kicker: Arc<dyn Kick>,
    stats: RouterStats,
}

impl std::fmt::Debug for ResponseRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseRouter")
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl ResponseRouter {
    /// Create a router that kicks the worker loop whenever work arrives
    pub fn new(kicker: Arc<dyn Kick>) -> Self {
        Self {
            state: Mutex::new(RouterState::default()),
            kicker,
            stats: RouterStats::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, RouterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Declare that `engine` wants push messages of the given types
    pub fn subscribe_push(&self, engine: EngineId, types: &[PushEventType]) {
        let mut state = self.state();
        for event_type in types {
            let engines = state.push_interest.entry(*event_type).or_default();
            if !engines.contains(&engine) {
                engines.push(engine);
            }
        }
    }

    /// Store a correlated response for its engine
    pub fn add_response(&self, response: DecodedResponse) {
        if response.is_push() {
            self.add_push(response);
            return;
        }
        trace!(request_id = %response.request_id, engine = %response.engine_id, "response routed");
        self.state()
            .by_engine
            .entry(response.engine_id)
            .or_default()
            .push_back(response);
        self.stats.routed.fetch_add(1, Ordering::Relaxed);
        self.kicker.kick();
    }

    /// Broadcast a push response to every engine interested in its events
    pub fn add_push(&self, response: DecodedResponse) {
        let delivered = {
            let mut state = self.state();
            let mut targets: Vec<EngineId> = Vec::new();
            for event in response.push_events() {
                if let Some(engines) = state.push_interest.get(&event.event_type) {
                    for engine in engines {
                        if !targets.contains(engine) {
                            targets.push(*engine);
                        }
                    }
                }
            }
            for engine in &targets {
                let mut copy = response.clone();
                copy.engine_id = *engine;
                state.by_engine.entry(*engine).or_default().push_back(copy);
            }
            targets.len()
        };

        if delivered == 0 {
            debug!("push message with no interested engine dropped");
            self.stats.push_unclaimed.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.stats
            .push_delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.kicker.kick();
    }

    /// Whether any response is waiting for `engine`
    pub fn has_response_for(&self, engine: EngineId) -> bool {
        self.state()
            .by_engine
            .get(&engine)
            .is_some_and(|queue| !queue.is_empty())
    }

    /// Pop the next response `engine` may accept given its outstanding id
    ///
    /// Push responses and responses carrying the sentinel id are always
    /// accepted, as is anything while the engine has no request outstanding.
    /// A correlated response for any other id belongs to an abandoned request
    /// and is dropped.
    pub fn take_for(&self, engine: EngineId, outstanding: RequestId) -> Option<DecodedResponse> {
        let mut state = self.state();
        let queue = state.by_engine.get_mut(&engine)?;
        while let Some(response) = queue.pop_front() {
            let id = response.request_id;
            if id.is_push() || id.is_none() || outstanding.is_none() || id == outstanding {
                return Some(response);
            }
            debug!(
                engine = %engine,
                request_id = %id,
                outstanding = %outstanding,
                "dropping stale response"
            );
            self.stats.stale_dropped.fetch_add(1, Ordering::Relaxed);
        }
        None
    }

    /// Discard everything queued for `engine`
    pub fn clear_engine(&self, engine: EngineId) -> usize {
        self.state()
            .by_engine
            .remove(&engine)
            .map(|queue| queue.len())
            .unwrap_or(0)
    }

    pub fn stats(&self) -> RouterStatsSnapshot {
        self.stats.snapshot()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingKick(AtomicUsize);

    impl Kick for CountingKick {
        fn kick(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn data_response(id: i32, engine: EngineId) -> DecodedResponse {
        DecodedResponse::new(
            RequestId::new(id),
            engine,
            MessageType::ExternalResponse,
            [PayloadItem::Data(vec![id as u8])],
        )
    }

    fn push(event_type: PushEventType) -> DecodedResponse {
        DecodedResponse::new(
            RequestId::PUSH,
            EngineId::UNDEFINED,
            MessageType::PushMessage,
            [PayloadItem::PushEvent(PushEvent {
                event_type,
                body: vec![],
            })],
        )
    }

    #[test]
    fn test_matching_response_accepted() {
        let kick = Arc::new(CountingKick::default());
        let router = ResponseRouter::new(kick.clone());
        router.add_response(data_response(5, EngineId::LOGIN));
        assert!(router.has_response_for(EngineId::LOGIN));
        assert_eq!(kick.0.load(Ordering::SeqCst), 1);

        let response = router.take_for(EngineId::LOGIN, RequestId::new(5)).unwrap();
        assert_eq!(response.request_id, RequestId::new(5));
        assert!(!router.has_response_for(EngineId::LOGIN));
    }

    #[test]
    fn test_mismatched_response_dropped_without_side_effects() {
        let router = ResponseRouter::new(Arc::new(crate::kick::NoopKick));
        router.add_response(data_response(4, EngineId::LOGIN));
        router.add_response(data_response(9, EngineId::CONTENT));

        assert!(router.take_for(EngineId::LOGIN, RequestId::new(5)).is_none());
        assert_eq!(router.stats().stale_dropped, 1);
        // Other engines untouched
        assert!(router.has_response_for(EngineId::CONTENT));
    }

    #[test]
    fn test_stale_response_skipped_for_next_match() {
        let router = ResponseRouter::new(Arc::new(crate::kick::NoopKick));
        router.add_response(data_response(4, EngineId::LOGIN));
        router.add_response(data_response(5, EngineId::LOGIN));
        let response = router.take_for(EngineId::LOGIN, RequestId::new(5)).unwrap();
        assert_eq!(response.request_id, RequestId::new(5));
    }

    #[test]
    fn test_sentinel_ids_always_accepted() {
        let router = ResponseRouter::new(Arc::new(crate::kick::NoopKick));
        router.add_response(data_response(-1, EngineId::LOGIN));
        assert!(router.take_for(EngineId::LOGIN, RequestId::new(3)).is_some());

        router.add_response(data_response(8, EngineId::LOGIN));
        assert!(router.take_for(EngineId::LOGIN, RequestId::NONE).is_some());
    }

    #[test]
    fn test_push_broadcast_to_interested_engines() {
        let router = ResponseRouter::new(Arc::new(crate::kick::NoopKick));
        router.subscribe_push(EngineId::PRESENCE, &[PushEventType::PresenceChange]);
        router.subscribe_push(EngineId::ACTIVITIES, &[PushEventType::PresenceChange]);
        router.subscribe_push(EngineId::CONTACT_SYNC, &[PushEventType::ContactsChange]);

        router.add_response(push(PushEventType::PresenceChange));

        let presence = router.take_for(EngineId::PRESENCE, RequestId::new(12)).unwrap();
        assert_eq!(presence.engine_id, EngineId::PRESENCE);
        assert!(router.take_for(EngineId::ACTIVITIES, RequestId::NONE).is_some());
        assert!(!router.has_response_for(EngineId::CONTACT_SYNC));
        assert_eq!(router.stats().push_delivered, 2);
    }

    #[test]
    fn test_unclaimed_push_counted() {
        let router = ResponseRouter::new(Arc::new(crate::kick::NoopKick));
        router.add_response(push(PushEventType::SystemNotification));
        assert_eq!(router.stats().push_unclaimed, 1);
    }

    #[test]
    fn test_error_response_exposes_server_error() {
        let response = DecodedResponse::error(
            RequestId::new(3),
            EngineId::GROUPS,
            ServerErrorKind::CommsFailure,
            "gone",
        );
        assert_eq!(
            response.server_error().map(|e| e.kind),
            Some(ServerErrorKind::CommsFailure)
        );
    }
}
