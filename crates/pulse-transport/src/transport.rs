//! Transport contract shared by the persistent and polling strategies

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::info;

use pulse_core::{
    ConnectionState, Kick, NoopKick, Platform, PulseResult, RequestQueue, ResponseRouter,
    SessionHandle, SystemTimeSource, TimeSource, DEFAULT_MAX_PAYLOAD_SIZE,
};

use crate::decoder::ResponseDecoder;
use crate::stats::TransportStats;

/// Which strategy a transport implements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Persistent,
    Polling,
}

// ----------------------------------------------------------------------------
// Transport Context
// ----------------------------------------------------------------------------

/// Services a transport shares with the scheduler
#[derive(Clone)]
pub struct TransportContext {
    pub queue: Arc<RequestQueue>,
    pub router: Arc<ResponseRouter>,
    pub session: SessionHandle,
    pub platform: Platform,
    pub time: Arc<dyn TimeSource>,
    pub stats: Arc<TransportStats>,
    state: Arc<watch::Sender<ConnectionState>>,
    kicker: Arc<dyn Kick>,
    max_payload: usize,
}

impl TransportContext {
    pub fn new(
        queue: Arc<RequestQueue>,
        router: Arc<ResponseRouter>,
        session: SessionHandle,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            queue,
            router,
            session,
            platform: Platform::noop(),
            time: Arc::new(SystemTimeSource::new()),
            stats: Arc::new(TransportStats::new()),
            state: Arc::new(state),
            kicker: Arc::new(NoopKick),
            max_payload: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_time_source(mut self, time: Arc<dyn TimeSource>) -> Self {
        self.time = time;
        self
    }

    /// Kick the worker loop whenever the connection state changes
    pub fn with_kicker(mut self, kicker: Arc<dyn Kick>) -> Self {
        self.kicker = kicker;
        self
    }

    /// Largest payload any decoder built from this context will inflate
    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload;
        self
    }

    pub fn decoder(&self) -> ResponseDecoder {
        ResponseDecoder::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.router),
            Arc::clone(&self.stats),
        )
        .with_max_payload(self.max_payload)
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Publish a state transition, waking engines gated on it
    pub fn set_state(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            info!(state = %next, "connection state changed");
            self.kicker.kick();
        }
    }
}

impl std::fmt::Debug for TransportContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportContext")
            .field("state", &self.connection_state())
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Transport Trait
// ----------------------------------------------------------------------------

/// A strategy for moving queued requests to the back end and responses back
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Spawn the transport's background tasks
    async fn start(&self) -> PulseResult<()>;

    /// Stop every background task and close the connection
    async fn stop(&self);

    /// New requests are waiting in the queue
    fn notify_items_queued(&self);

    fn notify_connectivity_regained(&self);

    fn notify_user_activity(&self);

    fn connection_state(&self) -> ConnectionState;
}
