//! Keep-alive demo engine
//!
//! Pings the back end on a fixed interval and whenever a `PING` UI request
//! arrives, logging every response and system notification it receives.

use std::time::Duration;

use tracing::{debug, info, warn};

use pulse_core::payload::{PayloadCodec, PayloadItem};
use pulse_core::{
    DecodedResponse, Engine, EngineContext, EngineCore, EngineId, MessageType, PushEventType,
    UiRequest,
};

/// UI request kind asking for an immediate ping
pub const PING: u16 = 1;

const INTEREST: &[PushEventType] = &[PushEventType::SystemNotification];

pub struct KeepAliveEngine {
    core: EngineCore,
    interval: Duration,
    pings_sent: u64,
    responses: u64,
}

impl KeepAliveEngine {
    pub fn new(id: EngineId, interval: Duration) -> Self {
        Self {
            core: EngineCore::new(id),
            interval,
            pings_sent: 0,
            responses: 0,
        }
    }

    pub fn pings_sent(&self) -> u64 {
        self.pings_sent
    }

    pub fn responses(&self) -> u64 {
        self.responses
    }

    fn ping(&mut self, ctx: &EngineContext<'_>) {
        if !self.core.outstanding_request().is_none() {
            debug!("ping already outstanding");
            return;
        }
        let payload = PayloadCodec::encode(&[PayloadItem::Data(b"ping".to_vec())]);
        match self
            .core
            .submit_request(ctx, MessageType::ExternalRequest, payload)
        {
            Ok(id) => {
                self.pings_sent += 1;
                info!(request_id = %id, "ping sent");
            }
            Err(e) => debug!(error = %e, "ping skipped"),
        }
    }

    fn handle_response(&mut self, response: DecodedResponse) {
        if response.is_push() {
            for event in response.push_events() {
                info!(event = ?event.event_type, bytes = event.body.len(), "notification");
            }
            return;
        }
        self.responses += 1;
        match response.server_error() {
            Some(error) => warn!(
                request_id = %response.request_id,
                kind = ?error.kind,
                message = %error.message,
                "ping failed"
            ),
            None => info!(request_id = %response.request_id, items = response.items.len(), "pong"),
        }
    }

    fn handle_ui_request(&mut self, ctx: &EngineContext<'_>, request: UiRequest) {
        match request.kind {
            PING => self.ping(ctx),
            kind => warn!(kind, "unknown ui request"),
        }
    }
}

impl Engine for KeepAliveEngine {
    fn core(&self) -> &EngineCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EngineCore {
        &mut self.core
    }

    fn run(&mut self, ctx: &EngineContext<'_>) {
        while let Some(response) = self.core.take_response(ctx) {
            self.handle_response(response);
        }
        while let Some(request) = self.core.next_ui_request() {
            self.handle_ui_request(ctx, request);
        }
        if self.core.take_expired_timeout(ctx.now) {
            self.ping(ctx);
            self.core.set_timeout(ctx.now, self.interval);
        }
    }

    fn on_create(&mut self, ctx: &EngineContext<'_>) {
        self.core.set_timeout(ctx.now, self.interval);
    }

    fn push_interest(&self) -> &[PushEventType] {
        INTEREST
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::{
        ConnectionState, NextRun, NoopKick, RequestQueue, ResponseRouter, ServerErrorKind,
        SessionHandle, Timestamp,
    };
    use std::sync::Arc;

    struct Services {
        queue: RequestQueue,
        router: ResponseRouter,
        session: SessionHandle,
    }

    fn services() -> Services {
        Services {
            queue: RequestQueue::new(),
            router: ResponseRouter::new(Arc::new(NoopKick)),
            session: SessionHandle::new(),
        }
    }

    fn ctx(services: &Services, now: u64, connection: ConnectionState) -> EngineContext<'_> {
        EngineContext {
            now: Timestamp::from_millis(now),
            connection,
            queue: &services.queue,
            router: &services.router,
            session: &services.session,
        }
    }

    #[test]
    fn test_pings_on_interval() {
        let services = services();
        let mut engine = KeepAliveEngine::new(EngineId::PRESENCE, Duration::from_millis(100));
        engine.on_create(&ctx(&services, 0, ConnectionState::Connected));

        let early = ctx(&services, 50, ConnectionState::Connected);
        assert_eq!(
            engine.next_run_time(&early),
            NextRun::At(Timestamp::from_millis(100))
        );

        let due = ctx(&services, 100, ConnectionState::Connected);
        assert_eq!(engine.next_run_time(&due), NextRun::Now);
        engine.run(&due);
        assert_eq!(engine.pings_sent(), 1);
        assert_eq!(services.queue.len(), 1);
        assert_eq!(
            engine.next_run_time(&due),
            NextRun::At(Timestamp::from_millis(200))
        );
    }

    #[test]
    fn test_ping_skipped_while_disconnected() {
        let services = services();
        let mut engine = KeepAliveEngine::new(EngineId::PRESENCE, Duration::from_secs(30));
        let ctx = ctx(&services, 0, ConnectionState::Disconnected);
        engine.accept_ui_request(UiRequest::new(PING, vec![]));
        engine.run(&ctx);
        assert_eq!(engine.pings_sent(), 0);
        assert!(services.queue.is_empty());
    }

    #[test]
    fn test_error_response_unblocks_next_ping() {
        let services = services();
        let mut engine = KeepAliveEngine::new(EngineId::PRESENCE, Duration::from_secs(30));
        let ctx = ctx(&services, 0, ConnectionState::Connected);

        engine.accept_ui_request(UiRequest::new(PING, vec![]));
        engine.run(&ctx);
        let id = engine.core().outstanding_request();
        assert!(!id.is_none());

        services.queue.invalidate(&[id]);
        services.router.add_response(DecodedResponse::error(
            id,
            EngineId::PRESENCE,
            ServerErrorKind::CommsFailure,
            "connection lost",
        ));
        engine.accept_ui_request(UiRequest::new(PING, vec![]));
        engine.run(&ctx);
        assert_eq!(engine.responses(), 1);
        assert_eq!(engine.pings_sent(), 2);
    }
}
