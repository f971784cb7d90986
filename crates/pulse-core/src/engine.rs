//! Engine contract
//!
//! An engine is a feature state machine driven by the scheduler. Concrete
//! engines implement [`Engine`] and embed an [`EngineCore`], which carries
//! the bookkeeping every engine needs: the private UI request FIFO, the
//! timeout deadline, the single outstanding request id and the deactivated
//! flag.
//!
//! `run()` executes on the worker loop and must never block on I/O: it
//! submits requests and polls for already-decoded responses.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;

use crate::errors::{PulseResult, SchedulerError, TransportError};
use crate::payload::PushEventType;
use crate::request::{OutgoingRequest, RequestQueue};
use crate::response::{DecodedResponse, ResponseRouter};
use crate::session::SessionHandle;
use crate::types::{ConnectionState, EngineId, NextRun, RequestId, Timestamp};
use crate::wire::MessageType;

// ----------------------------------------------------------------------------
// Engine Context
// ----------------------------------------------------------------------------

/// Shared services visible to an engine during one scheduler cycle
pub struct EngineContext<'a> {
    pub now: Timestamp,
    pub connection: ConnectionState,
    pub queue: &'a RequestQueue,
    pub router: &'a ResponseRouter,
    pub session: &'a SessionHandle,
}

// ----------------------------------------------------------------------------
// UI Requests
// ----------------------------------------------------------------------------

/// Request posted by a UI collaborator to one engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiRequest {
    /// Engine-specific request kind
    pub kind: u16,
    pub payload: Vec<u8>,
}

impl UiRequest {
    pub fn new(kind: u16, payload: Vec<u8>) -> Self {
        Self { kind, payload }
    }
}

// ----------------------------------------------------------------------------
// Reset Completion
// ----------------------------------------------------------------------------

/// Signals that an engine finished resetting
///
/// Engines that reset asynchronously keep this until their work is wound
/// down and complete it from a later `run()`.
#[derive(Debug)]
pub struct ResetCompletion {
    engine: EngineId,
    sender: oneshot::Sender<()>,
}

impl ResetCompletion {
    /// Create a completion and the receiver the reset barrier waits on
    pub fn new(engine: EngineId) -> (Self, oneshot::Receiver<()>) {
        let (sender, receiver) = oneshot::channel();
        (Self { engine, sender }, receiver)
    }

    pub fn engine(&self) -> EngineId {
        self.engine
    }

    pub fn complete(self) {
        debug!(engine = %self.engine, "engine reset complete");
        // Barrier may already be gone if the caller stopped waiting
        let _ = self.sender.send(());
    }
}

// ----------------------------------------------------------------------------
// Engine Trait
// ----------------------------------------------------------------------------

/// A feature module driven by the scheduler
pub trait Engine: Send {
    fn core(&self) -> &EngineCore;

    fn core_mut(&mut self) -> &mut EngineCore;

    /// Do at most about one second of work
    fn run(&mut self, ctx: &EngineContext<'_>);

    fn id(&self) -> EngineId {
        self.core().id()
    }

    fn next_run_time(&self, ctx: &EngineContext<'_>) -> NextRun {
        self.core().default_next_run(ctx)
    }

    fn on_create(&mut self, _ctx: &EngineContext<'_>) {}

    fn on_destroy(&mut self) {}

    /// Stop outstanding work, restore idle state and signal `completion`
    fn on_reset(&mut self, ctx: &EngineContext<'_>, completion: ResetCompletion) {
        self.core_mut().reset(ctx);
        completion.complete();
    }

    /// Push event types this engine wants delivered
    fn push_interest(&self) -> &[PushEventType] {
        &[]
    }

    fn accept_ui_request(&mut self, request: UiRequest) {
        self.core_mut().enqueue_ui_request(request);
    }
}

// ----------------------------------------------------------------------------
// Engine Core
// ----------------------------------------------------------------------------

/// Bookkeeping shared by all engines
#[derive(Debug)]
pub struct EngineCore {
    id: EngineId,
    ui_requests: VecDeque<UiRequest>,
    timeout: Option<Timestamp>,
    outstanding: RequestId,
    deactivated: bool,
}

impl EngineCore {
    pub fn new(id: EngineId) -> Self {
        Self {
            id,
            ui_requests: VecDeque::new(),
            timeout: None,
            outstanding: RequestId::NONE,
            deactivated: false,
        }
    }

    pub fn id(&self) -> EngineId {
        self.id
    }

    /// Stop scheduling this engine until reactivated
    pub fn deactivate(&mut self) {
        self.deactivated = true;
    }

    pub fn activate(&mut self) {
        self.deactivated = false;
    }

    pub fn is_deactivated(&self) -> bool {
        self.deactivated
    }

    // ------------------------------------------------------------------------
    // UI requests
    // ------------------------------------------------------------------------

    pub fn enqueue_ui_request(&mut self, request: UiRequest) {
        self.ui_requests.push_back(request);
    }

    pub fn next_ui_request(&mut self) -> Option<UiRequest> {
        self.ui_requests.pop_front()
    }

    pub fn is_ui_request_outstanding(&self) -> bool {
        !self.ui_requests.is_empty()
    }

    // ------------------------------------------------------------------------
    // Timeouts
    // ------------------------------------------------------------------------

    pub fn set_timeout(&mut self, now: Timestamp, after: Duration) {
        self.timeout = Some(now.saturating_add(after));
    }

    pub fn set_timeout_at(&mut self, at: Timestamp) {
        self.timeout = Some(at);
    }

    pub fn clear_timeout(&mut self) {
        self.timeout = None;
    }

    pub fn timeout(&self) -> Option<Timestamp> {
        self.timeout
    }

    /// Clear and report the timeout if it has expired at `now`
    pub fn take_expired_timeout(&mut self, now: Timestamp) -> bool {
        match self.timeout {
            Some(at) if at <= now => {
                self.timeout = None;
                true
            }
            _ => false,
        }
    }

    // ------------------------------------------------------------------------
    // Network requests
    // ------------------------------------------------------------------------

    pub fn outstanding_request(&self) -> RequestId {
        self.outstanding
    }

    /// Whether a network response is waiting to be pulled
    pub fn is_comms_response_outstanding(&self, ctx: &EngineContext<'_>) -> bool {
        ctx.router.has_response_for(self.id)
    }

    fn check_can_submit(&self, ctx: &EngineContext<'_>) -> PulseResult<()> {
        if self.deactivated {
            return Err(SchedulerError::EngineDeactivated { engine: self.id }.into());
        }
        if ctx.connection == ConnectionState::Disconnected {
            return Err(TransportError::NotConnected.into());
        }
        Ok(())
    }

    /// Submit a request expecting a response
    ///
    /// Only one such request may be outstanding per engine.
    pub fn submit_request(
        &mut self,
        ctx: &EngineContext<'_>,
        message_type: MessageType,
        payload: Vec<u8>,
    ) -> PulseResult<RequestId> {
        self.check_can_submit(ctx)?;
        if !self.outstanding.is_none() {
            return Err(SchedulerError::RequestOutstanding {
                engine: self.id,
                request_id: self.outstanding,
            }
            .into());
        }
        let id = ctx.queue.submit(
            OutgoingRequest::new(self.id, message_type, payload),
            ctx.now,
        );
        self.outstanding = id;
        Ok(id)
    }

    /// Submit a request no response is awaited for
    pub fn submit_fire_and_forget(
        &mut self,
        ctx: &EngineContext<'_>,
        message_type: MessageType,
        payload: Vec<u8>,
    ) -> PulseResult<RequestId> {
        self.check_can_submit(ctx)?;
        Ok(ctx.queue.submit(
            OutgoingRequest::new(self.id, message_type, payload).fire_and_forget(),
            ctx.now,
        ))
    }

    /// Pull the next acceptable response, clearing the outstanding id it answers
    pub fn take_response(&mut self, ctx: &EngineContext<'_>) -> Option<DecodedResponse> {
        let response = ctx.router.take_for(self.id, self.outstanding)?;
        if !response.is_push() {
            self.outstanding = RequestId::NONE;
        }
        Some(response)
    }

    // ------------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------------

    /// Wake time derived from pending UI requests, responses and the timeout
    pub fn default_next_run(&self, ctx: &EngineContext<'_>) -> NextRun {
        if self.deactivated {
            return NextRun::Never;
        }
        if self.is_ui_request_outstanding() || self.is_comms_response_outstanding(ctx) {
            return NextRun::Now;
        }
        match self.timeout {
            Some(at) if at <= ctx.now => NextRun::Now,
            Some(at) => NextRun::At(at),
            None => NextRun::Never,
        }
    }

    /// Drop pending work and return to idle
    pub fn reset(&mut self, ctx: &EngineContext<'_>) {
        let dropped_ui = self.ui_requests.len();
        self.ui_requests.clear();
        self.timeout = None;
        self.outstanding = RequestId::NONE;
        let dropped_responses = ctx.router.clear_engine(self.id);
        debug!(
            engine = %self.id,
            dropped_ui,
            dropped_responses,
            "engine state reset"
        );
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
