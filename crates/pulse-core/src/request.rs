//! Outgoing request registry
//!
//! The `RequestQueue` allocates correlation ids, remembers which engine owns
//! each in-flight request and hands unsent requests to whichever transport
//! is active. All mutation happens under one queue-scoped lock that is never
//! held across I/O.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::types::{EngineId, RequestId, Timestamp};
use crate::wire::{Frame, MessageType};

// ----------------------------------------------------------------------------
// Request
// ----------------------------------------------------------------------------

/// What an engine hands over when it wants network work done
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingRequest {
    pub engine_id: EngineId,
    pub message_type: MessageType,
    pub payload: Vec<u8>,
    pub fire_and_forget: bool,
}

impl OutgoingRequest {
    pub fn new(engine_id: EngineId, message_type: MessageType, payload: Vec<u8>) -> Self {
        Self {
            engine_id,
            message_type,
            payload,
            fire_and_forget: false,
        }
    }

    /// Mark the request as not expecting a response
    pub fn fire_and_forget(mut self) -> Self {
        self.fire_and_forget = true;
        self
    }
}

/// A request registered with the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub id: RequestId,
    pub engine_id: EngineId,
    pub message_type: MessageType,
    pub payload: Vec<u8>,
    pub fire_and_forget: bool,
    /// Handed to a transport at least once
    pub active: bool,
    pub created_at: Timestamp,
}

impl Request {
    /// Wire frame carrying this request
    pub fn to_frame(&self) -> Frame {
        Frame::new(self.message_type, self.id, self.payload.clone())
            .with_secondary_id(i32::from(self.engine_id.as_u16()))
    }
}

// ----------------------------------------------------------------------------
// Request Queue
// ----------------------------------------------------------------------------

#[derive(Debug)]
struct QueueState {
    requests: Vec<Request>,
    next_id: i32,
}

impl QueueState {
    fn allocate_id(&mut self) -> RequestId {
        loop {
            let candidate = self.next_id;
            self.next_id = if self.next_id == i32::MAX {
                1
            } else {
                self.next_id + 1
            };
            if !self.requests.iter().any(|r| r.id.as_i32() == candidate) {
                return RequestId::new(candidate);
            }
        }
    }
}

/// Registry of in-flight requests shared by engines and transports
#[derive(Debug)]
pub struct RequestQueue {
    state: Mutex<QueueState>,
    submitted: Notify,
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                requests: Vec::new(),
                next_id: 1,
            }),
            submitted: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a request and wake the active transport's writer
    pub fn submit(&self, request: OutgoingRequest, now: Timestamp) -> RequestId {
        let id = {
            let mut state = self.state();
            let id = state.allocate_id();
            state.requests.push(Request {
                id,
                engine_id: request.engine_id,
                message_type: request.message_type,
                payload: request.payload,
                fire_and_forget: request.fire_and_forget,
                active: false,
                created_at: now,
            });
            id
        };
        trace!(request_id = %id, engine = %request.engine_id, "request queued");
        self.submitted.notify_one();
        id
    }

    /// Wait until a request is submitted or a writer is nudged
    pub async fn wait_submitted(&self) {
        self.submitted.notified().await;
    }

    /// Wake a writer without submitting anything
    pub fn notify_submitted(&self) {
        self.submitted.notify_one();
    }

    /// Snapshot of requests not yet handed to a transport, marking them active
    pub fn take_unsent(&self) -> Vec<Request> {
        let mut state = self.state();
        state
            .requests
            .iter_mut()
            .filter(|r| !r.active)
            .map(|r| {
                r.active = true;
                r.clone()
            })
            .collect()
    }

    /// Drop fire-and-forget requests among `ids` once they have been written
    pub fn remove_fire_and_forget(&self, ids: &[RequestId]) -> usize {
        let mut state = self.state();
        let before = state.requests.len();
        state
            .requests
            .retain(|r| !(r.fire_and_forget && ids.contains(&r.id)));
        before - state.requests.len()
    }

    /// Remove the request answered by a response
    pub fn retire(&self, id: RequestId) -> Option<Request> {
        let mut state = self.state();
        let index = state.requests.iter().position(|r| r.id == id)?;
        Some(state.requests.remove(index))
    }

    /// Engine owning an in-flight request
    pub fn engine_for(&self, id: RequestId) -> Option<EngineId> {
        self.state()
            .requests
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.engine_id)
    }

    /// Remove the given requests, returning those that awaited a response
    pub fn invalidate(&self, ids: &[RequestId]) -> Vec<Request> {
        let mut state = self.state();
        let mut invalidated = Vec::new();
        state.requests.retain(|r| {
            if ids.contains(&r.id) {
                invalidated.push(r.clone());
                false
            } else {
                true
            }
        });
        invalidated.retain(|r| !r.fire_and_forget);
        invalidated
    }

    /// Remove every request, returning those that awaited a response
    pub fn invalidate_all(&self) -> Vec<Request> {
        let drained: Vec<Request> = std::mem::take(&mut self.state().requests);
        debug!(count = drained.len(), "invalidating all queued requests");
        drained.into_iter().filter(|r| !r.fire_and_forget).collect()
    }

    /// Mark active requests unsent again so a new connection resends them
    pub fn requeue_active(&self) -> usize {
        let count = {
            let mut state = self.state();
            let mut count = 0;
            for request in state.requests.iter_mut().filter(|r| r.active) {
                request.active = false;
                count += 1;
            }
            count
        };
        if count > 0 {
            self.submitted.notify_one();
        }
        count
    }

    pub fn has_request_for(&self, engine_id: EngineId) -> bool {
        self.state()
            .requests
            .iter()
            .any(|r| r.engine_id == engine_id)
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.state().requests.iter().any(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.state().requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn request(engine: EngineId) -> OutgoingRequest {
        OutgoingRequest::new(engine, MessageType::ExternalRequest, vec![1, 2, 3])
    }

    #[test]
    fn test_ids_are_unique_and_never_sentinels() {
        let queue = RequestQueue::new();
        let now = Timestamp::from_millis(0);
        let a = queue.submit(request(EngineId::LOGIN), now);
        let b = queue.submit(request(EngineId::LOGIN), now);
        assert_ne!(a, b);
        assert!(!a.is_none() && !a.is_push());
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_id_allocation_wraps_and_skips_in_use() {
        let queue = RequestQueue::new();
        let now = Timestamp::from_millis(0);
        let first = queue.submit(request(EngineId::LOGIN), now);
        queue.state().next_id = i32::MAX;
        let max = queue.submit(request(EngineId::LOGIN), now);
        assert_eq!(max.as_i32(), i32::MAX);

        // Id 1 is still in flight, so the wrap lands on 2
        let wrapped = queue.submit(request(EngineId::LOGIN), now);
        assert_eq!(first.as_i32(), 1);
        assert_eq!(wrapped.as_i32(), 2);
    }

    #[test]
    fn test_take_unsent_marks_active_once() {
        let queue = RequestQueue::new();
        queue.submit(request(EngineId::PRESENCE), Timestamp::from_millis(0));
        assert_eq!(queue.take_unsent().len(), 1);
        assert!(queue.take_unsent().is_empty());
        assert_eq!(queue.requeue_active(), 1);
        assert_eq!(queue.take_unsent().len(), 1);
    }

    #[test]
    fn test_fire_and_forget_removed_after_write() {
        let queue = RequestQueue::new();
        let now = Timestamp::from_millis(0);
        let ff = queue.submit(request(EngineId::PRESENCE).fire_and_forget(), now);
        let normal = queue.submit(request(EngineId::PRESENCE), now);

        let ids: Vec<RequestId> = queue.take_unsent().iter().map(|r| r.id).collect();
        assert_eq!(queue.remove_fire_and_forget(&ids), 1);
        assert!(!queue.contains(ff));
        assert!(queue.contains(normal));
    }

    #[test]
    fn test_retire_returns_owner() {
        let queue = RequestQueue::new();
        let id = queue.submit(request(EngineId::GROUPS), Timestamp::from_millis(0));
        assert_eq!(queue.engine_for(id), Some(EngineId::GROUPS));
        assert_eq!(queue.retire(id).map(|r| r.engine_id), Some(EngineId::GROUPS));
        assert!(queue.retire(id).is_none());
    }

    #[test]
    fn test_invalidate_all_skips_fire_and_forget() {
        let queue = RequestQueue::new();
        let now = Timestamp::from_millis(0);
        queue.submit(request(EngineId::LOGIN), now);
        queue.submit(request(EngineId::CONTENT).fire_and_forget(), now);
        let failed = queue.invalidate_all();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].engine_id, EngineId::LOGIN);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_request_frame_carries_engine_as_secondary_id() {
        let queue = RequestQueue::new();
        let id = queue.submit(request(EngineId::IDENTITIES), Timestamp::from_millis(0));
        let frame = queue.take_unsent()[0].to_frame();
        assert_eq!(frame.header.correlation_id, id);
        assert_eq!(frame.header.secondary_id, 3);
    }

    #[tokio::test]
    async fn test_submit_wakes_waiting_writer() {
        let queue = std::sync::Arc::new(RequestQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.wait_submitted().await })
        };
        queue.submit(request(EngineId::LOGIN), Timestamp::from_millis(0));
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("writer should wake")
            .unwrap();
    }
}
