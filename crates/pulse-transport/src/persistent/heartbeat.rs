//! Heartbeat sender keeping the persistent connection alive
//!
//! Sends one authenticated keep-alive frame as soon as the connection is up
//! and then once per interval. A power assertion is held while each frame is
//! written, and the platform wake alarm is armed for the next beat before
//! sleeping so a suspended device still sends on schedule.
//!
//! Write failures go to the reconnect task; the sender never retries itself.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use pulse_core::payload::{PayloadCodec, PayloadItem};
use pulse_core::{
    AuthSession, Frame, MessageType, Platform, PulseError, RequestId, SessionHandle, TimeSource,
};

use super::reader::{report_failure, FailureSender};
use super::writer::{write_locked, SharedWriter};
use crate::generation::GenerationStamp;
use crate::stats::TransportStats;

/// Keep-alive frame identifying the session
pub fn heartbeat_frame(session: &AuthSession) -> Frame {
    let payload = PayloadCodec::encode(&[
        PayloadItem::Data(session.user_id.to_be_bytes().to_vec()),
        PayloadItem::Data(session.session_id.as_bytes().to_vec()),
    ]);
    Frame::new(MessageType::Heartbeat, RequestId::PUSH, payload)
}

pub(crate) struct HeartbeatSender {
    pub stamp: GenerationStamp,
    pub writer: SharedWriter,
    pub session: SessionHandle,
    pub platform: Platform,
    pub time: Arc<dyn TimeSource>,
    pub interval: Duration,
    pub failures: FailureSender,
    pub stats: Arc<TransportStats>,
}

impl HeartbeatSender {
    pub async fn run(self) {
        debug!(
            generation = self.stamp.generation(),
            interval_ms = self.interval.as_millis() as u64,
            "heartbeat sender started"
        );
        loop {
            if !self.stamp.is_live() {
                break;
            }

            match self.session.current() {
                Some(session) => {
                    let bytes = heartbeat_frame(&session).encode();
                    let result = {
                        let _power = self.platform.power_guard("heartbeat");
                        write_locked(&self.writer, &bytes).await
                    };
                    if let Err(e) = result {
                        report_failure(&self.failures, &self.stamp, "heartbeat", PulseError::from(e));
                        return;
                    }
                    self.stats.record_sent(1, bytes.len());
                    TransportStats::bump(&self.stats.heartbeats_sent);
                    trace!(user_id = session.user_id, "heartbeat sent");
                }
                None => trace!("no session established, heartbeat skipped"),
            }

            let next = self.time.now().saturating_add(self.interval);
            self.platform.alarm.arm(next);
            tokio::select! {
                biased;
                _ = self.stamp.retired() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        debug!(generation = self.stamp.generation(), "heartbeat sender retired");
    }
}
