//! Long-poll loop delivering push messages and piggy-backed responses
//!
//! The loop stops by itself after a run of consecutive empty (or failed)
//! replies and has to be re-armed explicitly, so a dead endpoint is not
//! polled forever. Polls are skipped while no session exists; those rounds
//! do not count towards the empty-reply limit.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use pulse_core::payload::{PayloadCodec, PayloadItem};
use pulse_core::{Frame, MessageType, RequestId, SessionHandle};

use super::http::HttpExchange;
use crate::decoder::ResponseDecoder;
use crate::stats::TransportStats;

/// Why the poll loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollExit {
    /// Too many consecutive empty replies
    Exhausted { empty_polls: u32 },
    Shutdown,
}

/// Poll request identifying the session; `None` until a session exists
pub fn poll_frame(session: &SessionHandle) -> Option<Frame> {
    let session = session.current()?;
    let payload = PayloadCodec::encode(&[
        PayloadItem::Data(session.user_id.to_be_bytes().to_vec()),
        PayloadItem::Data(session.session_id.into_bytes()),
    ]);
    Some(Frame::new(MessageType::PollRequest, RequestId::PUSH, payload))
}

/// Long-poll driver
#[derive(Clone)]
pub struct LongPoller {
    pub(crate) exchange: Arc<dyn HttpExchange>,
    pub(crate) url: String,
    pub(crate) decoder: ResponseDecoder,
    pub(crate) session: SessionHandle,
    pub(crate) max_empty_polls: u32,
    pub(crate) interval: Duration,
    pub(crate) stats: Arc<TransportStats>,
}

impl LongPoller {
    /// Whether one poll round trip delivered any work
    async fn poll_once(&self, frame: Frame) -> bool {
        let body = frame.encode();
        TransportStats::bump(&self.stats.polls_sent);
        match self.exchange.post(&self.url, body).await {
            Ok(reply) if reply.is_success() => match self.decoder.handle_body(&reply.body) {
                Ok(delivered) => {
                    trace!(delivered, "poll reply decoded");
                    delivered > 0
                }
                Err(e) => {
                    warn!(error = %e, "malformed poll reply");
                    false
                }
            },
            Ok(reply) => {
                warn!(status = reply.status, "poll rejected");
                false
            }
            Err(e) => {
                warn!(error = %e, "poll failed");
                false
            }
        }
    }

    /// Poll until exhausted or `shutdown` flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> PollExit {
        debug!(url = %self.url, "long-poll started");
        let mut empty_polls = 0u32;
        loop {
            if *shutdown.borrow() {
                return PollExit::Shutdown;
            }

            match poll_frame(&self.session) {
                Some(frame) => {
                    let delivered = tokio::select! {
                        _ = shutdown.changed() => return PollExit::Shutdown,
                        delivered = self.poll_once(frame) => delivered,
                    };

                    if delivered {
                        empty_polls = 0;
                    } else {
                        empty_polls += 1;
                        TransportStats::bump(&self.stats.empty_polls);
                        if empty_polls >= self.max_empty_polls {
                            info!(empty_polls, "long-poll stopped until re-armed");
                            return PollExit::Exhausted { empty_polls };
                        }
                    }
                }
                None => trace!("no session, poll skipped"),
            }

            tokio::select! {
                _ = shutdown.changed() => return PollExit::Shutdown,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}
