//! Persistent socket transport
//!
//! One reconnect task owns the connection lifecycle and the generation
//! writer. For every established connection it spawns three helper tasks
//! (reader, writer, heartbeat) stamped with the live generation, then waits
//! for one of them to report a failure. Teardown advances the generation,
//! aborts the helpers and waits for them to finish before any new
//! connection is attempted.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use pulse_core::{ConnectionState, PersistentConfig, PulseResult, ServerErrorKind};

use super::connector::{BoxedStream, Connector};
use super::heartbeat::HeartbeatSender;
use super::reader::{LinkFailure, ResponseReader};
use super::supervisor::{FailureAction, ReconnectSupervisor, ResumeAction, SupervisorState};
use super::writer::RequestWriter;
use crate::decoder::ResponseDecoder;
use crate::generation::{generation_pair, GenerationWriter};
use crate::stats::TransportStats;
use crate::transport::{Transport, TransportContext, TransportKind};

/// Message attached to synthetic errors after recovery is abandoned
const COMMS_FAILURE_MESSAGE: &str = "connection lost, retries exhausted";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    ConnectivityRegained,
    UserActivity,
    Stop,
}

struct Running {
    control: mpsc::UnboundedSender<Control>,
    task: JoinHandle<()>,
}

// ----------------------------------------------------------------------------
// Persistent Transport
// ----------------------------------------------------------------------------

/// Long-lived stream transport kept alive with heartbeats
pub struct PersistentTransport {
    config: PersistentConfig,
    connector: Arc<dyn Connector>,
    ctx: TransportContext,
    running: Mutex<Option<Running>>,
}

impl PersistentTransport {
    pub fn new(config: PersistentConfig, connector: Arc<dyn Connector>, ctx: TransportContext) -> Self {
        Self {
            config,
            connector,
            ctx,
            running: Mutex::new(None),
        }
    }

    pub fn context(&self) -> &TransportContext {
        &self.ctx
    }

    fn running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send_control(&self, control: Control) {
        if let Some(running) = self.running().as_ref() {
            let _ = running.control.send(control);
        }
    }
}

#[async_trait]
impl Transport for PersistentTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Persistent
    }

    async fn start(&self) -> PulseResult<()> {
        let mut running = self.running();
        if running.as_ref().is_some_and(|r| !r.task.is_finished()) {
            return Ok(());
        }

        let (control, commands) = mpsc::unbounded_channel();
        let (generation, _) = generation_pair();
        let task = ReconnectTask {
            supervisor: ReconnectSupervisor::new(&self.config),
            config: self.config.clone(),
            connector: Arc::clone(&self.connector),
            decoder: self.ctx.decoder(),
            ctx: self.ctx.clone(),
            generation,
            commands,
        };
        info!(endpoint = %self.connector.endpoint(), "starting persistent transport");
        *running = Some(Running {
            control,
            task: tokio::spawn(task.run()),
        });
        Ok(())
    }

    async fn stop(&self) {
        let Some(running) = self.running().take() else {
            return;
        };
        let _ = running.control.send(Control::Stop);
        if let Err(e) = running.task.await {
            warn!(error = %e, "persistent transport task ended abnormally");
        }
        self.ctx.set_state(ConnectionState::Disconnected);
    }

    fn notify_items_queued(&self) {
        self.ctx.queue.notify_submitted();
    }

    fn notify_connectivity_regained(&self) {
        self.send_control(Control::ConnectivityRegained);
    }

    fn notify_user_activity(&self) {
        self.send_control(Control::UserActivity);
    }

    fn connection_state(&self) -> ConnectionState {
        self.ctx.connection_state()
    }
}

// ----------------------------------------------------------------------------
// Reconnect Task
// ----------------------------------------------------------------------------

/// Helper tasks serving one connection
struct Link {
    generation: u64,
    handles: Vec<JoinHandle<()>>,
}

/// Why a connected phase ended
enum LinkEnd {
    Failed(LinkFailure),
    Stopped,
}

struct ReconnectTask {
    supervisor: ReconnectSupervisor,
    config: PersistentConfig,
    connector: Arc<dyn Connector>,
    decoder: ResponseDecoder,
    ctx: TransportContext,
    generation: GenerationWriter,
    commands: mpsc::UnboundedReceiver<Control>,
}

impl ReconnectTask {
    async fn run(mut self) {
        let (failures_tx, mut failures_rx) = mpsc::unbounded_channel();
        // Deadline of the next attempt; None while waiting for a resume signal
        let mut next_attempt = Some(Instant::now());

        'outer: loop {
            // Wait for the next attempt
            loop {
                let command = match next_attempt {
                    Some(deadline) => tokio::select! {
                        _ = sleep_until(deadline) => break,
                        command = self.commands.recv() => command,
                    },
                    None => self.commands.recv().await,
                };
                match command {
                    None | Some(Control::Stop) => break 'outer,
                    Some(signal) => {
                        if let Some(deadline) = self.on_resume(signal) {
                            next_attempt = Some(match next_attempt {
                                Some(current) => current.min(deadline),
                                None => deadline,
                            });
                        }
                    }
                }
            }

            // Attempt a connection
            self.ctx.set_state(ConnectionState::Connecting);
            self.supervisor.record_attempt(self.ctx.time.now());
            TransportStats::bump(&self.ctx.stats.connect_attempts);
            let attempt = {
                let connect = self.connector.connect();
                tokio::pin!(connect);
                loop {
                    tokio::select! {
                        result = &mut connect => break Some(result),
                        command = self.commands.recv() => match command {
                            None | Some(Control::Stop) => break None,
                            Some(signal) => debug!(?signal, "resume signal while connecting"),
                        },
                    }
                }
            };
            let Some(attempt) = attempt else {
                break 'outer;
            };

            let stream = match attempt {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(endpoint = %self.connector.endpoint(), error = %e, "connect failed");
                    next_attempt = self.on_failure();
                    continue;
                }
            };

            // Connected
            self.supervisor.on_connected();
            TransportStats::bump(&self.ctx.stats.connections_established);
            let requeued = self.ctx.queue.requeue_active();
            if requeued > 0 {
                debug!(requeued, "resending requests from previous connection");
            }
            let link = self.spawn_link(stream, &failures_tx);
            self.ctx.set_state(ConnectionState::Connected);

            let end = loop {
                tokio::select! {
                    failure = failures_rx.recv() => match failure {
                        Some(failure) if failure.generation == link.generation => {
                            break LinkEnd::Failed(failure);
                        }
                        Some(stale) => debug!(generation = stale.generation, "stale failure ignored"),
                        None => break LinkEnd::Stopped,
                    },
                    command = self.commands.recv() => match command {
                        None | Some(Control::Stop) => break LinkEnd::Stopped,
                        Some(signal) => debug!(?signal, "resume signal while connected"),
                    },
                }
            };

            self.teardown(link).await;
            match end {
                LinkEnd::Stopped => break 'outer,
                LinkEnd::Failed(failure) => {
                    warn!(origin = failure.origin, error = %failure.error, "connection failed");
                    next_attempt = self.on_failure();
                }
            }
        }

        self.generation.advance();
        self.ctx.set_state(ConnectionState::Disconnected);
        debug!("reconnect task exited");
    }

    /// Deadline for the attempt a resume signal asks for
    fn on_resume(&mut self, signal: Control) -> Option<Instant> {
        match self.supervisor.on_resume_signal(self.ctx.time.now()) {
            ResumeAction::Reconnect => {
                info!(?signal, "resuming connection attempts");
                Some(Instant::now())
            }
            ResumeAction::Defer(delay) => {
                debug!(?signal, delay_ms = delay.as_millis() as u64, "resume deferred");
                Some(Instant::now() + delay)
            }
            ResumeAction::Ignore => None,
        }
    }

    /// Deadline of the next attempt after a failure, or None once given up
    fn on_failure(&mut self) -> Option<Instant> {
        match self.supervisor.on_failure() {
            FailureAction::Backoff(delay) => {
                self.ctx.set_state(ConnectionState::Connecting);
                Some(Instant::now() + delay)
            }
            FailureAction::GiveUp => {
                let failed = self
                    .decoder
                    .fail_all_in_flight(ServerErrorKind::CommsFailure, COMMS_FAILURE_MESSAGE);
                warn!(failed, "persistent transport disconnected");
                debug_assert_eq!(self.supervisor.state(), SupervisorState::Disconnected);
                self.ctx.set_state(ConnectionState::Disconnected);
                None
            }
        }
    }

    fn spawn_link(
        &mut self,
        stream: BoxedStream,
        failures: &mpsc::UnboundedSender<LinkFailure>,
    ) -> Link {
        let reader = self.generation.reader();
        let generation = reader.current();
        let (read_half, write_half) = tokio::io::split(stream);
        let writer = Arc::new(AsyncMutex::new(write_half));

        let response_reader = ResponseReader {
            stamp: reader.stamp(),
            reader: read_half,
            decoder: self.decoder.clone(),
            max_payload: self.config.max_payload_size,
            failures: failures.clone(),
            stats: Arc::clone(&self.ctx.stats),
        };
        let request_writer = RequestWriter {
            stamp: reader.stamp(),
            writer: Arc::clone(&writer),
            queue: Arc::clone(&self.ctx.queue),
            failures: failures.clone(),
            stats: Arc::clone(&self.ctx.stats),
        };
        let heartbeat = HeartbeatSender {
            stamp: reader.stamp(),
            writer,
            session: self.ctx.session.clone(),
            platform: self.ctx.platform.clone(),
            time: Arc::clone(&self.ctx.time),
            interval: self.config.heartbeat_interval(),
            failures: failures.clone(),
            stats: Arc::clone(&self.ctx.stats),
        };

        debug!(generation, "connection established, spawning helpers");
        Link {
            generation,
            handles: vec![
                tokio::spawn(response_reader.run()),
                tokio::spawn(request_writer.run()),
                tokio::spawn(heartbeat.run()),
            ],
        }
    }

    async fn teardown(&mut self, link: Link) {
        let next = self.generation.advance();
        for handle in &link.handles {
            handle.abort();
        }
        // Helpers must be gone before their requests can be requeued
        join_all(link.handles).await;
        self.ctx.platform.alarm.cancel();
        debug!(retired = link.generation, next, "connection torn down");
    }
}

impl std::fmt::Debug for PersistentTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentTransport")
            .field("endpoint", &self.connector.endpoint())
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}
