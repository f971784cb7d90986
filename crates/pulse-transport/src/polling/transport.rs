//! Polling transport: batched request POSTs plus a long-poll loop

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pulse_core::{ConnectionState, PollingConfig, PulseError, PulseResult, TransportError};

use super::batch::BatchSender;
use super::http::HttpExchange;
use super::poller::{LongPoller, PollExit};
use crate::transport::{Transport, TransportContext, TransportKind};

struct Running {
    shutdown: watch::Sender<bool>,
    batch_task: JoinHandle<()>,
    poll_task: Option<JoinHandle<PollExit>>,
}

/// HTTP fallback transport
pub struct PollingTransport {
    config: PollingConfig,
    exchange: Arc<dyn HttpExchange>,
    ctx: TransportContext,
    running: Mutex<Option<Running>>,
}

impl PollingTransport {
    pub fn new(config: PollingConfig, exchange: Arc<dyn HttpExchange>, ctx: TransportContext) -> Self {
        Self {
            config,
            exchange,
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

    fn batch_sender(&self) -> BatchSender {
        BatchSender::new(
            Arc::clone(&self.exchange),
            self.config.rpg_url.clone(),
            self.config.max_post_retries,
            Arc::clone(&self.ctx.queue),
            self.ctx.decoder(),
            Arc::clone(&self.ctx.stats),
        )
    }

    fn poller(&self) -> LongPoller {
        LongPoller {
            exchange: Arc::clone(&self.exchange),
            url: self.config.poll_url.clone(),
            decoder: self.ctx.decoder(),
            session: self.ctx.session.clone(),
            max_empty_polls: self.config.max_empty_polls.max(1),
            interval: self.config.poll_interval(),
            stats: Arc::clone(&self.ctx.stats),
        }
    }

    /// Whether the long-poll loop is currently running
    pub fn is_polling(&self) -> bool {
        self.running()
            .as_ref()
            .and_then(|r| r.poll_task.as_ref())
            .is_some_and(|task| !task.is_finished())
    }

    /// Accept requests again and restart the long-poll loop if it stopped
    fn rearm(&self) {
        let mut running = self.running();
        let Some(running) = running.as_mut() else {
            return;
        };
        self.ctx.set_state(ConnectionState::Connected);
        if running.poll_task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        info!("re-arming long-poll");
        let poller = self.poller();
        running.poll_task = Some(tokio::spawn(poller.run(running.shutdown.subscribe())));
    }
}

async fn batch_loop(sender: BatchSender, ctx: TransportContext, mut shutdown: watch::Receiver<bool>) {
    loop {
        match sender.send_pending().await {
            Ok(0) => {}
            Ok(sent) => {
                debug!(sent, "batch delivered");
                ctx.set_state(ConnectionState::Connected);
            }
            Err(PulseError::Transport(TransportError::RetriesExhausted { attempts })) => {
                warn!(attempts, "batch endpoint unreachable");
                ctx.set_state(ConnectionState::Disconnected);
            }
            Err(e) => warn!(error = %e, "batch failed"),
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ctx.queue.wait_submitted() => {}
        }
        if *shutdown.borrow() {
            break;
        }
    }
    debug!("batch loop exited");
}

#[async_trait]
impl Transport for PollingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Polling
    }

    async fn start(&self) -> PulseResult<()> {
        {
            let mut running = self.running();
            if running.is_some() {
                return Ok(());
            }
            let (shutdown, shutdown_rx) = watch::channel(false);
            info!(rpg = %self.config.rpg_url, poll = %self.config.poll_url, "starting polling transport");
            let batch_task = tokio::spawn(batch_loop(
                self.batch_sender(),
                self.ctx.clone(),
                shutdown_rx,
            ));
            *running = Some(Running {
                shutdown,
                batch_task,
                poll_task: None,
            });
        }
        self.rearm();
        Ok(())
    }

    async fn stop(&self) {
        let Some(running) = self.running().take() else {
            return;
        };
        let _ = running.shutdown.send(true);
        if let Err(e) = running.batch_task.await {
            warn!(error = %e, "batch loop ended abnormally");
        }
        if let Some(task) = running.poll_task {
            match task.await {
                Ok(exit) => debug!(?exit, "long-poll exited"),
                Err(e) => warn!(error = %e, "long-poll ended abnormally"),
            }
        }
        self.ctx.set_state(ConnectionState::Disconnected);
    }

    fn notify_items_queued(&self) {
        self.ctx.queue.notify_submitted();
    }

    fn notify_connectivity_regained(&self) {
        self.rearm();
    }

    fn notify_user_activity(&self) {
        self.rearm();
    }

    fn connection_state(&self) -> ConnectionState {
        self.ctx.connection_state()
    }
}

impl std::fmt::Debug for PollingTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingTransport")
            .field("rpg_url", &self.config.rpg_url)
            .field("poll_url", &self.config.poll_url)
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}
