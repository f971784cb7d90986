//! Pulse Runtime
//!
//! The runtime ties together the pieces that keep a client's engines talking
//! to the back end:
//!
//! - **Scheduler and worker loop**: run each engine when its wake time
//!   arrives and suspend when there is no work
//! - **Registries**: correlate outgoing requests with decoded responses
//! - **Transport**: the persistent socket or the HTTP polling fallback,
//!   chosen by [`PulseConfig::mode`](pulse_core::PulseConfig)
//!
//! ## Usage
//!
//! ```rust,no_run
//! use pulse_core::{EngineId, NetworkStatus, PulseConfig, UiRequest};
//! use pulse_runtime::RuntimeBuilder;
//!
//! # async fn example() -> pulse_core::PulseResult<()> {
//! let handle = RuntimeBuilder::new(PulseConfig::default())
//!     .build_and_start()
//!     .await?;
//!
//! handle.set_connectivity(NetworkStatus::Available);
//! handle.reset_all().await?;
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pulse_core::{
    ConnectionState, EngineId, NetworkStatus, PulseError, PulseResult, RouterStatsSnapshot,
    SchedulerError, UiRequest,
};
use pulse_transport::{Transport, TransportContext, TransportKind, TransportStatsSnapshot};

use crate::builder::RuntimeBuilder;
use crate::worker::WorkerLoop;

// ----------------------------------------------------------------------------
// Pulse Runtime
// ----------------------------------------------------------------------------

/// A built but not yet started runtime
pub struct PulseRuntime {
    worker: Arc<WorkerLoop>,
    transport: Arc<dyn Transport>,
    services: TransportContext,
}

impl PulseRuntime {
    pub(crate) fn new(
        worker: Arc<WorkerLoop>,
        transport: Arc<dyn Transport>,
        services: TransportContext,
    ) -> Self {
        Self {
            worker,
            transport,
            services,
        }
    }

    pub fn builder(config: pulse_core::PulseConfig) -> RuntimeBuilder {
        RuntimeBuilder::new(config)
    }

    /// Create every engine, start the transport and run the first cycle
    pub async fn start(self) -> PulseResult<PulseHandle> {
        // The scheduler lock can be held by a running cycle
        let worker = Arc::clone(&self.worker);
        tokio::task::spawn_blocking(move || {
            worker.with_scheduler(|scheduler, ctx| scheduler.create_all(ctx))
        })
        .await
        .map_err(|e| PulseError::channel_error(format!("engine creation aborted: {}", e)))?;
        self.transport.start().await?;
        info!(transport = ?self.transport.kind(), "runtime started");
        self.worker.kick();
        Ok(PulseHandle {
            worker: self.worker,
            transport: self.transport,
            services: self.services,
        })
    }
}

impl std::fmt::Debug for PulseRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PulseRuntime")
            .field("transport", &self.transport.kind())
            .field("worker", &self.worker)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Runtime Handle
// ----------------------------------------------------------------------------

/// Handle for interacting with a running runtime
#[derive(Clone)]
pub struct PulseHandle {
    worker: Arc<WorkerLoop>,
    transport: Arc<dyn Transport>,
    services: TransportContext,
}

impl PulseHandle {
    /// Queue a UI request for an engine and wake the worker loop
    pub fn post_ui_request(&self, engine: EngineId, request: UiRequest) -> PulseResult<()> {
        self.worker.post_ui_request(engine, request)
    }

    /// Handle bound to one engine, for collaborators on other threads
    pub fn engine(&self, engine: EngineId) -> PulseResult<EngineHandle> {
        if !self.worker.is_registered(engine) {
            return Err(SchedulerError::EngineNotFound { engine }.into());
        }
        Ok(EngineHandle {
            engine,
            worker: Arc::clone(&self.worker),
        })
    }

    pub fn kick(&self) {
        self.worker.kick();
    }

    /// Reset every engine and wait until all have completed
    pub async fn reset_all(&self) -> PulseResult<()> {
        info!("resetting all engines");
        let barrier = self.worker.begin_reset().await?;
        barrier.wait().await
    }

    /// Report a platform connectivity change
    pub fn set_connectivity(&self, status: NetworkStatus) {
        match status {
            NetworkStatus::Available => {
                info!("network available");
                self.transport.notify_connectivity_regained();
            }
            NetworkStatus::Unavailable => debug!("network unavailable"),
        }
        self.worker.kick();
    }

    /// Forward every change on a platform connectivity channel
    pub fn watch_connectivity(&self, mut status: watch::Receiver<NetworkStatus>) -> JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            while status.changed().await.is_ok() {
                let current = *status.borrow_and_update();
                handle.set_connectivity(current);
            }
        })
    }

    pub fn notify_user_activity(&self) {
        self.transport.notify_user_activity();
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.transport.connection_state()
    }

    pub fn subscribe_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.services.subscribe_state()
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }

    pub fn transport_stats(&self) -> TransportStatsSnapshot {
        self.services.stats.snapshot()
    }

    pub fn router_stats(&self) -> RouterStatsSnapshot {
        self.services.router.stats()
    }

    pub fn worker(&self) -> &Arc<WorkerLoop> {
        &self.worker
    }

    /// Stop the worker loop and transport, then destroy every engine
    pub async fn shutdown(&self) {
        info!("shutting down runtime");
        self.worker.shutdown().await;
        self.transport.stop().await;
        let worker = Arc::clone(&self.worker);
        if let Err(e) = tokio::task::spawn_blocking(move || {
            worker.with_scheduler(|scheduler, _| scheduler.destroy_all())
        })
        .await
        {
            warn!(error = %e, "engine teardown aborted");
        }
    }
}

impl std::fmt::Debug for PulseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PulseHandle")
            .field("transport", &self.transport.kind())
            .field("services", &self.services)
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Engine Handle
// ----------------------------------------------------------------------------

/// Posts UI requests to a single engine from any thread
#[derive(Clone)]
pub struct EngineHandle {
    engine: EngineId,
    worker: Arc<WorkerLoop>,
}

impl EngineHandle {
    pub fn engine(&self) -> EngineId {
        self.engine
    }

    pub fn post(&self, request: UiRequest) -> PulseResult<()> {
        self.worker.post_ui_request(self.engine, request)
    }

    pub fn kick(&self) {
        self.worker.kick();
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}
