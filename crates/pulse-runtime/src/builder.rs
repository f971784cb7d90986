//! Runtime Builder
//!
//! Assembles the registries, the transport selected by configuration, the
//! scheduler and the worker loop into a [`PulseRuntime`].

use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::info;

use pulse_core::{
    Engine, Platform, PulseConfig, PulseError, PulseResult, RequestQueue, ResponseRouter,
    SessionHandle, SystemTimeSource, TimeSource, TransportMode,
};
use pulse_transport::{
    Connector, HttpExchange, PersistentTransport, PollingTransport, ReqwestExchange,
    TcpConnector, Transport, TransportContext,
};

use crate::runtime::{PulseHandle, PulseRuntime};
use crate::scheduler::Scheduler;
use crate::worker::{LoopSignal, WorkerLoop};

// ----------------------------------------------------------------------------
// Runtime Builder
// ----------------------------------------------------------------------------

/// Builder for configuring and creating a pulse runtime
pub struct RuntimeBuilder {
    config: PulseConfig,
    engines: Vec<Box<dyn Engine>>,
    session: SessionHandle,
    platform: Platform,
    time: Arc<dyn TimeSource>,
    connector: Option<Arc<dyn Connector>>,
    exchange: Option<Arc<dyn HttpExchange>>,
}

impl RuntimeBuilder {
    pub fn new(config: PulseConfig) -> Self {
        Self {
            config,
            engines: Vec::new(),
            session: SessionHandle::new(),
            platform: Platform::noop(),
            time: Arc::new(SystemTimeSource::new()),
            connector: None,
            exchange: None,
        }
    }

    /// Register an engine; engines run in the order they are added
    pub fn with_engine<E: Engine + 'static>(mut self, engine: E) -> Self {
        self.engines.push(Box::new(engine));
        self
    }

    pub fn with_boxed_engine(mut self, engine: Box<dyn Engine>) -> Self {
        self.engines.push(engine);
        self
    }

    /// Share a session handle with whoever performs login
    pub fn with_session(mut self, session: SessionHandle) -> Self {
        self.session = session;
        self
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_time_source(mut self, time: Arc<dyn TimeSource>) -> Self {
        self.time = time;
        self
    }

    /// Replace the TCP connector used in persistent mode
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Replace the HTTP client used in polling mode
    pub fn with_http_exchange(mut self, exchange: Arc<dyn HttpExchange>) -> Self {
        self.exchange = Some(exchange);
        self
    }

    /// Build the runtime without starting it
    ///
    /// Must be called inside a tokio runtime; the worker loop spawns onto it.
    pub fn build(self) -> PulseResult<PulseRuntime> {
        self.config.validate()?;
        let handle = Handle::try_current()
            .map_err(|e| PulseError::config_error(format!("no tokio runtime available: {}", e)))?;

        let signal = Arc::new(LoopSignal::new(handle));
        let queue = Arc::new(RequestQueue::new());
        let router = Arc::new(ResponseRouter::new(signal.clone()));
        let max_payload = match self.config.mode {
            TransportMode::Persistent => self.config.persistent.max_payload_size,
            TransportMode::Polling => self.config.polling.max_payload_size,
        };
        let services = TransportContext::new(queue, Arc::clone(&router), self.session)
            .with_platform(self.platform)
            .with_time_source(self.time)
            .with_kicker(signal.clone())
            .with_max_payload(max_payload);

        let mut scheduler = Scheduler::new();
        for engine in self.engines {
            scheduler.register(engine, &router)?;
        }

        let transport: Arc<dyn Transport> = match self.config.mode {
            TransportMode::Persistent => {
                let connector: Arc<dyn Connector> = match self.connector {
                    Some(connector) => connector,
                    None => Arc::new(TcpConnector::from_config(&self.config.persistent)),
                };
                Arc::new(PersistentTransport::new(
                    self.config.persistent.clone(),
                    connector,
                    services.clone(),
                ))
            }
            TransportMode::Polling => {
                let exchange: Arc<dyn HttpExchange> = match self.exchange {
                    Some(exchange) => exchange,
                    None => Arc::new(ReqwestExchange::new(self.config.polling.request_timeout())?),
                };
                Arc::new(PollingTransport::new(
                    self.config.polling.clone(),
                    exchange,
                    services.clone(),
                ))
            }
        };

        info!(
            mode = ?self.config.mode,
            engines = scheduler.len(),
            "runtime built"
        );
        let worker = WorkerLoop::new(self.config.scheduler.clone(), scheduler, &services, signal);
        Ok(PulseRuntime::new(worker, transport, services))
    }

    /// Build and start the runtime in one step
    pub async fn build_and_start(self) -> PulseResult<PulseHandle> {
        self.build()?.start().await
    }
}

impl std::fmt::Debug for RuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeBuilder")
            .field("mode", &self.config.mode)
            .field("engines", &self.engines.len())
            .finish_non_exhaustive()
    }
}
