//! Worker loop
//!
//! A single logical control thread drives the scheduler. The loop runs
//! cycles back to back while engines keep reporting work, sleeps until the
//! earliest wake time when nothing is due, and exits entirely when no engine
//! has pending work. Any kick (a UI request, a decoded response, a
//! connection state change) starts a fresh loop if none is running, or
//! interrupts the current sleep.
//!
//! After too many consecutive non-suspending cycles the loop is forced into
//! a cool-down: its wake time becomes now plus the configured pause. Kicks
//! that arrive during the cool-down still end it; kicks left over from the
//! spinning cycles do not.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::Duration;

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use pulse_core::{
    ConnectionState, EngineContext, EngineId, Kick, NextRun, PulseError, PulseResult,
    RequestQueue, ResponseRouter, SchedulerConfig, SchedulerError, SessionHandle, TimeSource,
    Timestamp, UiRequest,
};
use pulse_transport::TransportContext;

use crate::reset::ResetBarrier;
use crate::scheduler::Scheduler;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ----------------------------------------------------------------------------
// Loop Governor
// ----------------------------------------------------------------------------

/// What the loop does after a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopDecision {
    /// Run the next cycle immediately
    Continue,
    /// Sleep until the given time or until kicked
    SleepUntil(Timestamp),
    /// Forced pause after the spin cap; a fresh kick or shutdown ends it
    Cooldown(Timestamp),
    /// Exit the loop until the next kick
    Suspend,
}

/// Turns cycle results into loop decisions, enforcing the spin cap
#[derive(Debug, Clone)]
pub struct LoopGovernor {
    max_spin_cycles: u32,
    cooldown: Duration,
    spins: u32,
}

impl LoopGovernor {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            max_spin_cycles: config.max_spin_cycles,
            cooldown: config.cooldown(),
            spins: 0,
        }
    }

    /// Consecutive non-suspending cycles so far
    pub fn spins(&self) -> u32 {
        self.spins
    }

    pub fn after_cycle(&mut self, result: NextRun, now: Timestamp) -> LoopDecision {
        match result {
            NextRun::Now => {
                self.spins += 1;
                if self.spins > self.max_spin_cycles {
                    warn!(
                        cycles = self.spins,
                        cooldown_ms = self.cooldown.as_millis() as u64,
                        "engines spinning, forcing cool-down"
                    );
                    self.spins = 0;
                    LoopDecision::Cooldown(now.saturating_add(self.cooldown))
                } else {
                    LoopDecision::Continue
                }
            }
            NextRun::At(at) => {
                self.spins = 0;
                LoopDecision::SleepUntil(at)
            }
            NextRun::Never => {
                self.spins = 0;
                LoopDecision::Suspend
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Loop Signal
// ----------------------------------------------------------------------------

/// Kick target shared with the router and the transport
///
/// Owns the "loop running" flag so a kick from any thread either wakes the
/// current loop or launches a new one, never both.
pub struct LoopSignal {
    running: AtomicBool,
    kicked: AtomicBool,
    wake: Notify,
    kicks: AtomicU64,
    runtime: Handle,
    worker: OnceLock<Weak<WorkerLoop>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LoopSignal {
    /// Create a signal that spawns loops on `runtime`
    pub fn new(runtime: Handle) -> Self {
        Self {
            running: AtomicBool::new(false),
            kicked: AtomicBool::new(false),
            wake: Notify::new(),
            kicks: AtomicU64::new(0),
            runtime,
            worker: OnceLock::new(),
            task: Mutex::new(None),
        }
    }

    /// Total kicks received
    pub fn kicks(&self) -> u64 {
        self.kicks.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn claim(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn launch(&self) {
        let Some(worker) = self.worker.get().and_then(Weak::upgrade) else {
            // Worker gone: nothing left to drive
            self.running.store(false, Ordering::SeqCst);
            return;
        };
        if worker.is_shut_down() {
            self.running.store(false, Ordering::SeqCst);
            return;
        }
        trace!("launching worker loop");
        worker.loops_started.fetch_add(1, Ordering::Relaxed);
        let task = self.runtime.spawn(worker.drive());
        *lock(&self.task) = Some(task);
    }
}

impl Kick for LoopSignal {
    fn kick(&self) {
        self.kicks.fetch_add(1, Ordering::Relaxed);
        self.kicked.store(true, Ordering::SeqCst);
        self.wake.notify_one();
        if self.claim() {
            self.launch();
        }
    }
}

impl std::fmt::Debug for LoopSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopSignal")
            .field("running", &self.is_running())
            .field("kicks", &self.kicks())
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Worker Loop
// ----------------------------------------------------------------------------

enum Command {
    UiRequest { engine: EngineId, request: UiRequest },
    Reset(oneshot::Sender<ResetBarrier>),
}

/// Drives the scheduler from a single control task at a time
pub struct WorkerLoop {
    config: SchedulerConfig,
    scheduler: Mutex<Scheduler>,
    registered: HashSet<EngineId>,
    commands: Mutex<VecDeque<Command>>,
    signal: Arc<LoopSignal>,

    // Services lent to engines each cycle
    queue: Arc<RequestQueue>,
    router: Arc<ResponseRouter>,
    session: SessionHandle,
    connection: watch::Receiver<ConnectionState>,
    time: Arc<dyn TimeSource>,

    shutdown: AtomicBool,
    shutdown_notify: Notify,

    // Counters
    cycles: AtomicU64,
    cooldowns: AtomicU64,
    loops_started: AtomicU64,
}

impl WorkerLoop {
    /// Wire a loop to `signal`; the loop first runs on the next kick
    pub fn new(
        config: SchedulerConfig,
        scheduler: Scheduler,
        services: &TransportContext,
        signal: Arc<LoopSignal>,
    ) -> Arc<Self> {
        let registered = scheduler.engine_ids().into_iter().collect();
        let worker = Arc::new(Self {
            config,
            scheduler: Mutex::new(scheduler),
            registered,
            commands: Mutex::new(VecDeque::new()),
            signal: Arc::clone(&signal),
            queue: Arc::clone(&services.queue),
            router: Arc::clone(&services.router),
            session: services.session.clone(),
            connection: services.subscribe_state(),
            time: Arc::clone(&services.time),
            shutdown: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
            cycles: AtomicU64::new(0),
            cooldowns: AtomicU64::new(0),
            loops_started: AtomicU64::new(0),
        });
        if signal.worker.set(Arc::downgrade(&worker)).is_err() {
            warn!("loop signal already bound to a worker");
        }
        worker
    }

    pub fn signal(&self) -> &Arc<LoopSignal> {
        &self.signal
    }

    pub fn kick(&self) {
        self.signal.kick();
    }

    pub fn is_registered(&self, engine: EngineId) -> bool {
        self.registered.contains(&engine)
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn cooldowns(&self) -> u64 {
        self.cooldowns.load(Ordering::Relaxed)
    }

    /// Number of times a loop was launched from a suspended state
    pub fn loops_started(&self) -> u64 {
        self.loops_started.load(Ordering::Relaxed)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Run `f` against the scheduler with a fresh engine context
    ///
    /// Blocks while a cycle is in progress.
    pub fn with_scheduler<R>(&self, f: impl FnOnce(&mut Scheduler, &EngineContext<'_>) -> R) -> R {
        let mut scheduler = lock(&self.scheduler);
        let ctx = self.context();
        f(&mut scheduler, &ctx)
    }

    fn context(&self) -> EngineContext<'_> {
        EngineContext {
            now: self.time.now(),
            connection: *self.connection.borrow(),
            queue: &self.queue,
            router: &self.router,
            session: &self.session,
        }
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Queue a UI request for one engine and kick the loop
    pub fn post_ui_request(&self, engine: EngineId, request: UiRequest) -> PulseResult<()> {
        if !self.is_registered(engine) {
            return Err(SchedulerError::EngineNotFound { engine }.into());
        }
        if self.is_shut_down() {
            return Err(PulseError::channel_error("worker loop shut down"));
        }
        lock(&self.commands).push_back(Command::UiRequest { engine, request });
        self.kick();
        Ok(())
    }

    /// Start a reset on the loop and hand back its barrier
    pub async fn begin_reset(&self) -> PulseResult<ResetBarrier> {
        if self.is_shut_down() {
            return Err(PulseError::channel_error("worker loop shut down"));
        }
        let (tx, rx) = oneshot::channel();
        lock(&self.commands).push_back(Command::Reset(tx));
        self.kick();
        rx.await
            .map_err(|_| PulseError::channel_error("worker loop stopped before reset began"))
    }

    fn drain_commands(&self) -> Vec<Command> {
        lock(&self.commands).drain(..).collect()
    }

    // ------------------------------------------------------------------------
    // Cycle
    // ------------------------------------------------------------------------

    /// One scheduler cycle; runs on a blocking thread
    fn cycle(&self) -> NextRun {
        let mut scheduler = lock(&self.scheduler);
        let ctx = self.context();

        let mut reset_started = false;
        for command in self.drain_commands() {
            match command {
                Command::UiRequest { engine, request } => {
                    if let Err(e) = scheduler.deliver_ui_request(engine, request) {
                        warn!(engine = %engine, error = %e, "ui request dropped");
                    }
                }
                Command::Reset(reply) => {
                    let barrier = scheduler.begin_reset(&ctx);
                    reset_started = true;
                    // Caller stopped waiting; the reset still runs
                    let _ = reply.send(barrier);
                }
            }
        }

        self.cycles.fetch_add(1, Ordering::Relaxed);
        let next = scheduler.run_cycle(&ctx);
        if reset_started {
            // Engines completing asynchronously need another look
            next.earliest(NextRun::Now)
        } else {
            next
        }
    }

    async fn drive(self: Arc<Self>) {
        debug!("worker loop started");
        let mut governor = LoopGovernor::new(&self.config);
        loop {
            if self.is_shut_down() {
                break;
            }
            self.signal.kicked.store(false, Ordering::SeqCst);

            let worker = Arc::clone(&self);
            let result = match tokio::task::spawn_blocking(move || worker.cycle()).await {
                Ok(result) => result,
                Err(e) => {
                    error!(error = %e, "scheduler cycle aborted");
                    NextRun::Never
                }
            };

            let now = self.time.now();
            match governor.after_cycle(result, now) {
                LoopDecision::Continue => tokio::task::yield_now().await,
                LoopDecision::SleepUntil(at) => {
                    let delay = at.saturating_duration_since(now);
                    trace!(delay_ms = delay.as_millis() as u64, "worker loop sleeping");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.signal.wake.notified() => {}
                        _ = self.shutdown_notify.notified() => {}
                    }
                }
                LoopDecision::Cooldown(until) => {
                    self.cooldowns.fetch_add(1, Ordering::Relaxed);
                    // Drop the wake permit the spinning cycles left behind
                    let _ = self.signal.wake.notified().now_or_never();
                    let delay = until.saturating_duration_since(now);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.signal.wake.notified() => debug!("cool-down ended by kick"),
                        _ = self.shutdown_notify.notified() => {}
                    }
                }
                LoopDecision::Suspend => {
                    self.signal.running.store(false, Ordering::SeqCst);
                    // A kick that raced the last cycle keeps this loop alive
                    if self.signal.kicked.load(Ordering::SeqCst)
                        && !self.is_shut_down()
                        && self.signal.claim()
                    {
                        trace!("kick arrived while suspending, continuing");
                        continue;
                    }
                    debug!("worker loop suspended");
                    return;
                }
            }
        }
        self.signal.running.store(false, Ordering::SeqCst);
        debug!("worker loop stopped");
    }

    /// Stop the loop and wait for the running task to finish
    pub async fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown_notify.notify_one();
        self.signal.wake.notify_one();
        let task = lock(&self.signal.task).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "worker loop ended abnormally");
            }
        }
        // Pending resets are answered by dropping their senders
        self.drain_commands();
    }
}

impl std::fmt::Debug for WorkerLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerLoop")
            .field("signal", &self.signal)
            .field("cycles", &self.cycles())
            .field("shutdown", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
