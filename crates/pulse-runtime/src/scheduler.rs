//! Cooperative engine scheduler
//!
//! Holds every registered engine and runs, once per cycle, each engine whose
//! wake time has arrived. The cycle result tells the worker loop how long it
//! may suspend:
//!
//! - `Now` when at least one engine ran this cycle
//! - `At(t)` with the earliest future wake time when nothing was due
//! - `Never` when no engine has pending work
//!
//! Engines are visited in registration order and never concurrently.

use std::collections::HashSet;

use tracing::{debug, info, trace, warn};

use pulse_core::{
    Engine, EngineContext, EngineId, NextRun, PulseResult, ResetCompletion, ResponseRouter,
    SchedulerError, UiRequest,
};

use crate::reset::ResetBarrier;

/// Ordered set of engines driven by the worker loop
#[derive(Default)]
pub struct Scheduler {
    engines: Vec<Box<dyn Engine>>,
    ids: HashSet<EngineId>,
    cycles: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an engine and its push interest
    pub fn register(&mut self, engine: Box<dyn Engine>, router: &ResponseRouter) -> PulseResult<()> {
        let id = engine.id();
        if !self.ids.insert(id) {
            return Err(SchedulerError::DuplicateEngine { engine: id }.into());
        }
        router.subscribe_push(id, engine.push_interest());
        info!(engine = %id, "engine registered");
        self.engines.push(engine);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    pub fn contains(&self, id: EngineId) -> bool {
        self.ids.contains(&id)
    }

    /// Registered engine ids in scheduling order
    pub fn engine_ids(&self) -> Vec<EngineId> {
        self.engines.iter().map(|e| e.id()).collect()
    }

    /// Number of cycles run so far
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn create_all(&mut self, ctx: &EngineContext<'_>) {
        for engine in &mut self.engines {
            engine.on_create(ctx);
        }
    }

    pub fn destroy_all(&mut self) {
        for engine in &mut self.engines {
            debug!(engine = %engine.id(), "destroying engine");
            engine.on_destroy();
        }
    }

    /// Hand a UI request to one engine's inbox
    pub fn deliver_ui_request(&mut self, id: EngineId, request: UiRequest) -> PulseResult<()> {
        let engine = self
            .engines
            .iter_mut()
            .find(|e| e.id() == id)
            .ok_or(SchedulerError::EngineNotFound { engine: id })?;
        trace!(engine = %id, kind = request.kind, "ui request delivered");
        engine.accept_ui_request(request);
        Ok(())
    }

    /// Run every due engine once and report the next wake time
    pub fn run_cycle(&mut self, ctx: &EngineContext<'_>) -> NextRun {
        self.cycles += 1;
        let mut ran_any = false;
        let mut earliest = NextRun::Never;

        for engine in &mut self.engines {
            match engine.next_run_time(ctx) {
                NextRun::Never => {}
                NextRun::At(at) if at > ctx.now => {
                    earliest = earliest.earliest(NextRun::At(at));
                }
                _ => {
                    trace!(engine = %engine.id(), "running engine");
                    engine.run(ctx);
                    ran_any = true;
                }
            }
        }

        if ran_any {
            NextRun::Now
        } else {
            earliest
        }
    }

    /// Ask every engine to reset, collecting their completions
    pub fn begin_reset(&mut self, ctx: &EngineContext<'_>) -> ResetBarrier {
        let mut barrier = ResetBarrier::new();
        for engine in &mut self.engines {
            let id = engine.id();
            let (completion, receiver) = ResetCompletion::new(id);
            barrier.push(id, receiver);
            engine.on_reset(ctx, completion);
        }
        if barrier.is_empty() {
            warn!("reset requested with no engines registered");
        } else {
            info!(engines = barrier.len(), "reset started");
        }
        barrier
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("engines", &self.engine_ids())
            .field("cycles", &self.cycles)
            .finish()
    }
}
