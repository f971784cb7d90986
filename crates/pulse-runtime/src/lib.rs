//! Pulse Runtime
//!
//! The cooperative side of the pulse client runtime:
//! - `Scheduler`: runs each registered engine when its wake time arrives
//! - `WorkerLoop`: the single control task driving the scheduler, with
//!   kick coalescing and a spin cap
//! - `ResetBarrier`: waits for every engine to wind down on a global reset
//! - `PulseRuntime` / `PulseHandle`: assembly and the embedding API

pub mod builder;
pub mod reset;
mod runtime;
pub mod scheduler;
pub mod worker;

pub use builder::RuntimeBuilder;
pub use reset::ResetBarrier;
pub use runtime::{EngineHandle, PulseHandle, PulseRuntime};
pub use scheduler::Scheduler;
pub use worker::{LoopDecision, LoopGovernor, LoopSignal, WorkerLoop};

// Re-export core types for convenience
pub use pulse_core::{
    ConnectionState, Engine, EngineContext, EngineCore, EngineId, NetworkStatus, NextRun,
    PulseConfig, PulseError, PulseResult, ResetCompletion, UiRequest,
};
