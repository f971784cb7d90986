//! Wake primitive for the worker loop
//!
//! Anything that produces work for engines (a queued UI request, a decoded
//! response, a connectivity change) kicks the loop through this trait.

/// Resume a suspended worker loop, coalescing with any cycle in progress
pub trait Kick: Send + Sync {
    fn kick(&self);
}

/// Kick target that ignores every kick
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopKick;

impl Kick for NoopKick {
    fn kick(&self) {}
}
