//! Reset barrier
//!
//! A global reset asks every engine to wind down and waits until all of them
//! have signalled completion. Engines may complete immediately inside
//! `on_reset` or later from a subsequent `run()`.

use futures::future::join_all;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use pulse_core::{EngineId, PulseResult, SchedulerError};

/// Pending reset completions for a set of engines
#[derive(Debug, Default)]
pub struct ResetBarrier {
    pending: Vec<(EngineId, oneshot::Receiver<()>)>,
}

impl ResetBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, engine: EngineId, receiver: oneshot::Receiver<()>) {
        self.pending.push((engine, receiver));
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Wait for every engine to complete its reset
    ///
    /// Fails with [`SchedulerError::ResetAbandoned`] naming the first engine
    /// that dropped its completion without signalling it.
    pub async fn wait(self) -> PulseResult<()> {
        let engines: Vec<EngineId> = self.pending.iter().map(|(id, _)| *id).collect();
        let results = join_all(self.pending.into_iter().map(|(_, rx)| rx)).await;

        let mut abandoned = None;
        for (engine, result) in engines.into_iter().zip(results) {
            if result.is_err() {
                warn!(engine = %engine, "engine dropped its reset completion");
                abandoned.get_or_insert(engine);
            }
        }
        match abandoned {
            Some(engine) => Err(SchedulerError::ResetAbandoned { engine }.into()),
            None => {
                debug!("all engines reset");
                Ok(())
            }
        }
    }
}
