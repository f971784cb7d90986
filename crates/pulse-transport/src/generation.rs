//! Generation tokens for persistent transport helper tasks
//!
//! Every helper task spawned for a connection captures a [`GenerationStamp`]
//! at spawn time. The reconnect task holds the only [`GenerationWriter`] and
//! advances the counter when it tears a connection down; stamps taken before
//! the advance stop being live and their tasks retire themselves.
//!
//! Reads are a single atomic load, so the hot path never takes a lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Debug)]
struct Shared {
    current: AtomicU64,
    retired: Notify,
}

/// Create the single writer and a reader for a fresh generation counter
pub fn generation_pair() -> (GenerationWriter, GenerationReader) {
    let shared = Arc::new(Shared {
        current: AtomicU64::new(1),
        retired: Notify::new(),
    });
    (
        GenerationWriter {
            shared: Arc::clone(&shared),
        },
        GenerationReader { shared },
    )
}

// ----------------------------------------------------------------------------
// Writer
// ----------------------------------------------------------------------------

/// Sole owner of generation transitions
///
/// Not `Clone`: only the task driving reconnects may advance the counter.
#[derive(Debug)]
pub struct GenerationWriter {
    shared: Arc<Shared>,
}

impl GenerationWriter {
    pub fn current(&self) -> u64 {
        self.shared.current.load(Ordering::Acquire)
    }

    /// Retire every outstanding stamp, returning the new generation
    pub fn advance(&mut self) -> u64 {
        let next = self.shared.current.fetch_add(1, Ordering::AcqRel) + 1;
        self.shared.retired.notify_waiters();
        next
    }

    pub fn reader(&self) -> GenerationReader {
        GenerationReader {
            shared: Arc::clone(&self.shared),
        }
    }
}

// ----------------------------------------------------------------------------
// Reader
// ----------------------------------------------------------------------------

/// Read-only view of the generation counter
#[derive(Debug, Clone)]
pub struct GenerationReader {
    shared: Arc<Shared>,
}

impl GenerationReader {
    pub fn current(&self) -> u64 {
        self.shared.current.load(Ordering::Acquire)
    }

    /// Capture the live generation for a task about to be spawned
    pub fn stamp(&self) -> GenerationStamp {
        GenerationStamp {
            generation: self.current(),
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Generation captured by one helper task
#[derive(Debug, Clone)]
pub struct GenerationStamp {
    generation: u64,
    shared: Arc<Shared>,
}

impl GenerationStamp {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether this stamp still matches the live generation
    pub fn is_live(&self) -> bool {
        self.shared.current.load(Ordering::Acquire) == self.generation
    }

    /// Resolve once this stamp is no longer live
    pub async fn retired(&self) {
        loop {
            let notified = self.shared.retired.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.is_live() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_advance_retires_old_stamps() {
        let (mut writer, reader) = generation_pair();
        let stamp = reader.stamp();
        assert!(stamp.is_live());

        let next = writer.advance();
        assert_eq!(next, stamp.generation() + 1);
        assert!(!stamp.is_live());
        assert!(reader.stamp().is_live());
    }

    #[tokio::test]
    async fn test_retired_wakes_waiting_task() {
        let (mut writer, reader) = generation_pair();
        let stamp = reader.stamp();
        let waiter = tokio::spawn(async move { stamp.retired().await });

        tokio::task::yield_now().await;
        writer.advance();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("stamp should retire")
            .unwrap();
    }

    #[tokio::test]
    async fn test_retired_returns_immediately_when_stale() {
        let (mut writer, reader) = generation_pair();
        let stamp = reader.stamp();
        writer.advance();
        tokio::time::timeout(Duration::from_millis(100), stamp.retired())
            .await
            .expect("already retired");
    }
}
