//! Cache batches.
//!
//! A batch groups the cache writes made while serving one request. The
//! in-memory tier applies writes immediately, so a batch only tracks its own
//! state and the number of batches still open.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// State of a [`Batch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// Open for writes.
    Active,
    /// Completed normally.
    Closed,
    /// Abandoned.
    Discarded,
}

/// Hands out batches and tracks how many are open.
#[derive(Debug, Clone, Default)]
pub struct Batcher {
    active: Arc<AtomicU64>,
    created: Arc<AtomicU64>,
}

impl Batcher {
    /// Create a new batcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a batch.
    pub fn create_batch(&self) -> Batch {
        let id = self.created.fetch_add(1, Ordering::Relaxed) + 1;
        self.active.fetch_add(1, Ordering::Relaxed);
        trace!(batch = id, "Batch opened");
        Batch {
            id,
            state: BatchState::Active,
            active: self.active.clone(),
        }
    }

    /// Number of batches not yet closed or discarded.
    pub fn active_batches(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }
}

/// One open batch. Dropping an active batch closes it.
#[derive(Debug)]
pub struct Batch {
    id: u64,
    state: BatchState,
    active: Arc<AtomicU64>,
}

impl Batch {
    /// Batch sequence number.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> BatchState {
        self.state
    }

    /// Complete the batch.
    pub fn close(&mut self) {
        self.finish(BatchState::Closed);
    }

    /// Abandon the batch.
    pub fn discard(&mut self) {
        self.finish(BatchState::Discarded);
    }

    fn finish(&mut self, state: BatchState) {
        if self.state != BatchState::Active {
            return;
        }
        self.state = state;
        self.active.fetch_sub(1, Ordering::Relaxed);
        trace!(batch = self.id, ?state, "Batch finished");
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_lifecycle() {
        let batcher = Batcher::new();
        let mut first = batcher.create_batch();
        let mut second = batcher.create_batch();
        assert_eq!(batcher.active_batches(), 2);
        assert_eq!(second.id(), 2);

        first.close();
        assert_eq!(first.state(), BatchState::Closed);
        second.discard();
        assert_eq!(second.state(), BatchState::Discarded);
        assert_eq!(batcher.active_batches(), 0);

        // Finishing twice has no effect.
        first.discard();
        assert_eq!(first.state(), BatchState::Closed);
        assert_eq!(batcher.active_batches(), 0);
    }

    #[test]
    fn test_drop_closes() {
        let batcher = Batcher::new();
        {
            let _batch = batcher.create_batch();
            assert_eq!(batcher.active_batches(), 1);
        }
        assert_eq!(batcher.active_batches(), 0);
    }
}
