//! Fan-out over several schedulers.

use crate::bean::ImmutableBeanEntry;
use crate::locality::Locality;
use crate::scheduler::Scheduler;
use crate::types::Identifier;
use std::sync::Arc;

/// Applies every operation to each child, in order.
///
/// Cancels always reach every child, so an expiration schedule never
/// outlives the eviction schedule of the same bean or the other way round.
pub struct CompositeScheduler<I: Identifier> {
    schedulers: Vec<Arc<dyn Scheduler<I>>>,
}

impl<I: Identifier> CompositeScheduler<I> {
    /// Compose the given schedulers.
    pub fn new(schedulers: Vec<Arc<dyn Scheduler<I>>>) -> Self {
        Self { schedulers }
    }

    /// Number of children.
    pub fn len(&self) -> usize {
        self.schedulers.len()
    }

    /// Whether there are no children.
    pub fn is_empty(&self) -> bool {
        self.schedulers.is_empty()
    }
}

impl<I: Identifier> Scheduler<I> for CompositeScheduler<I> {
    fn schedule(&self, id: I, entry: ImmutableBeanEntry<I>) {
        for scheduler in &self.schedulers {
            scheduler.schedule(id.clone(), entry.clone());
        }
    }

    fn cancel(&self, id: &I) {
        for scheduler in &self.schedulers {
            scheduler.cancel(id);
        }
    }

    fn cancel_locality(&self, locality: &Locality) {
        for scheduler in &self.schedulers {
            scheduler.cancel_locality(locality);
        }
    }

    fn contains(&self, id: &I) -> bool {
        self.schedulers.iter().any(|s| s.contains(id))
    }

    fn close(&self) {
        for scheduler in &self.schedulers {
            scheduler.close();
        }
    }
}
