//! Actions fired by the local schedulers.

use crate::bean::{BeanInstance, ImmutableBeanEntry, RemoveListener};
use crate::cache::BeanCache;
use crate::metrics::BeanMetrics;
use crate::scheduler::ScheduledTask;
use crate::types::Identifier;
use std::sync::Arc;
use tracing::{debug, trace};

/// The cached entry, if it is still the one that was scheduled. A bean
/// closed again since then carries a newer access time and a newer schedule.
fn current_entry<I: Identifier, T: BeanInstance>(
    cache: &BeanCache<I, T>,
    id: &I,
    scheduled: &ImmutableBeanEntry<I>,
) -> Option<ImmutableBeanEntry<I>> {
    let current = cache.peek_entry(id)?;
    if current.last_accessed() != scheduled.last_accessed() {
        trace!(bean_id = ?id, "Bean accessed since it was scheduled, skipping");
        return None;
    }
    Some(current)
}

/// Removes beans whose expiration timeout elapsed.
pub struct ExpiredBeanRemover<I: Identifier, T: BeanInstance> {
    cache: Arc<BeanCache<I, T>>,
    listener: Option<Arc<dyn RemoveListener<T>>>,
    metrics: Arc<BeanMetrics>,
}

impl<I: Identifier, T: BeanInstance> ExpiredBeanRemover<I, T> {
    /// Create a remover notifying `listener` of each removal.
    pub fn new(
        cache: Arc<BeanCache<I, T>>,
        listener: Option<Arc<dyn RemoveListener<T>>>,
        metrics: Arc<BeanMetrics>,
    ) -> Self {
        Self {
            cache,
            listener,
            metrics,
        }
    }
}

impl<I: Identifier, T: BeanInstance> ScheduledTask<I> for ExpiredBeanRemover<I, T> {
    fn execute(&self, id: &I, scheduled: &ImmutableBeanEntry<I>) -> bool {
        if current_entry(&self.cache, id, scheduled).is_none() {
            return false;
        }

        let Some(instance) = self.cache.remove_bean(id) else {
            return false;
        };
        if let Some(listener) = &self.listener {
            listener.removed(&instance);
        }
        self.metrics.beans_expired.inc();
        debug!(bean_id = ?id, "Expired bean removed");
        true
    }
}

/// Passivates the group of a bean that sat idle.
pub struct BeanGroupEvictor<I: Identifier, T: BeanInstance> {
    cache: Arc<BeanCache<I, T>>,
    metrics: Arc<BeanMetrics>,
}

impl<I: Identifier, T: BeanInstance> BeanGroupEvictor<I, T> {
    /// Create an evictor over `cache`.
    pub fn new(cache: Arc<BeanCache<I, T>>, metrics: Arc<BeanMetrics>) -> Self {
        Self { cache, metrics }
    }
}

impl<I: Identifier, T: BeanInstance> ScheduledTask<I> for BeanGroupEvictor<I, T> {
    fn execute(&self, id: &I, scheduled: &ImmutableBeanEntry<I>) -> bool {
        let Some(current) = current_entry(&self.cache, id, scheduled) else {
            return false;
        };

        let group_id = current.group_id();
        if !self.cache.passivate(group_id) {
            trace!(bean_id = ?id, group = ?group_id, "Group already out of memory");
            return false;
        }
        self.metrics.groups_passivated.inc();
        debug!(bean_id = ?id, group = ?group_id, "Idle bean group passivated");
        true
    }
}
