//! Beans and their lifecycle.
//!
//! A [`Bean`] is checked out of the cache by one caller at a time. Closing
//! it writes the instance back into its group and records the access time;
//! [`SchedulableBean`] additionally hands the closed bean to the scheduler so
//! it can expire or be passivated once idle.

pub mod checkout;
pub mod entry;
pub mod listener;

pub use checkout::Checkouts;
pub use entry::{BeanEntry, BeanGroupEntry, BeanInstance, ImmutableBeanEntry};
pub use listener::{PassivationListener, RemoveListener};

use crate::cache::BeanCache;
use crate::error::Result;
use crate::scheduler::Scheduler;
use crate::types::Identifier;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, trace};

/// Lifecycle state of a checked-out bean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeanState {
    /// In use by the caller holding it.
    Active,
    /// Written back to the cache.
    Released,
    /// Deleted from the cache.
    Removed,
}

/// A bean checked out of the cache.
pub struct Bean<I: Identifier, T: BeanInstance> {
    id: I,
    entry: BeanEntry<I>,
    instance: T,
    state: BeanState,
    usage: usize,
    cache: Arc<BeanCache<I, T>>,
}

impl<I: Identifier, T: BeanInstance> Bean<I, T> {
    pub(crate) fn new(id: I, entry: BeanEntry<I>, instance: T, cache: Arc<BeanCache<I, T>>) -> Self {
        Self {
            id,
            entry,
            instance,
            state: BeanState::Active,
            usage: 0,
            cache,
        }
    }

    /// Bean identifier.
    pub fn id(&self) -> &I {
        &self.id
    }

    /// Identifier of the group this bean belongs to.
    pub fn group_id(&self) -> &I {
        self.entry.group_id()
    }

    /// The bean's entry as of checkout, or as of the last close.
    pub fn entry(&self) -> &BeanEntry<I> {
        &self.entry
    }

    /// The bean instance.
    pub fn instance(&self) -> &T {
        &self.instance
    }

    /// Mutable access to the bean instance.
    pub fn instance_mut(&mut self) -> &mut T {
        &mut self.instance
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BeanState {
        self.state
    }

    /// Whether the bean has not been removed.
    pub fn is_valid(&self) -> bool {
        self.state != BeanState::Removed
    }

    /// Whether `timeout` has elapsed since the bean was last closed.
    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.entry.is_expired(timeout, SystemTime::now())
    }

    /// Register one more concurrent user. Fails on a removed bean.
    pub fn acquire(&mut self) -> bool {
        if !self.is_valid() {
            return false;
        }
        self.usage += 1;
        true
    }

    /// Drop one user. Returns `true` once nobody uses the bean anymore.
    pub fn release(&mut self) -> bool {
        self.usage = self.usage.saturating_sub(1);
        self.usage == 0
    }

    /// Write the bean back to the cache.
    ///
    /// Closing a removed bean does nothing.
    pub fn close(&mut self) -> Result<()> {
        if !self.is_valid() {
            return Ok(());
        }

        self.entry.set_last_accessed(SystemTime::now());
        self.cache
            .release_bean(self.id.clone(), self.entry.clone(), self.instance.clone())?;
        self.state = BeanState::Released;
        trace!(bean_id = ?self.id, "Bean closed");
        Ok(())
    }

    /// Delete the bean and its instance from the cache.
    ///
    /// Returns `false` if it was already removed.
    pub fn remove(&mut self, listener: Option<&dyn RemoveListener<T>>) -> bool {
        if !self.is_valid() {
            return false;
        }

        self.cache.remove_bean(&self.id);
        self.state = BeanState::Removed;
        if let Some(listener) = listener {
            listener.removed(&self.instance);
        }
        debug!(bean_id = ?self.id, "Bean removed");
        true
    }
}

impl<I: Identifier, T: BeanInstance + std::fmt::Debug> std::fmt::Debug for Bean<I, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bean")
            .field("id", &self.id)
            .field("entry", &self.entry)
            .field("instance", &self.instance)
            .field("state", &self.state)
            .finish()
    }
}

/// A bean that schedules itself on close.
///
/// While a tracked bean is held it counts as checked out, and rehashing
/// leaves it unscheduled. Closing, removing or dropping it checks it back in.
pub struct SchedulableBean<I: Identifier, T: BeanInstance> {
    bean: Bean<I, T>,
    scheduler: Option<Arc<dyn Scheduler<I>>>,
    checkouts: Option<Arc<Checkouts<I>>>,
}

impl<I: Identifier, T: BeanInstance> SchedulableBean<I, T> {
    /// Wrap a bean. Without a scheduler this behaves like the bare bean.
    pub fn new(bean: Bean<I, T>, scheduler: Option<Arc<dyn Scheduler<I>>>) -> Self {
        Self {
            bean,
            scheduler,
            checkouts: None,
        }
    }

    /// Wrap a bean that the caller already recorded in `checkouts`.
    pub(crate) fn checked_out(
        bean: Bean<I, T>,
        scheduler: Option<Arc<dyn Scheduler<I>>>,
        checkouts: Arc<Checkouts<I>>,
    ) -> Self {
        Self {
            bean,
            scheduler,
            checkouts: Some(checkouts),
        }
    }

    fn check_in(&mut self) {
        if let Some(checkouts) = self.checkouts.take() {
            checkouts.check_in(&self.bean.id);
        }
    }

    /// Close the bean and, if it is still valid, schedule it with the entry
    /// written on close.
    pub fn close(&mut self) -> Result<()> {
        self.bean.close()?;
        if self.bean.is_valid() {
            if let Some(scheduler) = &self.scheduler {
                scheduler.schedule(self.bean.id.clone(), self.bean.entry.clone());
            }
        }
        self.check_in();
        Ok(())
    }

    /// Remove the bean and drop any pending schedule for it.
    pub fn remove(&mut self, listener: Option<&dyn RemoveListener<T>>) -> bool {
        let removed = self.bean.remove(listener);
        if removed {
            if let Some(scheduler) = &self.scheduler {
                scheduler.cancel(&self.bean.id);
            }
        }
        self.check_in();
        removed
    }
}

impl<I: Identifier, T: BeanInstance> Drop for SchedulableBean<I, T> {
    fn drop(&mut self) {
        self.check_in();
    }
}

impl<I: Identifier, T: BeanInstance + std::fmt::Debug> std::fmt::Debug for SchedulableBean<I, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulableBean")
            .field("bean", &self.bean)
            .field("scheduled", &self.scheduler.is_some())
            .finish()
    }
}

impl<I: Identifier, T: BeanInstance> Deref for SchedulableBean<I, T> {
    type Target = Bean<I, T>;

    fn deref(&self) -> &Self::Target {
        &self.bean
    }
}

impl<I: Identifier, T: BeanInstance> DerefMut for SchedulableBean<I, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.bean
    }
}
