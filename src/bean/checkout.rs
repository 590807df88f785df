//! Beans currently held by callers on this node.

use crate::types::Identifier;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Counts outstanding check-outs per bean.
///
/// The rehash worker must not schedule a bean a caller is holding, so it
/// schedules through [`Checkouts::unless_checked_out`]. That holds the bean's
/// slot while scheduling, so a concurrent check-out either waits and then
/// cancels the new schedule, or wins and the schedule is skipped.
#[derive(Debug)]
pub struct Checkouts<I: Identifier> {
    beans: DashMap<I, usize>,
}

impl<I: Identifier> Checkouts<I> {
    pub fn new() -> Self {
        Self {
            beans: DashMap::new(),
        }
    }

    /// Record one more holder of `id`.
    pub fn check_out(&self, id: &I) {
        *self.beans.entry(id.clone()).or_insert(0) += 1;
    }

    /// Drop one holder of `id`.
    pub fn check_in(&self, id: &I) {
        if let Entry::Occupied(mut holders) = self.beans.entry(id.clone()) {
            *holders.get_mut() -= 1;
            if *holders.get() == 0 {
                holders.remove();
            }
        }
    }

    pub fn is_checked_out(&self, id: &I) -> bool {
        self.beans.contains_key(id)
    }

    /// Run `action` unless `id` is checked out. Returns whether it ran.
    pub fn unless_checked_out(&self, id: &I, action: impl FnOnce()) -> bool {
        match self.beans.entry(id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                action();
                drop(slot);
                true
            }
        }
    }

    /// Number of beans with at least one holder.
    pub fn len(&self) -> usize {
        self.beans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beans.is_empty()
    }
}

impl<I: Identifier> Default for Checkouts<I> {
    fn default() -> Self {
        Self::new()
    }
}
