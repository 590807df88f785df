//! Durable bean and bean group entries.

use crate::types::Identifier;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, SystemTime};

/// Bound satisfied by every bean instance type.
pub trait BeanInstance: Clone + Send + Sync + 'static {}

impl<T> BeanInstance for T where T: Clone + Send + Sync + 'static {}

/// The durable representation of a bean, stored under its [`BeanKey`].
///
/// [`BeanKey`]: crate::types::BeanKey
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeanEntry<I> {
    bean_name: String,
    group_id: I,
    last_accessed: Option<SystemTime>,
}

/// Snapshot of an entry taken when it is scheduled.
pub type ImmutableBeanEntry<I> = BeanEntry<I>;

impl<I: Identifier> BeanEntry<I> {
    /// Create an entry that has not been released yet.
    pub fn new(bean_name: impl Into<String>, group_id: I) -> Self {
        Self {
            bean_name: bean_name.into(),
            group_id,
            last_accessed: None,
        }
    }

    /// Bean type name.
    pub fn bean_name(&self) -> &str {
        &self.bean_name
    }

    /// Group this bean belongs to.
    pub fn group_id(&self) -> &I {
        &self.group_id
    }

    /// When the bean was last released.
    pub fn last_accessed(&self) -> Option<SystemTime> {
        self.last_accessed
    }

    /// Record a release.
    pub fn set_last_accessed(&mut self, at: SystemTime) {
        self.last_accessed = Some(at);
    }

    /// Time left before `timeout` elapses since the last release.
    ///
    /// A bean never released gets the full timeout.
    pub fn remaining(&self, timeout: Duration, now: SystemTime) -> Duration {
        match self.last_accessed {
            Some(at) => {
                let elapsed = now.duration_since(at).unwrap_or(Duration::ZERO);
                timeout.saturating_sub(elapsed)
            }
            None => timeout,
        }
    }

    /// Whether `timeout` has elapsed since the last release.
    ///
    /// Zero timeouts never expire; unreleased beans never expire.
    pub fn is_expired(&self, timeout: Duration, now: SystemTime) -> bool {
        if timeout.is_zero() {
            return false;
        }
        self.last_accessed.is_some() && self.remaining(timeout, now).is_zero()
    }
}

/// Beans that are passivated and activated together.
#[derive(Debug, Clone)]
pub struct BeanGroupEntry<I, T> {
    beans: HashMap<I, T>,
}

impl<I: Identifier, T: BeanInstance> BeanGroupEntry<I, T> {
    /// Create an empty group.
    pub fn new() -> Self {
        Self {
            beans: HashMap::new(),
        }
    }

    /// Add or replace a member instance.
    pub fn add(&mut self, id: I, instance: T) {
        self.beans.insert(id, instance);
    }

    /// Remove a member instance.
    pub fn remove(&mut self, id: &I) -> Option<T> {
        self.beans.remove(id)
    }

    /// Get a member instance.
    pub fn get(&self, id: &I) -> Option<&T> {
        self.beans.get(id)
    }

    /// Member identifiers.
    pub fn ids(&self) -> impl Iterator<Item = &I> {
        self.beans.keys()
    }

    /// Mutable access to every instance.
    pub fn instances_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.beans.values_mut()
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.beans.len()
    }

    /// Whether the group has no members left.
    pub fn is_empty(&self) -> bool {
        self.beans.is_empty()
    }
}

impl<I: Identifier, T: BeanInstance> Default for BeanGroupEntry<I, T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreleased_entry_never_expires() {
        let entry = BeanEntry::new("Cart", "g1".to_string());
        let now = SystemTime::now();
        assert!(!entry.is_expired(Duration::from_millis(1), now + Duration::from_secs(60)));
        assert_eq!(entry.remaining(Duration::from_secs(5), now), Duration::from_secs(5));
    }

    #[test]
    fn test_released_entry_expiry() {
        let mut entry = BeanEntry::new("Cart", "g1".to_string());
        let at = SystemTime::now();
        entry.set_last_accessed(at);

        let timeout = Duration::from_secs(10);
        assert!(!entry.is_expired(timeout, at + Duration::from_secs(5)));
        assert_eq!(entry.remaining(timeout, at + Duration::from_secs(4)), Duration::from_secs(6));
        assert!(entry.is_expired(timeout, at + Duration::from_secs(10)));
        assert!(!entry.is_expired(Duration::ZERO, at + Duration::from_secs(100)));
    }

    #[test]
    fn test_group_membership() {
        let mut group: BeanGroupEntry<String, u32> = BeanGroupEntry::new();
        group.add("b1".into(), 1);
        group.add("b2".into(), 2);
        assert_eq!(group.len(), 2);
        assert_eq!(group.get(&"b1".to_string()), Some(&1));

        assert_eq!(group.remove(&"b1".to_string()), Some(1));
        assert_eq!(group.remove(&"b1".to_string()), None);
        group.remove(&"b2".to_string());
        assert!(group.is_empty());
    }
}
