//! Bean lifecycle callbacks.

/// Notified around passivation of a bean group.
///
/// Only attached to persistent caches; a non-persistent cache drops evicted
/// groups instead of passivating them.
pub trait PassivationListener<T>: Send + Sync {
    /// Called on each instance before its group is moved to the store.
    fn pre_passivate(&self, _instance: &mut T) {}

    /// Called on each instance after its group is loaded from the store.
    fn post_activate(&self, _instance: &mut T) {}
}

/// Notified when a bean is removed, explicitly or by expiration.
pub trait RemoveListener<T>: Send + Sync {
    /// Called with the removed instance.
    fn removed(&self, instance: &T);
}
