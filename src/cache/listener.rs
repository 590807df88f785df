//! Topology change callbacks.

use crate::locality::Locality;

/// Handle returned when registering a [`RehashListener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

/// Receives the two phases of a data rehash.
///
/// Both callbacks run on the thread that changed the topology and must not
/// block; heavy work belongs on the listener's own task.
pub trait RehashListener: Send + Sync {
    /// Called before the new ring is installed, with the locality it implies.
    fn on_pre_rehash(&self, new: &Locality);

    /// Called after the new ring is installed.
    fn on_post_rehash(&self, old: &Locality, new: &Locality);
}
