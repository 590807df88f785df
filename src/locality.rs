//! Key locality predicates.
//!
//! A [`Locality`] answers "is this key primarily owned by the local node?"
//! Rehash handling compares two localities (before and after a topology
//! change) to find keys that moved onto or off of this node.

use crate::partitioning::{OwnershipTracker, RingSnapshot};
use crate::types::{CacheMode, NodeId};
use std::hash::Hash;
use std::sync::Arc;

/// Locality view of one node.
#[derive(Debug, Clone)]
pub enum Locality {
    /// Every key is local (`true`) or remote (`false`).
    Simple(bool),

    /// Live view of the cache's current distribution.
    Cache {
        /// Clustering mode of the cache.
        mode: CacheMode,
        /// Live ownership.
        tracker: Arc<OwnershipTracker>,
    },

    /// Frozen ring at one topology generation.
    ConsistentHash {
        /// The frozen ring.
        snapshot: RingSnapshot,
        /// The node whose locality this is.
        local: NodeId,
    },
}

impl Locality {
    /// Constant locality.
    pub fn simple(all_local: bool) -> Self {
        Locality::Simple(all_local)
    }

    /// Live locality over a cache's ownership tracker.
    pub fn cache(mode: CacheMode, tracker: Arc<OwnershipTracker>) -> Self {
        Locality::Cache { mode, tracker }
    }

    /// Frozen locality over a ring snapshot.
    pub fn consistent_hash(snapshot: RingSnapshot, local: NodeId) -> Self {
        Locality::ConsistentHash { snapshot, local }
    }

    /// Whether `key` is primarily owned by the local node.
    pub fn is_local<K: Hash + ?Sized>(&self, key: &K) -> bool {
        match self {
            Locality::Simple(all_local) => *all_local,
            Locality::Cache { mode, tracker } => !mode.is_clustered() || tracker.is_primary(key),
            Locality::ConsistentHash { snapshot, local } => match snapshot.primary(key) {
                Some(owner) => owner == *local,
                // An empty ring has no owners; nothing can be claimed.
                None => false,
            },
        }
    }

    /// Freeze a live locality at the tracker's current ring.
    pub fn freeze(&self) -> Locality {
        match self {
            Locality::Cache { mode, tracker } if mode.is_clustered() => {
                Locality::consistent_hash(tracker.snapshot(), tracker.local_node_id())
            }
            Locality::Cache { .. } => Locality::Simple(true),
            other => other.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partitioning::HashRing;

    #[test]
    fn test_simple_locality() {
        assert!(Locality::simple(true).is_local("anything"));
        assert!(!Locality::simple(false).is_local("anything"));
    }

    #[test]
    fn test_cache_locality_is_live() {
        let tracker = Arc::new(OwnershipTracker::new(1, 1));
        tracker.set_nodes(&[1]);
        let locality = Locality::cache(CacheMode::Distributed, tracker.clone());
        assert!(locality.is_local("B1"));

        tracker.set_nodes(&[2]);
        assert!(!locality.is_local("B1"));
    }

    #[test]
    fn test_local_mode_always_local() {
        let tracker = Arc::new(OwnershipTracker::new(1, 1));
        tracker.set_nodes(&[2]);
        let locality = Locality::cache(CacheMode::Local, tracker);
        assert!(locality.is_local("B1"));
        assert!(locality.freeze().is_local("B1"));
    }

    #[test]
    fn test_consistent_hash_locality_is_frozen() {
        let tracker = Arc::new(OwnershipTracker::new(1, 1));
        tracker.set_nodes(&[1]);
        let frozen = Locality::cache(CacheMode::Distributed, tracker.clone()).freeze();

        tracker.set_nodes(&[2]);
        assert!(frozen.is_local("B1"));
    }

    #[test]
    fn test_snapshots_diff() {
        let ring = HashRing::new(1).rebuilt(&[1]);
        let old = Locality::consistent_hash(
            RingSnapshot {
                ring: Arc::new(ring.clone()),
                generation: 1,
            },
            2,
        );
        let new = Locality::consistent_hash(
            RingSnapshot {
                ring: Arc::new(ring.rebuilt(&[2])),
                generation: 2,
            },
            2,
        );

        assert!(!old.is_local("B1"));
        assert!(new.is_local("B1"));
    }

    #[test]
    fn test_empty_ring_is_remote() {
        let locality = Locality::consistent_hash(
            RingSnapshot {
                ring: Arc::new(HashRing::new(1)),
                generation: 0,
            },
            1,
        );
        assert!(!locality.is_local("B1"));
    }
}
